//! Remediation advice from a language-model service.

use async_trait::async_trait;
use launcher_core::AdvisorSection;
use regex::Regex;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::error::{OrchestratorError, Result};

const DEFAULT_MAX_RETRIES: u32 = 3;
const INITIAL_BACKOFF_MS: u64 = 1000;
const MAX_BACKOFF_MS: u64 = 60000;

const SYSTEM_PROMPT: &str = "You are the AI agent of a local stack launcher.\n\
CONTEXT: The user is installing and starting a local stack (Docker, Node, etc.).\n\
GOAL: Fix installation errors.\n\n\
RULES:\n\
1. Be concise. Use Markdown.\n\
2. If a tool is missing (Docker), suggest installing it explicitly, but note that the launcher installs missing tools automatically where it can.\n\
3. If you see 'Verification failed' after a successful installation, explain it is likely a PATH issue and they can proceed or restart their shell.\n\
4. ACTIONABLE: If you know a command that fixes the issue (e.g. 'npm install', 'docker start'), output it in a block like this:\n\
```EXECUTE\n<command>\n```\n";

/// Advisor output. Displayed to the operator, never executed by the launcher.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct Advice {
    pub analysis: String,
    pub suggested_command: Option<String>,
}

impl Advice {
    pub fn from_analysis(analysis: impl Into<String>) -> Self {
        let analysis = analysis.into();
        let suggested_command = extract_execute_block(&analysis);
        Self {
            analysis,
            suggested_command,
        }
    }
}

#[async_trait]
pub trait Advisor: Send + Sync {
    async fn advise(&self, recent_output: &str) -> Result<Advice>;
}

/// Content of the first ```` ```EXECUTE ```` fenced block, trimmed.
pub fn extract_execute_block(text: &str) -> Option<String> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    let pattern = PATTERN
        .get_or_init(|| Regex::new(r"(?s)```EXECUTE[ \t]*\r?\n(.*?)```").ok())
        .as_ref()?;

    pattern
        .captures(text)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().trim().to_string())
        .filter(|s| !s.is_empty())
}

/// Keep the last `max_chars` characters of `text`.
pub fn last_chars(text: &str, max_chars: usize) -> &str {
    let total = text.chars().count();
    if total <= max_chars {
        return text;
    }
    match text.char_indices().nth(total - max_chars) {
        Some((index, _)) => &text[index..],
        None => text,
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Debug, Serialize)]
struct ChatCompletionRequest {
    model: String,
    messages: Vec<ChatMessage>,
    temperature: f64,
    top_p: f64,
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    error: ApiErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ApiErrorDetail {
    message: String,
}

/// Client for any OpenAI-compatible `/chat/completions` endpoint.
#[derive(Clone)]
pub struct ChatCompletionsAdvisor {
    client: Client,
    api_key: String,
    base_url: String,
    model: String,
    max_log_chars: usize,
    initial_backoff: Duration,
}

impl ChatCompletionsAdvisor {
    pub fn new(api_key: impl Into<String>, config: &AdvisorSection) -> Self {
        Self {
            client: Client::new(),
            api_key: api_key.into(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            max_log_chars: config.max_log_chars,
            initial_backoff: Duration::from_millis(INITIAL_BACKOFF_MS),
        }
    }

    /// Build from config, reading the key from `api_key_env`.
    ///
    /// Returns `None` when the advisor is disabled or the key is unset.
    pub fn from_env(config: &AdvisorSection) -> Option<Self> {
        if !config.enabled {
            return None;
        }
        match std::env::var(&config.api_key_env) {
            Ok(key) if !key.trim().is_empty() => Some(Self::new(key, config)),
            _ => {
                info!(env = %config.api_key_env, "Advisor API key not set, troubleshooting disabled");
                None
            }
        }
    }

    pub fn with_initial_backoff(mut self, backoff: Duration) -> Self {
        self.initial_backoff = backoff;
        self
    }

    async fn with_retry<T, F, Fut>(&self, operation: F, operation_name: &str) -> Result<T>
    where
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = Result<T>>,
    {
        let mut retries = 0;
        let mut backoff = self.initial_backoff;
        let max_backoff = Duration::from_millis(MAX_BACKOFF_MS);

        loop {
            match operation().await {
                Ok(result) => return Ok(result),
                Err(e @ OrchestratorError::RateLimited)
                | Err(
                    e @ OrchestratorError::Advisor {
                        status_code: Some(500..),
                        ..
                    },
                ) => {
                    if retries >= DEFAULT_MAX_RETRIES {
                        error!("{} failed after {} retries: {}", operation_name, retries, e);
                        return Err(e);
                    }

                    warn!(
                        "{} failed ({}), retrying in {:?} (attempt {}/{})",
                        operation_name,
                        e,
                        backoff,
                        retries + 1,
                        DEFAULT_MAX_RETRIES
                    );

                    tokio::time::sleep(backoff).await;
                    retries += 1;
                    backoff = (backoff * 2).min(max_backoff);
                }
                Err(e) => {
                    if retries > 0 {
                        info!("{} failed after {} retries: {}", operation_name, retries, e);
                    }
                    return Err(e);
                }
            }
        }
    }

    async fn chat_completion_inner(&self, logs: &str) -> Result<String> {
        debug!(model = %self.model, chars = logs.chars().count(), "Requesting advice");

        let request = ChatCompletionRequest {
            model: self.model.clone(),
            messages: vec![
                ChatMessage {
                    role: "system".to_string(),
                    content: SYSTEM_PROMPT.to_string(),
                },
                ChatMessage {
                    role: "user".to_string(),
                    content: logs.to_string(),
                },
            ],
            temperature: 0.1,
            top_p: 0.1,
            stream: false,
        };

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();

            if status.as_u16() == 429 {
                warn!("Advisor rate limited");
                return Err(OrchestratorError::RateLimited);
            }

            let message = serde_json::from_str::<ApiErrorBody>(&error_text)
                .map(|body| body.error.message)
                .unwrap_or(error_text);
            error!(status = status.as_u16(), "Advisor API error: {}", message);
            return Err(OrchestratorError::advisor(message, Some(status.as_u16())));
        }

        let chat_response: ChatCompletionResponse = response.json().await?;

        chat_response
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| OrchestratorError::advisor("No completion returned", None))
    }
}

#[async_trait]
impl Advisor for ChatCompletionsAdvisor {
    async fn advise(&self, recent_output: &str) -> Result<Advice> {
        let logs = last_chars(recent_output, self.max_log_chars);
        let analysis = self
            .with_retry(|| self.chat_completion_inner(logs), "troubleshoot")
            .await?;
        Ok(Advice::from_analysis(analysis))
    }
}
