//! `launcher.toml` model.
//!
//! Every section is optional; omitted values fall back to the stock
//! pipeline, tool list and lifecycle commands.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::PathBuf;
use std::time::Duration;

use crate::domain::{default_phases, default_tools, CommandSpec, Phase, ToolSpec};
use crate::error::CoreError;

pub const CONFIG_FILE: &str = "launcher.toml";
pub const DEFAULT_PORT: u16 = 3001;
pub const DEFAULT_GRACE_PERIOD_SECS: u64 = 5;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LauncherConfig {
    #[serde(default)]
    pub project: ProjectSection,
    #[serde(default)]
    pub server: ServerSection,
    #[serde(default)]
    pub pipeline: PipelineSection,
    #[serde(default = "default_phases")]
    pub phases: Vec<Phase>,
    #[serde(default = "default_tools")]
    pub tools: Vec<ToolSpec>,
    #[serde(default)]
    pub lifecycle: LifecycleSection,
    #[serde(default)]
    pub advisor: AdvisorSection,
}

impl Default for LauncherConfig {
    fn default() -> Self {
        Self {
            project: ProjectSection::default(),
            server: ServerSection::default(),
            pipeline: PipelineSection::default(),
            phases: default_phases(),
            tools: default_tools(),
            lifecycle: LifecycleSection::default(),
            advisor: AdvisorSection::default(),
        }
    }
}

impl LauncherConfig {
    pub fn from_toml_str(content: &str) -> Result<Self, CoreError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> Result<String, CoreError> {
        Ok(toml::to_string_pretty(self)?)
    }

    pub fn validate(&self) -> Result<(), CoreError> {
        let mut seen = HashSet::new();
        for phase in &self.phases {
            if phase.id == 0 {
                return Err(CoreError::Validation(format!(
                    "phase '{}' uses reserved id 0",
                    phase.name
                )));
            }
            if !seen.insert(phase.id) {
                return Err(CoreError::DuplicatePhase(phase.id));
            }
            if phase.command.trim().is_empty() {
                return Err(CoreError::Validation(format!(
                    "phase {} has an empty command",
                    phase.id
                )));
            }
            for tool in &phase.requires {
                if self.tool(tool).is_none() {
                    return Err(CoreError::UnknownTool {
                        phase: phase.id,
                        tool: tool.clone(),
                    });
                }
            }
        }
        Ok(())
    }

    pub fn tool(&self, name: &str) -> Option<&ToolSpec> {
        self.tools.iter().find(|t| t.name == name)
    }

    pub fn phase(&self, id: u32) -> Option<&Phase> {
        self.phases.iter().find(|p| p.id == id)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProjectSection {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Working directory for every command; defaults to the config file's directory
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub root: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSection {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            port: default_port(),
            bind: default_bind(),
        }
    }
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_bind() -> String {
    "0.0.0.0".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineSection {
    /// Wait applied to detached phases without a readiness probe
    #[serde(default = "default_grace_period_secs")]
    pub grace_period_secs: u64,
    #[serde(default = "default_readiness_timeout_secs")]
    pub readiness_timeout_secs: u64,
    #[serde(default = "default_readiness_interval_ms")]
    pub readiness_interval_ms: u64,
    /// Bound on waiting for a completion record when a phase sets no timeout
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_timeout_secs: Option<u64>,
    #[serde(default = "default_output_tail_chars")]
    pub output_tail_chars: usize,
}

impl Default for PipelineSection {
    fn default() -> Self {
        Self {
            grace_period_secs: default_grace_period_secs(),
            readiness_timeout_secs: default_readiness_timeout_secs(),
            readiness_interval_ms: default_readiness_interval_ms(),
            correlation_timeout_secs: None,
            output_tail_chars: default_output_tail_chars(),
        }
    }
}

impl PipelineSection {
    pub fn grace_period(&self) -> Duration {
        Duration::from_secs(self.grace_period_secs)
    }

    pub fn readiness_timeout(&self) -> Duration {
        Duration::from_secs(self.readiness_timeout_secs)
    }

    pub fn readiness_interval(&self) -> Duration {
        Duration::from_millis(self.readiness_interval_ms)
    }

    pub fn correlation_timeout(&self) -> Option<Duration> {
        self.correlation_timeout_secs.map(Duration::from_secs)
    }
}

fn default_grace_period_secs() -> u64 {
    DEFAULT_GRACE_PERIOD_SECS
}

fn default_readiness_timeout_secs() -> u64 {
    60
}

fn default_readiness_interval_ms() -> u64 {
    500
}

fn default_output_tail_chars() -> usize {
    5000
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LifecycleSection {
    /// Skip `clean` when `stop` exits non-zero during uninstall
    #[serde(default)]
    pub abort_uninstall_on_stop_failure: bool,
    #[serde(default = "default_stop")]
    pub stop: CommandSpec,
    #[serde(default = "default_clean")]
    pub clean: CommandSpec,
    #[serde(default = "default_pull")]
    pub pull: CommandSpec,
    #[serde(default = "default_reinstall")]
    pub reinstall: CommandSpec,
}

impl Default for LifecycleSection {
    fn default() -> Self {
        Self {
            abort_uninstall_on_stop_failure: false,
            stop: default_stop(),
            clean: default_clean(),
            pull: default_pull(),
            reinstall: default_reinstall(),
        }
    }
}

fn default_stop() -> CommandSpec {
    CommandSpec::new("npm", &["run", "stop:services"])
}

fn default_clean() -> CommandSpec {
    CommandSpec::new("npm", &["run", "clean"])
}

fn default_pull() -> CommandSpec {
    CommandSpec::new("git", &["pull"])
}

fn default_reinstall() -> CommandSpec {
    CommandSpec::new("npm", &["install"])
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdvisorSection {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_advisor_base_url")]
    pub base_url: String,
    #[serde(default = "default_advisor_model")]
    pub model: String,
    /// Environment variable holding the API key
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    /// Characters of recent output sent with each request
    #[serde(default = "default_max_log_chars")]
    pub max_log_chars: usize,
}

impl Default for AdvisorSection {
    fn default() -> Self {
        Self {
            enabled: true,
            base_url: default_advisor_base_url(),
            model: default_advisor_model(),
            api_key_env: default_api_key_env(),
            max_log_chars: default_max_log_chars(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_advisor_base_url() -> String {
    "https://api.sambanova.ai/v1".to_string()
}

fn default_advisor_model() -> String {
    "Meta-Llama-3.1-8B-Instruct".to_string()
}

fn default_api_key_env() -> String {
    "LAUNCHER_AI_API_KEY".to_string()
}

fn default_max_log_chars() -> usize {
    2000
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = LauncherConfig::from_toml_str("").unwrap();
        assert_eq!(config.server.port, DEFAULT_PORT);
        assert_eq!(config.pipeline.grace_period(), Duration::from_secs(5));
        assert_eq!(config.phases.len(), 7);
        assert_eq!(config.tools.len(), 3);
        assert_eq!(config.lifecycle.pull.command_line(), "git pull");
        assert!(!config.lifecycle.abort_uninstall_on_stop_failure);
        assert_eq!(config.advisor.max_log_chars, 2000);
    }

    #[test]
    fn test_custom_phases() {
        let toml = r#"
            [pipeline]
            grace_period_secs = 2

            [[phases]]
            id = 1
            name = "Install"
            command = "cargo"
            args = ["fetch"]

            [[phases]]
            id = 2
            name = "Serve"
            command = "cargo"
            args = ["run"]
            classification = "detached"
            readiness = { kind = "http", url = "http://localhost:8080/health" }
        "#;
        let config = LauncherConfig::from_toml_str(toml).unwrap();
        assert_eq!(config.phases.len(), 2);
        assert!(config.phases[1].is_detached());
        assert!(config.phases[1].readiness.is_some());
        assert_eq!(config.pipeline.grace_period_secs, 2);
    }

    #[test]
    fn test_duplicate_phase_ids_rejected() {
        let toml = r#"
            [[phases]]
            id = 1
            name = "A"
            command = "true"

            [[phases]]
            id = 1
            name = "B"
            command = "true"
        "#;
        let err = LauncherConfig::from_toml_str(toml).unwrap_err();
        assert!(matches!(err, CoreError::DuplicatePhase(1)));
    }

    #[test]
    fn test_unknown_required_tool_rejected() {
        let toml = r#"
            [[phases]]
            id = 1
            name = "A"
            command = "true"
            requires = ["Rust"]
        "#;
        let err = LauncherConfig::from_toml_str(toml).unwrap_err();
        assert!(matches!(err, CoreError::UnknownTool { phase: 1, .. }));
    }

    #[test]
    fn test_round_trip_default_config() {
        let config = LauncherConfig::default();
        let text = config.to_toml_string().unwrap();
        let parsed = LauncherConfig::from_toml_str(&text).unwrap();
        assert_eq!(parsed.phases, config.phases);
        assert_eq!(parsed.tools, config.tools);
    }
}
