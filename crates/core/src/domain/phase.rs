use serde::{Deserialize, Serialize};
use std::time::Duration;
use utoipa::ToSchema;

use super::execution::ExecutionMode;

pub type PhaseId = u32;

/// Whether a phase's process is expected to exit or to keep running.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default, ToSchema, Hash)]
#[serde(rename_all = "snake_case")]
pub enum PhaseClassification {
    /// Runs to completion; the pipeline waits for its exit code.
    #[default]
    Terminating,
    /// Long-lived (a server); considered done once ready.
    Detached,
}

impl PhaseClassification {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Terminating => "terminating",
            Self::Detached => "detached",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "terminating" => Some(Self::Terminating),
            "detached" => Some(Self::Detached),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default, ToSchema, Hash)]
#[serde(rename_all = "snake_case")]
pub enum PhaseStatus {
    #[default]
    Pending,
    Running,
    Success,
    Error,
}

impl PhaseStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Success => "success",
            Self::Error => "error",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "running" => Some(Self::Running),
            "success" => Some(Self::Success),
            "error" => Some(Self::Error),
            _ => None,
        }
    }

    pub fn is_settled(&self) -> bool {
        matches!(self, Self::Success | Self::Error)
    }
}

/// Check that decides when a detached phase is ready to serve.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ReadinessProbe {
    /// Ready once the URL answers with any non-5xx status.
    Http { url: String },
    /// Ready once a TCP connection to `address` succeeds.
    Tcp { address: String },
}

impl ReadinessProbe {
    pub fn describe(&self) -> String {
        match self {
            Self::Http { url } => format!("http {}", url),
            Self::Tcp { address } => format!("tcp {}", address),
        }
    }
}

/// One named step of the install/build pipeline.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
pub struct Phase {
    pub id: PhaseId,
    pub name: String,
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub classification: PhaseClassification,
    #[serde(default)]
    pub mode: ExecutionMode,
    /// Tools verified (and installed if missing) before the command runs
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub requires: Vec<String>,
    /// Upper bound on a terminating phase's run time
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
    /// Replaces the grace period for detached phases
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub readiness: Option<ReadinessProbe>,
}

impl Phase {
    pub fn new(id: PhaseId, name: impl Into<String>, command: impl Into<String>, args: &[&str]) -> Self {
        Self {
            id,
            name: name.into(),
            command: command.into(),
            args: args.iter().map(|a| a.to_string()).collect(),
            classification: PhaseClassification::Terminating,
            mode: ExecutionMode::Shell,
            requires: Vec::new(),
            readiness: None,
            timeout_secs: None,
        }
    }

    /// Ad-hoc phase built from a raw command request.
    pub fn ad_hoc(command: impl Into<String>, args: Vec<String>) -> Self {
        let command = command.into();
        Self {
            id: 0,
            name: format!("Ad-hoc: {}", command),
            command,
            args,
            classification: PhaseClassification::Terminating,
            mode: ExecutionMode::Shell,
            requires: Vec::new(),
            readiness: None,
            timeout_secs: None,
        }
    }

    pub fn detached(mut self) -> Self {
        self.classification = PhaseClassification::Detached;
        self
    }

    pub fn requiring(mut self, tools: &[&str]) -> Self {
        self.requires = tools.iter().map(|t| t.to_string()).collect();
        self
    }

    pub fn with_readiness(mut self, probe: ReadinessProbe) -> Self {
        self.readiness = Some(probe);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_secs = Some(timeout.as_secs());
        self
    }

    pub fn with_mode(mut self, mode: ExecutionMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn is_detached(&self) -> bool {
        self.classification == PhaseClassification::Detached
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_secs.map(Duration::from_secs)
    }

    pub fn command_line(&self) -> String {
        if self.args.is_empty() {
            self.command.clone()
        } else {
            format!("{} {}", self.command, self.args.join(" "))
        }
    }
}

/// The stock pipeline for a Fonoster-style monorepo checkout.
pub fn default_phases() -> Vec<Phase> {
    vec![
        Phase::new(1, "Preparation (Install)", "npm", &["install"]).requiring(&["Node.js", "NPM"]),
        Phase::new(2, "Infrastructure (Docker)", "npm", &["run", "start:services"])
            .requiring(&["Docker"]),
        Phase::new(3, "Build", "npm", &["run", "build"]),
        Phase::new(4, "DB Migrate", "npm", &["run", "db:migrate"]),
        Phase::new(5, "DB Seed", "npm", &["run", "db:seed"]),
        Phase::new(6, "Start Core", "npm", &["run", "start:apiserver"]).detached(),
        Phase::new(7, "Start Dashboard", "npm", &["run", "start:dashboard"]).detached(),
    ]
}
