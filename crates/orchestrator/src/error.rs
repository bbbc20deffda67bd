use launcher_core::PhaseId;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("Failed to launch '{command}': {reason}")]
    DispatchFailure { command: String, reason: String },

    #[error("'{label}' exited with code {exit_code}")]
    NonZeroExit { label: String, exit_code: i32 },

    #[error("No completion received for '{label}' within {waited:?}")]
    CorrelationFailure { label: String, waited: Duration },

    #[error("Installation of {0} failed")]
    DependencyInstallFailure(String),

    #[error("Verification failed for: {}", .0.join(", "))]
    DependencyVerificationFailure(Vec<String>),

    #[error("{flow} aborted: '{step}' exited with code {exit_code}")]
    ChainAbort {
        flow: String,
        step: String,
        exit_code: i32,
    },

    #[error("Another phase is already running")]
    Busy,

    #[error("Invalid status transition from {from} to {to}")]
    InvalidTransition { from: String, to: String },

    #[error("Unknown phase: {0}")]
    UnknownPhase(PhaseId),

    #[error("Unknown tool: {0}")]
    UnknownTool(String),

    #[error("'{label}' not ready after {waited:?} ({probe})")]
    ReadinessTimeout {
        label: String,
        probe: String,
        waited: Duration,
    },

    #[error("'{label}' exited with code {exit_code} before becoming ready")]
    ExitedBeforeReady { label: String, exit_code: i32 },

    #[error("Execution cancelled")]
    Cancelled,

    #[error("Advisor error: {message}")]
    Advisor {
        message: String,
        status_code: Option<u16>,
    },

    #[error("Advisor rate limited")]
    RateLimited,

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Orchestrator channel closed")]
    ChannelClosed,
}

impl OrchestratorError {
    pub fn dispatch_failed(command: impl Into<String>, reason: impl ToString) -> Self {
        Self::DispatchFailure {
            command: command.into(),
            reason: reason.to_string(),
        }
    }

    pub fn advisor(message: impl Into<String>, status_code: Option<u16>) -> Self {
        Self::Advisor {
            message: message.into(),
            status_code,
        }
    }
}

pub type Result<T> = std::result::Result<T, OrchestratorError>;
