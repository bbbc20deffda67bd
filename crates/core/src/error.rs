use thiserror::Error;

use crate::domain::PhaseId;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Duplicate phase id: {0}")]
    DuplicatePhase(PhaseId),

    #[error("Phase {phase} requires unknown tool: {tool}")]
    UnknownTool { phase: PhaseId, tool: String },

    #[error("Invalid configuration: {0}")]
    Validation(String),

    #[error("Failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Failed to serialize configuration: {0}")]
    Serialize(#[from] toml::ser::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let error = CoreError::UnknownTool {
            phase: 2,
            tool: "Docker".to_string(),
        };
        assert_eq!(error.to_string(), "Phase 2 requires unknown tool: Docker");
    }
}
