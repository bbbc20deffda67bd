use launcher_core::PhaseStatus;

use crate::error::{OrchestratorError, Result};

pub struct PhaseStateMachine;

impl PhaseStateMachine {
    pub fn validate_transition(from: &PhaseStatus, to: &PhaseStatus) -> Result<()> {
        let allowed = Self::allowed_transitions(from);

        if allowed.contains(to) {
            Ok(())
        } else {
            Err(OrchestratorError::InvalidTransition {
                from: from.as_str().to_string(),
                to: to.as_str().to_string(),
            })
        }
    }

    fn allowed_transitions(from: &PhaseStatus) -> Vec<PhaseStatus> {
        match from {
            PhaseStatus::Pending => vec![PhaseStatus::Running],
            PhaseStatus::Running => vec![PhaseStatus::Success, PhaseStatus::Error],
            // Settled phases may be re-triggered by the operator or reset
            PhaseStatus::Success => vec![PhaseStatus::Running, PhaseStatus::Pending],
            PhaseStatus::Error => vec![PhaseStatus::Running, PhaseStatus::Pending],
        }
    }

    pub fn can_transition(from: &PhaseStatus, to: &PhaseStatus) -> bool {
        Self::validate_transition(from, to).is_ok()
    }

    pub fn outcome(exit_code: i32) -> PhaseStatus {
        if exit_code == 0 {
            PhaseStatus::Success
        } else {
            PhaseStatus::Error
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_transitions() {
        assert!(PhaseStateMachine::can_transition(
            &PhaseStatus::Pending,
            &PhaseStatus::Running
        ));
        assert!(PhaseStateMachine::can_transition(
            &PhaseStatus::Running,
            &PhaseStatus::Success
        ));
        assert!(PhaseStateMachine::can_transition(
            &PhaseStatus::Running,
            &PhaseStatus::Error
        ));
    }

    #[test]
    fn test_invalid_transitions() {
        assert!(!PhaseStateMachine::can_transition(
            &PhaseStatus::Pending,
            &PhaseStatus::Success
        ));
        assert!(!PhaseStateMachine::can_transition(
            &PhaseStatus::Running,
            &PhaseStatus::Running
        ));
        assert!(!PhaseStateMachine::can_transition(
            &PhaseStatus::Running,
            &PhaseStatus::Pending
        ));
    }

    #[test]
    fn test_retrigger_after_failure() {
        assert!(PhaseStateMachine::can_transition(
            &PhaseStatus::Error,
            &PhaseStatus::Running
        ));
    }

    #[test]
    fn test_outcome_from_exit_code() {
        assert_eq!(PhaseStateMachine::outcome(0), PhaseStatus::Success);
        assert_eq!(PhaseStateMachine::outcome(1), PhaseStatus::Error);
        assert_eq!(PhaseStateMachine::outcome(-1), PhaseStatus::Error);
        assert_eq!(PhaseStateMachine::outcome(127), PhaseStatus::Error);
    }
}
