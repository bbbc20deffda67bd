//! Event types for the launcher event channel

use chrono::{DateTime, Utc};
use launcher_core::{ExecutionId, PhaseId, PhaseStatus, ToolCheck};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

/// Envelope wrapping all events with metadata
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct EventEnvelope {
    /// Unique event ID
    pub id: Uuid,
    /// When the event occurred
    pub timestamp: DateTime<Utc>,
    /// The actual event
    pub event: Event,
}

impl EventEnvelope {
    /// Create a new event envelope with auto-generated ID and timestamp
    pub fn new(event: Event) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            event,
        }
    }
}

/// Which stream an output chunk came from
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum OutputStream {
    Stdout,
    Stderr,
    /// Narration written by the launcher itself
    System,
}

/// All possible events in the system
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(tag = "type")]
pub enum Event {
    // Process records
    /// A chunk of process output, or launcher narration when `execution_id` is absent
    #[serde(rename = "log")]
    Log {
        execution_id: Option<ExecutionId>,
        stream: OutputStream,
        chunk: String,
    },

    /// A dispatched execution terminated. Published once, after all of its output
    #[serde(rename = "phase-complete")]
    PhaseComplete {
        execution_id: ExecutionId,
        label: String,
        exit_code: i32,
    },

    // Orchestration progress
    #[serde(rename = "phase-status")]
    PhaseStatusChanged {
        phase_id: PhaseId,
        from_status: PhaseStatus,
        to_status: PhaseStatus,
    },

    #[serde(rename = "pipeline-started")]
    PipelineStarted { phase_count: usize, ai_assisted: bool },

    #[serde(rename = "pipeline-finished")]
    PipelineFinished {
        success: bool,
        failed_phase: Option<PhaseId>,
    },

    /// Result of a tool verification pass
    #[serde(rename = "dependency-check")]
    DependencyCheck { checks: Vec<ToolCheck> },

    /// Remediation text from the advisor; never executed automatically
    #[serde(rename = "advice")]
    Advice {
        phase_id: Option<PhaseId>,
        analysis: String,
        suggested_command: Option<String>,
    },

    #[serde(rename = "lifecycle-finished")]
    LifecycleFinished { flow: String, success: bool },

    // System events
    /// Generic error event
    #[serde(rename = "error")]
    Error {
        message: String,
        context: Option<String>,
    },
}

impl Event {
    /// Launcher narration line, not attributed to any execution
    pub fn system(chunk: impl Into<String>) -> Self {
        Event::Log {
            execution_id: None,
            stream: OutputStream::System,
            chunk: chunk.into(),
        }
    }

    /// Topic name used by the SSE and websocket surfaces
    pub fn topic(&self) -> &'static str {
        match self {
            Event::Log { .. } => "log",
            Event::PhaseComplete { .. } => "phase-complete",
            Event::PhaseStatusChanged { .. } => "phase-status",
            Event::PipelineStarted { .. } => "pipeline-started",
            Event::PipelineFinished { .. } => "pipeline-finished",
            Event::DependencyCheck { .. } => "dependency-check",
            Event::Advice { .. } => "advice",
            Event::LifecycleFinished { .. } => "lifecycle-finished",
            Event::Error { .. } => "error",
        }
    }

    /// Get the execution this record belongs to, if any
    pub fn execution_id(&self) -> Option<ExecutionId> {
        match self {
            Event::Log { execution_id, .. } => *execution_id,
            Event::PhaseComplete { execution_id, .. } => Some(*execution_id),
            _ => None,
        }
    }

    /// Exit code if this is the completion record for `id`
    pub fn completion_for(&self, id: ExecutionId) -> Option<i32> {
        match self {
            Event::PhaseComplete {
                execution_id,
                exit_code,
                ..
            } if *execution_id == id => Some(*exit_code),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_envelope_creation() {
        let envelope = EventEnvelope::new(Event::system("hello"));

        assert!(!envelope.id.is_nil());
        assert!(envelope.timestamp <= Utc::now());
    }

    #[test]
    fn test_event_serialization() {
        let event = Event::PhaseComplete {
            execution_id: ExecutionId::new(),
            label: "npm run build".to_string(),
            exit_code: 1,
        };

        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"type\":\"phase-complete\""));
        assert!(json.contains("\"exit_code\":1"));
        assert!(json.contains("execution_id"));
    }

    #[test]
    fn test_event_deserialization() {
        let json = r#"{"type":"log","execution_id":"550e8400-e29b-41d4-a716-446655440000","stream":"stderr","chunk":"warn"}"#;
        let event: Event = serde_json::from_str(json).unwrap();

        match event {
            Event::Log {
                execution_id,
                stream,
                chunk,
            } => {
                assert!(execution_id.is_some());
                assert_eq!(stream, OutputStream::Stderr);
                assert_eq!(chunk, "warn");
            }
            _ => panic!("Wrong event type"),
        }
    }

    #[test]
    fn test_completion_matches_only_its_execution() {
        let first = ExecutionId::new();
        let second = ExecutionId::new();

        let event = Event::PhaseComplete {
            execution_id: first,
            label: "npm install".to_string(),
            exit_code: 0,
        };

        assert_eq!(event.completion_for(first), Some(0));
        assert_eq!(event.completion_for(second), None);
        assert_eq!(Event::system("x").completion_for(first), None);
    }

    #[test]
    fn test_event_execution_id() {
        let id = ExecutionId::new();
        let log = Event::Log {
            execution_id: Some(id),
            stream: OutputStream::Stdout,
            chunk: "ok".to_string(),
        };
        assert_eq!(log.execution_id(), Some(id));
        assert_eq!(log.topic(), "log");

        let finished = Event::PipelineFinished {
            success: true,
            failed_phase: None,
        };
        assert_eq!(finished.execution_id(), None);
        assert_eq!(finished.topic(), "pipeline-finished");
    }
}
