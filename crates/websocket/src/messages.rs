use serde::{Deserialize, Serialize};

use events::EventEnvelope;
use launcher_core::ExecutionId;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    Subscribe { filter: Option<SubscriptionFilter> },
    Unsubscribe,
    Ping,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    Event { envelope: EventEnvelope },
    Subscribed { filter: Option<SubscriptionFilter> },
    Unsubscribed,
    Pong,
    Error { message: String },
}

/// Client-side narrowing of the event stream.
///
/// `topics` matches `Event::topic`. `execution_ids` only narrows records
/// that belong to an execution; launcher narration and pipeline progress
/// always pass.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SubscriptionFilter {
    pub topics: Option<Vec<String>>,
    pub execution_ids: Option<Vec<ExecutionId>>,
}

impl SubscriptionFilter {
    pub fn for_topics(topics: &[&str]) -> Self {
        Self {
            topics: Some(topics.iter().map(|t| t.to_string()).collect()),
            execution_ids: None,
        }
    }

    pub fn for_execution(execution_id: ExecutionId) -> Self {
        Self {
            topics: None,
            execution_ids: Some(vec![execution_id]),
        }
    }

    pub fn matches(&self, envelope: &EventEnvelope) -> bool {
        let topic_ok = match &self.topics {
            Some(topics) => topics.iter().any(|t| t == envelope.event.topic()),
            None => true,
        };

        let execution_ok = match (&self.execution_ids, envelope.event.execution_id()) {
            (Some(ids), Some(id)) => ids.contains(&id),
            _ => true,
        };

        topic_ok && execution_ok
    }
}
