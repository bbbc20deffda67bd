use std::collections::{HashSet, VecDeque};
use std::convert::Infallible;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use axum::extract::{Query, State};
use axum::response::sse::{Event, KeepAlive, Sse};
use events::{EventBus, EventEnvelope};
use futures::stream::{Stream, StreamExt};
use serde::Deserialize;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::BroadcastStream;
use utoipa::IntoParams;
use uuid::Uuid;
use websocket::SubscriptionFilter;

use crate::state::AppState;

pub const DEFAULT_EVENT_BUFFER_SIZE: usize = 1000;
pub const SSE_KEEP_ALIVE_INTERVAL: Duration = Duration::from_secs(15);

#[derive(Debug, Deserialize, IntoParams)]
pub struct EventsQuery {
    /// Comma-separated topics, e.g. `log,phase-status`
    pub topics: Option<String>,
    /// Comma-separated execution ids
    pub execution_ids: Option<String>,
}

impl EventsQuery {
    fn filter(&self) -> SubscriptionFilter {
        SubscriptionFilter {
            topics: self.topics.as_deref().map(|s| {
                s.split(',')
                    .map(str::trim)
                    .filter(|t| !t.is_empty())
                    .map(String::from)
                    .collect()
            }),
            execution_ids: self.execution_ids.as_deref().map(|s| {
                s.split(',')
                    .filter_map(|id| id.trim().parse::<Uuid>().ok())
                    .map(Into::into)
                    .collect()
            }),
        }
    }
}

/// Recent envelopes kept for `Last-Event-ID` replay.
pub struct EventBuffer {
    events: VecDeque<EventEnvelope>,
    max_size: usize,
}

impl EventBuffer {
    pub fn new(max_size: usize) -> Self {
        Self {
            events: VecDeque::with_capacity(max_size),
            max_size,
        }
    }

    pub fn push(&mut self, envelope: EventEnvelope) {
        if self.events.len() >= self.max_size {
            self.events.pop_front();
        }
        self.events.push_back(envelope);
    }

    /// Envelopes published after `event_id`. Empty when the id has aged out.
    pub fn events_after(&self, event_id: Uuid) -> Vec<EventEnvelope> {
        match self.events.iter().position(|e| e.id == event_id) {
            Some(index) => self.events.iter().skip(index + 1).cloned().collect(),
            None => Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

pub type SharedEventBuffer = Arc<RwLock<EventBuffer>>;

/// Copy every envelope on the bus into `buffer` until the bus closes.
pub fn spawn_event_recorder(bus: &EventBus, buffer: SharedEventBuffer) -> JoinHandle<()> {
    let mut rx = bus.subscribe();
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(envelope) => buffer
                    .write()
                    .unwrap_or_else(|poisoned| poisoned.into_inner())
                    .push(envelope),
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    tracing::warn!("Event recorder lagged, missed {} events", n);
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    })
}

/// Live delivery rule: matches the filter and was not already replayed.
/// The bus subscription is taken before the buffer is read, so records
/// published in between can reach both.
fn should_deliver(envelope: &EventEnvelope, filter: &SubscriptionFilter, replayed: &HashSet<Uuid>) -> bool {
    filter.matches(envelope) && !replayed.contains(&envelope.id)
}

fn envelope_to_sse_event(envelope: &EventEnvelope) -> Result<Event, Infallible> {
    let data = serde_json::to_string(&envelope).unwrap_or_else(|_| "{}".to_string());

    Ok(Event::default()
        .id(envelope.id.to_string())
        .event(envelope.event.topic())
        .data(data))
}

#[utoipa::path(
    get,
    path = "/api/events",
    params(EventsQuery),
    responses(
        (status = 200, description = "SSE stream of the event channel"),
    ),
    tag = "events"
)]
pub async fn events_stream(
    State(state): State<AppState>,
    Query(query): Query<EventsQuery>,
    headers: axum::http::HeaderMap,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let filter = query.filter();
    let last_event_id = headers
        .get("Last-Event-ID")
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.parse::<Uuid>().ok());

    let rx = state.event_bus.subscribe();

    let missed_events = match last_event_id {
        Some(event_id) => state
            .event_buffer
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .events_after(event_id),
        None => vec![],
    };

    let missed_events: Vec<EventEnvelope> =
        missed_events.into_iter().filter(|e| filter.matches(e)).collect();
    let replayed: Arc<HashSet<Uuid>> = Arc::new(missed_events.iter().map(|e| e.id).collect());
    let missed_stream =
        futures::stream::iter(missed_events.into_iter().map(|e| envelope_to_sse_event(&e)));

    let live_stream = BroadcastStream::new(rx).filter_map(move |result| {
        let filter = filter.clone();
        let replayed = replayed.clone();
        async move {
            match result {
                Ok(envelope) if should_deliver(&envelope, &filter, &replayed) => {
                    Some(envelope_to_sse_event(&envelope))
                }
                Ok(_) => None,
                Err(e) => {
                    tracing::warn!("SSE broadcast error: {:?}", e);
                    None
                }
            }
        }
    });

    Sse::new(missed_stream.chain(live_stream)).keep_alive(
        KeepAlive::new()
            .interval(SSE_KEEP_ALIVE_INTERVAL)
            .text("keep-alive"),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use events::Event as LauncherEvent;

    fn envelope(chunk: &str) -> EventEnvelope {
        EventEnvelope::new(LauncherEvent::system(chunk))
    }

    #[test]
    fn test_event_buffer_drops_oldest() {
        let mut buffer = EventBuffer::new(2);
        buffer.push(envelope("a"));
        buffer.push(envelope("b"));
        buffer.push(envelope("c"));
        assert_eq!(buffer.len(), 2);
    }

    #[test]
    fn test_events_after_returns_later_events() {
        let mut buffer = EventBuffer::new(10);
        let first = envelope("first");
        let first_id = first.id;
        buffer.push(first);
        buffer.push(envelope("second"));
        buffer.push(envelope("third"));

        let after = buffer.events_after(first_id);
        assert_eq!(after.len(), 2);
    }

    #[test]
    fn test_events_after_unknown_id_is_empty() {
        let mut buffer = EventBuffer::new(10);
        buffer.push(envelope("only"));
        assert!(buffer.events_after(Uuid::new_v4()).is_empty());
    }

    #[test]
    fn test_query_filter_parses_lists() {
        let id = Uuid::new_v4();
        let query = EventsQuery {
            topics: Some("log, phase-status,".to_string()),
            execution_ids: Some(format!("{},not-a-uuid", id)),
        };
        let filter = query.filter();
        assert_eq!(
            filter.topics,
            Some(vec!["log".to_string(), "phase-status".to_string()])
        );
        assert_eq!(filter.execution_ids.map(|ids| ids.len()), Some(1));
    }

    #[test]
    fn test_replayed_envelope_not_delivered_live() {
        let replayed_envelope = envelope("> Executing: npm install");
        let fresh = envelope("added 120 packages");
        let replayed: HashSet<Uuid> = [replayed_envelope.id].into_iter().collect();
        let everything = SubscriptionFilter::default();

        assert!(!should_deliver(&replayed_envelope, &everything, &replayed));
        assert!(should_deliver(&fresh, &everything, &replayed));
        assert!(!should_deliver(
            &fresh,
            &SubscriptionFilter::for_topics(&["phase-status"]),
            &replayed
        ));
    }

    #[tokio::test]
    async fn test_recorder_buffers_published_events() {
        let bus = EventBus::new();
        let buffer = Arc::new(RwLock::new(EventBuffer::new(10)));
        let _recorder = spawn_event_recorder(&bus, buffer.clone());

        bus.emit(LauncherEvent::system("> Executing: npm install"));

        for _ in 0..50 {
            if !buffer.read().unwrap().is_empty() {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert_eq!(buffer.read().unwrap().len(), 1);
    }
}
