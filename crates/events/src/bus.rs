//! The shared event channel.
//!
//! Runners publish output chunks and completion records here; the
//! orchestrator, the SSE and websocket surfaces and the CLI console all
//! subscribe. There is no routing on the bus itself: listeners match on
//! `Event::execution_id` or `Event::topic`.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;

use crate::types::{Event, EventEnvelope};

/// Room for a burst of install output before slow listeners start lagging.
pub const DEFAULT_CAPACITY: usize = 4096;

#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<EventEnvelope>,
    published: Arc<AtomicUsize>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender,
            published: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Send to every current subscriber; returns how many there were.
    /// Records published while nobody listens are dropped.
    pub fn publish(&self, envelope: EventEnvelope) -> usize {
        self.published.fetch_add(1, Ordering::Relaxed);
        self.sender.send(envelope).unwrap_or(0)
    }

    pub fn emit(&self, event: Event) -> usize {
        self.publish(EventEnvelope::new(event))
    }

    /// Only records published after this call are delivered, so subscribe
    /// before dispatching anything whose completion you need.
    pub fn subscribe(&self) -> broadcast::Receiver<EventEnvelope> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }

    pub fn event_count(&self) -> usize {
        self.published.load(Ordering::Relaxed)
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("subscribers", &self.subscriber_count())
            .field("published", &self.event_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::OutputStream;
    use launcher_core::ExecutionId;
    use tokio::sync::broadcast::error::RecvError;

    fn completion(execution_id: ExecutionId, exit_code: i32) -> Event {
        Event::PhaseComplete {
            execution_id,
            label: "npm install".to_string(),
            exit_code,
        }
    }

    fn chunk(execution_id: ExecutionId, text: &str) -> Event {
        Event::Log {
            execution_id: Some(execution_id),
            stream: OutputStream::Stdout,
            chunk: text.to_string(),
        }
    }

    #[tokio::test]
    async fn test_output_precedes_completion_for_each_listener() {
        let bus = EventBus::new();
        let mut console = bus.subscribe();
        let mut orchestrator = bus.subscribe();
        let id = ExecutionId::new();

        assert_eq!(bus.emit(chunk(id, "added 120 packages")), 2);
        bus.emit(completion(id, 0));

        for rx in [&mut console, &mut orchestrator] {
            let first = rx.recv().await.unwrap();
            let second = rx.recv().await.unwrap();
            assert!(matches!(first.event, Event::Log { .. }));
            assert_eq!(second.event.completion_for(id), Some(0));
        }
    }

    #[tokio::test]
    async fn test_same_label_different_executions() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();
        let (a, b) = (ExecutionId::new(), ExecutionId::new());

        bus.emit(completion(a, 0));
        bus.emit(completion(b, 1));

        let first = rx.recv().await.unwrap();
        let second = rx.recv().await.unwrap();
        assert_eq!(first.event.completion_for(b), None);
        assert_eq!(second.event.completion_for(b), Some(1));
    }

    #[tokio::test]
    async fn test_late_subscriber_misses_earlier_records() {
        let bus = EventBus::new();
        let id = ExecutionId::new();
        bus.emit(completion(id, 0));

        let mut rx = bus.subscribe();
        assert!(matches!(rx.try_recv(), Err(broadcast::error::TryRecvError::Empty)));
        assert_eq!(bus.event_count(), 1);
    }

    #[tokio::test]
    async fn test_slow_listener_lags_and_recovers() {
        let bus = EventBus::with_capacity(2);
        let mut rx = bus.subscribe();
        let id = ExecutionId::new();

        for i in 0..4 {
            bus.emit(chunk(id, &format!("line {}", i)));
        }
        bus.emit(completion(id, 0));

        assert!(matches!(rx.recv().await, Err(RecvError::Lagged(_))));
        let mut code = None;
        while let Ok(envelope) = rx.try_recv() {
            code = code.or(envelope.event.completion_for(id));
        }
        assert_eq!(code, Some(0));
    }

    #[test]
    fn test_clones_share_subscribers() {
        let bus = EventBus::new();
        let runner_side = bus.clone();

        let rx = runner_side.subscribe();
        assert_eq!(bus.subscriber_count(), 1);
        assert_eq!(bus.emit(Event::system("nobody else")), 1);

        drop(rx);
        assert_eq!(bus.emit(Event::system("nobody listening")), 0);
    }
}
