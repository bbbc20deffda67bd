use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::response::IntoResponse;
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::broadcast;
use tokio::time::interval;

use events::EventBus;

use crate::messages::{ClientMessage, ServerMessage, SubscriptionFilter};

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);
const CLIENT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Clone)]
pub struct WsState {
    pub event_bus: EventBus,
}

impl WsState {
    pub fn new(event_bus: EventBus) -> Self {
        Self { event_bus }
    }
}

/// `?topics=log,phase-status` subscribes the connection right away, so
/// console clients see output without sending a `subscribe` message.
#[derive(Debug, Default, Deserialize)]
pub struct ConnectQuery {
    pub topics: Option<String>,
}

impl ConnectQuery {
    fn initial_filter(&self) -> Option<SubscriptionFilter> {
        let topics: Vec<&str> = self
            .topics
            .as_deref()?
            .split(',')
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .collect();
        Some(SubscriptionFilter::for_topics(&topics))
    }
}

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<WsState>>,
    Query(query): Query<ConnectQuery>,
) -> impl IntoResponse {
    let initial = query.initial_filter();
    ws.on_upgrade(move |socket| handle_socket(socket, state, initial))
}

/// Serialize and send; `false` once the client is gone.
async fn send(sender: &mut SplitSink<WebSocket, Message>, msg: &ServerMessage) -> bool {
    let json = match serde_json::to_string(msg) {
        Ok(json) => json,
        Err(e) => {
            tracing::error!(error = %e, "Failed to serialize websocket message");
            return true;
        }
    };
    sender.send(Message::Text(json.into())).await.is_ok()
}

/// Per-connection subscription state.
struct Subscription {
    active: bool,
    filter: Option<SubscriptionFilter>,
}

impl Subscription {
    fn wants(&self, envelope: &events::EventEnvelope) -> bool {
        self.active && self.filter.as_ref().map_or(true, |f| f.matches(envelope))
    }

    fn apply(&mut self, message: ClientMessage) -> ServerMessage {
        match message {
            ClientMessage::Subscribe { filter } => {
                self.filter = filter.clone();
                self.active = true;
                ServerMessage::Subscribed { filter }
            }
            ClientMessage::Unsubscribe => {
                self.active = false;
                self.filter = None;
                ServerMessage::Unsubscribed
            }
            ClientMessage::Ping => ServerMessage::Pong,
        }
    }
}

async fn handle_socket(socket: WebSocket, state: Arc<WsState>, initial: Option<SubscriptionFilter>) {
    let (mut sender, mut receiver) = socket.split();

    let mut event_rx = state.event_bus.subscribe();
    let mut subscription = Subscription {
        active: initial.is_some(),
        filter: initial.clone(),
    };
    if initial.is_some() && !send(&mut sender, &ServerMessage::Subscribed { filter: initial }).await {
        return;
    }

    let mut heartbeat = interval(HEARTBEAT_INTERVAL);
    heartbeat.reset();

    loop {
        tokio::select! {
            _ = heartbeat.tick() => {
                if !send(&mut sender, &ServerMessage::Pong).await {
                    break;
                }
            }

            event_result = event_rx.recv() => {
                match event_result {
                    Ok(envelope) => {
                        if subscription.wants(&envelope)
                            && !send(&mut sender, &ServerMessage::Event { envelope }).await
                        {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        tracing::warn!("WebSocket client lagged, missed {} events", n);
                        let notice = ServerMessage::Error {
                            message: format!("{} events were dropped", n),
                        };
                        if subscription.active && !send(&mut sender, &notice).await {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        break;
                    }
                }
            }

            msg = tokio::time::timeout(CLIENT_TIMEOUT + HEARTBEAT_INTERVAL, receiver.next()) => {
                match msg {
                    Ok(Some(Ok(Message::Text(text)))) => {
                        let response = match serde_json::from_str::<ClientMessage>(&text) {
                            Ok(message) => subscription.apply(message),
                            Err(e) => ServerMessage::Error {
                                message: format!("Invalid message: {}", e),
                            },
                        };
                        if !send(&mut sender, &response).await {
                            break;
                        }
                    }
                    Ok(Some(Ok(Message::Ping(data)))) => {
                        if sender.send(Message::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Ok(Some(Ok(Message::Close(_)))) | Ok(Some(Err(_))) | Ok(None) => {
                        break;
                    }
                    Ok(Some(Ok(_))) => {}
                    Err(_) => {
                        tracing::debug!("WebSocket client idle, waiting for heartbeat");
                    }
                }
            }
        }
    }

    tracing::debug!("WebSocket connection closed");
}

#[cfg(test)]
mod tests {
    use super::*;
    use events::{Event, EventEnvelope};

    #[test]
    fn test_query_without_topics_does_not_subscribe() {
        assert!(ConnectQuery::default().initial_filter().is_none());
    }

    #[test]
    fn test_query_topics_become_filter() {
        let query = ConnectQuery {
            topics: Some("log, phase-status".to_string()),
        };
        let filter = query.initial_filter().unwrap();
        assert_eq!(
            filter.topics,
            Some(vec!["log".to_string(), "phase-status".to_string()])
        );
    }

    #[test]
    fn test_subscription_lifecycle() {
        let mut subscription = Subscription {
            active: false,
            filter: None,
        };
        let log = EventEnvelope::new(Event::system("> Executing: npm install"));
        assert!(!subscription.wants(&log));

        let reply = subscription.apply(ClientMessage::Subscribe {
            filter: Some(SubscriptionFilter::for_topics(&["phase-status"])),
        });
        assert!(matches!(reply, ServerMessage::Subscribed { .. }));
        assert!(!subscription.wants(&log));

        subscription.apply(ClientMessage::Subscribe { filter: None });
        assert!(subscription.wants(&log));

        assert!(matches!(
            subscription.apply(ClientMessage::Unsubscribe),
            ServerMessage::Unsubscribed
        ));
        assert!(!subscription.wants(&log));
    }

    #[tokio::test]
    async fn test_ws_state_creation() {
        let bus = EventBus::new();
        let state = WsState::new(bus);
        assert_eq!(state.event_bus.subscriber_count(), 0);
    }
}
