use std::sync::Arc;

use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{Query, State};
use axum::response::IntoResponse;

use websocket::{ConnectQuery, WsState};

use crate::state::AppState;

/// Upgrade to a websocket fed by the launcher event channel.
/// `?topics=` subscribes immediately; otherwise the client sends `subscribe`.
pub async fn websocket_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    query: Query<ConnectQuery>,
) -> impl IntoResponse {
    tracing::debug!(
        subscribers = state.event_bus.subscriber_count(),
        topics = query.topics.as_deref().unwrap_or("*"),
        "Websocket client connecting"
    );
    let ws_state = Arc::new(WsState::new(state.event_bus.clone()));
    websocket::ws_handler(ws, State(ws_state), query).await
}
