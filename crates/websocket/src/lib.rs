//! Websocket fan-out of the launcher event channel.

mod handler;
mod messages;

pub use handler::{ws_handler, ConnectQuery, WsState};
pub use messages::{ClientMessage, ServerMessage, SubscriptionFilter};
