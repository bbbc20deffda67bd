mod health;
pub mod lifecycle;
pub mod mcp;
pub mod pipeline;
pub mod sse;
pub mod system;
pub mod troubleshoot;
mod ws;

pub use health::*;
pub use ws::*;
