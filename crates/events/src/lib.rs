//! Event channel for the launcher
//!
//! This crate provides the broadcast bus and the record types that carry
//! process output, completion notices and orchestration progress to every
//! listener.

mod bus;
mod types;

pub use bus::EventBus;
pub use types::*;
