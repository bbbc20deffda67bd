//! Domain types shared by the launcher crates.
//!
//! Phases, tool specifications, execution identities and the
//! `launcher.toml` configuration model live here. Nothing in this crate
//! performs IO beyond parsing configuration text.

pub mod config;
pub mod domain;
pub mod error;

pub use config::*;
pub use domain::*;
pub use error::CoreError;
