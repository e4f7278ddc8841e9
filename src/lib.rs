//! An IRC client engine.
//!
//! [`Engine`] connects to a server, registers, joins the configured channels
//! and dispatches every inbound message in order. Applications send commands
//! through a [`Client`] handle and observe the session through [`Hooks`].

pub mod app;
pub mod config;
pub mod error;
pub mod irc;
pub mod logging;

pub use app::{Client, Engine, EngineBuilder, Hooks, RunState, StopReason};
pub use config::Config;
pub use error::{EngineError, Result};
