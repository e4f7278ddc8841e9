//! Client engine: session state, protocol handlers, dispatch, and the runloop.

pub mod channels;
pub mod client;
pub mod dispatch;
pub mod engine;
pub mod handler;
pub mod hooks;
pub mod replies;
pub mod state;

pub use channels::{Channel, ChannelRegistry, JoinState};
pub use client::Client;
pub use dispatch::{Context, Dispatcher, Handler};
pub use engine::{Engine, EngineBuilder, StopReason};
pub use hooks::{Event, Hooks, NoHooks};
pub use state::{ChannelMessage, MessageKind, RunState, ServerInfo, SessionState};
