//! Error types for the client engine.
//!
//! Codec and transport failures are fatal to a session and surface as
//! [`EngineError`]. [`HandlerError`] is produced by individual command and
//! numeric handlers and never leaves the dispatcher.

use std::time::Duration;
use thiserror::Error;

/// Failures of the line codec. A decode-side error means the byte stream can
/// no longer be read as IRC and the session must stop.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("line too long: {len} bytes (limit: {limit})")]
    LineTooLong { len: usize, limit: usize },

    #[error("line has no command: {0:?}")]
    MissingCommand(String),

    #[error("malformed line {line:?}: {reason}")]
    Malformed { line: String, reason: String },

    #[error("invalid command token {0:?}")]
    InvalidCommand(String),

    #[error("parameter {index} cannot be encoded: {param:?}")]
    InvalidParam { index: usize, param: String },
}

/// Transport-level failures.
#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("failed to connect to {host}:{port}: {source}")]
    Connect {
        host: String,
        port: u16,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid TLS server name: {0}")]
    InvalidServerName(String),

    #[error("TLS handshake with {host} failed: {source}")]
    Tls {
        host: String,
        #[source]
        source: std::io::Error,
    },

    #[error("send failed: {0}")]
    Send(#[source] std::io::Error),

    #[error("receive failed: {0}")]
    Receive(#[source] std::io::Error),
}

/// A malformed payload seen by a handler. Logged and skipped.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum HandlerError {
    #[error("missing parameter {index}")]
    MissingParam { index: usize },

    #[error("missing token {index} in {text:?}")]
    MissingToken { index: usize, text: String },

    #[error("not a number: {value:?}")]
    InvalidNumber { value: String },

    #[error("unknown channel {0}")]
    UnknownChannel(String),
}

/// Errors returned by the engine and the client handle.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Connection(#[from] ConnectionError),

    #[error("protocol desync: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("not connected")]
    NotConnected,

    #[error("timed out after {waited:?} waiting to join {channel}")]
    JoinTimeout { channel: String, waited: Duration },

    #[error("not joining {0}")]
    UnknownChannel(String),

    #[error("server rejected join to {channel}")]
    JoinRejected { channel: String },

    #[error("gave up after {attempts} session attempts")]
    RetriesExhausted { attempts: u32 },

    #[error("handler already registered for {0}")]
    DuplicateHandler(String),

    #[error("unknown extension {0:?}")]
    UnknownExtension(String),

    #[error("invalid configuration: {0}")]
    Config(String),
}

pub type Result<T, E = EngineError> = std::result::Result<T, E>;
