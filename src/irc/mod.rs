//! IRC protocol layer: message codec, transport, and command builders.

pub mod codec;
pub mod commands;
pub mod connection;
pub mod message;
pub mod numeric;

pub use codec::{Decoder, Encoder};
pub use connection::{Connection, ConnectionReader, ConnectionWriter, Incoming};
pub use message::Message;
