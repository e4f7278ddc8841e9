//! Stateful line codec.
//!
//! [`Encoder`] and [`Decoder`] are the two halves of the codec. They do no
//! I/O: the encoder queues serialized lines until the caller reports how many
//! bytes the socket accepted, and the decoder buffers raw input until a line
//! terminator shows up. The halves are separate so the send path and the
//! receive path can each own one behind their own serialization point.

use crate::error::ProtocolError;
use crate::irc::message::Message;
use tracing::trace;

/// Upper bound for a buffered line: 8191 bytes of tags plus a 512 byte body.
pub const MAX_LINE_LEN: usize = 8191 + 512;

/// Outgoing half: serializes messages and tracks partial writes.
#[derive(Debug, Default)]
pub struct Encoder {
    buffer: Vec<u8>,
}

impl Encoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Serialize `msg` and append it to the pending bytes.
    pub fn push(&mut self, msg: &Message) -> Result<(), ProtocolError> {
        msg.validate()?;
        self.buffer.extend_from_slice(msg.to_string().as_bytes());
        self.buffer.extend_from_slice(b"\r\n");
        Ok(())
    }

    /// Bytes still waiting to be written. Empty when everything was sent.
    pub fn pending_bytes(&self) -> &[u8] {
        &self.buffer
    }

    /// Acknowledge that the first `n` pending bytes reached the socket.
    pub fn consume_sent(&mut self, n: usize) {
        let n = n.min(self.buffer.len());
        self.buffer.drain(..n);
    }
}

/// Incoming half: splits a byte stream into messages.
#[derive(Debug, Default)]
pub struct Decoder {
    buffer: Vec<u8>,
    /// Index of the next byte to check for a terminator.
    next_index: usize,
}

impl Decoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed raw bytes, returning every message completed by them in arrival
    /// order. A trailing partial line is kept for the next call. An error
    /// means the stream can no longer be parsed.
    pub fn decode(&mut self, raw: &[u8]) -> Result<Vec<Message>, ProtocolError> {
        self.buffer.extend_from_slice(raw);

        let mut messages = Vec::new();
        let mut start = 0;
        while let Some(offset) = self.buffer[self.next_index..].iter().position(|b| *b == b'\n') {
            let end = self.next_index + offset;
            let line = &self.buffer[start..end];
            self.next_index = end + 1;

            if line.len() > MAX_LINE_LEN {
                return Err(ProtocolError::LineTooLong {
                    len: line.len(),
                    limit: MAX_LINE_LEN,
                });
            }

            let text = String::from_utf8_lossy(line);
            let text = text.trim_end_matches('\r');
            start = self.next_index;
            if text.trim().is_empty() {
                continue;
            }
            trace!("Decoding line: {}", text);
            messages.push(Message::parse(text)?);
        }

        self.buffer.drain(..start);
        self.next_index = self.buffer.len();

        if self.buffer.len() > MAX_LINE_LEN {
            return Err(ProtocolError::LineTooLong {
                len: self.buffer.len(),
                limit: MAX_LINE_LEN,
            });
        }
        Ok(messages)
    }

    /// Bytes of an incomplete line held back from the last call.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }
}
