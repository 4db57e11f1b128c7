use std::io;

use thiserror::Error;

/// A single frame could not be turned into a [`Message`](crate::models::message::Message).
///
/// Every variant is local to one frame: the framing layer has already
/// consumed the frame's bytes, so the stream stays in sync.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("unknown message kind {0}")]
    UnknownKind(i32),

    #[error("payload carries {actual} samples, header declares {expected}")]
    PayloadMismatch { expected: i64, actual: usize },

    #[error("message truncated: needed {needed} more bytes, {available} available")]
    Truncated { needed: usize, available: usize },

    #[error("{0} trailing bytes after message")]
    TrailingBytes(usize),

    #[error("aov name is not valid UTF-8")]
    InvalidAovName,
}

#[derive(Debug, Error)]
pub enum NetworkingError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The peer went away, cleanly or not.
    #[error("connection lost")]
    ConnectionLost,

    /// The frame cannot even be skipped safely, so the stream is lost.
    #[error("frame too large: {field} declares {declared}, limit is {limit}")]
    FrameTooLarge {
        field: &'static str,
        declared: u32,
        limit: u32,
    },

    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}

impl NetworkingError {
    /// Whether the connection can keep reading after this error.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, NetworkingError::Protocol(_))
    }
}
