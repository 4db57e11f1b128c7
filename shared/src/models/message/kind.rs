use std::fmt;

use serde::{Deserialize, Serialize};

use crate::networking::error::ProtocolError;

/// The protocol event a [`Message`](super::Message) describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MessageKind {
    /// Image open: the header describes the full image.
    Open,
    /// A tile of pixel samples.
    Pixels,
    /// Image close.
    Close,
}

impl MessageKind {
    /// Wire value of the kind.
    pub fn code(self) -> i32 {
        match self {
            MessageKind::Open => 0,
            MessageKind::Pixels => 1,
            MessageKind::Close => 2,
        }
    }
}

impl TryFrom<i32> for MessageKind {
    type Error = ProtocolError;

    fn try_from(code: i32) -> Result<Self, Self::Error> {
        match code {
            0 => Ok(MessageKind::Open),
            1 => Ok(MessageKind::Pixels),
            2 => Ok(MessageKind::Close),
            other => Err(ProtocolError::UnknownKind(other)),
        }
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MessageKind::Open => "open",
            MessageKind::Pixels => "pixels",
            MessageKind::Close => "close",
        };
        f.write_str(name)
    }
}
