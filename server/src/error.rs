use std::io;

use shared::env::EnvError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: io::Error,
    },

    #[error(transparent)]
    Config(#[from] EnvError),

    #[error("server is already listening")]
    AlreadyRunning,
}

/// Why a decoded message could not be applied. The message is dropped, the
/// connection keeps going.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RouteError {
    #[error("out of range geometry: {0}")]
    OutOfRangeGeometry(String),

    #[error("aov {aov:?} has {expected} samples per pixel, message carries {actual}")]
    ChannelMismatch {
        aov: String,
        expected: usize,
        actual: i32,
    },
}
