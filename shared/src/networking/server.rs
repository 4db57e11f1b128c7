use serde::{Deserialize, Serialize};

use crate::env::{self, EnvError};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerConfig {
    pub address: String,
    pub port: u16,
    /// Maximum number of FrameBuffers kept at once.
    pub capacity: usize,
    /// Keep one FrameBuffer per frame number. When off, every frame of a
    /// version lands in the same FrameBuffer.
    pub multiframe: bool,
    /// Keep AOVs other than the default layer.
    pub enable_aovs: bool,
}

impl ServerConfig {
    pub fn new(address: String, port: u16, capacity: usize) -> Self {
        Self {
            address,
            port,
            capacity,
            multiframe: true,
            enable_aovs: true,
        }
    }

    /// Reads host, port and capacity from the environment, falling back to
    /// the protocol defaults.
    pub fn from_env() -> Result<Self, EnvError> {
        Ok(Self::new(env::host(), env::port()?, env::capacity()?))
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::new(
            env::DEFAULT_HOST.to_string(),
            env::DEFAULT_PORT,
            env::DEFAULT_CAPACITY,
        )
    }
}
