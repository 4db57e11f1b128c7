use serde::{Deserialize, Serialize};

use crate::env::{self, EnvError};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientConfig {
    pub address: String,
    pub port: u16,
}

impl ClientConfig {
    pub fn new(address: String, port: u16) -> Self {
        Self { address, port }
    }

    pub fn from_env() -> Result<Self, EnvError> {
        Ok(Self::new("localhost".to_string(), env::port()?))
    }

    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.address, self.port)
    }
}
