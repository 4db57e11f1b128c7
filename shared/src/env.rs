//! Process environment: `.env` loading and the variables the host passes in.

use std::env;

use log::debug;
use thiserror::Error;

pub const HOST_VAR: &str = "TILECAST_HOST";
pub const PORT_VAR: &str = "TILECAST_PORT";
pub const CAPACITY_VAR: &str = "TILECAST_CAPACITY";

pub const DEFAULT_HOST: &str = "0.0.0.0";
pub const DEFAULT_PORT: u16 = 9201;
pub const DEFAULT_CAPACITY: usize = 20;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum EnvError {
    #[error("port {0} is outside 0-65535")]
    InvalidPort(i64),

    #[error("{var}={value:?} is not a valid number")]
    InvalidValue { var: &'static str, value: String },
}

/// Loads `.env` if there is one.
pub fn init() {
    match dotenv::dotenv() {
        Ok(path) => debug!("Loaded environment from {}", path.display()),
        Err(e) => debug!("No .env loaded: {}", e),
    }
}

pub fn host() -> String {
    env::var(HOST_VAR).unwrap_or_else(|_| DEFAULT_HOST.to_string())
}

pub fn port() -> Result<u16, EnvError> {
    match env::var(PORT_VAR) {
        Ok(value) => parse_port(&value),
        Err(_) => Ok(DEFAULT_PORT),
    }
}

pub fn capacity() -> Result<usize, EnvError> {
    match env::var(CAPACITY_VAR) {
        Ok(value) => value.trim().parse().map_err(|_| EnvError::InvalidValue {
            var: CAPACITY_VAR,
            value,
        }),
        Err(_) => Ok(DEFAULT_CAPACITY),
    }
}

pub fn parse_port(value: &str) -> Result<u16, EnvError> {
    let port: i64 = value.trim().parse().map_err(|_| EnvError::InvalidValue {
        var: PORT_VAR,
        value: value.to_string(),
    })?;
    u16::try_from(port).map_err(|_| EnvError::InvalidPort(port))
}
