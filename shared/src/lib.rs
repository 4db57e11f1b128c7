#![forbid(unsafe_code)]

pub mod env;
pub mod logger;
pub mod models;
pub mod networking;
