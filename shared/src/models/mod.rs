pub mod message;
pub mod region;
pub mod resolution;
