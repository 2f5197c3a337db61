//! Shared types for the Tavolo push service crates.

pub mod config;
pub mod error;

pub use config::{ServiceConfig, VapidConfig};
pub use error::PushError;
