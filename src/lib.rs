//! Proxy Sieve - concurrent relay validator
//!
//! Validates large lists of candidate relays by tunnelling TLS requests
//! through each one to independent verification services, then writes
//! ranked reports of the candidates that work.

pub mod config;
pub mod error;
pub mod proxy;
pub mod tui;

pub use config::ScanConfig;
pub use error::{ConfigError, ProbeError, ScanError};
pub use proxy::*;

/// Application result type
pub type Result<T> = anyhow::Result<T>;
