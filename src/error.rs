//! Error types for configuration, probing and scheduling

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Why a single probe attempt through a candidate failed.
///
/// These never leave the validation chain: every variant just means
/// "this tier did not work for this candidate".
#[derive(Error, Debug)]
pub enum ProbeError {
    #[error("invalid probe target: {0}")]
    InvalidTarget(String),

    #[error("connect failed: {0}")]
    Connect(#[source] io::Error),

    #[error("connect timed out")]
    ConnectTimeout,

    #[error("TLS handshake failed: {0}")]
    Handshake(#[source] io::Error),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("deadline expired")]
    DeadlineExpired,

    #[error("malformed response: {0}")]
    MalformedResponse(String),

    #[error("response truncated")]
    Truncated,
}

/// Fatal configuration problems, detected before any probing starts
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("no valid worker URLs configured (set WORKER_URLS or pass --worker-url)")]
    NoWorkerEndpoints,

    #[error("invalid {kind} endpoint URL: {url}")]
    InvalidEndpoint { kind: &'static str, url: String },

    #[error("concurrency must be at least 1")]
    InvalidConcurrency,

    #[error("timeout must be greater than zero")]
    InvalidTimeout,

    #[error("no valid proxy candidates in {}", path.display())]
    NoCandidates { path: PathBuf },

    #[error("failed to read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Failures of the scan as a whole
#[derive(Error, Debug)]
pub enum ScanError {
    #[error("admission semaphore closed")]
    SemaphoreClosed(#[from] tokio::sync::AcquireError),
}
