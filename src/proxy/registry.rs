//! Verification endpoints probed through each candidate

use crate::error::ConfigError;
use std::fmt;
use tracing::warn;
use url::Url;

/// Default trace service returning `key=value` lines
pub const DEFAULT_TRACE_URL: &str = "https://1.1.1.1/cdn-cgi/trace";

/// Default service echoing the caller's address as plain text
pub const DEFAULT_ECHO_URL: &str = "https://checkip.amazonaws.com";

/// Kind of verification service, which decides how its body is read
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndpointKind {
    /// JSON identity/geo record
    Worker,
    /// `key=value` trace lines
    Trace,
    /// Bare IP address
    IpEcho,
}

impl EndpointKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EndpointKind::Worker => "worker",
            EndpointKind::Trace => "trace",
            EndpointKind::IpEcho => "echo",
        }
    }
}

impl fmt::Display for EndpointKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerificationEndpoint {
    pub url: Url,
    pub kind: EndpointKind,
}

impl VerificationEndpoint {
    /// Parse an endpoint, accepting only http and https URLs with a host
    pub fn parse(raw: &str, kind: EndpointKind) -> Result<Self, ConfigError> {
        let invalid = || ConfigError::InvalidEndpoint {
            kind: kind.as_str(),
            url: raw.to_string(),
        };

        let url = Url::parse(raw.trim()).map_err(|_| invalid())?;
        if !matches!(url.scheme(), "http" | "https") || url.host_str().is_none() {
            return Err(invalid());
        }

        Ok(Self { url, kind })
    }

    /// Hostname presented as SNI and in the Host header
    pub fn host(&self) -> &str {
        self.url.host_str().unwrap_or_default()
    }
}

/// Immutable, ordered set of endpoints for one run
#[derive(Debug, Clone)]
pub struct VerificationRegistry {
    workers: Vec<VerificationEndpoint>,
    trace: VerificationEndpoint,
    echo: VerificationEndpoint,
}

impl VerificationRegistry {
    pub fn new(
        workers: Vec<VerificationEndpoint>,
        trace: VerificationEndpoint,
        echo: VerificationEndpoint,
    ) -> Self {
        Self {
            workers,
            trace,
            echo,
        }
    }

    /// Build a registry from raw URLs.
    ///
    /// Worker URLs that fail validation are skipped with a warning; a
    /// malformed trace or echo URL is an error.
    pub fn from_urls<S: AsRef<str>>(
        worker_urls: &[S],
        trace_url: &str,
        echo_url: &str,
    ) -> Result<Self, ConfigError> {
        let workers = worker_urls
            .iter()
            .map(|raw| raw.as_ref())
            .filter(|raw| !raw.trim().is_empty())
            .filter_map(|raw| match VerificationEndpoint::parse(raw, EndpointKind::Worker) {
                Ok(endpoint) => Some(endpoint),
                Err(e) => {
                    warn!("Skipping worker endpoint: {}", e);
                    None
                }
            })
            .collect();

        Ok(Self::new(
            workers,
            VerificationEndpoint::parse(trace_url, EndpointKind::Trace)?,
            VerificationEndpoint::parse(echo_url, EndpointKind::IpEcho)?,
        ))
    }

    pub fn workers(&self) -> &[VerificationEndpoint] {
        &self.workers
    }

    pub fn trace(&self) -> &VerificationEndpoint {
        &self.trace
    }

    pub fn echo(&self) -> &VerificationEndpoint {
        &self.echo
    }
}
