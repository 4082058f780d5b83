//! Scan configuration

use crate::error::ConfigError;
use crate::proxy::progress::DEFAULT_PROGRESS_INTERVAL;
use crate::proxy::registry::{DEFAULT_ECHO_URL, DEFAULT_TRACE_URL};
use crate::proxy::report::DEFAULT_PRIORITY_COUNTRIES;
use crate::proxy::scheduler::DEFAULT_CONCURRENCY;
use crate::proxy::tunnel::DEFAULT_PROBE_TIMEOUT;
use std::collections::HashMap;
use std::fs;
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable holding comma-separated worker URLs
pub const WORKER_URLS_VAR: &str = "WORKER_URLS";

/// Default candidate list
pub const DEFAULT_INPUT_FILE: &str = "Data/IPPROXY23K.txt";

/// Default alphabetical report
pub const DEFAULT_ALIVE_FILE: &str = "Data/alive.txt";

/// Default priority report
pub const DEFAULT_PRIORITY_FILE: &str = "Data/Country-ALIVE.txt";

/// Configuration for one scan
#[derive(Debug, Clone)]
pub struct ScanConfig {
    /// Worker verification URLs, in fallback order
    pub worker_urls: Vec<String>,
    pub trace_url: String,
    pub echo_url: String,
    /// Maximum candidates validated at once
    pub concurrency: usize,
    /// Budget for connect and for each TLS exchange
    pub timeout: Duration,
    pub progress_interval: Duration,
    /// Countries ranked first in the priority report
    pub priority_countries: Vec<String>,
    pub input: PathBuf,
    pub alive_output: PathBuf,
    pub priority_output: PathBuf,
    /// Known public address of this host; discovered when `None`
    pub reference_ip: Option<IpAddr>,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            worker_urls: Vec::new(),
            trace_url: DEFAULT_TRACE_URL.to_string(),
            echo_url: DEFAULT_ECHO_URL.to_string(),
            concurrency: DEFAULT_CONCURRENCY,
            timeout: DEFAULT_PROBE_TIMEOUT,
            progress_interval: DEFAULT_PROGRESS_INTERVAL,
            priority_countries: DEFAULT_PRIORITY_COUNTRIES
                .iter()
                .map(|c| c.to_string())
                .collect(),
            input: PathBuf::from(DEFAULT_INPUT_FILE),
            alive_output: PathBuf::from(DEFAULT_ALIVE_FILE),
            priority_output: PathBuf::from(DEFAULT_PRIORITY_FILE),
            reference_ip: None,
        }
    }
}

impl ScanConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_worker_urls(mut self, urls: Vec<String>) -> Self {
        self.worker_urls = urls;
        self
    }

    pub fn with_trace_url(mut self, url: impl Into<String>) -> Self {
        self.trace_url = url.into();
        self
    }

    pub fn with_echo_url(mut self, url: impl Into<String>) -> Self {
        self.echo_url = url.into();
        self
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_progress_interval(mut self, interval: Duration) -> Self {
        self.progress_interval = interval;
        self
    }

    pub fn with_priority_countries(mut self, countries: Vec<String>) -> Self {
        self.priority_countries = countries;
        self
    }

    pub fn with_input(mut self, input: impl Into<PathBuf>) -> Self {
        self.input = input.into();
        self
    }

    pub fn with_outputs(mut self, alive: impl Into<PathBuf>, priority: impl Into<PathBuf>) -> Self {
        self.alive_output = alive.into();
        self.priority_output = priority.into();
        self
    }

    pub fn with_reference_ip(mut self, reference_ip: Option<IpAddr>) -> Self {
        self.reference_ip = reference_ip;
        self
    }

    /// Check the settings that would make a scan meaningless
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.concurrency == 0 {
            return Err(ConfigError::InvalidConcurrency);
        }
        if self.timeout.is_zero() {
            return Err(ConfigError::InvalidTimeout);
        }
        if self.worker_urls.iter().all(|url| url.trim().is_empty()) {
            return Err(ConfigError::NoWorkerEndpoints);
        }
        Ok(())
    }
}

/// Split a comma-separated URL list, dropping empty entries
pub fn split_urls(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|url| !url.is_empty())
        .map(str::to_string)
        .collect()
}

/// Read `KEY=value` pairs from a dotenv-style file.
///
/// A missing file yields an empty map. Blank lines and `#` comments are
/// skipped; surrounding quotes are stripped from values.
pub fn read_dotenv<P: AsRef<Path>>(path: P) -> HashMap<String, String> {
    let Ok(content) = fs::read_to_string(path) else {
        return HashMap::new();
    };

    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .filter_map(|line| line.split_once('='))
        .map(|(key, value)| {
            let key = key.trim().trim_start_matches("export ").trim();
            let value = value.trim().trim_matches(|c| c == '"' || c == '\'');
            (key.to_string(), value.to_string())
        })
        .filter(|(key, _)| !key.is_empty())
        .collect()
}

/// Worker URLs from the `.env` file, used when neither flags nor the
/// process environment supplied any
pub fn dotenv_worker_urls<P: AsRef<Path>>(path: P) -> Vec<String> {
    read_dotenv(path)
        .get(WORKER_URLS_VAR)
        .map(|raw| split_urls(raw))
        .unwrap_or_default()
}
