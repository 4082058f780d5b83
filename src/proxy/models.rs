//! Proxy data models

use std::fmt;
use std::net::IpAddr;

/// A relay candidate read from the input list
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyCandidate {
    pub ip: IpAddr,
    pub port: String,
    /// Country reported by the list, used when a verifier omits it
    pub country_hint: String,
    /// Organization reported by the list, used when a verifier omits it
    pub org_hint: String,
}

impl ProxyCandidate {
    pub fn new(ip: IpAddr, port: impl Into<String>, country_hint: impl Into<String>, org_hint: impl Into<String>) -> Self {
        Self {
            ip,
            port: port.into(),
            country_hint: country_hint.into(),
            org_hint: org_hint.into(),
        }
    }

    /// Get the candidate as a normalized `ip,port,country,org` line
    pub fn to_line(&self) -> String {
        format!("{},{},{},{}", self.ip, self.port, self.country_hint, self.org_hint)
    }

    /// Get the candidate in IP:PORT format
    pub fn address(&self) -> String {
        match self.ip {
            IpAddr::V4(ip) => format!("{}:{}", ip, self.port),
            IpAddr::V6(ip) => format!("[{}]:{}", ip, self.port),
        }
    }
}

impl fmt::Display for ProxyCandidate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.address())
    }
}

/// Which verification tier accepted a proxy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProxySource {
    /// Worker endpoint, 1-based position in the registry
    Worker(usize),
    Trace,
    IpEcho,
}

impl fmt::Display for ProxySource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProxySource::Worker(n) => write!(f, "Worker-{}", n),
            ProxySource::Trace => write!(f, "Trace"),
            ProxySource::IpEcho => write!(f, "Echo"),
        }
    }
}

/// A candidate that tunnelled a request to a verifier successfully
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedProxy {
    pub ip: IpAddr,
    pub port: String,
    /// Two-letter, upper-case country code
    pub country: String,
    pub org: String,
    pub city: Option<String>,
    pub source: ProxySource,
}

impl ValidatedProxy {
    /// Get the `ip,port,country,org` line written to reports
    pub fn to_report_line(&self) -> String {
        format!("{},{},{},{}", self.ip, self.port, self.country, self.org)
    }

    /// Country plus city when the verifier reported one
    pub fn location(&self) -> String {
        match &self.city {
            Some(city) if !city.is_empty() => format!("{}-{}", self.country, city),
            _ => self.country.clone(),
        }
    }
}

impl fmt::Display for ValidatedProxy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{} | {} | {} | {}",
            self.ip,
            self.port,
            self.location(),
            self.org,
            self.source
        )
    }
}

/// Status code and body of one probe through a candidate
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeResponse {
    pub status: u16,
    pub body: Vec<u8>,
}

impl ProbeResponse {
    pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.status == 200
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// Final verdict for one candidate
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationOutcome {
    pub candidate: ProxyCandidate,
    pub proxy: Option<ValidatedProxy>,
}

impl ValidationOutcome {
    pub fn valid(candidate: ProxyCandidate, proxy: ValidatedProxy) -> Self {
        Self {
            candidate,
            proxy: Some(proxy),
        }
    }

    pub fn invalid(candidate: ProxyCandidate) -> Self {
        Self {
            candidate,
            proxy: None,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.proxy.is_some()
    }
}
