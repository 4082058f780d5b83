//! Normalization of verifier responses and the address validity rule

use regex::Regex;
use std::net::{IpAddr, Ipv6Addr};

/// Pattern of characters dropped from organization names
const ORG_STRIP_PATTERN: &str = r"[^a-zA-Z0-9\s]";

/// Upper-case and truncate a country value to at most two characters.
///
/// Services that answer with a region name instead of an ISO code get
/// chopped to its first two letters; that is a known approximation.
pub fn normalize_country(raw: &str) -> String {
    raw.trim().to_uppercase().chars().take(2).collect()
}

/// Strips punctuation and symbols from organization names.
///
/// The pattern is compiled once and the cleaner is shared read-only by
/// every validation task.
#[derive(Debug, Clone)]
pub struct OrgCleaner {
    pattern: Regex,
}

impl OrgCleaner {
    pub fn new() -> Self {
        Self {
            // The pattern is a literal known to compile
            pattern: Regex::new(ORG_STRIP_PATTERN).expect("Invalid org cleaning regex"),
        }
    }

    pub fn clean(&self, org: &str) -> String {
        self.pattern.replace_all(org, "").trim().to_string()
    }
}

impl Default for OrgCleaner {
    fn default() -> Self {
        Self::new()
    }
}

/// Whether an address may be reported as a proxy's public face
pub fn is_public_ip(ip: &IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => !(v4.is_private() || v4.is_loopback() || v4.is_unspecified()),
        IpAddr::V6(v6) => match v6.to_ipv4_mapped() {
            Some(v4) => is_public_ip(&IpAddr::V4(v4)),
            None => !(is_unique_local(v6) || v6.is_loopback() || v6.is_unspecified()),
        },
    }
}

// fc00::/7
fn is_unique_local(ip: &Ipv6Addr) -> bool {
    (ip.segments()[0] & 0xfe00) == 0xfc00
}

/// Parse an address a verifier observed and apply the validity rule.
///
/// The address must be public and, when the scanner's own address is
/// known, must differ from it (otherwise the relay did not forward).
pub fn accept_observed_ip(raw: &str, reference_ip: Option<IpAddr>) -> Option<IpAddr> {
    let ip: IpAddr = raw.trim().parse().ok()?;
    if !is_public_ip(&ip) {
        return None;
    }
    match reference_ip {
        Some(reference) if reference == ip => None,
        _ => Some(ip),
    }
}

/// Values of interest in a `key=value` trace body
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TraceDetails {
    pub ip: Option<String>,
    pub loc: Option<String>,
}

/// Extract `ip` and `loc` from a trace response body
pub fn parse_trace(body: &str) -> TraceDetails {
    let mut details = TraceDetails::default();
    for line in body.lines() {
        let Some((key, value)) = line.split_once('=') else {
            continue;
        };
        let value = value.trim();
        match key.trim() {
            "ip" => details.ip = Some(value.to_string()),
            "loc" => details.loc = Some(value.to_string()),
            _ => {}
        }
    }
    details
}

/// Treat blank observed values the same as missing ones
pub fn non_blank(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.trim().is_empty())
}
