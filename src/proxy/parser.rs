//! Candidate list parsing and report persistence

use crate::error::ConfigError;
use crate::proxy::models::{ProxyCandidate, ValidatedProxy};
use crate::Result;
use anyhow::Context;
use std::fs;
use std::net::IpAddr;
use std::path::Path;

/// Parser for `ip,port,country,org` candidate lists
pub struct CandidateParser;

impl CandidateParser {
    /// Parse a single candidate line
    ///
    /// Fields are trimmed and anything after the fourth field is ignored.
    /// Blank lines, `#` comments, unparsable IPs and empty ports yield `None`.
    pub fn parse_line(line: &str) -> Option<ProxyCandidate> {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            return None;
        }

        let mut fields = line.split(',').map(str::trim);
        let ip: IpAddr = fields.next()?.parse().ok()?;
        let port = fields.next().filter(|port| !port.is_empty())?;
        let country = fields.next().unwrap_or_default();
        let org = fields.next().unwrap_or_default();

        Some(ProxyCandidate::new(ip, port, country, org))
    }

    /// Parse candidates from a string (multiple lines)
    pub fn parse_string(content: &str) -> Vec<ProxyCandidate> {
        content.lines().filter_map(Self::parse_line).collect()
    }

    /// Parse candidates from a file; an empty result is an error
    pub fn parse_file<P: AsRef<Path>>(path: P) -> std::result::Result<Vec<ProxyCandidate>, ConfigError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;

        let candidates = Self::parse_string(&content);
        if candidates.is_empty() {
            return Err(ConfigError::NoCandidates {
                path: path.to_path_buf(),
            });
        }
        Ok(candidates)
    }

    /// Write candidates back out in normalized `ip,port,country,org` form
    pub fn save_candidates<P: AsRef<Path>>(candidates: &[ProxyCandidate], path: P) -> Result<()> {
        let lines: Vec<String> = candidates.iter().map(ProxyCandidate::to_line).collect();
        write_lines(path.as_ref(), &lines)
    }

    /// Save validated proxies as report lines, creating parent directories
    pub fn save_to_file<P: AsRef<Path>>(proxies: &[ValidatedProxy], path: P) -> Result<()> {
        let lines: Vec<String> = proxies.iter().map(ValidatedProxy::to_report_line).collect();
        write_lines(path.as_ref(), &lines)
    }
}

fn write_lines(path: &Path, lines: &[String]) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create directory {}", parent.display()))?;
    }

    let mut content = lines.join("\n");
    if !content.is_empty() {
        content.push('\n');
    }
    fs::write(path, content).with_context(|| format!("failed to write {}", path.display()))?;
    Ok(())
}
