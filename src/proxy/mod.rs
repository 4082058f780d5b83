//! Proxy module for validating relay candidates
//!
//! This module provides functionality for:
//! - Parsing `ip,port,country,org` candidate lists
//! - Tunnelling TLS requests through candidates to verification services
//! - Running the worker, trace and echo fallback chain per candidate
//! - Scanning large lists with bounded parallelism
//! - Ranking, deduplicating and saving the live proxies

pub mod checker;
pub mod models;
pub mod normalize;
pub mod parser;
pub mod progress;
pub mod reference;
pub mod registry;
pub mod report;
pub mod response;
pub mod scheduler;
pub mod tunnel;
pub mod useragent;

pub use checker::ProxyChecker;
pub use models::{ProbeResponse, ProxyCandidate, ProxySource, ValidatedProxy, ValidationOutcome};
pub use parser::CandidateParser;
pub use progress::ProgressReporter;
pub use reference::ReferenceResolver;
pub use registry::{EndpointKind, VerificationEndpoint, VerificationRegistry};
pub use report::{PriorityOrder, Report, ReportBuilder};
pub use scheduler::{ScanScheduler, ScanStats, StatsSnapshot};
pub use tunnel::{Probe, TunnelProber};
