//! Proxy checker running the verification fallback chain for one candidate

use crate::proxy::models::{
    ProbeResponse, ProxyCandidate, ProxySource, ValidatedProxy, ValidationOutcome,
};
use crate::proxy::normalize::{
    accept_observed_ip, non_blank, normalize_country, parse_trace, OrgCleaner,
};
use crate::proxy::registry::{VerificationEndpoint, VerificationRegistry};
use crate::proxy::tunnel::Probe;
use serde::Deserialize;
use std::net::IpAddr;
use std::sync::Arc;
use tracing::trace;

/// Identity record returned by worker endpoints.
///
/// Only `ip` is required; a field that is absent stays `None`, which is
/// distinct from a present but empty string.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct WorkerResponse {
    pub ip: String,
    #[serde(rename = "as_organization")]
    pub organization: Option<String>,
    pub country: Option<String>,
    pub city: Option<String>,
}

/// Validates candidates by tunnelling to workers, then trace, then echo.
///
/// Never fails: every probe or parse problem moves on to the next tier, and
/// exhausting all tiers yields an invalid outcome.
pub struct ProxyChecker {
    registry: Arc<VerificationRegistry>,
    prober: Arc<dyn Probe>,
    org_cleaner: OrgCleaner,
}

impl ProxyChecker {
    pub fn new(registry: Arc<VerificationRegistry>, prober: Arc<dyn Probe>) -> Self {
        Self {
            registry,
            prober,
            org_cleaner: OrgCleaner::new(),
        }
    }

    /// Run the fallback chain for one candidate
    pub async fn validate(
        &self,
        candidate: &ProxyCandidate,
        reference_ip: Option<IpAddr>,
    ) -> ValidationOutcome {
        for (idx, endpoint) in self.registry.workers().iter().enumerate() {
            if let Some(proxy) = self
                .check_worker(candidate, endpoint, idx + 1, reference_ip)
                .await
            {
                return ValidationOutcome::valid(candidate.clone(), proxy);
            }
        }

        if let Some(proxy) = self.check_trace(candidate, reference_ip).await {
            return ValidationOutcome::valid(candidate.clone(), proxy);
        }

        if let Some(proxy) = self.check_echo(candidate, reference_ip).await {
            return ValidationOutcome::valid(candidate.clone(), proxy);
        }

        ValidationOutcome::invalid(candidate.clone())
    }

    async fn check_worker(
        &self,
        candidate: &ProxyCandidate,
        endpoint: &VerificationEndpoint,
        position: usize,
        reference_ip: Option<IpAddr>,
    ) -> Option<ValidatedProxy> {
        let response = self.fetch(candidate, endpoint).await?;

        let worker: WorkerResponse = match serde_json::from_slice(&response.body) {
            Ok(worker) => worker,
            Err(e) => {
                trace!(candidate = %candidate, endpoint = %endpoint.url, "Worker body rejected: {}", e);
                return None;
            }
        };
        accept_observed_ip(&worker.ip, reference_ip)?;

        let country = non_blank(worker.country.as_deref()).unwrap_or(candidate.country_hint.as_str());
        let org = non_blank(worker.organization.as_deref()).unwrap_or(candidate.org_hint.as_str());

        Some(ValidatedProxy {
            ip: candidate.ip,
            port: candidate.port.clone(),
            country: normalize_country(country),
            org: self.org_cleaner.clean(org),
            city: non_blank(worker.city.as_deref()).map(str::to_string),
            source: ProxySource::Worker(position),
        })
    }

    async fn check_trace(
        &self,
        candidate: &ProxyCandidate,
        reference_ip: Option<IpAddr>,
    ) -> Option<ValidatedProxy> {
        let response = self.fetch(candidate, self.registry.trace()).await?;
        let details = parse_trace(&response.text());
        accept_observed_ip(details.ip.as_deref()?, reference_ip)?;

        let country = non_blank(details.loc.as_deref()).unwrap_or(candidate.country_hint.as_str());

        Some(ValidatedProxy {
            ip: candidate.ip,
            port: candidate.port.clone(),
            country: normalize_country(country),
            org: self.org_cleaner.clean(&candidate.org_hint),
            city: None,
            source: ProxySource::Trace,
        })
    }

    async fn check_echo(
        &self,
        candidate: &ProxyCandidate,
        reference_ip: Option<IpAddr>,
    ) -> Option<ValidatedProxy> {
        let response = self.fetch(candidate, self.registry.echo()).await?;
        accept_observed_ip(&response.text(), reference_ip)?;

        Some(ValidatedProxy {
            ip: candidate.ip,
            port: candidate.port.clone(),
            country: normalize_country(&candidate.country_hint),
            org: self.org_cleaner.clean(&candidate.org_hint),
            city: None,
            source: ProxySource::IpEcho,
        })
    }

    /// Probe one endpoint, keeping only 200 responses
    async fn fetch(
        &self,
        candidate: &ProxyCandidate,
        endpoint: &VerificationEndpoint,
    ) -> Option<ProbeResponse> {
        match self
            .prober
            .probe(candidate.ip, &candidate.port, &endpoint.url)
            .await
        {
            Ok(response) if response.is_ok() => Some(response),
            Ok(response) => {
                trace!(candidate = %candidate, kind = %endpoint.kind, status = response.status, "Unexpected status");
                None
            }
            Err(e) => {
                trace!(candidate = %candidate, kind = %endpoint.kind, "Probe failed: {}", e);
                None
            }
        }
    }
}
