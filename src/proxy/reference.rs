//! Discovery of the scanner's own public address
//!
//! A verifier that reports this address saw the scanner directly, so the
//! relay did not forward anything.

use crate::proxy::checker::WorkerResponse;
use crate::proxy::normalize::accept_observed_ip;
use crate::proxy::registry::{VerificationEndpoint, VerificationRegistry};
use crate::proxy::useragent::random_user_agent;
use crate::Result;
use anyhow::{anyhow, bail};
use reqwest::Client;
use std::net::IpAddr;
use std::time::Duration;
use tracing::{debug, info};

/// Asks verification endpoints directly (no relay) for our address
pub struct ReferenceResolver {
    client: Client,
}

impl ReferenceResolver {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .no_proxy()
            .user_agent(random_user_agent())
            .min_tls_version(reqwest::tls::Version::TLS_1_2)
            .build()?;

        Ok(Self { client })
    }

    /// Try each worker in order, then the echo endpoint
    pub async fn discover(&self, registry: &VerificationRegistry) -> Result<IpAddr> {
        for endpoint in registry.workers() {
            match self.ask_worker(endpoint).await {
                Ok(ip) => {
                    info!("Reference IP {} (from {})", ip, endpoint.host());
                    return Ok(ip);
                }
                Err(e) => debug!("Reference lookup via {} failed: {}", endpoint.url, e),
            }
        }

        let ip = self.ask_echo(registry.echo()).await?;
        info!("Reference IP {} (from {})", ip, registry.echo().host());
        Ok(ip)
    }

    async fn ask_worker(&self, endpoint: &VerificationEndpoint) -> Result<IpAddr> {
        let response = self
            .client
            .get(endpoint.url.clone())
            .send()
            .await?
            .error_for_status()?;
        let worker: WorkerResponse = response.json().await?;
        accept_observed_ip(&worker.ip, None)
            .ok_or_else(|| anyhow!("worker reported unusable address {:?}", worker.ip))
    }

    async fn ask_echo(&self, endpoint: &VerificationEndpoint) -> Result<IpAddr> {
        let body = self
            .client
            .get(endpoint.url.clone())
            .send()
            .await?
            .error_for_status()?
            .text()
            .await?;
        match accept_observed_ip(&body, None) {
            Some(ip) => Ok(ip),
            None => bail!("echo endpoint returned unusable address {:?}", body.trim()),
        }
    }
}
