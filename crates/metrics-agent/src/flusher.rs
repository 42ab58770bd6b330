// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use crate::error::{FlushError, ShippingError};
use metrics_core::metric::Batch;
use metrics_core::retry::{retry, RetryStrategy};
use metrics_core::security::{SealedPayload, SecurityPipeline, HASH_HEADER};
use reqwest::header::{CONTENT_ENCODING, CONTENT_TYPE};
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{lookup_host, UdpSocket};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

pub const UPDATES_PATH: &str = "/updates/";
pub const REAL_IP_HEADER: &str = "X-Real-IP";

pub struct FlusherConfig {
    pub address: String,
    pub timeout: Duration,
    pub retry_strategy: RetryStrategy,
    pub security: SecurityPipeline,
    /// Sent as `X-Real-IP` when known.
    pub real_ip: Option<IpAddr>,
}

/// Seals batches and posts them to the server's batch endpoint.
#[derive(Clone)]
pub struct Flusher {
    client: reqwest::Client,
    endpoint: String,
    retry_strategy: RetryStrategy,
    security: Arc<SecurityPipeline>,
    real_ip: Option<IpAddr>,
}

impl Flusher {
    pub fn new(config: FlusherConfig) -> Result<Self, FlushError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(FlushError::Client)?;
        Ok(Flusher {
            client,
            endpoint: endpoint_url(&config.address, UPDATES_PATH),
            retry_strategy: config.retry_strategy,
            security: Arc::new(config.security),
            real_ip: config.real_ip,
        })
    }

    #[must_use]
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Delivers `batch` under the configured retry strategy.
    pub async fn flush(&self, batch: &Batch, cancel: &CancellationToken) -> Result<(), FlushError> {
        self.flush_with(batch, &self.retry_strategy, cancel).await
    }

    pub async fn flush_with(
        &self,
        batch: &Batch,
        strategy: &RetryStrategy,
        cancel: &CancellationToken,
    ) -> Result<(), FlushError> {
        debug!("Flushing batch of {} metrics", batch.len());
        // sealed once, every attempt resends the same bytes
        let sealed = self.security.seal(batch)?;

        retry(strategy, cancel, ShippingError::is_retryable, |attempt| {
            let sealed = &sealed;
            async move {
                debug!("Sending batch, attempt {attempt}");
                self.ship(sealed).await
            }
        })
        .await?;

        debug!("Successfully flushed {} metrics", batch.len());
        Ok(())
    }

    async fn ship(&self, sealed: &SealedPayload) -> Result<(), ShippingError> {
        let mut request = self
            .client
            .post(&self.endpoint)
            .header(CONTENT_TYPE, "application/json")
            .header(CONTENT_ENCODING, "gzip")
            .body(sealed.body.clone());
        if let Some(signature) = &sealed.signature {
            request = request.header(HASH_HEADER, signature);
        }
        if let Some(ip) = self.real_ip {
            request = request.header(REAL_IP_HEADER, ip.to_string());
        }

        let response = request
            .send()
            .await
            .map_err(|e| ShippingError::Destination(e.status(), e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        let body = response.text().await.unwrap_or_default();
        let err = ShippingError::Destination(Some(status), body.trim().to_string());
        if !err.is_retryable() {
            error!("Failed to push metrics: {err}");
        }
        Err(err)
    }
}

/// `http://{address}{path}` unless `address` already carries a scheme.
#[must_use]
pub fn endpoint_url(address: &str, path: &str) -> String {
    let address = address.trim_end_matches('/');
    if address.starts_with("http://") || address.starts_with("https://") {
        format!("{address}{path}")
    } else {
        format!("http://{address}{path}")
    }
}

/// Local address of the interface that routes to `address`. No packet is sent.
pub async fn local_ip_for(address: &str) -> Option<IpAddr> {
    let host_port = address
        .trim_start_matches("http://")
        .trim_start_matches("https://")
        .split('/')
        .next()?;
    let target = lookup_host(host_port).await.ok()?.next()?;
    let bind = if target.is_ipv4() { "0.0.0.0:0" } else { "[::]:0" };
    let socket = UdpSocket::bind(bind).await.ok()?;
    socket.connect(target).await.ok()?;
    socket.local_addr().ok().map(|addr| addr.ip())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_url() {
        assert_eq!(
            endpoint_url("localhost:8080", UPDATES_PATH),
            "http://localhost:8080/updates/"
        );
        assert_eq!(
            endpoint_url("https://metrics.example.com/", UPDATES_PATH),
            "https://metrics.example.com/updates/"
        );
    }

    #[tokio::test]
    async fn test_local_ip_for_loopback() {
        assert_eq!(
            local_ip_for("127.0.0.1:8080").await,
            Some(IpAddr::from([127, 0, 0, 1]))
        );
        assert_eq!(local_ip_for("not a host").await, None);
    }
}
