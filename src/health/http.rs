use anyhow::{Context, Result};
use async_trait::async_trait;
use std::time::Duration;
use tracing::debug;

use super::{HealthProbe, HealthSignal, ProbeReport};

/// `GET <url>`; any 2xx is healthy, everything else (including a refused
/// connection) is worth retrying.
pub struct HttpProbe {
    client: reqwest::Client,
    url: String,
}

impl HttpProbe {
    pub fn new(url: &str, timeout: Duration) -> Result<Self> {
        // The endpoint lives on this host; never route it through a proxy.
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .no_proxy()
            .build()
            .context("Failed to build HTTP client for health probe")?;

        Ok(Self {
            client,
            url: url.to_string(),
        })
    }
}

#[async_trait]
impl HealthProbe for HttpProbe {
    async fn probe(&self) -> ProbeReport {
        match self.client.get(&self.url).send().await {
            Ok(resp) => {
                let status = resp.status();
                debug!("GET {} -> {}", self.url, status);
                let signal = HealthSignal::Http {
                    status: status.as_u16(),
                };
                if status.is_success() {
                    ProbeReport::Healthy(signal)
                } else {
                    ProbeReport::Unhealthy(signal)
                }
            }
            Err(e) => {
                debug!("GET {} failed: {}", self.url, e);
                let reason = if e.is_timeout() {
                    "request timed out".to_string()
                } else if e.is_connect() {
                    "connection refused".to_string()
                } else {
                    e.to_string()
                };
                ProbeReport::Unhealthy(HealthSignal::Unreachable { reason })
            }
        }
    }
}
