//! HTTP probe implementation.

use std::time::{Duration, Instant};

use super::{ProbeError, ProbeResult, Prober};

/// Probes URLs with a GET request over a shared reqwest client.
#[derive(Debug, Clone)]
pub struct HttpProber {
    client: reqwest::Client,
    timeout: Duration,
}

impl HttpProber {
    pub fn new(timeout: Duration) -> Result<Self, ProbeError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ProbeError::Client(e.to_string()))?;

        Ok(Self { client, timeout })
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Send the request and wait for response headers only.
    async fn send(&self, url: &str) -> Result<u16, ProbeError> {
        let response = self.client.get(url).send().await.map_err(|e| {
            if e.is_timeout() {
                ProbeError::Timeout(self.timeout)
            } else {
                ProbeError::Network(e.to_string())
            }
        })?;

        Ok(response.status().as_u16())
    }
}

impl Prober for HttpProber {
    async fn probe(&self, url: &str) -> ProbeResult {
        let start = Instant::now();
        let result = self.send(url).await;
        let latency_ms = start.elapsed().as_millis() as i64;

        match result {
            Ok(status) => ProbeResult::response(status, latency_ms),
            Err(e) => {
                tracing::debug!("Probe of {} got no response: {}", url, e);
                ProbeResult::network_failure(latency_ms)
            }
        }
    }
}
