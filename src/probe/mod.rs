//! Probe module for endpoint monitoring.
//!
//! A probe is a single HTTP attempt against one URL. Whatever happens, it
//! yields a [`ProbeResult`]: either the status code the server answered
//! with, or a network failure. Both carry the elapsed wall-clock latency.

mod http;

pub use http::*;

use std::future::Future;
use std::time::Duration;
use thiserror::Error;

/// Upper bound on how long one probe may wait for a response.
pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Reasons a probe failed to get any response.
#[derive(Error, Debug)]
pub enum ProbeError {
    #[error("probe timed out after {0:?}")]
    Timeout(Duration),
    #[error("network error: {0}")]
    Network(String),
    #[error("failed to build HTTP client: {0}")]
    Client(String),
}

/// Outcome of a single probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProbeResult {
    /// HTTP status received, or `None` for a network failure.
    pub status: Option<u16>,
    pub latency_ms: i64,
}

impl ProbeResult {
    pub fn response(status: u16, latency_ms: i64) -> Self {
        Self {
            status: Some(status),
            latency_ms,
        }
    }

    pub fn network_failure(latency_ms: i64) -> Self {
        Self {
            status: None,
            latency_ms,
        }
    }

    /// Healthy means exactly 200. Any other response counts as down.
    pub fn is_up(&self) -> bool {
        self.status == Some(200)
    }
}

/// Something that can check one URL.
///
/// Implementations make exactly one attempt per call and never retry.
pub trait Prober: Send + Sync + 'static {
    fn probe(&self, url: &str) -> impl Future<Output = ProbeResult> + Send;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_probe_result_health() {
        assert!(ProbeResult::response(200, 10).is_up());
        assert!(!ProbeResult::response(301, 10).is_up());
        assert!(!ProbeResult::response(503, 10).is_up());
        assert!(!ProbeResult::network_failure(5000).is_up());
    }
}
