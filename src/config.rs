//! Configuration module for upwatch.
//!
//! Loads configuration from environment variables with sensible defaults.

use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::probe::DEFAULT_PROBE_TIMEOUT;
use crate::scheduler::CycleOptions;

/// Server configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// HTTP port for the API server (default: 8080)
    pub http_port: u16,
    /// Path to the SQLite database file (default: "upwatch.db")
    pub db_path: String,
    /// Bound on each probe's wait for a response (default: 5s)
    pub probe_timeout: Duration,
    /// Probes in flight at once during a cycle (default: 4)
    pub max_concurrent_probes: usize,
    /// Skip a firing while the previous cycle still runs (default: false)
    pub skip_overlapping_cycles: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_port: 8080,
            db_path: "upwatch.db".to_string(),
            probe_timeout: DEFAULT_PROBE_TIMEOUT,
            max_concurrent_probes: CycleOptions::default().max_concurrent_probes,
            skip_overlapping_cycles: false,
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables.
    ///
    /// Environment variables:
    /// - `UPWATCH_HTTP_PORT`: HTTP port (default: 8080)
    /// - `UPWATCH_DB_PATH`: Database file path (default: "upwatch.db")
    /// - `UPWATCH_PROBE_TIMEOUT_SECS`: Probe timeout in seconds (default: 5)
    /// - `UPWATCH_MAX_CONCURRENT_PROBES`: Parallel probes per cycle (default: 4)
    /// - `UPWATCH_SKIP_OVERLAPPING_CYCLES`: `true` to skip overlapping cycles
    pub fn load() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut cfg = Self::default();

        if let Some(port) = parse(&lookup, "UPWATCH_HTTP_PORT") {
            cfg.http_port = port;
        }

        if let Some(db_path) = lookup("UPWATCH_DB_PATH") {
            cfg.db_path = db_path;
        }

        if let Some(secs) = parse::<u64>(&lookup, "UPWATCH_PROBE_TIMEOUT_SECS").filter(|s| *s > 0) {
            cfg.probe_timeout = Duration::from_secs(secs);
        }

        if let Some(n) = parse::<usize>(&lookup, "UPWATCH_MAX_CONCURRENT_PROBES").filter(|n| *n > 0) {
            cfg.max_concurrent_probes = n;
        }

        if let Some(skip) = parse(&lookup, "UPWATCH_SKIP_OVERLAPPING_CYCLES") {
            cfg.skip_overlapping_cycles = skip;
        }

        cfg
    }

    pub fn cycle_options(&self) -> CycleOptions {
        CycleOptions {
            max_concurrent_probes: self.max_concurrent_probes,
            skip_overlapping: self.skip_overlapping_cycles,
        }
    }
}

fn parse<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    let raw = lookup(key)?;
    match raw.trim().parse() {
        Ok(v) => Some(v),
        Err(_) => {
            tracing::warn!("Ignoring invalid {}={:?}", key, raw);
            None
        }
    }
}
