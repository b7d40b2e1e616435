//! Folding probe results into per-target running statistics.
//!
//! Two independent questions are answered for every probe:
//!
//! - Did the server answer at all? Only answered probes feed the latency
//!   accumulators and produce a history entry.
//! - Did it answer exactly 200? Only that keeps (or starts) the uptime
//!   window. A 503 is a response, so it is averaged and logged, but it still
//!   ends the window.

use chrono::{DateTime, Utc};

use crate::db::{Target, NETWORK_FAILURE_STATUS};
use crate::probe::ProbeResult;

/// New field values for a target after one probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatsUpdate {
    pub target_id: i64,
    /// Status received, `None` when the probe got no response.
    pub status: Option<u16>,
    pub latency_ms: i64,
    pub checked_at: DateTime<Utc>,
    pub first_up_time: Option<DateTime<Utc>>,
    pub total_probe_count: i64,
    pub total_latency_sum: i64,
}

impl StatsUpdate {
    /// Status as stored on the target row.
    pub fn last_status(&self) -> i32 {
        self.status.map_or(NETWORK_FAILURE_STATUS, i32::from)
    }
}

/// A history row to append for an answered probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HistoryEntry {
    pub target_id: i64,
    pub latency_ms: i64,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Reduction {
    pub update: StatsUpdate,
    pub history: Option<HistoryEntry>,
}

/// Combine a target's prior state with one probe result observed at `now`.
pub fn reduce(prior: &Target, result: &ProbeResult, now: DateTime<Utc>) -> Reduction {
    let was_up = prior.is_up();
    let is_now_up = result.is_up();

    let first_up_time = match (was_up, is_now_up) {
        (false, true) => Some(now),
        (true, false) => None,
        // Streak continues, or stays down.
        _ => prior.first_up_time,
    };

    let (total_probe_count, total_latency_sum, history) = match result.status {
        Some(_) => (
            prior.total_probe_count + 1,
            prior.total_latency_sum + result.latency_ms,
            Some(HistoryEntry {
                target_id: prior.id,
                latency_ms: result.latency_ms,
                timestamp: now,
            }),
        ),
        None => (prior.total_probe_count, prior.total_latency_sum, None),
    };

    Reduction {
        update: StatsUpdate {
            target_id: prior.id,
            status: result.status,
            latency_ms: result.latency_ms,
            checked_at: now,
            first_up_time,
            total_probe_count,
            total_latency_sum,
        },
        history,
    }
}
