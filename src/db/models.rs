//! Database model types.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};

/// Status code recorded when a probe got no HTTP response at all.
pub const NETWORK_FAILURE_STATUS: i32 = 0;

/// A monitored URL and its accumulated health state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Target {
    pub id: i64,
    pub url: String,
    /// Last HTTP status, or 0 when the last probe was a network failure.
    pub last_status: i32,
    pub last_latency_ms: i64,
    pub last_checked: Option<DateTime<Utc>>,
    /// Start of the current run of 200 responses; `None` while down.
    pub first_up_time: Option<DateTime<Utc>>,
    pub total_probe_count: i64,
    pub total_latency_sum: i64,
}

impl Default for Target {
    fn default() -> Self {
        Self {
            id: 0,
            url: String::new(),
            last_status: NETWORK_FAILURE_STATUS,
            last_latency_ms: 0,
            last_checked: None,
            first_up_time: None,
            total_probe_count: 0,
            total_latency_sum: 0,
        }
    }
}

impl Target {
    /// A target is up only when its last probe answered exactly 200.
    pub fn is_up(&self) -> bool {
        self.last_status == 200
    }

    /// Mean latency over every probe that received a response.
    pub fn average_latency_ms(&self) -> Option<i64> {
        if self.total_probe_count == 0 {
            return None;
        }
        Some(self.total_latency_sum / self.total_probe_count)
    }

    /// How long the target has been continuously up as of `now`.
    pub fn uptime(&self, now: DateTime<Utc>) -> Option<ChronoDuration> {
        self.first_up_time.map(|since| now - since)
    }
}

/// One immutable latency sample from a probe that received a response.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProbeHistory {
    pub target_id: i64,
    /// Filled in only by queries that join against `targets`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    pub latency_ms: i64,
    pub timestamp: DateTime<Utc>,
}

/// Time windows the history API can filter on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub enum HistoryRange {
    #[serde(rename = "1h")]
    Hour,
    #[serde(rename = "4h")]
    FourHours,
    #[serde(rename = "1d")]
    Day,
    #[serde(rename = "1w")]
    Week,
    #[serde(rename = "1m")]
    Month,
}

impl HistoryRange {
    pub fn duration(self) -> ChronoDuration {
        match self {
            HistoryRange::Hour => ChronoDuration::hours(1),
            HistoryRange::FourHours => ChronoDuration::hours(4),
            HistoryRange::Day => ChronoDuration::days(1),
            HistoryRange::Week => ChronoDuration::days(7),
            HistoryRange::Month => ChronoDuration::days(30),
        }
    }

    /// Start of the window ending at `now`.
    pub fn since(self, now: DateTime<Utc>) -> DateTime<Utc> {
        now - self.duration()
    }
}

/// Aggregate health across all targets.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Summary {
    pub target_count: usize,
    pub up_count: usize,
    /// Integer percentage of targets currently up.
    pub uptime_pct: i64,
    pub global_avg_latency_ms: Option<i64>,
    pub last_checked: Option<DateTime<Utc>>,
}

impl Summary {
    pub fn from_targets(targets: &[Target]) -> Self {
        let up_count = targets.iter().filter(|t| t.is_up()).count();
        let uptime_pct = if targets.is_empty() {
            0
        } else {
            (100 * up_count / targets.len()) as i64
        };

        let (sum, count) = targets.iter().fold((0i64, 0i64), |(s, c), t| {
            (s + t.total_latency_sum, c + t.total_probe_count)
        });

        Self {
            target_count: targets.len(),
            up_count,
            uptime_pct,
            global_avg_latency_ms: if count > 0 { Some(sum / count) } else { None },
            last_checked: targets.iter().filter_map(|t| t.last_checked).max(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_average_latency() {
        let mut target = Target::default();
        assert_eq!(target.average_latency_ms(), None);

        target.total_probe_count = 4;
        target.total_latency_sum = 410;
        assert_eq!(target.average_latency_ms(), Some(102));
    }

    #[test]
    fn test_uptime() {
        let since = Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap();
        let now = Utc.with_ymd_and_hms(2024, 1, 2, 13, 30, 0).unwrap();

        let mut target = Target::default();
        assert!(target.uptime(now).is_none());

        target.first_up_time = Some(since);
        assert_eq!(target.uptime(now), Some(ChronoDuration::minutes(25 * 60 + 30)));
    }

    #[test]
    fn test_history_range_parse() {
        let range: HistoryRange = serde_json::from_str("\"4h\"").unwrap();
        assert_eq!(range, HistoryRange::FourHours);
        assert!(serde_json::from_str::<HistoryRange>("\"2h\"").is_err());

        let now = Utc.with_ymd_and_hms(2024, 1, 31, 0, 0, 0).unwrap();
        assert_eq!(
            HistoryRange::Month.since(now),
            Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
        );
    }

    #[test]
    fn test_summary() {
        let t1 = Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap();
        let t2 = Utc.with_ymd_and_hms(2024, 1, 1, 12, 5, 0).unwrap();
        let targets = vec![
            Target {
                last_status: 200,
                last_checked: Some(t1),
                total_probe_count: 2,
                total_latency_sum: 100,
                ..Default::default()
            },
            Target {
                last_status: 503,
                last_checked: Some(t2),
                total_probe_count: 1,
                total_latency_sum: 200,
                ..Default::default()
            },
            Target::default(),
        ];

        let summary = Summary::from_targets(&targets);
        assert_eq!(summary.target_count, 3);
        assert_eq!(summary.up_count, 1);
        assert_eq!(summary.uptime_pct, 33);
        assert_eq!(summary.global_avg_latency_ms, Some(100));
        assert_eq!(summary.last_checked, Some(t2));

        let empty = Summary::from_targets(&[]);
        assert_eq!(empty.uptime_pct, 0);
        assert_eq!(empty.global_avg_latency_ms, None);
    }
}
