//! Allow-listed probe cadences.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use super::ScheduleError;

/// How often the probe cycle runs. Only these cadences are accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ScheduleInterval {
    #[default]
    EveryMinute,
    EveryFiveMinutes,
    EveryTenMinutes,
    EveryThirtyMinutes,
}

impl ScheduleInterval {
    pub const ALL: [ScheduleInterval; 4] = [
        ScheduleInterval::EveryMinute,
        ScheduleInterval::EveryFiveMinutes,
        ScheduleInterval::EveryTenMinutes,
        ScheduleInterval::EveryThirtyMinutes,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ScheduleInterval::EveryMinute => "@every 1m",
            ScheduleInterval::EveryFiveMinutes => "@every 5m",
            ScheduleInterval::EveryTenMinutes => "@every 10m",
            ScheduleInterval::EveryThirtyMinutes => "@every 30m",
        }
    }

    pub fn period(self) -> Duration {
        let minutes = match self {
            ScheduleInterval::EveryMinute => 1,
            ScheduleInterval::EveryFiveMinutes => 5,
            ScheduleInterval::EveryTenMinutes => 10,
            ScheduleInterval::EveryThirtyMinutes => 30,
        };
        Duration::from_secs(minutes * 60)
    }
}

impl FromStr for ScheduleInterval {
    type Err = ScheduleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|i| i.as_str() == s)
            .ok_or_else(|| ScheduleError::InvalidInterval(s.to_string()))
    }
}

impl fmt::Display for ScheduleInterval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
