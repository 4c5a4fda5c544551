use anyhow::{Result, anyhow};
use chrono::{DateTime, Duration, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Bucket granularity shared by bars, indicators and forecast target dates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Period {
    M1,
    M5,
    M15,
    M30,
    H1,
    H4,
    D1,
    W1,
}

const SECONDS_PER_DAY: i64 = 86_400;
// 1970-01-01 was a Thursday; the first Monday is 1970-01-05.
const FIRST_MONDAY_OFFSET_SECS: i64 = 4 * SECONDS_PER_DAY;

impl Period {
    /// Returns the duration of this period in minutes
    pub fn to_minutes(&self) -> i64 {
        match self {
            Period::M1 => 1,
            Period::M5 => 5,
            Period::M15 => 15,
            Period::M30 => 30,
            Period::H1 => 60,
            Period::H4 => 240,
            Period::D1 => 1440,
            Period::W1 => 10_080,
        }
    }

    /// Returns the duration in seconds
    pub fn to_seconds(&self) -> i64 {
        self.to_minutes() * 60
    }

    /// Canonical name used in the catalog and model directory layout
    pub fn as_str(&self) -> &'static str {
        match self {
            Period::M1 => "M1",
            Period::M5 => "M5",
            Period::M15 => "M15",
            Period::M30 => "M30",
            Period::H1 => "H1",
            Period::H4 => "H4",
            Period::D1 => "D1",
            Period::W1 => "W1",
        }
    }

    /// Returns all available periods in ascending order
    pub fn all() -> Vec<Period> {
        vec![
            Period::M1,
            Period::M5,
            Period::M15,
            Period::M30,
            Period::H1,
            Period::H4,
            Period::D1,
            Period::W1,
        ]
    }

    /// Returns the start of the bucket containing `timestamp`, shifted forward
    /// by `offset` whole buckets (0 = current bucket).
    ///
    /// Intraday buckets are aligned on the unix epoch, daily buckets on
    /// midnight UTC and weekly buckets on Monday 00:00 UTC. Aligning an
    /// already aligned timestamp with offset 0 returns it unchanged.
    /// Fails when the shifted bucket falls outside the representable range.
    pub fn align(&self, timestamp: DateTime<Utc>, offset: i64) -> Result<DateTime<Utc>> {
        let secs = timestamp.timestamp();
        let period_sec = self.to_seconds();

        let start_sec = match self {
            Period::W1 => {
                let since_monday = (secs - FIRST_MONDAY_OFFSET_SECS).rem_euclid(period_sec);
                secs - since_monday
            }
            _ => secs - secs.rem_euclid(period_sec),
        };

        let aligned = Utc
            .timestamp_opt(start_sec, 0)
            .single()
            .ok_or_else(|| anyhow!("Cannot align {} to {}", timestamp, self))?;
        period_sec
            .checked_mul(offset)
            .and_then(Duration::try_seconds)
            .and_then(|shift| aligned.checked_add_signed(shift))
            .ok_or_else(|| {
                anyhow!(
                    "{} {} buckets after {} is out of range",
                    offset,
                    self,
                    timestamp
                )
            })
    }

    /// Checks if a timestamp is the start of a bucket for this period
    pub fn is_aligned(&self, timestamp: DateTime<Utc>) -> bool {
        self.align(timestamp, 0)
            .is_ok_and(|aligned| aligned == timestamp)
    }

    /// Target dates for an `n` step forecast issued after a bar stamped `last_bar_time`.
    pub fn forecast_dates(
        &self,
        last_bar_time: DateTime<Utc>,
        n: usize,
    ) -> Result<Vec<DateTime<Utc>>> {
        let n = i64::try_from(n).map_err(|_| anyhow!("Step count {} is out of range", n))?;
        // The last date is the furthest out; check it before building the rest
        if n > 0 {
            self.align(last_bar_time, n)?;
        }
        (0..n)
            .map(|k| self.align(last_bar_time, 1 + k))
            .collect()
    }
}

impl FromStr for Period {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "m1" | "1m" | "1min" => Ok(Period::M1),
            "m5" | "5m" | "5min" => Ok(Period::M5),
            "m15" | "15m" | "15min" => Ok(Period::M15),
            "m30" | "30m" | "30min" => Ok(Period::M30),
            "h1" | "1h" | "1hour" => Ok(Period::H1),
            "h4" | "4h" | "4hour" => Ok(Period::H4),
            "d1" | "1d" | "1day" | "d" => Ok(Period::D1),
            "w1" | "1w" | "1week" | "w" => Ok(Period::W1),
            _ => Err(anyhow!(
                "Invalid period: '{}'. Valid options: M1, M5, M15, M30, H1, H4, D1, W1",
                s
            )),
        }
    }
}

impl fmt::Display for Period {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
