//! Bar timeframes stored per symbol.

use chrono::{Duration, NaiveDate};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Bar interval. Serialized as the short labels used in shard files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Timeframe {
    #[serde(rename = "1D")]
    Daily,
    #[serde(rename = "1W")]
    Weekly,
}

impl Timeframe {
    pub const ALL: [Timeframe; 2] = [Timeframe::Daily, Timeframe::Weekly];

    pub fn as_str(&self) -> &'static str {
        match self {
            Timeframe::Daily => "1D",
            Timeframe::Weekly => "1W",
        }
    }

    /// Aggregate timespan name understood by the provider API.
    pub fn timespan(&self) -> &'static str {
        match self {
            Timeframe::Daily => "day",
            Timeframe::Weekly => "week",
        }
    }

    /// How far back a full rebuild fetches for this timeframe.
    ///
    /// Daily: 400 calendar days (~1.5 trading years, enough for the 12-month
    /// horizon). Weekly: two years.
    pub fn lookback(&self) -> Duration {
        match self {
            Timeframe::Daily => Duration::days(400),
            Timeframe::Weekly => Duration::weeks(104),
        }
    }

    /// First date of the full-rebuild window ending at `end`.
    pub fn window_start(&self, end: NaiveDate) -> NaiveDate {
        end - self.lookback()
    }
}

impl fmt::Display for Timeframe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Timeframe {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "1D" | "1d" | "daily" => Ok(Timeframe::Daily),
            "1W" | "1w" | "weekly" => Ok(Timeframe::Weekly),
            other => Err(format!("unknown timeframe '{other}' (expected 1D or 1W)")),
        }
    }
}
