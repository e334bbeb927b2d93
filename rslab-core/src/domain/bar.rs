//! Bar — the fundamental market data unit.

use chrono::{DateTime, NaiveDate};
use serde::{Deserialize, Serialize, Serializer};
use thiserror::Error;

/// Validation failures for bars and bar series.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum BarError {
    #[error("{field} is not a finite number")]
    NonFinite { field: &'static str },

    #[error("{field} is negative ({value})")]
    Negative { field: &'static str, value: f64 },

    #[error("timestamps not strictly increasing at position {position} ({previous} then {next})")]
    NotIncreasing {
        position: usize,
        previous: i64,
        next: i64,
    },
}

/// OHLCV bar for a single symbol over one interval.
///
/// `timestamp` is the interval start in epoch milliseconds (UTC), as reported
/// by the provider. On the wire the fields are abbreviated (`t`, `o`, `h`,
/// `l`, `c`, `v`) and prices are rounded to cents.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    #[serde(rename = "t")]
    pub timestamp: i64,
    #[serde(rename = "o", serialize_with = "serialize_cents")]
    pub open: f64,
    #[serde(rename = "h", serialize_with = "serialize_cents")]
    pub high: f64,
    #[serde(rename = "l", serialize_with = "serialize_cents")]
    pub low: f64,
    #[serde(rename = "c", serialize_with = "serialize_cents")]
    pub close: f64,
    #[serde(rename = "v")]
    pub volume: u64,
}

impl Bar {
    /// Build a bar, rejecting NaN/infinite or negative prices.
    pub fn new(
        timestamp: i64,
        open: f64,
        high: f64,
        low: f64,
        close: f64,
        volume: u64,
    ) -> Result<Self, BarError> {
        let bar = Self {
            timestamp,
            open,
            high,
            low,
            close,
            volume,
        };
        bar.validate()?;
        Ok(bar)
    }

    /// Check that every price is finite and non-negative.
    pub fn validate(&self) -> Result<(), BarError> {
        for (field, value) in [
            ("open", self.open),
            ("high", self.high),
            ("low", self.low),
            ("close", self.close),
        ] {
            if !value.is_finite() {
                return Err(BarError::NonFinite { field });
            }
            if value < 0.0 {
                return Err(BarError::Negative { field, value });
            }
        }
        Ok(())
    }

    /// Basic OHLC sanity check: high >= low, high >= open/close, low <= open/close.
    ///
    /// Not enforced on construction; providers occasionally report bars that
    /// violate it and those are still stored as-is.
    pub fn is_sane(&self) -> bool {
        self.validate().is_ok()
            && self.high >= self.low
            && self.high >= self.open
            && self.high >= self.close
            && self.low <= self.open
            && self.low <= self.close
    }

    /// Calendar date (UTC) of the bar's timestamp.
    pub fn date(&self) -> Option<NaiveDate> {
        DateTime::from_timestamp_millis(self.timestamp).map(|dt| dt.date_naive())
    }
}

/// Epoch milliseconds at midnight UTC of `date`.
pub fn date_to_millis(date: NaiveDate) -> i64 {
    date.and_hms_opt(0, 0, 0)
        .map(|dt| dt.and_utc().timestamp_millis())
        .unwrap_or_default()
}

fn serialize_cents<S: Serializer>(value: &f64, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_f64((value * 100.0).round() / 100.0)
}
