//! Deterministic synthetic bars for offline runs and tests.
//!
//! Each (symbol, date) pair gets its own BLAKE3-seeded RNG, so a bar does not
//! depend on the requested range: fetching one day returns exactly the bar a
//! 400-day fetch would have contained for that day. These bars are fake.

use super::provider::{BarFetcher, FetchError};
use crate::domain::{date_to_millis, Bar, Timeframe};
use chrono::{Datelike, Duration, NaiveDate, Weekday};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::BTreeSet;

#[derive(Debug, Clone, Default)]
pub struct SyntheticProvider {
    missing: BTreeSet<String>,
    failing: BTreeSet<String>,
}

fn seed_for(parts: &[&[u8]]) -> [u8; 32] {
    let mut hasher = blake3::Hasher::new();
    for part in parts {
        hasher.update(part);
    }
    *hasher.finalize().as_bytes()
}

fn anchor() -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 1, 1).unwrap_or_default()
}

impl SyntheticProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Symbols that always answer `NoData`.
    pub fn with_missing<I, S>(mut self, symbols: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.missing.extend(symbols.into_iter().map(Into::into));
        self
    }

    /// Symbols that always answer with a transient failure.
    pub fn with_failing<I, S>(mut self, symbols: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.failing.extend(symbols.into_iter().map(Into::into));
        self
    }

    /// Close on `date`: a per-symbol base price and daily drift, plus noise.
    fn bar_for(symbol: &str, timeframe: Timeframe, date: NaiveDate) -> Bar {
        let mut profile = StdRng::from_seed(seed_for(&[symbol.as_bytes()]));
        let base: f64 = profile.gen_range(20.0..400.0);
        let drift: f64 = profile.gen_range(-0.0006..0.0009);

        let mut rng = StdRng::from_seed(seed_for(&[
            symbol.as_bytes(),
            timeframe.as_str().as_bytes(),
            date.to_string().as_bytes(),
        ]));
        let days = (date - anchor()).num_days() as f64;
        let noise: f64 = rng.gen_range(-0.02..0.02);
        let close = base * (drift * days).exp() * (1.0 + noise);
        let open = close * (1.0 + rng.gen_range(-0.01..0.01));
        let high = open.max(close) * (1.0 + rng.gen_range(0.0..0.01));
        let low = open.min(close) * (1.0 - rng.gen_range(0.0..0.01));
        let volume = match timeframe {
            Timeframe::Daily => rng.gen_range(200_000..20_000_000u64),
            Timeframe::Weekly => rng.gen_range(1_000_000..100_000_000u64),
        };

        Bar {
            timestamp: date_to_millis(date),
            open,
            high,
            low,
            close,
            volume,
        }
    }

    fn has_bar(timeframe: Timeframe, date: NaiveDate) -> bool {
        match timeframe {
            Timeframe::Daily => !matches!(date.weekday(), Weekday::Sat | Weekday::Sun),
            Timeframe::Weekly => date.weekday() == Weekday::Mon,
        }
    }
}

impl BarFetcher for SyntheticProvider {
    fn name(&self) -> &str {
        "synthetic"
    }

    fn fetch(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<Bar>, FetchError> {
        if self.failing.contains(symbol) {
            return Err(FetchError::Transient(format!("synthetic failure for {symbol}")));
        }

        let mut bars = Vec::new();
        if !self.missing.contains(symbol) {
            let mut current = start;
            while current <= end {
                if Self::has_bar(timeframe, current) {
                    bars.push(Self::bar_for(symbol, timeframe, current));
                }
                current += Duration::days(1);
            }
        }

        if bars.is_empty() {
            return Err(FetchError::NoData {
                symbol: symbol.to_string(),
            });
        }
        Ok(bars)
    }
}
