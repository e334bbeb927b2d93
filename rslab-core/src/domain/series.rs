//! BarSeries — ordered bars for one (symbol, timeframe) with a retention cap.

use super::bar::{Bar, BarError};
use super::timeframe::Timeframe;

/// Default number of trailing bars kept per series.
pub const DEFAULT_RETENTION_CAP: usize = 400;

/// What a merge did to the series. `evicted` counts bars dropped from the
/// front to honor the cap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeOutcome {
    /// A bar with the same timestamp existed and was overwritten (late correction).
    Replaced { evicted: usize },
    /// The bar was new.
    Appended { evicted: usize },
}

/// Ordered bars for one symbol and timeframe.
///
/// Invariants, held after every constructor and every merge:
/// - timestamps are strictly increasing
/// - `len() <= cap` for the cap the series was last built or merged with
#[derive(Debug, Clone, PartialEq)]
pub struct BarSeries {
    symbol: String,
    timeframe: Timeframe,
    bars: Vec<Bar>,
}

impl BarSeries {
    pub fn empty(symbol: impl Into<String>, timeframe: Timeframe) -> Self {
        Self {
            symbol: symbol.into(),
            timeframe,
            bars: Vec::new(),
        }
    }

    /// Build from bars that must already be validated and strictly increasing.
    ///
    /// Used when loading persisted shards, where any disorder means corruption.
    pub fn from_bars(
        symbol: impl Into<String>,
        timeframe: Timeframe,
        bars: Vec<Bar>,
    ) -> Result<Self, BarError> {
        for bar in &bars {
            bar.validate()?;
        }
        if let Some(position) = bars
            .windows(2)
            .position(|w| w[1].timestamp <= w[0].timestamp)
        {
            return Err(BarError::NotIncreasing {
                position: position + 1,
                previous: bars[position].timestamp,
                next: bars[position + 1].timestamp,
            });
        }
        Ok(Self {
            symbol: symbol.into(),
            timeframe,
            bars,
        })
    }

    /// Build from provider output: validates, sorts, keeps the last bar for a
    /// duplicated timestamp, then truncates to the newest `cap` bars.
    pub fn normalized(
        symbol: impl Into<String>,
        timeframe: Timeframe,
        mut bars: Vec<Bar>,
        cap: usize,
    ) -> Result<Self, BarError> {
        for bar in &bars {
            bar.validate()?;
        }
        // Stable sort keeps provider order among equal timestamps, so the
        // dedup below retains the last-reported bar.
        bars.sort_by_key(|b| b.timestamp);
        let mut deduped: Vec<Bar> = Vec::with_capacity(bars.len());
        for bar in bars {
            match deduped.last_mut() {
                Some(last) if last.timestamp == bar.timestamp => *last = bar,
                _ => deduped.push(bar),
            }
        }
        let mut series = Self {
            symbol: symbol.into(),
            timeframe,
            bars: deduped,
        };
        series.enforce_cap(cap);
        Ok(series)
    }

    /// Merge one bar.
    ///
    /// Same timestamp present: replace in place. Otherwise append and
    /// re-sort. Either way the oldest bars beyond `cap` are dropped, so a
    /// series loaded under a larger cap shrinks on its next merge.
    pub fn merge(&mut self, bar: Bar, cap: usize) -> MergeOutcome {
        if let Ok(pos) = self
            .bars
            .binary_search_by_key(&bar.timestamp, |b| b.timestamp)
        {
            self.bars[pos] = bar;
            let evicted = self.enforce_cap(cap);
            return MergeOutcome::Replaced { evicted };
        }

        self.bars.push(bar);
        self.bars.sort_by_key(|b| b.timestamp);
        let evicted = self.enforce_cap(cap);
        MergeOutcome::Appended { evicted }
    }

    /// Drop the oldest bars until at most `cap` remain. Returns how many were dropped.
    pub fn enforce_cap(&mut self, cap: usize) -> usize {
        let excess = self.bars.len().saturating_sub(cap);
        if excess > 0 {
            self.bars.drain(..excess);
        }
        excess
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn timeframe(&self) -> Timeframe {
        self.timeframe
    }

    pub fn bars(&self) -> &[Bar] {
        &self.bars
    }

    pub fn into_bars(self) -> Vec<Bar> {
        self.bars
    }

    pub fn len(&self) -> usize {
        self.bars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bars.is_empty()
    }

    pub fn last(&self) -> Option<&Bar> {
        self.bars.last()
    }
}
