//! Trailing multi-horizon returns.

use crate::domain::{Bar, BarSeries};

/// Trailing horizons in bars: roughly 3, 6, 9 and 12 months of trading days.
pub const DEFAULT_HORIZONS: [usize; 4] = [63, 126, 189, 252];

/// Bars a series needs before it is ranked at all (one trading year).
pub const DEFAULT_MIN_HISTORY: usize = 252;

/// Human label for a horizon in trading days: 63 → "3m", 252 → "12m".
pub fn horizon_label(horizon: usize) -> String {
    format!("{}m", (horizon + 10) / 21)
}

/// Fractional returns, one per horizon, in the order the horizons were given.
#[derive(Debug, Clone, PartialEq)]
pub struct HorizonReturns {
    horizons: Vec<usize>,
    values: Vec<f64>,
}

impl HorizonReturns {
    pub fn new(horizons: Vec<usize>, values: Vec<f64>) -> Self {
        debug_assert_eq!(horizons.len(), values.len());
        Self { horizons, values }
    }

    pub fn horizons(&self) -> &[usize] {
        &self.horizons
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }

    pub fn get(&self, horizon: usize) -> Option<f64> {
        self.horizons
            .iter()
            .position(|&h| h == horizon)
            .map(|i| self.values[i])
    }

    pub fn iter(&self) -> impl Iterator<Item = (usize, f64)> + '_ {
        self.horizons.iter().copied().zip(self.values.iter().copied())
    }

    /// `self − benchmark` per horizon. Horizons missing from the benchmark count as 0.
    pub fn relative_to(&self, benchmark: &HorizonReturns) -> HorizonReturns {
        let values = self
            .iter()
            .map(|(h, r)| r - benchmark.get(h).unwrap_or(0.0))
            .collect();
        HorizonReturns::new(self.horizons.clone(), values)
    }
}

/// Return over the trailing `horizon` bars.
///
/// 0 when the history is not longer than the horizon or the base close is 0.
pub fn trailing_return(bars: &[Bar], horizon: usize) -> f64 {
    let len = bars.len();
    if len <= horizon {
        return 0.0;
    }
    let base = bars[len - 1 - horizon].close;
    if base == 0.0 {
        return 0.0;
    }
    (bars[len - 1].close - base) / base
}

/// Returns for every horizon, or `None` when the series holds fewer than
/// `min_history` bars (insufficient history: the symbol is not ranked).
pub fn compute_returns(
    series: &BarSeries,
    horizons: &[usize],
    min_history: usize,
) -> Option<HorizonReturns> {
    let bars = series.bars();
    if bars.is_empty() || bars.len() < min_history {
        return None;
    }
    let values = horizons.iter().map(|&h| trailing_return(bars, h)).collect();
    Some(HorizonReturns::new(horizons.to_vec(), values))
}
