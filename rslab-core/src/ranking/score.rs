//! Weighted RS score.

use super::returns::HorizonReturns;

/// Weights for the default horizons: the 3-month return counts double.
pub const DEFAULT_WEIGHTS: [f64; 4] = [2.0, 1.0, 1.0, 1.0];

/// Weighted sum of horizon returns. Extra weights or returns are ignored.
pub fn rs_score(returns: &HorizonReturns, weights: &[f64]) -> f64 {
    returns
        .values()
        .iter()
        .zip(weights)
        .map(|(r, w)| r * w)
        .sum()
}
