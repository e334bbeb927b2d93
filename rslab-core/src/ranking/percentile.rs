//! Positional percentile ranks in 1..=99.

use std::cmp::Ordering;

pub const MIN_RANK: u8 = 1;
pub const MAX_RANK: u8 = 99;

/// Something with a symbol and an RS score.
pub trait Scored {
    fn symbol(&self) -> &str;
    fn score(&self) -> f64;
}

impl Scored for (String, f64) {
    fn symbol(&self) -> &str {
        &self.0
    }

    fn score(&self) -> f64 {
        self.1
    }
}

/// Rank of the `position`-th entry (0-based, best first) out of `total`:
/// `clamp(ceil((total − position) · 99 / total), 1, 99)`, in integer math.
pub fn percentile_rank(position: usize, total: usize) -> u8 {
    if total == 0 || position >= total {
        return MIN_RANK;
    }
    let remaining = (total - position) as u64;
    let total = total as u64;
    let rank = (remaining * u64::from(MAX_RANK)).div_ceil(total);
    rank.clamp(u64::from(MIN_RANK), u64::from(MAX_RANK)) as u8
}

fn best_first<T: Scored>(a: &T, b: &T) -> Ordering {
    b.score()
        .total_cmp(&a.score())
        .then_with(|| a.symbol().cmp(b.symbol()))
}

/// Sort best score first (symbol ascending on exact ties) and attach ranks.
///
/// Ranks are positional, so equal scores may straddle a bucket boundary and
/// receive different ranks; the symbol tie-break keeps that deterministic.
pub fn assign_percentiles<T: Scored>(mut scored: Vec<T>) -> Vec<(T, u8)> {
    scored.sort_by(best_first);
    let total = scored.len();
    scored
        .into_iter()
        .enumerate()
        .map(|(i, item)| (item, percentile_rank(i, total)))
        .collect()
}
