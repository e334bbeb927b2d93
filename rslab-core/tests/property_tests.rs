//! Property tests for store and ranking invariants.
//!
//! Uses proptest to verify:
//! 1. Shard plans partition the universe into ceil(|U| / N) disjoint shards
//! 2. Merging the same bar twice equals merging it once
//! 3. After any merge the series is capped and holds the newest bars
//! 4. A strictly higher score never gets a lower rank
//! 5. Ranks stay in 1..=99 for any universe size

use proptest::prelude::*;
use std::collections::{BTreeMap, BTreeSet};
use rslab_core::domain::{Bar, BarSeries, Timeframe};
use rslab_core::ranking::{assign_percentiles, percentile_rank};
use rslab_core::shard::ShardPlanner;

// ── Strategies (proptest) ────────────────────────────────────────────

fn arb_symbol() -> impl Strategy<Value = String> {
    "[A-Z]{1,5}"
}

fn arb_universe() -> impl Strategy<Value = Vec<String>> {
    prop::collection::vec(arb_symbol(), 0..300)
}

fn arb_close() -> impl Strategy<Value = f64> {
    (1.0..500.0_f64).prop_map(|p| (p * 100.0).round() / 100.0)
}

fn arb_bar() -> impl Strategy<Value = Bar> {
    (0i64..2_000, arb_close(), 0u64..10_000_000).prop_map(|(day, close, volume)| {
        Bar::new(day * 86_400_000, close, close, close, close, volume).unwrap()
    })
}

fn series_from(bars: &[Bar], cap: usize) -> BarSeries {
    let mut series = BarSeries::empty("TEST", Timeframe::Daily);
    for bar in bars {
        series.merge(*bar, cap);
    }
    series
}

// ── 1. Partition ─────────────────────────────────────────────────────

proptest! {
    #[test]
    fn plan_partitions_universe(universe in arb_universe(), size in 1usize..80) {
        let plan = ShardPlanner::new(size).plan(&universe);
        let expected: BTreeSet<String> = universe.iter().cloned().collect();

        let mut seen = BTreeSet::new();
        for descriptor in &plan {
            prop_assert!(descriptor.symbols.len() <= size);
            prop_assert_eq!(descriptor.symbol_count, descriptor.symbols.len());
            for symbol in &descriptor.symbols {
                // Disjoint: nobody appears twice.
                prop_assert!(seen.insert(symbol.clone()));
            }
        }
        prop_assert_eq!(&seen, &expected);
        prop_assert_eq!(plan.len(), expected.len().div_ceil(size));
    }

    #[test]
    fn plan_is_order_independent(mut universe in arb_universe(), size in 1usize..80) {
        let first: Vec<Vec<String>> =
            ShardPlanner::new(size).plan(&universe).into_iter().map(|d| d.symbols).collect();
        universe.reverse();
        let second: Vec<Vec<String>> =
            ShardPlanner::new(size).plan(&universe).into_iter().map(|d| d.symbols).collect();
        prop_assert_eq!(first, second);
    }
}

// ── 2. Merge idempotence ─────────────────────────────────────────────

proptest! {
    #[test]
    fn merge_is_idempotent(
        history in prop::collection::vec(arb_bar(), 0..120),
        bar in arb_bar(),
        cap in 1usize..100,
    ) {
        let base = series_from(&history, cap);

        let mut once = base.clone();
        once.merge(bar, cap);
        let mut twice = once.clone();
        twice.merge(bar, cap);

        prop_assert_eq!(once, twice);
    }
}

// ── 3. Rolling cap ───────────────────────────────────────────────────

proptest! {
    #[test]
    fn merge_keeps_newest_bars_within_cap(
        bars in prop::collection::vec(arb_bar(), 1..200),
        cap in 1usize..60,
    ) {
        let mut series = BarSeries::empty("TEST", Timeframe::Daily);
        let mut latest: BTreeMap<i64, Bar> = BTreeMap::new();

        for bar in &bars {
            series.merge(*bar, cap);
            latest.insert(bar.timestamp, *bar);
            prop_assert!(series.len() <= cap);
            prop_assert!(series.bars().windows(2).all(|w| w[0].timestamp < w[1].timestamp));
        }

        let expected: Vec<Bar> = latest.values().rev().take(cap).rev().copied().collect();
        prop_assert_eq!(series.bars(), expected.as_slice());
    }
}

proptest! {
    /// A series persisted under a larger cap shrinks on its next merge,
    /// whether that merge replaces or appends.
    #[test]
    fn merge_into_over_cap_series_respects_new_cap(
        len in 2usize..80,
        cap in 1usize..40,
        pick in any::<prop::sample::Index>(),
        append in any::<bool>(),
    ) {
        let bars: Vec<Bar> = (0..len as i64)
            .map(|d| Bar::new(d * 86_400_000, 10.0, 11.0, 9.0, 10.0, 100).unwrap())
            .collect();
        let mut series = BarSeries::from_bars("TEST", Timeframe::Daily, bars).unwrap();
        let day = if append { len as i64 } else { pick.index(len) as i64 };
        let incoming = Bar::new(day * 86_400_000, 12.0, 13.0, 11.0, 12.0, 200).unwrap();

        series.merge(incoming, cap);
        prop_assert!(series.len() <= cap);
        prop_assert!(series.bars().windows(2).all(|w| w[0].timestamp < w[1].timestamp));
    }
}

// ── 4. Percentile monotonicity ───────────────────────────────────────

proptest! {
    #[test]
    fn higher_score_never_ranks_lower(scores in prop::collection::vec(-5.0..5.0_f64, 1..200)) {
        let scored: Vec<(String, f64)> = scores
            .iter()
            .enumerate()
            .map(|(i, s)| (format!("S{i:04}"), *s))
            .collect();
        let ranked = assign_percentiles(scored);

        for (a, rank_a) in &ranked {
            for (b, rank_b) in &ranked {
                if a.1 > b.1 {
                    prop_assert!(rank_a >= rank_b, "{} ({}) ranked below {} ({})", a.0, a.1, b.0, b.1);
                }
            }
        }
    }
}

// ── 5. Rank bounds ───────────────────────────────────────────────────

proptest! {
    #[test]
    fn ranks_within_bounds(total in 1usize..5_000) {
        prop_assert_eq!(percentile_rank(0, total), 99);
        for position in [0, total / 3, total / 2, total - 1] {
            let rank = percentile_rank(position, total);
            prop_assert!((1..=99).contains(&rank));
        }
    }
}
