//! Full rebuild: plan the universe into shards and fetch every series from scratch.

use crate::config::StoreConfig;
use crate::error::RunError;
use crate::summary::RebuildSummary;
use chrono::NaiveDate;
use rayon::prelude::*;
use rslab_core::data::{BarFetcher, FetchError, Universe};
use rslab_core::domain::{BarSeries, Timeframe};
use rslab_core::shard::{
    staged_filename, Shard, ShardDescriptor, ShardIndex, ShardPlanner, ShardStore, ShardWrite,
    StoreError, UpdateType,
};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

const PROGRESS_EVERY: usize = 100;

/// Rebuilds the whole store for a universe.
///
/// Fetch failures are counted per symbol and timeframe; the symbol keeps an
/// empty series so the index still partitions the full universe.
pub struct Rebuilder<'a> {
    store: &'a ShardStore,
    fetcher: &'a dyn BarFetcher,
    config: StoreConfig,
    parallel: bool,
    cancel: Option<Arc<AtomicBool>>,
}

impl<'a> Rebuilder<'a> {
    pub fn new(store: &'a ShardStore, fetcher: &'a dyn BarFetcher, config: StoreConfig) -> Self {
        Self {
            store,
            fetcher,
            config,
            parallel: false,
            cancel: None,
        }
    }

    /// Enables or disables parallel execution across shards.
    pub fn with_parallelism(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }

    pub fn with_cancel(mut self, cancel: Arc<AtomicBool>) -> Self {
        self.cancel = Some(cancel);
        self
    }

    fn cancelled(&self) -> bool {
        self.cancel
            .as_ref()
            .is_some_and(|flag| flag.load(Ordering::Relaxed))
    }

    /// Rebuild every shard with bars ending at `end`, persist the index,
    /// remove shard files the new plan no longer uses, then verify.
    ///
    /// Shards are written under keys the live index does not reference, so
    /// an aborted rebuild leaves the previous store readable and consistent.
    /// The new index is persisted once every shard is written; staged shards
    /// are then promoted to their canonical keys.
    pub fn rebuild(&self, universe: &Universe, end: NaiveDate) -> Result<RebuildSummary, RunError> {
        if universe.is_empty() {
            return Err(RunError::EmptyUniverse);
        }

        let plan = ShardPlanner::new(self.config.shard_size).plan(universe.symbols());
        let mut index = ShardIndex::from_plan(plan, self.config.timeframes.clone());
        let live = self.live_filenames()?;
        for descriptor in &mut index.files {
            if live.contains(&descriptor.filename) {
                descriptor.filename = staged_filename(descriptor.file_index);
            }
        }
        let descriptors = index.files.clone();

        info!(
            symbols = universe.len(),
            shards = descriptors.len(),
            end = %end,
            parallel = self.parallel,
            provider = self.fetcher.name(),
            "starting full rebuild"
        );

        let progress = AtomicUsize::new(0);
        let build = |descriptor: &ShardDescriptor| -> Result<Option<(RebuildSummary, ShardWrite)>, StoreError> {
            if self.cancelled() {
                return Ok(None);
            }
            self.build_shard(descriptor, end, &progress).map(Some)
        };

        let outcomes: Vec<Result<Option<(RebuildSummary, ShardWrite)>, StoreError>> = if self.parallel {
            descriptors.par_iter().map(build).collect()
        } else {
            let mut outcomes = Vec::with_capacity(descriptors.len());
            for descriptor in &descriptors {
                let outcome = build(descriptor);
                let stop = !matches!(outcome, Ok(Some(_)));
                outcomes.push(outcome);
                if stop {
                    break;
                }
            }
            outcomes
        };

        let mut summary = RebuildSummary {
            symbols: universe.len(),
            ..RebuildSummary::default()
        };
        let mut cancelled = false;
        let mut first_error = None;
        for outcome in outcomes {
            match outcome {
                Ok(Some((shard_summary, write))) => {
                    index.apply_write(&write)?;
                    summary.shards_written += 1;
                    summary.symbols_with_data += shard_summary.symbols_with_data;
                    summary.no_data += shard_summary.no_data;
                    summary.fetch_failed += shard_summary.fetch_failed;
                    summary.bars_stored += shard_summary.bars_stored;
                }
                Ok(None) => cancelled = true,
                Err(e) => {
                    first_error.get_or_insert(e);
                }
            }
        }
        if let Some(e) = first_error {
            warn!(shards_written = summary.shards_written, error = %e, "rebuild aborted");
            return Err(e.into());
        }
        if cancelled {
            warn!(shards_written = summary.shards_written, "rebuild cancelled");
            return Err(RunError::Cancelled {
                shards_written: summary.shards_written,
            });
        }

        index.update_type = UpdateType::FullRebuild;
        self.store.write_index(&mut index)?;
        let mut promoted = 0;
        for descriptor in &descriptors {
            if self.store.promote(&mut index, descriptor.file_index)? {
                promoted += 1;
            }
        }
        debug!(promoted, "staged shards promoted");
        summary.orphans_removed = self.store.prune_orphans(&index)?.len();
        let report = self.store.verify(&index)?;
        summary.total_bytes = report.total_bytes;

        info!(
            symbols = summary.symbols,
            with_data = summary.symbols_with_data,
            bars = summary.bars_stored,
            shards = summary.shards_written,
            bytes = summary.total_bytes,
            "full rebuild complete"
        );
        Ok(summary)
    }

    /// Storage keys the current index references. An unreadable index
    /// references nothing.
    fn live_filenames(&self) -> Result<HashSet<String>, StoreError> {
        if !self.store.has_index()? {
            return Ok(HashSet::new());
        }
        match self.store.read_index() {
            Ok(live) => Ok(live.files.into_iter().map(|d| d.filename).collect()),
            Err(e) => {
                warn!(error = %e, "existing index unreadable; rebuilding over it");
                Ok(HashSet::new())
            }
        }
    }

    fn build_shard(
        &self,
        descriptor: &ShardDescriptor,
        end: NaiveDate,
        progress: &AtomicUsize,
    ) -> Result<(RebuildSummary, ShardWrite), StoreError> {
        let mut shard = Shard::empty(descriptor, &self.config.timeframes);
        let mut summary = RebuildSummary::default();

        for symbol in &descriptor.symbols {
            let mut has_data = false;
            for &timeframe in &self.config.timeframes {
                if let Some(series) = self.fetch_series(symbol, timeframe, end, &mut summary) {
                    has_data |= !series.is_empty();
                    summary.bars_stored += series.len();
                    shard.set_series(series);
                }
            }
            if has_data {
                summary.symbols_with_data += 1;
            }

            let done = progress.fetch_add(1, Ordering::Relaxed) + 1;
            if done % PROGRESS_EVERY == 0 {
                info!(processed = done, "rebuild progress");
            }
        }

        let write = self.store.put_shard(descriptor, &mut shard)?;
        Ok((summary, write))
    }

    /// Fetch one series over its lookback window. `None` leaves the empty series in place.
    fn fetch_series(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        end: NaiveDate,
        summary: &mut RebuildSummary,
    ) -> Option<BarSeries> {
        let start = timeframe.window_start(end);
        let bars = match self.fetcher.fetch(symbol, timeframe, start, end) {
            Ok(bars) => bars,
            Err(FetchError::NoData { .. }) => {
                debug!(symbol, timeframe = %timeframe, "no data");
                summary.no_data += 1;
                return None;
            }
            Err(e) => {
                warn!(symbol, timeframe = %timeframe, error = %e, "fetch failed");
                summary.fetch_failed += 1;
                return None;
            }
        };
        match BarSeries::normalized(symbol, timeframe, bars, self.config.retention_cap) {
            Ok(series) => Some(series),
            Err(e) => {
                warn!(symbol, timeframe = %timeframe, error = %e, "provider returned invalid bars");
                summary.fetch_failed += 1;
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rslab_core::data::SyntheticProvider;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn config(shard_size: usize) -> StoreConfig {
        StoreConfig {
            shard_size,
            ..StoreConfig::default()
        }
    }

    #[test]
    fn rebuild_partitions_and_fills_series() {
        let store = ShardStore::in_memory();
        let provider = SyntheticProvider::new();
        let universe = Universe::from_symbols(["MSFT", "AAPL", "NVDA"]);

        let summary = Rebuilder::new(&store, &provider, config(2))
            .rebuild(&universe, date(2024, 6, 28))
            .unwrap();
        assert_eq!(summary.symbols, 3);
        assert_eq!(summary.shards_written, 2);
        assert_eq!(summary.symbols_with_data, 3);
        assert_eq!(summary.no_data, 0);

        let index = store.read_index().unwrap();
        assert_eq!(index.update_type, UpdateType::FullRebuild);
        assert_eq!(index.universe(), vec!["AAPL", "MSFT", "NVDA"]);
        assert!(index.stale_shards().is_empty());

        let shard = store.read_shard(&index, 0).unwrap();
        let daily = shard.series("AAPL", Timeframe::Daily).unwrap();
        assert!(daily.len() <= 400);
        assert!(daily.len() > 250);
        assert!(!shard.series("AAPL", Timeframe::Weekly).unwrap().is_empty());
    }

    #[test]
    fn missing_symbols_keep_empty_series() {
        let store = ShardStore::in_memory();
        let provider = SyntheticProvider::new()
            .with_missing(["DEAD"])
            .with_failing(["FLAKY"]);
        let universe = Universe::from_symbols(["AAPL", "DEAD", "FLAKY"]);

        let summary = Rebuilder::new(&store, &provider, config(50))
            .rebuild(&universe, date(2024, 6, 28))
            .unwrap();
        assert_eq!(summary.symbols_with_data, 1);
        assert_eq!(summary.no_data, 2);
        assert_eq!(summary.fetch_failed, 2);

        let index = store.read_index().unwrap();
        assert_eq!(index.total_symbols, 3);
        let shard = store.read_shard(&index, 0).unwrap();
        assert!(shard.series("DEAD", Timeframe::Daily).unwrap().is_empty());
    }

    #[test]
    fn shrinking_universe_prunes_orphans() {
        let store = ShardStore::in_memory();
        let provider = SyntheticProvider::new();
        let end = date(2024, 6, 28);

        Rebuilder::new(&store, &provider, config(1))
            .rebuild(&Universe::from_symbols(["A", "B", "C"]), end)
            .unwrap();
        let summary = Rebuilder::new(&store, &provider, config(1))
            .rebuild(&Universe::from_symbols(["A"]), end)
            .unwrap();
        assert_eq!(summary.orphans_removed, 2);
        assert_eq!(store.read_index().unwrap().total_files, 1);
    }

    #[test]
    fn parallel_rebuild_matches_sequential() {
        let universe = Universe::from_symbols(["A", "B", "C", "D", "E"]);
        let provider = SyntheticProvider::new();
        let end = date(2024, 6, 28);

        let seq_store = ShardStore::in_memory();
        let seq = Rebuilder::new(&seq_store, &provider, config(2))
            .rebuild(&universe, end)
            .unwrap();
        let par_store = ShardStore::in_memory();
        let par = Rebuilder::new(&par_store, &provider, config(2))
            .with_parallelism(true)
            .rebuild(&universe, end)
            .unwrap();

        assert_eq!(seq.bars_stored, par.bars_stored);
        assert_eq!(seq.shards_written, par.shards_written);
        let seq_index = seq_store.read_index().unwrap();
        let par_index = par_store.read_index().unwrap();
        for id in 0..3 {
            let a = seq_store.read_shard(&seq_index, id).unwrap();
            let b = par_store.read_shard(&par_index, id).unwrap();
            assert_eq!(a.members(), b.members());
            for symbol in a.members() {
                assert_eq!(
                    a.series(&symbol, Timeframe::Daily),
                    b.series(&symbol, Timeframe::Daily)
                );
            }
        }
    }

    #[test]
    fn empty_universe_is_rejected() {
        let store = ShardStore::in_memory();
        let provider = SyntheticProvider::new();
        let err = Rebuilder::new(&store, &provider, config(50))
            .rebuild(&Universe::from_symbols(Vec::<String>::new()), date(2024, 6, 28))
            .unwrap_err();
        assert!(matches!(err, RunError::EmptyUniverse));
        assert!(!store.has_index().unwrap());
    }

    /// Raises the cancel flag on its first fetch.
    struct CancelAfterFirst {
        inner: SyntheticProvider,
        flag: Arc<AtomicBool>,
    }

    impl BarFetcher for CancelAfterFirst {
        fn name(&self) -> &str {
            "cancel-after-first"
        }

        fn fetch(
            &self,
            symbol: &str,
            timeframe: Timeframe,
            start: NaiveDate,
            end: NaiveDate,
        ) -> Result<Vec<rslab_core::domain::Bar>, FetchError> {
            self.flag.store(true, Ordering::SeqCst);
            self.inner.fetch(symbol, timeframe, start, end)
        }
    }

    #[test]
    fn aborted_rebuild_leaves_previous_store_consistent() {
        let store = ShardStore::in_memory();
        let provider = SyntheticProvider::new();
        let universe = Universe::from_symbols(["A", "B"]);
        Rebuilder::new(&store, &provider, config(1))
            .rebuild(&universe, date(2024, 6, 21))
            .unwrap();
        let before = store.read_index().unwrap();

        let flag = Arc::new(AtomicBool::new(false));
        let fetcher = CancelAfterFirst {
            inner: SyntheticProvider::new(),
            flag: Arc::clone(&flag),
        };
        let err = Rebuilder::new(&store, &fetcher, config(1))
            .with_cancel(flag)
            .rebuild(&universe, date(2024, 6, 28))
            .unwrap_err();
        assert!(matches!(err, RunError::Cancelled { shards_written: 1 }));

        let index = store.read_index().unwrap();
        assert_eq!(index, before);
        assert_eq!(store.verify(&index).unwrap().shards_checked, 2);

        // The old store still takes updates.
        let mut index = index;
        crate::IncrementalUpdater::new(&store, &provider, 400)
            .update_all(&mut index, date(2024, 6, 24))
            .unwrap();

        // A clean rebuild afterwards ends on canonical keys only.
        Rebuilder::new(&store, &provider, config(1))
            .rebuild(&universe, date(2024, 6, 28))
            .unwrap();
        let index = store.read_index().unwrap();
        assert_eq!(
            store.backend().keys().unwrap(),
            vec!["ohlc_000.json", "ohlc_001.json", "ohlc_index.json"]
        );
        assert!(index.files.iter().all(|d| !d.filename.contains("staged")));
        store.verify(&index).unwrap();
    }

    #[test]
    fn rebuild_after_interrupted_promotion_writes_canonical_keys() {
        let store = ShardStore::in_memory();
        let provider = SyntheticProvider::new();
        let universe = Universe::from_symbols(["A", "B"]);
        Rebuilder::new(&store, &provider, config(1))
            .rebuild(&universe, date(2024, 6, 28))
            .unwrap();

        // Leave shard 1 live under its staging key.
        let mut index = store.read_index().unwrap();
        let bytes = store.backend().get("ohlc_001.json").unwrap().unwrap();
        store.backend().put("ohlc_001.staged.json", &bytes).unwrap();
        index.rename_shard(1, staged_filename(1)).unwrap();
        store.write_index(&mut index).unwrap();
        store.backend().delete("ohlc_001.json").unwrap();

        Rebuilder::new(&store, &provider, config(1))
            .rebuild(&universe, date(2024, 6, 28))
            .unwrap();
        let index = store.read_index().unwrap();
        assert_eq!(index.files[1].filename, "ohlc_001.json");
        assert_eq!(
            store.backend().keys().unwrap(),
            vec!["ohlc_000.json", "ohlc_001.json", "ohlc_index.json"]
        );
        store.verify(&index).unwrap();
    }

    #[test]
    fn cancelled_rebuild_writes_no_index() {
        let store = ShardStore::in_memory();
        let provider = SyntheticProvider::new();
        let err = Rebuilder::new(&store, &provider, config(1))
            .with_cancel(Arc::new(AtomicBool::new(true)))
            .rebuild(&Universe::from_symbols(["A", "B"]), date(2024, 6, 28))
            .unwrap_err();
        assert!(matches!(err, RunError::Cancelled { shards_written: 0 }));
        assert!(!store.has_index().unwrap());
    }
}
