//! Incremental updater: merge one new bar per symbol into the store.
//!
//! Each symbol moves through `Pending → Fetched → Merged` or ends in
//! `Failed`. Symbols are grouped by owning shard and every shard is read,
//! mutated and written back as one unit, so a shard is written at most once
//! per run. Per-symbol failures are counted; only store errors abort.
//!
//! The index's `last_updated` is advanced only after every shard write of
//! the run has completed. A cancelled or failed run leaves the shards it
//! finished durably written and the index timestamp behind them, which
//! `ShardIndex::stale_shards` reports.

use crate::error::RunError;
use crate::summary::UpdateSummary;
use chrono::NaiveDate;
use rayon::prelude::*;
use rslab_core::data::BarFetcher;
use rslab_core::domain::{Bar, MergeOutcome, Timeframe};
use rslab_core::shard::{ShardDescriptor, ShardIndex, ShardStore, ShardWrite, StoreError, UpdateType};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

const PROGRESS_EVERY: usize = 100;

/// Why a symbol ended in `Failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// No shard lists the symbol.
    NotIndexed,
    /// The provider has no bar for the target date.
    NoNewData,
    /// The provider failed (after its own retries).
    FetchFailed,
}

/// Per-symbol state within one run.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SymbolState {
    Pending,
    Fetched(Bar),
    Merged(MergeOutcome),
    Failed(FailureKind),
}

impl SymbolState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, SymbolState::Merged(_) | SymbolState::Failed(_))
    }

    fn tally(&self, summary: &mut UpdateSummary) {
        match self {
            SymbolState::Merged(MergeOutcome::Replaced { evicted }) => {
                summary.merged += 1;
                summary.replaced += 1;
                summary.evicted += evicted;
            }
            SymbolState::Merged(MergeOutcome::Appended { evicted }) => {
                summary.merged += 1;
                summary.appended += 1;
                summary.evicted += evicted;
            }
            SymbolState::Failed(FailureKind::NotIndexed) => summary.not_indexed += 1,
            SymbolState::Failed(FailureKind::NoNewData) => summary.no_new_data += 1,
            SymbolState::Failed(FailureKind::FetchFailed) => summary.fetch_failed += 1,
            SymbolState::Pending | SymbolState::Fetched(_) => {}
        }
    }
}

#[derive(Debug, Clone)]
pub struct UpdateOptions {
    /// Series the fetched bar is merged into.
    pub timeframe: Timeframe,
    /// Fan out across shards with rayon. Never splits a shard.
    pub parallel: bool,
    /// Checked between shards.
    pub cancel: Option<Arc<AtomicBool>>,
    /// Run the store consistency check before and after the batch.
    pub verify: bool,
}

impl Default for UpdateOptions {
    fn default() -> Self {
        Self {
            timeframe: Timeframe::Daily,
            parallel: false,
            cancel: None,
            verify: true,
        }
    }
}

impl UpdateOptions {
    pub fn with_timeframe(mut self, timeframe: Timeframe) -> Self {
        self.timeframe = timeframe;
        self
    }

    pub fn with_parallelism(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }

    pub fn with_cancel(mut self, cancel: Arc<AtomicBool>) -> Self {
        self.cancel = Some(cancel);
        self
    }

    pub fn with_verify(mut self, verify: bool) -> Self {
        self.verify = verify;
        self
    }

    fn cancelled(&self) -> bool {
        self.cancel
            .as_ref()
            .is_some_and(|flag| flag.load(Ordering::Relaxed))
    }
}

/// Result of processing one shard's symbols.
enum ShardOutcome {
    Done {
        summary: UpdateSummary,
        write: Option<ShardWrite>,
    },
    Cancelled,
}

pub struct IncrementalUpdater<'a> {
    store: &'a ShardStore,
    fetcher: &'a dyn BarFetcher,
    retention_cap: usize,
    options: UpdateOptions,
}

impl<'a> IncrementalUpdater<'a> {
    pub fn new(store: &'a ShardStore, fetcher: &'a dyn BarFetcher, retention_cap: usize) -> Self {
        Self {
            store,
            fetcher,
            retention_cap,
            options: UpdateOptions::default(),
        }
    }

    pub fn with_options(mut self, options: UpdateOptions) -> Self {
        self.options = options;
        self
    }

    /// Update every symbol in the index with its bar for `target`.
    pub fn update_all(
        &self,
        index: &mut ShardIndex,
        target: NaiveDate,
    ) -> Result<UpdateSummary, RunError> {
        let symbols = index.universe();
        self.update_symbols(index, &symbols, target)
    }

    /// Update the given symbols. Unknown symbols count as `not_indexed`.
    pub fn update_symbols(
        &self,
        index: &mut ShardIndex,
        symbols: &[String],
        target: NaiveDate,
    ) -> Result<UpdateSummary, RunError> {
        if self.options.verify {
            self.store.verify(index)?;
        }

        let mut summary = UpdateSummary::default();
        let mut groups: BTreeMap<usize, Vec<String>> = BTreeMap::new();
        let unique: BTreeSet<&String> = symbols.iter().collect();
        for symbol in unique {
            summary.symbols += 1;
            match self.store.locate(index, symbol) {
                Ok(id) => groups.entry(id).or_default().push(symbol.clone()),
                Err(StoreError::SymbolNotIndexed { .. }) => {
                    debug!(symbol = %symbol, "not indexed");
                    SymbolState::Failed(FailureKind::NotIndexed).tally(&mut summary);
                }
                Err(e) => return Err(e.into()),
            }
        }

        let work = groups
            .into_iter()
            .map(|(id, members)| {
                index
                    .descriptor(id)
                    .cloned()
                    .map(|d| (d, members))
                    .ok_or(StoreError::ShardNotFound { id })
            })
            .collect::<Result<Vec<_>, _>>()?;

        info!(
            symbols = summary.symbols,
            shards = work.len(),
            target = %target,
            timeframe = %self.options.timeframe,
            parallel = self.options.parallel,
            "starting incremental update"
        );

        let progress = AtomicUsize::new(0);
        let run = |(descriptor, members): &(ShardDescriptor, Vec<String>)| {
            if self.options.cancelled() {
                return Ok(ShardOutcome::Cancelled);
            }
            self.process_shard(descriptor, members, target, &progress)
        };

        let mut cancelled = false;
        let mut first_error: Option<StoreError> = None;
        if self.options.parallel {
            let outcomes: Vec<Result<ShardOutcome, StoreError>> = work.par_iter().map(run).collect();
            // Record every completed write, even if a sibling shard failed.
            for outcome in outcomes {
                match outcome {
                    Ok(outcome) => {
                        cancelled |= self.apply(index, outcome, &mut summary)?;
                    }
                    Err(e) => {
                        first_error.get_or_insert(e);
                    }
                }
            }
        } else {
            for item in &work {
                match run(item) {
                    Ok(outcome) => {
                        if self.apply(index, outcome, &mut summary)? {
                            cancelled = true;
                            break;
                        }
                    }
                    Err(e) => {
                        first_error = Some(e);
                        break;
                    }
                }
            }
        }

        if let Some(e) = first_error {
            warn!(shards_written = summary.shards_written, error = %e, "update aborted");
            return Err(e.into());
        }
        if cancelled {
            warn!(shards_written = summary.shards_written, "update cancelled");
            return Err(RunError::Cancelled {
                shards_written: summary.shards_written,
            });
        }

        index.update_type = UpdateType::DailyUpdate;
        self.store.write_index(index)?;
        if self.options.verify {
            self.store.verify(index)?;
        }

        info!(
            merged = summary.merged,
            failed = summary.failed(),
            shards_written = summary.shards_written,
            size_delta = summary.size_delta(),
            "incremental update complete"
        );
        Ok(summary)
    }

    /// Fold a shard outcome into the run. Returns true if the shard was cancelled.
    fn apply(
        &self,
        index: &mut ShardIndex,
        outcome: ShardOutcome,
        summary: &mut UpdateSummary,
    ) -> Result<bool, StoreError> {
        match outcome {
            ShardOutcome::Cancelled => Ok(true),
            ShardOutcome::Done {
                summary: shard_summary,
                write,
            } => {
                summary.absorb(&shard_summary);
                if let Some(write) = write {
                    self.store.record_write(index, &write)?;
                    summary.record_write(&write);
                }
                Ok(false)
            }
        }
    }

    /// Read one shard, merge a fetched bar into each member, write it back
    /// if anything merged.
    fn process_shard(
        &self,
        descriptor: &ShardDescriptor,
        members: &[String],
        target: NaiveDate,
        progress: &AtomicUsize,
    ) -> Result<ShardOutcome, StoreError> {
        let timeframe = self.options.timeframe;
        let mut shard = self.store.load_shard(descriptor)?;
        let mut summary = UpdateSummary::default();

        for symbol in members {
            let mut state = match self.fetcher.fetch_bar(symbol, timeframe, target) {
                Ok(bar) => SymbolState::Fetched(bar),
                Err(e) if e.is_no_data() => {
                    debug!(symbol = %symbol, date = %target, "no new data");
                    SymbolState::Failed(FailureKind::NoNewData)
                }
                Err(e) => {
                    warn!(symbol = %symbol, error = %e, "fetch failed");
                    SymbolState::Failed(FailureKind::FetchFailed)
                }
            };

            if let SymbolState::Fetched(bar) = state {
                let series = shard.series_mut(symbol, timeframe).ok_or_else(|| {
                    StoreError::Divergence {
                        id: descriptor.file_index,
                        reason: format!("indexed member '{symbol}' missing from shard"),
                    }
                })?;
                state = SymbolState::Merged(series.merge(bar, self.retention_cap));
            }

            debug_assert!(state.is_terminal());
            state.tally(&mut summary);

            let done = progress.fetch_add(1, Ordering::Relaxed) + 1;
            if done % PROGRESS_EVERY == 0 {
                info!(processed = done, "update progress");
            }
        }

        let write = if summary.merged > 0 {
            Some(self.store.put_shard(descriptor, &mut shard)?)
        } else {
            summary.shards_skipped += 1;
            None
        };
        Ok(ShardOutcome::Done { summary, write })
    }
}
