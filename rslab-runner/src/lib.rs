//! rslab runner — store maintenance and ranking orchestration.
//!
//! This crate builds on `rslab-core` to provide:
//! - `rslab.toml` configuration with validation
//! - Full rebuild of the sharded store from a universe
//! - Incremental daily updates with per-shard parallelism and cancellation
//! - Ranking runs that write the rankings artifact and optional CSV
//! - Run summaries for the CLI

pub mod config;
pub mod error;
pub mod ranking_run;
pub mod rebuild;
pub mod summary;
pub mod updater;

pub use config::{ConfigError, ProviderConfig, ProviderKind, RankingSection, RslabConfig, StoreConfig};
pub use error::RunError;
pub use ranking_run::{
    export_csv, load_daily_series, read_artifact, run_ranking, write_artifact, BenchmarkSource,
    RankingRun,
};
pub use rebuild::Rebuilder;
pub use summary::{format_size, format_size_delta, RebuildSummary, UpdateSummary};
pub use updater::{FailureKind, IncrementalUpdater, SymbolState, UpdateOptions};
