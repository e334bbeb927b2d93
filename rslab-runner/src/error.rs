use crate::config::ConfigError;
use rslab_core::data::{FetchError, UniverseError};
use rslab_core::shard::StoreError;
use thiserror::Error;

/// Errors that end a run.
///
/// Per-symbol fetch failures never show up here; they are counted in the
/// run summary. A `Store` error means the index and storage disagree or
/// storage failed, and the run stops where it is.
#[derive(Debug, Error)]
pub enum RunError {
    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("provider error: {0}")]
    Provider(#[from] FetchError),

    #[error("universe error: {0}")]
    Universe(#[from] UniverseError),

    #[error("universe is empty")]
    EmptyUniverse,

    #[error("run cancelled after {shards_written} shard write(s); index timestamp not advanced")]
    Cancelled { shards_written: usize },

    #[error("write {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("serialize artifact: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("csv export: {0}")]
    Csv(#[from] csv::Error),
}
