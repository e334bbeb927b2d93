use crate::domain::BarError;
use thiserror::Error;

/// Errors from the shard store and index.
///
/// `SymbolNotIndexed` is a per-symbol condition the updater counts and moves
/// past. Every other variant means the index and storage disagree or storage
/// itself failed, and aborts the run.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("shard {id} is missing from the index or from storage")]
    ShardNotFound { id: usize },

    #[error("symbol '{symbol}' is not in any shard")]
    SymbolNotIndexed { symbol: String },

    #[error("shard {id} diverges from the index: {reason}")]
    Divergence { id: usize, reason: String },

    #[error("invalid index: {0}")]
    InvalidIndex(String),

    #[error("no index in storage — run a full rebuild first")]
    IndexMissing,

    #[error("storage I/O on '{key}': {source}")]
    Io {
        key: String,
        #[source]
        source: std::io::Error,
    },

    #[error("serialization of '{key}': {source}")]
    Serialization {
        key: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("corrupt series for '{symbol}' in '{key}': {source}")]
    CorruptSeries {
        key: String,
        symbol: String,
        #[source]
        source: BarError,
    },
}

impl StoreError {
    /// True for conditions that must abort a batch run.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, StoreError::SymbolNotIndexed { .. })
    }
}
