//! Shard index — the ledger of which shard holds which symbols.

use super::error::StoreError;
use super::planner::shard_filename;
use super::store::ShardWrite;
use crate::domain::Timeframe;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// How the store was last brought up to date.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdateType {
    #[default]
    FullRebuild,
    DailyUpdate,
}

/// One shard's entry in the index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShardDescriptor {
    pub filename: String,
    pub file_index: usize,
    pub range_start: String,
    pub range_end: String,
    pub symbol_count: usize,
    /// Bytes of the persisted shard as of its last write (0 before the first write).
    #[serde(default)]
    pub file_size: u64,
    #[serde(default)]
    pub last_updated: Option<DateTime<Utc>>,
    /// BLAKE3 of the persisted shard bytes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_hash: Option<String>,
    /// Sorted member symbols.
    pub symbols: Vec<String>,
}

impl ShardDescriptor {
    /// Descriptor for a not-yet-written shard. `symbols` must be sorted and non-empty.
    pub fn new(file_index: usize, symbols: Vec<String>) -> Self {
        Self {
            filename: shard_filename(file_index),
            file_index,
            range_start: symbols.first().cloned().unwrap_or_default(),
            range_end: symbols.last().cloned().unwrap_or_default(),
            symbol_count: symbols.len(),
            file_size: 0,
            last_updated: None,
            data_hash: None,
            symbols,
        }
    }

    /// Range pre-check, then exact membership.
    pub fn contains(&self, symbol: &str) -> bool {
        symbol >= self.range_start.as_str()
            && symbol <= self.range_end.as_str()
            && self.symbols.binary_search_by(|s| s.as_str().cmp(symbol)).is_ok()
    }
}

/// Metadata ledger for the whole store.
///
/// Single source of truth for "which shard holds symbol X". Descriptor member
/// lists are disjoint and together form the universe.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShardIndex {
    pub last_updated: DateTime<Utc>,
    #[serde(default)]
    pub update_type: UpdateType,
    pub total_symbols: usize,
    pub total_files: usize,
    pub timeframes: Vec<Timeframe>,
    pub files: Vec<ShardDescriptor>,
}

impl ShardIndex {
    /// Index for a freshly planned store. `last_updated` stays at the epoch
    /// until the store persists it.
    pub fn from_plan(files: Vec<ShardDescriptor>, timeframes: Vec<Timeframe>) -> Self {
        let mut index = Self {
            last_updated: DateTime::<Utc>::default(),
            update_type: UpdateType::FullRebuild,
            total_symbols: 0,
            total_files: 0,
            timeframes,
            files,
        };
        index.refresh_totals();
        index
    }

    pub fn refresh_totals(&mut self) {
        self.total_files = self.files.len();
        self.total_symbols = self.files.iter().map(|f| f.symbols.len()).sum();
    }

    pub fn descriptor(&self, id: usize) -> Option<&ShardDescriptor> {
        self.files.iter().find(|d| d.file_index == id)
    }

    fn descriptor_mut(&mut self, id: usize) -> Option<&mut ShardDescriptor> {
        self.files.iter_mut().find(|d| d.file_index == id)
    }

    /// Shard id holding `symbol`.
    pub fn locate(&self, symbol: &str) -> Result<usize, StoreError> {
        self.files
            .iter()
            .find(|d| d.contains(symbol))
            .map(|d| d.file_index)
            .ok_or_else(|| StoreError::SymbolNotIndexed {
                symbol: symbol.to_string(),
            })
    }

    /// All indexed symbols, sorted.
    pub fn universe(&self) -> Vec<String> {
        let mut all: Vec<String> = self
            .files
            .iter()
            .flat_map(|d| d.symbols.iter().cloned())
            .collect();
        all.sort();
        all
    }

    pub fn total_bytes(&self) -> u64 {
        self.files.iter().map(|d| d.file_size).sum()
    }

    /// Fold a completed shard write into its descriptor.
    ///
    /// The index's own `last_updated` is left alone; it only advances when
    /// the whole run is persisted.
    pub fn apply_write(&mut self, write: &ShardWrite) -> Result<(), StoreError> {
        let descriptor = self
            .descriptor_mut(write.file_index)
            .ok_or(StoreError::ShardNotFound {
                id: write.file_index,
            })?;
        descriptor.file_size = write.file_size;
        descriptor.data_hash = Some(write.data_hash.clone());
        descriptor.last_updated = Some(write.written_at);
        Ok(())
    }

    /// Point shard `id` at a different storage key holding the same bytes.
    pub fn rename_shard(&mut self, id: usize, filename: String) -> Result<(), StoreError> {
        let descriptor = self
            .descriptor_mut(id)
            .ok_or(StoreError::ShardNotFound { id })?;
        descriptor.filename = filename;
        Ok(())
    }

    /// Shards written after the index was last persisted as a whole.
    ///
    /// Non-empty after a run that was aborted between shard writes.
    pub fn stale_shards(&self) -> Vec<usize> {
        self.files
            .iter()
            .filter(|d| d.last_updated.is_some_and(|t| t > self.last_updated))
            .map(|d| d.file_index)
            .collect()
    }

    /// Structural checks: partition property, consistent counts and ranges.
    pub fn validate(&self) -> Result<(), StoreError> {
        if self.total_files != self.files.len() {
            return Err(StoreError::InvalidIndex(format!(
                "total_files is {} but {} descriptors are listed",
                self.total_files,
                self.files.len()
            )));
        }

        let mut seen_symbols: HashSet<&str> = HashSet::new();
        let mut seen_ids: HashSet<usize> = HashSet::new();
        let mut member_total = 0;

        for d in &self.files {
            if !seen_ids.insert(d.file_index) {
                return Err(StoreError::InvalidIndex(format!(
                    "shard id {} listed twice",
                    d.file_index
                )));
            }
            if d.symbols.is_empty() {
                return Err(StoreError::InvalidIndex(format!(
                    "shard {} has no members",
                    d.file_index
                )));
            }
            if d.symbol_count != d.symbols.len() {
                return Err(StoreError::InvalidIndex(format!(
                    "shard {} records {} symbols but lists {}",
                    d.file_index,
                    d.symbol_count,
                    d.symbols.len()
                )));
            }
            if d.symbols.windows(2).any(|w| w[0] >= w[1]) {
                return Err(StoreError::InvalidIndex(format!(
                    "shard {} member list is not sorted and unique",
                    d.file_index
                )));
            }
            if d.symbols.first() != Some(&d.range_start) || d.symbols.last() != Some(&d.range_end)
            {
                return Err(StoreError::InvalidIndex(format!(
                    "shard {} range [{}, {}] does not match its members",
                    d.file_index, d.range_start, d.range_end
                )));
            }
            for symbol in &d.symbols {
                if !seen_symbols.insert(symbol) {
                    return Err(StoreError::InvalidIndex(format!(
                        "symbol '{symbol}' appears in more than one shard"
                    )));
                }
            }
            member_total += d.symbols.len();
        }

        if member_total != self.total_symbols {
            return Err(StoreError::InvalidIndex(format!(
                "total_symbols is {} but shards hold {member_total}",
                self.total_symbols
            )));
        }
        Ok(())
    }
}
