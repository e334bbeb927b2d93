//! Shard store — the only component that reads or writes shard contents and
//! the index.
//!
//! Layout under the backend:
//! - `ohlc_index.json` — the [`ShardIndex`]
//! - `ohlc_NNN.json` — one [`Shard`] per index descriptor
//! - `ohlc_NNN.staged.json` — a rebuild's copy of shard NNN while the live
//!   index still references `ohlc_NNN.json`
//!
//! Every shard write refreshes that shard's descriptor (size, hash, time)
//! and re-persists the index, but leaves the index's own `last_updated`
//! untouched. Only [`ShardStore::write_index`] advances it, once a run has
//! finished all of its shard writes.

use super::backend::{FsBackend, MemoryBackend, ShardBackend};
use super::contents::Shard;
use super::error::StoreError;
use super::index::{ShardDescriptor, ShardIndex};
use super::planner::shard_filename;
use chrono::{DateTime, Utc};
use std::path::PathBuf;
use tracing::{debug, info};

/// Storage key of the index.
pub const INDEX_KEY: &str = "ohlc_index.json";

const SHARD_KEY_PREFIX: &str = "ohlc_";

/// Record of one completed shard write.
#[derive(Debug, Clone, PartialEq)]
pub struct ShardWrite {
    pub file_index: usize,
    pub filename: String,
    pub previous_size: u64,
    pub file_size: u64,
    pub data_hash: String,
    pub written_at: DateTime<Utc>,
}

impl ShardWrite {
    pub fn size_delta(&self) -> i64 {
        self.file_size as i64 - self.previous_size as i64
    }
}

/// Outcome of a full consistency check.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VerifyReport {
    pub shards_checked: usize,
    pub symbols_checked: usize,
    pub total_bytes: u64,
    /// Shards written after the index was last persisted (an interrupted run).
    pub stale_shards: Vec<usize>,
}

pub struct ShardStore {
    backend: Box<dyn ShardBackend>,
}

impl ShardStore {
    pub fn new(backend: impl ShardBackend + 'static) -> Self {
        Self {
            backend: Box::new(backend),
        }
    }

    /// Store backed by JSON files in `dir`.
    pub fn open_dir(dir: impl Into<PathBuf>) -> Self {
        Self::new(FsBackend::new(dir))
    }

    pub fn in_memory() -> Self {
        Self::new(MemoryBackend::new())
    }

    pub fn backend(&self) -> &dyn ShardBackend {
        self.backend.as_ref()
    }

    pub fn has_index(&self) -> Result<bool, StoreError> {
        Ok(self.backend.get(INDEX_KEY)?.is_some())
    }

    pub fn read_index(&self) -> Result<ShardIndex, StoreError> {
        let bytes = self.backend.get(INDEX_KEY)?.ok_or(StoreError::IndexMissing)?;
        serde_json::from_slice(&bytes).map_err(|source| StoreError::Serialization {
            key: INDEX_KEY.to_string(),
            source,
        })
    }

    /// Persist the index as the completion of a run: validates it, refreshes
    /// totals and advances `last_updated`. Returns the index size in bytes.
    pub fn write_index(&self, index: &mut ShardIndex) -> Result<u64, StoreError> {
        index.refresh_totals();
        index.validate()?;
        index.last_updated = Utc::now();
        let size = self.persist_index(index)?;
        info!(
            shards = index.total_files,
            symbols = index.total_symbols,
            bytes = size,
            "index written"
        );
        Ok(size)
    }

    fn persist_index(&self, index: &ShardIndex) -> Result<u64, StoreError> {
        let bytes = serde_json::to_vec_pretty(index).map_err(|source| StoreError::Serialization {
            key: INDEX_KEY.to_string(),
            source,
        })?;
        self.backend.put(INDEX_KEY, &bytes)?;
        Ok(bytes.len() as u64)
    }

    /// Shard id owning `symbol`.
    pub fn locate(&self, index: &ShardIndex, symbol: &str) -> Result<usize, StoreError> {
        index.locate(symbol)
    }

    /// Read shard `id`. Fails if the index does not list it or storage lacks it.
    pub fn read_shard(&self, index: &ShardIndex, id: usize) -> Result<Shard, StoreError> {
        let descriptor = index.descriptor(id).ok_or(StoreError::ShardNotFound { id })?;
        self.load_shard(descriptor)
    }

    /// Read the shard a descriptor points at and check it against the descriptor.
    pub fn load_shard(&self, descriptor: &ShardDescriptor) -> Result<Shard, StoreError> {
        let id = descriptor.file_index;
        let bytes = self
            .backend
            .get(&descriptor.filename)?
            .ok_or(StoreError::ShardNotFound { id })?;
        let shard = Shard::from_bytes(&descriptor.filename, &bytes)?;
        check_members(descriptor, &shard)?;
        Ok(shard)
    }

    /// Persist a whole shard, then record the write in the index.
    ///
    /// The backend replaces the shard atomically; on failure the previous
    /// version stays readable and the index is not touched.
    pub fn write_shard(
        &self,
        index: &mut ShardIndex,
        shard: &mut Shard,
    ) -> Result<ShardWrite, StoreError> {
        let descriptor = index
            .descriptor(shard.file_index)
            .ok_or(StoreError::ShardNotFound {
                id: shard.file_index,
            })?;
        let write = self.put_shard(descriptor, shard)?;
        self.record_write(index, &write)?;
        Ok(write)
    }

    /// Persist a shard without touching the index. Parallel runs call this
    /// from worker threads and hand the result to [`ShardStore::record_write`]
    /// on the thread that owns the index.
    pub fn put_shard(
        &self,
        descriptor: &ShardDescriptor,
        shard: &mut Shard,
    ) -> Result<ShardWrite, StoreError> {
        check_members(descriptor, shard)?;

        let written_at = Utc::now();
        let previous_last_updated = shard.last_updated.replace(written_at);
        let bytes = match shard.to_bytes() {
            Ok(bytes) => bytes,
            Err(source) => {
                shard.last_updated = previous_last_updated;
                return Err(StoreError::Serialization {
                    key: descriptor.filename.clone(),
                    source,
                });
            }
        };
        if let Err(e) = self.backend.put(&descriptor.filename, &bytes) {
            shard.last_updated = previous_last_updated;
            return Err(e);
        }

        let write = ShardWrite {
            file_index: descriptor.file_index,
            filename: descriptor.filename.clone(),
            previous_size: descriptor.file_size,
            file_size: bytes.len() as u64,
            data_hash: blake3::hash(&bytes).to_hex().to_string(),
            written_at,
        };
        debug!(
            shard = write.file_index,
            bytes = write.file_size,
            delta = write.size_delta(),
            "shard written"
        );
        Ok(write)
    }

    /// Fold a completed write into the index and persist it, leaving the
    /// index's own `last_updated` where it was.
    pub fn record_write(&self, index: &mut ShardIndex, write: &ShardWrite) -> Result<(), StoreError> {
        index.apply_write(write)?;
        self.persist_index(index)?;
        Ok(())
    }

    /// Move shard `id` from a staging key to its canonical key.
    ///
    /// The canonical copy is written first, then the index is re-pointed and
    /// persisted, then the staging key is deleted. Storage matches the
    /// persisted index after each step. Returns `false` when the shard
    /// already lives under its canonical key.
    pub fn promote(&self, index: &mut ShardIndex, id: usize) -> Result<bool, StoreError> {
        let descriptor = index.descriptor(id).ok_or(StoreError::ShardNotFound { id })?;
        let canonical = shard_filename(id);
        if descriptor.filename == canonical {
            return Ok(false);
        }
        let staged = descriptor.filename.clone();
        let bytes = self
            .backend
            .get(&staged)?
            .ok_or(StoreError::ShardNotFound { id })?;
        self.backend.put(&canonical, &bytes)?;

        index.rename_shard(id, canonical.clone())?;
        self.persist_index(index)?;
        self.backend.delete(&staged)?;
        debug!(shard = id, from = %staged, to = %canonical, "shard promoted");
        Ok(true)
    }

    /// Check that the index is a valid partition and every shard it lists
    /// exists in storage with the same members, size and hash.
    pub fn verify(&self, index: &ShardIndex) -> Result<VerifyReport, StoreError> {
        index.validate()?;

        let mut report = VerifyReport {
            stale_shards: index.stale_shards(),
            ..VerifyReport::default()
        };

        for descriptor in &index.files {
            let id = descriptor.file_index;
            let bytes = self
                .backend
                .get(&descriptor.filename)?
                .ok_or(StoreError::ShardNotFound { id })?;
            let shard = Shard::from_bytes(&descriptor.filename, &bytes)?;
            check_members(descriptor, &shard)?;

            if let Some(expected) = &descriptor.data_hash {
                if bytes.len() as u64 != descriptor.file_size {
                    return Err(StoreError::Divergence {
                        id,
                        reason: format!(
                            "index records {} bytes, storage holds {}",
                            descriptor.file_size,
                            bytes.len()
                        ),
                    });
                }
                if blake3::hash(&bytes).to_hex().as_str() != expected {
                    return Err(StoreError::Divergence {
                        id,
                        reason: "content hash does not match the index".into(),
                    });
                }
            }

            report.shards_checked += 1;
            report.symbols_checked += descriptor.symbols.len();
            report.total_bytes += bytes.len() as u64;
        }

        Ok(report)
    }

    /// Delete shard files the index no longer references (after a rebuild
    /// over a smaller universe). Returns the removed keys.
    pub fn prune_orphans(&self, index: &ShardIndex) -> Result<Vec<String>, StoreError> {
        let mut removed = Vec::new();
        for key in self.backend.keys()? {
            if key == INDEX_KEY || !key.starts_with(SHARD_KEY_PREFIX) {
                continue;
            }
            if index.files.iter().any(|d| d.filename == key) {
                continue;
            }
            self.backend.delete(&key)?;
            info!(key = %key, "removed orphaned shard");
            removed.push(key);
        }
        Ok(removed)
    }
}

fn check_members(descriptor: &ShardDescriptor, shard: &Shard) -> Result<(), StoreError> {
    let id = descriptor.file_index;
    if shard.file_index != id {
        return Err(StoreError::Divergence {
            id,
            reason: format!("stored shard reports file_index {}", shard.file_index),
        });
    }
    let members = shard.members();
    if members != descriptor.symbols {
        return Err(StoreError::Divergence {
            id,
            reason: format!(
                "index lists {} members, storage holds {}",
                descriptor.symbols.len(),
                members.len()
            ),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Bar, Timeframe};
    use crate::shard::ShardPlanner;

    fn planned(symbols: &[&str], size: usize) -> ShardIndex {
        let universe: Vec<String> = symbols.iter().map(|s| s.to_string()).collect();
        ShardIndex::from_plan(
            ShardPlanner::new(size).plan(&universe),
            vec![Timeframe::Daily],
        )
    }

    fn write_all(store: &ShardStore, index: &mut ShardIndex) {
        let descriptors = index.files.clone();
        for d in &descriptors {
            let mut shard = Shard::empty(d, &[Timeframe::Daily]);
            store.write_shard(index, &mut shard).unwrap();
        }
        store.write_index(index).unwrap();
    }

    #[test]
    fn write_then_read_roundtrip() {
        let store = ShardStore::in_memory();
        let mut index = planned(&["AAPL", "MSFT", "NVDA"], 2);
        write_all(&store, &mut index);

        let mut shard = store.read_shard(&index, 0).unwrap();
        shard
            .series_mut("AAPL", Timeframe::Daily)
            .unwrap()
            .merge(Bar::new(1, 1.0, 1.0, 1.0, 1.0, 1).unwrap(), 400);
        let write = store.write_shard(&mut index, &mut shard).unwrap();
        assert!(write.size_delta() > 0);

        let reread = store.read_shard(&index, 0).unwrap();
        assert_eq!(reread.series("AAPL", Timeframe::Daily).unwrap().len(), 1);
        assert_eq!(store.read_index().unwrap().files[0].file_size, write.file_size);
    }

    #[test]
    fn read_unknown_id_is_shard_not_found() {
        let store = ShardStore::in_memory();
        let mut index = planned(&["AAPL"], 2);
        write_all(&store, &mut index);
        assert!(matches!(
            store.read_shard(&index, 9),
            Err(StoreError::ShardNotFound { id: 9 })
        ));
    }

    #[test]
    fn missing_file_is_shard_not_found() {
        let store = ShardStore::in_memory();
        let mut index = planned(&["AAPL", "MSFT"], 1);
        write_all(&store, &mut index);
        store.backend().delete("ohlc_001.json").unwrap();
        assert!(matches!(
            store.read_shard(&index, 1),
            Err(StoreError::ShardNotFound { id: 1 })
        ));
        assert!(store.verify(&index).is_err());
    }

    #[test]
    fn member_mismatch_is_divergence() {
        let store = ShardStore::in_memory();
        let mut index = planned(&["AAPL", "MSFT"], 2);
        write_all(&store, &mut index);
        index.files[0].symbols = vec!["AAPL".into()];
        index.files[0].symbol_count = 1;
        index.files[0].range_end = "AAPL".into();
        index.refresh_totals();
        let err = store.read_shard(&index, 0).unwrap_err();
        assert!(matches!(err, StoreError::Divergence { id: 0, .. }));
        assert!(err.is_fatal());
    }

    #[test]
    fn verify_detects_tampered_bytes() {
        let store = ShardStore::in_memory();
        let mut index = planned(&["AAPL"], 2);
        write_all(&store, &mut index);
        assert_eq!(store.verify(&index).unwrap().shards_checked, 1);

        let bytes = store.backend().get("ohlc_000.json").unwrap().unwrap();
        let mut tampered = String::from_utf8(bytes).unwrap();
        tampered.push(' ');
        store.backend().put("ohlc_000.json", tampered.as_bytes()).unwrap();
        assert!(matches!(
            store.verify(&index),
            Err(StoreError::Divergence { id: 0, .. })
        ));
    }

    #[test]
    fn shard_write_does_not_advance_index_timestamp() {
        let store = ShardStore::in_memory();
        let mut index = planned(&["AAPL", "MSFT"], 1);
        write_all(&store, &mut index);
        let run_started = index.last_updated;

        let mut shard = store.read_shard(&index, 1).unwrap();
        store.write_shard(&mut index, &mut shard).unwrap();

        let persisted = store.read_index().unwrap();
        assert_eq!(persisted.last_updated, run_started);
        assert_eq!(persisted.stale_shards(), vec![1]);

        store.write_index(&mut index).unwrap();
        assert!(store.read_index().unwrap().stale_shards().is_empty());
    }

    #[test]
    fn prune_removes_unreferenced_shards() {
        let store = ShardStore::in_memory();
        let mut index = planned(&["A", "B", "C"], 1);
        write_all(&store, &mut index);

        let mut smaller = planned(&["A"], 1);
        write_all(&store, &mut smaller);
        let removed = store.prune_orphans(&smaller).unwrap();
        assert_eq!(removed, vec!["ohlc_001.json", "ohlc_002.json"]);
        assert_eq!(
            store.backend().keys().unwrap(),
            vec!["ohlc_000.json", "ohlc_index.json"]
        );
    }

    #[test]
    fn promote_moves_staged_shard_to_canonical_key() {
        let store = ShardStore::in_memory();
        let mut index = planned(&["AAPL", "MSFT"], 1);
        index.files[1].filename = crate::shard::staged_filename(1);
        write_all(&store, &mut index);
        assert!(store.backend().get("ohlc_001.staged.json").unwrap().is_some());

        assert!(!store.promote(&mut index, 0).unwrap());
        assert!(store.promote(&mut index, 1).unwrap());

        let persisted = store.read_index().unwrap();
        assert_eq!(persisted.files[1].filename, "ohlc_001.json");
        assert_eq!(
            store.backend().keys().unwrap(),
            vec!["ohlc_000.json", "ohlc_001.json", "ohlc_index.json"]
        );
        assert_eq!(store.verify(&persisted).unwrap().shards_checked, 2);
        assert!(persisted.stale_shards().is_empty());
    }

    #[test]
    fn missing_index_is_reported() {
        let store = ShardStore::in_memory();
        assert!(!store.has_index().unwrap());
        assert!(matches!(store.read_index(), Err(StoreError::IndexMissing)));
    }
}
