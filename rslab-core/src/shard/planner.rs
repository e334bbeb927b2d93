//! Partition a sorted symbol universe into fixed-size shards.

use super::index::ShardDescriptor;

/// Default number of symbols per shard.
pub const DEFAULT_SHARD_SIZE: usize = 50;

/// Storage key for the shard with the given index.
pub fn shard_filename(file_index: usize) -> String {
    format!("ohlc_{file_index:03}.json")
}

/// Alternate key a rebuild writes shard `file_index` under when the live
/// index still references the canonical one.
pub fn staged_filename(file_index: usize) -> String {
    format!("ohlc_{file_index:03}.staged.json")
}

/// Chunks the alphabetically sorted universe into contiguous groups.
///
/// The partition depends only on the universe and the shard size, so a full
/// rebuild over an unchanged universe reproduces every symbol's shard.
#[derive(Debug, Clone, Copy)]
pub struct ShardPlanner {
    shard_size: usize,
}

impl ShardPlanner {
    /// A zero size is treated as one symbol per shard.
    pub fn new(shard_size: usize) -> Self {
        Self {
            shard_size: shard_size.max(1),
        }
    }

    pub fn shard_size(&self) -> usize {
        self.shard_size
    }

    /// Plan shards for `universe`. The input is sorted and deduplicated
    /// first, so callers may pass it in any order.
    pub fn plan(&self, universe: &[String]) -> Vec<ShardDescriptor> {
        let mut symbols: Vec<String> = universe.to_vec();
        symbols.sort();
        symbols.dedup();

        symbols
            .chunks(self.shard_size)
            .enumerate()
            .map(|(file_index, chunk)| ShardDescriptor::new(file_index, chunk.to_vec()))
            .collect()
    }
}

impl Default for ShardPlanner {
    fn default() -> Self {
        Self::new(DEFAULT_SHARD_SIZE)
    }
}
