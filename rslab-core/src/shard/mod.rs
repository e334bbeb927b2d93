//! Sharded bar storage: planning, the index ledger, shard contents and the store.

pub mod backend;
pub mod contents;
pub mod error;
pub mod index;
pub mod planner;
pub mod store;

pub use backend::{FsBackend, MemoryBackend, ShardBackend};
pub use contents::Shard;
pub use error::StoreError;
pub use index::{ShardDescriptor, ShardIndex, UpdateType};
pub use planner::{shard_filename, staged_filename, ShardPlanner, DEFAULT_SHARD_SIZE};
pub use store::{ShardStore, ShardWrite, VerifyReport, INDEX_KEY};
