//! rslab core — bar series, the sharded bar store, fetch collaborators and
//! the relative-strength ranking engine.
//!
//! - Domain types (bars, bar series with a retention cap, timeframes)
//! - Shard planner, shard index ledger and the shard store over a key/value backend
//! - Fetch collaborator trait with Polygon and synthetic providers
//! - Multi-horizon returns, weighted RS score and 1–99 percentile ranks

pub mod data;
pub mod domain;
pub mod ranking;
pub mod shard;

#[cfg(test)]
mod tests {
    use super::*;

    /// Compile-time check: everything the runner moves across rayon workers
    /// is Send + Sync.
    #[allow(dead_code)]
    fn assert_send_sync() {
        fn require_send<T: Send>() {}
        fn require_sync<T: Sync>() {}

        // Domain types
        require_send::<domain::Bar>();
        require_sync::<domain::Bar>();
        require_send::<domain::BarSeries>();
        require_sync::<domain::BarSeries>();
        require_send::<domain::Timeframe>();
        require_sync::<domain::Timeframe>();

        // Store types
        require_send::<shard::Shard>();
        require_sync::<shard::Shard>();
        require_send::<shard::ShardIndex>();
        require_sync::<shard::ShardIndex>();
        require_send::<shard::ShardStore>();
        require_sync::<shard::ShardStore>();
        require_send::<shard::ShardWrite>();
        require_send::<shard::StoreError>();

        // Providers
        require_send::<data::PolygonProvider>();
        require_sync::<data::PolygonProvider>();
        require_send::<data::SyntheticProvider>();
        require_sync::<data::SyntheticProvider>();
        require_send::<data::CircuitBreaker>();
        require_sync::<data::CircuitBreaker>();
        require_send::<data::FetchError>();

        // Ranking
        require_send::<ranking::RankingArtifact>();
        require_sync::<ranking::RankingArtifact>();
        require_send::<ranking::RankingEngine>();
        require_sync::<ranking::RankingEngine>();
    }

    /// The store is the only path to shard bytes: callers hold a `ShardStore`
    /// and address shards by id, never by key.
    #[test]
    fn store_is_usable_behind_a_shared_reference() {
        fn _read_through_shared(
            store: &shard::ShardStore,
            index: &shard::ShardIndex,
        ) -> Result<shard::Shard, shard::StoreError> {
            store.read_shard(index, 0)
        }
    }
}
