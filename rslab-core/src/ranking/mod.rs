//! Relative-strength ranking: trailing returns, weighted score, percentile ranks.

pub mod engine;
pub mod percentile;
pub mod returns;
pub mod score;
pub mod volume;

pub use engine::{RankingArtifact, RankingConfig, RankingEngine, RankingRecord};
pub use percentile::{assign_percentiles, percentile_rank, Scored, MAX_RANK, MIN_RANK};
pub use returns::{
    compute_returns, horizon_label, trailing_return, HorizonReturns, DEFAULT_HORIZONS,
    DEFAULT_MIN_HISTORY,
};
pub use score::{rs_score, DEFAULT_WEIGHTS};
pub use volume::{average_volume, format_percent, format_volume, DEFAULT_VOLUME_WINDOW};
