//! Domain types: bars, bar series, timeframes.

pub mod bar;
pub mod series;
pub mod timeframe;

pub use bar::{date_to_millis, Bar, BarError};
pub use series::{BarSeries, MergeOutcome, DEFAULT_RETENTION_CAP};
pub use timeframe::Timeframe;

/// Symbol type alias
pub type Symbol = String;
