//! Fetch collaborator trait and its error taxonomy.
//!
//! The updater and the rebuild only ever see `BarFetcher`; which market-data
//! source sits behind it (Polygon, the synthetic generator, a test mock) is
//! decided by the caller.

use crate::domain::{Bar, BarError, Timeframe};
use chrono::{Duration, NaiveDate};
use thiserror::Error;

/// Typed failures from a fetch collaborator.
///
/// `NoData` is the soft case (market closed, delisted, nothing new). The rest
/// mean the provider could not answer; callers count them per symbol and move on.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("no data for {symbol}")]
    NoData { symbol: String },

    #[error("transient provider failure: {0}")]
    Transient(String),

    #[error("rate limited by provider (retry after {retry_after_secs}s)")]
    RateLimited { retry_after_secs: u64 },

    #[error("hard stop: provider is refusing requests (circuit breaker tripped)")]
    CircuitBreakerTripped,

    #[error("response format changed: {0}")]
    ResponseFormatChanged(String),

    #[error("authentication required: {0}")]
    AuthenticationRequired(String),

    #[error("provider returned an invalid bar for {symbol}: {source}")]
    InvalidBar {
        symbol: String,
        #[source]
        source: BarError,
    },

    #[error("http client setup failed: {0}")]
    Client(String),
}

impl FetchError {
    pub fn is_no_data(&self) -> bool {
        matches!(self, FetchError::NoData { .. })
    }
}

pub trait BarFetcher: Send + Sync {
    /// Human-readable provider name.
    fn name(&self) -> &str;

    /// Bars for `symbol` with interval start in `[start, end]`, ascending.
    fn fetch(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<Bar>, FetchError>;

    /// The single bar covering `date`: that day for daily bars, the week
    /// ending on `date` for weekly bars. `NoData` when the provider has none.
    fn fetch_bar(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        date: NaiveDate,
    ) -> Result<Bar, FetchError> {
        let start = match timeframe {
            Timeframe::Daily => date,
            Timeframe::Weekly => date - Duration::days(6),
        };
        self.fetch(symbol, timeframe, start, date)?
            .pop()
            .ok_or_else(|| FetchError::NoData {
                symbol: symbol.to_string(),
            })
    }

    /// False while the provider is refusing requests.
    fn is_available(&self) -> bool {
        true
    }
}
