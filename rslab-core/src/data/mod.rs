//! Market-data collaborators: the fetch trait, providers, and the symbol universe.

pub mod circuit_breaker;
pub mod polygon;
pub mod provider;
pub mod synthetic;
pub mod universe;

pub use circuit_breaker::{BreakerState, CircuitBreaker};
pub use polygon::{PolygonConfig, PolygonProvider, DEFAULT_API_KEY_ENV, DEFAULT_BASE_URL};
pub use provider::{BarFetcher, FetchError};
pub use synthetic::SyntheticProvider;
pub use universe::{Universe, UniverseError};
