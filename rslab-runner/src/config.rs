//! `rslab.toml` configuration.
//!
//! Every field has a default, so an empty file (or no file) is a valid
//! configuration. `validate` rejects combinations that would break store or
//! ranking invariants before any run starts.

use rslab_core::data::{
    BarFetcher, CircuitBreaker, FetchError, PolygonConfig, PolygonProvider, SyntheticProvider,
    DEFAULT_API_KEY_ENV, DEFAULT_BASE_URL,
};
use rslab_core::domain::{Timeframe, DEFAULT_RETENTION_CAP};
use rslab_core::ranking::RankingConfig;
use rslab_core::shard::DEFAULT_SHARD_SIZE;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Upper bound on provider retries per request.
pub const MAX_RETRIES: u32 = 10;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("read config {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Directory holding the shard files and the index.
    pub dir: PathBuf,
    pub shard_size: usize,
    /// Bars kept per series.
    pub retention_cap: usize,
    pub timeframes: Vec<Timeframe>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("data"),
            shard_size: DEFAULT_SHARD_SIZE,
            retention_cap: DEFAULT_RETENTION_CAP,
            timeframes: Timeframe::ALL.to_vec(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RankingSection {
    #[serde(flatten)]
    pub engine: RankingConfig,
    /// Where the rankings artifact is written.
    pub output: PathBuf,
    /// Optional CSV export next to the JSON artifact.
    pub csv_output: Option<PathBuf>,
}

impl Default for RankingSection {
    fn default() -> Self {
        Self {
            engine: RankingConfig::default(),
            output: PathBuf::from("rankings.json"),
            csv_output: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    #[default]
    Polygon,
    Synthetic,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    pub kind: ProviderKind,
    pub base_url: String,
    /// Environment variable holding the API key.
    pub api_key_env: String,
    pub request_delay_ms: u64,
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub timeout_secs: u64,
    pub breaker_cooldown_secs: u64,
    pub breaker_threshold: u32,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            kind: ProviderKind::Polygon,
            base_url: DEFAULT_BASE_URL.into(),
            api_key_env: DEFAULT_API_KEY_ENV.into(),
            request_delay_ms: 100,
            max_retries: 3,
            base_delay_ms: 500,
            timeout_secs: 30,
            breaker_cooldown_secs: 30 * 60,
            breaker_threshold: 3,
        }
    }
}

impl ProviderConfig {
    /// Build the configured fetch collaborator. Polygon reads its API key
    /// from the environment here, so a missing key fails before any run starts.
    pub fn build_fetcher(&self) -> Result<Box<dyn BarFetcher>, FetchError> {
        match self.kind {
            ProviderKind::Synthetic => Ok(Box::new(SyntheticProvider::new())),
            ProviderKind::Polygon => {
                let mut config = PolygonConfig::from_env(&self.api_key_env)?;
                config.base_url = self.base_url.clone();
                config.max_retries = self.max_retries;
                config.base_delay = Duration::from_millis(self.base_delay_ms);
                config.request_delay = Duration::from_millis(self.request_delay_ms);
                config.timeout = Duration::from_secs(self.timeout_secs);
                let breaker = CircuitBreaker::new(Duration::from_secs(self.breaker_cooldown_secs))
                    .with_threshold(self.breaker_threshold);
                Ok(Box::new(PolygonProvider::new(config, Arc::new(breaker))?))
            }
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RslabConfig {
    pub store: StoreConfig,
    pub ranking: RankingSection,
    pub provider: ProviderConfig,
}

impl RslabConfig {
    /// Load and validate a config file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml(&content)
    }

    /// Load `path` if it exists, defaults otherwise.
    pub fn load_or_default(path: &Path) -> Result<Self, ConfigError> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let store = &self.store;
        let ranking = &self.ranking.engine;

        if store.shard_size == 0 {
            return Err(ConfigError::Invalid("store.shard_size must be at least 1".into()));
        }
        if store.retention_cap == 0 {
            return Err(ConfigError::Invalid("store.retention_cap must be at least 1".into()));
        }
        if store.timeframes.is_empty() {
            return Err(ConfigError::Invalid("store.timeframes must not be empty".into()));
        }
        if !store.timeframes.contains(&Timeframe::Daily) {
            return Err(ConfigError::Invalid(
                "store.timeframes must include 1D (ranking reads daily bars)".into(),
            ));
        }
        if store.retention_cap < ranking.min_history {
            return Err(ConfigError::Invalid(format!(
                "store.retention_cap ({}) is below ranking.min_history ({}); no symbol could ever be ranked",
                store.retention_cap, ranking.min_history
            )));
        }
        if ranking.horizons.is_empty() {
            return Err(ConfigError::Invalid("ranking.horizons must not be empty".into()));
        }
        if ranking.horizons.len() != ranking.weights.len() {
            return Err(ConfigError::Invalid(format!(
                "ranking.horizons has {} entries but ranking.weights has {}",
                ranking.horizons.len(),
                ranking.weights.len()
            )));
        }
        if ranking.horizons.contains(&0) {
            return Err(ConfigError::Invalid("ranking.horizons must be positive".into()));
        }
        if ranking.weights.iter().any(|w| !w.is_finite()) {
            return Err(ConfigError::Invalid("ranking.weights must be finite".into()));
        }
        if ranking.volume_window == 0 {
            return Err(ConfigError::Invalid("ranking.volume_window must be at least 1".into()));
        }
        if ranking.benchmark_symbol.trim().is_empty() {
            return Err(ConfigError::Invalid("ranking.benchmark_symbol must not be empty".into()));
        }
        if self.provider.max_retries > MAX_RETRIES {
            return Err(ConfigError::Invalid(format!(
                "provider.max_retries ({}) must be at most {MAX_RETRIES}",
                self.provider.max_retries
            )));
        }
        Ok(())
    }
}
