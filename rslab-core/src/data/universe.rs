//! Symbol universe.
//!
//! Loaded from a TOML file (`symbols = ["AAPL", ...]`) or from the symbol
//! list of an existing rankings artifact. Symbols are upper-cased, trimmed,
//! sorted and deduplicated on load.

use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum UniverseError {
    #[error("read universe file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("parse universe TOML: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("parse rankings artifact: {0}")]
    Json(#[from] serde_json::Error),

    #[error("serialize universe: {0}")]
    Serialize(#[from] toml::ser::Error),
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Universe {
    symbols: Vec<String>,
}

#[derive(Deserialize)]
struct ArtifactSymbols {
    data: Vec<ArtifactRow>,
}

#[derive(Deserialize)]
struct ArtifactRow {
    symbol: String,
}

impl Universe {
    pub fn from_symbols<I, S>(symbols: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut symbols: Vec<String> = symbols
            .into_iter()
            .map(|s| s.as_ref().trim().to_uppercase())
            .filter(|s| !s.is_empty())
            .collect();
        symbols.sort();
        symbols.dedup();
        Self { symbols }
    }

    /// Load from a file; `.json` is read as a rankings artifact, anything else as TOML.
    pub fn from_file(path: &Path) -> Result<Self, UniverseError> {
        let content = std::fs::read_to_string(path).map_err(|source| UniverseError::Read {
            path: path.display().to_string(),
            source,
        })?;
        if path.extension().and_then(|e| e.to_str()) == Some("json") {
            Self::from_rankings_json(&content)
        } else {
            Self::from_toml(&content)
        }
    }

    pub fn from_toml(content: &str) -> Result<Self, UniverseError> {
        let raw: Universe = toml::from_str(content)?;
        Ok(Self::from_symbols(raw.symbols))
    }

    /// Symbols of a previously written rankings artifact.
    pub fn from_rankings_json(content: &str) -> Result<Self, UniverseError> {
        let artifact: ArtifactSymbols = serde_json::from_str(content)?;
        Ok(Self::from_symbols(artifact.data.into_iter().map(|r| r.symbol)))
    }

    pub fn to_toml(&self) -> Result<String, UniverseError> {
        Ok(toml::to_string_pretty(self)?)
    }

    pub fn symbols(&self) -> &[String] {
        &self.symbols
    }

    pub fn contains(&self, symbol: &str) -> bool {
        self.symbols.binary_search_by(|s| s.as_str().cmp(symbol)).is_ok()
    }

    /// Copy of the universe without `symbol` (the benchmark is never ranked).
    pub fn without(&self, symbol: &str) -> Self {
        Self {
            symbols: self
                .symbols
                .iter()
                .filter(|s| s.as_str() != symbol)
                .cloned()
                .collect(),
        }
    }

    /// Copy of the universe with `symbol` added.
    pub fn with(&self, symbol: &str) -> Self {
        Self::from_symbols(self.symbols.iter().map(String::as_str).chain([symbol]))
    }

    pub fn len(&self) -> usize {
        self.symbols.len()
    }

    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }
}
