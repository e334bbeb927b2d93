//! Ranking engine: series in, ranking artifact out.

use super::percentile::{assign_percentiles, Scored};
use super::returns::{compute_returns, horizon_label, HorizonReturns, DEFAULT_HORIZONS, DEFAULT_MIN_HISTORY};
use super::score::{rs_score, DEFAULT_WEIGHTS};
use super::volume::{average_volume, format_percent, format_volume, DEFAULT_VOLUME_WINDOW};
use crate::domain::BarSeries;
use crate::shard::UpdateType;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize, Serializer};
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RankingConfig {
    pub benchmark_symbol: String,
    pub benchmark_label: String,
    /// Bars required before a symbol is ranked.
    pub min_history: usize,
    pub horizons: Vec<usize>,
    /// One weight per horizon.
    pub weights: Vec<f64>,
    pub volume_window: usize,
    /// Score on `stock − benchmark` returns instead of raw returns.
    pub subtract_benchmark: bool,
}

impl Default for RankingConfig {
    fn default() -> Self {
        Self {
            benchmark_symbol: "SPY".into(),
            benchmark_label: "S&P 500 (SPY)".into(),
            min_history: DEFAULT_MIN_HISTORY,
            horizons: DEFAULT_HORIZONS.to_vec(),
            weights: DEFAULT_WEIGHTS.to_vec(),
            volume_window: DEFAULT_VOLUME_WINDOW,
            subtract_benchmark: false,
        }
    }
}

fn format_weight(weight: f64) -> String {
    if weight.fract() == 0.0 {
        format!("{weight:.0}")
    } else {
        weight.to_string()
    }
}

impl RankingConfig {
    /// Formula description written into the artifact, e.g.
    /// `RS = 2×3m + 6m + 9m + 12m trailing return`.
    pub fn formula(&self) -> String {
        let terms: Vec<String> = self
            .horizons
            .iter()
            .zip(&self.weights)
            .map(|(&h, &w)| {
                let label = horizon_label(h);
                if w == 1.0 {
                    label
                } else {
                    format!("{}×{label}", format_weight(w))
                }
            })
            .collect();
        let basis = if self.subtract_benchmark {
            format!("return relative to {}", self.benchmark_label)
        } else {
            "trailing return".to_string()
        };
        format!("RS = {} {basis}", terms.join(" + "))
    }
}

fn serialize_score<S: Serializer>(value: &f64, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_f64((value * 10_000.0).round() / 10_000.0)
}

/// One ranked symbol.
///
/// Per-horizon figures are flattened into the record as
/// `stock_return_3m`, `relative_3m`, ... (formatted percentages).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankingRecord {
    pub symbol: String,
    pub rs_rank: u8,
    #[serde(serialize_with = "serialize_score")]
    pub rs_score: f64,
    pub avg_volume: String,
    pub raw_volume: u64,
    #[serde(flatten)]
    pub returns: BTreeMap<String, String>,
}

/// Output of one ranking run. Replaces the previous artifact wholesale.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankingArtifact {
    pub last_updated: DateTime<Utc>,
    pub total_stocks: usize,
    pub formula_used: String,
    pub benchmark: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub update_type: Option<UpdateType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub benchmark_returns: Option<BTreeMap<String, String>>,
    pub data: Vec<RankingRecord>,
}

struct Candidate<'a> {
    symbol: &'a str,
    score: f64,
    returns: HorizonReturns,
    relative: Option<HorizonReturns>,
    volume: u64,
}

impl Scored for Candidate<'_> {
    fn symbol(&self) -> &str {
        self.symbol
    }

    fn score(&self) -> f64 {
        self.score
    }
}

fn stock_return_fields(returns: &HorizonReturns) -> BTreeMap<String, String> {
    returns
        .iter()
        .map(|(h, r)| (format!("stock_return_{}", horizon_label(h)), format_percent(r)))
        .collect()
}

#[derive(Debug, Clone, Default)]
pub struct RankingEngine {
    config: RankingConfig,
}

impl RankingEngine {
    pub fn new(config: RankingConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RankingConfig {
        &self.config
    }

    /// Returns for one series under this engine's horizons and history floor.
    pub fn returns_for(&self, series: &BarSeries) -> Option<HorizonReturns> {
        compute_returns(series, &self.config.horizons, self.config.min_history)
    }

    /// Rank every series with enough history. The benchmark symbol itself is
    /// never ranked; a missing or short benchmark only drops the relative figures.
    pub fn rank<'a, I>(&self, universe: I, benchmark: Option<&BarSeries>) -> RankingArtifact
    where
        I: IntoIterator<Item = &'a BarSeries>,
    {
        let cfg = &self.config;
        let benchmark_returns = benchmark.and_then(|b| {
            let returns = self.returns_for(b);
            if returns.is_none() {
                warn!(
                    symbol = b.symbol(),
                    bars = b.len(),
                    "benchmark has insufficient history; relative returns omitted"
                );
            }
            returns
        });
        if cfg.subtract_benchmark && benchmark_returns.is_none() {
            warn!("subtract_benchmark is set but no benchmark returns are available; scoring raw returns");
        }

        let mut insufficient = 0usize;
        let mut candidates = Vec::new();
        for series in universe {
            let symbol = series.symbol();
            if symbol == cfg.benchmark_symbol {
                continue;
            }
            let Some(returns) = self.returns_for(series) else {
                debug!(symbol, bars = series.len(), "insufficient history, not ranked");
                insufficient += 1;
                continue;
            };
            let relative = benchmark_returns.as_ref().map(|b| returns.relative_to(b));
            let basis = match (&relative, cfg.subtract_benchmark) {
                (Some(rel), true) => rel,
                _ => &returns,
            };
            let score = rs_score(basis, &cfg.weights);
            if !score.is_finite() {
                warn!(symbol, "non-finite RS score, not ranked");
                continue;
            }
            candidates.push(Candidate {
                symbol,
                score,
                returns,
                relative,
                volume: average_volume(series, cfg.volume_window),
            });
        }

        let data: Vec<RankingRecord> = assign_percentiles(candidates)
            .into_iter()
            .map(|(c, rank)| {
                let mut returns = stock_return_fields(&c.returns);
                if let Some(rel) = &c.relative {
                    returns.extend(
                        rel.iter()
                            .map(|(h, r)| (format!("relative_{}", horizon_label(h)), format_percent(r))),
                    );
                }
                RankingRecord {
                    symbol: c.symbol.to_string(),
                    rs_rank: rank,
                    rs_score: c.score,
                    avg_volume: format_volume(c.volume),
                    raw_volume: c.volume,
                    returns,
                }
            })
            .collect();

        info!(
            ranked = data.len(),
            insufficient_history = insufficient,
            "ranking complete"
        );

        RankingArtifact {
            last_updated: Utc::now(),
            total_stocks: data.len(),
            formula_used: cfg.formula(),
            benchmark: cfg.benchmark_label.clone(),
            update_type: None,
            benchmark_returns: benchmark_returns.as_ref().map(stock_return_fields),
            data,
        }
    }
}
