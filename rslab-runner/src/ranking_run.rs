//! Ranking run: store in, rankings artifact out.
//!
//! Reads every shard's daily series, resolves the benchmark, ranks the
//! universe and replaces the artifact file atomically. Optional CSV export.

use crate::config::RslabConfig;
use crate::error::RunError;
use chrono::NaiveDate;
use rslab_core::data::BarFetcher;
use rslab_core::domain::{BarSeries, Timeframe};
use rslab_core::ranking::{RankingArtifact, RankingEngine};
use rslab_core::shard::{ShardIndex, ShardStore, StoreError};
use serde::Serialize;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Where the benchmark series came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BenchmarkSource {
    Store,
    Fetcher,
    Missing,
}

#[derive(Debug, Clone)]
pub struct RankingRun {
    pub artifact: RankingArtifact,
    pub output: PathBuf,
    pub csv: Option<PathBuf>,
    /// Stored symbols left out of the artifact (short history or bad scores).
    pub excluded: usize,
    pub benchmark_source: BenchmarkSource,
}

/// Every member's daily series, in symbol order.
pub fn load_daily_series(store: &ShardStore, index: &ShardIndex) -> Result<Vec<BarSeries>, StoreError> {
    let mut all = Vec::with_capacity(index.total_symbols);
    for descriptor in &index.files {
        let shard = store.load_shard(descriptor)?;
        all.extend(shard.iter_timeframe(Timeframe::Daily).cloned());
    }
    all.sort_by(|a, b| a.symbol().cmp(b.symbol()));
    Ok(all)
}

fn resolve_benchmark(
    config: &RslabConfig,
    series: &[BarSeries],
    fetcher: Option<&dyn BarFetcher>,
    as_of: NaiveDate,
) -> (Option<BarSeries>, BenchmarkSource) {
    let symbol = config.ranking.engine.benchmark_symbol.as_str();
    if let Some(stored) = series.iter().find(|s| s.symbol() == symbol && !s.is_empty()) {
        return (Some(stored.clone()), BenchmarkSource::Store);
    }
    let Some(fetcher) = fetcher else {
        warn!(symbol, "benchmark not stored and no provider configured");
        return (None, BenchmarkSource::Missing);
    };

    let timeframe = Timeframe::Daily;
    let fetched = fetcher
        .fetch(symbol, timeframe, timeframe.window_start(as_of), as_of)
        .map_err(|e| e.to_string())
        .and_then(|bars| {
            BarSeries::normalized(symbol, timeframe, bars, config.store.retention_cap)
                .map_err(|e| e.to_string())
        });
    match fetched {
        Ok(series) => {
            info!(symbol, bars = series.len(), provider = fetcher.name(), "benchmark fetched");
            (Some(series), BenchmarkSource::Fetcher)
        }
        Err(e) => {
            warn!(symbol, error = %e, "benchmark unavailable; relative returns omitted");
            (None, BenchmarkSource::Missing)
        }
    }
}

/// Rank the stored universe as of `as_of` and write the configured outputs.
pub fn run_ranking(
    config: &RslabConfig,
    store: &ShardStore,
    fetcher: Option<&dyn BarFetcher>,
    as_of: NaiveDate,
) -> Result<RankingRun, RunError> {
    let index = store.read_index()?;
    let series = load_daily_series(store, &index)?;
    let (benchmark, benchmark_source) = resolve_benchmark(config, &series, fetcher, as_of);

    let engine = RankingEngine::new(config.ranking.engine.clone());
    let mut artifact = engine.rank(&series, benchmark.as_ref());
    artifact.update_type = Some(index.update_type);

    let candidates = series
        .iter()
        .filter(|s| s.symbol() != config.ranking.engine.benchmark_symbol)
        .count();
    let excluded = candidates.saturating_sub(artifact.total_stocks);

    let output = config.ranking.output.clone();
    write_artifact(&output, &artifact)?;
    let csv = match &config.ranking.csv_output {
        Some(path) => {
            write_atomic(path, export_csv(&artifact)?.as_bytes())?;
            Some(path.clone())
        }
        None => None,
    };

    info!(
        ranked = artifact.total_stocks,
        excluded,
        benchmark = ?benchmark_source,
        output = %output.display(),
        "rankings written"
    );
    Ok(RankingRun {
        artifact,
        output,
        csv,
        excluded,
        benchmark_source,
    })
}

fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), RunError> {
    let io_err = |source| RunError::Io {
        path: path.display().to_string(),
        source,
    };
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(io_err)?;
    }
    let tmp = path.with_extension("tmp");
    std::fs::write(&tmp, bytes).map_err(io_err)?;
    std::fs::rename(&tmp, path).map_err(io_err)
}

/// Replace the artifact at `path` with pretty JSON. Readers see the old or
/// the new file, never a partial one.
pub fn write_artifact(path: &Path, artifact: &RankingArtifact) -> Result<(), RunError> {
    let json = serde_json::to_string_pretty(artifact)?;
    write_atomic(path, json.as_bytes())
}

pub fn read_artifact(path: &Path) -> Result<RankingArtifact, RunError> {
    let content = std::fs::read_to_string(path).map_err(|source| RunError::Io {
        path: path.display().to_string(),
        source,
    })?;
    Ok(serde_json::from_str(&content)?)
}

/// Export rankings as CSV.
///
/// Columns: symbol, rs_rank, rs_score, avg_volume, raw_volume, then every
/// per-horizon return column present in the artifact, sorted by name.
pub fn export_csv(artifact: &RankingArtifact) -> Result<String, RunError> {
    let return_columns: BTreeSet<&str> = artifact
        .data
        .iter()
        .flat_map(|r| r.returns.keys().map(String::as_str))
        .collect();

    let mut wtr = csv::Writer::from_writer(vec![]);

    let mut header = vec!["symbol", "rs_rank", "rs_score", "avg_volume", "raw_volume"];
    header.extend(return_columns.iter().copied());
    wtr.write_record(&header)?;

    for r in &artifact.data {
        let mut row = vec![
            r.symbol.clone(),
            r.rs_rank.to_string(),
            format!("{:.4}", r.rs_score),
            r.avg_volume.clone(),
            r.raw_volume.to_string(),
        ];
        row.extend(
            return_columns
                .iter()
                .map(|c| r.returns.get(*c).cloned().unwrap_or_default()),
        );
        wtr.write_record(&row)?;
    }

    let data = wtr
        .into_inner()
        .map_err(|e| RunError::Csv(csv::Error::from(e.into_error())))?;
    Ok(String::from_utf8_lossy(&data).into_owned())
}
