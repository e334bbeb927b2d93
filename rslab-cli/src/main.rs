//! rslab CLI — store maintenance and relative-strength rankings.
//!
//! Commands:
//! - `init` — write a default `rslab.toml` and a universe file
//! - `rebuild` — fetch the full history of a universe into a fresh sharded store
//! - `update` — merge one new bar per symbol into the existing store
//! - `rank` — compute RS scores and percentile ranks, write the rankings artifact
//! - `status` — report shards, sizes and staleness from the index
//! - `verify` — check every shard against the index

use anyhow::{bail, Context, Result};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use rslab_core::data::{BarFetcher, Universe};
use rslab_core::domain::Timeframe;
use rslab_core::shard::ShardStore;
use rslab_runner::{
    format_size, run_ranking, IncrementalUpdater, ProviderKind, Rebuilder, RslabConfig,
    UpdateOptions,
};
use std::path::{Path, PathBuf};
use tracing::warn;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "rslab",
    about = "rslab — sharded bar store and relative-strength rankings"
)]
struct Cli {
    /// Path to the TOML config file.
    #[arg(long, global = true, default_value = "rslab.toml")]
    config: PathBuf,

    /// Use the deterministic synthetic provider instead of the configured one.
    #[arg(long, global = true, default_value_t = false)]
    synthetic: bool,

    /// Print run summaries as JSON.
    #[arg(long, global = true, default_value_t = false)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a default config and a universe file.
    Init {
        /// Symbols for the universe file.
        #[arg(long, value_delimiter = ',', default_value = "AAPL,AMZN,GOOGL,META,MSFT,NVDA,TSLA")]
        symbols: Vec<String>,

        /// Universe file to write.
        #[arg(long, default_value = "universe.toml")]
        universe: PathBuf,

        /// Overwrite existing files.
        #[arg(long, default_value_t = false)]
        force: bool,
    },
    /// Rebuild the whole store from a universe file.
    Rebuild {
        /// Universe file: TOML `symbols = [...]` or an existing rankings JSON.
        #[arg(long, default_value = "universe.toml")]
        universe: PathBuf,

        /// Last date of the history window (YYYY-MM-DD). Defaults to today.
        #[arg(long)]
        end: Option<String>,

        /// Process shards in parallel.
        #[arg(long, default_value_t = false)]
        parallel: bool,
    },
    /// Merge the bar for one date into every stored series.
    Update {
        /// Bar date (YYYY-MM-DD). Defaults to today.
        #[arg(long)]
        date: Option<String>,

        /// Only update these symbols.
        #[arg(long, value_delimiter = ',')]
        symbols: Option<Vec<String>>,

        /// Timeframe to merge into.
        #[arg(long, default_value = "1D")]
        timeframe: Timeframe,

        /// Process shards in parallel.
        #[arg(long, default_value_t = false)]
        parallel: bool,

        /// Skip the consistency check before and after the run.
        #[arg(long, default_value_t = false)]
        no_verify: bool,
    },
    /// Rank the stored universe and write the rankings artifact.
    Rank {
        /// Ranking date, used when the benchmark must be fetched. Defaults to today.
        #[arg(long)]
        as_of: Option<String>,

        /// Never call the provider; use only stored series.
        #[arg(long, default_value_t = false)]
        offline: bool,
    },
    /// Report shard sizes, symbol counts and staleness.
    Status,
    /// Check every shard against the index.
    Verify,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(log_filter(std::env::var("RUST_LOG").ok()))
        .with_target(false)
        .init();

    let cli = Cli::parse();

    if let Commands::Init {
        symbols,
        universe,
        force,
    } = &cli.command
    {
        return run_init(&cli.config, symbols, universe, *force);
    }

    let mut config = RslabConfig::load_or_default(&cli.config)
        .with_context(|| format!("loading {}", cli.config.display()))?;
    if cli.synthetic {
        config.provider.kind = ProviderKind::Synthetic;
    }
    let store = ShardStore::open_dir(&config.store.dir);

    match cli.command {
        Commands::Init { .. } => Ok(()),
        Commands::Rebuild {
            universe,
            end,
            parallel,
        } => run_rebuild(&config, &store, &universe, end, parallel, cli.json),
        Commands::Update {
            date,
            symbols,
            timeframe,
            parallel,
            no_verify,
        } => {
            let options = UpdateOptions::default()
                .with_timeframe(timeframe)
                .with_parallelism(parallel)
                .with_verify(!no_verify);
            run_update(&config, &store, date, symbols, options, cli.json)
        }
        Commands::Rank { as_of, offline } => run_rank(&config, &store, as_of, offline, cli.json),
        Commands::Status => run_status(&config, &store, cli.json),
        Commands::Verify => run_verify(&store, cli.json),
    }
}

/// `RUST_LOG` directives when set and valid, `info` otherwise.
fn log_filter(directives: Option<String>) -> EnvFilter {
    directives
        .and_then(|d| EnvFilter::try_new(d).ok())
        .unwrap_or_else(|| EnvFilter::new("info"))
}

fn parse_date(value: Option<&str>) -> Result<NaiveDate> {
    Ok(value
        .map(|s| NaiveDate::parse_from_str(s, "%Y-%m-%d"))
        .transpose()
        .context("dates must be YYYY-MM-DD")?
        .unwrap_or_else(|| chrono::Local::now().date_naive()))
}

fn run_init(config_path: &Path, symbols: &[String], universe_path: &Path, force: bool) -> Result<()> {
    for path in [config_path, universe_path] {
        if path.exists() && !force {
            bail!("{} already exists (pass --force to overwrite)", path.display());
        }
    }

    let config = RslabConfig::default();
    std::fs::write(config_path, config.to_toml()?)
        .with_context(|| format!("writing {}", config_path.display()))?;

    let universe = Universe::from_symbols(symbols);
    if universe.is_empty() {
        bail!("no symbols given");
    }
    std::fs::write(universe_path, universe.to_toml()?)
        .with_context(|| format!("writing {}", universe_path.display()))?;

    println!("Wrote {}", config_path.display());
    println!("Wrote {} ({} symbols)", universe_path.display(), universe.len());
    Ok(())
}

fn run_rebuild(
    config: &RslabConfig,
    store: &ShardStore,
    universe_path: &Path,
    end: Option<String>,
    parallel: bool,
    json: bool,
) -> Result<()> {
    let end = parse_date(end.as_deref())?;
    let universe = Universe::from_file(universe_path)?;
    let fetcher = config.provider.build_fetcher()?;

    let summary = Rebuilder::new(store, fetcher.as_ref(), config.store.clone())
        .with_parallelism(parallel)
        .rebuild(&universe, end)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        println!();
        println!("{summary}");
    }
    Ok(())
}

fn run_update(
    config: &RslabConfig,
    store: &ShardStore,
    date: Option<String>,
    symbols: Option<Vec<String>>,
    options: UpdateOptions,
    json: bool,
) -> Result<()> {
    let target = parse_date(date.as_deref())?;
    let mut index = store
        .read_index()
        .context("no store index; run `rslab rebuild` first")?;
    let stale = index.stale_shards();
    if !stale.is_empty() {
        warn!(shards = ?stale, "previous run did not finish; these shards were written after the index");
    }

    let fetcher = config.provider.build_fetcher()?;
    let updater = IncrementalUpdater::new(store, fetcher.as_ref(), config.store.retention_cap)
        .with_options(options);
    let summary = match symbols {
        Some(list) => {
            let list: Vec<String> = list.iter().map(|s| s.trim().to_uppercase()).collect();
            updater.update_symbols(&mut index, &list, target)?
        }
        None => updater.update_all(&mut index, target)?,
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        println!();
        println!("{summary}");
    }
    Ok(())
}

fn run_rank(
    config: &RslabConfig,
    store: &ShardStore,
    as_of: Option<String>,
    offline: bool,
    json: bool,
) -> Result<()> {
    let as_of = parse_date(as_of.as_deref())?;
    let fetcher: Option<Box<dyn BarFetcher>> = if offline {
        None
    } else {
        match config.provider.build_fetcher() {
            Ok(f) => Some(f),
            Err(e) => {
                warn!(error = %e, "provider unavailable; ranking from stored series only");
                None
            }
        }
    };

    let run = run_ranking(config, store, fetcher.as_deref(), as_of)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&run.artifact)?);
        return Ok(());
    }

    println!();
    println!("=== Rankings ===");
    println!("Formula:        {}", run.artifact.formula_used);
    println!("Benchmark:      {} ({:?})", run.artifact.benchmark, run.benchmark_source);
    println!("Ranked:         {}", run.artifact.total_stocks);
    println!("Excluded:       {}", run.excluded);
    println!("Output:         {}", run.output.display());
    if let Some(csv) = &run.csv {
        println!("CSV:            {}", csv.display());
    }
    println!();
    println!("{:<8} {:>4} {:>10} {:>10}", "Symbol", "Rank", "Score", "Volume");
    println!("{}", "-".repeat(35));
    for r in run.artifact.data.iter().take(20) {
        println!("{:<8} {:>4} {:>10.4} {:>10}", r.symbol, r.rs_rank, r.rs_score, r.avg_volume);
    }
    Ok(())
}

fn run_status(config: &RslabConfig, store: &ShardStore, json: bool) -> Result<()> {
    if !store.has_index()? {
        println!("No store at {}", config.store.dir.display());
        return Ok(());
    }
    let index = store.read_index()?;

    if json {
        println!("{}", serde_json::to_string_pretty(&index)?);
        return Ok(());
    }

    println!("Store:          {}", config.store.dir.display());
    println!("Last updated:   {} ({:?})", index.last_updated, index.update_type);
    println!("Symbols:        {}", index.total_symbols);
    println!("Shards:         {}", index.total_files);
    println!("Total size:     {}", format_size(index.total_bytes()));
    println!();
    println!(
        "{:<16} {:<20} {:>7} {:>10}  {:<20}",
        "File", "Range", "Symbols", "Size", "Written"
    );
    println!("{}", "-".repeat(78));
    for d in &index.files {
        let written = d
            .last_updated
            .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
            .unwrap_or_else(|| "-".into());
        println!(
            "{:<16} {:<20} {:>7} {:>10}  {:<20}",
            d.filename,
            format!("{}..{}", d.range_start, d.range_end),
            d.symbol_count,
            format_size(d.file_size),
            written
        );
    }

    let stale = index.stale_shards();
    if !stale.is_empty() {
        println!();
        println!(
            "WARNING: {} shard(s) written after the index: {:?}. The last run did not finish.",
            stale.len(),
            stale
        );
    }
    Ok(())
}

fn run_verify(store: &ShardStore, json: bool) -> Result<()> {
    let index = store.read_index()?;
    let report = store.verify(&index)?;

    if json {
        println!(
            "{}",
            serde_json::json!({
                "shards_checked": report.shards_checked,
                "symbols_checked": report.symbols_checked,
                "total_bytes": report.total_bytes,
                "stale_shards": report.stale_shards,
            })
        );
        return Ok(());
    }

    println!(
        "OK: {} shard(s), {} symbol(s), {}",
        report.shards_checked,
        report.symbols_checked,
        format_size(report.total_bytes)
    );
    if !report.stale_shards.is_empty() {
        println!("Stale shards: {:?}", report.stale_shards);
    }
    Ok(())
}
