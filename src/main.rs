use clap::Parser;
use eyre::{eyre, Result};
use fs2::FileExt;
use std::fs::OpenOptions;
use std::path::PathBuf;
use std::sync::Arc;
use tft_collector::config::{self, Config, ConfigFile};
use tft_collector::http_client::RateLimitedClient;
use tft_collector::errors::EXIT_RESUMABLE;
use tft_collector::pipeline;
use tft_collector::registry::Registry;
use tft_collector::riot_api::RiotApi;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::prelude::*;

/// TFT ranked collection orchestrator: runs the collect → validate →
/// transform → quality → {cross_cycle, provenance, parquet, backup} DAG for
/// one or more collection cycles (spec §6 "Invocation surface").
#[derive(Parser, Debug)]
#[command(name = "tft-collector", version, about = "TFT ranked collection pipeline orchestrator")]
struct Args {
    /// One or more collection dates (cycleIds), e.g. 20260101. Repeat the
    /// flag for multiple independent cycles.
    #[arg(long = "cycle", required = true)]
    cycles: Vec<String>,

    /// Path to a TOML config file; absent values fall back to defaults.
    #[arg(long, default_value = "tft-collector.toml")]
    config: PathBuf,

    /// Regional endpoint family (e.g. na1, euw1). Overrides api.region.
    #[arg(long)]
    region: Option<String>,

    /// Override the upstream API base URL (primarily for test fixtures).
    #[arg(long)]
    base_url: Option<String>,

    /// Long-window request budget override (api.rate_limit).
    #[arg(long)]
    rate_limit: Option<u32>,

    /// `daily`, `weekly`, or `incremental` (collection.mode).
    #[arg(long)]
    mode: Option<String>,

    /// Subset of ranked tiers to enumerate, repeatable (collection.tiers).
    #[arg(long = "tier")]
    tiers: Vec<String>,

    /// `identify`, `filter`, or `mark` (collection.incomplete_match_policy).
    #[arg(long)]
    incomplete_match_policy: Option<String>,

    /// Bounded worker count for the detail-fetch fan-out.
    #[arg(long)]
    max_concurrency: Option<usize>,

    /// Root directory for `data/`, `reports/`, `provenance/`, `backups/`, `logs/`.
    #[arg(long)]
    data_root: Option<PathBuf>,

    /// `collectionInfo.dataVersion` stamped onto the artifact.
    #[arg(long)]
    data_version: Option<String>,

    /// 0..1 gate for advancing past the quality stage (quality.quality_threshold).
    #[arg(long)]
    quality_threshold: Option<f64>,

    /// Whether backup is part of the default target (backup.auto_backup).
    #[arg(long)]
    auto_backup: Option<bool>,

    /// Age in days after which backups are eligible for cleanup (backup.retention_days).
    #[arg(long)]
    retention_days: Option<u32>,
}

fn resolve_config(args: &Args) -> Result<Config> {
    let config_file = ConfigFile::load(&args.config)?;
    config::resolve(
        config_file,
        Some(args.config.clone()),
        args.region.clone(),
        args.base_url.clone(),
        args.rate_limit,
        args.mode.clone(),
        if args.tiers.is_empty() { None } else { Some(args.tiers.clone()) },
        args.incomplete_match_policy.clone(),
        args.max_concurrency,
        args.data_root.clone(),
        args.data_version.clone(),
        args.quality_threshold,
        args.auto_backup,
        args.retention_days,
    )
}

/// Opens the per-cycle log file (spec §6 `logs/collection_<cycleId>.log`)
/// and layers it alongside the stderr subscriber for the duration of that
/// cycle, layered alongside the single stderr `tracing_subscriber::fmt()`
/// initialization but scoped per cycle since this orchestrator runs many.
fn cycle_log_guard(data_root: &std::path::Path, cycle_id: &str) -> Result<tracing::subscriber::DefaultGuard> {
    let log_dir = data_root.join("logs");
    std::fs::create_dir_all(&log_dir).map_err(|e| eyre!("failed to create log directory {}: {e}", log_dir.display()))?;
    let file_appender = tracing_appender::rolling::never(&log_dir, format!("collection_{cycle_id}.log"));
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
    // Leak the worker guard for process lifetime; acceptable for a short-lived CLI invocation.
    std::mem::forget(guard);

    let env_filter = tracing_subscriber::EnvFilter::from_default_env();
    let subscriber = tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .with(tracing_subscriber::fmt::layer().with_writer(non_blocking).with_ansi(false));

    Ok(tracing::subscriber::set_default(subscriber))
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt().with_env_filter(tracing_subscriber::EnvFilter::from_default_env()).init();

    let args = Args::parse();
    let config = resolve_config(&args)?;

    std::fs::create_dir_all(&config.data_root)
        .map_err(|e| eyre!("failed to create data root {}: {e}", config.data_root.display()))?;

    // Single-instance guard: prevents two collectors from racing on the same
    // registry/checkpoint directory.
    let lock_path = config.data_root.join(".tft-collector.lock");
    let lock_file = OpenOptions::new()
        .create(true)
        .read(true)
        .write(true)
        .open(&lock_path)
        .map_err(|e| eyre!("failed to open lock file {}: {e}", lock_path.display()))?;
    lock_file
        .try_lock_exclusive()
        .map_err(|e| eyre!("another collector instance is already running against {} ({e})", config.data_root.display()))?;
    let _lock_guard = lock_file;

    let http_client = Arc::new(RateLimitedClient::new(config.base_url.clone(), config.riot_api_key.clone(), config.rate_limit_budget)?);
    let api = Arc::new(RiotApi::new(http_client));
    let registry = Arc::new(Registry::open(&config.data_root.join("registry"))?);

    // Cancellation has three independent sources (spec §5): an external
    // termination signal (wired here), authentication expiry, and a fatal
    // error (both wired inside the Collection Engine). Whichever source
    // fires first, every in-flight cycle checkpoints and exits resumable.
    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::warn!("received interrupt signal; requesting cooperative cancellation");
                cancel.cancel();
            }
        });
    }

    let mut worst_exit_code = 0;

    for cycle_id in &args.cycles {
        if cancel.is_cancelled() {
            tracing::warn!(cycle_id, "skipping cycle: cancellation already requested");
            worst_exit_code = worst_exit_code.max(EXIT_RESUMABLE);
            break;
        }

        let _log_guard = cycle_log_guard(&config.data_root, cycle_id)?;
        tracing::info!(cycle_id, region = %config.region, "starting cycle");

        match pipeline::run_cycle(&config, api.clone(), registry.clone(), cycle_id, cancel.clone()).await {
            Ok(exit_code) => {
                if exit_code != 0 {
                    tracing::warn!(cycle_id, exit_code, "cycle ended with a non-zero, resumable status");
                    worst_exit_code = worst_exit_code.max(exit_code);
                } else {
                    tracing::info!(cycle_id, "cycle complete");
                }
            }
            Err(err) => {
                tracing::error!(cycle_id, error = %err, "cycle failed");
                worst_exit_code = worst_exit_code.max(1);
            }
        }
    }

    if worst_exit_code != 0 {
        std::process::exit(worst_exit_code);
    }
    Ok(())
}
