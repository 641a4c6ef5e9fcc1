//! prospector-enrich - batch prospect enrichment
//!
//! Reads a JSON array of prospect records, runs them through the enrichment
//! pipeline against the configured HTTP sources, and writes the Batch Result
//! as JSON.

use anyhow::{Context, Result};
use clap::Parser;
use prospector_common::config::ConfigResolver;
use prospector_common::events::log_progress;
use prospector_common::human_time::format_elapsed_ms;
use prospector_enrich::{input, EnrichmentPipeline, PipelineConfig, SourceClients};
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Command-line arguments for prospector-enrich
#[derive(Parser, Debug)]
#[command(name = "prospector-enrich")]
#[command(about = "Enrich, score and rank a batch of prospect records")]
#[command(version)]
struct Args {
    /// JSON file holding an array of records
    #[arg(short, long)]
    input: PathBuf,

    /// Bootstrap config file (overrides PROSPECTOR_CONFIG)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Length of the ranked prospect list
    #[arg(short = 'k', long)]
    top_k: Option<usize>,

    /// Write the Batch Result here instead of stdout
    #[arg(short, long)]
    output: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let (toml_config, config_source) = ConfigResolver::new(args.config.clone())
        .load()
        .context("Failed to load configuration")?;
    prospector_common::logging::init_tracing(&toml_config.logging)
        .context("Failed to initialise logging")?;

    info!("Starting prospector-enrich {}", env!("CARGO_PKG_VERSION"));
    info!(source = ?config_source, "Configuration loaded");

    let mut config =
        PipelineConfig::from_toml_config(&toml_config).context("Invalid pipeline configuration")?;
    if let Some(top_k) = args.top_k {
        config.batch.top_k = top_k;
    }

    let clients = SourceClients::http(&config, &toml_config)
        .context("Failed to configure source clients")?;
    let pipeline =
        EnrichmentPipeline::new(config, clients).context("Failed to build pipeline")?;

    let records = input::load_records(&args.input)
        .with_context(|| format!("Failed to read records from {}", args.input.display()))?;

    let cancel = CancellationToken::new();
    let ctrl_c_token = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Received Ctrl+C, finishing in-flight records");
            ctrl_c_token.cancel();
        }
    });

    let progress = tokio::spawn(log_progress(pipeline.events().subscribe()));

    let result = pipeline.run_batch(records, cancel).await;
    progress.abort();

    for stats in &result.source_stats {
        info!(
            source = %stats.source,
            fetches = stats.fetches,
            external_calls = stats.external_calls,
            retries = stats.retries,
            cache_hits = stats.cache.hits,
            cache_misses = stats.cache.misses,
            "Source usage"
        );
    }

    let json = serde_json::to_string_pretty(&result).context("Failed to serialise result")?;
    match &args.output {
        Some(path) => std::fs::write(path, json)
            .with_context(|| format!("Failed to write {}", path.display()))?,
        None => println!("{}", json),
    }

    let s = &result.summary;
    eprintln!(
        "{} records: {} succeeded, {} degraded, {} filtered, {} failed, {} cancelled in {}",
        s.total,
        s.succeeded,
        s.degraded,
        s.filtered,
        s.failed,
        s.cancelled,
        format_elapsed_ms(result.elapsed_ms)
    );

    Ok(())
}
