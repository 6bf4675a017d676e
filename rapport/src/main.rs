//! Command-line front end for the delivery engine.
//!
//! Loads queued reports from a JSON export, applies the configuration
//! file plus command-line overrides, and performs one delivery run.

use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use anyhow::Context as _;
use clap::Parser;
use rapport_common::{
    logging::{self, Verbosity},
    report::AggregateReport,
};
use rapport_delivery::{
    BatchScheduler, DeliveryConfig, DkimSigner, MemoryQueue, TransportDispatcher,
};

#[derive(Debug, Parser)]
#[command(name = "rapport", version, about = "Deliver queued aggregate reports")]
struct Args {
    /// JSON file holding the reports to deliver.
    reports: PathBuf,

    /// Configuration file (TOML). Defaults apply when omitted.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Reports processed between inter-batch pauses.
    #[arg(long)]
    batch_size: Option<usize>,

    /// Seconds to pause between batches.
    #[arg(long)]
    delay: Option<u64>,

    /// Per-report deadline in seconds.
    #[arg(long)]
    timeout: Option<u64>,

    /// Enable per-step protocol tracing.
    #[arg(short, long)]
    verbose: bool,

    /// Disable logging entirely.
    #[arg(short, long, conflicts_with = "verbose")]
    quiet: bool,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    logging::init(if args.quiet {
        Verbosity::Quiet
    } else if args.verbose {
        Verbosity::Verbose
    } else {
        Verbosity::Normal
    });

    let mut config = match &args.config {
        Some(path) => DeliveryConfig::from_file(path)
            .with_context(|| format!("loading configuration {}", path.display()))?,
        None => DeliveryConfig::default(),
    };
    if let Some(batch_size) = args.batch_size {
        config.batch_size = batch_size;
    }
    if let Some(delay) = args.delay {
        config.inter_batch_delay_secs = delay;
    }
    if let Some(timeout) = args.timeout {
        config.per_report_timeout_secs = timeout;
    }
    config.validate().context("validating configuration")?;

    // An unusable signing key is fatal here, before any report is
    // touched.
    let signer = config
        .dkim
        .as_ref()
        .map(DkimSigner::from_config)
        .transpose()
        .context("signing is configured but the key is unusable")?;

    let reports = load_reports(&args.reports)?;
    let queue = Arc::new(MemoryQueue::with_reports(reports));
    let config = Arc::new(config);

    let dispatcher = TransportDispatcher::new(config.clone(), signer)?;
    let scheduler = BatchScheduler::new(config, queue, dispatcher);

    let summary = scheduler.run().await?;
    println!(
        "processed {} report(s): {} delivered, {} deleted, {} deferred",
        summary.processed, summary.delivered, summary.deleted, summary.deferred
    );

    Ok(())
}

fn load_reports(path: &Path) -> anyhow::Result<Vec<AggregateReport>> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("reading reports file {}", path.display()))?;
    serde_json::from_str(&text)
        .with_context(|| format!("parsing reports file {}", path.display()))
}
