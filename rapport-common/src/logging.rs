//! Logging bootstrap.
//!
//! Structured key=value records go through `tracing`; this module only
//! wires the subscriber. Delivery control flow never depends on whether a
//! subscriber is installed, so `Verbosity::Quiet` simply installs nothing.

use std::str::FromStr;

use tracing::metadata::LevelFilter;
use tracing_subscriber::{
    Layer, filter::FilterFn, prelude::__tracing_subscriber_SubscriberExt,
    util::SubscriberInitExt,
};

/// Requested logging volume.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verbosity {
    /// No subscriber at all.
    Quiet,
    /// Informational events and above.
    Normal,
    /// Everything, including per-step protocol tracing.
    Verbose,
}

/// Install the global subscriber.
///
/// The `LOG_LEVEL` environment variable overrides the level derived from
/// `verbosity`. Only events from this workspace's crates are emitted.
pub fn init(verbosity: Verbosity) {
    let default = match verbosity {
        Verbosity::Quiet => return,
        Verbosity::Normal => LevelFilter::INFO,
        Verbosity::Verbose => LevelFilter::TRACE,
    };

    let level = std::env::var("LOG_LEVEL").map_or(default, |level| {
        LevelFilter::from_str(level.as_str()).unwrap_or_else(|_| {
            eprintln!("Invalid log level specified {level}, defaulting to {default}");
            default
        })
    });

    tracing_subscriber::Registry::default()
        .with(
            tracing_subscriber::fmt::layer()
                .with_file(false)
                .with_line_number(false)
                .compact()
                .with_ansi(true)
                .with_timer(tracing_subscriber::fmt::time::ChronoUtc::rfc_3339())
                .with_filter(level)
                .with_filter(FilterFn::new(|metadata| {
                    metadata.target().starts_with("rapport")
                })),
        )
        .init();
}
