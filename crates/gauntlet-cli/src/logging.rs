//! Tracing setup: human-readable stderr, optional JSON file mirror.

use std::path::Path;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

use gauntlet_core::config::{EnvConfig, LogConfig};

use crate::cli::args::Cli;

/// Install the global subscriber. `RUST_LOG` wins over the configured
/// level. The returned guard must live until exit so the file writer
/// flushes.
pub fn init(cli: &Cli) -> Option<WorkerGuard> {
    let log = EnvConfig::load(&cli.config)
        .map(|c| c.log)
        .unwrap_or_else(|_| LogConfig::default());
    let filter = std::env::var(EnvFilter::DEFAULT_ENV)
        .unwrap_or_else(|_| log.log_level.as_filter().to_string());

    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_writer(std::io::stderr)
        .with_filter(EnvFilter::new(&filter));

    if !log.log_to_file {
        tracing_subscriber::registry().with(stderr_layer).init();
        return None;
    }

    let dir = cli
        .config
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let appender = tracing_appender::rolling::daily(dir, format!("{}.log", log.log_name));
    let (writer, guard) = tracing_appender::non_blocking(appender);
    let file_layer = tracing_subscriber::fmt::layer()
        .json()
        .with_writer(writer)
        .with_filter(EnvFilter::new(&filter));
    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(file_layer)
        .init();
    Some(guard)
}
