//! Logging setup
//!
//! This engine only ever needs local structured logs, so only the local
//! `tracing_subscriber::fmt` layer is wired in — no Jaeger/OTLP exporters.

use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use crate::conf::{LogLevel, Tracing};

impl LogLevel {
    /// Convert this config-level enum to a `tracing_subscriber` filter
    fn to_filter(self) -> LevelFilter {
        match self {
            LogLevel::Trace => LevelFilter::TRACE,
            LogLevel::Debug => LevelFilter::DEBUG,
            LogLevel::Info => LevelFilter::INFO,
            LogLevel::Warn => LevelFilter::WARN,
            LogLevel::Error => LevelFilter::ERROR,
        }
    }
}

/// Initialize the global tracing subscriber for this process
///
/// # Arguments
///
/// * `conf` - The tracing section of the engine config
pub fn setup(conf: &Tracing) {
    let filter = conf.level.to_filter();
    if conf.json {
        let layer = tracing_subscriber::fmt::layer().json().with_filter(filter);
        tracing_subscriber::registry()
            .with(layer)
            .try_init()
            .expect("failed to register tracing subscriber");
    } else {
        let layer = tracing_subscriber::fmt::layer().with_filter(filter);
        tracing_subscriber::registry()
            .with(layer)
            .try_init()
            .expect("failed to register tracing subscriber");
    }
}
