//! # Observability
//!
//! Tracing subscriber setup, Prometheus export and sync metric helpers.
//!
//! ## Usage
//!
//! ```ignore
//! use observability::{init_with_config, ObservabilityConfig};
//!
//! init_with_config(ObservabilityConfig::default())?;
//!
//! for pair in aligner.step(now) {
//!     observability::record_pair_metrics(&pair.meta, pair.trigger_index, pair.events.len());
//! }
//! ```

pub mod metrics;

use std::net::SocketAddr;

use anyhow::{Context, Result};
use metrics_exporter_prometheus::PrometheusBuilder;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

pub use crate::metrics::{
    record_buffer_state, record_clock_state, record_incident, record_pair_dispatched,
    record_pair_metrics, record_sample_received, MetricsSummary, RunningStats, StatsSummary,
    SyncMetricsAggregator,
};

/// Observability configuration
#[derive(Debug, Clone)]
pub struct ObservabilityConfig {
    pub log_format: LogFormat,
    /// Prometheus listen address (None = disabled)
    pub metrics_addr: Option<SocketAddr>,
    /// Filter used when `RUST_LOG` is unset
    pub default_log_level: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_format: LogFormat::Json,
            metrics_addr: None,
            default_log_level: "info".to_string(),
        }
    }
}

/// Log format
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    /// JSON structured logs
    #[default]
    Json,
    /// Human-readable multi-line
    Pretty,
    /// Single line
    Compact,
}

/// Initialize tracing and, if configured, the Prometheus exporter
pub fn init_with_config(config: ObservabilityConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.default_log_level));

    let fmt_layer = match config.log_format {
        LogFormat::Json => fmt::layer()
            .json()
            .with_target(true)
            .with_thread_ids(true)
            .with_thread_names(true)
            .with_file(true)
            .with_line_number(true)
            .boxed(),
        LogFormat::Pretty => fmt::layer().pretty().with_thread_names(true).boxed(),
        LogFormat::Compact => fmt::layer().compact().with_thread_names(true).boxed(),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer)
        .try_init()
        .context("Failed to initialize tracing subscriber")?;

    if let Some(addr) = config.metrics_addr {
        init_metrics_only(addr)?;
    }

    tracing::info!(
        log_format = ?config.log_format,
        metrics_addr = ?config.metrics_addr,
        "Observability initialized"
    );

    Ok(())
}

/// Install only the Prometheus recorder (tracing set up elsewhere)
pub fn init_metrics_only(addr: SocketAddr) -> Result<()> {
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .context("Failed to install Prometheus recorder")?;

    tracing::info!(%addr, "Prometheus metrics endpoint initialized");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ObservabilityConfig::default();
        assert_eq!(config.metrics_addr, None);
        assert_eq!(config.log_format, LogFormat::Json);
        assert_eq!(config.default_log_level, "info");
    }
}
