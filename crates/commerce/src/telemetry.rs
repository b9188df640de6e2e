//! Tracing subscriber and Prometheus exporter setup.

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};
use thiserror::Error;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::{SubscriberInitExt, TryInitError};

use crate::config::{Config, LogFormat};

#[derive(Debug, Error)]
pub enum TelemetryError {
    #[error("Failed to install tracing subscriber: {0}")]
    Tracing(#[from] TryInitError),

    #[error("Failed to install Prometheus exporter: {0}")]
    Metrics(#[from] BuildError),
}

/// Installs the global tracing subscriber.
///
/// `RUST_LOG` in the process environment wins over the configured level.
pub fn init_tracing(config: &Config) -> Result<(), TelemetryError> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.log_level));
    let registry = tracing_subscriber::registry().with(filter);

    match config.log_format {
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json())
            .try_init()?,
        LogFormat::Pretty => registry.with(tracing_subscriber::fmt::layer()).try_init()?,
    }
    Ok(())
}

/// Installs the Prometheus recorder with its own HTTP listener when
/// `METRICS_ADDR` is configured. Returns whether an exporter was installed.
pub fn install_metrics_exporter(config: &Config) -> Result<bool, TelemetryError> {
    let Some(addr) = config.metrics_addr else {
        return Ok(false);
    };
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    tracing::info!(%addr, "Prometheus exporter listening");
    Ok(true)
}
