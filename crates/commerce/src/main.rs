//! Engine entry point.
//!
//! Boots the engine from the environment, applies migrations when a database
//! is configured, and runs until SIGINT or SIGTERM.

use commerce::{BootstrapError, Commerce, Config, telemetry};
use storage::RecordStore;
use tokio::signal;

/// Waits for a shutdown signal (SIGINT or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for SIGINT");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("received SIGINT, shutting down");
        }
        () = terminate => {
            tracing::info!("received SIGTERM, shutting down");
        }
    }
}

async fn serve<S: RecordStore>(engine: Commerce<S>, config: &Config) {
    tracing::info!(
        persistent = config.database_url.is_some(),
        currency = %config.default_currency,
        "commerce engine ready"
    );
    shutdown_signal().await;
    drop(engine);
    tracing::info!("commerce engine stopped");
}

#[tokio::main]
async fn main() -> Result<(), BootstrapError> {
    let config = Config::from_env();
    telemetry::init_tracing(&config)?;
    telemetry::install_metrics_exporter(&config)?;

    if config.database_url.is_some() {
        serve(Commerce::connect(&config).await?, &config).await;
    } else {
        serve(Commerce::in_memory(&config), &config).await;
    }
    Ok(())
}
