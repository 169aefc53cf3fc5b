//! recall-worker - runs ledger reconciliation in the background.

use anyhow::Context;
use recall_core::{BackgroundRuntime, RecallConfig, RuntimeConfig};
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Wait for shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

fn init_tracing() {
    let json = std::env::var("RECALL_LOG_JSON").is_ok();
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,recall_core=debug,recall_worker=debug"));

    tracing_subscriber::registry()
        .with(filter)
        .with(json.then(|| fmt::layer().json()))
        .with((!json).then(fmt::layer))
        .init();
}

/// Environment config, optionally replaced by the file named in `RECALL_CONFIG`.
fn runtime_config() -> anyhow::Result<RuntimeConfig> {
    let mut config = RuntimeConfig::from_env();

    if let Ok(path) = std::env::var("RECALL_CONFIG") {
        let recall = RecallConfig::from_file(&path)
            .with_context(|| format!("failed to load config from {}", path))?;
        config.database_path = Some(recall.database_path.clone());
        config.recall = recall;
    }

    Ok(config)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    let config = runtime_config()?;
    info!(
        database = ?config.database_path,
        interval_minutes = config.recall.reconcile.interval_minutes,
        sample_size = config.recall.reconcile.sample_size,
        "Starting recall-worker"
    );

    let mut runtime = BackgroundRuntime::new(config)
        .await
        .context("failed to create background runtime")?;
    runtime
        .start()
        .await
        .context("failed to start background runtime")?;

    shutdown_signal().await;
    info!("Shutdown signal received, stopping schedulers...");

    runtime.shutdown().await?;

    info!("Worker stopped cleanly");
    Ok(())
}
