//! rpcgate entry point.
//!
//! Responsibilities:
//! 1. Parse CLI arguments and load the YAML config.
//! 2. Set up logging.
//! 3. Start the proxy server and, when enabled, the metrics server.
//! 4. Drive a bounded graceful shutdown on `Ctrl+C` or `SIGTERM`.

use std::{sync::Arc, time::Duration};

use clap::Parser;
use tokio::{signal, sync::mpsc};
use tracing::{error, info};

use rpcgate::{
    config::{self, DEFAULT_CONFIG_PATH},
    logger, metrics,
    proxy::{Gateway, GatewayError},
    shutdown::ShutdownManager,
};

const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// Command-line interface for the application.
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the YAML configuration file.
    #[arg(long, default_value = DEFAULT_CONFIG_PATH)]
    config: String,
}

#[tokio::main]
async fn main() -> Result<(), GatewayError> {
    let args = Cli::parse();
    let cfg = config::parse_config(&args.config)?;
    logger::setup(&cfg.logger);

    info!("starting application");
    let gateway = Arc::new(Gateway::new(&cfg)?);

    let mut shutdown = ShutdownManager::new();
    // The first fatal server error wins and takes the process down.
    let (fatal_tx, mut fatal_rx) = mpsc::channel::<GatewayError>(1);

    let proxy = gateway.clone();
    let proxy_shutdown = shutdown.subscribe();
    let proxy_fatal = fatal_tx.clone();
    shutdown.spawn_task(async move {
        if let Err(err) = proxy.serve(proxy_shutdown).await {
            let _ = proxy_fatal.try_send(err);
        }
    });

    if cfg.metrics.enabled {
        let metrics_cfg = cfg.clone();
        let metrics_shutdown = shutdown.subscribe();
        shutdown.spawn_task(async move {
            if let Err(err) = metrics::serve(&metrics_cfg, metrics_shutdown).await {
                let _ = fatal_tx.try_send(err.into());
            }
        });
    } else {
        drop(fatal_tx);
    }

    tokio::select! {
        _ = shutdown_signal() => {
            info!("stopping application");
            if let Err(err) = shutdown.graceful_shutdown(SHUTDOWN_TIMEOUT).await {
                error!(error = %err, "shutdown did not complete cleanly");
            }
            info!("application stopped");
            Ok(())
        }
        Some(err) = fatal_rx.recv() => {
            error!(error = %err, "fatal server error");
            Err(err)
        }
    }
}

/// Resolves when the process receives `Ctrl+C` or, on unix, `SIGTERM`.
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Ctrl+C received"),
        _ = terminate => info!("SIGTERM received"),
    }
}
