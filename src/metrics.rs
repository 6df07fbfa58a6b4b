//! Prometheus metric families and the standalone metrics server.
//!
//! Every family is labeled by
//! `{chain_id, chain_name, transport, provider, balancer, method, client}`;
//! cardinality is bounded by the cross product of configured chains and
//! providers with the distinct methods and clients seen. The server runs on
//! its own port so that scrapes never contend with proxy traffic.

use std::{net::SocketAddr, sync::LazyLock};

use axum::{
    http::{header, StatusCode},
    response::IntoResponse,
    routing::get,
    Router, Server,
};
use prometheus::{
    register_histogram_vec, register_int_counter_vec, Encoder, HistogramVec, IntCounterVec,
    TextEncoder,
};
use thiserror::Error;
use tokio::sync::watch;
use tracing::{error, info};

use crate::config::Config;

const LABELS: [&str; 7] =
    ["chain_id", "chain_name", "transport", "provider", "balancer", "method", "client"];

/// Per-call end-to-end latency. Batches are observed once under
/// `method="batch"`.
pub static REQUEST_LATENCY_SECONDS: LazyLock<HistogramVec> = LazyLock::new(|| {
    register_histogram_vec!(
        "rpcgate_request_latency_seconds",
        "Request latency distribution in seconds",
        &LABELS,
        vec![0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.0, 5.0]
    )
    .unwrap()
});

/// One increment per JSON-RPC call, N per batch.
pub static REQUEST_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    register_int_counter_vec!("rpcgate_request_total", "Request total", &LABELS).unwrap()
});

/// Upstream answered with a non-2xx status.
pub static REQUEST_ERROR: LazyLock<IntCounterVec> = LazyLock::new(|| {
    register_int_counter_vec!("rpcgate_request_error_total", "Request error total", &LABELS)
        .unwrap()
});

/// Upstream response carried a JSON-RPC error object.
pub static CLIENT_REQUEST_ERROR: LazyLock<IntCounterVec> = LazyLock::new(|| {
    register_int_counter_vec!(
        "rpcgate_client_request_error_total",
        "Client request error total",
        &LABELS
    )
    .unwrap()
});

/// Bytes of upstream response body.
pub static RESPONSE_SIZE_BYTES: LazyLock<HistogramVec> = LazyLock::new(|| {
    register_histogram_vec!(
        "rpcgate_response_size_bytes",
        "Response body size distribution in bytes",
        &LABELS,
        vec![256.0, 1024.0, 4096.0, 16384.0, 65536.0, 262144.0, 1048576.0, 4194304.0]
    )
    .unwrap()
});

#[derive(Debug, Error)]
pub enum MetricsError {
    #[error("metrics server failed: {0}")]
    Server(#[from] hyper::Error),
}

/// Serves the default registry (the five families plus the process
/// collector) on the configured port and path until the shutdown signal.
pub async fn serve(cfg: &Config, mut shutdown: watch::Receiver<()>) -> Result<(), MetricsError> {
    // Touch the families so they are registered before the first scrape.
    LazyLock::force(&REQUEST_LATENCY_SECONDS);
    LazyLock::force(&REQUEST_TOTAL);
    LazyLock::force(&REQUEST_ERROR);
    LazyLock::force(&CLIENT_REQUEST_ERROR);
    LazyLock::force(&RESPONSE_SIZE_BYTES);

    let app = Router::new().route(&cfg.metrics_path(), get(metrics_handler));
    let addr = SocketAddr::from(([0, 0, 0, 0], cfg.metrics_port()));

    info!(addr = %addr, path = %cfg.metrics_path(), "metrics server started");
    Server::try_bind(&addr)?
        .serve(app.into_make_service())
        .with_graceful_shutdown(async move {
            let _ = shutdown.changed().await;
        })
        .await?;
    info!("metrics server stopped");
    Ok(())
}

async fn metrics_handler() -> impl IntoResponse {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    match encoder.encode(&metric_families, &mut buffer) {
        Ok(()) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, encoder.format_type().to_string())],
            buffer,
        ),
        Err(err) => {
            error!(error = %err, "failed to encode metrics");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                [(header::CONTENT_TYPE, "text/plain".to_string())],
                format!("error encoding metrics: {err}").into_bytes(),
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn families_register_and_gather() {
        REQUEST_TOTAL
            .with_label_values(&["1", "eth", "http", "alpha", "p2cewma", "eth_call", "tester"])
            .inc();
        REQUEST_LATENCY_SECONDS
            .with_label_values(&["1", "eth", "http", "alpha", "p2cewma", "eth_call", "tester"])
            .observe(0.02);
        RESPONSE_SIZE_BYTES
            .with_label_values(&["1", "eth", "http", "alpha", "p2cewma", "batch", "tester"])
            .observe(512.0);

        let names: Vec<String> =
            prometheus::gather().iter().map(|f| f.get_name().to_string()).collect();
        assert!(names.contains(&"rpcgate_request_total".to_string()));
        assert!(names.contains(&"rpcgate_request_latency_seconds".to_string()));
        assert!(names.contains(&"rpcgate_response_size_bytes".to_string()));
    }
}
