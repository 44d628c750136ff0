//! Prometheus scrape endpoint

use axum::{extract::State, http::StatusCode, routing::get, Router};
use tokio::net::TcpListener;

use crate::metrics::Metrics;

/// Router exposing `GET /metrics`
pub fn metrics_router(metrics: Metrics) -> Router {
    Router::new()
        .route("/metrics", get(scrape))
        .with_state(metrics)
}

async fn scrape(State(metrics): State<Metrics>) -> Result<String, (StatusCode, String)> {
    metrics.render().map_err(|err| {
        tracing::warn!(error = %err, "Failed to render metrics");
        (StatusCode::INTERNAL_SERVER_ERROR, err.to_string())
    })
}

/// Serve the scrape endpoint on an already bound listener
pub async fn serve_metrics(listener: TcpListener, metrics: Metrics) -> std::io::Result<()> {
    if let Ok(addr) = listener.local_addr() {
        tracing::info!(%addr, "Metrics endpoint listening");
    }
    axum::serve(listener, metrics_router(metrics)).await
}
