//! Route table for the Device Sync API, merged with health/ready/live
//! endpoints — same route-merging and middleware layering convention as
//! `crates/api-server/src/server.rs::ApiServer::start_http`.

use crate::handlers;
use crate::state::AppState;
use axum::routing::{get, post};
use axum::Router;
use tower_http::compression::CompressionLayer;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

pub fn build_router(state: AppState) -> Router {
    let device_routes = Router::new()
        .route("/devices/register", post(handlers::register))
        .route("/devices/heartbeat", post(handlers::heartbeat))
        .route("/devices/{id}/queue", get(handlers::queue))
        .route("/deliveries/{id}/playback", post(handlers::playback))
        .with_state(state.clone());

    let ops_routes = Router::new()
        .route("/health", get(handlers::health))
        .route("/ready", get(handlers::readiness))
        .route("/live", get(handlers::liveness))
        .with_state(state);

    Router::new()
        .merge(device_routes)
        .merge(ops_routes)
        .layer(CompressionLayer::new())
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

/// Starts the Prometheus metrics exporter on its own listener, exactly as
/// `ApiServer::start_metrics` does.
pub async fn start_metrics(host: &str, port: u16) -> anyhow::Result<()> {
    let builder = metrics_exporter_prometheus::PrometheusBuilder::new();
    let addr: std::net::SocketAddr = format!("{host}:{port}").parse()?;
    let handle = builder.with_http_listener(addr).install_recorder()?;
    tracing::info!(port, "metrics exporter started");
    std::mem::forget(handle);
    Ok(())
}
