//! Health and metrics endpoint.

use std::sync::Arc;

use axum::extract::State;
use axum::http::header;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use once_cell::sync::Lazy;
use prometheus::{Encoder, Registry, TextEncoder};
use serde::Serialize;
use tower_http::trace::TraceLayer;

use pixelq_core::{Dispatcher, DispatcherStatus};

/// Global metrics registry.
pub static REGISTRY: Lazy<Registry> = Lazy::new(|| {
    let registry = Registry::new();
    for metric in pixelq_core::metrics::all_metrics() {
        if let Err(e) = registry.register(metric) {
            tracing::warn!("Failed to register metric: {}", e);
        }
    }
    registry
});

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub worker_id: String,
    pub dispatcher: DispatcherStatus,
}

#[derive(Clone)]
struct AppState {
    dispatcher: Arc<Dispatcher>,
    worker_id: String,
}

pub fn create_router(dispatcher: Arc<Dispatcher>, worker_id: String) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/metrics", get(metrics))
        .layer(TraceLayer::new_for_http())
        .with_state(AppState {
            dispatcher,
            worker_id,
        })
}

async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let dispatcher = state.dispatcher.status();
    Json(HealthResponse {
        status: if dispatcher.running { "ok" } else { "stopped" },
        worker_id: state.worker_id,
        dispatcher,
    })
}

async fn metrics() -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        encode_metrics(),
    )
}

/// Encode all metrics as Prometheus text format.
pub fn encode_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::warn!("Failed to encode metrics: {}", e);
    }
    String::from_utf8_lossy(&buffer).into_owned()
}
