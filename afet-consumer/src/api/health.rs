//! Health and metrics endpoints

use axum::extract::State;
use axum::http::header;
use axum::response::IntoResponse;
use axum::{routing::get, Json, Router};
use chrono::Utc;
use serde::Serialize;

use crate::AppState;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub module: String,
    pub version: String,
    /// True once the consumer group has been assigned partitions
    pub ready: bool,
    pub uptime_seconds: i64,
}

/// GET /healthcheck
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        module: "afet-consumer".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        ready: *state.ready.borrow(),
        uptime_seconds: (Utc::now() - state.startup_time).num_seconds(),
    })
}

/// GET /metrics
pub async fn metrics(State(state): State<AppState>) -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        state.metrics.render(),
    )
}

pub fn health_routes() -> Router<AppState> {
    Router::new()
        .route("/healthcheck", get(health_check))
        .route("/metrics", get(metrics))
}
