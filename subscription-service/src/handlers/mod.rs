//! HTTP handlers for subscription-service.

pub mod subscriptions;

use crate::services::{get_metrics, Database};
use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use serde_json::json;

pub use subscriptions::{api_router, ApiState, RequestDeadline};

pub async fn health_check() -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(json!({
            "status": "ok",
            "service": "subscription-service",
            "version": env!("CARGO_PKG_VERSION")
        })),
    )
}

/// Ready once the database answers.
pub async fn readiness_check(State(db): State<Database>) -> impl IntoResponse {
    match db.health_check().await {
        Ok(()) => (StatusCode::OK, Json(json!({ "status": "ready" }))),
        Err(e) => {
            tracing::warn!(error = %e, "Readiness check failed");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({ "status": "unavailable" })),
            )
        }
    }
}

/// Prometheus metrics endpoint.
pub async fn metrics() -> impl IntoResponse {
    (
        StatusCode::OK,
        [("content-type", "text/plain; charset=utf-8")],
        get_metrics(),
    )
}
