pub mod anomaly;
pub mod transactions;

use crate::AppState;
use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use serde::Serialize;

#[derive(Debug, Serialize)]
pub struct HealthStatus {
    pub status: String,
    pub version: String,
    pub db: String,
}

pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let db_status = match state.workflow.store().ping().await {
        Ok(()) => "connected",
        Err(err) => {
            tracing::warn!(error = %err, "Health check could not reach the store");
            "disconnected"
        }
    };
    let healthy = db_status == "connected";

    let health_response = HealthStatus {
        status: if healthy { "healthy" } else { "unhealthy" }.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        db: db_status.to_string(),
    };

    let status_code = if healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (status_code, Json(health_response))
}
