//! Unauthenticated liveness endpoint for load balancers and monitoring.

use crate::models::{HealthDetails, HealthStatus};
use crate::state::AppState;
use axum::extract::State;
use axum::Json;
use chrono::Utc;

pub async fn service_status(State(_state): State<AppState>) -> Json<HealthStatus> {
    Json(HealthStatus {
        status: "healthy",
        timestamp: Utc::now(),
        details: HealthDetails {
            service: "graphgate",
            version: env!("CARGO_PKG_VERSION"),
        },
    })
}
