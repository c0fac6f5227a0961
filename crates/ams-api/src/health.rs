//! Health endpoints
//!
//! All three report API and database state; a failed store ping turns the
//! response into a 503.

use axum::{extract::State, http::StatusCode, response::IntoResponse, response::Response, Json};
use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;
use utoipa::ToSchema;

use crate::AppState;

pub const STATUS_UP: &str = "UP";
pub const STATUS_DOWN: &str = "DOWN";

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ServiceHealth {
    pub api: String,
    pub database: String,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct HealthResponse {
    /// UP or DOWN
    pub status: String,
    /// RFC 3339
    pub timestamp: String,
    pub version: String,
    pub services: ServiceHealth,
}

async fn health_report(state: &AppState) -> Response {
    let database_up = match state.store.ping().await {
        Ok(()) => true,
        Err(e) => {
            warn!(error = %e, "Database health check failed");
            false
        }
    };

    let status = if database_up { STATUS_UP } else { STATUS_DOWN };
    let body = HealthResponse {
        status: status.to_string(),
        timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
        version: state.version.clone(),
        services: ServiceHealth {
            api: STATUS_UP.to_string(),
            database: status.to_string(),
        },
    };

    let code = if database_up {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (code, Json(body)).into_response()
}

#[utoipa::path(
    get,
    path = "/health",
    tag = "health",
    responses(
        (status = 200, description = "Service healthy", body = HealthResponse),
        (status = 503, description = "Database unreachable", body = HealthResponse)
    )
)]
pub async fn health_handler(State(state): State<AppState>) -> Response {
    health_report(&state).await
}

/// Readiness probe
#[utoipa::path(
    get,
    path = "/health/ready",
    tag = "health",
    responses(
        (status = 200, description = "Ready to accept traffic", body = HealthResponse),
        (status = 503, description = "Not ready", body = HealthResponse)
    )
)]
pub async fn readiness_probe(State(state): State<AppState>) -> Response {
    health_report(&state).await
}

/// Liveness probe
#[utoipa::path(
    get,
    path = "/health/live",
    tag = "health",
    responses(
        (status = 200, description = "Service live", body = HealthResponse),
        (status = 503, description = "Database unreachable", body = HealthResponse)
    )
)]
pub async fn liveness_probe(State(state): State<AppState>) -> Response {
    health_report(&state).await
}
