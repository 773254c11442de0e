//! Health check handlers

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use serde::Serialize;

use cadence_types::Platform;

use crate::state::AppState;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
}

#[derive(Serialize)]
pub struct ReadyResponse {
    pub status: &'static str,
    pub database: &'static str,
    pub platforms: PlatformReadiness,
}

/// Which payment platforms have credentials
#[derive(Serialize)]
pub struct PlatformReadiness {
    pub card: bool,
    pub apple: bool,
    pub google: bool,
}

/// Liveness check - always returns OK if the service is running
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// Readiness check - checks storage connectivity
pub async fn ready(State(state): State<AppState>) -> Result<Json<ReadyResponse>, StatusCode> {
    let database = match &state.pool {
        Some(pool) => match sqlx::query("SELECT 1").execute(pool).await {
            Ok(_) => "connected",
            Err(e) => {
                tracing::error!(error = ?e, "Database health check failed");
                return Err(StatusCode::SERVICE_UNAVAILABLE);
            }
        },
        None => "in-memory",
    };

    Ok(Json(ReadyResponse {
        status: "ready",
        database,
        platforms: PlatformReadiness {
            card: state.billing.platform_enabled(Platform::Card),
            apple: state.billing.platform_enabled(Platform::Apple),
            google: state.billing.platform_enabled(Platform::Google),
        },
    }))
}
