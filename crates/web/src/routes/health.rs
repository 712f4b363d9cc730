//! Liveness probe for deploy checks and uptime monitors

use crate::state::AppState;
use axum::{extract::State, Json};
use serde::Serialize;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub database: &'static str,
    pub cache: &'static str,
}

/// Reports dependency health without failing the probe itself. A degraded
/// dependency still answers 200 so orchestrators keep routing to us while
/// the monitor pages on the body.
pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let database = match sqlx::query("SELECT 1").execute(&state.pool).await {
        Ok(_) => "healthy",
        Err(error) => {
            tracing::warn!(%error, "health check: database unreachable");
            "unhealthy"
        }
    };

    let cache = match state.cache.ping().await {
        Ok(()) => "healthy",
        Err(error) => {
            tracing::warn!(%error, "health check: cache unreachable");
            "unhealthy"
        }
    };

    let status = if database == "healthy" && cache == "healthy" {
        "ok"
    } else {
        "degraded"
    };

    Json(HealthResponse {
        status,
        version: env!("CARGO_PKG_VERSION"),
        database,
        cache,
    })
}
