/// Liveness and database reachability
///
/// `GET /health` pings the procedure gateway. The route never fails: an
/// unreachable database is reported as `"status": "degraded"` with
/// `"database": "disconnected"` so load balancers can still read the body.

use crate::{app::AppState, error::ApiResult};
use axum::{extract::State, Json};
use serde::{Deserialize, Serialize};

/// Health check response
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    /// `healthy` or `degraded`
    pub status: String,
    pub version: String,
    pub environment: String,
    /// `connected` or `disconnected`
    pub database: String,
}

/// Health check handler
///
/// Always answers 200; a failed ping reports `degraded` instead.
pub async fn health_check(State(state): State<AppState>) -> ApiResult<Json<HealthResponse>> {
    let connected = match state.gateway.ping().await {
        Ok(()) => true,
        Err(e) => {
            tracing::warn!(error = %e, "Health check could not reach the database");
            false
        }
    };

    Ok(Json(HealthResponse {
        status: if connected { "healthy" } else { "degraded" }.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        environment: state.config.environment.to_string(),
        database: if connected { "connected" } else { "disconnected" }.to_string(),
    }))
}
