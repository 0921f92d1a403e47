//! Health, readiness and actuator endpoints.
//!
//! # Endpoints
//!
//! - `GET /health` - Liveness; always 200
//! - `GET /ready` - 503 until at least one route is configured
//! - `GET /actuator/health` - Breaker state per route
//! - `GET /actuator/routes` - Route descriptors
//!
//! All four are on the default public allow-list.

use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::instrument;

use crate::gateway::{BreakerSnapshot, CircuitState, RouteDescriptor};
use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub uptime_seconds: u64,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct ReadinessResponse {
    pub status: &'static str,
    pub routes: usize,
}

/// Aggregate breaker view. `DEGRADED` while any breaker is not closed.
#[derive(Debug, Serialize)]
pub struct ActuatorHealthResponse {
    pub status: &'static str,
    pub breakers: Vec<BreakerSnapshot>,
    pub cache_entries: u64,
}

#[instrument(skip(state))]
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "UP",
        version: env!("CARGO_PKG_VERSION"),
        uptime_seconds: state.uptime_seconds(),
        timestamp: Utc::now(),
    })
}

/// Readiness probe for orchestrators.
///
/// A gateway with no routes would answer every request with 404, so it is
/// reported as not ready.
#[instrument(skip(state))]
pub async fn readiness_check(
    State(state): State<AppState>,
) -> (StatusCode, Json<ReadinessResponse>) {
    let routes = state.routes.len();
    if routes == 0 {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(ReadinessResponse {
                status: "NO_ROUTES",
                routes,
            }),
        )
    } else {
        (
            StatusCode::OK,
            Json(ReadinessResponse {
                status: "READY",
                routes,
            }),
        )
    }
}

#[instrument(skip(state))]
pub async fn actuator_health(State(state): State<AppState>) -> Json<ActuatorHealthResponse> {
    let breakers = state.breakers.snapshot().await;
    let status = if breakers.iter().all(|b| b.state == CircuitState::Closed) {
        "UP"
    } else {
        "DEGRADED"
    };

    Json(ActuatorHealthResponse {
        status,
        breakers,
        cache_entries: state.store.entry_count(),
    })
}

#[instrument(skip(state))]
pub async fn actuator_routes(State(state): State<AppState>) -> Json<Vec<RouteDescriptor>> {
    Json(state.routes.iter().cloned().collect())
}
