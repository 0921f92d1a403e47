//! Router assembly and middleware stack.
//!
//! # Middleware Stack (outermost first)
//!
//! ```text
//! Request
//!    │
//!    ▼
//! ┌──────────────────┐
//! │  Rate Limiting   │ ← 429 per client IP
//! └────────┬─────────┘
//!          ▼
//! ┌──────────────────┐
//! │ Request ID + Trace│ ← X-Request-Id set, traced, echoed
//! └────────┬─────────┘
//!          ▼
//! ┌──────────────────┐
//! │      CORS        │ ← answers preflight before auth
//! └────────┬─────────┘
//!          ▼
//! ┌──────────────────┐
//! │  Authentication  │ ← 401 / 403 (public paths bypass)
//! └────────┬─────────┘
//!          ▼
//! ┌──────────────────┐
//! │  Response Cache  │ ← GET only, proxied routes only
//! └────────┬─────────┘
//!          ▼
//!   Dispatch → backend, or fallback
//! ```
//!
//! # Route Groups
//!
//! - `/health`, `/ready`, `/actuator/health`, `/actuator/routes`
//! - `/fallback/{service_id}` - fallback target, any method
//! - everything else - prefix-matched and forwarded to a backing service

use axum::Router;
use axum::extract::DefaultBodyLimit;
use axum::handler::Handler;
use axum::routing::{any, get};
use tower::Layer;
use tower_http::cors::{Any, CorsLayer};
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::cache::ResponseCacheLayer;
use crate::gateway::{dispatch, fallback_handler};
use crate::handlers;
use crate::middleware::{JwtAuthLayer, RateLimitLayer};
use crate::state::AppState;

/// Build the gateway router with all routes and middleware configured.
pub fn build_router(state: AppState) -> Router {
    let config = state.config.clone();

    let router = Router::new()
        .route("/health", get(handlers::health_check))
        .route("/ready", get(handlers::readiness_check))
        .route("/actuator/health", get(handlers::actuator_health))
        .route("/actuator/routes", get(handlers::actuator_routes))
        .route("/fallback/{service_id}", any(fallback_handler));

    // Anything unmatched above is proxied.
    let mut router = if config.cache_enabled {
        info!(
            max_entries = config.cache_max_entries,
            idle_ttl_secs = config.cache_idle_ttl.as_secs(),
            max_body_bytes = config.cache_max_body_bytes,
            "Response cache enabled"
        );
        let cache = ResponseCacheLayer::new(state.store.clone(), config.cache_max_body_bytes);
        router.fallback_service(cache.layer(dispatch.with_state(state.clone())))
    } else {
        info!("Response cache disabled (CACHE_ENABLED=false)");
        router.fallback(dispatch)
    };

    // =========================================================================
    // Apply Middleware Stack (order matters - applied bottom to top)
    // =========================================================================

    // 1. Inbound body limit for forwarded requests
    router = router.layer(DefaultBodyLimit::max(config.max_request_body_size));

    // 2. Authentication and authorization
    router = router.layer(JwtAuthLayer::new(
        state.validator.clone(),
        state.policy.clone(),
        state.trusted_proxies.clone(),
        state.auth_failure_limiter.clone(),
    ));

    // 3. CORS
    router = router.layer(build_cors_layer(&config.cors_allowed_origins));

    // 4. Request ID (set outside tracing so spans carry it, echoed on the way out)
    router = router
        .layer(PropagateRequestIdLayer::x_request_id())
        .layer(TraceLayer::new_for_http())
        .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid));

    // 5. Rate limiting (outermost)
    if let Some(limiter) = &state.client_limiter {
        info!(
            rps = config.rate_limit_rps,
            burst = config.rate_limit_burst,
            trusted_proxies = config.trusted_proxies.len(),
            "Rate limiting enabled"
        );
        router = router.layer(RateLimitLayer::new(
            limiter.clone(),
            config.rate_limit_rps,
            state.trusted_proxies.clone(),
        ));
    } else {
        info!("Rate limiting disabled (RATE_LIMIT_RPS=0)");
    }

    router.with_state(state)
}

/// Build CORS layer from configuration. `*` allows any origin.
fn build_cors_layer(allowed_origins: &[String]) -> CorsLayer {
    let allow_any = allowed_origins.iter().any(|o| o == "*");

    if allow_any {
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any)
    } else {
        let origins: Vec<_> = allowed_origins
            .iter()
            .filter_map(|o| o.parse().ok())
            .collect();

        CorsLayer::new()
            .allow_origin(origins)
            .allow_methods(Any)
            .allow_headers(Any)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use axum::body::Body;
    use axum::http::{Method, Request, StatusCode, header};
    use tower::ServiceExt;

    use super::*;
    use crate::config::Config;

    fn state() -> AppState {
        AppState::new(Config {
            jwt_secret: "0123456789abcdef0123456789abcdef".to_string(),
            rate_limit_rps: 0,
            ..Config::default()
        })
        .unwrap()
    }

    #[tokio::test]
    async fn test_preflight_answered_without_token() {
        let app = build_router(state());
        let req = Request::builder()
            .method(Method::OPTIONS)
            .uri("/orders/1")
            .header(header::ORIGIN, "https://app.example.com")
            .header(header::ACCESS_CONTROL_REQUEST_METHOD, "GET")
            .body(Body::empty())
            .unwrap();

        let response = app.oneshot(req).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers().contains_key(header::ACCESS_CONTROL_ALLOW_ORIGIN));
    }

    #[tokio::test]
    async fn test_request_id_is_echoed() {
        let app = build_router(state());
        let req = Request::builder()
            .uri("/health")
            .header("x-request-id", "abc-123")
            .body(Body::empty())
            .unwrap();

        let response = app.oneshot(req).await.unwrap();
        assert_eq!(response.headers().get("x-request-id").unwrap(), "abc-123");
    }

    #[test]
    fn test_build_cors_layer_specific() {
        let origins = vec![
            "https://example.com".to_string(),
            "https://app.example.com".to_string(),
        ];
        let _layer = build_cors_layer(&origins);
    }
}
