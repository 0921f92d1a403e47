//! # Edge Gateway
//!
//! An edge request pipeline for an API gateway built on Axum:
//!
//! - **Authentication**: HS256 bearer tokens, role-based path policy,
//!   per-IP throttling of failed attempts
//! - **Caching**: successful GET responses replayed from a bounded,
//!   idle-expiring in-memory store
//! - **Resilience**: one circuit breaker per routed service, with a
//!   fallback that explains why the call did not go through
//! - **Uniform errors**: every failure rendered as the same JSON record
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      Axum HTTP Server                       │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Rate Limit → Request ID/Trace → CORS → JWT Auth            │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Response Cache (GET)                                       │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Dispatch: route match → breaker → Upstream | fallback      │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Classifier: GatewayError → status + JSON error record      │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use edge_gateway::{AppState, Config, build_router};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::from_env()?;
//!     let state = AppState::new(config)?;
//!     let app = build_router(state);
//!
//!     // Serve with `into_make_service_with_connect_info::<SocketAddr>()`
//!     // so rate limiting can key on the peer address.
//!     Ok(())
//! }
//! ```
//!
//! ## Routing Configuration
//!
//! ```bash
//! JWT_SECRET=$(openssl rand -hex 32) \
//! GATEWAY_SERVICES=orders=http://orders:8080,billing=http://billing:8080 \
//! cargo run
//! ```

pub mod auth;
pub mod cache;
pub mod classifier;
pub mod config;
pub mod error;
pub mod gateway;
pub mod handlers;
pub mod metrics;
pub mod middleware;
pub mod routes;
pub mod state;

// Re-exports for convenience
pub use config::Config;
pub use error::{GatewayError, GatewayResult, StartupError, StartupResult};
pub use routes::build_router;
pub use state::AppState;
