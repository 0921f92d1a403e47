//! HTTP middleware in front of the gateway routes.
//!
//! ```text
//! Request → Rate Limiter → JWT Auth → (cache → dispatch) → Response
//!              ↓              ↓
//!          429 Too Many   401 / 403 / 429
//! ```
//!
//! Request IDs, tracing and CORS come from `tower-http` and are applied in
//! [`crate::routes::build_router`].

pub mod auth;
pub mod ip;
pub mod rate_limit;

pub use auth::{BEARER_PREFIX, BearerCredential, JwtAuthLayer, auth_failure_limiter, extract_bearer};
pub use ip::{CidrRange, TrustedProxyConfig, UNKNOWN_IP, client_ip};
pub use rate_limit::{KeyedLimiter, RateLimitError, RateLimitLayer, client_limiter, prune};
