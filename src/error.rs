use thiserror::Error;

use crate::middleware::RateLimitError;

/// Request-scoped failure taxonomy.
///
/// Every terminal failure in the pipeline is expressed as one of these
/// variants at the point where it happens, and rendered by the single
/// exhaustive mapping in [`crate::classifier::classify`]. Nothing here is
/// fatal to the process.
///
/// # Forwarding Errors
///
/// Transport-level failures are split into specific variants so the
/// fallback path can pick the right message without inspecting error chains:
///
/// - `Timeout` - the backend did not answer within the forward timeout
/// - `ConnectionRefused` - the backend host actively refused the connection
/// - `HostUnreachable` - the service id or host could not be resolved
/// - `CircuitOpen` - the route's breaker rejected the call
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GatewayError {
    #[error("Authentication failed: {0}")]
    Unauthenticated(String),

    #[error("Access denied: {0}")]
    AccessDenied(String),

    #[error("Upstream timed out: {0}")]
    Timeout(String),

    #[error("Circuit breaker '{0}' does not permit further calls")]
    CircuitOpen(String),

    #[error("Connection refused: {0}")]
    ConnectionRefused(String),

    #[error("Host unreachable: {0}")]
    HostUnreachable(String),

    #[error("No route matches path {0}")]
    RouteNotFound(String),

    #[error("Upstream responded with status {code}: {detail}")]
    UpstreamStatus { code: u16, detail: String },

    #[error("Failed to capture response body: {0}")]
    CachingFailure(String),

    #[error("Too many requests (retry after {retry_after_secs}s)")]
    RateLimited { retry_after_secs: u64 },

    #[error("Request body rejected: {0}")]
    PayloadTooLarge(String),

    #[error("Unexpected failure: {0}")]
    Unclassified(String),
}

impl GatewayError {
    /// Short, stable label used for metrics and structured logs.
    pub fn kind(&self) -> &'static str {
        match self {
            GatewayError::Unauthenticated(_) => "unauthenticated",
            GatewayError::AccessDenied(_) => "access_denied",
            GatewayError::Timeout(_) => "timeout",
            GatewayError::CircuitOpen(_) => "circuit_open",
            GatewayError::ConnectionRefused(_) => "connection_refused",
            GatewayError::HostUnreachable(_) => "host_unreachable",
            GatewayError::RouteNotFound(_) => "route_not_found",
            GatewayError::UpstreamStatus { .. } => "upstream_status",
            GatewayError::CachingFailure(_) => "caching_failure",
            GatewayError::RateLimited { .. } => "rate_limited",
            GatewayError::PayloadTooLarge(_) => "payload_too_large",
            GatewayError::Unclassified(_) => "unclassified",
        }
    }

    /// Whether a circuit breaker should count this outcome as a failure.
    ///
    /// Only backend-side conditions trip the breaker. Client-side rejections
    /// (auth, routing, body limits) never reach it.
    pub fn is_breaker_failure(&self) -> bool {
        matches!(
            self,
            GatewayError::Timeout(_)
                | GatewayError::ConnectionRefused(_)
                | GatewayError::HostUnreachable(_)
                | GatewayError::UpstreamStatus { .. }
                | GatewayError::Unclassified(_)
        )
    }
}

/// Errors raised while bootstrapping the gateway (configuration, layers, bind).
#[derive(Error, Debug)]
pub enum StartupError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Failed to build upstream client: {0}")]
    Upstream(String),

    #[error("Rate limiter configuration error: {0}")]
    RateLimit(#[from] RateLimitError),
}

/// Convenience type alias for request-scoped results.
pub type GatewayResult<T> = Result<T, GatewayError>;

/// Convenience type alias for startup results.
pub type StartupResult<T> = Result<T, StartupError>;
