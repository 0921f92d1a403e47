//! Exception-to-HTTP-status classification shared by the global error path
//! and the fallback handler.
//!
//! [`classify`] is a pure, exhaustive mapping from a [`GatewayError`] and a
//! logical service name to a status code and a client-facing message.
//! [`ErrorRecord`] is the single JSON error contract every failure is
//! rendered with:
//!
//! ```json
//! {
//!   "message": "Service 'orders' timed out.",
//!   "timestamp": "1718000000000",
//!   "status": "504",
//!   "error": "Gateway Timeout",
//!   "path": "/orders/42"
//! }
//! ```

use axum::Json;
use axum::http::{HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use chrono::Utc;
use serde::Serialize;

use crate::error::GatewayError;

/// Service name used when neither the exchange context nor a matched route
/// names the backing service.
pub const UNKNOWN_SERVICE: &str = "unknown-service";

/// Result of classifying a failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classification {
    pub status: StatusCode,
    pub message: String,
}

/// Map a failure and the logical service name to a status and message.
pub fn classify(error: &GatewayError, service: &str) -> Classification {
    let (status, message) = match error {
        GatewayError::Unauthenticated(_) => (
            StatusCode::UNAUTHORIZED,
            "Authentication failed: Invalid or missing token.".to_string(),
        ),
        GatewayError::AccessDenied(_) => (
            StatusCode::FORBIDDEN,
            "Authorization failed: You do not have permission to access this resource."
                .to_string(),
        ),
        GatewayError::Timeout(_) => (
            StatusCode::GATEWAY_TIMEOUT,
            format!("Service '{service}' timed out."),
        ),
        GatewayError::CircuitOpen(_) => (
            StatusCode::SERVICE_UNAVAILABLE,
            format!("Service '{service}' circuit is open. Please try again later."),
        ),
        GatewayError::ConnectionRefused(_) => (
            StatusCode::SERVICE_UNAVAILABLE,
            format!("Service '{service}' is currently down or unreachable."),
        ),
        GatewayError::HostUnreachable(_) => (
            StatusCode::SERVICE_UNAVAILABLE,
            format!("Service '{service}' not found or unreachable."),
        ),
        GatewayError::RouteNotFound(_) => (
            StatusCode::NOT_FOUND,
            format!("Service '{service}' not found or route is misconfigured."),
        ),
        GatewayError::UpstreamStatus { code, detail } => (
            resolve_status(*code),
            format!("Service '{service}' returned an error: {detail}."),
        ),
        GatewayError::RateLimited { .. } => (
            StatusCode::TOO_MANY_REQUESTS,
            "Too many requests. Please retry later.".to_string(),
        ),
        GatewayError::PayloadTooLarge(_) => (
            StatusCode::PAYLOAD_TOO_LARGE,
            "Request body exceeds the configured size limit.".to_string(),
        ),
        // Capture failures fail the request like any unexpected error.
        GatewayError::CachingFailure(_) | GatewayError::Unclassified(_) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("An unexpected error occurred with service '{service}'."),
        ),
    };

    Classification { status, message }
}

/// Resolve a numeric upstream status, falling back to 500 when the code is
/// not a known HTTP status.
fn resolve_status(code: u16) -> StatusCode {
    match StatusCode::from_u16(code) {
        Ok(status) if status.canonical_reason().is_some() => status,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// Pick the logical service name for an error message.
///
/// Precedence: the service id recorded in the exchange context, then the
/// matched route's id, then [`UNKNOWN_SERVICE`].
pub fn resolve_service_name<'a>(context_service: Option<&'a str>, route_id: Option<&'a str>) -> &'a str {
    context_service.or(route_id).unwrap_or(UNKNOWN_SERVICE)
}

/// Serialized error body. Numeric fields are strings on the wire.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ErrorRecord {
    pub message: String,
    pub timestamp: String,
    pub status: String,
    pub error: String,
    pub path: String,
}

impl ErrorRecord {
    /// Build a record for a classified failure on `path`, stamped with the
    /// current time in epoch milliseconds.
    pub fn new(classification: &Classification, path: &str) -> Self {
        Self {
            message: classification.message.clone(),
            timestamp: Utc::now().timestamp_millis().to_string(),
            status: classification.status.as_u16().to_string(),
            error: classification
                .status
                .canonical_reason()
                .unwrap_or("Unknown Status")
                .to_string(),
            path: path.to_string(),
        }
    }
}

/// Render a failure as the uniform JSON error response.
///
/// The full error is logged server-side; the client only sees the
/// classified message.
pub fn error_response(error: &GatewayError, service: &str, path: &str) -> Response {
    let classification = classify(error, service);

    if classification.status.is_server_error() {
        tracing::error!(error = %error, kind = error.kind(), service, path, "Request failed");
    } else {
        tracing::warn!(error = %error, kind = error.kind(), service, path, "Request rejected");
    }

    let record = ErrorRecord::new(&classification, path);
    let mut response = (classification.status, Json(record)).into_response();

    match error {
        GatewayError::Unauthenticated(_) => {
            response
                .headers_mut()
                .insert(header::WWW_AUTHENTICATE, HeaderValue::from_static("Bearer"));
        }
        GatewayError::RateLimited { retry_after_secs } => {
            response
                .headers_mut()
                .insert(header::RETRY_AFTER, HeaderValue::from(*retry_after_secs));
        }
        _ => {}
    }

    response
}
