//! Route dispatch to backing services behind per-route circuit breakers.

pub mod breaker;
pub mod dispatch;
pub mod fallback;
pub mod route;
pub mod upstream;

pub use breaker::{
    BreakerRegistry, BreakerSnapshot, CircuitBreaker, CircuitBreakerConfig, CircuitState,
};
pub use dispatch::{
    AUTH_ROLES_HEADER, AUTH_SUBJECT_HEADER, SERVICE_NAME_HEADER, TENANT_ID_HEADER, dispatch,
    outbound_headers,
};
pub use fallback::{fallback_handler, fallback_message, fallback_response};
pub use route::{RouteDescriptor, RouteTable, ServiceTarget};
pub use upstream::{HttpUpstream, HttpUpstreamConfig, Upstream, UpstreamRequest};

use crate::error::GatewayError;

/// Per-exchange metadata carried in request and response extensions.
///
/// The dispatcher records which service handled the exchange and, when the
/// forward failed, the triggering error. Downstream stages (fallback, cache
/// capture, error rendering) read it instead of re-deriving the service from
/// headers or route metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExchangeContext {
    pub service_id: String,
    pub failure: Option<GatewayError>,
}

impl ExchangeContext {
    pub fn new(service_id: impl Into<String>) -> Self {
        Self {
            service_id: service_id.into(),
            failure: None,
        }
    }

    pub fn with_failure(mut self, failure: GatewayError) -> Self {
        self.failure = Some(failure);
        self
    }
}
