//! Bearer token authentication and role authorization.
//!
//! # Flow
//!
//! ```text
//! path is PermitAll ──────────────────────────────► inner (no credential check)
//! no "Authorization: Bearer " ────────────────────► 401
//! token fails validation ─┬─ failure quota left ──► 401
//!                         └─ quota exhausted ─────► 429
//! identity lacks required role ───────────────────► 403
//! otherwise ── Identity in request extensions ────► inner
//! ```
//!
//! Public paths bypass authentication entirely, so a malformed token on a
//! public path is ignored. Validator-internal reasons (expired, bad
//! signature, ...) are logged and counted; clients only ever see the uniform
//! 401 message.
//!
//! # Brute Force Protection
//!
//! Failed attempts consume a per-IP quota. Once a client exhausts it, further
//! failures are answered with 429 and `Retry-After` until the quota refills.
//! Requests carrying a valid token are never throttled by this quota.

use std::num::NonZeroU32;
use std::sync::Arc;
use std::task::{Context, Poll};

use axum::body::Body;
use axum::http::{Request, Response, header};
use governor::{Quota, RateLimiter};
use tower::{Layer, Service};
use tracing::{debug, warn};

use super::ip::{TrustedProxyConfig, client_ip};
use super::rate_limit::{KeyedLimiter, retry_after_secs};
use crate::auth::{AccessPolicy, Identity, RoleRequirement, TokenValidator};
use crate::classifier::{UNKNOWN_SERVICE, error_response};
use crate::error::GatewayError;
use crate::metrics;

/// Literal prefix of a bearer credential.
pub const BEARER_PREFIX: &str = "Bearer ";

/// Authentication failures allowed per IP per minute.
const DEFAULT_AUTH_FAILURE_LIMIT: NonZeroU32 = NonZeroU32::new(10).unwrap();

/// Burst capacity for auth failure limiting.
const DEFAULT_AUTH_FAILURE_BURST: NonZeroU32 = NonZeroU32::new(5).unwrap();

/// Outcome of looking for a bearer credential.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BearerCredential<'a> {
    /// No `Authorization` header, or one without the `Bearer ` prefix.
    Missing,
    /// The text after the prefix, possibly empty or garbage.
    Present(&'a str),
}

/// Extract the bearer credential from an `Authorization` header value.
///
/// The prefix match is literal and case-sensitive.
pub fn extract_bearer(value: Option<&str>) -> BearerCredential<'_> {
    match value.and_then(|v| v.strip_prefix(BEARER_PREFIX)) {
        Some(token) => BearerCredential::Present(token),
        None => BearerCredential::Missing,
    }
}

/// JWT authentication layer.
#[derive(Clone)]
pub struct JwtAuthLayer {
    validator: Arc<TokenValidator>,
    policy: Arc<AccessPolicy>,
    trusted_proxies: Arc<TrustedProxyConfig>,
    failure_limiter: Arc<KeyedLimiter>,
}

/// Per-IP limiter for failed authentication attempts: 10 per minute with a
/// burst of 5.
pub fn auth_failure_limiter() -> KeyedLimiter {
    RateLimiter::keyed(Quota::per_minute(DEFAULT_AUTH_FAILURE_LIMIT).allow_burst(DEFAULT_AUTH_FAILURE_BURST))
}

impl JwtAuthLayer {
    pub fn new(
        validator: Arc<TokenValidator>,
        policy: Arc<AccessPolicy>,
        trusted_proxies: Arc<TrustedProxyConfig>,
        failure_limiter: Arc<KeyedLimiter>,
    ) -> Self {
        Self {
            validator,
            policy,
            trusted_proxies,
            failure_limiter,
        }
    }
}

impl<S> Layer<S> for JwtAuthLayer {
    type Service = JwtAuthService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        JwtAuthService {
            inner,
            validator: self.validator.clone(),
            policy: self.policy.clone(),
            trusted_proxies: self.trusted_proxies.clone(),
            failure_limiter: self.failure_limiter.clone(),
        }
    }
}

#[derive(Clone)]
pub struct JwtAuthService<S> {
    inner: S,
    validator: Arc<TokenValidator>,
    policy: Arc<AccessPolicy>,
    trusted_proxies: Arc<TrustedProxyConfig>,
    failure_limiter: Arc<KeyedLimiter>,
}

impl<S> JwtAuthService<S> {
    /// Count a failed attempt and pick the error to answer it with.
    fn reject(&self, req: &Request<Body>, cause: GatewayError) -> GatewayError {
        let ip = client_ip(req, &self.trusted_proxies);
        match self.failure_limiter.check_key(&ip.to_string()) {
            Ok(()) => cause,
            Err(not_until) => {
                let retry_after = retry_after_secs(&not_until);
                warn!(
                    client_ip = %ip,
                    retry_after_secs = retry_after,
                    "IP blocked due to excessive auth failures"
                );
                metrics::record_rate_limited("auth");
                GatewayError::RateLimited {
                    retry_after_secs: retry_after,
                }
            }
        }
    }

    /// Authenticate and authorize, returning the identity to attach.
    fn admit(&self, req: &Request<Body>) -> Result<Option<Identity>, GatewayError> {
        let path = req.uri().path();
        let requirement = self.policy.requirement_for(path);

        if matches!(requirement, RoleRequirement::PermitAll) {
            debug!(path, "Public path, skipping authentication");
            return Ok(None);
        }

        let header_value = req
            .headers()
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok());

        let token = match extract_bearer(header_value) {
            BearerCredential::Present(token) => token,
            BearerCredential::Missing => {
                metrics::record_auth_failure("missing");
                return Err(self.reject(
                    req,
                    GatewayError::Unauthenticated("no bearer credential".to_string()),
                ));
            }
        };

        let verified = match self.validator.validate(token) {
            Ok(verified) => verified,
            Err(invalid) => {
                warn!(path, reason = %invalid, kind = invalid.kind(), "Bearer token rejected");
                metrics::record_auth_failure(invalid.kind());
                return Err(self.reject(req, GatewayError::Unauthenticated(invalid.to_string())));
            }
        };

        let identity = Identity::from_verified(verified);
        self.policy.authorize(&identity, path)?;

        debug!(subject = identity.subject(), tenant = ?identity.tenant(), "Authenticated");
        Ok(Some(identity))
    }
}

impl<S> Service<Request<Body>> for JwtAuthService<S>
where
    S: Service<Request<Body>, Response = Response<Body>> + Clone + Send + 'static,
    S::Future: Send,
{
    type Response = Response<Body>;
    type Error = S::Error;
    type Future = std::pin::Pin<
        Box<dyn std::future::Future<Output = Result<Self::Response, Self::Error>> + Send>,
    >;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut req: Request<Body>) -> Self::Future {
        let outcome = self.admit(&req);
        let mut inner = self.inner.clone();

        Box::pin(async move {
            match outcome {
                Ok(identity) => {
                    if let Some(identity) = identity {
                        req.extensions_mut().insert(identity);
                    }
                    inner.call(req).await
                }
                Err(error) => Ok(error_response(&error, UNKNOWN_SERVICE, req.uri().path())),
            }
        })
    }
}
