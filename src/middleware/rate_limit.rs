//! Per-client-IP rate limiting.
//!
//! Uses a `governor` keyed limiter (GCRA) as a black box: each client IP
//! gets `rps` sustained requests per second plus `burst` extra capacity.
//! Rejections are rendered through the shared error contract with a
//! `Retry-After` header and `X-RateLimit-Limit`.

use std::fmt;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::task::{Context, Poll};

use axum::body::Body;
use axum::http::{HeaderValue, Request, Response};
use governor::clock::{Clock, DefaultClock};
use governor::state::keyed::DefaultKeyedStateStore;
use governor::{Quota, RateLimiter};
use tower::{Layer, Service};
use tracing::warn;

use super::ip::{TrustedProxyConfig, client_ip};
use crate::classifier::{UNKNOWN_SERVICE, error_response};
use crate::error::GatewayError;
use crate::metrics;

/// Error type for rate limit layer configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateLimitError {
    /// RPS value cannot be zero.
    ZeroRps,
}

impl fmt::Display for RateLimitError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RateLimitError::ZeroRps => {
                write!(f, "RPS must be greater than 0; leave the layer out for no limiting")
            }
        }
    }
}

impl std::error::Error for RateLimitError {}

/// Per-IP limiter keyed by the resolved client address.
pub type KeyedLimiter = RateLimiter<String, DefaultKeyedStateStore<String>, DefaultClock>;

/// Build the per-client limiter: `rps` sustained requests per second plus
/// `burst` extra capacity (at least one).
///
/// # Errors
///
/// Returns `RateLimitError::ZeroRps` if `rps` is 0.
pub fn client_limiter(rps: u32, burst: u32) -> Result<KeyedLimiter, RateLimitError> {
    let rps_nonzero = NonZeroU32::new(rps).ok_or(RateLimitError::ZeroRps)?;
    let burst_nonzero = NonZeroU32::new(burst).unwrap_or(NonZeroU32::MIN);

    let quota = Quota::per_second(rps_nonzero).allow_burst(burst_nonzero);
    Ok(RateLimiter::keyed(quota))
}

/// Forget clients whose quota has fully refilled and release the freed
/// capacity. Returns the number of keys still tracked.
pub fn prune(limiter: &KeyedLimiter) -> usize {
    limiter.retain_recent();
    limiter.shrink_to_fit();
    limiter.len()
}

/// Seconds until a rejected key may retry, never less than one.
pub(crate) fn retry_after_secs(not_until: &governor::NotUntil<<DefaultClock as Clock>::Instant>) -> u64 {
    not_until
        .wait_time_from(DefaultClock::default().now())
        .as_secs()
        .max(1)
}

/// Rate limiting layer.
///
/// ```rust,ignore
/// let limiter = Arc::new(client_limiter(100, 50)?);
/// let layer = RateLimitLayer::new(limiter, 100, Arc::new(TrustedProxyConfig::default()));
/// let app = Router::new().route("/", get(handler)).layer(layer);
/// ```
#[derive(Clone)]
pub struct RateLimitLayer {
    limiter: Arc<KeyedLimiter>,
    limit: u32,
    trusted_proxies: Arc<TrustedProxyConfig>,
}

impl RateLimitLayer {
    /// Wrap a shared limiter. `limit` is advertised in `X-RateLimit-Limit`.
    pub fn new(limiter: Arc<KeyedLimiter>, limit: u32, trusted_proxies: Arc<TrustedProxyConfig>) -> Self {
        Self {
            limiter,
            limit,
            trusted_proxies,
        }
    }
}

impl<S> Layer<S> for RateLimitLayer {
    type Service = RateLimitService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        RateLimitService {
            inner,
            limiter: self.limiter.clone(),
            limit: self.limit,
            trusted_proxies: self.trusted_proxies.clone(),
        }
    }
}

#[derive(Clone)]
pub struct RateLimitService<S> {
    inner: S,
    limiter: Arc<KeyedLimiter>,
    limit: u32,
    trusted_proxies: Arc<TrustedProxyConfig>,
}

impl<S> Service<Request<Body>> for RateLimitService<S>
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

    fn call(&mut self, req: Request<Body>) -> Self::Future {
        let limiter = self.limiter.clone();
        let limit = self.limit;
        let mut inner = self.inner.clone();
        let client_ip = client_ip(&req, &self.trusted_proxies).into_owned();

        Box::pin(async move {
            match limiter.check_key(&client_ip) {
                Ok(()) => inner.call(req).await,
                Err(not_until) => {
                    let retry_after = retry_after_secs(&not_until);
                    let path = req.uri().path();

                    warn!(
                        client_ip = %client_ip,
                        path = %path,
                        retry_after_secs = retry_after,
                        "Rate limit exceeded for IP"
                    );
                    metrics::record_rate_limited("client");

                    let mut response = error_response(
                        &GatewayError::RateLimited {
                            retry_after_secs: retry_after,
                        },
                        UNKNOWN_SERVICE,
                        path,
                    );
                    response
                        .headers_mut()
                        .insert("x-ratelimit-limit", HeaderValue::from(limit));
                    response
                        .headers_mut()
                        .insert("x-ratelimit-remaining", HeaderValue::from_static("0"));

                    Ok(response)
                }
            }
        })
    }
}
