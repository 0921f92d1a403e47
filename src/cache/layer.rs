//! Response cache middleware for GET requests.
//!
//! Sits between authentication and dispatch. On a hit the stored status,
//! headers and body are replayed and the inner service is never called. On a
//! miss the inner response is passed through, and 2xx bodies are buffered in
//! full, stored under [`cache_key`] and returned unchanged.
//!
//! Bodies over the configured limit are not cached: a `Content-Length` over
//! the limit bypasses capture entirely, and a body that outgrows the limit
//! while being read is re-chained (captured prefix, then the rest of the
//! stream) and sent uncached. A read failure mid-capture fails the request
//! with `CachingFailure` and leaves the store untouched.

use std::sync::Arc;
use std::task::{Context, Poll};

use axum::body::{Body, BodyDataStream};
use axum::http::{Method, Request, Response, header};
use bytes::{Bytes, BytesMut};
use futures_util::StreamExt;
use futures_util::stream;
use tower::{Layer, Service};
use tracing::{debug, warn};

use super::store::{CachedResponse, ResponseStore, cache_key};
use crate::classifier::{error_response, resolve_service_name};
use crate::error::GatewayError;
use crate::gateway::ExchangeContext;
use crate::metrics;

/// Caches successful GET responses of proxied routes.
///
/// # Shared across identities
///
/// Entries are keyed by method, path and query only. The caller's identity
/// is not part of the key, so a 2xx body fetched by one user is replayed to
/// any other user allowed onto the same path. Backends whose responses
/// differ per caller (for example under `/users/**`) must not be served
/// through this layer; disable it with `CACHE_ENABLED=false` or keep such
/// endpoints identity-independent.
#[derive(Clone)]
pub struct ResponseCacheLayer {
    store: Arc<dyn ResponseStore>,
    max_body_bytes: usize,
}

impl ResponseCacheLayer {
    pub fn new(store: Arc<dyn ResponseStore>, max_body_bytes: usize) -> Self {
        Self {
            store,
            max_body_bytes,
        }
    }
}

impl<S> Layer<S> for ResponseCacheLayer {
    type Service = ResponseCacheService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        ResponseCacheService {
            inner,
            store: self.store.clone(),
            max_body_bytes: self.max_body_bytes,
        }
    }
}

#[derive(Clone)]
pub struct ResponseCacheService<S> {
    inner: S,
    store: Arc<dyn ResponseStore>,
    max_body_bytes: usize,
}

impl<S> Service<Request<Body>> for ResponseCacheService<S>
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
        let mut inner = self.inner.clone();

        if req.method() != Method::GET {
            return Box::pin(async move { inner.call(req).await });
        }

        let store = self.store.clone();
        let max_body_bytes = self.max_body_bytes;
        let key = cache_key(req.uri());
        let path = req.uri().path().to_string();

        Box::pin(async move {
            if let Some(cached) = store.get(&key).await {
                debug!(key = %key, "Cache hit");
                metrics::record_cache_event("hit");
                return Ok(cached.to_response());
            }

            metrics::record_cache_event("miss");
            let response = inner.call(req).await?;

            if !response.status().is_success() {
                metrics::record_cache_event("bypass");
                return Ok(response);
            }

            if declared_length(&response).is_some_and(|len| len > max_body_bytes) {
                debug!(key = %key, "Response exceeds cacheable size, passing through");
                metrics::record_cache_event("oversize");
                return Ok(response);
            }

            let (parts, body) = response.into_parts();
            match capture(body, max_body_bytes).await {
                Ok(Capture::Complete(bytes)) => {
                    let entry = CachedResponse {
                        status: parts.status,
                        headers: parts.headers.clone(),
                        body: bytes.clone(),
                    };
                    store.put(key, entry).await;
                    metrics::record_cache_event("store");
                    Ok(Response::from_parts(parts, Body::from(bytes)))
                }
                Ok(Capture::Overflow { prefix, rest }) => {
                    debug!(key = %key, "Response outgrew cacheable size, passing through");
                    metrics::record_cache_event("oversize");
                    let head = stream::once(async move { Ok::<_, axum::Error>(prefix) });
                    Ok(Response::from_parts(parts, Body::from_stream(head.chain(rest))))
                }
                Err(e) => {
                    let context = parts.extensions.get::<ExchangeContext>();
                    let service =
                        resolve_service_name(context.map(|c| c.service_id.as_str()), None);
                    warn!(key = %key, service, error = %e, "Failed to capture response body");
                    metrics::record_cache_event("error");
                    Ok(error_response(
                        &GatewayError::CachingFailure(e.to_string()),
                        service,
                        &path,
                    ))
                }
            }
        })
    }
}

enum Capture {
    Complete(Bytes),
    /// Limit exceeded; `prefix` holds everything read so far.
    Overflow { prefix: Bytes, rest: BodyDataStream },
}

async fn capture(body: Body, limit: usize) -> Result<Capture, axum::Error> {
    let mut stream = body.into_data_stream();
    let mut buffer = BytesMut::new();

    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        buffer.extend_from_slice(&chunk);
        if buffer.len() > limit {
            return Ok(Capture::Overflow {
                prefix: buffer.freeze(),
                rest: stream,
            });
        }
    }

    Ok(Capture::Complete(buffer.freeze()))
}

fn declared_length(response: &Response<Body>) -> Option<usize> {
    response
        .headers()
        .get(header::CONTENT_LENGTH)?
        .to_str()
        .ok()?
        .parse()
        .ok()
}
