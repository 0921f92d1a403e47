//! The forward-to-backend primitive.
//!
//! [`Upstream`] is the seam between routing logic and the HTTP transport:
//! the dispatcher hands it an already-rewritten request and gets back the
//! backend's status, headers and (streaming) body, or a classified
//! [`GatewayError`]. [`HttpUpstream`] is the `reqwest` implementation; tests
//! substitute in-memory ones.

use std::collections::HashMap;
use std::error::Error as StdError;
use std::io;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{HeaderMap, Method, Response, header};
use bytes::Bytes;
use reqwest::Client;
use tracing::{debug, warn};

use super::route::{RouteDescriptor, ServiceTarget};
use crate::error::{GatewayError, GatewayResult, StartupError, StartupResult};
use crate::metrics;

/// Connection-scoped headers that must not be relayed in either direction.
const HOP_BY_HOP: [&str; 8] = [
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

/// Remove hop-by-hop headers in place.
pub fn strip_hop_by_hop(headers: &mut HeaderMap) {
    for name in HOP_BY_HOP {
        headers.remove(name);
    }
}

/// A request ready to be sent to a backend.
#[derive(Debug, Clone)]
pub struct UpstreamRequest {
    pub method: Method,
    /// Path and query with the route prefix already removed.
    pub path_and_query: String,
    pub headers: HeaderMap,
    pub body: Bytes,
}

#[async_trait]
pub trait Upstream: Send + Sync {
    /// Forward `request` to the backend behind `route`.
    ///
    /// Any HTTP status the backend answers with is a successful forward.
    /// Transport failures come back as `Timeout`, `ConnectionRefused`,
    /// `HostUnreachable` or `Unclassified`.
    async fn forward(
        &self,
        route: &RouteDescriptor,
        request: UpstreamRequest,
    ) -> GatewayResult<Response<Body>>;
}

#[derive(Debug, Clone)]
pub struct HttpUpstreamConfig {
    pub timeout: Duration,
    pub connect_timeout: Duration,
}

impl Default for HttpUpstreamConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_millis(5000),
            connect_timeout: Duration::from_millis(2000),
        }
    }
}

/// `reqwest`-backed forwarder with a static service directory.
pub struct HttpUpstream {
    client: Client,
    directory: HashMap<String, String>,
}

impl HttpUpstream {
    /// # Errors
    ///
    /// Returns `StartupError::Upstream` if a base URL does not parse or the
    /// client cannot be built.
    pub fn new(targets: &[ServiceTarget], config: &HttpUpstreamConfig) -> StartupResult<Self> {
        for target in targets {
            reqwest::Url::parse(&target.base_url).map_err(|e| {
                StartupError::Upstream(format!(
                    "invalid base url '{}' for service '{}': {e}",
                    target.base_url, target.id
                ))
            })?;
        }

        let client = Client::builder()
            .timeout(config.timeout)
            .connect_timeout(config.connect_timeout)
            .redirect(reqwest::redirect::Policy::none())
            .tcp_nodelay(true)
            .build()
            .map_err(|e| StartupError::Upstream(e.to_string()))?;

        let directory = targets
            .iter()
            .map(|t| (t.id.clone(), t.base_url.clone()))
            .collect();

        Ok(Self { client, directory })
    }
}

#[async_trait]
impl Upstream for HttpUpstream {
    async fn forward(
        &self,
        route: &RouteDescriptor,
        request: UpstreamRequest,
    ) -> GatewayResult<Response<Body>> {
        let base = self.directory.get(&route.service_id).ok_or_else(|| {
            GatewayError::HostUnreachable(format!("no instance known for '{}'", route.service_id))
        })?;
        let url = format!("{base}{}", request.path_and_query);

        let mut headers = request.headers;
        strip_hop_by_hop(&mut headers);
        headers.remove(header::HOST);
        headers.remove(header::CONTENT_LENGTH);

        debug!(service = %route.service_id, method = %request.method, url = %url, "Forwarding request");

        let started = Instant::now();
        let sent = self
            .client
            .request(request.method, &url)
            .headers(headers)
            .body(request.body)
            .send()
            .await;
        let elapsed = started.elapsed().as_secs_f64();

        let upstream = match sent {
            Ok(upstream) => {
                metrics::record_upstream_duration(&route.service_id, "response", elapsed);
                upstream
            }
            Err(e) => {
                metrics::record_upstream_duration(&route.service_id, "error", elapsed);
                return Err(classify_transport_error(&e, &route.service_id));
            }
        };

        let status = upstream.status();
        let mut response_headers = upstream.headers().clone();
        strip_hop_by_hop(&mut response_headers);

        let mut response = Response::new(Body::from_stream(upstream.bytes_stream()));
        *response.status_mut() = status;
        *response.headers_mut() = response_headers;
        Ok(response)
    }
}

/// Map a transport error to the gateway taxonomy.
pub fn classify_transport_error(error: &reqwest::Error, service: &str) -> GatewayError {
    if error.is_timeout() {
        warn!(service, error = %error, "Upstream request timed out");
        GatewayError::Timeout(error.to_string())
    } else if error.is_connect() {
        if io_error_kind(error) == Some(io::ErrorKind::ConnectionRefused) {
            warn!(service, error = %error, "Upstream refused connection");
            GatewayError::ConnectionRefused(error.to_string())
        } else {
            warn!(service, error = %error, "Upstream host unreachable");
            GatewayError::HostUnreachable(error.to_string())
        }
    } else {
        warn!(service, error = %error, "Upstream request failed");
        GatewayError::Unclassified(error.to_string())
    }
}

/// First `io::Error` kind found in the source chain.
fn io_error_kind(error: &(dyn StdError + 'static)) -> Option<io::ErrorKind> {
    let mut current: Option<&(dyn StdError + 'static)> = Some(error);
    while let Some(err) = current {
        if let Some(io_err) = err.downcast_ref::<io::Error>() {
            return Some(io_err.kind());
        }
        current = err.source();
    }
    None
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_strip_hop_by_hop() {
        let mut headers = HeaderMap::new();
        headers.insert(header::CONNECTION, HeaderValue::from_static("close"));
        headers.insert(header::TRANSFER_ENCODING, HeaderValue::from_static("chunked"));
        headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("text/plain"));

        strip_hop_by_hop(&mut headers);
        assert_eq!(headers.len(), 1);
        assert!(headers.contains_key(header::CONTENT_TYPE));
    }

    #[test]
    fn test_invalid_base_url_rejected() {
        let targets = vec![ServiceTarget {
            id: "orders".into(),
            base_url: "http://".into(),
        }];
        assert!(HttpUpstream::new(&targets, &HttpUpstreamConfig::default()).is_err());
    }

    #[tokio::test]
    async fn test_unknown_service_is_host_unreachable() {
        let upstream = HttpUpstream::new(&[], &HttpUpstreamConfig::default()).unwrap();
        let route = RouteDescriptor::for_service("ghost");
        let request = UpstreamRequest {
            method: Method::GET,
            path_and_query: "/".into(),
            headers: HeaderMap::new(),
            body: Bytes::new(),
        };

        let err = upstream.forward(&route, request).await.unwrap_err();
        assert!(matches!(err, GatewayError::HostUnreachable(_)));
    }

    #[tokio::test]
    async fn test_refused_connection_is_classified() {
        // Bind then drop to obtain a local port with no listener.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let targets = vec![ServiceTarget {
            id: "orders".into(),
            base_url: format!("http://{addr}"),
        }];
        let upstream = HttpUpstream::new(&targets, &HttpUpstreamConfig::default()).unwrap();
        let request = UpstreamRequest {
            method: Method::GET,
            path_and_query: "/".into(),
            headers: HeaderMap::new(),
            body: Bytes::new(),
        };

        let err = upstream
            .forward(&RouteDescriptor::for_service("orders"), request)
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::ConnectionRefused(_)), "{err:?}");
    }
}
