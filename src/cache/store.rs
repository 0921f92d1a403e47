//! Backing store for captured GET responses.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{HeaderMap, Response, StatusCode, Uri};
use bytes::Bytes;
use moka::future::Cache;

/// A fully buffered 2xx response.
#[derive(Debug, Clone, PartialEq)]
pub struct CachedResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl CachedResponse {
    /// Rebuild a response with the cached status, headers and body verbatim.
    pub fn to_response(&self) -> Response<Body> {
        let mut response = Response::new(Body::from(self.body.clone()));
        *response.status_mut() = self.status;
        *response.headers_mut() = self.headers.clone();
        response
    }
}

/// Cache key for a GET request: method plus path and query.
///
/// Scheme and authority are excluded so absolute-form and origin-form
/// request targets share entries.
pub fn cache_key(uri: &Uri) -> String {
    let target = uri.path_and_query().map_or(uri.path(), |pq| pq.as_str());
    format!("GET {target}")
}

/// Concurrent-safe associative store. Eviction is the store's concern.
#[async_trait]
pub trait ResponseStore: Send + Sync {
    async fn get(&self, key: &str) -> Option<Arc<CachedResponse>>;

    async fn put(&self, key: String, response: CachedResponse);

    /// Approximate number of live entries.
    fn entry_count(&self) -> u64;
}

/// Size- and idle-bounded in-memory store backed by `moka`.
#[derive(Clone)]
pub struct MokaResponseStore {
    cache: Cache<String, Arc<CachedResponse>>,
}

impl MokaResponseStore {
    /// Holds at most `max_entries`; entries not read for `idle_ttl` expire.
    pub fn new(max_entries: u64, idle_ttl: Duration) -> Self {
        Self {
            cache: Cache::builder()
                .max_capacity(max_entries)
                .time_to_idle(idle_ttl)
                .build(),
        }
    }

    /// Apply pending evictions so `entry_count` is current.
    pub async fn sync(&self) {
        self.cache.run_pending_tasks().await;
    }
}

#[async_trait]
impl ResponseStore for MokaResponseStore {
    async fn get(&self, key: &str) -> Option<Arc<CachedResponse>> {
        self.cache.get(key).await
    }

    async fn put(&self, key: String, response: CachedResponse) {
        self.cache.insert(key, Arc::new(response)).await;
    }

    fn entry_count(&self) -> u64 {
        self.cache.entry_count()
    }
}
