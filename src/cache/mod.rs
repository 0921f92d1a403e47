//! In-memory caching of successful GET responses.

pub mod layer;
pub mod store;

pub use layer::{ResponseCacheLayer, ResponseCacheService};
pub use store::{CachedResponse, MokaResponseStore, ResponseStore, cache_key};
