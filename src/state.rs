//! Shared application state for Axum handlers and middleware.
//!
//! Everything here is built once at startup and is read-only afterwards:
//! the route table, breaker registry, token validator, access policy and
//! the upstream and cache-store handles. Clones are cheap (`Arc`s).
//!
//! # Structured Concurrency
//!
//! A background task refreshes the breaker-state and cache-size gauges and
//! prunes per-IP limiter keys whose quota has refilled. It is tracked by a `TaskTracker` and stopped through a
//! `CancellationToken`; call `shutdown()` before exit.

use std::sync::Arc;
use std::time::Instant;

use tokio::time::interval;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info};

use crate::auth::{AccessPolicy, SigningKey, TokenValidator};
use crate::cache::{MokaResponseStore, ResponseStore};
use crate::config::Config;
use crate::error::StartupResult;
use crate::gateway::{BreakerRegistry, HttpUpstream, RouteTable, Upstream};
use crate::metrics;
use crate::middleware::{
    KeyedLimiter, TrustedProxyConfig, auth_failure_limiter, client_limiter, prune,
};

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    /// One descriptor per known service.
    pub routes: Arc<RouteTable>,
    /// One breaker per route, keyed by breaker id.
    pub breakers: BreakerRegistry,
    pub upstream: Arc<dyn Upstream>,
    pub store: Arc<dyn ResponseStore>,
    pub validator: Arc<TokenValidator>,
    pub policy: Arc<AccessPolicy>,
    pub trusted_proxies: Arc<TrustedProxyConfig>,
    /// Per-IP request limiter; `None` when rate limiting is off.
    pub client_limiter: Option<Arc<KeyedLimiter>>,
    /// Per-IP limiter for failed authentication attempts.
    pub auth_failure_limiter: Arc<KeyedLimiter>,
    pub started_at: Instant,
    task_tracker: TaskTracker,
    cancellation_token: CancellationToken,
}

impl AppState {
    /// Build state with the `reqwest` upstream and the `moka` store.
    ///
    /// # Errors
    ///
    /// Returns a `StartupError` if the signing secret is unusable, the rate
    /// limit is invalid or the upstream client cannot be built.
    pub fn new(config: Config) -> StartupResult<Self> {
        let upstream = HttpUpstream::new(&config.services, &config.upstream_config())?;
        let store = MokaResponseStore::new(config.cache_max_entries, config.cache_idle_ttl);
        Self::with_components(config, Arc::new(upstream), Arc::new(store))
    }

    /// Build state around the given forwarding primitive and cache store.
    ///
    /// Must be called inside a Tokio runtime: it spawns the gauge refresh
    /// task.
    pub fn with_components(
        config: Config,
        upstream: Arc<dyn Upstream>,
        store: Arc<dyn ResponseStore>,
    ) -> StartupResult<Self> {
        let validator = TokenValidator::new(SigningKey::from_secret(&config.jwt_secret)?);
        let policy = AccessPolicy::standard(&config.auth_public_paths);
        let trusted_proxies = TrustedProxyConfig::new(&config.trusted_proxies);
        let client_limiter = if config.rate_limiting_enabled() {
            Some(Arc::new(client_limiter(config.rate_limit_rps, config.rate_limit_burst)?))
        } else {
            None
        };

        let routes = RouteTable::from_services(config.service_ids());
        let breakers = BreakerRegistry::new(
            routes.iter().map(|r| r.breaker_id.as_str()),
            &config.breaker_config(),
        );

        info!(
            routes = routes.len(),
            public_paths = config.auth_public_paths.len(),
            "Gateway state initialized"
        );

        let state = Self {
            config: Arc::new(config),
            routes: Arc::new(routes),
            breakers,
            upstream,
            store,
            validator: Arc::new(validator),
            policy: Arc::new(policy),
            trusted_proxies: Arc::new(trusted_proxies),
            client_limiter,
            auth_failure_limiter: Arc::new(auth_failure_limiter()),
            started_at: Instant::now(),
            task_tracker: TaskTracker::new(),
            cancellation_token: CancellationToken::new(),
        };

        state.spawn_gauge_refresh_task();

        Ok(state)
    }

    /// Periodically publish breaker states and the cache entry count, and
    /// prune the per-IP limiters.
    fn spawn_gauge_refresh_task(&self) {
        let breakers = self.breakers.clone();
        let store = self.store.clone();
        let limiters: Vec<Arc<KeyedLimiter>> = self
            .client_limiter
            .iter()
            .cloned()
            .chain([self.auth_failure_limiter.clone()])
            .collect();
        let period = self.config.stats_refresh_interval;
        let cancel = self.cancellation_token.clone();

        self.task_tracker.spawn(async move {
            let mut ticker = interval(period);

            loop {
                tokio::select! {
                    biased;

                    _ = cancel.cancelled() => {
                        debug!("Gauge refresh task received cancellation signal");
                        break;
                    }
                    _ = ticker.tick() => {
                        breakers.publish_states().await;
                        metrics::set_cache_entries(store.entry_count());
                        let tracked: usize = limiters.iter().map(|l| prune(l)).sum();
                        debug!(tracked_clients = tracked, "Pruned rate limiter keys");
                    }
                }
            }

            debug!("Gauge refresh task shutting down");
        });
    }

    /// Stop background tasks and wait for them to finish.
    pub async fn shutdown(&self) {
        info!("Initiating graceful shutdown of background tasks");

        self.cancellation_token.cancel();
        self.task_tracker.close();
        self.task_tracker.wait().await;

        info!("All background tasks have completed");
    }

    pub fn uptime_seconds(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }
}
