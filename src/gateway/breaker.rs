//! Per-route circuit breakers.
//!
//! Each [`RouteDescriptor`](super::RouteDescriptor) owns one breaker named
//! `<serviceId>-CB`. The registry is built once at startup and never mutated,
//! so lookups need no locking; each breaker guards its own state.
//!
//! # States
//!
//! ```text
//!   Closed ── failures ≥ failure_threshold ──► Open
//!     ▲                                         │
//!     │                                         │ open_duration elapsed
//!     │                                         ▼
//!     └──── successes ≥ success_threshold ── HalfOpen ── any failure ──► Open
//! ```
//!
//! Only outcomes for which [`GatewayError::is_breaker_failure`] holds count
//! as failures. Every other result, including client-side rejections, counts
//! as a success for the breaker.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::error::{GatewayError, GatewayResult};
use crate::metrics;

/// Circuit breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl CircuitState {
    /// Gauge encoding: 0 = closed, 1 = half-open, 2 = open.
    pub fn as_gauge(self) -> u8 {
        match self {
            CircuitState::Closed => 0,
            CircuitState::HalfOpen => 1,
            CircuitState::Open => 2,
        }
    }
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CircuitState::Closed => write!(f, "closed"),
            CircuitState::Open => write!(f, "open"),
            CircuitState::HalfOpen => write!(f, "half-open"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures before opening.
    pub failure_threshold: u32,
    /// Consecutive half-open successes before closing.
    pub success_threshold: u32,
    /// Time spent open before probing.
    pub open_duration: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            success_threshold: 2,
            open_duration: Duration::from_secs(30),
        }
    }
}

impl CircuitBreakerConfig {
    pub fn new(failure_threshold: u32, success_threshold: u32, open_duration: Duration) -> Self {
        Self {
            failure_threshold,
            success_threshold,
            open_duration,
        }
    }
}

/// Something that happened to a breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Event {
    /// A call asks to go through.
    Attempt,
    Success,
    Failure,
}

struct BreakerState {
    state: CircuitState,
    opened_at: Option<Instant>,
    consecutive_failures: u32,
    consecutive_successes: u32,
}

impl BreakerState {
    fn new() -> Self {
        Self {
            state: CircuitState::Closed,
            opened_at: None,
            consecutive_failures: 0,
            consecutive_successes: 0,
        }
    }

    /// Apply `event` at `now`. Returns the state entered, if it changed.
    fn transition(
        &mut self,
        event: Event,
        now: Instant,
        config: &CircuitBreakerConfig,
    ) -> Option<CircuitState> {
        let next = match (self.state, event) {
            (CircuitState::Open, Event::Attempt) => {
                let cooled = self
                    .opened_at
                    .is_none_or(|at| now.duration_since(at) >= config.open_duration);
                if cooled { CircuitState::HalfOpen } else { CircuitState::Open }
            }
            (current, Event::Attempt) => current,

            (CircuitState::Closed, Event::Success) => {
                self.consecutive_failures = 0;
                CircuitState::Closed
            }
            (CircuitState::HalfOpen, Event::Success) => {
                self.consecutive_successes += 1;
                if self.consecutive_successes >= config.success_threshold {
                    CircuitState::Closed
                } else {
                    CircuitState::HalfOpen
                }
            }
            // A call admitted before a concurrent trip finished late.
            (CircuitState::Open, Event::Success) => CircuitState::Open,

            (CircuitState::Closed, Event::Failure) => {
                self.consecutive_failures += 1;
                if self.consecutive_failures >= config.failure_threshold {
                    CircuitState::Open
                } else {
                    CircuitState::Closed
                }
            }
            (CircuitState::HalfOpen, Event::Failure) => CircuitState::Open,
            (CircuitState::Open, Event::Failure) => {
                self.opened_at = Some(now);
                CircuitState::Open
            }
        };

        if next == self.state {
            return None;
        }
        self.enter(next, now);
        Some(next)
    }

    fn enter(&mut self, next: CircuitState, now: Instant) {
        self.state = next;
        self.consecutive_successes = 0;
        match next {
            CircuitState::Open => self.opened_at = Some(now),
            CircuitState::HalfOpen => {}
            CircuitState::Closed => {
                self.opened_at = None;
                self.consecutive_failures = 0;
            }
        }
    }
}

/// A single named breaker.
pub struct CircuitBreaker {
    id: String,
    config: CircuitBreakerConfig,
    state: Mutex<BreakerState>,
    times_opened: AtomicU32,
    calls_rejected: AtomicU64,
}

impl CircuitBreaker {
    pub fn new(id: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            id: id.into(),
            config,
            state: Mutex::new(BreakerState::new()),
            times_opened: AtomicU32::new(0),
            calls_rejected: AtomicU64::new(0),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Whether a call may proceed. Moves Open → HalfOpen once the open
    /// duration has elapsed.
    pub async fn allow_request(&self) -> bool {
        let admitted = self.apply(Event::Attempt).await != CircuitState::Open;
        if !admitted {
            self.calls_rejected.fetch_add(1, Ordering::Relaxed);
            metrics::record_circuit_breaker_rejection(&self.id);
        }
        admitted
    }

    pub async fn record_success(&self) {
        self.apply(Event::Success).await;
    }

    pub async fn record_failure(&self) {
        self.apply(Event::Failure).await;
    }

    async fn apply(&self, event: Event) -> CircuitState {
        let mut state = self.state.lock().await;
        let from = state.state;
        let entered = state.transition(event, Instant::now(), &self.config);

        if event != Event::Attempt {
            debug!(
                breaker = %self.id,
                ?event,
                state = %state.state,
                consecutive_failures = state.consecutive_failures,
                consecutive_successes = state.consecutive_successes,
                "Circuit breaker recorded outcome"
            );
        }
        if let Some(to) = entered {
            self.announce(from, to, state.consecutive_failures);
        }
        state.state
    }

    /// Log and publish a state change.
    fn announce(&self, from: CircuitState, to: CircuitState, failures: u32) {
        metrics::set_circuit_breaker_state(&self.id, to.as_gauge());
        match to {
            CircuitState::Open => {
                self.times_opened.fetch_add(1, Ordering::Relaxed);
                metrics::record_circuit_breaker_open(&self.id);
                warn!(
                    breaker = %self.id,
                    from = %from,
                    failures,
                    open_duration = ?self.config.open_duration,
                    "Circuit breaker opened"
                );
            }
            CircuitState::HalfOpen => {
                info!(breaker = %self.id, "Circuit breaker half-open, admitting trial calls");
            }
            CircuitState::Closed => {
                info!(breaker = %self.id, from = %from, "Circuit breaker closed");
            }
        }
    }

    pub async fn state(&self) -> CircuitState {
        self.state.lock().await.state
    }

    pub fn times_opened(&self) -> u32 {
        self.times_opened.load(Ordering::Relaxed)
    }

    pub fn calls_rejected(&self) -> u64 {
        self.calls_rejected.load(Ordering::Relaxed)
    }

    /// Manual recovery.
    pub async fn force_close(&self) {
        let mut state = self.state.lock().await;
        *state = BreakerState::new();
        info!(breaker = %self.id, "Circuit breaker forcibly closed");
        metrics::set_circuit_breaker_state(&self.id, CircuitState::Closed.as_gauge());
    }

    /// Manual isolation of a backend.
    pub async fn force_open(&self) {
        let mut state = self.state.lock().await;
        let from = state.state;
        state.enter(CircuitState::Open, Instant::now());
        warn!(breaker = %self.id, "Circuit breaker forcibly opened");
        self.announce(from, CircuitState::Open, state.consecutive_failures);
    }
}

/// Point-in-time view of one breaker, for the actuator endpoint.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BreakerSnapshot {
    pub id: String,
    pub state: CircuitState,
    pub times_opened: u32,
    pub calls_rejected: u64,
}

/// Immutable set of breakers keyed by breaker id.
#[derive(Clone, Default)]
pub struct BreakerRegistry {
    breakers: HashMap<String, Arc<CircuitBreaker>>,
}

impl BreakerRegistry {
    pub fn new<'a, I>(breaker_ids: I, config: &CircuitBreakerConfig) -> Self
    where
        I: IntoIterator<Item = &'a str>,
    {
        let breakers = breaker_ids
            .into_iter()
            .map(|id| (id.to_string(), Arc::new(CircuitBreaker::new(id, config.clone()))))
            .collect();

        Self { breakers }
    }

    pub fn get(&self, breaker_id: &str) -> Option<&Arc<CircuitBreaker>> {
        self.breakers.get(breaker_id)
    }

    /// Run `call` through the named breaker.
    ///
    /// Returns `CircuitOpen` without invoking `call` when the breaker does not
    /// permit the call. Otherwise the call's own result is returned and
    /// recorded on the breaker.
    pub async fn run<T, F, Fut>(&self, breaker_id: &str, call: F) -> GatewayResult<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = GatewayResult<T>>,
    {
        let Some(breaker) = self.breakers.get(breaker_id) else {
            return Err(GatewayError::Unclassified(format!(
                "no circuit breaker registered as '{breaker_id}'"
            )));
        };

        if !breaker.allow_request().await {
            return Err(GatewayError::CircuitOpen(breaker_id.to_string()));
        }

        let result = call().await;
        match &result {
            Err(e) if e.is_breaker_failure() => breaker.record_failure().await,
            _ => breaker.record_success().await,
        }
        result
    }

    /// Snapshots sorted by breaker id.
    pub async fn snapshot(&self) -> Vec<BreakerSnapshot> {
        let mut out = Vec::with_capacity(self.breakers.len());
        for breaker in self.breakers.values() {
            out.push(BreakerSnapshot {
                id: breaker.id().to_string(),
                state: breaker.state().await,
                times_opened: breaker.times_opened(),
                calls_rejected: breaker.calls_rejected(),
            });
        }
        out.sort_by(|a, b| a.id.cmp(&b.id));
        out
    }

    /// Push every breaker's state to the state gauge.
    pub async fn publish_states(&self) {
        for breaker in self.breakers.values() {
            metrics::set_circuit_breaker_state(breaker.id(), breaker.state().await.as_gauge());
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use super::*;

    fn breaker(failures: u32, successes: u32, open: Duration) -> CircuitBreaker {
        CircuitBreaker::new("svc-CB", CircuitBreakerConfig::new(failures, successes, open))
    }

    #[tokio::test]
    async fn test_starts_closed() {
        let cb = breaker(5, 2, Duration::from_secs(30));
        assert_eq!(cb.state().await, CircuitState::Closed);
        assert!(cb.allow_request().await);
    }

    #[test]
    fn test_transition_reports_only_state_changes() {
        let config = CircuitBreakerConfig::new(2, 1, Duration::from_secs(30));
        let mut state = BreakerState::new();
        let t0 = Instant::now();
        let at = |secs| t0 + Duration::from_secs(secs);

        assert_eq!(state.transition(Event::Failure, t0, &config), None);
        assert_eq!(state.transition(Event::Failure, t0, &config), Some(CircuitState::Open));

        // A late failure while open restarts the open window.
        assert_eq!(state.transition(Event::Failure, at(10), &config), None);
        assert_eq!(state.transition(Event::Attempt, at(30), &config), None);
        assert_eq!(
            state.transition(Event::Attempt, at(40), &config),
            Some(CircuitState::HalfOpen)
        );

        assert_eq!(
            state.transition(Event::Success, at(41), &config),
            Some(CircuitState::Closed)
        );
        assert_eq!(state.consecutive_failures, 0);
        assert_eq!(state.opened_at, None);
    }

    #[tokio::test]
    async fn test_opens_after_threshold_failures() {
        let cb = breaker(3, 2, Duration::from_secs(30));

        cb.record_failure().await;
        cb.record_failure().await;
        assert_eq!(cb.state().await, CircuitState::Closed);

        cb.record_failure().await;
        assert_eq!(cb.state().await, CircuitState::Open);
        assert_eq!(cb.times_opened(), 1);
        assert!(!cb.allow_request().await);
        assert_eq!(cb.calls_rejected(), 1);
    }

    #[tokio::test]
    async fn test_half_open_then_close() {
        let cb = breaker(1, 2, Duration::from_millis(10));

        cb.record_failure().await;
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert!(cb.allow_request().await);
        assert_eq!(cb.state().await, CircuitState::HalfOpen);

        cb.record_success().await;
        assert_eq!(cb.state().await, CircuitState::HalfOpen);
        cb.record_success().await;
        assert_eq!(cb.state().await, CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_half_open_failure_reopens() {
        let cb = breaker(1, 2, Duration::from_millis(10));

        cb.record_failure().await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(cb.allow_request().await);

        cb.record_failure().await;
        assert_eq!(cb.state().await, CircuitState::Open);
        assert_eq!(cb.times_opened(), 2);
    }

    #[tokio::test]
    async fn test_success_resets_failure_counter() {
        let cb = breaker(3, 1, Duration::from_secs(30));

        cb.record_failure().await;
        cb.record_failure().await;
        cb.record_success().await;
        cb.record_failure().await;
        cb.record_failure().await;
        assert_eq!(cb.state().await, CircuitState::Closed);

        cb.record_failure().await;
        assert_eq!(cb.state().await, CircuitState::Open);
    }

    #[tokio::test]
    async fn test_force_open_and_close() {
        let cb = breaker(5, 2, Duration::from_secs(30));

        cb.force_open().await;
        assert!(!cb.allow_request().await);

        cb.force_close().await;
        assert_eq!(cb.state().await, CircuitState::Closed);
        assert!(cb.allow_request().await);
    }

    #[tokio::test]
    async fn test_registry_run_rejects_without_calling() {
        let registry = BreakerRegistry::new(["svc-CB"], &CircuitBreakerConfig::default());
        registry.get("svc-CB").unwrap().force_open().await;

        let calls = AtomicUsize::new(0);
        let result: GatewayResult<()> = registry
            .run("svc-CB", || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
            .await;

        assert_eq!(result, Err(GatewayError::CircuitOpen("svc-CB".into())));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_registry_counts_only_backend_failures() {
        let config = CircuitBreakerConfig::new(1, 1, Duration::from_secs(30));
        let registry = BreakerRegistry::new(["svc-CB"], &config);

        let _: GatewayResult<()> = registry
            .run("svc-CB", || async { Err(GatewayError::PayloadTooLarge("x".into())) })
            .await;
        assert_eq!(registry.get("svc-CB").unwrap().state().await, CircuitState::Closed);

        let _: GatewayResult<()> = registry
            .run("svc-CB", || async { Err(GatewayError::Timeout("5s".into())) })
            .await;
        assert_eq!(registry.get("svc-CB").unwrap().state().await, CircuitState::Open);
    }

    #[tokio::test]
    async fn test_registry_unknown_breaker() {
        let registry = BreakerRegistry::default();
        let result: GatewayResult<()> = registry.run("ghost-CB", || async { Ok(()) }).await;
        assert!(matches!(result, Err(GatewayError::Unclassified(_))));
    }

    #[tokio::test]
    async fn test_snapshot_is_sorted() {
        let registry =
            BreakerRegistry::new(["b-CB", "a-CB"], &CircuitBreakerConfig::default());
        registry.get("b-CB").unwrap().force_open().await;

        let snapshot = registry.snapshot().await;
        assert_eq!(snapshot[0].id, "a-CB");
        assert_eq!(snapshot[0].state, CircuitState::Closed);
        assert_eq!(snapshot[1].state, CircuitState::Open);
    }
}
