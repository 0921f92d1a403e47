//! Prometheus metrics for the gateway.
//!
//! Metrics are exposed by a dedicated HTTP listener on `METRICS_PORT`.
//!
//! # Available Metrics
//!
//! ## Counters
//! - `gateway_cache_events_total` - Cache events: hit, miss, store, bypass, oversize, error (label: event)
//! - `gateway_auth_failures_total` - Rejected credentials (label: kind)
//! - `gateway_rate_limited_total` - 429 responses (label: scope = client | auth)
//! - `gateway_circuit_breaker_opens_total` - Breaker trips (label: breaker)
//! - `gateway_circuit_breaker_rejections_total` - Calls refused by an open breaker (label: breaker)
//! - `gateway_fallbacks_total` - Fallback responses (labels: service, cause)
//!
//! ## Histograms
//! - `gateway_upstream_duration_seconds` - Forward latency (labels: service, outcome)
//!
//! ## Gauges
//! - `gateway_circuit_breaker_state` - 0 = closed, 1 = half-open, 2 = open (label: breaker)
//! - `gateway_cache_entries` - Entries currently in the response cache

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use tracing::{error, info};

/// Metric names as constants for consistency.
pub mod names {
    pub const CACHE_EVENTS_TOTAL: &str = "gateway_cache_events_total";
    pub const AUTH_FAILURES_TOTAL: &str = "gateway_auth_failures_total";
    pub const RATE_LIMITED_TOTAL: &str = "gateway_rate_limited_total";
    pub const CIRCUIT_BREAKER_OPENS_TOTAL: &str = "gateway_circuit_breaker_opens_total";
    pub const CIRCUIT_BREAKER_REJECTIONS_TOTAL: &str = "gateway_circuit_breaker_rejections_total";
    pub const FALLBACKS_TOTAL: &str = "gateway_fallbacks_total";
    pub const UPSTREAM_DURATION_SECONDS: &str = "gateway_upstream_duration_seconds";
    pub const CIRCUIT_BREAKER_STATE: &str = "gateway_circuit_breaker_state";
    pub const CACHE_ENTRIES: &str = "gateway_cache_entries";
}

/// Install the Prometheus exporter on `metrics_addr` and describe all metrics.
pub fn init_metrics(metrics_addr: SocketAddr) -> Result<(), String> {
    PrometheusBuilder::new()
        .with_http_listener(metrics_addr)
        .install()
        .map_err(|e| format!("Failed to install Prometheus exporter: {e}"))?;

    describe_counter!(
        names::CACHE_EVENTS_TOTAL,
        "Response cache events (hit, miss, store, bypass, oversize)"
    );
    describe_counter!(
        names::AUTH_FAILURES_TOTAL,
        "Rejected bearer credentials by reason"
    );
    describe_counter!(
        names::RATE_LIMITED_TOTAL,
        "Requests answered with 429 by scope"
    );
    describe_counter!(
        names::CIRCUIT_BREAKER_OPENS_TOTAL,
        "Total number of times a circuit breaker opened"
    );
    describe_counter!(
        names::CIRCUIT_BREAKER_REJECTIONS_TOTAL,
        "Total number of calls rejected by an open circuit breaker"
    );
    describe_counter!(
        names::FALLBACKS_TOTAL,
        "Requests diverted to the fallback handler"
    );

    describe_histogram!(
        names::UPSTREAM_DURATION_SECONDS,
        "Backend forward duration in seconds"
    );

    describe_gauge!(
        names::CIRCUIT_BREAKER_STATE,
        "Circuit breaker state (0 = closed, 1 = half-open, 2 = open)"
    );
    describe_gauge!(
        names::CACHE_ENTRIES,
        "Approximate number of cached responses"
    );

    info!(addr = %metrics_addr, "Prometheus metrics endpoint started");
    Ok(())
}

/// Initialize metrics, logging failures instead of aborting startup.
pub fn try_init_metrics(metrics_addr: SocketAddr) {
    if let Err(e) = init_metrics(metrics_addr) {
        error!(error = %e, "Failed to initialize metrics, continuing without metrics");
    }
}

// =============================================================================
// Counters
// =============================================================================

pub fn record_cache_event(event: &'static str) {
    counter!(names::CACHE_EVENTS_TOTAL, "event" => event).increment(1);
}

pub fn record_auth_failure(kind: &'static str) {
    counter!(names::AUTH_FAILURES_TOTAL, "kind" => kind).increment(1);
}

pub fn record_rate_limited(scope: &'static str) {
    counter!(names::RATE_LIMITED_TOTAL, "scope" => scope).increment(1);
}

pub fn record_circuit_breaker_open(breaker: &str) {
    counter!(names::CIRCUIT_BREAKER_OPENS_TOTAL, "breaker" => breaker.to_string()).increment(1);
}

pub fn record_circuit_breaker_rejection(breaker: &str) {
    counter!(names::CIRCUIT_BREAKER_REJECTIONS_TOTAL, "breaker" => breaker.to_string())
        .increment(1);
}

pub fn record_fallback(service: &str, cause: &'static str) {
    counter!(names::FALLBACKS_TOTAL, "service" => service.to_string(), "cause" => cause)
        .increment(1);
}

// =============================================================================
// Histograms
// =============================================================================

pub fn record_upstream_duration(service: &str, outcome: &'static str, duration_secs: f64) {
    histogram!(names::UPSTREAM_DURATION_SECONDS, "service" => service.to_string(), "outcome" => outcome)
        .record(duration_secs);
}

// =============================================================================
// Gauges
// =============================================================================

/// States: 0 = closed, 1 = half-open, 2 = open
pub fn set_circuit_breaker_state(breaker: &str, state: u8) {
    gauge!(names::CIRCUIT_BREAKER_STATE, "breaker" => breaker.to_string()).set(f64::from(state));
}

pub fn set_cache_entries(entries: u64) {
    gauge!(names::CACHE_ENTRIES).set(entries as f64);
}
