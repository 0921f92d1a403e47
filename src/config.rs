//! Gateway configuration loaded from environment variables.
//!
//! All settings come from the environment (a `.env` file is loaded first if
//! present) with development defaults, except `JWT_SECRET`, which must be
//! provided and be at least 32 bytes long.
//!
//! # Routing
//!
//! - `GATEWAY_SERVICES`: comma-separated `id=url` pairs. Each id becomes a
//!   route `/<id lowercased>/**` with breaker `<id>-CB` and fallback
//!   `/fallback/<id>`.
//!
//! # Security
//!
//! - `AUTH_PUBLIC_PATHS`: Ant-style patterns reachable without a token
//! - `FORWARD_IDENTITY_HEADERS`: send `X-Auth-Subject`, `X-Auth-Roles` and
//!   `X-Tenant-Id` to backends (client-supplied copies are always stripped)
//! - `TRUSTED_PROXIES`: CIDRs whose `X-Forwarded-For` is believed

use std::env;
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

use crate::auth::token::MIN_SECRET_BYTES;
use crate::error::{StartupError, StartupResult};
use crate::gateway::{CircuitBreakerConfig, HttpUpstreamConfig, ServiceTarget};

/// Public paths used when `AUTH_PUBLIC_PATHS` is unset.
pub const DEFAULT_PUBLIC_PATHS: [&str; 5] =
    ["/public/**", "/actuator/**", "/fallback/**", "/health", "/ready"];

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "text" | "pretty" => Ok(LogFormat::Text),
            "json" => Ok(LogFormat::Json),
            other => Err(format!("expected 'text' or 'json', got '{other}'")),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    // =========================================================================
    // Server
    // =========================================================================
    /// Listen host (default: "0.0.0.0")
    pub host: String,

    /// Listen port (default: 8080)
    pub port: u16,

    // =========================================================================
    // Authentication
    // =========================================================================
    /// HMAC-SHA256 shared secret for issuing and verifying tokens.
    pub jwt_secret: String,

    /// Paths that bypass authentication entirely.
    pub auth_public_paths: Vec<String>,

    /// Whether the gateway forwards the verified identity to backends.
    pub forward_identity_headers: bool,

    // =========================================================================
    // Routing and forwarding
    // =========================================================================
    /// Known backing services (the discovery source).
    pub services: Vec<ServiceTarget>,

    /// Total time allowed for a backend to answer (default: 5s)
    pub upstream_timeout: Duration,

    /// Time allowed to establish a backend connection (default: 2s)
    pub upstream_connect_timeout: Duration,

    /// Maximum inbound body buffered for forwarding (default: 10MB)
    pub max_request_body_size: usize,

    // =========================================================================
    // Circuit breaker
    // =========================================================================
    /// Consecutive failures before a route's breaker opens (default: 5)
    pub circuit_breaker_failure_threshold: u32,

    /// Consecutive half-open successes before it closes (default: 2)
    pub circuit_breaker_success_threshold: u32,

    /// Time a breaker stays open before probing (default: 30s)
    pub circuit_breaker_open_duration: Duration,

    /// Backend statuses that count as breaker failures (default: none)
    pub circuit_breaker_status_codes: Vec<u16>,

    // =========================================================================
    // Response cache
    // =========================================================================
    pub cache_enabled: bool,

    /// Maximum number of cached responses (default: 1000)
    pub cache_max_entries: u64,

    /// Entries unread for this long are evicted (default: 5 minutes)
    pub cache_idle_ttl: Duration,

    /// Responses with larger bodies are passed through uncached (default: 1MB)
    pub cache_max_body_bytes: usize,

    // =========================================================================
    // Rate limiting and network
    // =========================================================================
    /// Requests per second per client IP (default: 100, 0 = disabled)
    pub rate_limit_rps: u32,

    /// Burst capacity above the sustained rate (default: 50)
    pub rate_limit_burst: u32,

    /// Trusted proxy CIDR ranges. Empty means forwarding headers are ignored.
    pub trusted_proxies: Vec<String>,

    /// Allowed CORS origins (`*` for any)
    pub cors_allowed_origins: Vec<String>,

    // =========================================================================
    // Observability
    // =========================================================================
    /// Log filter when `RUST_LOG` is unset (default: "info")
    pub log_level: String,

    pub log_format: LogFormat,

    /// Port for the Prometheus exporter (default: 9090, 0 = disabled)
    pub metrics_port: u16,

    /// Interval for refreshing breaker and cache gauges (default: 15s)
    pub stats_refresh_interval: Duration,
}

impl Config {
    /// Load configuration from the environment.
    ///
    /// # Errors
    ///
    /// Returns `StartupError::Config` if a variable does not parse or the
    /// resulting configuration is invalid (missing or short `JWT_SECRET`,
    /// zero thresholds, malformed service list).
    pub fn from_env() -> StartupResult<Self> {
        // Load an .env file if present (ignore errors if not found)
        let _ = dotenvy::dotenv();

        let config = Self {
            host: env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            port: Self::parse_env("PORT", 8080)?,

            jwt_secret: env::var("JWT_SECRET").unwrap_or_default(),
            auth_public_paths: Self::parse_list("AUTH_PUBLIC_PATHS")
                .map(|paths| paths.into_iter().filter(|p| p.starts_with('/')).collect())
                .unwrap_or_else(|| DEFAULT_PUBLIC_PATHS.iter().map(|p| p.to_string()).collect()),
            forward_identity_headers: Self::parse_env("FORWARD_IDENTITY_HEADERS", false)?,

            services: ServiceTarget::parse_list(&env::var("GATEWAY_SERVICES").unwrap_or_default())?,
            upstream_timeout: Duration::from_millis(Self::parse_env("UPSTREAM_TIMEOUT_MS", 5000)?),
            upstream_connect_timeout: Duration::from_millis(Self::parse_env(
                "UPSTREAM_CONNECT_TIMEOUT_MS",
                2000,
            )?),
            max_request_body_size: Self::parse_env("MAX_REQUEST_BODY_SIZE", 10 * 1024 * 1024)?,

            circuit_breaker_failure_threshold: Self::parse_env(
                "CIRCUIT_BREAKER_FAILURE_THRESHOLD",
                5,
            )?,
            circuit_breaker_success_threshold: Self::parse_env(
                "CIRCUIT_BREAKER_SUCCESS_THRESHOLD",
                2,
            )?,
            circuit_breaker_open_duration: Duration::from_secs(Self::parse_env(
                "CIRCUIT_BREAKER_OPEN_DURATION_SECS",
                30,
            )?),
            circuit_breaker_status_codes: Self::parse_status_codes()?,

            cache_enabled: Self::parse_env("CACHE_ENABLED", true)?,
            cache_max_entries: Self::parse_env("CACHE_MAX_ENTRIES", 1000)?,
            cache_idle_ttl: Duration::from_secs(Self::parse_env("CACHE_IDLE_TTL_SECS", 300)?),
            cache_max_body_bytes: Self::parse_env("CACHE_MAX_BODY_BYTES", 1024 * 1024)?,

            rate_limit_rps: Self::parse_env("RATE_LIMIT_RPS", 100)?,
            rate_limit_burst: Self::parse_env("RATE_LIMIT_BURST", 50)?,
            trusted_proxies: Self::parse_list("TRUSTED_PROXIES").unwrap_or_default(),
            cors_allowed_origins: Self::parse_list("CORS_ALLOWED_ORIGINS")
                .unwrap_or_else(|| vec!["*".to_string()]),

            log_level: env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string()),
            log_format: Self::parse_env("LOG_FORMAT", LogFormat::Text)?,
            metrics_port: Self::parse_env("METRICS_PORT", 9090)?,
            stats_refresh_interval: Duration::from_secs(Self::parse_env("STATS_REFRESH_SECS", 15)?),
        };

        config.validate()?;

        Ok(config)
    }

    /// # Errors
    ///
    /// Returns `StartupError::Config` naming the offending variable.
    pub fn validate(&self) -> StartupResult<()> {
        if self.jwt_secret.len() < MIN_SECRET_BYTES {
            return Err(StartupError::Config(format!(
                "JWT_SECRET must be set and at least {MIN_SECRET_BYTES} bytes long"
            )));
        }

        if self.circuit_breaker_failure_threshold == 0 {
            return Err(StartupError::Config(
                "CIRCUIT_BREAKER_FAILURE_THRESHOLD must be greater than 0".to_string(),
            ));
        }

        if self.circuit_breaker_success_threshold == 0 {
            return Err(StartupError::Config(
                "CIRCUIT_BREAKER_SUCCESS_THRESHOLD must be greater than 0".to_string(),
            ));
        }

        if let Some(code) = self
            .circuit_breaker_status_codes
            .iter()
            .find(|c| !(100..=599).contains(*c))
        {
            return Err(StartupError::Config(format!(
                "CIRCUIT_BREAKER_STATUS_CODES contains {code}, which is not an HTTP status"
            )));
        }

        if self.upstream_timeout.is_zero() {
            return Err(StartupError::Config(
                "UPSTREAM_TIMEOUT_MS must be greater than 0".to_string(),
            ));
        }

        if self.cache_enabled && self.cache_max_entries == 0 {
            return Err(StartupError::Config(
                "CACHE_MAX_ENTRIES must be greater than 0 when the cache is enabled".to_string(),
            ));
        }

        if self.max_request_body_size == 0 {
            return Err(StartupError::Config(
                "MAX_REQUEST_BODY_SIZE must be greater than 0".to_string(),
            ));
        }

        if self.stats_refresh_interval.is_zero() {
            return Err(StartupError::Config(
                "STATS_REFRESH_SECS must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }

    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn rate_limiting_enabled(&self) -> bool {
        self.rate_limit_rps > 0
    }

    pub fn metrics_enabled(&self) -> bool {
        self.metrics_port > 0
    }

    /// Prometheus listener address, `None` when metrics are disabled.
    pub fn metrics_addr(&self) -> Option<SocketAddr> {
        self.metrics_enabled()
            .then(|| SocketAddr::from(([0, 0, 0, 0], self.metrics_port)))
    }

    pub fn breaker_config(&self) -> CircuitBreakerConfig {
        CircuitBreakerConfig::new(
            self.circuit_breaker_failure_threshold,
            self.circuit_breaker_success_threshold,
            self.circuit_breaker_open_duration,
        )
    }

    pub fn upstream_config(&self) -> HttpUpstreamConfig {
        HttpUpstreamConfig {
            timeout: self.upstream_timeout,
            connect_timeout: self.upstream_connect_timeout,
        }
    }

    pub fn service_ids(&self) -> impl Iterator<Item = &str> {
        self.services.iter().map(|s| s.id.as_str())
    }

    fn parse_env<T>(name: &str, default: T) -> StartupResult<T>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        match env::var(name) {
            Ok(val) => val
                .parse()
                .map_err(|e| StartupError::Config(format!("Invalid {name}: {e}"))),
            Err(_) => Ok(default),
        }
    }

    /// Comma-separated list; `None` when the variable is unset or blank.
    fn parse_list(name: &str) -> Option<Vec<String>> {
        env::var(name)
            .ok()
            .filter(|s| !s.trim().is_empty())
            .map(|s| {
                s.split(',')
                    .map(|p| p.trim().to_string())
                    .filter(|p| !p.is_empty())
                    .collect()
            })
    }

    fn parse_status_codes() -> StartupResult<Vec<u16>> {
        Self::parse_list("CIRCUIT_BREAKER_STATUS_CODES")
            .unwrap_or_default()
            .iter()
            .map(|code| {
                code.parse::<u16>().map_err(|e| {
                    StartupError::Config(format!("Invalid CIRCUIT_BREAKER_STATUS_CODES entry '{code}': {e}"))
                })
            })
            .collect()
    }
}

/// Development and test baseline. `jwt_secret` is empty and must be set
/// before the configuration validates.
impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            jwt_secret: String::new(),
            auth_public_paths: DEFAULT_PUBLIC_PATHS.iter().map(|p| p.to_string()).collect(),
            forward_identity_headers: false,
            services: Vec::new(),
            upstream_timeout: Duration::from_millis(5000),
            upstream_connect_timeout: Duration::from_millis(2000),
            max_request_body_size: 10 * 1024 * 1024,
            circuit_breaker_failure_threshold: 5,
            circuit_breaker_success_threshold: 2,
            circuit_breaker_open_duration: Duration::from_secs(30),
            circuit_breaker_status_codes: Vec::new(),
            cache_enabled: true,
            cache_max_entries: 1000,
            cache_idle_ttl: Duration::from_secs(300),
            cache_max_body_bytes: 1024 * 1024,
            rate_limit_rps: 100,
            rate_limit_burst: 50,
            trusted_proxies: Vec::new(),
            cors_allowed_origins: vec!["*".to_string()],
            log_level: "info".to_string(),
            log_format: LogFormat::Text,
            metrics_port: 9090,
            stats_refresh_interval: Duration::from_secs(15),
        }
    }
}
