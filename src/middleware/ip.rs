//! Client IP resolution shared by rate limiting and brute-force protection.
//!
//! The connection peer address (axum's `ConnectInfo<SocketAddr>`) is the
//! source of truth. Forwarding headers are only consulted when the peer
//! itself is a configured trusted proxy:
//!
//! ```text
//! peer ∈ TRUSTED_PROXIES ?
//!   yes → first X-Forwarded-For entry, else X-Real-IP, else peer
//!   no  → peer
//! no ConnectInfo → "unknown"
//! ```
//!
//! With `TRUSTED_PROXIES` empty, client-supplied headers are never trusted.
//! All requests without a peer address share the [`UNKNOWN_IP`] key.

use std::borrow::Cow;
use std::net::{IpAddr, SocketAddr};

use axum::extract::ConnectInfo;
use axum::http::Request;
use tracing::{debug, warn};

/// Key used when no client IP can be determined.
pub const UNKNOWN_IP: &str = "unknown";

/// Parsed CIDR network range.
#[derive(Debug, Clone)]
pub struct CidrRange {
    network: IpAddr,
    prefix_len: u8,
}

impl CidrRange {
    /// Parse CIDR notation (`10.0.0.0/8`, `::1/128`) or a bare address
    /// (implicit `/32` or `/128`). Returns `None` if the format is invalid.
    pub fn parse(cidr: &str) -> Option<Self> {
        let cidr = cidr.trim();
        let (addr, prefix) = match cidr.split_once('/') {
            Some((addr, prefix)) => (addr, Some(prefix)),
            None => (cidr, None),
        };

        let network: IpAddr = addr.parse().ok()?;
        let max_prefix = match network {
            IpAddr::V4(_) => 32,
            IpAddr::V6(_) => 128,
        };
        let prefix_len = match prefix {
            Some(p) => p.parse::<u8>().ok()?,
            None => max_prefix,
        };
        if prefix_len > max_prefix {
            return None;
        }

        Some(Self { network, prefix_len })
    }

    pub fn contains(&self, ip: &IpAddr) -> bool {
        match (&self.network, ip) {
            (IpAddr::V4(net), IpAddr::V4(addr)) => {
                let mask = u32::MAX.checked_shl(32 - u32::from(self.prefix_len)).unwrap_or(0);
                (u32::from(*net) & mask) == (u32::from(*addr) & mask)
            }
            (IpAddr::V6(net), IpAddr::V6(addr)) => {
                let mask = u128::MAX.checked_shl(128 - u32::from(self.prefix_len)).unwrap_or(0);
                (u128::from(*net) & mask) == (u128::from(*addr) & mask)
            }
            _ => false,
        }
    }
}

/// Networks whose connections may set `X-Forwarded-For`.
#[derive(Debug, Clone, Default)]
pub struct TrustedProxyConfig {
    ranges: Vec<CidrRange>,
}

impl TrustedProxyConfig {
    /// Build from CIDR strings. Invalid entries are logged and skipped.
    pub fn new(cidrs: &[String]) -> Self {
        let ranges: Vec<CidrRange> = cidrs
            .iter()
            .filter_map(|cidr| {
                let parsed = CidrRange::parse(cidr);
                if parsed.is_none() {
                    warn!(cidr = %cidr, "Invalid CIDR range in TRUSTED_PROXIES, skipping");
                }
                parsed
            })
            .collect();

        if !ranges.is_empty() {
            debug!(count = ranges.len(), "Trusted proxy ranges configured");
        }

        Self { ranges }
    }

    pub fn is_enabled(&self) -> bool {
        !self.ranges.is_empty()
    }

    /// Whether `ip` belongs to a trusted proxy. Nothing is trusted when no
    /// ranges are configured.
    pub fn is_trusted(&self, ip: &IpAddr) -> bool {
        self.ranges.iter().any(|range| range.contains(ip))
    }
}

/// Resolve the client IP for per-client keying.
pub fn client_ip<B>(req: &Request<B>, trusted: &TrustedProxyConfig) -> Cow<'static, str> {
    let Some(ConnectInfo(peer)) = req.extensions().get::<ConnectInfo<SocketAddr>>() else {
        return Cow::Borrowed(UNKNOWN_IP);
    };
    let peer = peer.ip();

    if trusted.is_trusted(&peer)
        && let Some(forwarded) = forwarded_ip(req)
    {
        return Cow::Owned(forwarded.to_string());
    }

    Cow::Owned(peer.to_string())
}

/// First parseable address from `X-Forwarded-For`, else `X-Real-IP`.
fn forwarded_ip<B>(req: &Request<B>) -> Option<IpAddr> {
    let headers = req.headers();

    if let Some(xff) = headers.get("x-forwarded-for").and_then(|v| v.to_str().ok())
        && let Some(first) = xff.split(',').next()
        && let Ok(ip) = first.trim().parse()
    {
        return Some(ip);
    }

    headers
        .get("x-real-ip")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse().ok())
}
