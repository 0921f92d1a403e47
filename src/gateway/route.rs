//! Route descriptors derived from the set of known service identifiers.

use std::collections::HashMap;

use serde::Serialize;

use crate::error::{StartupError, StartupResult};

/// Suffix appended to a service id to name its breaker.
pub const BREAKER_SUFFIX: &str = "-CB";

/// A backing service resolved by the discovery collaborator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceTarget {
    pub id: String,
    pub base_url: String,
}

impl ServiceTarget {
    /// Parse a comma-separated `id=url` list, e.g.
    /// `orders=http://orders:8080,billing=http://billing:8080`.
    pub fn parse_list(raw: &str) -> StartupResult<Vec<Self>> {
        let mut targets: Vec<Self> = Vec::new();

        for entry in raw.split(',').map(str::trim).filter(|e| !e.is_empty()) {
            let (id, url) = entry.split_once('=').ok_or_else(|| {
                StartupError::Config(format!("GATEWAY_SERVICES entry '{entry}' is not id=url"))
            })?;
            let (id, url) = (id.trim(), url.trim().trim_end_matches('/'));

            if id.is_empty() || url.is_empty() {
                return Err(StartupError::Config(format!(
                    "GATEWAY_SERVICES entry '{entry}' has an empty id or url"
                )));
            }
            if !id.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_') {
                return Err(StartupError::Config(format!(
                    "GATEWAY_SERVICES id '{id}' may only contain letters, digits, '-' and '_'"
                )));
            }
            if !(url.starts_with("http://") || url.starts_with("https://")) {
                return Err(StartupError::Config(format!(
                    "GATEWAY_SERVICES url for '{id}' must be http(s), got '{url}'"
                )));
            }
            if targets.iter().any(|t| t.id.eq_ignore_ascii_case(id)) {
                return Err(StartupError::Config(format!(
                    "GATEWAY_SERVICES lists '{id}' more than once"
                )));
            }

            targets.push(Self {
                id: id.to_string(),
                base_url: url.to_string(),
            });
        }

        Ok(targets)
    }
}

/// Per-service routing metadata. Static for the process lifetime.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RouteDescriptor {
    pub service_id: String,
    pub path_prefix: String,
    pub breaker_id: String,
    pub fallback: String,
}

impl RouteDescriptor {
    /// `orders` → prefix `/orders`, breaker `orders-CB`, fallback `/fallback/orders`.
    pub fn for_service(service_id: &str) -> Self {
        Self {
            service_id: service_id.to_string(),
            path_prefix: format!("/{}", service_id.to_lowercase()),
            breaker_id: format!("{service_id}{BREAKER_SUFFIX}"),
            fallback: format!("/fallback/{service_id}"),
        }
    }

    /// Whether `path` falls under this route's prefix on a segment boundary.
    pub fn matches(&self, path: &str) -> bool {
        match path.strip_prefix(self.path_prefix.as_str()) {
            Some(rest) => rest.is_empty() || rest.starts_with('/'),
            None => false,
        }
    }

    /// Remove the route prefix from `path_and_query`, keeping the query.
    ///
    /// `/orders/42?x=1` → `/42?x=1`; `/orders` → `/`.
    pub fn strip_prefix(&self, path_and_query: &str) -> String {
        let rest = path_and_query
            .strip_prefix(self.path_prefix.as_str())
            .unwrap_or(path_and_query);

        if rest.is_empty() {
            "/".to_string()
        } else if rest.starts_with('?') {
            format!("/{rest}")
        } else {
            rest.to_string()
        }
    }
}

/// Immutable table of route descriptors.
#[derive(Debug, Clone, Default)]
pub struct RouteTable {
    routes: Vec<RouteDescriptor>,
    by_id: HashMap<String, usize>,
}

impl RouteTable {
    pub fn from_services<'a, I>(service_ids: I) -> Self
    where
        I: IntoIterator<Item = &'a str>,
    {
        let routes: Vec<RouteDescriptor> = service_ids
            .into_iter()
            .map(RouteDescriptor::for_service)
            .collect();
        let by_id = routes
            .iter()
            .enumerate()
            .map(|(i, r)| (r.service_id.clone(), i))
            .collect();

        Self { routes, by_id }
    }

    /// Route whose prefix matches `path`, if any.
    pub fn match_path(&self, path: &str) -> Option<&RouteDescriptor> {
        self.routes.iter().find(|r| r.matches(path))
    }

    pub fn get(&self, service_id: &str) -> Option<&RouteDescriptor> {
        self.by_id.get(service_id).and_then(|&i| self.routes.get(i))
    }

    pub fn iter(&self) -> impl Iterator<Item = &RouteDescriptor> {
        self.routes.iter()
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}
