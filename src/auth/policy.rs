//! Path-based access rules.
//!
//! Rules are evaluated in order and the first matching pattern decides the
//! requirement. Paths matched by no rule require a valid identity only.
//!
//! Patterns use Ant-style segments:
//! - `**` matches zero or more path segments
//! - `*` matches exactly one segment
//! - anything else matches the segment literally

use crate::error::GatewayError;

use super::identity::Identity;

/// A compiled path pattern such as `/admin/**`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathPattern {
    raw: String,
    segments: Vec<Segment>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    AnyOne,
    AnyMany,
}

impl PathPattern {
    pub fn new(pattern: &str) -> Self {
        let segments = split_segments(pattern)
            .map(|s| match s {
                "**" => Segment::AnyMany,
                "*" => Segment::AnyOne,
                lit => Segment::Literal(lit.to_string()),
            })
            .collect();

        Self {
            raw: pattern.to_string(),
            segments,
        }
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn matches(&self, path: &str) -> bool {
        let parts: Vec<&str> = split_segments(path).collect();
        match_segments(&self.segments, &parts)
    }
}

fn split_segments(path: &str) -> impl Iterator<Item = &str> {
    path.split('/').filter(|s| !s.is_empty())
}

fn match_segments(pattern: &[Segment], path: &[&str]) -> bool {
    match pattern.split_first() {
        None => path.is_empty(),
        Some((Segment::AnyMany, rest)) => {
            (0..=path.len()).any(|skip| path.get(skip..).is_some_and(|tail| match_segments(rest, tail)))
        }
        Some((head, rest)) => match path.split_first() {
            Some((part, tail)) => {
                let ok = match head {
                    Segment::Literal(lit) => lit == part,
                    Segment::AnyOne => true,
                    Segment::AnyMany => false,
                };
                ok && match_segments(rest, tail)
            }
            None => false,
        },
    }
}

/// What a matched path requires of the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoleRequirement {
    /// No credential needed; authentication is skipped entirely.
    PermitAll,
    /// Any valid identity.
    Authenticated,
    /// A valid identity holding at least one of the roles.
    AnyRole(Vec<String>),
}

#[derive(Debug, Clone)]
pub struct AccessRule {
    pub pattern: PathPattern,
    pub requirement: RoleRequirement,
}

/// Ordered access rules for the gateway.
#[derive(Debug, Clone)]
pub struct AccessPolicy {
    rules: Vec<AccessRule>,
}

const AUTHENTICATED: RoleRequirement = RoleRequirement::Authenticated;

impl AccessPolicy {
    pub fn new(rules: Vec<AccessRule>) -> Self {
        Self { rules }
    }

    /// Public paths first, then `/admin/**` requiring ADMIN and `/users/**`
    /// requiring USER or ADMIN.
    pub fn standard<S: AsRef<str>>(public_paths: &[S]) -> Self {
        let mut rules: Vec<AccessRule> = public_paths
            .iter()
            .map(|p| AccessRule {
                pattern: PathPattern::new(p.as_ref()),
                requirement: RoleRequirement::PermitAll,
            })
            .collect();

        rules.push(AccessRule {
            pattern: PathPattern::new("/admin/**"),
            requirement: RoleRequirement::AnyRole(vec!["ADMIN".to_string()]),
        });
        rules.push(AccessRule {
            pattern: PathPattern::new("/users/**"),
            requirement: RoleRequirement::AnyRole(vec!["USER".to_string(), "ADMIN".to_string()]),
        });

        Self { rules }
    }

    pub fn requirement_for(&self, path: &str) -> &RoleRequirement {
        self.rules
            .iter()
            .find(|rule| rule.pattern.matches(path))
            .map(|rule| &rule.requirement)
            .unwrap_or(&AUTHENTICATED)
    }

    pub fn is_public(&self, path: &str) -> bool {
        matches!(self.requirement_for(path), RoleRequirement::PermitAll)
    }

    /// Check an authenticated identity against the rule for `path`.
    pub fn authorize(&self, identity: &Identity, path: &str) -> Result<(), GatewayError> {
        match self.requirement_for(path) {
            RoleRequirement::PermitAll | RoleRequirement::Authenticated => Ok(()),
            RoleRequirement::AnyRole(roles) if identity.has_any_role(roles) => Ok(()),
            RoleRequirement::AnyRole(roles) => Err(GatewayError::AccessDenied(format!(
                "'{}' lacks any of {roles:?} for {path}",
                identity.subject()
            ))),
        }
    }
}
