//! Authenticated identity attached to a request after token validation.

use std::collections::BTreeSet;

use serde_json::{Map, Value};

use super::token::VerifiedToken;

/// Prefix applied to every role when mapping it to an authority.
pub const AUTHORITY_PREFIX: &str = "ROLE_";

/// Claim holding the role sequence.
pub const ROLES_CLAIM: &str = "roles";

/// Claim holding the issuing tenant.
pub const TENANT_CLAIM: &str = "tenantId";

/// Identity context produced once per request by the authentication layer.
///
/// Stored in the request extensions and dropped with the request. It is
/// never forwarded to a backend unless identity header forwarding is enabled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    subject: String,
    authorities: BTreeSet<String>,
    tenant: Option<String>,
}

impl Identity {
    pub fn new(subject: impl Into<String>, authorities: BTreeSet<String>, tenant: Option<String>) -> Self {
        Self {
            subject: subject.into(),
            authorities,
            tenant,
        }
    }

    /// Build the identity from a verified token's subject, `roles` and
    /// `tenantId` claims.
    pub fn from_verified(token: VerifiedToken) -> Self {
        let authorities = authorities_from_claims(&token.claims);
        let tenant = token
            .claims
            .get(TENANT_CLAIM)
            .and_then(Value::as_str)
            .map(str::to_string);

        Self {
            subject: token.subject,
            authorities,
            tenant,
        }
    }

    pub fn subject(&self) -> &str {
        &self.subject
    }

    /// Authorities in `ROLE_<NAME>` form.
    pub fn authorities(&self) -> &BTreeSet<String> {
        &self.authorities
    }

    pub fn tenant(&self) -> Option<&str> {
        self.tenant.as_deref()
    }

    /// Whether the identity holds `role` (case-insensitive, without prefix).
    pub fn has_role(&self, role: &str) -> bool {
        self.authorities.contains(&authority_for(role))
    }

    pub fn has_any_role<S: AsRef<str>>(&self, roles: &[S]) -> bool {
        roles.iter().any(|r| self.has_role(r.as_ref()))
    }
}

/// Map a role name to its authority: `"admin"` becomes `"ROLE_ADMIN"`.
pub fn authority_for(role: &str) -> String {
    format!("{AUTHORITY_PREFIX}{}", role.to_uppercase())
}

/// Read the `roles` claim as a set of authorities.
///
/// A missing claim, a non-array value, or non-string elements never fail the
/// request; they simply contribute no authorities.
pub fn authorities_from_claims(claims: &Map<String, Value>) -> BTreeSet<String> {
    match claims.get(ROLES_CLAIM) {
        Some(Value::Array(roles)) => roles
            .iter()
            .filter_map(Value::as_str)
            .filter(|r| !r.is_empty())
            .map(authority_for)
            .collect(),
        _ => BTreeSet::new(),
    }
}
