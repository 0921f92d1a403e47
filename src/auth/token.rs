//! HMAC-SHA256 bearer token signing and validation.
//!
//! The signing key is derived once from the configured secret at startup and
//! injected into [`TokenValidator`]; it is immutable afterwards and safe for
//! concurrent reads.

use std::fmt;

use chrono::{Duration, Utc};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::Serialize;
use serde_json::{Map, Value};
use thiserror::Error;

use crate::error::{StartupError, StartupResult};

/// Minimum secret length in bytes (256 bits for HS256).
pub const MIN_SECRET_BYTES: usize = 32;

/// Default lifetime of issued tokens, in hours.
pub const DEFAULT_TOKEN_TTL_HOURS: i64 = 8;

/// Reason a token was rejected. All variants surface to clients as a plain
/// authentication failure; the distinction only reaches the logs.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum InvalidToken {
    #[error("token has expired")]
    Expired,

    #[error("signature does not verify")]
    BadSignature,

    #[error("token is not signed with HS256")]
    AlgorithmMismatch,

    #[error("malformed token: {0}")]
    Malformed(String),
}

impl InvalidToken {
    /// Label for metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            InvalidToken::Expired => "expired",
            InvalidToken::BadSignature => "bad_signature",
            InvalidToken::AlgorithmMismatch => "algorithm_mismatch",
            InvalidToken::Malformed(_) => "malformed",
        }
    }
}

impl From<jsonwebtoken::errors::Error> for InvalidToken {
    fn from(err: jsonwebtoken::errors::Error) -> Self {
        match err.kind() {
            ErrorKind::ExpiredSignature => InvalidToken::Expired,
            ErrorKind::InvalidSignature => InvalidToken::BadSignature,
            ErrorKind::InvalidAlgorithm => InvalidToken::AlgorithmMismatch,
            _ => InvalidToken::Malformed(err.to_string()),
        }
    }
}

/// Symmetric key material derived from the shared secret.
#[derive(Clone)]
pub struct SigningKey {
    encoding: EncodingKey,
    decoding: DecodingKey,
}

impl fmt::Debug for SigningKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SigningKey(..)")
    }
}

impl SigningKey {
    /// Derive the key from the UTF-8 bytes of `secret`.
    ///
    /// # Errors
    ///
    /// Returns `StartupError::Config` if the secret is shorter than
    /// [`MIN_SECRET_BYTES`].
    pub fn from_secret(secret: &str) -> StartupResult<Self> {
        let bytes = secret.as_bytes();
        if bytes.len() < MIN_SECRET_BYTES {
            return Err(StartupError::Config(format!(
                "JWT_SECRET must be at least {MIN_SECRET_BYTES} bytes, got {}",
                bytes.len()
            )));
        }

        Ok(Self {
            encoding: EncodingKey::from_secret(bytes),
            decoding: DecodingKey::from_secret(bytes),
        })
    }

    /// Mint a signed token for `subject`.
    ///
    /// Claims written: `sub`, `username`, `iat`, `exp`, `roles`, and
    /// `tenantId` when a tenant is given.
    pub fn issue(&self, request: &TokenRequest) -> Result<String, InvalidToken> {
        let now = Utc::now();
        let claims = IssuedClaims {
            sub: &request.subject,
            username: &request.subject,
            iat: now.timestamp(),
            exp: (now + request.ttl).timestamp(),
            roles: &request.roles,
            tenant_id: request.tenant.as_deref(),
        };

        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding).map_err(InvalidToken::from)
    }
}

/// Parameters for [`SigningKey::issue`].
#[derive(Debug, Clone)]
pub struct TokenRequest {
    pub subject: String,
    pub roles: Vec<String>,
    pub tenant: Option<String>,
    pub ttl: Duration,
}

impl TokenRequest {
    pub fn new(subject: impl Into<String>) -> Self {
        Self {
            subject: subject.into(),
            roles: Vec::new(),
            tenant: None,
            ttl: Duration::hours(DEFAULT_TOKEN_TTL_HOURS),
        }
    }

    pub fn with_roles<I, S>(mut self, roles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.roles = roles.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_tenant(mut self, tenant: impl Into<String>) -> Self {
        self.tenant = Some(tenant.into());
        self
    }

    /// Lifetime relative to now. Negative values produce an already-expired token.
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }
}

#[derive(Serialize)]
struct IssuedClaims<'a> {
    sub: &'a str,
    username: &'a str,
    iat: i64,
    exp: i64,
    roles: &'a [String],
    #[serde(rename = "tenantId", skip_serializing_if = "Option::is_none")]
    tenant_id: Option<&'a str>,
}

/// Successfully verified token.
#[derive(Debug, Clone, PartialEq)]
pub struct VerifiedToken {
    pub subject: String,
    pub claims: Map<String, Value>,
}

/// Verifies HS256 tokens against the injected [`SigningKey`].
#[derive(Debug, Clone)]
pub struct TokenValidator {
    key: SigningKey,
    validation: Validation,
}

impl TokenValidator {
    pub fn new(key: SigningKey) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;
        validation.validate_aud = false;
        validation.set_required_spec_claims(&["exp", "sub"]);

        Self { key, validation }
    }

    /// Verify signature, algorithm, structure and expiry, then return the
    /// subject and the raw claims.
    ///
    /// A token is expired once the current time reaches its `exp` claim,
    /// which may carry fractional seconds. Audience is not checked.
    pub fn validate(&self, token: &str) -> Result<VerifiedToken, InvalidToken> {
        let data = decode::<Map<String, Value>>(token, &self.key.decoding, &self.validation)?;
        let claims = data.claims;

        let exp = claims
            .get("exp")
            .and_then(Value::as_f64)
            .ok_or_else(|| InvalidToken::Malformed("exp is not a number".to_string()))?;
        let now = Utc::now().timestamp_millis() as f64 / 1000.0;
        if now >= exp {
            return Err(InvalidToken::Expired);
        }

        let subject = match claims.get("sub").and_then(Value::as_str) {
            Some(sub) if !sub.is_empty() => sub.to_string(),
            _ => return Err(InvalidToken::Malformed("empty subject".to_string())),
        };

        Ok(VerifiedToken { subject, claims })
    }

    /// The key this validator verifies with, for issuing tokens in the same
    /// trust domain.
    pub fn signing_key(&self) -> &SigningKey {
        &self.key
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    const SECRET: &str = "thisisaverylongandsecuresecretkeyforjwtauthenticationtesting";
    const OTHER_SECRET: &str = "a-completely-different-secret-of-sufficient-length!!";

    fn validator() -> TokenValidator {
        TokenValidator::new(SigningKey::from_secret(SECRET).unwrap())
    }

    #[test]
    fn test_short_secret_rejected() {
        let err = SigningKey::from_secret("too-short").unwrap_err();
        assert!(err.to_string().contains("JWT_SECRET"));
    }

    #[test]
    fn test_valid_token_round_trips_subject() {
        let v = validator();
        for subject in ["alice", "bob@example.com", "service-account-7"] {
            let token = v
                .signing_key()
                .issue(&TokenRequest::new(subject).with_roles(["user"]))
                .unwrap();
            let verified = v.validate(&token).unwrap();
            assert_eq!(verified.subject, subject);
            assert_eq!(verified.claims["username"], subject);
        }
    }

    fn sign(claims: &Value) -> String {
        encode(
            &Header::new(Algorithm::HS256),
            claims,
            &EncodingKey::from_secret(SECRET.as_bytes()),
        )
        .unwrap()
    }

    #[test]
    fn test_token_with_audience_accepted() {
        let token = sign(&serde_json::json!({
            "sub": "alice",
            "aud": "gateway",
            "exp": Utc::now().timestamp() + 3600,
        }));

        let verified = validator().validate(&token).unwrap();
        assert_eq!(verified.subject, "alice");
        assert_eq!(verified.claims["aud"], "gateway");
    }

    #[test]
    fn test_fractional_expiry_accepted() {
        let token = sign(&serde_json::json!({
            "sub": "alice",
            "exp": Utc::now().timestamp() as f64 + 3600.5,
        }));

        assert_eq!(validator().validate(&token).unwrap().subject, "alice");
    }

    #[test]
    fn test_fractional_expiry_in_past_rejected() {
        let token = sign(&serde_json::json!({
            "sub": "alice",
            "exp": Utc::now().timestamp() as f64 - 60.5,
        }));

        assert_eq!(validator().validate(&token), Err(InvalidToken::Expired));
    }

    #[test]
    fn test_tenant_claim_is_written() {
        let v = validator();
        let token = v
            .signing_key()
            .issue(&TokenRequest::new("alice").with_tenant("sincdev"))
            .unwrap();
        let verified = v.validate(&token).unwrap();
        assert_eq!(verified.claims["tenantId"], "sincdev");
    }

    #[test]
    fn test_token_from_other_secret_rejected() {
        let foreign = SigningKey::from_secret(OTHER_SECRET).unwrap();
        let token = foreign.issue(&TokenRequest::new("mallory")).unwrap();

        assert_eq!(validator().validate(&token), Err(InvalidToken::BadSignature));
    }

    #[test]
    fn test_expired_token_rejected() {
        let v = validator();
        let token = v
            .signing_key()
            .issue(&TokenRequest::new("alice").with_ttl(Duration::minutes(-5)))
            .unwrap();

        assert_eq!(v.validate(&token), Err(InvalidToken::Expired));
    }

    #[test]
    fn test_token_expiring_now_rejected() {
        let v = validator();
        let token = v
            .signing_key()
            .issue(&TokenRequest::new("alice").with_ttl(Duration::zero()))
            .unwrap();

        assert_eq!(v.validate(&token), Err(InvalidToken::Expired));
    }

    #[test]
    fn test_wrong_algorithm_rejected() {
        let claims = serde_json::json!({
            "sub": "alice",
            "exp": Utc::now().timestamp() + 3600,
        });
        let token = encode(
            &Header::new(Algorithm::HS512),
            &claims,
            &EncodingKey::from_secret(SECRET.as_bytes()),
        )
        .unwrap();

        assert_eq!(validator().validate(&token), Err(InvalidToken::AlgorithmMismatch));
    }

    #[test]
    fn test_malformed_tokens_rejected() {
        let v = validator();
        for garbage in ["", "abc", "a.b.c", "not a token at all"] {
            assert!(
                matches!(v.validate(garbage), Err(InvalidToken::Malformed(_))),
                "{garbage:?} should be malformed"
            );
        }
    }

    #[test]
    fn test_missing_expiry_rejected() {
        let claims = serde_json::json!({ "sub": "alice" });
        let token = encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(SECRET.as_bytes()),
        )
        .unwrap();

        assert!(validator().validate(&token).is_err());
    }

    #[test]
    fn test_invalid_token_kinds() {
        assert_eq!(InvalidToken::Expired.kind(), "expired");
        assert_eq!(InvalidToken::Malformed("x".into()).kind(), "malformed");
    }
}
