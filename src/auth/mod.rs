//! Bearer token verification, identity extraction and path-based access rules.

pub mod identity;
pub mod policy;
pub mod token;

pub use identity::{Identity, authority_for};
pub use policy::{AccessPolicy, AccessRule, PathPattern, RoleRequirement};
pub use token::{InvalidToken, SigningKey, TokenRequest, TokenValidator, VerifiedToken};
