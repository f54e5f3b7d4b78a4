//! Authorization backend ports (trait definitions)
//!
//! One boundary: ask the backend whether a credentialed email is still a
//! valid account and whether it carries the admin role. Any failure here is
//! treated by callers as "not authorized, identity possibly invalid".

use async_trait::async_trait;
use serde::Deserialize;

use crate::identity::Credential;

/// Result of an authorization check
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct RoleCheck {
    pub is_admin: bool,
}

/// Error type for authorization backend operations
#[derive(Debug, thiserror::Error)]
pub enum AuthzError {
    #[error("authorization request failed: {0}")]
    RequestFailed(String),
    #[error("authorization backend returned an error: {status} {body}")]
    ApiError { status: u16, body: String },
    #[error("authorization response parsing failed: {0}")]
    ParseError(String),
}

/// Trait for the authorization backend.
///
/// The credential must be freshly obtained by the caller; this boundary
/// never caches or refreshes tokens itself.
#[async_trait]
pub trait AuthorizationBackend: Send + Sync {
    async fn check_role(&self, email: &str, credential: &Credential)
        -> Result<RoleCheck, AuthzError>;
}
