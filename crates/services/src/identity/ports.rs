//! Identity provider ports (trait definitions)
//!
//! The identity provider is a trusted black box: it signs users in and out,
//! issues opaque time-limited credentials, and tracks whether the account
//! completed out-of-band email verification. The session core depends on
//! this trait, not on any concrete provider SDK.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Snapshot of the remote account record.
///
/// Owned by the provider; the session core only reads snapshots and never
/// mutates them. `email` is the stable key used for authorization checks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub email: String,
    /// Server-controlled email-verification flag
    pub verified: bool,
    /// Cosmetic only, never used for decisions
    pub photo_url: Option<String>,
}

/// Opaque bearer credential tied to an [`Identity`].
///
/// A cached credential can outlive a server-side revocation, so security
/// decisions must always start from a forced refresh. The session core
/// holds no persistent copy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credential(pub String);

/// Errors reported by the identity provider
#[derive(Debug, thiserror::Error)]
pub enum IdentityError {
    #[error("identity provider request failed: {0}")]
    Provider(String),

    #[error("no signed-in identity")]
    NotSignedIn,
}

/// Capabilities required from any conforming identity service
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Current identity snapshot, if any account is signed in
    async fn current_identity(&self) -> Option<Identity>;

    /// Obtain a fresh credential, bypassing any provider-side cache.
    ///
    /// This is the only way to surface a server-side revocation quickly: a
    /// stale cached token remains syntactically valid after the account is
    /// deleted.
    async fn force_refresh_token(&self, identity: &Identity) -> Result<Credential, IdentityError>;

    /// Re-fetch the identity record (fresh `verified` flag included)
    async fn reload(&self, identity: &Identity) -> Result<Identity, IdentityError>;

    /// Sign the current account out
    async fn sign_out(&self) -> Result<(), IdentityError>;

    /// Re-send the out-of-band verification message
    async fn send_verification_email(&self, identity: &Identity) -> Result<(), IdentityError>;
}
