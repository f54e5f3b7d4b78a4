//! Session domain types and ports

use std::sync::Mutex;

use crate::authz::AuthzError;
use crate::identity::{Identity, IdentityError};

/// The single published authentication/authorization state.
///
/// Exactly one variant is active at any time and no partial state is ever
/// published: a pending validation leaves the previous variant in place
/// until the backend check completes or fails closed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    /// Provider state still being determined (initial)
    Unknown,
    Unauthenticated,
    Authenticated {
        identity: Identity,
        is_authorized: bool,
    },
}

impl SessionState {
    pub fn is_authenticated(&self) -> bool {
        matches!(self, SessionState::Authenticated { .. })
    }
}

/// Errors that can occur while validating an identity
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error(transparent)]
    Identity(#[from] IdentityError),

    #[error(transparent)]
    Authorization(#[from] AuthzError),
}

/// Best-effort cache of the last signed-in email.
///
/// Purely a UI hint ("last known user"); never a trust boundary. Written on
/// successful validation, cleared on sign-out and on fail-closed.
pub trait LastUserStore: Send + Sync {
    fn remember(&self, email: &str);
    fn clear(&self);
    fn last_user(&self) -> Option<String>;
}

/// In-memory adapter for [`LastUserStore`]
pub struct InMemoryLastUserStore {
    email: Mutex<Option<String>>,
}

impl InMemoryLastUserStore {
    pub fn new() -> Self {
        Self {
            email: Mutex::new(None),
        }
    }
}

impl Default for InMemoryLastUserStore {
    fn default() -> Self {
        Self::new()
    }
}

impl LastUserStore for InMemoryLastUserStore {
    fn remember(&self, email: &str) {
        let mut cached = self.email.lock().unwrap_or_else(|e| e.into_inner());
        *cached = Some(email.to_string());
    }

    fn clear(&self) {
        let mut cached = self.email.lock().unwrap_or_else(|e| e.into_inner());
        *cached = None;
    }

    fn last_user(&self) -> Option<String> {
        let cached = self.email.lock().unwrap_or_else(|e| e.into_inner());
        cached.clone()
    }
}
