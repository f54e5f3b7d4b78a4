//! Role resolution
//!
//! Resolves the admin flag for the active identity and caches it for the
//! lifetime of the session. The flag is meaningful only while a session is
//! authenticated; it is invalidated whenever the identity changes and is
//! never carried over between distinct emails.

use std::sync::{Arc, Mutex};

use tracing::{debug, warn};

use crate::authz::AuthorizationBackend;
use crate::identity::{Credential, Identity};

#[derive(Debug, Clone, PartialEq, Eq)]
struct RoleEntry {
    email: String,
    is_admin: bool,
}

/// Cached per-identity admin flag
pub struct RoleResolver {
    backend: Arc<dyn AuthorizationBackend>,
    cached: Mutex<Option<RoleEntry>>,
}

impl RoleResolver {
    pub fn new(backend: Arc<dyn AuthorizationBackend>) -> Self {
        Self {
            backend,
            cached: Mutex::new(None),
        }
    }

    /// Resolve the admin flag for `identity`.
    ///
    /// Idempotent per email: repeated calls for an unchanged email return
    /// the cached value without touching the backend. A different email
    /// invalidates the cache unconditionally before resolving. Lookup
    /// failure resolves to `false` (least privilege) and is not cached, so
    /// a later call may still succeed.
    pub async fn resolve(&self, identity: &Identity, credential: &Credential) -> bool {
        if let Some(flag) = self.cached(&identity.email) {
            return flag;
        }

        // A stale entry for a different email must never leak across; drop
        // it before querying.
        self.invalidate();

        match self.backend.check_role(&identity.email, credential).await {
            Ok(check) => {
                self.store(&identity.email, check.is_admin);
                check.is_admin
            }
            Err(e) => {
                warn!("Role lookup failed for {}: {e}", identity.email);
                false
            }
        }
    }

    /// Cached flag for `email`, without querying
    pub fn cached(&self, email: &str) -> Option<bool> {
        let cached = self.cached.lock().unwrap_or_else(|e| e.into_inner());
        cached
            .as_ref()
            .filter(|entry| entry.email == email)
            .map(|entry| entry.is_admin)
    }

    /// Seed the cache from an authorization check performed elsewhere
    pub fn store(&self, email: &str, is_admin: bool) {
        debug!("Caching role for {email}: is_admin={is_admin}");
        let mut cached = self.cached.lock().unwrap_or_else(|e| e.into_inner());
        *cached = Some(RoleEntry {
            email: email.to_string(),
            is_admin,
        });
    }

    /// Drop any cached flag
    pub fn invalidate(&self) {
        let mut cached = self.cached.lock().unwrap_or_else(|e| e.into_inner());
        *cached = None;
    }
}
