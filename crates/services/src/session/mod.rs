//! Session monitor
//!
//! Single source of truth for "is there a currently usable, server-validated
//! identity". The monitor consumes identity events, forces a credential
//! refresh for every event (a cached token can outlive a server-side
//! revocation), confirms the identity against the authorization backend and
//! publishes [`SessionState`] through a watch channel. Any validation
//! failure fails closed: the provider is signed out and all cached
//! role/verification state is discarded.

pub mod ports;

#[cfg(test)]
mod tests;

use std::sync::Arc;
use std::time::Duration;

use config::{SessionConfig, VerificationConfig};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time;
use tracing::{debug, error, info, warn};

use crate::authz::AuthorizationBackend;
use crate::identity::{Identity, IdentityEvent, IdentityProvider, IdentitySubscription};
use crate::role::RoleResolver;
use crate::verification::{VerificationGate, VerificationStatus, VerifiedNotice};

pub use ports::{InMemoryLastUserStore, LastUserStore, SessionError, SessionState};

/// Result of one epoch-tagged validation task
struct CheckOutcome {
    epoch: u64,
    identity: Identity,
    result: Result<bool, SessionError>,
}

/// Owner of the session state machine. Built once at application start and
/// spawned into a background task; the returned [`SessionHandle`] is the
/// injected context the rest of the application reads from.
pub struct SessionMonitor {
    provider: Arc<dyn IdentityProvider>,
    backend: Arc<dyn AuthorizationBackend>,
    roles: Arc<RoleResolver>,
    last_user: Arc<dyn LastUserStore>,
    check_attempts: u32,
    check_backoff: Duration,
    poll_interval: Duration,
}

impl SessionMonitor {
    pub fn new(
        provider: Arc<dyn IdentityProvider>,
        backend: Arc<dyn AuthorizationBackend>,
        roles: Arc<RoleResolver>,
        last_user: Arc<dyn LastUserStore>,
        session: &SessionConfig,
        verification: &VerificationConfig,
    ) -> Self {
        Self {
            provider,
            backend,
            roles,
            last_user,
            check_attempts: session.check_attempts.max(1),
            check_backoff: Duration::from_millis(session.check_backoff_ms),
            poll_interval: Duration::from_secs(verification.poll_interval_seconds),
        }
    }

    /// Start the run loop on `events`. The loop exits on shutdown, on drop
    /// of the handle, or when the event channel closes; every exit path
    /// cancels the outstanding validation task and the verification poll.
    pub fn spawn(self, events: IdentitySubscription) -> SessionHandle {
        let (state_tx, state_rx) = watch::channel(SessionState::Unknown);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let gate = VerificationGate::new(self.provider.clone(), self.poll_interval);
        let verification_rx = gate.subscribe();

        let run = MonitorLoop {
            provider: self.provider,
            backend: self.backend,
            roles: self.roles,
            last_user: self.last_user,
            check_attempts: self.check_attempts,
            check_backoff: self.check_backoff,
            gate,
            state_tx,
            epoch: 0,
            in_flight: None,
        };
        let task = tokio::spawn(run.run(events, shutdown_rx));

        SessionHandle {
            state: state_rx,
            verification: verification_rx,
            shutdown: shutdown_tx,
            task,
        }
    }
}

/// Read side of the session context plus its teardown switch
pub struct SessionHandle {
    state: watch::Receiver<SessionState>,
    verification: watch::Receiver<VerificationStatus>,
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl SessionHandle {
    /// Subscribe to session state changes
    pub fn state(&self) -> watch::Receiver<SessionState> {
        self.state.clone()
    }

    /// Subscribe to verification status changes
    pub fn verification(&self) -> watch::Receiver<VerificationStatus> {
        self.verification.clone()
    }

    pub fn current_state(&self) -> SessionState {
        self.state.borrow().clone()
    }

    pub fn verification_status(&self) -> VerificationStatus {
        *self.verification.borrow()
    }

    /// Cooperative teardown: stops the run loop, the outstanding validation
    /// task and the verification poll before returning.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        let _ = self.task.await;
    }
}

struct MonitorLoop {
    provider: Arc<dyn IdentityProvider>,
    backend: Arc<dyn AuthorizationBackend>,
    roles: Arc<RoleResolver>,
    last_user: Arc<dyn LastUserStore>,
    check_attempts: u32,
    check_backoff: Duration,
    gate: VerificationGate,
    state_tx: watch::Sender<SessionState>,
    /// Token for in-flight work; anything tagged with an older epoch is stale
    epoch: u64,
    in_flight: Option<JoinHandle<()>>,
}

impl MonitorLoop {
    async fn run(
        mut self,
        mut events: IdentitySubscription,
        mut shutdown: watch::Receiver<bool>,
    ) {
        let (checks_tx, mut checks_rx) = mpsc::channel::<CheckOutcome>(8);
        let (notices_tx, mut notices_rx) = mpsc::channel::<VerifiedNotice>(8);

        loop {
            tokio::select! {
                event = events.next() => match event {
                    Some(IdentityEvent::SignedIn(identity)) => {
                        self.handle_signed_in(identity, &checks_tx);
                    }
                    Some(IdentityEvent::SignedOut) => self.handle_signed_out(),
                    // Event channel gone: the provider was torn down
                    None => break,
                },
                Some(outcome) = checks_rx.recv() => {
                    self.handle_check_outcome(outcome, &notices_tx).await;
                }
                Some(notice) = notices_rx.recv() => self.handle_verified(notice),
                // Fires on an explicit shutdown send and on handle drop
                _ = shutdown.changed() => break,
            }
        }

        self.cancel_in_flight();
        self.gate.reset();
        debug!("Session monitor stopped");
    }

    fn handle_signed_in(&mut self, identity: Identity, checks_tx: &mpsc::Sender<CheckOutcome>) {
        self.epoch += 1;
        self.cancel_in_flight();
        // The previous identity's poll must not outlive the switch
        self.gate.reset();

        info!("Identity signed in: {}, validating", identity.email);

        let provider = self.provider.clone();
        let backend = self.backend.clone();
        let attempts = self.check_attempts;
        let backoff = self.check_backoff;
        let epoch = self.epoch;
        let checks_tx = checks_tx.clone();
        self.in_flight = Some(tokio::spawn(async move {
            let result = validate_identity(&*provider, &*backend, &identity, attempts, backoff).await;
            let _ = checks_tx.send(CheckOutcome {
                epoch,
                identity,
                result,
            })
            .await;
        }));
    }

    fn handle_signed_out(&mut self) {
        self.epoch += 1;
        self.cancel_in_flight();
        info!("Identity signed out");
        self.discard_session();
    }

    async fn handle_check_outcome(
        &mut self,
        outcome: CheckOutcome,
        notices_tx: &mpsc::Sender<VerifiedNotice>,
    ) {
        if outcome.epoch != self.epoch {
            debug!(
                "Dropping stale validation result for {} (superseded identity)",
                outcome.identity.email
            );
            return;
        }
        self.in_flight = None;

        match outcome.result {
            Ok(is_admin) => {
                let identity = outcome.identity;
                debug!(
                    "Identity {} validated, is_admin={is_admin}, verified={}",
                    identity.email, identity.verified
                );
                self.roles.store(&identity.email, is_admin);
                self.last_user.remember(&identity.email);
                self.gate
                    .observe_signed_in(self.epoch, &identity, notices_tx.clone());
                self.state_tx.send_replace(SessionState::Authenticated {
                    identity,
                    is_authorized: is_admin,
                });
            }
            Err(e) => {
                // A deleted or revoked account must not stay signed in;
                // any failure here is treated as an invalid identity.
                error!(
                    "Validation failed for {}, signing out: {e}",
                    outcome.identity.email
                );
                if let Err(e) = self.provider.sign_out().await {
                    warn!("Provider sign-out failed: {e}");
                }
                self.discard_session();
            }
        }
    }

    fn handle_verified(&mut self, notice: VerifiedNotice) {
        if notice.epoch != self.epoch {
            debug!(
                "Dropping stale verification notice for {}",
                notice.identity.email
            );
            return;
        }

        info!("Email verification confirmed for {}", notice.identity.email);
        self.gate.confirm();

        // Republish with the fresh snapshot so dependents drop any stale
        // "pending" rendering; one-shot, driven by the edge transition.
        let is_authorized = self.roles.cached(&notice.identity.email).unwrap_or(false);
        self.state_tx.send_replace(SessionState::Authenticated {
            identity: notice.identity,
            is_authorized,
        });
    }

    /// Shared cleanup for sign-out and fail-closed paths
    fn discard_session(&mut self) {
        self.roles.invalidate();
        self.last_user.clear();
        self.gate.reset();
        self.state_tx.send_replace(SessionState::Unauthenticated);
    }

    fn cancel_in_flight(&mut self) {
        if let Some(task) = self.in_flight.take() {
            debug!("Cancelling outstanding validation task");
            task.abort();
        }
    }
}

/// Force-refresh the credential and confirm the identity server-side.
///
/// Each attempt re-obtains a fresh credential; a retry satisfied by a stale
/// token would defeat the point of the check. `attempts` defaults to 1,
/// reproducing the observed immediate fail-closed behavior.
async fn validate_identity(
    provider: &dyn IdentityProvider,
    backend: &dyn AuthorizationBackend,
    identity: &Identity,
    attempts: u32,
    backoff: Duration,
) -> Result<bool, SessionError> {
    let mut attempt = 0;
    loop {
        attempt += 1;
        let result = async {
            let credential = provider.force_refresh_token(identity).await?;
            let check = backend.check_role(&identity.email, &credential).await?;
            Ok::<_, SessionError>(check.is_admin)
        }
        .await;

        match result {
            Ok(is_admin) => return Ok(is_admin),
            Err(e) if attempt < attempts => {
                warn!(
                    "Validation attempt {attempt}/{attempts} failed for {}: {e}",
                    identity.email
                );
                time::sleep(backoff).await;
            }
            Err(e) => return Err(e),
        }
    }
}
