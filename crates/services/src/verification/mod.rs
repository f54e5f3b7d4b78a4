//! Email-verification gate
//!
//! The provider offers no push notification for verification, so the gate
//! polls: while an authenticated identity is unverified it reloads the
//! identity record on a fixed interval and fires a one-shot notice the
//! first time the flag is observed `true`. The poll task is keyed by the
//! session epoch and cancelled on sign-out, identity switch and shutdown;
//! a timer that keeps firing after teardown is a defect.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{self, Instant};
use tracing::{debug, warn};

use crate::identity::{Identity, IdentityError, IdentityProvider};

/// Published verification state of the current session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerificationStatus {
    /// No authenticated identity
    NotApplicable,
    /// Authenticated but the verification flag has not been observed yet
    Pending,
    /// Verification observed; protected content may be shown
    Confirmed,
}

/// One-shot notice that polling observed `verified == true`.
///
/// Carries the freshly reloaded identity so the session can republish
/// without a stale snapshot, and the epoch of the sign-in that started the
/// poll so late notices for a superseded identity are dropped.
#[derive(Debug, Clone)]
pub struct VerifiedNotice {
    pub epoch: u64,
    pub identity: Identity,
}

/// Poll-driven gate between "signed in" and "allowed to see protected content"
pub struct VerificationGate {
    provider: Arc<dyn IdentityProvider>,
    poll_interval: Duration,
    status_tx: watch::Sender<VerificationStatus>,
    poll: Option<JoinHandle<()>>,
}

impl VerificationGate {
    pub fn new(provider: Arc<dyn IdentityProvider>, poll_interval: Duration) -> Self {
        let (status_tx, _) = watch::channel(VerificationStatus::NotApplicable);
        Self {
            provider,
            poll_interval,
            status_tx,
            poll: None,
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<VerificationStatus> {
        self.status_tx.subscribe()
    }

    pub fn status(&self) -> VerificationStatus {
        *self.status_tx.borrow()
    }

    /// React to a validated sign-in.
    ///
    /// A verified identity confirms immediately and starts no timer. An
    /// unverified one flips to `Pending` and spawns the poll task, which
    /// sends at most one [`VerifiedNotice`] on `notices` and exits.
    pub fn observe_signed_in(
        &mut self,
        epoch: u64,
        identity: &Identity,
        notices: mpsc::Sender<VerifiedNotice>,
    ) {
        self.cancel_poll();

        if identity.verified {
            self.status_tx.send_replace(VerificationStatus::Confirmed);
            return;
        }

        self.status_tx.send_replace(VerificationStatus::Pending);

        let provider = self.provider.clone();
        let interval = self.poll_interval;
        let mut snapshot = identity.clone();
        self.poll = Some(tokio::spawn(async move {
            loop {
                time::sleep(interval).await;
                match provider.reload(&snapshot).await {
                    // Each tick inspects the freshest record, never the
                    // sign-in-time snapshot
                    Ok(fresh) if fresh.verified => {
                        let _ = notices.send(VerifiedNotice {
                            epoch,
                            identity: fresh,
                        })
                        .await;
                        return;
                    }
                    Ok(fresh) => snapshot = fresh,
                    // Transient reload failures must not end the wait
                    Err(e) => warn!("Verification poll reload failed: {e}"),
                }
            }
        }));
    }

    /// Accept a current-epoch notice: one-shot edge to `Confirmed`
    pub fn confirm(&mut self) {
        // The poll task exits right after sending; just drop the handle
        self.poll = None;
        self.status_tx.send_replace(VerificationStatus::Confirmed);
    }

    /// Sign-out / identity switch / shutdown: stop polling, clear status
    pub fn reset(&mut self) {
        self.cancel_poll();
        self.status_tx.send_replace(VerificationStatus::NotApplicable);
    }

    fn cancel_poll(&mut self) {
        if let Some(poll) = self.poll.take() {
            debug!("Cancelling verification poll task");
            poll.abort();
        }
    }
}

impl Drop for VerificationGate {
    fn drop(&mut self) {
        self.cancel_poll();
    }
}

/// UI-layer cool-down for the resend-verification-email action.
///
/// Deliberately outside the gate's state machine: resending never alters
/// the pending/confirmed transition, it only re-sends the message the user
/// is waiting on.
pub struct ResendCooldown {
    period: Duration,
    last: Mutex<Option<Instant>>,
}

impl ResendCooldown {
    pub fn new(period: Duration) -> Self {
        Self {
            period,
            last: Mutex::new(None),
        }
    }

    /// Claim a send slot. Returns `false` while the cool-down is running.
    pub fn try_begin(&self) -> bool {
        let mut last = self.last.lock().unwrap_or_else(|e| e.into_inner());
        let now = Instant::now();
        match *last {
            Some(at) if now.duration_since(at) < self.period => false,
            _ => {
                *last = Some(now);
                true
            }
        }
    }
}

/// Re-send the verification email, honoring the UI cool-down.
///
/// Returns `Ok(false)` when throttled. Provider failures surface to the
/// caller as a notification concern; they never touch session state.
pub async fn resend_verification(
    provider: &dyn IdentityProvider,
    identity: &Identity,
    cooldown: &ResendCooldown,
) -> Result<bool, IdentityError> {
    if !cooldown.try_begin() {
        debug!("Resend verification throttled for {}", identity.email);
        return Ok(false);
    }
    provider.send_verification_email(identity).await?;
    Ok(true)
}
