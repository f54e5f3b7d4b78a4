//! Unit tests for the session monitor run loop

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::time;

use crate::authz::{AuthorizationBackend, AuthzError, RoleCheck};
use crate::identity::{
    Credential, Identity, IdentityError, IdentityEvent, IdentityEvents, IdentityProvider,
};
use crate::role::RoleResolver;
use crate::session::{
    InMemoryLastUserStore, LastUserStore, SessionHandle, SessionMonitor, SessionState,
};
use crate::verification::VerificationStatus;
use config::{SessionConfig, VerificationConfig};

/// Provider stub: scripted reload flags, counted sign-outs, and a handle on
/// the event hub so `sign_out` emits `SignedOut` like a real provider
struct TestProvider {
    events: IdentityEvents,
    reload_flags: Mutex<VecDeque<bool>>,
    reload_calls: AtomicUsize,
    sign_out_calls: AtomicUsize,
    fail_refresh: std::sync::atomic::AtomicBool,
}

impl TestProvider {
    fn new(events: IdentityEvents, reload_flags: &[bool]) -> Self {
        Self {
            events,
            reload_flags: Mutex::new(reload_flags.iter().copied().collect()),
            reload_calls: AtomicUsize::new(0),
            sign_out_calls: AtomicUsize::new(0),
            fail_refresh: std::sync::atomic::AtomicBool::new(false),
        }
    }

    fn reload_calls(&self) -> usize {
        self.reload_calls.load(Ordering::SeqCst)
    }

    fn sign_out_calls(&self) -> usize {
        self.sign_out_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl IdentityProvider for TestProvider {
    async fn current_identity(&self) -> Option<Identity> {
        None
    }

    async fn force_refresh_token(&self, _identity: &Identity) -> Result<Credential, IdentityError> {
        if self.fail_refresh.load(Ordering::SeqCst) {
            return Err(IdentityError::Provider("token refresh failed".to_string()));
        }
        Ok(Credential("fresh-token".to_string()))
    }

    async fn reload(&self, identity: &Identity) -> Result<Identity, IdentityError> {
        self.reload_calls.fetch_add(1, Ordering::SeqCst);
        let mut flags = self.reload_flags.lock().unwrap();
        let verified = if flags.len() > 1 {
            flags.pop_front().unwrap()
        } else {
            flags.front().copied().unwrap_or(false)
        };
        Ok(Identity {
            verified,
            ..identity.clone()
        })
    }

    async fn sign_out(&self) -> Result<(), IdentityError> {
        self.sign_out_calls.fetch_add(1, Ordering::SeqCst);
        self.events.emit(IdentityEvent::SignedOut);
        Ok(())
    }

    async fn send_verification_email(&self, _identity: &Identity) -> Result<(), IdentityError> {
        Ok(())
    }
}

/// Backend stub: fixed admin list, per-email artificial latency, scripted
/// failure count
struct TestBackend {
    admins: Vec<String>,
    delays: Mutex<HashMap<String, Duration>>,
    failures_left: AtomicUsize,
    calls: AtomicUsize,
}

impl TestBackend {
    fn new(admins: &[&str]) -> Self {
        Self {
            admins: admins.iter().map(|s| s.to_string()).collect(),
            delays: Mutex::new(HashMap::new()),
            failures_left: AtomicUsize::new(0),
            calls: AtomicUsize::new(0),
        }
    }

    fn delay(&self, email: &str, delay: Duration) {
        self.delays.lock().unwrap().insert(email.to_string(), delay);
    }

    fn fail_next(&self, times: usize) {
        self.failures_left.store(times, Ordering::SeqCst);
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AuthorizationBackend for TestBackend {
    async fn check_role(
        &self,
        email: &str,
        _credential: &Credential,
    ) -> Result<RoleCheck, AuthzError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let delay = self.delays.lock().unwrap().get(email).copied();
        if let Some(delay) = delay {
            time::sleep(delay).await;
        }
        if self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(AuthzError::ApiError {
                status: 401,
                body: "token verification failed or user deleted".to_string(),
            });
        }
        Ok(RoleCheck {
            is_admin: self.admins.contains(&email.to_string()),
        })
    }
}

struct Harness {
    events: IdentityEvents,
    provider: Arc<TestProvider>,
    backend: Arc<TestBackend>,
    roles: Arc<RoleResolver>,
    last_user: Arc<InMemoryLastUserStore>,
    handle: SessionHandle,
}

impl Harness {
    fn start(admins: &[&str], reload_flags: &[bool]) -> Self {
        Self::start_with(admins, reload_flags, &SessionConfig::default())
    }

    fn start_with(admins: &[&str], reload_flags: &[bool], session: &SessionConfig) -> Self {
        let events = IdentityEvents::new();
        let provider = Arc::new(TestProvider::new(events.clone(), reload_flags));
        let backend = Arc::new(TestBackend::new(admins));
        let roles = Arc::new(RoleResolver::new(backend.clone()));
        let last_user = Arc::new(InMemoryLastUserStore::new());

        let monitor = SessionMonitor::new(
            provider.clone(),
            backend.clone(),
            roles.clone(),
            last_user.clone(),
            session,
            &VerificationConfig::default(),
        );
        let handle = monitor.spawn(events.subscribe());

        Self {
            events,
            provider,
            backend,
            roles,
            last_user,
            handle,
        }
    }

    fn sign_in(&self, email: &str, verified: bool) {
        self.events.emit(IdentityEvent::SignedIn(Identity {
            email: email.to_string(),
            verified,
            photo_url: None,
        }));
    }

    async fn wait_authenticated(&self) -> (Identity, bool) {
        let mut state = self.handle.state();
        let state = state
            .wait_for(|s| s.is_authenticated())
            .await
            .unwrap()
            .clone();
        match state {
            SessionState::Authenticated {
                identity,
                is_authorized,
            } => (identity, is_authorized),
            _ => unreachable!(),
        }
    }

    async fn wait_unauthenticated(&self) {
        let mut state = self.handle.state();
        state
            .wait_for(|s| *s == SessionState::Unauthenticated)
            .await
            .unwrap();
    }
}

#[tokio::test(start_paused = true)]
async fn test_verified_admin_sign_in_publishes_authenticated() {
    let harness = Harness::start(&["a@x.com"], &[true]);

    harness.sign_in("a@x.com", true);

    let (identity, is_authorized) = harness.wait_authenticated().await;
    assert_eq!(identity.email, "a@x.com");
    assert!(is_authorized);

    let mut verification = harness.handle.verification();
    verification
        .wait_for(|v| *v == VerificationStatus::Confirmed)
        .await
        .unwrap();

    // Already verified: no poll timer ever starts
    time::sleep(Duration::from_secs(10)).await;
    assert_eq!(harness.provider.reload_calls(), 0);

    assert_eq!(harness.last_user.last_user().as_deref(), Some("a@x.com"));
    assert_eq!(harness.roles.cached("a@x.com"), Some(true));
}

#[tokio::test(start_paused = true)]
async fn test_non_admin_sign_in_is_authenticated_but_not_authorized() {
    let harness = Harness::start(&["admin@x.com"], &[true]);

    harness.sign_in("user@x.com", true);

    let (_, is_authorized) = harness.wait_authenticated().await;
    assert!(!is_authorized);
    assert_eq!(harness.roles.cached("user@x.com"), Some(false));
}

#[tokio::test(start_paused = true)]
async fn test_check_failure_fails_closed_with_single_sign_out() {
    let harness = Harness::start(&["a@x.com"], &[true]);
    harness.backend.fail_next(usize::MAX);

    harness.sign_in("a@x.com", true);
    harness.wait_unauthenticated().await;

    assert_eq!(harness.provider.sign_out_calls(), 1);
    assert_eq!(harness.roles.cached("a@x.com"), None);
    assert_eq!(harness.last_user.last_user(), None);
    assert_eq!(
        harness.handle.verification_status(),
        VerificationStatus::NotApplicable
    );

    // The provider's own SignedOut event must not trigger another sign-out
    time::sleep(Duration::from_secs(5)).await;
    assert_eq!(harness.provider.sign_out_calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_refresh_failure_fails_closed() {
    let harness = Harness::start(&["a@x.com"], &[true]);
    harness.provider.fail_refresh.store(true, Ordering::SeqCst);

    harness.sign_in("a@x.com", true);
    harness.wait_unauthenticated().await;

    assert_eq!(harness.provider.sign_out_calls(), 1);
    // The check never ran: refresh is a precondition
    assert_eq!(harness.backend.calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_pending_validation_publishes_no_partial_state() {
    let harness = Harness::start(&["a@x.com"], &[true]);
    harness.backend.delay("a@x.com", Duration::from_secs(5));

    harness.sign_in("a@x.com", true);
    time::sleep(Duration::from_secs(1)).await;

    // Check still in flight: state must remain the initial variant
    assert_eq!(harness.handle.current_state(), SessionState::Unknown);

    let (identity, _) = harness.wait_authenticated().await;
    assert_eq!(identity.email, "a@x.com");
}

#[tokio::test(start_paused = true)]
async fn test_stale_check_result_never_overwrites_newer_identity() {
    let harness = Harness::start(&["a@x.com"], &[true]);
    harness.backend.delay("a@x.com", Duration::from_secs(5));

    harness.sign_in("a@x.com", true);
    time::sleep(Duration::from_millis(100)).await;

    // Identity switches while a's check is still in flight
    harness.sign_in("b@x.com", true);
    let (identity, is_authorized) = harness.wait_authenticated().await;
    assert_eq!(identity.email, "b@x.com");
    assert!(!is_authorized);

    // Give a's response time to arrive; it must be discarded
    time::sleep(Duration::from_secs(6)).await;
    match harness.handle.current_state() {
        SessionState::Authenticated { identity, .. } => assert_eq!(identity.email, "b@x.com"),
        other => panic!("expected authenticated b@x.com, got {other:?}"),
    }
    assert_eq!(harness.roles.cached("b@x.com"), Some(false));
    assert_eq!(harness.provider.sign_out_calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_signed_out_event_discards_all_session_state() {
    let harness = Harness::start(&["a@x.com"], &[true]);

    harness.sign_in("a@x.com", true);
    harness.wait_authenticated().await;

    harness.events.emit(IdentityEvent::SignedOut);
    harness.wait_unauthenticated().await;

    assert_eq!(harness.roles.cached("a@x.com"), None);
    assert_eq!(harness.last_user.last_user(), None);
    assert_eq!(
        harness.handle.verification_status(),
        VerificationStatus::NotApplicable
    );
}

#[tokio::test(start_paused = true)]
async fn test_unverified_sign_in_polls_until_confirmed_once() {
    // First reload still unverified, second observes the flag
    let harness = Harness::start(&["a@x.com"], &[false, true]);

    harness.sign_in("a@x.com", false);

    let (identity, _) = harness.wait_authenticated().await;
    assert!(!identity.verified);
    assert_eq!(
        harness.handle.verification_status(),
        VerificationStatus::Pending
    );

    let mut verification = harness.handle.verification();
    verification
        .wait_for(|v| *v == VerificationStatus::Confirmed)
        .await
        .unwrap();

    // The republished state carries the fresh verified snapshot
    let mut state = harness.handle.state();
    let state = state
        .wait_for(|s| matches!(s, SessionState::Authenticated { identity, .. } if identity.verified))
        .await
        .unwrap()
        .clone();
    match state {
        SessionState::Authenticated { is_authorized, .. } => assert!(is_authorized),
        _ => unreachable!(),
    }

    // Edge-triggered: exactly the two reloads, then the timer is gone
    assert_eq!(harness.provider.reload_calls(), 2);
    time::sleep(Duration::from_secs(30)).await;
    assert_eq!(harness.provider.reload_calls(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_sign_out_during_pending_verification_stops_polling() {
    let harness = Harness::start(&["a@x.com"], &[false]);

    harness.sign_in("a@x.com", false);
    harness.wait_authenticated().await;

    time::sleep(Duration::from_secs(7)).await;
    let polled = harness.provider.reload_calls();
    assert!(polled >= 2);

    harness.events.emit(IdentityEvent::SignedOut);
    harness.wait_unauthenticated().await;

    time::sleep(Duration::from_secs(30)).await;
    assert_eq!(harness.provider.reload_calls(), polled);
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_cancels_poll_and_in_flight_work() {
    let harness = Harness::start(&["a@x.com"], &[false]);

    harness.sign_in("a@x.com", false);
    harness.wait_authenticated().await;
    time::sleep(Duration::from_secs(4)).await;
    let polled = harness.provider.reload_calls();

    harness.handle.shutdown().await;

    time::sleep(Duration::from_secs(30)).await;
    assert_eq!(harness.provider.reload_calls(), polled);
}

#[tokio::test(start_paused = true)]
async fn test_bounded_retry_recovers_from_transient_failures() {
    let session = SessionConfig {
        check_attempts: 3,
        check_backoff_ms: 100,
    };
    let harness = Harness::start_with(&["a@x.com"], &[true], &session);
    harness.backend.fail_next(2);

    harness.sign_in("a@x.com", true);

    let (identity, is_authorized) = harness.wait_authenticated().await;
    assert_eq!(identity.email, "a@x.com");
    assert!(is_authorized);
    assert_eq!(harness.backend.calls(), 3);
    assert_eq!(harness.provider.sign_out_calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_bounded_retry_still_fails_closed_when_exhausted() {
    let session = SessionConfig {
        check_attempts: 2,
        check_backoff_ms: 100,
    };
    let harness = Harness::start_with(&["a@x.com"], &[true], &session);
    harness.backend.fail_next(usize::MAX);

    harness.sign_in("a@x.com", true);
    harness.wait_unauthenticated().await;

    assert_eq!(harness.backend.calls(), 2);
    assert_eq!(harness.provider.sign_out_calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_relogin_as_different_account_revalidates_from_scratch() {
    let harness = Harness::start(&["a@x.com"], &[true]);

    harness.sign_in("a@x.com", true);
    let (_, is_authorized) = harness.wait_authenticated().await;
    assert!(is_authorized);

    harness.events.emit(IdentityEvent::SignedOut);
    harness.wait_unauthenticated().await;

    harness.sign_in("b@x.com", true);
    let mut state = harness.handle.state();
    let state = state
        .wait_for(|s| s.is_authenticated())
        .await
        .unwrap()
        .clone();
    match state {
        SessionState::Authenticated {
            identity,
            is_authorized,
        } => {
            assert_eq!(identity.email, "b@x.com");
            // a's admin flag must not carry over
            assert!(!is_authorized);
        }
        _ => unreachable!(),
    }
    assert_eq!(harness.backend.calls(), 2);
}
