pub mod authz;
pub mod identity;
pub mod role;
pub mod router;
pub mod session;
pub mod verification;

pub use authz::{AuthorizationBackend, AuthorizationClient};
pub use identity::{Identity, IdentityEvent, IdentityEvents, IdentityProvider};
pub use role::RoleResolver;
pub use router::{route, Screen};
pub use session::{SessionHandle, SessionMonitor, SessionState};
pub use verification::{resend_verification, ResendCooldown, VerificationGate, VerificationStatus};
