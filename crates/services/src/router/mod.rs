//! Protected-view routing
//!
//! Pure function of the published session and verification state; rendering
//! code owns nothing and decides nothing beyond this mapping.

use crate::session::SessionState;
use crate::verification::VerificationStatus;

/// The screen the application should render
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Screen {
    /// Provider state still being determined
    Loading,
    /// Redirect to the sign-in surface
    SignIn,
    /// Verification-prompt view; no protected content
    VerifyEmail,
    /// Protected content; `admin` further gates admin-only subviews
    Dashboard { admin: bool },
}

/// Map `(SessionState, VerificationStatus)` to a screen.
///
/// `Authenticated` with `NotApplicable` is the settling window between the
/// two channel updates and renders as loading rather than leaking a stale
/// prompt.
pub fn route(state: &SessionState, verification: VerificationStatus) -> Screen {
    match state {
        SessionState::Unknown => Screen::Loading,
        SessionState::Unauthenticated => Screen::SignIn,
        SessionState::Authenticated { is_authorized, .. } => match verification {
            VerificationStatus::Pending => Screen::VerifyEmail,
            VerificationStatus::Confirmed => Screen::Dashboard {
                admin: *is_authorized,
            },
            VerificationStatus::NotApplicable => Screen::Loading,
        },
    }
}
