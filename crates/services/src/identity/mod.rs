//! Identity provider boundary
//!
//! Trait and domain types for the external identity service, plus the
//! explicit event channel that replaces SDK-style change listeners.

pub mod events;
pub mod ports;

pub use events::{IdentityEvent, IdentityEvents, IdentitySubscription};
pub use ports::*;
