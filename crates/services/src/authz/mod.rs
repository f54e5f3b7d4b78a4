//! Authorization backend boundary
//!
//! The single HTTP check the session core relies on to confirm that an
//! identity is still valid server-side and whether it is an admin.

pub mod client;
pub mod ports;

pub use client::AuthorizationClient;
pub use ports::*;
