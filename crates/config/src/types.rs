use serde::Deserialize;
use std::env;

#[derive(Debug, Clone, Deserialize)]
pub struct ClientConfig {
    pub authz: AuthzConfig,
    #[serde(default)]
    pub verification: VerificationConfig,
    #[serde(default)]
    pub session: SessionConfig,
}

impl ClientConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, String> {
        Ok(Self {
            authz: AuthzConfig::from_env()?,
            verification: VerificationConfig::from_env()?,
            session: SessionConfig::from_env()?,
        })
    }
}

/// Authorization backend configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AuthzConfig {
    /// Base URL of the authorization backend (e.g. "http://localhost:8000")
    pub base_url: String,
    #[serde(default = "default_authz_timeout")]
    pub timeout_seconds: u64,
}

impl AuthzConfig {
    /// Load from environment variables
    pub fn from_env() -> Result<Self, String> {
        Ok(Self {
            base_url: env::var("AUTHZ_BASE_URL").map_err(|_| "AUTHZ_BASE_URL not set")?,
            timeout_seconds: env::var("AUTHZ_TIMEOUT_SECONDS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or_else(default_authz_timeout),
        })
    }
}

/// Email-verification polling configuration
#[derive(Debug, Clone, Deserialize)]
pub struct VerificationConfig {
    /// Seconds between reloads of the identity record while waiting for
    /// the verification flag to flip
    #[serde(default = "default_poll_interval")]
    pub poll_interval_seconds: u64,
    /// UI cool-down between resend-verification-email requests
    #[serde(default = "default_resend_cooldown")]
    pub resend_cooldown_seconds: u64,
}

impl VerificationConfig {
    /// Load from environment variables
    pub fn from_env() -> Result<Self, String> {
        Ok(Self {
            poll_interval_seconds: env::var("VERIFICATION_POLL_SECONDS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or_else(default_poll_interval),
            resend_cooldown_seconds: env::var("VERIFICATION_RESEND_COOLDOWN_SECONDS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or_else(default_resend_cooldown),
        })
    }
}

impl Default for VerificationConfig {
    fn default() -> Self {
        Self {
            poll_interval_seconds: default_poll_interval(),
            resend_cooldown_seconds: default_resend_cooldown(),
        }
    }
}

/// Session validation configuration
///
/// `check_attempts = 1` reproduces the observed behavior: any failure of the
/// authorization check signs the user out immediately. Raising it inserts a
/// bounded retry (with `check_backoff_ms` between attempts) before the
/// fail-closed sign-out, for deployments where transient network errors are
/// more common than revoked accounts.
#[derive(Debug, Clone, Deserialize)]
pub struct SessionConfig {
    #[serde(default = "default_check_attempts")]
    pub check_attempts: u32,
    #[serde(default = "default_check_backoff")]
    pub check_backoff_ms: u64,
}

impl SessionConfig {
    /// Load from environment variables
    pub fn from_env() -> Result<Self, String> {
        Ok(Self {
            check_attempts: env::var("SESSION_CHECK_ATTEMPTS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or_else(default_check_attempts),
            check_backoff_ms: env::var("SESSION_CHECK_BACKOFF_MS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or_else(default_check_backoff),
        })
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            check_attempts: default_check_attempts(),
            check_backoff_ms: default_check_backoff(),
        }
    }
}

fn default_authz_timeout() -> u64 {
    10
}

fn default_poll_interval() -> u64 {
    3
}

fn default_resend_cooldown() -> u64 {
    5
}

fn default_check_attempts() -> u32 {
    1
}

fn default_check_backoff() -> u64 {
    500
}
