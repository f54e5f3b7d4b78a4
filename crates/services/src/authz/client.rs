use std::time::Duration;

use async_trait::async_trait;

use super::ports::{AuthorizationBackend, AuthzError, RoleCheck};
use crate::identity::Credential;

/// HTTP client for the authorization backend
pub struct AuthorizationClient {
    client: reqwest::Client,
    base_url: String,
}

impl AuthorizationClient {
    /// Create a new authorization backend client
    ///
    /// # Arguments
    /// * `base_url` - Base URL of the backend (e.g. "http://localhost:8000")
    /// * `timeout_seconds` - Request timeout in seconds
    pub fn new(base_url: String, timeout_seconds: u64) -> Result<Self, AuthzError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_seconds))
            .build()
            .map_err(|e| AuthzError::RequestFailed(format!("Failed to build HTTP client: {e}")))?;

        tracing::info!(base_url = %base_url, "Authorization backend client initialized");

        Ok(Self { client, base_url })
    }

    /// Check response status and extract error body if needed
    async fn check_response(response: reqwest::Response) -> Result<reqwest::Response, AuthzError> {
        let status = response.status();
        if status.is_success() {
            Ok(response)
        } else {
            let status_code = status.as_u16();
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Unable to read error body".to_string());
            Err(AuthzError::ApiError {
                status: status_code,
                body,
            })
        }
    }
}

#[async_trait]
impl AuthorizationBackend for AuthorizationClient {
    async fn check_role(
        &self,
        email: &str,
        credential: &Credential,
    ) -> Result<RoleCheck, AuthzError> {
        let url = format!("{}/admin/check", self.base_url);
        let response = self
            .client
            .get(&url)
            .query(&[("email", email)])
            .bearer_auth(&credential.0)
            .send()
            .await
            .map_err(|e| AuthzError::RequestFailed(e.to_string()))?;

        let response = Self::check_response(response).await?;
        response
            .json::<RoleCheck>()
            .await
            .map_err(|e| AuthzError::ParseError(e.to_string()))
    }
}
