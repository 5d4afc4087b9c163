//! Typed client for the task backend's REST API.
//!
//! Every request carries the vault's credential as a bearer token. Any
//! HTTP 401 clears the vault, which in turn tears down the realtime channel.

mod admin;
mod auth;
mod error;
mod notifications;
mod tasks;

use std::sync::Arc;
use std::time::Duration;

use reqwest::{Method, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use url::Url;

use taskflow_proto::api::ErrorBody;

use crate::credentials::CredentialVault;

pub use error::{ApiError, InviteFailure};
pub use tasks::TaskFilter;

/// REST client bound to one backend and one credential vault.
#[derive(Clone)]
pub struct ApiClient {
    http: reqwest::Client,
    base: Url,
    vault: Arc<CredentialVault>,
}

impl ApiClient {
    /// Creates a client for `base_url` (including any `/api` prefix).
    ///
    /// # Errors
    ///
    /// Returns [`ApiError::InvalidUrl`] for an unparsable base URL and
    /// [`ApiError::Http`] if the HTTP client cannot be built.
    pub fn new(
        base_url: &str,
        timeout: Duration,
        vault: Arc<CredentialVault>,
    ) -> Result<Self, ApiError> {
        let mut base =
            Url::parse(base_url).map_err(|e| ApiError::InvalidUrl(format!("{base_url}: {e}")))?;
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { http, base, vault })
    }

    /// Base URL requests are resolved against.
    #[must_use]
    pub const fn base_url(&self) -> &Url {
        &self.base
    }

    /// The vault supplying the bearer token.
    #[must_use]
    pub const fn vault(&self) -> &Arc<CredentialVault> {
        &self.vault
    }

    fn request(&self, method: Method, path: &str) -> Result<RequestBuilder, ApiError> {
        let url = self
            .base
            .join(path.trim_start_matches('/'))
            .map_err(|e| ApiError::InvalidUrl(format!("{path}: {e}")))?;
        let mut request = self.http.request(method, url);
        if let Some(credential) = self.vault.credential() {
            request = request.bearer_auth(credential.expose());
        }
        Ok(request)
    }

    /// Sends `request` and decodes a JSON body.
    async fn fetch<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T, ApiError> {
        let response = self.send(request).await?;
        let body = response.bytes().await?;
        serde_json::from_slice(&body).map_err(|e| ApiError::Decode(e.to_string()))
    }

    /// Sends `request` and ignores the body.
    async fn execute(&self, request: RequestBuilder) -> Result<(), ApiError> {
        self.send(request).await.map(drop)
    }

    async fn send(&self, request: RequestBuilder) -> Result<Response, ApiError> {
        let response = request.send().await.map_err(|e| {
            tracing::warn!(err = %e, "request failed");
            ApiError::Http(e)
        })?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let url = response.url().clone();
        let body = response.bytes().await.unwrap_or_default();
        let message = serde_json::from_slice::<ErrorBody>(&body)
            .ok()
            .map(|b| b.message)
            .filter(|m| !m.is_empty())
            .unwrap_or_else(|| {
                status
                    .canonical_reason()
                    .unwrap_or("request failed")
                    .to_string()
            });
        tracing::debug!(%url, status = status.as_u16(), %message, "backend returned an error");
        Err(self.classify(status, message))
    }

    fn classify(&self, status: StatusCode, message: String) -> ApiError {
        match status {
            StatusCode::UNAUTHORIZED => {
                if self.vault.clear() {
                    tracing::warn!("backend rejected the credential, signed out");
                }
                ApiError::Unauthorized(message)
            }
            StatusCode::FORBIDDEN => ApiError::Forbidden(message),
            StatusCode::NOT_FOUND => ApiError::NotFound(message),
            StatusCode::CONFLICT => ApiError::Conflict(message),
            _ => ApiError::Status {
                status: status.as_u16(),
                message,
            },
        }
    }
}

impl std::fmt::Debug for ApiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiClient")
            .field("base", &self.base.as_str())
            .finish_non_exhaustive()
    }
}

/// Rejects anything that does not look like `local@domain.tld`.
pub(crate) fn validate_email(email: &str) -> Result<(), ApiError> {
    let invalid = || ApiError::Validation("Please enter a valid email address".to_string());
    let email = email.trim();
    if email.is_empty() {
        return Err(ApiError::Validation("Email is required".to_string()));
    }
    if email.chars().any(char::is_whitespace) {
        return Err(invalid());
    }
    let (local, domain) = email.split_once('@').ok_or_else(invalid)?;
    if local.is_empty() || domain.contains('@') {
        return Err(invalid());
    }
    match domain.rsplit_once('.') {
        Some((host, tld)) if !host.is_empty() && !tld.is_empty() => Ok(()),
        _ => Err(invalid()),
    }
}
