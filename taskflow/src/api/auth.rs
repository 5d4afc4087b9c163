use reqwest::Method;

use taskflow_proto::api::{AuthResponse, LoginRequest, MeResponse, RegisterRequest};
use taskflow_proto::user::User;

use super::{ApiClient, ApiError, validate_email};

impl ApiClient {
    /// `POST /auth/login`.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError::Validation`] for a malformed email or empty
    /// password, or the backend's error.
    pub async fn login(&self, email: &str, password: &str) -> Result<AuthResponse, ApiError> {
        validate_email(email)?;
        if password.is_empty() {
            return Err(ApiError::Validation("Password is required".to_string()));
        }
        let body = LoginRequest {
            email: email.trim().to_string(),
            password: password.to_string(),
        };
        self.fetch(self.request(Method::POST, "auth/login")?.json(&body))
            .await
    }

    /// `POST /auth/register`.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError::Validation`] for an empty username, a malformed
    /// email or an empty password, or the backend's error.
    pub async fn register(
        &self,
        username: &str,
        email: &str,
        password: &str,
    ) -> Result<AuthResponse, ApiError> {
        if username.trim().is_empty() {
            return Err(ApiError::Validation("Username is required".to_string()));
        }
        validate_email(email)?;
        if password.is_empty() {
            return Err(ApiError::Validation("Password is required".to_string()));
        }
        let body = RegisterRequest {
            username: username.trim().to_string(),
            email: email.trim().to_string(),
            password: password.to_string(),
        };
        self.fetch(self.request(Method::POST, "auth/register")?.json(&body))
            .await
    }

    /// `POST /auth/logout`.
    ///
    /// # Errors
    ///
    /// Returns the backend's error.
    pub async fn logout(&self) -> Result<(), ApiError> {
        self.execute(self.request(Method::POST, "auth/logout")?)
            .await
    }

    /// `GET /auth/me`: the account behind the held credential.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError::Unauthorized`] if the credential is no longer
    /// valid, or the backend's error.
    pub async fn me(&self) -> Result<User, ApiError> {
        let response: MeResponse = self.fetch(self.request(Method::GET, "auth/me")?).await?;
        Ok(response.user)
    }
}
