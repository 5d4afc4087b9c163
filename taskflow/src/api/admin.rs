//! Account administration; the backend allows these for admins only.

use reqwest::Method;

use taskflow_proto::api::{PermissionsUpdate, RoleUpdate, UserEnvelope};
use taskflow_proto::user::{Role, User};

use super::{ApiClient, ApiError};

impl ApiClient {
    /// `GET /admin/users`.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError::Forbidden`] for non-admin accounts, or the
    /// backend's error.
    pub async fn list_users(&self) -> Result<Vec<User>, ApiError> {
        self.fetch(self.request(Method::GET, "admin/users")?).await
    }

    /// `PUT /admin/users/:id/role`.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError::Forbidden`] for non-admin accounts, or the
    /// backend's error.
    pub async fn set_user_role(&self, user_id: &str, role: Role) -> Result<User, ApiError> {
        let request = self
            .request(Method::PUT, &format!("admin/users/{user_id}/role"))?
            .json(&RoleUpdate { role });
        let body: UserEnvelope = self.fetch(request).await?;
        Ok(body.user)
    }

    /// `PUT /admin/users/:id/permissions`, replacing the whole list.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError::Forbidden`] for non-admin accounts, or the
    /// backend's error.
    pub async fn set_user_permissions(
        &self,
        user_id: &str,
        permissions: Vec<String>,
    ) -> Result<User, ApiError> {
        let request = self
            .request(Method::PUT, &format!("admin/users/{user_id}/permissions"))?
            .json(&PermissionsUpdate { permissions });
        let body: UserEnvelope = self.fetch(request).await?;
        Ok(body.user)
    }

    /// `DELETE /admin/users/:id`.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError::Forbidden`] for non-admin accounts, or the
    /// backend's error.
    pub async fn delete_user(&self, user_id: &str) -> Result<(), ApiError> {
        self.execute(self.request(Method::DELETE, &format!("admin/users/{user_id}"))?)
            .await
    }
}
