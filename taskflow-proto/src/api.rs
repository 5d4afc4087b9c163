//! Request and response bodies of the REST collaborator.

use serde::{Deserialize, Serialize};

use crate::task::TaskId;
use crate::user::{Role, User};

/// Body of `POST /auth/login`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoginRequest {
    /// Account email.
    pub email: String,
    /// Account password.
    pub password: String,
}

/// Body of `POST /auth/register`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterRequest {
    /// Desired display name.
    pub username: String,
    /// Account email.
    pub email: String,
    /// Account password.
    pub password: String,
}

/// Response of `POST /auth/login` and `POST /auth/register`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthResponse {
    /// Bearer token for subsequent requests and the realtime channel.
    pub token: String,
    /// The signed-in account.
    pub user: User,
    /// Backend success flag.
    #[serde(default = "default_true")]
    pub success: bool,
}

/// Response of `GET /auth/me`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MeResponse {
    /// The account behind the presented token.
    pub user: User,
    /// Backend success flag.
    #[serde(default = "default_true")]
    pub success: bool,
}

/// Response of the admin role and permission endpoints.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserEnvelope {
    /// The updated account.
    pub user: User,
}

/// Body of `POST /tasks/invite`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InviteRequest {
    /// Task to share.
    pub task_id: TaskId,
    /// Email of the account to invite.
    pub email: String,
}

/// Body of `PUT /admin/users/:id/role`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleUpdate {
    /// New role.
    pub role: Role,
}

/// Body of `PUT /admin/users/:id/permissions`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionsUpdate {
    /// Complete replacement permission list.
    pub permissions: Vec<String>,
}

/// Error body returned with any non-2xx status.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ErrorBody {
    /// Human-readable reason.
    #[serde(default)]
    pub message: String,
}

const fn default_true() -> bool {
    true
}
