//! Realtime channel message types.
//!
//! Every WebSocket text frame carries one JSON object
//! `{"event": <name>, "data": <payload>}`. The client sends `authenticate`;
//! the server answers `authenticated` and pushes `notification` and
//! `taskUpdate` events. Push payloads are kept as raw JSON here so the
//! receiving side can validate them before typing them.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Event name of the client's authentication request.
pub const AUTHENTICATE: &str = "authenticate";
/// Event name of the server's authentication acknowledgment.
pub const AUTHENTICATED: &str = "authenticated";
/// Event name of a pushed notification.
pub const NOTIFICATION: &str = "notification";
/// Event name of a pushed task update.
pub const TASK_UPDATE: &str = "taskUpdate";

/// Untyped frame envelope shared by both directions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    /// Event name.
    pub event: String,
    /// Event payload; `null` when absent.
    #[serde(default)]
    pub data: Value,
}

/// Messages originated by the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientEvent {
    /// Bind the channel to a session credential.
    Authenticate {
        /// Bearer token issued at sign-in.
        token: String,
    },
}

/// Payload of the `authenticated` acknowledgment.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthAck {
    /// Whether the credential was accepted.
    pub success: bool,
    /// Authenticated user id on success.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    /// Rejection reason on failure.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl AuthAck {
    /// Builds a success acknowledgment for `user_id`.
    pub fn accepted(user_id: impl Into<String>) -> Self {
        Self {
            success: true,
            user_id: Some(user_id.into()),
            error: None,
        }
    }

    /// Builds a failure acknowledgment with `reason`.
    pub fn rejected(reason: impl Into<String>) -> Self {
        Self {
            success: false,
            user_id: None,
            error: Some(reason.into()),
        }
    }
}

/// Messages originated by the server.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerEvent {
    /// Answer to [`ClientEvent::Authenticate`].
    Authenticated(AuthAck),
    /// Pushed notification (unvalidated payload).
    Notification(Value),
    /// Pushed task update (unvalidated payload).
    TaskUpdate(Value),
    /// Any event this client does not know about.
    Other {
        /// Event name as received.
        event: String,
        /// Raw payload.
        data: Value,
    },
}

impl ServerEvent {
    /// Returns the wire event name.
    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            Self::Authenticated(_) => AUTHENTICATED,
            Self::Notification(_) => NOTIFICATION,
            Self::TaskUpdate(_) => TASK_UPDATE,
            Self::Other { event, .. } => event,
        }
    }
}
