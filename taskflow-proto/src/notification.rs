//! Notification records pushed to users when tasks change hands or state.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::task::TaskId;

/// Server-issued notification identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NotificationId(String);

impl NotificationId {
    /// Wraps a server-issued identifier.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NotificationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// What triggered a notification.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    /// A task was assigned to the user.
    TaskAssigned,
    /// A task the user follows was edited.
    TaskUpdated,
    /// A task the user follows was completed.
    TaskCompleted,
    /// A task passed its due date.
    TaskOverdue,
    /// Anything else the server wants to say.
    #[default]
    System,
}

impl fmt::Display for NotificationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TaskAssigned => write!(f, "task_assigned"),
            Self::TaskUpdated => write!(f, "task_updated"),
            Self::TaskCompleted => write!(f, "task_completed"),
            Self::TaskOverdue => write!(f, "task_overdue"),
            Self::System => write!(f, "system"),
        }
    }
}

/// A notification as cached by the client.
///
/// `read` only ever moves from `false` to `true`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    /// Stable server identifier.
    #[serde(rename = "_id")]
    pub id: NotificationId,
    /// Recipient user id.
    #[serde(default)]
    pub user_id: String,
    /// Human-readable text.
    #[serde(default)]
    pub message: String,
    /// Trigger category.
    #[serde(rename = "type", default)]
    pub kind: NotificationKind,
    /// Whether the user has seen it.
    #[serde(default)]
    pub read: bool,
    /// Task the notification is about, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub related_task_id: Option<TaskId>,
    /// Creation time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
}

/// Body of `GET /notifications/unread/count`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnreadCount {
    /// Number of unread notifications, as counted by the server.
    pub count: usize,
}
