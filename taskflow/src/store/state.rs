//! Client-side cache of tasks and notifications.

use std::collections::HashSet;

use taskflow_proto::notification::{Notification, NotificationId};
use taskflow_proto::task::{Task, TaskId};

/// Task lists the client keeps, one per backend query.
///
/// A task may appear in several views at once; a live update replaces
/// every copy.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaskViews {
    /// Every task visible to the user.
    pub all: Vec<Task>,
    /// Tasks the user created.
    pub created: Vec<Task>,
    /// Tasks assigned to the user.
    pub assigned: Vec<Task>,
    /// Tasks past their due date.
    pub overdue: Vec<Task>,
    /// Result of the last search.
    pub search_results: Vec<Task>,
    /// Task open in a detail view.
    pub current: Option<Task>,
}

impl TaskViews {
    /// Mutable access to every list view.
    pub(crate) fn lists_mut(&mut self) -> [&mut Vec<Task>; 5] {
        [
            &mut self.all,
            &mut self.created,
            &mut self.assigned,
            &mut self.overdue,
            &mut self.search_results,
        ]
    }

    /// First copy of task `id` in any view.
    #[must_use]
    pub fn find(&self, id: &TaskId) -> Option<&Task> {
        [
            &self.all,
            &self.created,
            &self.assigned,
            &self.overdue,
            &self.search_results,
        ]
        .into_iter()
        .flat_map(|list| list.iter())
        .chain(self.current.iter())
        .find(|t| &t.id == id)
    }
}

/// Everything the client caches.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AppState {
    /// Task views.
    pub tasks: TaskViews,
    /// Notifications, newest first, unique by id.
    pub notifications: Vec<Notification>,
    /// Notifications marked read locally whose request is still pending
    /// and which the server has not yet reported read.
    pub pending_reads: HashSet<NotificationId>,
    /// Last failed action, for display.
    pub last_error: Option<String>,
}

impl AppState {
    /// Number of unread notifications in the cache.
    ///
    /// Derived on every call so it can never drift from the list.
    #[must_use]
    pub fn unread_count(&self) -> usize {
        self.notifications.iter().filter(|n| !n.read).count()
    }

    /// Cached notification `id`.
    #[must_use]
    pub fn notification(&self, id: &NotificationId) -> Option<&Notification> {
        self.notifications.iter().find(|n| &n.id == id)
    }

    /// Cached copy of task `id`.
    #[must_use]
    pub fn task(&self, id: &TaskId) -> Option<&Task> {
        self.tasks.find(id)
    }
}
