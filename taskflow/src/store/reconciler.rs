//! Live-update merging and REST-backed actions over one [`Store`].

use taskflow_proto::notification::{Notification, NotificationId};
use taskflow_proto::task::{NewTask, SearchQuery, Task, TaskId, TaskPatch, TaskStatus};

use crate::api::{ApiClient, ApiError, InviteFailure, TaskFilter};

use super::{AppState, Rollback, Store, reconcile};

/// Keeps a [`Store`] consistent with the backend.
///
/// Pushed records are merged with [`apply_notification`](Self::apply_notification)
/// and [`apply_task_update`](Self::apply_task_update). User actions call the
/// REST API and fold the confirmed result into the same store; failures are
/// returned and recorded as the store's last error.
#[derive(Debug, Clone)]
pub struct Reconciler {
    store: Store,
    api: ApiClient,
}

impl Reconciler {
    /// Binds `store` to `api`.
    #[must_use]
    pub const fn new(store: Store, api: ApiClient) -> Self {
        Self { store, api }
    }

    /// The reconciled store.
    #[must_use]
    pub const fn store(&self) -> &Store {
        &self.store
    }

    /// The REST client actions go through.
    #[must_use]
    pub const fn api(&self) -> &ApiClient {
        &self.api
    }

    /// Merges a pushed notification. Returns `true` if the state changed.
    pub fn apply_notification(&self, notification: Notification) -> bool {
        let id = notification.id.clone();
        let changed = self.store.apply_notification(notification);
        tracing::debug!(notification = %id, changed, "notification applied");
        changed
    }

    /// Merges a pushed task. Returns `true` if the state changed.
    pub fn apply_task_update(&self, task: Task) -> bool {
        let id = task.id.clone();
        let changed = self.store.apply_task_update(task);
        tracing::debug!(task = %id, changed, "task update applied");
        changed
    }

    /// Marks one notification read, optimistically.
    ///
    /// The flag flips locally before the request is sent. If the backend
    /// rejects it, only this notification is reverted, and only if no push
    /// or refresh has reported it read in the meantime.
    ///
    /// # Errors
    ///
    /// Returns the backend's error after reverting.
    pub async fn mark_read(&self, id: &NotificationId) -> Result<(), ApiError> {
        let target = id.clone();
        let confirmed = self
            .store
            .optimistic(
                "mark_read",
                move |state| {
                    if !reconcile::mark_read(&mut state.notifications, &target) {
                        return None;
                    }
                    state.pending_reads.insert(target.clone());
                    let undo: Rollback = Box::new(move |state: &mut AppState| {
                        reconcile::revert_read(
                            &mut state.notifications,
                            &mut state.pending_reads,
                            &[target],
                        );
                    });
                    Some(undo)
                },
                self.api.mark_notification_read(id),
            )
            .await?;
        self.store.update(|s| {
            s.pending_reads.remove(id);
            false
        });
        self.store.apply_notification(confirmed);
        Ok(())
    }

    /// Marks every notification read, optimistically.
    ///
    /// On rejection the notifications this call flipped are reverted,
    /// except those the server has reported read since. Notifications that
    /// arrived in the meantime are untouched.
    ///
    /// # Errors
    ///
    /// Returns the backend's error after reverting.
    pub async fn mark_all_read(&self) -> Result<(), ApiError> {
        let mut settled = Vec::new();
        self.store
            .optimistic(
                "mark_all_read",
                |state| {
                    let flipped = reconcile::mark_all_read(&mut state.notifications);
                    if flipped.is_empty() {
                        return None;
                    }
                    state.pending_reads.extend(flipped.iter().cloned());
                    settled.clone_from(&flipped);
                    let undo: Rollback = Box::new(move |state: &mut AppState| {
                        reconcile::revert_read(
                            &mut state.notifications,
                            &mut state.pending_reads,
                            &flipped,
                        );
                    });
                    Some(undo)
                },
                self.api.mark_all_notifications_read(),
            )
            .await?;
        self.store.update(|s| {
            for id in &settled {
                s.pending_reads.remove(id);
            }
            false
        });
        Ok(())
    }

    /// Changes a task's status, optimistically.
    ///
    /// Every cached copy shows the new status right away. On rejection the
    /// copies still showing the optimistic record are restored; copies a
    /// push replaced in the meantime keep the pushed record.
    ///
    /// # Errors
    ///
    /// Returns the backend's error after reverting.
    pub async fn set_status(&self, id: &TaskId, status: TaskStatus) -> Result<Task, ApiError> {
        let target = id.clone();
        let patch = TaskPatch {
            status: Some(status),
            ..TaskPatch::default()
        };
        let confirmed = self
            .store
            .optimistic(
                "set_status",
                move |state| {
                    let previous = state.task(&target)?.clone();
                    let mut updated = previous.clone();
                    updated.status = status;
                    updated.dedup_collaborators();
                    if !reconcile::apply_task_update(&mut state.tasks, updated.clone()) {
                        return None;
                    }
                    let undo: Rollback = Box::new(move |state: &mut AppState| {
                        reconcile::revert_task(&mut state.tasks, &updated, &previous);
                    });
                    Some(undo)
                },
                self.api.update_task(id, &patch),
            )
            .await?;
        self.store.apply_task_update(confirmed.clone());
        Ok(confirmed)
    }

    /// Replaces the full task list.
    ///
    /// # Errors
    ///
    /// Returns the backend's error.
    pub async fn refresh_tasks(&self) -> Result<usize, ApiError> {
        let tasks = self.surface(self.api.list_tasks().await)?;
        let count = tasks.len();
        self.store.update(|s| replace(&mut s.tasks.all, tasks));
        Ok(count)
    }

    /// Replaces one filtered view.
    ///
    /// # Errors
    ///
    /// Returns the backend's error.
    pub async fn refresh_filtered(&self, filter: TaskFilter) -> Result<usize, ApiError> {
        let tasks = self.surface(self.api.filtered_tasks(filter).await)?;
        let count = tasks.len();
        self.store.update(|s| {
            let view = match filter {
                TaskFilter::Created => &mut s.tasks.created,
                TaskFilter::Assigned => &mut s.tasks.assigned,
                TaskFilter::Overdue => &mut s.tasks.overdue,
            };
            replace(view, tasks)
        });
        Ok(count)
    }

    /// Runs a search and stores the results.
    ///
    /// # Errors
    ///
    /// Returns the backend's error.
    pub async fn search(&self, query: &SearchQuery) -> Result<Vec<Task>, ApiError> {
        let tasks = self.surface(self.api.search_tasks(query).await)?;
        let stored = tasks.clone();
        self.store
            .update(|s| replace(&mut s.tasks.search_results, stored));
        Ok(tasks)
    }

    /// Fetches one task and makes it the current task.
    ///
    /// # Errors
    ///
    /// Returns the backend's error.
    pub async fn load_task(&self, id: &TaskId) -> Result<Task, ApiError> {
        let task = self.surface(self.api.get_task(id).await)?;
        let current = task.clone();
        self.store.update(|s| {
            let changed = s.tasks.current.as_ref() != Some(&current);
            s.tasks.current = Some(current);
            changed
        });
        Ok(task)
    }

    /// Creates a task and adds it to the full and created lists.
    ///
    /// # Errors
    ///
    /// Returns the backend's error, or a validation error before sending.
    pub async fn create_task(&self, task: &NewTask) -> Result<Task, ApiError> {
        let created = self.surface(self.api.create_task(task).await)?;
        self.store
            .update(|s| reconcile::insert_created(&mut s.tasks, created.clone()));
        Ok(created)
    }

    /// Updates a task and replaces every cached copy.
    ///
    /// # Errors
    ///
    /// Returns the backend's error, or a validation error before sending.
    pub async fn update_task(&self, id: &TaskId, patch: &TaskPatch) -> Result<Task, ApiError> {
        let updated = self.surface(self.api.update_task(id, patch).await)?;
        self.store.apply_task_update(updated.clone());
        Ok(updated)
    }

    /// Deletes a task and removes it from every view.
    ///
    /// # Errors
    ///
    /// Returns the backend's error.
    pub async fn delete_task(&self, id: &TaskId) -> Result<(), ApiError> {
        self.surface(self.api.delete_task(id).await)?;
        self.store.update(|s| reconcile::remove_task(&mut s.tasks, id));
        Ok(())
    }

    /// Invites the account registered under `email` to a task.
    ///
    /// An email already among the cached task's collaborators is refused
    /// without a request.
    ///
    /// # Errors
    ///
    /// Returns [`InviteFailure`] describing why the invite failed.
    pub async fn invite(&self, task_id: &TaskId, email: &str) -> Result<Task, InviteFailure> {
        let email = email.trim();
        let known = self.store.read(|s| {
            s.task(task_id).is_some_and(|t| {
                t.collaborators
                    .iter()
                    .any(|c| c.email.eq_ignore_ascii_case(email))
            })
        });
        if known {
            let failure = InviteFailure::AlreadyCollaborator(email.to_string());
            self.store.set_error(failure.to_string());
            return Err(failure);
        }

        match self.api.invite_collaborator(task_id, email).await {
            Ok(task) => {
                self.store.apply_task_update(task.clone());
                Ok(task)
            }
            Err(failure) => {
                self.store.set_error(failure.to_string());
                Err(failure)
            }
        }
    }

    /// Replaces the notification list, keeping locally read flags.
    ///
    /// # Errors
    ///
    /// Returns the backend's error.
    pub async fn refresh_notifications(&self) -> Result<usize, ApiError> {
        let fetched = self.surface(self.api.list_notifications().await)?;
        let count = fetched.len();
        self.store.update(|s| {
            reconcile::settle_reads(&mut s.pending_reads, &fetched);
            reconcile::replace_notifications(&mut s.notifications, fetched)
        });
        Ok(count)
    }

    /// The backend's unread count. The cached count stays derived from the
    /// cached list.
    ///
    /// # Errors
    ///
    /// Returns the backend's error.
    pub async fn remote_unread_count(&self) -> Result<usize, ApiError> {
        self.surface(self.api.unread_count().await)
    }

    fn surface<T>(&self, result: Result<T, ApiError>) -> Result<T, ApiError> {
        result.inspect_err(|e| {
            tracing::warn!(error = %e, "action failed");
            self.store.set_error(e.to_string());
        })
    }
}

fn replace(view: &mut Vec<Task>, mut tasks: Vec<Task>) -> bool {
    for task in &mut tasks {
        task.dedup_collaborators();
    }
    if *view == tasks {
        return false;
    }
    *view = tasks;
    true
}
