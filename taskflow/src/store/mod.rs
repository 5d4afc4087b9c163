//! Observable client state and the reconciler that keeps it current.
//!
//! [`Store`] publishes [`AppState`] snapshots over a `watch` channel and
//! notifies subscribers only when a mutation actually changed something.
//! [`Reconciler`] applies live updates and runs the REST-backed actions,
//! including the optimistic read-state mutations.

pub mod reconcile;
mod reconciler;
mod state;

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use tokio::sync::watch;

use taskflow_proto::notification::Notification;
use taskflow_proto::task::Task;

pub use reconciler::Reconciler;
pub use state::{AppState, TaskViews};

/// Undo step for an optimistic mutation.
pub type Rollback = Box<dyn FnOnce(&mut AppState) + Send>;

/// Shared, observable [`AppState`].
#[derive(Clone)]
pub struct Store {
    state: Arc<watch::Sender<AppState>>,
}

impl Default for Store {
    fn default() -> Self {
        let (state, _) = watch::channel(AppState::default());
        Self {
            state: Arc::new(state),
        }
    }
}

impl Store {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribes to state changes.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<AppState> {
        self.state.subscribe()
    }

    /// Clones the current state.
    #[must_use]
    pub fn snapshot(&self) -> AppState {
        self.state.borrow().clone()
    }

    /// Reads the current state without cloning it.
    pub fn read<R>(&self, f: impl FnOnce(&AppState) -> R) -> R {
        f(&self.state.borrow())
    }

    /// Mutates the state; subscribers are notified only if `f` returns
    /// `true`.
    pub fn update(&self, f: impl FnOnce(&mut AppState) -> bool) -> bool {
        self.state.send_if_modified(f)
    }

    /// Number of unread cached notifications.
    #[must_use]
    pub fn unread_count(&self) -> usize {
        self.read(AppState::unread_count)
    }

    /// Merges a pushed notification.
    ///
    /// A record the server reports read settles any pending local read of
    /// it, so a later rollback leaves it read.
    pub fn apply_notification(&self, notification: Notification) -> bool {
        self.update(|s| {
            reconcile::settle_reads(&mut s.pending_reads, [&notification]);
            reconcile::apply_notification(&mut s.notifications, notification)
        })
    }

    /// Merges a pushed task.
    pub fn apply_task_update(&self, task: Task) -> bool {
        self.update(|s| reconcile::apply_task_update(&mut s.tasks, task))
    }

    /// Records a failed action.
    pub fn set_error(&self, message: impl Into<String>) {
        let message = message.into();
        self.update(|s| {
            s.last_error = Some(message);
            true
        });
    }

    /// Takes and clears the last recorded failure.
    pub fn take_error(&self) -> Option<String> {
        let mut taken = None;
        self.update(|s| {
            taken = s.last_error.take();
            taken.is_some()
        });
        taken
    }

    /// Runs an optimistic mutation.
    ///
    /// `apply` changes the state right away and returns the undo step for
    /// exactly what it changed, or `None` if it changed nothing. `confirm`
    /// is then awaited; on error the undo step runs, the error is recorded
    /// as the last failure and returned.
    ///
    /// # Errors
    ///
    /// Returns whatever `confirm` returns.
    pub async fn optimistic<T, E, F>(
        &self,
        action: &'static str,
        apply: impl FnOnce(&mut AppState) -> Option<Rollback>,
        confirm: F,
    ) -> Result<T, E>
    where
        F: Future<Output = Result<T, E>>,
        E: fmt::Display,
    {
        let mut rollback = None;
        self.update(|s| {
            rollback = apply(s);
            rollback.is_some()
        });

        match confirm.await {
            Ok(value) => Ok(value),
            Err(e) => {
                tracing::warn!(action, error = %e, reverted = rollback.is_some(), "optimistic update rejected");
                let message = e.to_string();
                self.update(move |s| {
                    if let Some(undo) = rollback {
                        undo(s);
                    }
                    s.last_error = Some(message);
                    true
                });
                Err(e)
            }
        }
    }
}

impl fmt::Debug for Store {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.borrow();
        f.debug_struct("Store")
            .field("tasks", &state.tasks.all.len())
            .field("notifications", &state.notifications.len())
            .field("unread", &state.unread_count())
            .finish()
    }
}
