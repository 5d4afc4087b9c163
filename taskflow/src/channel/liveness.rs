//! Periodic check that reopens the channel while a session is live.

use std::sync::{Arc, Weak};
use std::time::Duration;

use tokio::task::JoinHandle;

use crate::credentials::CredentialSource;

use super::manager::{ConnectionManager, Shared};

/// Running liveness task. Aborted on drop.
pub(super) struct LivenessHandle {
    task: JoinHandle<()>,
}

impl LivenessHandle {
    pub(super) fn is_running(&self) -> bool {
        !self.task.is_finished()
    }
}

impl Drop for LivenessHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Spawns the check.
///
/// Ticks every `initial` until the channel is first seen connected, then
/// every `steady`. Exits when the manager is gone or `source` no longer
/// holds a credential.
pub(super) fn spawn(
    manager: Weak<Shared>,
    source: Arc<dyn CredentialSource>,
    initial: Duration,
    steady: Duration,
) -> LivenessHandle {
    let task = tokio::spawn(async move {
        let mut confirmed = false;
        loop {
            tokio::time::sleep(if confirmed { steady } else { initial }).await;

            let Some(shared) = manager.upgrade() else {
                break;
            };
            let manager = ConnectionManager::from_shared(shared);
            let Some(credential) = source.credential() else {
                tracing::debug!("no credential, liveness check exiting");
                break;
            };

            if manager.is_connected() {
                if !confirmed {
                    tracing::debug!(every = ?steady, "channel confirmed connected, slowing liveness check");
                    confirmed = true;
                }
                continue;
            }

            tracing::info!(state = ?manager.state(), "channel not connected, reopening");
            manager.open(credential);
        }
    });
    LivenessHandle { task }
}
