//! Handle for opening, closing and observing the realtime channel.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::credentials::{Credential, CredentialSource};
use crate::router::EventRouter;

use super::liveness::{self, LivenessHandle};
use super::{ChannelConfig, ChannelEvent, ChannelId, ConnectionState, driver};

/// What [`ConnectionManager::open`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenOutcome {
    /// No channel existed; a new one was started.
    Spawned(ChannelId),
    /// The channel was connected; the credential was presented again.
    Reauthenticated(ChannelId),
    /// A connect attempt is already in flight; nothing else was done.
    InFlight(ChannelId),
    /// The channel was waiting out a backoff; the wait was cut short.
    Nudged(ChannelId),
}

impl OpenOutcome {
    /// Channel the call acted on.
    #[must_use]
    pub const fn channel_id(&self) -> ChannelId {
        match self {
            Self::Spawned(id) | Self::Reauthenticated(id) | Self::InFlight(id) | Self::Nudged(id) => {
                *id
            }
        }
    }
}

/// Instructions from the handle to the driver task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum Command {
    /// Present the latest credential again.
    Authenticate,
    /// Skip any remaining backoff.
    ConnectNow,
    /// Send a close frame and stop.
    Close,
}

/// State shared between the handle and the driver task.
///
/// Holds nothing that refers back to the handle, so dropping the last
/// [`ConnectionManager`] drops the command sender and the driver exits.
pub(super) struct Link {
    pub(super) config: ChannelConfig,
    pub(super) router: Arc<EventRouter>,
    credential: Mutex<Option<Credential>>,
    active: Mutex<Option<ChannelId>>,
    state: watch::Sender<ConnectionState>,
    events: mpsc::Sender<ChannelEvent>,
}

impl Link {
    /// Latest credential handed to [`ConnectionManager::open`].
    pub(super) fn credential(&self) -> Option<Credential> {
        self.credential.lock().clone()
    }

    /// Returns `true` while `id` is the live channel instance.
    pub(super) fn is_current(&self, id: ChannelId) -> bool {
        *self.active.lock() == Some(id)
    }

    /// Publishes a state change made by channel `id`.
    ///
    /// Writes from a channel that has since been replaced or closed are
    /// ignored.
    pub(super) fn set_state(&self, id: ChannelId, state: ConnectionState) {
        if !self.is_current(id) {
            return;
        }
        tracing::debug!(channel = %id, ?state, "channel state");
        self.state.send_replace(state);
    }

    /// Queues a lifecycle event; drops it when nobody keeps up.
    pub(super) fn emit(&self, event: ChannelEvent) {
        if let Err(mpsc::error::TrySendError::Full(event)) = self.events.try_send(event) {
            tracing::debug!(?event, "channel event queue full, dropping event");
        }
    }
}

struct ActiveChannel {
    id: ChannelId,
    commands: mpsc::UnboundedSender<Command>,
    task: JoinHandle<()>,
}

pub(super) struct Shared {
    pub(super) link: Arc<Link>,
    active: Mutex<Option<ActiveChannel>>,
    events: Mutex<Option<mpsc::Receiver<ChannelEvent>>>,
    liveness: Mutex<Option<LivenessHandle>>,
}

/// Cloneable handle to the single realtime channel.
///
/// All clones drive the same channel. Opening while a channel exists never
/// creates a second one. Requires a running tokio runtime.
#[derive(Clone)]
pub struct ConnectionManager {
    shared: Arc<Shared>,
}

impl ConnectionManager {
    /// Creates a manager that routes push events through `router`.
    ///
    /// No connection is made until [`open`](Self::open) is called.
    #[must_use]
    pub fn new(config: ChannelConfig, router: Arc<EventRouter>) -> Self {
        let (event_tx, event_rx) = mpsc::channel(config.event_buffer.max(1));
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        let link = Link {
            config,
            router,
            credential: Mutex::new(None),
            active: Mutex::new(None),
            state,
            events: event_tx,
        };
        Self {
            shared: Arc::new(Shared {
                link: Arc::new(link),
                active: Mutex::new(None),
                events: Mutex::new(Some(event_rx)),
                liveness: Mutex::new(None),
            }),
        }
    }

    pub(super) const fn from_shared(shared: Arc<Shared>) -> Self {
        Self { shared }
    }

    pub(super) fn downgrade(&self) -> std::sync::Weak<Shared> {
        Arc::downgrade(&self.shared)
    }

    /// Opens the channel with `credential`, or reuses the one that exists.
    ///
    /// - No channel: a new one is started.
    /// - Connected: the credential is presented again on the same channel.
    /// - Waiting out a backoff: the next connect happens immediately.
    /// - Connecting: nothing; the attempt in flight uses the new credential.
    pub fn open(&self, credential: Credential) -> OpenOutcome {
        *self.shared.link.credential.lock() = Some(credential);

        let mut active = self.shared.active.lock();
        if let Some(channel) = active.as_ref().filter(|c| !c.task.is_finished()) {
            let (command, outcome) = match self.state() {
                ConnectionState::Connected | ConnectionState::Authenticated { .. } => (
                    Some(Command::Authenticate),
                    OpenOutcome::Reauthenticated(channel.id),
                ),
                ConnectionState::Backoff { .. } => {
                    (Some(Command::ConnectNow), OpenOutcome::Nudged(channel.id))
                }
                ConnectionState::Connecting { .. } | ConnectionState::Disconnected => {
                    (None, OpenOutcome::InFlight(channel.id))
                }
            };
            if let Some(command) = command
                && channel.commands.send(command).is_err()
            {
                tracing::debug!(channel = %channel.id, ?command, "channel task already gone");
            }
            tracing::debug!(?outcome, "open reused existing channel");
            return outcome;
        }

        let id = ChannelId::new();
        let (commands, command_rx) = mpsc::unbounded_channel();
        *self.shared.link.active.lock() = Some(id);
        let task = tokio::spawn(driver::run(
            Arc::clone(&self.shared.link),
            id,
            command_rx,
        ));
        *active = Some(ActiveChannel { id, commands, task });
        tracing::info!(channel = %id, url = %self.shared.link.config.url, "opening channel");
        OpenOutcome::Spawned(id)
    }

    /// Closes the channel and stops the liveness check.
    ///
    /// Sends a close frame when connected. Calling it with no channel is a
    /// no-op apart from the liveness stop.
    pub fn close(&self) {
        self.stop_liveness();
        let active = self.shared.active.lock().take();
        self.shared.link.active.lock().take();
        self.shared.link.credential.lock().take();

        match active {
            Some(channel) => {
                if channel.commands.send(Command::Close).is_err() {
                    tracing::debug!(channel = %channel.id, "channel task already gone");
                }
                tracing::info!(channel = %channel.id, "channel closed");
            }
            None => tracing::debug!("close: no channel"),
        }
        self.shared
            .link
            .state
            .send_replace(ConnectionState::Disconnected);
    }

    /// Current state of the channel.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.shared.link.state.borrow().clone()
    }

    /// Returns `true` while the transport is up.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.shared.link.state.borrow().is_connected()
    }

    /// Id of the live channel instance, if any.
    #[must_use]
    pub fn channel_id(&self) -> Option<ChannelId> {
        *self.shared.link.active.lock()
    }

    /// Subscribes to state changes.
    #[must_use]
    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.shared.link.state.subscribe()
    }

    /// Takes the lifecycle event receiver. Returns `None` after the first
    /// call.
    pub fn take_events(&self) -> Option<mpsc::Receiver<ChannelEvent>> {
        self.shared.events.lock().take()
    }

    /// Starts the periodic liveness check, replacing any running one.
    ///
    /// Every tick, if `source` still holds a credential and the channel is
    /// not connected, the channel is reopened. The check stops by itself
    /// once `source` has no credential.
    pub fn start_liveness(&self, source: Arc<dyn CredentialSource>) {
        let config = &self.shared.link.config;
        let handle = liveness::spawn(
            self.downgrade(),
            source,
            config.liveness_initial_interval,
            config.liveness_interval,
        );
        if self.shared.liveness.lock().replace(handle).is_some() {
            tracing::debug!("replaced running liveness check");
        }
    }

    /// Stops the liveness check, if running.
    pub fn stop_liveness(&self) {
        if self.shared.liveness.lock().take().is_some() {
            tracing::debug!("liveness check stopped");
        }
    }

    /// Returns `true` while a liveness check is running.
    #[must_use]
    pub fn liveness_running(&self) -> bool {
        self.shared
            .liveness
            .lock()
            .as_ref()
            .is_some_and(LivenessHandle::is_running)
    }
}

impl std::fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("state", &self.state())
            .field("channel", &self.channel_id())
            .finish_non_exhaustive()
    }
}
