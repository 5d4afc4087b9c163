//! Realtime channel to the task backend.
//!
//! The [`ConnectionManager`] owns at most one persistent WebSocket to the
//! backend's event channel. It presents the session credential with an
//! `authenticate` frame, retries rejected credentials after a short delay,
//! reconnects with capped exponential backoff on transport loss, and feeds
//! every push event to the [`EventRouter`](crate::router::EventRouter) in the
//! order received.
//!
//! # Architecture
//!
//! ```text
//! ConnectionManager ── Command ──→ driver task ──→ WebSocket
//!        ↑                            │
//!   liveness task                     ├── ServerEvent ──→ EventRouter
//!                                     ├── ConnectionState (watch)
//!                                     └── ChannelEvent (mpsc)
//! ```

mod driver;
mod liveness;
mod manager;

use std::fmt;
use std::time::Duration;

pub use manager::{ConnectionManager, OpenOutcome};

/// Errors raised while establishing or running the channel.
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    /// The WebSocket handshake did not finish within the connect timeout.
    #[error("channel connect timed out")]
    Timeout,

    /// The backend could not be reached.
    #[error("channel endpoint unreachable: {0}")]
    Unreachable(String),

    /// The backend refused the upgrade with an HTTP status.
    #[error("channel upgrade rejected with HTTP status {0}")]
    Upgrade(u16),

    /// The connection dropped or a frame could not be written.
    #[error("channel transport error: {0}")]
    Transport(String),

    /// A frame could not be encoded.
    #[error(transparent)]
    Codec(#[from] taskflow_proto::codec::CodecError),
}

/// Capped exponential backoff between reconnect attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    /// Delay before the first retry.
    pub initial_delay: Duration,
    /// Upper bound for any single delay.
    pub max_delay: Duration,
    /// Retries allowed after a failure before the manager gives up.
    pub max_attempts: u32,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(5),
            max_attempts: 10,
        }
    }
}

impl ReconnectPolicy {
    /// Delay before retry number `attempt` (1-based).
    ///
    /// Doubles from `initial_delay` and never exceeds `max_delay`.
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.initial_delay.saturating_mul(factor).min(self.max_delay)
    }

    /// Returns `true` once `attempt` exceeds the retry budget.
    #[must_use]
    pub const fn exhausted(&self, attempt: u32) -> bool {
        attempt > self.max_attempts
    }
}

/// Settings for the realtime channel.
#[derive(Debug, Clone)]
pub struct ChannelConfig {
    /// WebSocket URL of the event channel.
    pub url: String,
    /// Bound on a single connect attempt, handshake included.
    pub connect_timeout: Duration,
    /// Wait before re-presenting a rejected credential.
    pub auth_retry_delay: Duration,
    /// Backoff for transport-level reconnects.
    pub reconnect: ReconnectPolicy,
    /// Liveness check period until the channel is first seen connected.
    pub liveness_initial_interval: Duration,
    /// Liveness check period afterwards.
    pub liveness_interval: Duration,
    /// Capacity of the [`ChannelEvent`] queue.
    pub event_buffer: usize,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            url: "ws://localhost:5000/ws".to_string(),
            connect_timeout: Duration::from_secs(20),
            auth_retry_delay: Duration::from_secs(5),
            reconnect: ReconnectPolicy::default(),
            liveness_initial_interval: Duration::from_secs(2),
            liveness_interval: Duration::from_secs(30),
            event_buffer: 64,
        }
    }
}

/// Identity of one channel instance, fresh for every spawn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ChannelId(uuid::Uuid);

impl ChannelId {
    pub(crate) fn new() -> Self {
        Self(uuid::Uuid::now_v7())
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Observable state of the channel.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ConnectionState {
    /// No channel, or the channel gave up.
    #[default]
    Disconnected,
    /// A connect attempt is in flight.
    Connecting {
        /// Retry number, `0` for a fresh connect.
        attempt: u32,
    },
    /// Transport is up; the credential is not (yet) accepted.
    Connected,
    /// The backend accepted the credential.
    Authenticated {
        /// Account id reported by the backend.
        user_id: Option<String>,
    },
    /// Waiting out a backoff delay before the next connect.
    Backoff {
        /// Retry number about to be made.
        attempt: u32,
        /// Length of the wait.
        delay: Duration,
    },
}

impl ConnectionState {
    /// Returns `true` while the transport is up, authenticated or not.
    #[must_use]
    pub const fn is_connected(&self) -> bool {
        matches!(self, Self::Connected | Self::Authenticated { .. })
    }

    /// Returns `true` once the backend accepted the credential.
    #[must_use]
    pub const fn is_authenticated(&self) -> bool {
        matches!(self, Self::Authenticated { .. })
    }
}

/// Why a connected channel went down.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisconnectReason {
    /// The backend sent a close frame.
    ServerClosed,
    /// The transport failed.
    Transport(String),
    /// The client closed the channel.
    ClientClosed,
}

/// Lifecycle notifications from the channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelEvent {
    /// The backend accepted the credential.
    Authenticated {
        /// Account id reported by the backend.
        user_id: Option<String>,
    },
    /// The backend rejected the credential; it will be presented again.
    AuthRejected {
        /// Reason reported by the backend.
        reason: String,
        /// Wait before the next attempt.
        retry_in: Duration,
    },
    /// A connected channel went down.
    Disconnected {
        /// What caused it.
        reason: DisconnectReason,
    },
    /// Waiting before another connect attempt.
    Reconnecting {
        /// Retry number about to be made (1-based).
        attempt: u32,
        /// Configured retry budget.
        max_attempts: u32,
        /// Length of the wait.
        delay: Duration,
    },
    /// The retry budget ran out; the channel is down until reopened.
    ReconnectsExhausted {
        /// Number of retries made.
        attempts: u32,
    },
    /// A connect attempt failed.
    Error(String),
}
