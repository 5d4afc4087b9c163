//! Dispatch of push events to registered handlers.
//!
//! One handler per [`EventKind`]; registering again replaces the previous
//! handler. Payloads are validated before decoding: anything without a
//! non-empty `_id` is dropped with a warning and never reaches a handler.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use serde_json::Value;

use taskflow_proto::channel::ServerEvent;
use taskflow_proto::notification::Notification;
use taskflow_proto::task::Task;

/// Push event kinds the router dispatches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// A notification was created or changed.
    Notification,
    /// A task was created or changed.
    TaskUpdate,
}

/// A validated, decoded push event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundEvent {
    /// Payload of a `notification` event.
    Notification(Notification),
    /// Payload of a `taskUpdate` event.
    TaskUpdate(Task),
}

impl InboundEvent {
    /// Kind of this event.
    #[must_use]
    pub const fn kind(&self) -> EventKind {
        match self {
            Self::Notification(_) => EventKind::Notification,
            Self::TaskUpdate(_) => EventKind::TaskUpdate,
        }
    }
}

/// Why an event was dropped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DropReason {
    /// The payload has no usable `_id`.
    MissingId,
    /// The payload does not decode into the expected record.
    Undecodable(String),
}

/// What [`EventRouter::route`] did with an event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteOutcome {
    /// The registered handler received the event.
    Delivered(EventKind),
    /// The payload was malformed.
    Dropped {
        /// Kind the event claimed to be.
        kind: EventKind,
        /// What was wrong with it.
        reason: DropReason,
    },
    /// The event was valid but no handler is registered.
    NoHandler(EventKind),
    /// Not a push event the router handles.
    Ignored,
}

type Handler = Arc<dyn Fn(InboundEvent) + Send + Sync>;

/// Routes push events to at most one handler per kind.
#[derive(Default)]
pub struct EventRouter {
    handlers: RwLock<HashMap<EventKind, Handler>>,
}

impl EventRouter {
    /// Creates a router with no handlers.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `handler` for `kind`, replacing any existing one.
    ///
    /// Returns `true` if a handler was replaced.
    pub fn register(&self, kind: EventKind, handler: impl Fn(InboundEvent) + Send + Sync + 'static) -> bool {
        let replaced = self
            .handlers
            .write()
            .insert(kind, Arc::new(handler))
            .is_some();
        if replaced {
            tracing::debug!(?kind, "replaced event handler");
        }
        replaced
    }

    /// Registers the `notification` handler.
    pub fn on_notification(&self, handler: impl Fn(Notification) + Send + Sync + 'static) -> bool {
        self.register(EventKind::Notification, move |event| {
            if let InboundEvent::Notification(n) = event {
                handler(n);
            }
        })
    }

    /// Registers the `taskUpdate` handler.
    pub fn on_task_update(&self, handler: impl Fn(Task) + Send + Sync + 'static) -> bool {
        self.register(EventKind::TaskUpdate, move |event| {
            if let InboundEvent::TaskUpdate(t) = event {
                handler(t);
            }
        })
    }

    /// Removes the handler for `kind`. Returns `true` if one was registered.
    pub fn unregister(&self, kind: EventKind) -> bool {
        self.handlers.write().remove(&kind).is_some()
    }

    /// Returns `true` if a handler is registered for `kind`.
    #[must_use]
    pub fn has_handler(&self, kind: EventKind) -> bool {
        self.handlers.read().contains_key(&kind)
    }

    /// Validates, decodes and dispatches one push event.
    ///
    /// The handler runs on the caller's task; no lock is held while it runs.
    pub fn route(&self, event: ServerEvent) -> RouteOutcome {
        let (kind, payload) = match event {
            ServerEvent::Notification(data) => (EventKind::Notification, data),
            ServerEvent::TaskUpdate(data) => (EventKind::TaskUpdate, data),
            ServerEvent::Authenticated(_) => return RouteOutcome::Ignored,
            ServerEvent::Other { event, .. } => {
                tracing::debug!(%event, "ignoring unknown channel event");
                return RouteOutcome::Ignored;
            }
        };

        let inbound = match decode(kind, payload) {
            Ok(inbound) => inbound,
            Err(reason) => {
                tracing::warn!(?kind, ?reason, "dropping malformed push event");
                return RouteOutcome::Dropped { kind, reason };
            }
        };

        let handler = self.handlers.read().get(&kind).cloned();
        match handler {
            Some(handler) => {
                handler(inbound);
                RouteOutcome::Delivered(kind)
            }
            None => {
                tracing::debug!(?kind, "no handler registered, event discarded");
                RouteOutcome::NoHandler(kind)
            }
        }
    }
}

impl std::fmt::Debug for EventRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kinds: Vec<EventKind> = self.handlers.read().keys().copied().collect();
        f.debug_struct("EventRouter")
            .field("handlers", &kinds)
            .finish()
    }
}

fn has_id(payload: &Value) -> bool {
    payload
        .get("_id")
        .and_then(Value::as_str)
        .is_some_and(|id| !id.trim().is_empty())
}

fn decode(kind: EventKind, payload: Value) -> Result<InboundEvent, DropReason> {
    if !has_id(&payload) {
        return Err(DropReason::MissingId);
    }
    let undecodable = |e: serde_json::Error| DropReason::Undecodable(e.to_string());
    match kind {
        EventKind::Notification => serde_json::from_value(payload)
            .map(InboundEvent::Notification)
            .map_err(undecodable),
        EventKind::TaskUpdate => serde_json::from_value::<Task>(payload)
            .map(|mut task| {
                task.dedup_collaborators();
                InboundEvent::TaskUpdate(task)
            })
            .map_err(undecodable),
    }
}
