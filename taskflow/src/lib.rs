//! `TaskFlow`: task management client with live notifications.
//!
//! Keeps a local view of tasks and notifications consistent with the
//! backend: a persistent realtime channel pushes changes, an event router
//! validates and dispatches them, and a reconciler merges them into an
//! observable store alongside the results of REST actions.

pub mod api;
pub mod channel;
pub mod cli;
pub mod config;
pub mod credentials;
pub mod router;
pub mod session;
pub mod store;
