//! Shared wire definitions for `TaskFlow`: task, notification and user
//! records, the realtime channel frame codec, and REST request/response bodies.

pub mod api;
pub mod channel;
pub mod codec;
pub mod notification;
pub mod task;
pub mod user;
