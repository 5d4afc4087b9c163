//! JSON text-frame codec for the realtime channel.
//!
//! Client and server sides are both provided: the client encodes
//! [`ClientEvent`] and decodes [`ServerEvent`]; servers (and test doubles)
//! do the reverse.

use serde_json::Value;

use crate::channel::{
    AUTHENTICATE, AUTHENTICATED, AuthAck, ClientEvent, Frame, NOTIFICATION, ServerEvent,
    TASK_UPDATE,
};

/// Error type for frame encode/decode operations.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// Serialization or deserialization failed.
    #[error("serialization error: {0}")]
    Serialization(String),
    /// The frame is valid JSON but not a valid event.
    #[error("invalid frame: {0}")]
    InvalidFrame(String),
}

impl From<serde_json::Error> for CodecError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

/// Encodes a [`ClientEvent`] as a text frame.
///
/// # Errors
///
/// Returns `CodecError::Serialization` if the frame cannot be serialized.
pub fn encode_client(event: &ClientEvent) -> Result<String, CodecError> {
    let frame = match event {
        ClientEvent::Authenticate { token } => Frame {
            event: AUTHENTICATE.to_string(),
            data: Value::String(token.clone()),
        },
    };
    Ok(serde_json::to_string(&frame)?)
}

/// Decodes a text frame sent by the client.
///
/// # Errors
///
/// Returns `CodecError::Serialization` for malformed JSON and
/// `CodecError::InvalidFrame` for unknown events or a non-string token.
pub fn decode_client(text: &str) -> Result<ClientEvent, CodecError> {
    let frame: Frame = serde_json::from_str(text)?;
    match frame.event.as_str() {
        AUTHENTICATE => match frame.data {
            Value::String(token) => Ok(ClientEvent::Authenticate { token }),
            other => Err(CodecError::InvalidFrame(format!(
                "authenticate expects a string token, got {other}"
            ))),
        },
        other => Err(CodecError::InvalidFrame(format!(
            "unknown client event '{other}'"
        ))),
    }
}

/// Encodes a [`ServerEvent`] as a text frame.
///
/// # Errors
///
/// Returns `CodecError::Serialization` if the frame cannot be serialized.
pub fn encode_server(event: &ServerEvent) -> Result<String, CodecError> {
    let data = match event {
        ServerEvent::Authenticated(ack) => serde_json::to_value(ack)?,
        ServerEvent::Notification(data)
        | ServerEvent::TaskUpdate(data)
        | ServerEvent::Other { data, .. } => data.clone(),
    };
    let frame = Frame {
        event: event.name().to_string(),
        data,
    };
    Ok(serde_json::to_string(&frame)?)
}

/// Decodes a text frame sent by the server.
///
/// Push payloads are returned unvalidated.
///
/// # Errors
///
/// Returns `CodecError::Serialization` for malformed JSON or a malformed
/// `authenticated` payload.
pub fn decode_server(text: &str) -> Result<ServerEvent, CodecError> {
    let frame: Frame = serde_json::from_str(text)?;
    Ok(match frame.event.as_str() {
        AUTHENTICATED => ServerEvent::Authenticated(serde_json::from_value::<AuthAck>(frame.data)?),
        NOTIFICATION => ServerEvent::Notification(frame.data),
        TASK_UPDATE => ServerEvent::TaskUpdate(frame.data),
        _ => ServerEvent::Other {
            event: frame.event,
            data: frame.data,
        },
    })
}
