//! Routed messages - what the message router sees once a payload has been
//! demultiplexed off a connection.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ProtocolError;

/// Payload shape expected on every inbound channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Name of the responder that should handle this message.
    pub responder: String,
    /// Responder-specific body.
    #[serde(default)]
    pub body: Value,
}

impl Envelope {
    pub fn new(responder: impl Into<String>, body: Value) -> Self {
        Self { responder: responder.into(), body }
    }
}

/// A demultiplexed message, tagged with where it came from.
#[derive(Debug, Clone, PartialEq)]
pub struct RoutedMessage {
    /// Connection the message arrived on.
    pub connection_id: String,
    /// Logical channel within that connection.
    pub channel: String,
    /// Responder name taken from the envelope.
    pub responder: String,
    pub body: Value,
}

impl RoutedMessage {
    /// Build a routed message from a raw channel payload.
    pub fn from_payload(
        connection_id: &str,
        channel: &str,
        payload: Value,
    ) -> Result<Self, ProtocolError> {
        let envelope: Envelope = serde_json::from_value(payload).map_err(|_| {
            ProtocolError::MissingResponder { channel: channel.to_string() }
        })?;

        if envelope.responder.is_empty() {
            return Err(ProtocolError::MissingResponder { channel: channel.to_string() });
        }

        Ok(Self {
            connection_id: connection_id.to_string(),
            channel: channel.to_string(),
            responder: envelope.responder,
            body: envelope.body,
        })
    }
}
