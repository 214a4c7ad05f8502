//! Multiplexed wire frames.
//!
//! A physical connection carries text messages; each one is a single
//! [`Frame`] tagged with the logical channel it belongs to.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ProtocolError;

/// One unit on the physical stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Frame {
    /// Announce a channel. Idempotent on the receiving side.
    Open { channel: String },
    /// A payload for one channel.
    Data { channel: String, payload: Value },
    /// End-of-stream for one channel.
    End { channel: String },
}

impl Frame {
    pub fn open(channel: impl Into<String>) -> Self {
        Self::Open { channel: channel.into() }
    }

    pub fn data(channel: impl Into<String>, payload: Value) -> Self {
        Self::Data { channel: channel.into(), payload }
    }

    pub fn end(channel: impl Into<String>) -> Self {
        Self::End { channel: channel.into() }
    }

    /// The channel id this frame is tagged with.
    pub fn channel(&self) -> &str {
        match self {
            Self::Open { channel } | Self::Data { channel, .. } | Self::End { channel } => channel,
        }
    }
}

/// Turns frames into text messages and back.
///
/// Decoding must reject frames without a usable channel id with
/// [`ProtocolError::MissingChannel`] so that the multiplexer can drop them.
pub trait FrameCodec: Send + Sync + 'static {
    fn encode(&self, frame: &Frame) -> Result<String, ProtocolError>;
    fn decode(&self, raw: &str) -> Result<Frame, ProtocolError>;
}

/// Default codec: one JSON object per text message.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl FrameCodec for JsonCodec {
    fn encode(&self, frame: &Frame) -> Result<String, ProtocolError> {
        serde_json::to_string(frame).map_err(|e| ProtocolError::Encode(e.to_string()))
    }

    fn decode(&self, raw: &str) -> Result<Frame, ProtocolError> {
        let value: Value =
            serde_json::from_str(raw).map_err(|e| ProtocolError::Malformed(e.to_string()))?;

        // Checked before the typed decode so a missing id is reported as such
        // rather than as a generic shape error.
        match value.get("channel") {
            Some(Value::String(ch)) if !ch.is_empty() => {}
            _ => return Err(ProtocolError::MissingChannel),
        }

        serde_json::from_value(value).map_err(|e| ProtocolError::Malformed(e.to_string()))
    }
}
