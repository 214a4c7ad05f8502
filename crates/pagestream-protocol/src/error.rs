//! Error classes.
//!
//! Only [`ConfigError`] is ever fatal; it is raised while the application is
//! being assembled and stops serving from beginning. Everything else is
//! recovered where it happens.

use thiserror::Error;

/// Startup configuration problems. Serving never begins when one is returned.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// A client with the same view name is already registered.
    #[error("client already registered: {0}")]
    DuplicateClient(String),

    /// Route patterns must start with `/`.
    #[error("invalid route pattern {0:?}: URL must begin with /")]
    InvalidRoute(String),

    /// No target registered for `/`.
    #[error("no base route: register a target for \"/\" before serving")]
    MissingRootRoute,

    /// An option value that cannot be used (e.g. an empty asset prefix).
    #[error("invalid option {name}: {reason}")]
    InvalidOptions { name: &'static str, reason: String },
}

/// A frame that could not be demultiplexed. Always dropped and logged.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    #[error("malformed frame: {0}")]
    Malformed(String),

    #[error("frame carries no channel id")]
    MissingChannel,

    #[error("unknown channel: {0}")]
    UnknownChannel(String),

    #[error("payload on channel {channel} has no responder field")]
    MissingResponder { channel: String },

    #[error("too many open channels (max {0})")]
    TooManyChannels(usize),

    #[error("failed to encode frame: {0}")]
    Encode(String),
}

/// A message that reached the router but could not be handled.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DispatchError {
    #[error("no responder registered as {0:?}")]
    ResponderMissing(String),

    #[error("responder {responder:?} failed: {reason}")]
    ResponderFailed { responder: String, reason: String },
}

/// A single client's failure during a registry-wide broadcast.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct ClientOpError {
    pub message: String,
}

impl ClientOpError {
    pub fn new(message: impl Into<String>) -> Self {
        Self { message: message.into() }
    }
}

/// Write failures on a logical channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ChannelError {
    /// The owning connection is closed.
    #[error("channel closed")]
    Closed,

    /// The outbound queue is full and the overflow policy is drop.
    #[error("outbound queue full, payload dropped")]
    Full,

    /// The connection already has the maximum number of channels open.
    #[error("channel limit reached")]
    LimitReached,
}
