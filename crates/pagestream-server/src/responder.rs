//! Responders: the units the message router dispatches to.

use std::future::Future;
use std::pin::Pin;

use pagestream_protocol::{ChannelError, RoutedMessage};
use pagestream_transport::ChannelWriter;
use thiserror::Error;

/// A responder failure. Logged and turned into a `responderFailed` event;
/// never reaches the connection.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct ResponderError(pub String);

impl ResponderError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

impl From<ChannelError> for ResponderError {
    fn from(err: ChannelError) -> Self {
        Self(format!("reply failed: {err}"))
    }
}

impl From<serde_json::Error> for ResponderError {
    fn from(err: serde_json::Error) -> Self {
        Self(format!("bad body: {err}"))
    }
}

/// Handles messages addressed to one responder name.
///
/// `reply` writes onto the channel the message arrived on.
pub trait Responder: Send + Sync + 'static {
    fn handle(
        &self,
        message: RoutedMessage,
        reply: ChannelWriter,
    ) -> impl Future<Output = Result<(), ResponderError>> + Send;
}

pub(crate) type ResponderFuture<'a> = Pin<Box<dyn Future<Output = Result<(), ResponderError>> + Send + 'a>>;

/// Object-safe wrapper for the Responder trait.
pub(crate) trait ResponderDyn: Send + Sync {
    fn handle_dyn(&self, message: RoutedMessage, reply: ChannelWriter) -> ResponderFuture<'_>;
}

impl<T: Responder> ResponderDyn for T {
    fn handle_dyn(&self, message: RoutedMessage, reply: ChannelWriter) -> ResponderFuture<'_> {
        Box::pin(self.handle(message, reply))
    }
}
