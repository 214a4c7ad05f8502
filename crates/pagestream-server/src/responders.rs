//! Built-in responders.

use pagestream_protocol::RoutedMessage;
use pagestream_transport::{BroadcastStream, ChannelWriter};
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use crate::context::AppContext;
use crate::responder::{Responder, ResponderError};

/// Sends every body straight back on the channel it arrived on.
#[derive(Debug, Clone, Default)]
pub struct EchoResponder;

impl Responder for EchoResponder {
    async fn handle(&self, message: RoutedMessage, reply: ChannelWriter) -> Result<(), ResponderError> {
        reply.send(message.body).await?;
        Ok(())
    }
}

#[derive(Debug, Clone, Default)]
pub struct PublishOptions {
    /// Only channels starting with this prefix may be published to.
    pub channel_prefix: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PublishBody {
    channel: String,
    #[serde(default)]
    payload: serde_json::Value,
}

/// Republishes a message onto the process-wide broadcast stream, so it
/// reaches the named channel on every open connection.
///
/// Body: `{"channel": C, "payload": P}`. Replies `{"delivered": N}` with the
/// number of connections that were attached when it was published.
#[derive(Debug, Clone)]
pub struct PublishResponder {
    broadcast: BroadcastStream,
    options: PublishOptions,
}

impl PublishResponder {
    /// Factory for [`MessageRouter::register_responder`](crate::MessageRouter::register_responder).
    pub fn factory(context: &AppContext, options: PublishOptions) -> Self {
        Self { broadcast: context.broadcast().clone(), options }
    }
}

impl Responder for PublishResponder {
    async fn handle(&self, message: RoutedMessage, reply: ChannelWriter) -> Result<(), ResponderError> {
        let body: PublishBody = serde_json::from_value(message.body)?;

        if let Some(prefix) = &self.options.channel_prefix {
            if !body.channel.starts_with(prefix.as_str()) {
                return Err(ResponderError::new(format!(
                    "channel {:?} is outside {prefix:?}",
                    body.channel
                )));
            }
        }

        let delivered = self.broadcast.publish(body.channel.as_str(), body.payload);
        debug!("{} published to {} ({delivered} receivers)", message.connection_id, body.channel);
        reply.send(json!({ "delivered": delivered })).await?;
        Ok(())
    }
}
