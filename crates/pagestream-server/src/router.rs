//! MessageRouter: dispatches demultiplexed messages to named responders.
//!
//! One router serves every connection. Responders are registered during
//! startup; once the application starts serving the router is shared
//! behind an `Arc` and never mutated again.

use std::collections::HashMap;

use pagestream_protocol::{DispatchError, RoutedMessage, SystemEvent};
use pagestream_transport::{ChannelWriter, EventBus, MessageHandler};
use tracing::{debug, info, warn};

use crate::context::AppContext;
use crate::responder::{Responder, ResponderDyn};

pub struct MessageRouter {
    context: AppContext,
    responders: HashMap<String, Box<dyn ResponderDyn>>,
}

impl MessageRouter {
    pub fn new(context: AppContext) -> Self {
        Self { context, responders: HashMap::new() }
    }

    fn events(&self) -> &EventBus {
        self.context.events()
    }

    /// Register a responder under `name`, replacing any earlier one.
    pub fn register<R: Responder>(&mut self, name: impl Into<String>, responder: R) {
        let name = name.into();
        if self.responders.insert(name.clone(), Box::new(responder)).is_some() {
            warn!("Responder {name:?} replaced");
            self.events().emit(SystemEvent::ResponderReplaced { name: name.clone() });
        } else {
            info!("Registering responder: {name}");
        }
        self.events().emit(SystemEvent::ResponderRegistered { name });
    }

    /// Build a responder with `factory` and register it. The factory runs
    /// exactly once, here.
    pub fn register_responder<R, O, F>(&mut self, name: impl Into<String>, factory: F, options: O)
    where
        R: Responder,
        F: FnOnce(&AppContext, O) -> R,
    {
        let responder = factory(&self.context, options);
        self.register(name, responder);
    }

    pub fn has_responder(&self, name: &str) -> bool {
        self.responders.contains_key(name)
    }

    /// Registered responder names, sorted.
    pub fn responder_names(&self) -> Vec<&str> {
        let mut names: Vec<_> = self.responders.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.responders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.responders.is_empty()
    }

    /// Run one message through its responder.
    pub async fn route(&self, message: RoutedMessage, reply: ChannelWriter) -> Result<(), DispatchError> {
        let Some(responder) = self.responders.get(&message.responder) else {
            return Err(DispatchError::ResponderMissing(message.responder));
        };

        let name = message.responder.clone();
        responder
            .handle_dyn(message, reply)
            .await
            .map_err(|e| DispatchError::ResponderFailed { responder: name, reason: e.to_string() })
    }
}

impl MessageHandler for MessageRouter {
    async fn dispatch(&self, message: RoutedMessage, reply: ChannelWriter) {
        let connection_id = message.connection_id.clone();
        let channel = message.channel.clone();

        match self.route(message, reply).await {
            Ok(()) => {}
            Err(DispatchError::ResponderMissing(responder)) => {
                debug!("No responder {responder:?} for {connection_id}/{channel}, message dropped");
                self.events().emit(SystemEvent::ResponderMissing { responder, connection_id, channel });
            }
            Err(DispatchError::ResponderFailed { responder, reason }) => {
                warn!("Responder {responder:?} failed on {connection_id}/{channel}: {reason}");
                self.events().emit(SystemEvent::ResponderFailed { responder, connection_id, reason });
            }
        }
    }
}

impl std::fmt::Debug for MessageRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageRouter").field("responders", &self.responder_names()).finish()
    }
}
