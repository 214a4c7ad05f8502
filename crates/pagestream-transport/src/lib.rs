//! Pagestream Transport Layer
//!
//! Everything between a physical connection and the message router:
//! - Channel multiplexing over one duplex text stream
//! - Per-connection binding (inbound → handler, broadcast → outbound)
//! - The process-wide broadcast stream and system event bus
//! - A WebSocket listener built on Axum
//!
//! The transport is decoupled from the application via the `MessageHandler` trait.

pub mod binding;
pub mod broadcast;
pub mod connection;
pub mod events;
pub mod mux;
pub mod server;

pub use binding::{ConnectionSummary, MessageHandler, TransportBinding};
pub use broadcast::{BroadcastStream, Publication};
pub use connection::{Connection, ConnectionState, ConnectionTable};
pub use events::{EventBus, EventSubscription};
pub use mux::{Channel, ChannelMultiplexer, ChannelWriter, Demuxed, MuxConfig, OverflowPolicy};
pub use server::{TransportConfig, TransportError, TransportServer, WsText};
