//! Pagestream - Protocol Types
//!
//! Shared vocabulary for the multiplexed transport and the application core:
//! the frames that travel over a physical connection, the envelope a routed
//! message carries, the typed system events, and the error classes.
//! The concrete encoding of frames is pluggable through [`FrameCodec`].

pub mod error;
pub mod events;
pub mod frame;
pub mod message;

pub use error::{ChannelError, ClientOpError, ConfigError, DispatchError, ProtocolError};
pub use events::{EventKind, SystemEvent};
pub use frame::{Frame, FrameCodec, JsonCodec};
pub use message::{Envelope, RoutedMessage};
