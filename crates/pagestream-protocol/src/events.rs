//! System events.
//!
//! Every event kind has exactly one payload shape. Subscribers filter by
//! [`EventKind`]; delivery is at-most-once per live subscriber and there is
//! no replay for subscribers that arrive late.

use std::fmt;

/// Discriminant used to subscribe to a subset of events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    ClientRegistered,
    RouteReplaced,
    ResponderRegistered,
    ResponderReplaced,
    ResponderMissing,
    ResponderFailed,
    MalformedFrame,
    ConnectionOpened,
    ConnectionClosed,
    BroadcastLagged,
}

impl EventKind {
    /// Wire-style name of the event (`clientRegistered`, ...).
    pub fn name(&self) -> &'static str {
        match self {
            Self::ClientRegistered => "clientRegistered",
            Self::RouteReplaced => "routeReplaced",
            Self::ResponderRegistered => "responderRegistered",
            Self::ResponderReplaced => "responderReplaced",
            Self::ResponderMissing => "responderMissing",
            Self::ResponderFailed => "responderFailed",
            Self::MalformedFrame => "malformedFrame",
            Self::ConnectionOpened => "connectionOpened",
            Self::ConnectionClosed => "connectionClosed",
            Self::BroadcastLagged => "broadcastLagged",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SystemEvent {
    ClientRegistered { view: String },
    /// A route pattern was registered a second time; the old target is gone.
    RouteReplaced { pattern: String },
    ResponderRegistered { name: String },
    /// Warning: a responder name was registered twice.
    ResponderReplaced { name: String },
    ResponderMissing { responder: String, connection_id: String, channel: String },
    ResponderFailed { responder: String, connection_id: String, reason: String },
    MalformedFrame { connection_id: String, reason: String },
    ConnectionOpened { connection_id: String },
    ConnectionClosed { connection_id: String },
    /// A connection fell behind the broadcast stream and lost the oldest
    /// `skipped` publications.
    BroadcastLagged { connection_id: String, skipped: u64 },
}

impl SystemEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            Self::ClientRegistered { .. } => EventKind::ClientRegistered,
            Self::RouteReplaced { .. } => EventKind::RouteReplaced,
            Self::ResponderRegistered { .. } => EventKind::ResponderRegistered,
            Self::ResponderReplaced { .. } => EventKind::ResponderReplaced,
            Self::ResponderMissing { .. } => EventKind::ResponderMissing,
            Self::ResponderFailed { .. } => EventKind::ResponderFailed,
            Self::MalformedFrame { .. } => EventKind::MalformedFrame,
            Self::ConnectionOpened { .. } => EventKind::ConnectionOpened,
            Self::ConnectionClosed { .. } => EventKind::ConnectionClosed,
            Self::BroadcastLagged { .. } => EventKind::BroadcastLagged,
        }
    }
}
