//! Process-wide outbound broadcast stream.
//!
//! One logical writer, one reader per open connection. Publishing never
//! fails: with no connections the publication simply reaches nobody.
//! A connection that has detached (dropped its receiver) can no longer be
//! reached by any later publish.

use serde_json::Value;
use tokio::sync::broadcast;

/// A payload addressed to a named channel on every open connection.
#[derive(Debug, Clone, PartialEq)]
pub struct Publication {
    pub channel: String,
    pub payload: Value,
}

#[derive(Debug, Clone)]
pub struct BroadcastStream {
    tx: broadcast::Sender<Publication>,
}

impl BroadcastStream {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Publish to every attached connection. Returns how many were attached.
    pub fn publish(&self, channel: impl Into<String>, payload: Value) -> usize {
        let publication = Publication { channel: channel.into(), payload };
        // Ignore send errors (no receivers is fine)
        self.tx.send(publication).unwrap_or(0)
    }

    /// Attach a new reader. Dropping the receiver detaches it.
    pub fn subscribe(&self) -> broadcast::Receiver<Publication> {
        self.tx.subscribe()
    }

    /// Number of currently attached readers.
    pub fn receiver_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for BroadcastStream {
    fn default() -> Self {
        Self::new(1024)
    }
}
