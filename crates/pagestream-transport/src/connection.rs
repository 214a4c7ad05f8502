//! Connection state tracking.

use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use dashmap::DashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Open,
    Closed,
}

/// One physical session.
#[derive(Debug, Clone)]
pub struct Connection {
    /// Unique connection ID
    pub id: String,
    /// Wall-clock time the connection was accepted
    pub connected_at: DateTime<Utc>,
    pub state: ConnectionState,
    /// Number of logical channels currently open
    pub channels: usize,
    /// Last time anything arrived from the peer
    pub last_activity: Instant,
}

impl Connection {
    pub fn new(id: String) -> Self {
        Self {
            id,
            connected_at: Utc::now(),
            state: ConnectionState::Open,
            channels: 0,
            last_activity: Instant::now(),
        }
    }

    pub fn is_open(&self) -> bool {
        self.state == ConnectionState::Open
    }

    pub fn touch(&mut self) {
        self.last_activity = Instant::now();
    }

    pub fn close(&mut self) {
        self.state = ConnectionState::Closed;
    }
}

/// Live connections, shared between the listener and every binding.
#[derive(Debug, Clone, Default)]
pub struct ConnectionTable {
    inner: Arc<DashMap<String, Connection>>,
}

impl ConnectionTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, connection: Connection) {
        self.inner.insert(connection.id.clone(), connection);
    }

    pub fn remove(&self, id: &str) -> Option<Connection> {
        self.inner.remove(id).map(|(_, c)| c)
    }

    pub fn get(&self, id: &str) -> Option<Connection> {
        self.inner.get(id).map(|c| c.clone())
    }

    /// Record activity and the current channel count for a connection.
    pub fn update(&self, id: &str, channels: usize) {
        if let Some(mut conn) = self.inner.get_mut(id) {
            conn.channels = channels;
            conn.touch();
        }
    }

    pub fn ids(&self) -> Vec<String> {
        self.inner.iter().map(|e| e.key().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}
