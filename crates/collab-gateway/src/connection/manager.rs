//! Connection manager
//!
//! Registry of live sessions on this gateway, keyed by session ID. Room
//! membership lives in the subscription table, which owns fan-out; the
//! manager only answers "which connection is this session".

use super::Connection;
use dashmap::DashMap;
use std::sync::Arc;

/// Registry of all active WebSocket connections.
pub struct ConnectionManager {
    connections: DashMap<String, Arc<Connection>>,
}

impl ConnectionManager {
    #[must_use]
    pub fn new() -> Self {
        Self {
            connections: DashMap::new(),
        }
    }

    #[must_use]
    pub fn new_shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Register a connection.
    pub fn add(&self, connection: Arc<Connection>) {
        tracing::debug!(session_id = %connection.session_id(), "connection added");
        self.connections
            .insert(connection.session_id().to_string(), connection);
    }

    /// Remove a connection, returning it if it was present.
    pub fn remove(&self, session_id: &str) -> Option<Arc<Connection>> {
        let removed = self.connections.remove(session_id).map(|(_, c)| c);
        if removed.is_some() {
            tracing::debug!(session_id = %session_id, "connection removed");
        }
        removed
    }

    /// Look up a connection by session ID.
    #[must_use]
    pub fn get(&self, session_id: &str) -> Option<Arc<Connection>> {
        self.connections.get(session_id).map(|r| r.clone())
    }

    /// Number of active connections.
    #[must_use]
    pub fn count(&self) -> usize {
        self.connections.len()
    }
}

impl Default for ConnectionManager {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("connections", &self.connections.len())
            .finish()
    }
}
