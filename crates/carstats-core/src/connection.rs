//! Per-provider connection records.
//!
//! One [`ProviderConnection`] exists per discovered identity for the whole
//! session. Its state is explicit; the remote handle is present only while
//! the record is `Connected`. The table also fixes the priority order, which
//! never changes until the session is torn down.

use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;
use uuid::Uuid;

use crate::discovery::ConnectionSink;
use crate::provider::{CarStatsProvider, ProviderCallback, ProviderIdentity};

/// Connection state of one provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    /// Binding requested, no handle yet.
    Connecting,
    /// Handle present, remote listener registration attempted.
    Connected,
    /// Handle lost; the identity keeps its priority slot and its fields.
    Disconnected,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Connecting => write!(f, "connecting"),
            Self::Connected => write!(f, "connected"),
            Self::Disconnected => write!(f, "disconnected"),
        }
    }
}

/// The inbound callback handed to a provider, with the token it was
/// registered under.
#[derive(Clone)]
pub struct RegisteredCallback {
    pub token: Uuid,
    pub callback: Arc<dyn ProviderCallback>,
}

impl RegisteredCallback {
    pub fn new(callback: Arc<dyn ProviderCallback>) -> Self {
        Self {
            token: Uuid::new_v4(),
            callback,
        }
    }
}

/// Runtime record for one provider.
pub struct ProviderConnection {
    pub identity: ProviderIdentity,
    pub state: ConnectionState,
    handle: Option<Arc<dyn CarStatsProvider>>,
    callback: Option<RegisteredCallback>,
    sink: Arc<dyn ConnectionSink>,
    pub connects: u64,
    pub disconnects: u64,
}

impl ProviderConnection {
    fn new(identity: ProviderIdentity, sink: Arc<dyn ConnectionSink>) -> Self {
        Self {
            identity,
            state: ConnectionState::Connecting,
            handle: None,
            callback: None,
            sink,
            connects: 0,
            disconnects: 0,
        }
    }

    pub fn handle(&self) -> Option<&Arc<dyn CarStatsProvider>> {
        self.handle.as_ref()
    }

    pub fn callback(&self) -> Option<&RegisteredCallback> {
        self.callback.as_ref()
    }

    /// Binding sink this record was created with.
    pub fn sink(&self) -> &Arc<dyn ConnectionSink> {
        &self.sink
    }
}

/// Health view of one provider.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProviderStatus {
    pub identity: ProviderIdentity,
    pub state: ConnectionState,
    /// Fields this provider owns under the current snapshot.
    pub owned_fields: usize,
    pub connects: u64,
    pub disconnects: u64,
}

/// Identity-indexed connection records plus the fixed priority order.
#[derive(Default)]
pub struct ConnectionTable {
    priority: Vec<ProviderIdentity>,
    connections: HashMap<ProviderIdentity, ProviderConnection>,
}

impl ConnectionTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a provider at the lowest priority, in state `Connecting`.
    ///
    /// Returns `false` if the identity is already present; identities are
    /// never reused within a session.
    pub fn insert(&mut self, identity: ProviderIdentity, sink: Arc<dyn ConnectionSink>) -> bool {
        if self.connections.contains_key(&identity) {
            return false;
        }
        self.priority.push(identity.clone());
        self.connections
            .insert(identity.clone(), ProviderConnection::new(identity, sink));
        true
    }

    pub fn len(&self) -> usize {
        self.priority.len()
    }

    pub fn is_empty(&self) -> bool {
        self.priority.is_empty()
    }

    pub fn contains(&self, identity: &ProviderIdentity) -> bool {
        self.connections.contains_key(identity)
    }

    pub fn get(&self, identity: &ProviderIdentity) -> Option<&ProviderConnection> {
        self.connections.get(identity)
    }

    pub fn state_of(&self, identity: &ProviderIdentity) -> Option<ConnectionState> {
        self.connections.get(identity).map(|c| c.state)
    }

    /// Identities in priority order.
    pub fn priority(&self) -> &[ProviderIdentity] {
        &self.priority
    }

    /// Store `handle` and move the record to `Connected`.
    ///
    /// Returns the previous state, or `None` if the identity is unknown
    /// (e.g. the session was stopped while the bind was in flight).
    pub fn mark_connected(
        &mut self,
        identity: &ProviderIdentity,
        handle: Arc<dyn CarStatsProvider>,
    ) -> Option<ConnectionState> {
        let conn = self.connections.get_mut(identity)?;
        let previous = conn.state;
        conn.state = ConnectionState::Connected;
        conn.handle = Some(handle);
        conn.connects += 1;
        Some(previous)
    }

    /// Remember the callback registered with a connected provider.
    pub fn set_callback(&mut self, identity: &ProviderIdentity, callback: RegisteredCallback) {
        if let Some(conn) = self.connections.get_mut(identity) {
            conn.callback = Some(callback);
        }
    }

    /// Clear the handle and move a `Connected` record to `Disconnected`.
    ///
    /// A record that never connected stays `Connecting`. Returns the
    /// previous state, or `None` for an unknown identity.
    pub fn mark_disconnected(&mut self, identity: &ProviderIdentity) -> Option<ConnectionState> {
        let conn = self.connections.get_mut(identity)?;
        let previous = conn.state;
        if previous == ConnectionState::Connected {
            conn.state = ConnectionState::Disconnected;
            conn.handle = None;
            conn.callback = None;
            conn.disconnects += 1;
        }
        Some(previous)
    }

    /// Handles of every `Connected` provider, in priority order.
    pub fn connected(&self) -> Vec<(ProviderIdentity, Arc<dyn CarStatsProvider>)> {
        self.priority
            .iter()
            .filter_map(|id| {
                let conn = self.connections.get(id)?;
                match (conn.state, &conn.handle) {
                    (ConnectionState::Connected, Some(handle)) => {
                        Some((id.clone(), Arc::clone(handle)))
                    }
                    _ => None,
                }
            })
            .collect()
    }

    /// Records in priority order.
    pub fn iter(&self) -> impl Iterator<Item = &ProviderConnection> {
        self.priority
            .iter()
            .filter_map(|id| self.connections.get(id))
    }

    /// Empty the table in one step and hand back the records, in priority
    /// order, each forced to `Disconnected` with its handle released.
    pub fn drain(&mut self) -> Vec<ProviderConnection> {
        let table = std::mem::take(self);
        let mut connections = table.connections;
        table
            .priority
            .iter()
            .filter_map(|id| connections.remove(id))
            .collect()
    }
}

impl ProviderConnection {
    /// Final transition at teardown. Returns the handle and callback that
    /// were live, so the caller can unregister best-effort.
    pub fn close(
        &mut self,
    ) -> Option<(Arc<dyn CarStatsProvider>, RegisteredCallback)> {
        let was_connected = self.state == ConnectionState::Connected;
        self.state = ConnectionState::Disconnected;
        let handle = self.handle.take();
        let callback = self.callback.take();
        match (was_connected, handle, callback) {
            (true, Some(handle), Some(callback)) => Some((handle, callback)),
            _ => None,
        }
    }
}
