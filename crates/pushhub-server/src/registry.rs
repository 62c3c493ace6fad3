//! Mapping from client IDs to their live connections.
//!
//! Both indexes (client → connections, connection → client) sit behind one
//! lock so every mutation and snapshot sees them consistent. A client entry
//! exists exactly while it has at least one connection.

use std::collections::HashMap;
use std::sync::Arc;

use metrics::{counter, gauge, histogram};
use parking_lot::RwLock;
use pushhub_core::{ClientId, ConnectionId};
use tracing::info;

use crate::connection::Connection;
use crate::metrics::{
    CLIENTS_ACTIVE, CONNECTION_DURATION_SECONDS, CONNECTIONS_ACTIVE, CONNECTIONS_TOTAL,
    DISCONNECTIONS_TOTAL,
};

#[derive(Default)]
struct RegistryState {
    clients: HashMap<ClientId, HashMap<ConnectionId, Arc<Connection>>>,
    owners: HashMap<ConnectionId, ClientId>,
}

impl RegistryState {
    fn remove(&mut self, connection_id: &ConnectionId) -> Option<Arc<Connection>> {
        let client_id = self.owners.remove(connection_id)?;
        let connections = self.clients.get_mut(&client_id)?;
        let connection = connections.remove(connection_id);
        if connections.is_empty() {
            let _ = self.clients.remove(&client_id);
        }
        connection
    }

    fn record_sizes(&self) {
        gauge!(CONNECTIONS_ACTIVE).set(self.owners.len() as f64);
        gauge!(CLIENTS_ACTIVE).set(self.clients.len() as f64);
    }
}

/// Source of truth for which connections are reachable in this process.
pub struct ConnectionRegistry {
    state: RwLock<RegistryState>,
    mailbox_capacity: usize,
}

impl ConnectionRegistry {
    /// Create an empty registry whose connections get `mailbox_capacity`
    /// slots each.
    pub fn new(mailbox_capacity: usize) -> Self {
        Self {
            state: RwLock::new(RegistryState::default()),
            mailbox_capacity: mailbox_capacity.max(1),
        }
    }

    /// Mailbox capacity given to new connections.
    pub fn mailbox_capacity(&self) -> usize {
        self.mailbox_capacity
    }

    /// Open a connection for `client_id`, creating the client entry if absent.
    pub fn register(&self, client_id: ClientId) -> Arc<Connection> {
        let connection = Arc::new(Connection::new(client_id.clone(), self.mailbox_capacity));
        let connection_id = connection.id().clone();
        {
            let mut state = self.state.write();
            let _ = state
                .owners
                .insert(connection_id.clone(), client_id.clone());
            let _ = state
                .clients
                .entry(client_id.clone())
                .or_default()
                .insert(connection_id.clone(), connection.clone());
            state.record_sizes();
        }
        counter!(CONNECTIONS_TOTAL).increment(1);
        info!(client_id = %client_id, connection_id = %connection_id, "connection registered");
        connection
    }

    /// Remove a connection and close it. Unknown or already removed IDs are
    /// ignored.
    pub fn unregister(&self, connection_id: &ConnectionId) {
        let removed = {
            let mut state = self.state.write();
            let removed = state.remove(connection_id);
            if removed.is_some() {
                state.record_sizes();
            }
            removed
        };
        let Some(connection) = removed else {
            return;
        };
        connection.close();
        counter!(DISCONNECTIONS_TOTAL).increment(1);
        histogram!(CONNECTION_DURATION_SECONDS).record(connection.age().as_secs_f64());
        info!(
            client_id = %connection.client_id(),
            connection_id = %connection_id,
            dropped = connection.dropped_count(),
            "connection unregistered"
        );
    }

    /// Snapshot of one client's connections.
    pub fn connections_for(&self, client_id: &ClientId) -> Vec<Arc<Connection>> {
        self.state
            .read()
            .clients
            .get(client_id)
            .map(|connections| connections.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Snapshot of every connection.
    pub fn all_connections(&self) -> Vec<Arc<Connection>> {
        self.state
            .read()
            .clients
            .values()
            .flat_map(|connections| connections.values().cloned())
            .collect()
    }

    /// Look up one connection.
    pub fn get(&self, connection_id: &ConnectionId) -> Option<Arc<Connection>> {
        let state = self.state.read();
        let client_id = state.owners.get(connection_id)?;
        state.clients.get(client_id)?.get(connection_id).cloned()
    }

    /// Whether `connection_id` is registered.
    pub fn contains(&self, connection_id: &ConnectionId) -> bool {
        self.state.read().owners.contains_key(connection_id)
    }

    /// Number of registered connections.
    pub fn connection_count(&self) -> usize {
        self.state.read().owners.len()
    }

    /// Number of clients with at least one connection.
    pub fn client_count(&self) -> usize {
        self.state.read().clients.len()
    }

    /// Remove and close every connection. Returns how many were closed.
    pub fn close_all(&self) -> usize {
        let drained = {
            let mut state = self.state.write();
            let clients = std::mem::take(&mut state.clients);
            state.owners.clear();
            state.record_sizes();
            clients
        };
        let mut closed = 0;
        for connection in drained.into_values().flat_map(HashMap::into_values) {
            connection.close();
            closed += 1;
        }
        if closed > 0 {
            counter!(DISCONNECTIONS_TOTAL).increment(closed as u64);
            info!(closed, "closed all connections");
        }
        closed
    }
}
