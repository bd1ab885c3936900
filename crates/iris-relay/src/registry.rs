//! Connection registry.
//!
//! Tracks every live connection by identity. The registry is an
//! explicitly owned object injected into the relay and the accept path,
//! never a process-wide singleton, so each test can construct a fresh
//! one. Invariant: an identity present here always refers to a live,
//! non-closed connection; removal is atomic with teardown so fan-out is
//! never attempted against a dead entry it could not have snapshotted.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use crate::connection::{Connection, ConnectionId};
use crate::error::{RelayError, RelayResult};

/// Counters describing registry traffic.
#[derive(Debug, Clone, Default)]
pub struct RegistryStats {
    /// Currently registered connections.
    pub active: usize,
    /// Connections registered over the registry's lifetime.
    pub total_registered: usize,
    /// Registrations refused (capacity, shutdown, duplicate).
    pub total_rejected: usize,
    /// Connections unregistered over the registry's lifetime.
    pub total_unregistered: usize,
}

/// The set of live connections, keyed by identity.
pub struct Registry {
    connections: DashMap<ConnectionId, Arc<Connection>>,
    max_connections: usize,
    total_registered: AtomicUsize,
    total_rejected: AtomicUsize,
    total_unregistered: AtomicUsize,
    shutdown_tx: broadcast::Sender<()>,
    is_shutdown: AtomicBool,
}

impl Registry {
    /// Create a registry bounded at `max_connections`.
    pub fn new(max_connections: usize) -> Arc<Self> {
        let (shutdown_tx, _) = broadcast::channel(1);
        Arc::new(Self {
            connections: DashMap::new(),
            max_connections,
            total_registered: AtomicUsize::new(0),
            total_rejected: AtomicUsize::new(0),
            total_unregistered: AtomicUsize::new(0),
            shutdown_tx,
            is_shutdown: AtomicBool::new(false),
        })
    }

    /// Insert a connection under its identity.
    ///
    /// A duplicate identity is an internal invariant violation (identity
    /// assignment never reuses IDs): the call fails, the existing entry
    /// is untouched, and the fault is logged at error level.
    pub fn register(&self, connection: Arc<Connection>) -> RelayResult<()> {
        if self.is_shutdown.load(Ordering::SeqCst) {
            self.total_rejected.fetch_add(1, Ordering::Relaxed);
            return Err(RelayError::at_capacity("registry is shutting down"));
        }

        if self.connections.len() >= self.max_connections {
            self.total_rejected.fetch_add(1, Ordering::Relaxed);
            warn!(
                max = self.max_connections,
                "connection limit reached, rejecting registration"
            );
            return Err(RelayError::at_capacity(format!(
                "maximum connections ({}) reached",
                self.max_connections
            )));
        }

        let id = connection.id();
        match self.connections.entry(id) {
            Entry::Occupied(_) => {
                self.total_rejected.fetch_add(1, Ordering::Relaxed);
                error!(connection_id = %id, "duplicate identity, registry invariant violated");
                Err(RelayError::duplicate_identity(id))
            }
            Entry::Vacant(slot) => {
                slot.insert(connection);
                self.total_registered.fetch_add(1, Ordering::Relaxed);
                debug!(connection_id = %id, total = self.connections.len(), "connection registered");
                Ok(())
            }
        }
    }

    /// Remove a connection by identity.
    ///
    /// Idempotent: removing an absent identity is a successful no-op.
    pub fn unregister(&self, id: ConnectionId) -> Option<Arc<Connection>> {
        let removed = self.connections.remove(&id).map(|(_, conn)| conn);
        if removed.is_some() {
            self.total_unregistered.fetch_add(1, Ordering::Relaxed);
            debug!(connection_id = %id, total = self.connections.len(), "connection unregistered");
        }
        removed
    }

    /// Snapshot the current membership for fan-out.
    ///
    /// The returned list is frozen at call time: connections registered
    /// or removed during iteration are not observed, so every member
    /// live at snapshot time is attempted and no later arrival is.
    pub fn broadcast_targets(&self, exclude: Option<ConnectionId>) -> Vec<Arc<Connection>> {
        self.connections
            .iter()
            .filter(|entry| exclude != Some(*entry.key()))
            .map(|entry| Arc::clone(entry.value()))
            .collect()
    }

    /// Look up a connection by identity.
    pub fn get(&self, id: ConnectionId) -> Option<Arc<Connection>> {
        self.connections.get(&id).map(|e| Arc::clone(e.value()))
    }

    /// Whether an identity is currently registered.
    pub fn contains(&self, id: ConnectionId) -> bool {
        self.connections.contains_key(&id)
    }

    /// Number of registered connections.
    pub fn len(&self) -> usize {
        self.connections.len()
    }

    /// Whether the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    /// All registered identities.
    pub fn connection_ids(&self) -> Vec<ConnectionId> {
        self.connections.iter().map(|e| *e.key()).collect()
    }

    /// Traffic counters.
    pub fn stats(&self) -> RegistryStats {
        RegistryStats {
            active: self.connections.len(),
            total_registered: self.total_registered.load(Ordering::Relaxed),
            total_rejected: self.total_rejected.load(Ordering::Relaxed),
            total_unregistered: self.total_unregistered.load(Ordering::Relaxed),
        }
    }

    /// Subscribe to the shutdown signal.
    pub fn shutdown_receiver(&self) -> broadcast::Receiver<()> {
        self.shutdown_tx.subscribe()
    }

    /// Whether shutdown has been triggered.
    pub fn is_shutdown(&self) -> bool {
        self.is_shutdown.load(Ordering::SeqCst)
    }

    /// Refuse new registrations and notify every listener to close.
    ///
    /// Returns the number of connections that were registered when the
    /// signal went out.
    pub fn shutdown(&self) -> usize {
        if self.is_shutdown.swap(true, Ordering::SeqCst) {
            return 0;
        }
        let count = self.connections.len();
        info!(connections = count, "registry shutting down");
        let _ = self.shutdown_tx.send(());
        count
    }
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("active", &self.connections.len())
            .field("max_connections", &self.max_connections)
            .finish_non_exhaustive()
    }
}
