//! Live connection registry.
//!
//! The registry is the single source of truth for connection liveness.
//! Subscriptions refer back to their connection by `socket_id` only, so
//! cascade teardown can never leave a dangling reference: once a socket is
//! unregistered, lookups simply miss.

use bytes::Bytes;
use dashmap::mapref::entry::Entry;
use dashmap::{DashMap, DashSet};
use std::sync::Arc;
use std::time::SystemTime;
use tokio::sync::mpsc;
use tracing::debug;

/// Generate a socket identifier in the `<number>.<number>` shape clients
/// expect.
fn generate_socket_id() -> String {
    format!("{}.{}", rand::random::<u32>(), rand::random::<u32>())
}

/// One live client connection.
///
/// The transport itself is opaque to the core: all it sees is a sink of
/// encoded frames. Writes never block; frames are queued to the connection's
/// outbound channel and the transport task drains them.
#[derive(Debug)]
pub struct Connection {
    socket_id: String,
    created_at: SystemTime,
    sender: mpsc::UnboundedSender<Bytes>,
}

impl Connection {
    fn new(socket_id: String, sender: mpsc::UnboundedSender<Bytes>) -> Self {
        Self {
            socket_id,
            created_at: SystemTime::now(),
            sender,
        }
    }

    /// Unique identifier assigned at accept time.
    #[must_use]
    pub fn socket_id(&self) -> &str {
        &self.socket_id
    }

    /// When the connection was registered.
    #[must_use]
    pub fn created_at(&self) -> SystemTime {
        self.created_at
    }

    /// Queue an encoded frame for delivery.
    ///
    /// Returns `false` if the transport side has already gone away; the
    /// caller treats that as a per-connection delivery failure.
    pub fn send(&self, frame: Bytes) -> bool {
        self.sender.send(frame).is_ok()
    }

    /// Whether the transport is still draining the outbound queue.
    #[must_use]
    pub fn is_open(&self) -> bool {
        !self.sender.is_closed()
    }
}

/// Registry of live connections and their channel memberships.
///
/// Memberships are tracked per connection so that teardown is proportional
/// to the channels the connection actually joined.
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    connections: DashMap<String, Arc<Connection>>,
    memberships: DashMap<String, DashSet<String>>,
}

impl ConnectionRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new connection around the given outbound sink.
    ///
    /// Allocates a fresh unique socket ID, retrying on the unlikely
    /// collision so uniqueness holds under concurrent registration.
    pub fn register(&self, sender: mpsc::UnboundedSender<Bytes>) -> Arc<Connection> {
        loop {
            let socket_id = generate_socket_id();
            if let Entry::Vacant(slot) = self.connections.entry(socket_id.clone()) {
                let connection = Arc::new(Connection::new(socket_id.clone(), sender));
                slot.insert(Arc::clone(&connection));
                debug!(socket = %socket_id, "Connection registered");
                return connection;
            }
        }
    }

    /// Remove a connection, returning it together with the channels it was
    /// subscribed to so the caller can cascade the cleanup.
    ///
    /// Idempotent: unregistering an absent socket is a no-op.
    pub fn unregister(&self, socket_id: &str) -> Option<(Arc<Connection>, Vec<String>)> {
        let (_, connection) = self.connections.remove(socket_id)?;
        let channels = self
            .memberships
            .remove(socket_id)
            .map(|(_, set)| set.into_iter().collect())
            .unwrap_or_default();
        debug!(socket = %socket_id, "Connection unregistered");
        Some((connection, channels))
    }

    /// Look up a live connection by socket ID.
    #[must_use]
    pub fn lookup(&self, socket_id: &str) -> Option<Arc<Connection>> {
        self.connections.get(socket_id).map(|c| Arc::clone(&c))
    }

    /// Record that a connection joined a channel.
    pub fn track(&self, socket_id: &str, channel: &str) {
        self.memberships
            .entry(socket_id.to_string())
            .or_default()
            .insert(channel.to_string());
    }

    /// Record that a connection left a channel.
    pub fn untrack(&self, socket_id: &str, channel: &str) {
        if let Some(channels) = self.memberships.get(socket_id) {
            channels.remove(channel);
        }
    }

    /// Channels a connection is currently subscribed to.
    #[must_use]
    pub fn channels_of(&self, socket_id: &str) -> Vec<String> {
        self.memberships
            .get(socket_id)
            .map(|set| set.iter().map(|c| c.clone()).collect())
            .unwrap_or_default()
    }

    /// Number of live connections.
    #[must_use]
    pub fn len(&self) -> usize {
        self.connections.len()
    }

    /// Whether no connections are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }
}
