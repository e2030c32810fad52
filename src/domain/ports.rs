//! Domain Ports - Core trait definitions for the sidecar
//!
//! These traits define the boundaries between the instance delegates and
//! external systems: the CQL session, the connection-level host listeners
//! and the version-specific storage adapters.

use crate::error::{Error, Result};
use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Reads the instance's own release version and partitioner
pub const LOCAL_SETTINGS_QUERY: &str = "select release_version, partitioner from system.local";

// =============================================================================
// Node Settings
// =============================================================================

/// Settings captured from the instance during the most recent successful probe
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeSettings {
    pub release_version: String,
    pub partitioner: String,
}

impl NodeSettings {
    pub fn new(release_version: impl Into<String>, partitioner: impl Into<String>) -> Self {
        Self {
            release_version: release_version.into(),
            partitioner: partitioner.into(),
        }
    }

    /// Build settings from the result of [`LOCAL_SETTINGS_QUERY`].
    ///
    /// No row means the instance did not describe itself; a row missing either
    /// column is rejected so the settings are never partially populated.
    pub fn from_rows(rows: &[Row]) -> Result<Option<Self>> {
        let Some(row) = rows.first() else {
            return Ok(None);
        };

        let release_version = row
            .get_string("release_version")?
            .ok_or_else(|| Error::Protocol("system.local row without release_version".into()))?;
        let partitioner = row
            .get_string("partitioner")?
            .ok_or_else(|| Error::Protocol("system.local row without partitioner".into()))?;

        Ok(Some(Self {
            release_version,
            partitioner,
        }))
    }
}

// =============================================================================
// Query Rows
// =============================================================================

/// A single result row with named, raw cells
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Row {
    columns: Vec<(String, Option<Bytes>)>,
}

impl Row {
    pub fn new(columns: Vec<(String, Option<Bytes>)>) -> Self {
        Self { columns }
    }

    /// Build a row of text cells
    pub fn from_text<'a>(cells: impl IntoIterator<Item = (&'a str, &'a str)>) -> Self {
        Self {
            columns: cells
                .into_iter()
                .map(|(name, value)| (name.to_string(), Some(Bytes::copy_from_slice(value.as_bytes()))))
                .collect(),
        }
    }

    /// Decode a text column. `Ok(None)` for unknown columns and null cells.
    pub fn get_string(&self, name: &str) -> Result<Option<String>> {
        let Some((_, cell)) = self.columns.iter().find(|(column, _)| column == name) else {
            return Ok(None);
        };

        match cell {
            Some(bytes) => String::from_utf8(bytes.to_vec())
                .map(Some)
                .map_err(|_| Error::Protocol(format!("column {} is not valid UTF-8", name))),
            None => Ok(None),
        }
    }

    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|(name, _)| name.as_str())
    }
}

// =============================================================================
// Host Events
// =============================================================================

/// Kind of host state change reported by the connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HostEventKind {
    Added,
    Up,
    Down,
    Removed,
}

/// A host state change
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HostEvent {
    pub kind: HostEventKind,
    pub address: SocketAddr,
}

impl HostEvent {
    pub fn new(kind: HostEventKind, address: SocketAddr) -> Self {
        Self { kind, address }
    }
}

type HostCallback = Arc<dyn Fn(SocketAddr) + Send + Sync>;

/// Narrow observer registered with a session: one optional callback per event kind
#[derive(Clone, Default)]
pub struct HostListener {
    on_add: Option<HostCallback>,
    on_up: Option<HostCallback>,
    on_down: Option<HostCallback>,
    on_remove: Option<HostCallback>,
}

impl HostListener {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_add(mut self, f: impl Fn(SocketAddr) + Send + Sync + 'static) -> Self {
        self.on_add = Some(Arc::new(f));
        self
    }

    pub fn on_up(mut self, f: impl Fn(SocketAddr) + Send + Sync + 'static) -> Self {
        self.on_up = Some(Arc::new(f));
        self
    }

    pub fn on_down(mut self, f: impl Fn(SocketAddr) + Send + Sync + 'static) -> Self {
        self.on_down = Some(Arc::new(f));
        self
    }

    pub fn on_remove(mut self, f: impl Fn(SocketAddr) + Send + Sync + 'static) -> Self {
        self.on_remove = Some(Arc::new(f));
        self
    }

    /// Dispatch an event to the matching callback, if any
    pub fn notify(&self, event: &HostEvent) {
        let callback = match event.kind {
            HostEventKind::Added => &self.on_add,
            HostEventKind::Up => &self.on_up,
            HostEventKind::Down => &self.on_down,
            HostEventKind::Removed => &self.on_remove,
        };
        if let Some(callback) = callback {
            callback(event.address);
        }
    }
}

impl std::fmt::Debug for HostListener {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostListener")
            .field("on_add", &self.on_add.is_some())
            .field("on_up", &self.on_up.is_some())
            .field("on_down", &self.on_down.is_some())
            .field("on_remove", &self.on_remove.is_some())
            .finish()
    }
}

/// Handle returned by a listener registration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(pub u64);

/// Listener table shared by session implementations
#[derive(Debug, Default)]
pub struct HostListeners {
    next_id: AtomicU64,
    listeners: RwLock<Vec<(ListenerId, HostListener)>>,
}

impl HostListeners {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, listener: HostListener) -> ListenerId {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.listeners.write().push((id, listener));
        id
    }

    /// Returns false when the id was not registered
    pub fn unregister(&self, id: ListenerId) -> bool {
        let mut listeners = self.listeners.write();
        let before = listeners.len();
        listeners.retain(|(registered, _)| *registered != id);
        listeners.len() != before
    }

    pub fn len(&self) -> usize {
        self.listeners.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Notify every listener. Callbacks run outside the table lock so they may
    /// register or unregister listeners themselves.
    pub fn notify(&self, event: &HostEvent) {
        let snapshot: Vec<HostListener> = self
            .listeners
            .read()
            .iter()
            .map(|(_, listener)| listener.clone())
            .collect();
        for listener in snapshot {
            listener.notify(event);
        }
    }
}

// =============================================================================
// Query Session Ports
// =============================================================================

/// A connected query session to one local instance
#[async_trait]
pub trait QuerySession: Send + Sync {
    /// Address of the connected instance
    fn endpoint(&self) -> String;

    /// Execute a single statement and return its rows
    async fn execute(&self, query: &str) -> Result<Vec<Row>>;

    /// Register a host-state listener on the underlying connection
    fn register(&self, listener: HostListener) -> ListenerId;

    /// Unregister a listener; returns false when it was not registered
    fn unregister(&self, id: ListenerId) -> bool;

    /// Whether the connection has been closed or lost
    fn is_closed(&self) -> bool;

    /// Close the session
    async fn close(&self);
}

/// Owns the lazily created session to the local instance
#[async_trait]
pub trait SessionProvider: Send + Sync {
    /// Current session, connecting if needed. `None` when the instance is unreachable.
    async fn local_session(&self) -> Option<Arc<dyn QuerySession>>;

    /// Close any open session
    async fn close(&self);
}

// =============================================================================
// Storage Operations Port
// =============================================================================

/// Options passed to a snapshot, for example `ttl` or `skipFlush`
pub type SnapshotOptions = BTreeMap<String, String>;

/// Interactions with the storage system of an instance
#[async_trait]
pub trait StorageOperations: Send + Sync {
    /// Take a snapshot of `keyspace.table` tagged with `tag`.
    ///
    /// `tag`, `keyspace` and `table` must be non-empty; violating that fails
    /// with [`Error::InvalidArgument`] before any remote call is made.
    async fn take_snapshot(
        &self,
        tag: &str,
        keyspace: &str,
        table: &str,
        options: Option<&SnapshotOptions>,
    ) -> Result<()>;
}

// =============================================================================
// Version-Specific Adapter Port
// =============================================================================

/// A version-bound implementation of the instance capabilities
#[async_trait]
pub trait CassandraAdapter: Send + Sync {
    /// Adapter name, used for logging
    fn name(&self) -> &str;

    /// Storage operations served by this adapter
    fn storage_operations(&self) -> Arc<dyn StorageOperations>;

    /// Read the instance settings through the adapter's session holder
    async fn settings(&self) -> Result<Option<NodeSettings>>;
}

// =============================================================================
// Type Aliases for Arc'd Traits
// =============================================================================

pub type QuerySessionRef = Arc<dyn QuerySession>;
pub type SessionProviderRef = Arc<dyn SessionProvider>;
pub type StorageOperationsRef = Arc<dyn StorageOperations>;
pub type CassandraAdapterRef = Arc<dyn CassandraAdapter>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn addr() -> SocketAddr {
        "127.0.0.1:9042".parse().unwrap()
    }

    #[test]
    fn test_settings_from_rows() {
        let rows = vec![Row::from_text([
            ("release_version", "4.0.1"),
            ("partitioner", "org.apache.cassandra.dht.Murmur3Partitioner"),
        ])];
        let settings = NodeSettings::from_rows(&rows).unwrap().unwrap();
        assert_eq!(settings.release_version, "4.0.1");
        assert_eq!(settings.partitioner, "org.apache.cassandra.dht.Murmur3Partitioner");
    }

    #[test]
    fn test_settings_absent_without_row() {
        assert!(NodeSettings::from_rows(&[]).unwrap().is_none());
    }

    #[test]
    fn test_settings_never_partial() {
        let rows = vec![Row::new(vec![
            ("release_version".to_string(), Some(Bytes::from_static(b"4.0.0"))),
            ("partitioner".to_string(), None),
        ])];
        assert!(NodeSettings::from_rows(&rows).is_err());
    }

    #[test]
    fn test_settings_serialize_camel_case() {
        let json = serde_json::to_value(NodeSettings::new("4.0.0", "Murmur3Partitioner")).unwrap();
        assert_eq!(json["releaseVersion"], "4.0.0");
        assert_eq!(json["partitioner"], "Murmur3Partitioner");
    }

    #[test]
    fn test_listener_dispatches_by_kind() {
        let ups = Arc::new(AtomicUsize::new(0));
        let downs = Arc::new(AtomicUsize::new(0));
        let (u, d) = (ups.clone(), downs.clone());
        let listener = HostListener::new()
            .on_up(move |_| {
                u.fetch_add(1, Ordering::SeqCst);
            })
            .on_down(move |_| {
                d.fetch_add(1, Ordering::SeqCst);
            });

        listener.notify(&HostEvent::new(HostEventKind::Up, addr()));
        listener.notify(&HostEvent::new(HostEventKind::Down, addr()));
        listener.notify(&HostEvent::new(HostEventKind::Added, addr()));

        assert_eq!(ups.load(Ordering::SeqCst), 1);
        assert_eq!(downs.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_listener_table_unregister_once() {
        let listeners = HostListeners::new();
        let id = listeners.register(HostListener::new());
        assert_eq!(listeners.len(), 1);
        assert!(listeners.unregister(id));
        assert!(!listeners.unregister(id));
        assert!(listeners.is_empty());
    }
}
