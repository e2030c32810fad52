//! Test doubles shared across module tests

use crate::cluster::{CassandraAdapterDelegate, InstanceMetadata};
use crate::cql::frame::tests::{error_body, event_body, response, rows_body};
use crate::cql::frame::{FrameHeader, Opcode, EVENT_STREAM, HEADER_LEN};
use crate::cql::CqlConfig;
use crate::domain::ports::{
    CassandraAdapter, HostEvent, HostEventKind, HostListener, HostListeners, ListenerId,
    NodeSettings, QuerySession, Row, SessionProvider, SnapshotOptions, StorageOperations,
};
use crate::error::{Error, Result};
use crate::jmx::{
    JmxClient, JmxConfig, ManagedValue, ManagementConnection, ManagementConnector, ObjectName,
};
use crate::version::{AdapterFactory, CassandraVersion, VersionProvider};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

pub const PARTITIONER: &str = "org.apache.cassandra.dht.Murmur3Partitioner";

// =============================================================================
// Scripted Query Session
// =============================================================================

/// Behaviour shared by every session a provider hands out
#[derive(Debug)]
struct Script {
    version: Mutex<String>,
    reachable: AtomicBool,
    disconnected: AtomicBool,
    row_missing: AtomicBool,
    delay: Mutex<Duration>,
    queries: AtomicUsize,
}

pub struct FakeSession {
    script: Arc<Script>,
    listeners: HostListeners,
    closed: AtomicBool,
}

impl FakeSession {
    pub fn queries(&self) -> usize {
        self.script.queries.load(Ordering::SeqCst)
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.len()
    }

    /// Deliver a host event to the registered listeners
    pub fn fire(&self, kind: HostEventKind, address: SocketAddr) {
        self.listeners.notify(&HostEvent::new(kind, address));
    }
}

#[async_trait]
impl QuerySession for FakeSession {
    fn endpoint(&self) -> String {
        "127.0.0.1:9042".to_string()
    }

    async fn execute(&self, _query: &str) -> Result<Vec<Row>> {
        self.script.queries.fetch_add(1, Ordering::SeqCst);
        let delay = *self.script.delay.lock();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        if self.closed.load(Ordering::SeqCst) || self.script.disconnected.load(Ordering::SeqCst) {
            return Err(Error::SessionUnavailable {
                endpoint: self.endpoint(),
                reason: "connection reset".into(),
            });
        }
        if self.script.row_missing.load(Ordering::SeqCst) {
            return Ok(Vec::new());
        }

        let version = self.script.version.lock().clone();
        Ok(vec![Row::from_text([
            ("release_version", version.as_str()),
            ("partitioner", PARTITIONER),
        ])])
    }

    fn register(&self, listener: HostListener) -> ListenerId {
        self.listeners.register(listener)
    }

    fn unregister(&self, id: ListenerId) -> bool {
        self.listeners.unregister(id)
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

/// Hands out [`FakeSession`]s, opening a new one after the current one closed
pub struct FakeSessionProvider {
    script: Arc<Script>,
    sessions: Mutex<Vec<Arc<FakeSession>>>,
}

impl FakeSessionProvider {
    pub fn with_version(version: &str) -> Arc<Self> {
        Arc::new(Self {
            script: Arc::new(Script {
                version: Mutex::new(version.to_string()),
                reachable: AtomicBool::new(true),
                disconnected: AtomicBool::new(false),
                row_missing: AtomicBool::new(false),
                delay: Mutex::new(Duration::ZERO),
                queries: AtomicUsize::new(0),
            }),
            sessions: Mutex::new(Vec::new()),
        })
    }

    /// Most recently opened session
    pub fn session(&self) -> Arc<FakeSession> {
        self.sessions
            .lock()
            .last()
            .cloned()
            .expect("no session opened yet")
    }

    pub fn set_version(&self, version: &str) {
        *self.script.version.lock() = version.to_string();
    }

    /// Whether new sessions can be opened
    pub fn set_reachable(&self, reachable: bool) {
        self.script.reachable.store(reachable, Ordering::SeqCst);
    }

    /// Make queries on every session fail at the transport level
    pub fn set_disconnected(&self, disconnected: bool) {
        self.script.disconnected.store(disconnected, Ordering::SeqCst);
    }

    pub fn set_row_missing(&self, missing: bool) {
        self.script.row_missing.store(missing, Ordering::SeqCst);
    }

    pub fn set_query_delay(&self, delay: Duration) {
        *self.script.delay.lock() = delay;
    }

    pub fn queries(&self) -> usize {
        self.script.queries.load(Ordering::SeqCst)
    }

    pub fn connects(&self) -> usize {
        self.sessions.lock().len()
    }

    /// Listener registrations summed over every session ever opened
    pub fn total_listener_count(&self) -> usize {
        self.sessions.lock().iter().map(|s| s.listener_count()).sum()
    }
}

#[async_trait]
impl SessionProvider for FakeSessionProvider {
    async fn local_session(&self) -> Option<Arc<dyn QuerySession>> {
        if !self.script.reachable.load(Ordering::SeqCst) {
            return None;
        }
        let mut sessions = self.sessions.lock();
        if let Some(current) = sessions.last() {
            if !current.is_closed() {
                return Some(current.clone());
            }
        }
        let session = Arc::new(FakeSession {
            script: self.script.clone(),
            listeners: HostListeners::new(),
            closed: AtomicBool::new(false),
        });
        sessions.push(session.clone());
        Some(session)
    }

    async fn close(&self) {
        let current = self.sessions.lock().last().cloned();
        if let Some(session) = current {
            session.close().await;
        }
    }
}

// =============================================================================
// Management Connector
// =============================================================================

#[derive(Debug, Clone, PartialEq)]
pub enum RemoteCall {
    Read {
        object: String,
        attribute: String,
    },
    Invoke {
        object: String,
        operation: String,
        args: Vec<ManagedValue>,
    },
}

#[derive(Default)]
struct RemoteState {
    attributes: HashMap<String, ManagedValue>,
    failing_operations: HashMap<String, String>,
    calls: Vec<RemoteCall>,
}

/// In-memory management endpoint recording every call
pub struct FakeConnector {
    state: Arc<Mutex<RemoteState>>,
    unreachable: Arc<AtomicBool>,
    disconnect: Arc<AtomicBool>,
    connects: AtomicUsize,
}

impl FakeConnector {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            state: Arc::new(Mutex::new(RemoteState::default())),
            unreachable: Arc::new(AtomicBool::new(false)),
            disconnect: Arc::new(AtomicBool::new(false)),
            connects: AtomicUsize::new(0),
        })
    }

    pub fn set_attribute(&self, attribute: &str, value: ManagedValue) {
        self.state.lock().attributes.insert(attribute.to_string(), value);
    }

    pub fn fail_operation(&self, operation: &str, reason: &str) {
        self.state
            .lock()
            .failing_operations
            .insert(operation.to_string(), reason.to_string());
    }

    pub fn set_reachable(&self, reachable: bool) {
        self.unreachable.store(!reachable, Ordering::SeqCst);
    }

    /// Make calls on open connections fail at the transport level
    pub fn fail_calls_with_disconnect(&self, fail: bool) {
        self.disconnect.store(fail, Ordering::SeqCst);
    }

    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn calls(&self) -> Vec<RemoteCall> {
        self.state.lock().calls.clone()
    }
}

#[async_trait]
impl ManagementConnector for FakeConnector {
    async fn connect(&self, config: &JmxConfig) -> Result<Arc<dyn ManagementConnection>> {
        if self.unreachable.load(Ordering::SeqCst) {
            return Err(Error::ManagementUnavailable {
                endpoint: config.endpoint(),
                reason: "connection refused".into(),
            });
        }
        self.connects.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(FakeConnection {
            endpoint: config.endpoint(),
            state: self.state.clone(),
            disconnect: self.disconnect.clone(),
        }))
    }
}

struct FakeConnection {
    endpoint: String,
    state: Arc<Mutex<RemoteState>>,
    disconnect: Arc<AtomicBool>,
}

impl FakeConnection {
    fn check_link(&self) -> Result<()> {
        if self.disconnect.load(Ordering::SeqCst) {
            return Err(Error::ManagementUnavailable {
                endpoint: self.endpoint.clone(),
                reason: "connection reset".into(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl ManagementConnection for FakeConnection {
    async fn read_attribute(&self, object: &ObjectName, attribute: &str) -> Result<ManagedValue> {
        let mut state = self.state.lock();
        state.calls.push(RemoteCall::Read {
            object: object.to_string(),
            attribute: attribute.to_string(),
        });
        self.check_link()?;
        state
            .attributes
            .get(attribute)
            .cloned()
            .ok_or_else(|| Error::RemoteInvocation {
                object_name: object.to_string(),
                member: attribute.to_string(),
                reason: "attribute not found".into(),
            })
    }

    async fn invoke(
        &self,
        object: &ObjectName,
        operation: &str,
        _signature: &[&str],
        args: Vec<ManagedValue>,
    ) -> Result<ManagedValue> {
        let mut state = self.state.lock();
        state.calls.push(RemoteCall::Invoke {
            object: object.to_string(),
            operation: operation.to_string(),
            args,
        });
        self.check_link()?;
        match state.failing_operations.get(operation) {
            Some(reason) => Err(Error::RemoteInvocation {
                object_name: object.to_string(),
                member: operation.to_string(),
                reason: reason.clone(),
            }),
            None => Ok(ManagedValue::Null),
        }
    }
}

// =============================================================================
// Adapter Factory
// =============================================================================

struct NoopStorage;

#[async_trait]
impl StorageOperations for NoopStorage {
    async fn take_snapshot(
        &self,
        _tag: &str,
        _keyspace: &str,
        _table: &str,
        _options: Option<&SnapshotOptions>,
    ) -> Result<()> {
        Ok(())
    }
}

struct CountingAdapter {
    name: String,
}

#[async_trait]
impl CassandraAdapter for CountingAdapter {
    fn name(&self) -> &str {
        &self.name
    }

    fn storage_operations(&self) -> Arc<dyn StorageOperations> {
        Arc::new(NoopStorage)
    }

    async fn settings(&self) -> Result<Option<NodeSettings>> {
        Ok(None)
    }
}

/// Factory that counts the adapters it builds
pub struct CountingFactory {
    name: String,
    min_version: CassandraVersion,
    created: AtomicUsize,
}

impl CountingFactory {
    pub fn new(name: &str, min_version: CassandraVersion) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            min_version,
            created: AtomicUsize::new(0),
        })
    }

    pub fn created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }
}

impl AdapterFactory for CountingFactory {
    fn min_version(&self) -> CassandraVersion {
        self.min_version.clone()
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn create(
        &self,
        _sessions: Arc<dyn SessionProvider>,
        _jmx_client: Arc<JmxClient>,
    ) -> Arc<dyn CassandraAdapter> {
        self.created.fetch_add(1, Ordering::SeqCst);
        Arc::new(CountingAdapter {
            name: self.name.clone(),
        })
    }
}

// =============================================================================
// Instances
// =============================================================================

/// An instance backed by a scripted session and an in-memory management endpoint
pub fn instance(id: u32, version: &str) -> (InstanceMetadata, Arc<FakeSessionProvider>) {
    instance_with_connector(id, version, FakeConnector::new())
}

pub fn instance_with_connector(
    id: u32,
    version: &str,
    connector: Arc<FakeConnector>,
) -> (InstanceMetadata, Arc<FakeSessionProvider>) {
    let sessions = FakeSessionProvider::with_version(version);
    let jmx = JmxConfig::default();
    let jmx_client = JmxClient::new(jmx.clone(), connector);
    let delegate = CassandraAdapterDelegate::new(
        id,
        sessions.clone(),
        jmx_client,
        VersionProvider::with_defaults(),
    );
    let instance = InstanceMetadata::new(
        id,
        CqlConfig::default(),
        vec!["/var/lib/cassandra/data".to_string()],
        jmx,
        delegate,
    );
    (instance, sessions)
}

// =============================================================================
// Mock CQL Server
// =============================================================================

struct MockCqlState {
    release_version: Mutex<String>,
    queries: AtomicUsize,
    connections: AtomicUsize,
    writers: Mutex<Vec<Arc<tokio::sync::Mutex<OwnedWriteHalf>>>>,
}

/// Speaks just enough of the native protocol to serve `system.local`
pub struct MockCqlServer {
    addr: SocketAddr,
    state: Arc<MockCqlState>,
    accept: JoinHandle<()>,
}

impl MockCqlServer {
    pub async fn start(release_version: &str) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let state = Arc::new(MockCqlState {
            release_version: Mutex::new(release_version.to_string()),
            queries: AtomicUsize::new(0),
            connections: AtomicUsize::new(0),
            writers: Mutex::new(Vec::new()),
        });

        let accept_state = state.clone();
        let accept = tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                accept_state.connections.fetch_add(1, Ordering::SeqCst);
                let (read, write) = stream.into_split();
                let writer = Arc::new(tokio::sync::Mutex::new(write));
                accept_state.writers.lock().push(writer.clone());
                tokio::spawn(serve_cql(read, writer, accept_state.clone()));
            }
        });

        Self { addr, state, accept }
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn queries(&self) -> usize {
        self.state.queries.load(Ordering::SeqCst)
    }

    pub fn connections(&self) -> usize {
        self.state.connections.load(Ordering::SeqCst)
    }

    /// Push an EVENT frame to every open connection
    pub async fn push_event(&self, event_type: &str, change: &str, address: SocketAddr) {
        let frame = response(
            EVENT_STREAM,
            Opcode::Event,
            &event_body(event_type, change, address),
        );
        let writers = self.state.writers.lock().clone();
        for writer in writers {
            let _ = writer.lock().await.write_all(&frame).await;
        }
    }

    /// Close every open connection from the server side
    pub async fn disconnect(&self) {
        let writers: Vec<_> = self.state.writers.lock().drain(..).collect();
        for writer in writers {
            let _ = writer.lock().await.shutdown().await;
        }
    }
}

impl Drop for MockCqlServer {
    fn drop(&mut self) {
        self.accept.abort();
    }
}

async fn serve_cql(
    mut read: OwnedReadHalf,
    writer: Arc<tokio::sync::Mutex<OwnedWriteHalf>>,
    state: Arc<MockCqlState>,
) {
    loop {
        let mut header = [0u8; HEADER_LEN];
        if read.read_exact(&mut header).await.is_err() {
            return;
        }
        let Ok(header) = FrameHeader::decode(&header) else {
            return;
        };
        let mut body = vec![0u8; header.length];
        if read.read_exact(&mut body).await.is_err() {
            return;
        }

        let reply = match header.opcode {
            Opcode::Startup | Opcode::Register => response(header.stream, Opcode::Ready, &[]),
            Opcode::Query => {
                state.queries.fetch_add(1, Ordering::SeqCst);
                let len = i32::from_be_bytes([body[0], body[1], body[2], body[3]]) as usize;
                let query = String::from_utf8_lossy(&body[4..4 + len]).to_string();
                if query.contains("system.local") {
                    let version = state.release_version.lock().clone();
                    let rows = rows_body(
                        &["release_version", "partitioner"],
                        &[vec![Some(version.as_str()), Some(PARTITIONER)]],
                    );
                    response(header.stream, Opcode::Result, &rows)
                } else {
                    response(
                        header.stream,
                        Opcode::Error,
                        &error_body(0x2200, "unconfigured table"),
                    )
                }
            }
            _ => response(header.stream, Opcode::Error, &error_body(0x000A, "unsupported")),
        };

        if writer.lock().await.write_all(&reply).await.is_err() {
            return;
        }
    }
}
