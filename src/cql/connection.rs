//! A single multiplexed CQL connection
//!
//! Requests are matched to responses by stream id. A background reader task
//! demultiplexes responses and dispatches pushed host events to registered
//! listeners. Losing the connection fails every in-flight request and is
//! reported to listeners as the peer going down.

use super::frame::{self, BodyReader, Frame, FrameHeader, Opcode, EVENT_STREAM, HEADER_LEN};
use crate::domain::{HostEvent, HostEventKind, HostListener, HostListeners, ListenerId, QuerySession, Row};
use crate::error::{Error, Result};
use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU16, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

const REGISTERED_EVENTS: &[&str] = &["STATUS_CHANGE", "TOPOLOGY_CHANGE"];
const MAX_STREAM_ID: u16 = i16::MAX as u16;

/// State shared with the reader task
struct Shared {
    peer: SocketAddr,
    pending: Mutex<HashMap<i16, oneshot::Sender<Frame>>>,
    listeners: HostListeners,
    closed: AtomicBool,
}

impl Shared {
    fn dispatch(&self, event: HostEvent) {
        if event.kind == HostEventKind::Down && event.address.ip() != self.peer.ip() {
            trace!("Ignoring down event for remote host {}", event.address);
            return;
        }
        self.listeners.notify(&event);
    }
}

/// A connected CQL session to one instance
pub struct CqlConnection {
    shared: Arc<Shared>,
    writer: tokio::sync::Mutex<OwnedWriteHalf>,
    next_stream: AtomicU16,
    request_timeout: Duration,
    reader: Mutex<Option<JoinHandle<()>>>,
}

impl CqlConnection {
    /// Connect, perform the startup handshake and subscribe to host events
    pub async fn connect(
        host: &str,
        port: u16,
        connect_timeout: Duration,
        request_timeout: Duration,
    ) -> Result<Arc<Self>> {
        let endpoint = format!("{}:{}", host, port);
        let unavailable = |reason: String| Error::SessionUnavailable {
            endpoint: endpoint.clone(),
            reason,
        };

        let stream = tokio::time::timeout(connect_timeout, TcpStream::connect((host, port)))
            .await
            .map_err(|_| unavailable("connect timed out".to_string()))?
            .map_err(|e| unavailable(e.to_string()))?;
        stream.set_nodelay(true).map_err(|e| unavailable(e.to_string()))?;
        let peer = stream.peer_addr().map_err(|e| unavailable(e.to_string()))?;
        let (mut read_half, mut write_half) = stream.into_split();

        let handshake = async {
            expect_ready(&mut read_half, &mut write_half, frame::startup(0)).await?;
            expect_ready(&mut read_half, &mut write_half, frame::register(0, REGISTERED_EVENTS)).await
        };
        tokio::time::timeout(connect_timeout, handshake)
            .await
            .map_err(|_| unavailable("handshake timed out".to_string()))?
            .map_err(|e| match e {
                Error::SessionUnavailable { .. } => e,
                other => unavailable(other.to_string()),
            })?;

        let shared = Arc::new(Shared {
            peer,
            pending: Mutex::new(HashMap::new()),
            listeners: HostListeners::new(),
            closed: AtomicBool::new(false),
        });
        let reader = tokio::spawn(read_loop(read_half, shared.clone()));

        info!("CQL session established to {}", peer);
        Ok(Arc::new(Self {
            shared,
            writer: tokio::sync::Mutex::new(write_half),
            next_stream: AtomicU16::new(1),
            request_timeout,
            reader: Mutex::new(Some(reader)),
        }))
    }

    pub fn peer(&self) -> SocketAddr {
        self.shared.peer
    }

    fn unavailable(&self, reason: impl Into<String>) -> Error {
        Error::SessionUnavailable {
            endpoint: self.shared.peer.to_string(),
            reason: reason.into(),
        }
    }

    fn allocate_stream(&self) -> i16 {
        (self.next_stream.fetch_add(1, Ordering::Relaxed) % MAX_STREAM_ID) as i16
    }

    async fn request(&self, build: impl FnOnce(i16) -> Bytes) -> Result<Frame> {
        let stream = self.allocate_stream();
        let (tx, rx) = oneshot::channel();
        self.shared.pending.lock().insert(stream, tx);

        // The reader sets `closed` before draining pending requests.
        if self.shared.closed.load(Ordering::Acquire) {
            self.shared.pending.lock().remove(&stream);
            return Err(self.unavailable("connection closed"));
        }

        let bytes = build(stream);
        let written = {
            let mut writer = self.writer.lock().await;
            writer.write_all(&bytes).await
        };
        if let Err(e) = written {
            self.shared.pending.lock().remove(&stream);
            return Err(self.unavailable(e.to_string()));
        }

        match tokio::time::timeout(self.request_timeout, rx).await {
            Ok(Ok(frame)) => Ok(frame),
            Ok(Err(_)) => Err(self.unavailable("connection closed")),
            Err(_) => {
                self.shared.pending.lock().remove(&stream);
                Err(self.unavailable(format!(
                    "request timed out after {}ms",
                    self.request_timeout.as_millis()
                )))
            }
        }
    }
}

#[async_trait]
impl QuerySession for CqlConnection {
    fn endpoint(&self) -> String {
        self.shared.peer.to_string()
    }

    async fn execute(&self, query: &str) -> Result<Vec<Row>> {
        let response = self.request(|stream| frame::query(stream, query)).await?;
        match response.header.opcode {
            Opcode::Result => frame::parse_rows(response.body),
            Opcode::Error => {
                let (code, message) = frame::parse_error(response.body)?;
                Err(Error::QueryFailed { code, message })
            }
            other => Err(Error::Protocol(format!("unexpected {:?} response to QUERY", other))),
        }
    }

    fn register(&self, listener: HostListener) -> ListenerId {
        self.shared.listeners.register(listener)
    }

    fn unregister(&self, id: ListenerId) -> bool {
        self.shared.listeners.unregister(id)
    }

    fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::Acquire)
    }

    async fn close(&self) {
        if self.shared.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Some(reader) = self.reader.lock().take() {
            reader.abort();
        }
        self.shared.pending.lock().clear();
        let _ = self.writer.lock().await.shutdown().await;
        info!("CQL session to {} closed", self.shared.peer);
    }
}

impl Drop for CqlConnection {
    fn drop(&mut self) {
        if let Some(reader) = self.reader.get_mut().take() {
            reader.abort();
        }
    }
}

impl std::fmt::Debug for CqlConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CqlConnection")
            .field("peer", &self.shared.peer)
            .field("closed", &self.is_closed())
            .field("listeners", &self.shared.listeners.len())
            .finish()
    }
}

// =============================================================================
// Wire I/O
// =============================================================================

async fn read_frame(reader: &mut OwnedReadHalf) -> Result<Option<Frame>> {
    let mut header = [0u8; HEADER_LEN];
    match reader.read_exact(&mut header).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }
    let header = FrameHeader::decode(&header)?;
    let mut body = vec![0u8; header.length];
    reader.read_exact(&mut body).await?;
    Ok(Some(Frame {
        header,
        body: Bytes::from(body),
    }))
}

async fn expect_ready(
    reader: &mut OwnedReadHalf,
    writer: &mut OwnedWriteHalf,
    request: Bytes,
) -> Result<()> {
    writer.write_all(&request).await?;
    let response = read_frame(reader)
        .await?
        .ok_or_else(|| Error::Protocol("connection closed during handshake".to_string()))?;

    match response.header.opcode {
        Opcode::Ready => Ok(()),
        Opcode::Authenticate => {
            let authenticator = BodyReader::new(response.body).read_string()?;
            Err(Error::Protocol(format!(
                "server requires authentication ({})",
                authenticator
            )))
        }
        Opcode::Error => {
            let (code, message) = frame::parse_error(response.body)?;
            Err(Error::QueryFailed { code, message })
        }
        other => Err(Error::Protocol(format!("unexpected {:?} during handshake", other))),
    }
}

async fn read_loop(mut reader: OwnedReadHalf, shared: Arc<Shared>) {
    loop {
        match read_frame(&mut reader).await {
            Ok(Some(frame)) if frame.header.stream == EVENT_STREAM => {
                match frame::parse_event(frame.body) {
                    Ok(Some(event)) => {
                        debug!("Host event from {}: {:?} {}", shared.peer, event.kind, event.address);
                        shared.dispatch(event);
                    }
                    Ok(None) => {}
                    Err(e) => warn!("Discarding malformed event from {}: {}", shared.peer, e),
                }
            }
            Ok(Some(frame)) => {
                let waiter = shared.pending.lock().remove(&frame.header.stream);
                match waiter {
                    Some(tx) => {
                        let _ = tx.send(frame);
                    }
                    None => trace!("No waiter for stream {}", frame.header.stream),
                }
            }
            Ok(None) => {
                debug!("CQL connection to {} closed by peer", shared.peer);
                break;
            }
            Err(e) => {
                warn!("CQL connection to {} failed: {}", shared.peer, e);
                break;
            }
        }
    }

    let lost = !shared.closed.swap(true, Ordering::AcqRel);
    shared.pending.lock().clear();
    if lost {
        shared.listeners.notify(&HostEvent::new(HostEventKind::Down, shared.peer));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockCqlServer;
    use assert_matches::assert_matches;
    use std::sync::atomic::AtomicUsize;

    async fn connect(server: &MockCqlServer) -> Arc<CqlConnection> {
        let addr = server.addr();
        CqlConnection::connect(
            &addr.ip().to_string(),
            addr.port(),
            Duration::from_secs(1),
            Duration::from_secs(1),
        )
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn test_execute_local_settings() {
        let server = MockCqlServer::start("4.0.11").await;
        let connection = connect(&server).await;

        let rows = connection.execute(crate::domain::LOCAL_SETTINGS_QUERY).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].get_string("release_version").unwrap().as_deref(), Some("4.0.11"));
        assert_eq!(server.queries(), 1);
    }

    #[tokio::test]
    async fn test_server_error_maps_to_query_failed() {
        let server = MockCqlServer::start("4.0.11").await;
        let connection = connect(&server).await;

        let err = connection.execute("select * from missing").await.unwrap_err();
        assert_matches!(err, Error::QueryFailed { code: 0x2200, .. });
        assert!(!connection.is_closed());
    }

    #[tokio::test]
    async fn test_connect_refused() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let result =
            CqlConnection::connect("127.0.0.1", port, Duration::from_secs(1), Duration::from_secs(1)).await;
        assert_matches!(result, Err(Error::SessionUnavailable { .. }));
    }

    #[tokio::test]
    async fn test_events_reach_listeners() {
        let server = MockCqlServer::start("4.0.11").await;
        let connection = connect(&server).await;
        let ups = Arc::new(AtomicUsize::new(0));
        let downs = Arc::new(AtomicUsize::new(0));

        let (u, d) = (ups.clone(), downs.clone());
        connection.register(
            HostListener::new()
                .on_up(move |_| {
                    u.fetch_add(1, Ordering::SeqCst);
                })
                .on_down(move |_| {
                    d.fetch_add(1, Ordering::SeqCst);
                }),
        );

        let local: SocketAddr = format!("{}:9042", server.addr().ip()).parse().unwrap();
        let remote: SocketAddr = "10.9.9.9:9042".parse().unwrap();
        server.push_event("STATUS_CHANGE", "UP", local).await;
        server.push_event("STATUS_CHANGE", "DOWN", remote).await;
        server.push_event("STATUS_CHANGE", "DOWN", local).await;
        // Round trip so every pushed event has been read
        connection.execute(crate::domain::LOCAL_SETTINGS_QUERY).await.unwrap();

        assert_eq!(ups.load(Ordering::SeqCst), 1);
        assert_eq!(downs.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_lost_connection_reports_down() {
        let server = MockCqlServer::start("4.0.11").await;
        let connection = connect(&server).await;
        let (tx, rx) = oneshot::channel();
        let tx = Mutex::new(Some(tx));
        connection.register(HostListener::new().on_down(move |addr| {
            if let Some(tx) = tx.lock().take() {
                let _ = tx.send(addr);
            }
        }));

        server.disconnect().await;
        let addr = tokio::time::timeout(Duration::from_secs(2), rx).await.unwrap().unwrap();
        assert_eq!(addr, connection.peer());
        assert!(connection.is_closed());
        assert!(connection.execute("select 1").await.unwrap_err().is_connectivity());
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let server = MockCqlServer::start("4.0.11").await;
        let connection = connect(&server).await;
        connection.close().await;
        connection.close().await;
        assert!(connection.is_closed());
    }
}
