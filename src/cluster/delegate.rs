//! Instance Adapter Delegate
//!
//! Coordinates one Cassandra instance: keeps a query session open, probes
//! liveness, and swaps in the adapter matching the reported release version.
//!
//! ## State
//!
//! ```text
//! Uninitialized ──> Connecting ──> Healthy <──> Down
//!                                      └── close() ──> Closed
//! ```
//!
//! The session, settings snapshot and active adapter each live in their own
//! atomically swapped slot. Readers never wait on an in-flight probe, so
//! [`CassandraAdapterDelegate::get_settings`] may observe the snapshot from
//! before or after a concurrent probe.

use crate::domain::ports::{
    CassandraAdapter, HostListener, ListenerId, NodeSettings, QuerySession, SessionProvider,
    StorageOperations, LOCAL_SETTINGS_QUERY,
};
use crate::error::{Error, Result};
use crate::jmx::JmxClient;
use crate::version::{CassandraVersion, VersionProvider};
use arc_swap::ArcSwapOption;
use chrono::{DateTime, TimeZone, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Weak};
use tracing::{debug, info, warn};

// =============================================================================
// Delegate State
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[repr(u8)]
pub enum DelegateState {
    Uninitialized = 0,
    Connecting = 1,
    Healthy = 2,
    Down = 3,
    Closed = 4,
}

impl DelegateState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => DelegateState::Uninitialized,
            1 => DelegateState::Connecting,
            2 => DelegateState::Healthy,
            3 => DelegateState::Down,
            _ => DelegateState::Closed,
        }
    }
}

impl fmt::Display for DelegateState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DelegateState::Uninitialized => "uninitialized",
            DelegateState::Connecting => "connecting",
            DelegateState::Healthy => "healthy",
            DelegateState::Down => "down",
            DelegateState::Closed => "closed",
        };
        f.write_str(name)
    }
}

// =============================================================================
// Statistics
// =============================================================================

#[derive(Debug, Default)]
struct DelegateCounters {
    probes: AtomicU64,
    skipped_probes: AtomicU64,
    adapter_swaps: AtomicU64,
    failures: AtomicU64,
    /// Millis since epoch of the last successful probe; 0 when none
    last_success_millis: AtomicI64,
}

/// Point-in-time view of a delegate's counters
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DelegateStats {
    pub probes: u64,
    pub skipped_probes: u64,
    pub adapter_swaps: u64,
    pub failures: u64,
    pub last_success: Option<DateTime<Utc>>,
}

// =============================================================================
// Swapped Slots
// =============================================================================

struct ActiveSession {
    session: Arc<dyn QuerySession>,
}

struct ActiveAdapter {
    version: CassandraVersion,
    adapter: Arc<dyn CassandraAdapter>,
}

/// Clears the single-flight flag when the probe ends, however it ends
struct ProbeGuard<'a> {
    active: &'a AtomicBool,
}

impl<'a> ProbeGuard<'a> {
    fn try_acquire(active: &'a AtomicBool) -> Option<Self> {
        active
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self { active })
    }
}

impl Drop for ProbeGuard<'_> {
    fn drop(&mut self) {
        self.active.store(false, Ordering::Release);
    }
}

// =============================================================================
// Delegate
// =============================================================================

pub struct CassandraAdapterDelegate {
    instance_id: u32,
    me: Weak<CassandraAdapterDelegate>,
    session_provider: Arc<dyn SessionProvider>,
    jmx_client: Arc<JmxClient>,
    version_provider: Arc<VersionProvider>,

    session: ArcSwapOption<ActiveSession>,
    connect_lock: tokio::sync::Mutex<()>,
    adapter: ArcSwapOption<ActiveAdapter>,
    settings: ArcSwapOption<NodeSettings>,

    registered: AtomicBool,
    listener: Mutex<Option<ListenerId>>,
    probe_active: AtomicBool,
    rejected_version: Mutex<Option<String>>,
    state: AtomicU8,
    counters: DelegateCounters,
}

impl CassandraAdapterDelegate {
    pub fn new(
        instance_id: u32,
        session_provider: Arc<dyn SessionProvider>,
        jmx_client: Arc<JmxClient>,
        version_provider: Arc<VersionProvider>,
    ) -> Arc<Self> {
        Arc::new_cyclic(|me| Self {
            instance_id,
            me: me.clone(),
            session_provider,
            jmx_client,
            version_provider,
            session: ArcSwapOption::const_empty(),
            connect_lock: tokio::sync::Mutex::new(()),
            adapter: ArcSwapOption::const_empty(),
            settings: ArcSwapOption::const_empty(),
            registered: AtomicBool::new(false),
            listener: Mutex::new(None),
            probe_active: AtomicBool::new(false),
            rejected_version: Mutex::new(None),
            state: AtomicU8::new(DelegateState::Uninitialized as u8),
            counters: DelegateCounters::default(),
        })
    }

    pub fn instance_id(&self) -> u32 {
        self.instance_id
    }

    pub fn jmx_client(&self) -> &Arc<JmxClient> {
        &self.jmx_client
    }

    pub fn state(&self) -> DelegateState {
        DelegateState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Move to `next` unless the delegate has been closed
    fn transition(&self, next: DelegateState) {
        let _ = self
            .state
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                (current != DelegateState::Closed as u8).then_some(next as u8)
            });
    }

    fn is_closed(&self) -> bool {
        self.state() == DelegateState::Closed
    }

    /// Whether the last probe found the instance reachable
    pub fn is_up(&self) -> bool {
        self.settings.load().is_some()
    }

    // -------------------------------------------------------------------------
    // Session
    // -------------------------------------------------------------------------

    /// Make sure a session is open, connecting if needed.
    ///
    /// Concurrent callers share one connect attempt. Returns `None` when the
    /// instance cannot be reached or the delegate is closed.
    pub async fn ensure_session(&self) -> Option<Arc<dyn QuerySession>> {
        self.active_session().await.map(|active| active.session.clone())
    }

    async fn active_session(&self) -> Option<Arc<ActiveSession>> {
        if self.is_closed() {
            return None;
        }
        if let Some(active) = self.session.load_full() {
            if !active.session.is_closed() {
                return Some(active);
            }
        }

        let _creation = self.connect_lock.lock().await;
        if let Some(active) = self.session.load_full() {
            if !active.session.is_closed() {
                return Some(active);
            }
            debug!("Instance {}: discarding closed session", self.instance_id);
            self.unregister_listener(active.session.as_ref());
            self.session.store(None);
        }
        if self.is_closed() {
            return None;
        }

        let _ = self.state.compare_exchange(
            DelegateState::Uninitialized as u8,
            DelegateState::Connecting as u8,
            Ordering::AcqRel,
            Ordering::Acquire,
        );

        let session = self.session_provider.local_session().await?;
        let active = Arc::new(ActiveSession { session });
        self.register_listener(active.session.as_ref());
        self.session.store(Some(active.clone()));
        debug!(
            "Instance {}: session ready to {}",
            self.instance_id,
            active.session.endpoint()
        );
        Some(active)
    }

    // -------------------------------------------------------------------------
    // Host Listener
    // -------------------------------------------------------------------------

    fn register_listener(&self, session: &dyn QuerySession) {
        if self
            .registered
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return;
        }

        let probe_on = |me: Weak<Self>| {
            move |addr: SocketAddr| {
                if let Some(delegate) = me.upgrade() {
                    delegate.spawn_probe(addr);
                }
            }
        };
        let down = self.me.clone();
        let listener = HostListener::new()
            .on_add(probe_on(self.me.clone()))
            .on_up(probe_on(self.me.clone()))
            .on_remove(probe_on(self.me.clone()))
            .on_down(move |addr| {
                if let Some(delegate) = down.upgrade() {
                    delegate.on_down(addr);
                }
            });

        *self.listener.lock() = Some(session.register(listener));
        debug!("Instance {}: host listener registered", self.instance_id);
    }

    fn unregister_listener(&self, session: &dyn QuerySession) {
        if self
            .registered
            .compare_exchange(true, false, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return;
        }
        if let Some(id) = self.listener.lock().take() {
            session.unregister(id);
            debug!("Instance {}: host listener unregistered", self.instance_id);
        }
    }

    pub fn has_listener(&self) -> bool {
        self.registered.load(Ordering::Acquire)
    }

    fn spawn_probe(&self, addr: SocketAddr) {
        let Some(delegate) = self.me.upgrade() else {
            return;
        };
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                debug!("Instance {}: host event from {}, probing", self.instance_id, addr);
                handle.spawn(async move { delegate.probe().await });
            }
            Err(_) => warn!("Instance {}: no runtime to probe on host event", self.instance_id),
        }
    }

    /// The instance was reported down; forget the snapshot without waiting
    /// for the next probe
    pub fn on_down(&self, addr: SocketAddr) {
        info!("Instance {}: {} reported down", self.instance_id, addr);
        self.settings.store(None);
        self.transition(DelegateState::Down);
    }

    // -------------------------------------------------------------------------
    // Probe
    // -------------------------------------------------------------------------

    /// Check liveness and install the adapter matching the reported version.
    ///
    /// Single-flight: a call made while another probe runs returns at once.
    /// Failures are handled here and never returned.
    pub async fn probe(&self) {
        if self.is_closed() {
            return;
        }
        let Some(_guard) = ProbeGuard::try_acquire(&self.probe_active) else {
            self.counters.skipped_probes.fetch_add(1, Ordering::Relaxed);
            debug!("Instance {}: probe already running, skipping", self.instance_id);
            return;
        };
        self.counters.probes.fetch_add(1, Ordering::Relaxed);

        let Some(active) = self.active_session().await else {
            self.mark_down("no session available");
            return;
        };

        let result = active
            .session
            .execute(LOCAL_SETTINGS_QUERY)
            .await
            .and_then(|rows| NodeSettings::from_rows(&rows));

        if self.is_closed() {
            return;
        }
        match result {
            Ok(Some(settings)) => {
                self.refresh_adapter(&settings.release_version);
                self.settings.store(Some(Arc::new(settings)));
                self.counters
                    .last_success_millis
                    .store(Utc::now().timestamp_millis(), Ordering::Relaxed);
                self.transition(DelegateState::Healthy);
            }
            Ok(None) => self.mark_down("system.local returned no row"),
            Err(e) if e.is_connectivity() => self.drop_session(&active, &e).await,
            Err(e) => self.mark_down(&e.to_string()),
        }
    }

    fn mark_down(&self, reason: &str) {
        if self.is_up() || self.state() != DelegateState::Down {
            warn!("Instance {} is down: {}", self.instance_id, reason);
        }
        self.counters.failures.fetch_add(1, Ordering::Relaxed);
        self.settings.store(None);
        self.transition(DelegateState::Down);
    }

    /// Tear down a session that failed at the transport level
    async fn drop_session(&self, active: &Arc<ActiveSession>, error: &Error) {
        self.mark_down(&error.to_string());

        {
            // A concurrent reconnect may already own the slot and the listener
            let _guard = self.connect_lock.lock().await;
            let current = self.session.load_full();
            if current.as_ref().is_some_and(|current| Arc::ptr_eq(current, active)) {
                self.unregister_listener(active.session.as_ref());
                self.session.store(None);
            }
        }

        // Closed before the probe returns so the provider never hands it out again
        active.session.close().await;
        debug!("Instance {}: stale session closed", self.instance_id);
    }

    fn refresh_adapter(&self, release_version: &str) {
        let version = match CassandraVersion::parse(release_version) {
            Ok(version) => version,
            Err(e) => return self.report_rejected(release_version, &e),
        };

        if let Some(active) = self.adapter.load().as_ref() {
            if active.version == version {
                return;
            }
        }

        let factory = match self.version_provider.resolve(&version) {
            Ok(factory) => factory,
            Err(e) => return self.report_rejected(release_version, &e),
        };

        let adapter = factory.create(self.session_provider.clone(), self.jmx_client.clone());
        let previous = self.adapter.swap(Some(Arc::new(ActiveAdapter { version, adapter })));
        self.counters.adapter_swaps.fetch_add(1, Ordering::Relaxed);
        *self.rejected_version.lock() = None;

        match previous {
            Some(previous) => info!(
                "Instance {}: version changed {} -> {}, installed adapter {}",
                self.instance_id,
                previous.version,
                release_version,
                factory.name()
            ),
            None => info!(
                "Instance {}: installed adapter {} for version {}",
                self.instance_id,
                factory.name(),
                release_version
            ),
        }
    }

    fn report_rejected(&self, release_version: &str, error: &Error) {
        let mut rejected = self.rejected_version.lock();
        if rejected.as_deref() == Some(release_version) {
            debug!("Instance {}: still running {}: {}", self.instance_id, release_version, error);
            return;
        }
        warn!(
            "Instance {}: keeping current adapter, cannot serve version {}: {}",
            self.instance_id, release_version, error
        );
        *rejected = Some(release_version.to_string());
    }

    // -------------------------------------------------------------------------
    // Readers
    // -------------------------------------------------------------------------

    /// Last known settings, or `None` while the instance is down or unprobed
    pub async fn get_settings(&self) -> Option<NodeSettings> {
        self.active_session().await;
        self.settings.load_full().map(|settings| settings.as_ref().clone())
    }

    /// Snapshot without touching the session
    pub fn settings_snapshot(&self) -> Option<Arc<NodeSettings>> {
        self.settings.load_full()
    }

    /// Storage operations of the active adapter.
    ///
    /// The adapter survives downtime: after one successful probe this keeps
    /// returning the last installed adapter even while the instance is down.
    pub fn storage_operations(&self) -> Result<Arc<dyn StorageOperations>> {
        self.active_adapter()
            .map(|adapter| adapter.storage_operations())
            .ok_or(Error::AdapterUnavailable {
                instance_id: self.instance_id,
            })
    }

    pub fn active_adapter(&self) -> Option<Arc<dyn CassandraAdapter>> {
        self.adapter.load().as_ref().map(|active| active.adapter.clone())
    }

    /// Version the active adapter was built for
    pub fn current_version(&self) -> Option<CassandraVersion> {
        self.adapter.load().as_ref().map(|active| active.version.clone())
    }

    pub fn stats(&self) -> DelegateStats {
        let millis = self.counters.last_success_millis.load(Ordering::Relaxed);
        DelegateStats {
            probes: self.counters.probes.load(Ordering::Relaxed),
            skipped_probes: self.counters.skipped_probes.load(Ordering::Relaxed),
            adapter_swaps: self.counters.adapter_swaps.load(Ordering::Relaxed),
            failures: self.counters.failures.load(Ordering::Relaxed),
            last_success: (millis > 0)
                .then(|| Utc.timestamp_millis_opt(millis).single())
                .flatten(),
        }
    }

    // -------------------------------------------------------------------------
    // Shutdown
    // -------------------------------------------------------------------------

    /// Enter the terminal state and release the session and management client.
    /// An in-flight probe finishes on its own; its results are discarded.
    pub async fn close(&self) {
        let previous = self.state.swap(DelegateState::Closed as u8, Ordering::AcqRel);
        if previous == DelegateState::Closed as u8 {
            return;
        }

        let active = {
            let _guard = self.connect_lock.lock().await;
            self.session.swap(None)
        };
        if let Some(active) = active {
            self.unregister_listener(active.session.as_ref());
            active.session.close().await;
        }
        self.settings.store(None);
        self.session_provider.close().await;
        self.jmx_client.close().await;
        info!("Instance {}: delegate closed", self.instance_id);
    }
}

impl fmt::Debug for CassandraAdapterDelegate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CassandraAdapterDelegate")
            .field("instance_id", &self.instance_id)
            .field("state", &self.state())
            .field("version", &self.current_version())
            .finish()
    }
}
