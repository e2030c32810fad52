//! Remote-Management RPC Client
//!
//! Owns one lazily opened management connection per instance and hands out
//! typed proxies bound to named managed objects. Many proxies share the
//! connection; a connectivity failure drops it so the next call reconnects.

use super::descriptor::MemberKind;
use super::object_name::ObjectName;
use super::proxy::{MBeanProxy, ManagedInterface};
use super::value::ManagedValue;
use crate::error::{Error, Result};
use arc_swap::ArcSwapOption;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Default port of the Jolokia agent attached to the instance.
/// The JMX RMI port (7199) does not speak HTTP.
pub const DEFAULT_JOLOKIA_PORT: u16 = 8778;

// =============================================================================
// Configuration
// =============================================================================

/// Management endpoint settings for one instance
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JmxConfig {
    pub host: String,
    pub port: u16,
    /// Role name; requires `password`
    pub role: Option<String>,
    pub password: Option<String>,
    pub ssl_enabled: bool,
    /// Connect and request timeout
    pub timeout: Duration,
}

impl Default for JmxConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: DEFAULT_JOLOKIA_PORT,
            role: None,
            password: None,
            ssl_enabled: false,
            timeout: Duration::from_secs(5),
        }
    }
}

impl JmxConfig {
    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Role credentials, when both parts are configured
    pub fn credentials(&self) -> Option<(&str, &str)> {
        match (&self.role, &self.password) {
            (Some(role), Some(password)) => Some((role.as_str(), password.as_str())),
            _ => None,
        }
    }
}

// =============================================================================
// Transport Ports
// =============================================================================

/// An open management connection
#[async_trait]
pub trait ManagementConnection: Send + Sync {
    async fn read_attribute(&self, object: &ObjectName, attribute: &str) -> Result<ManagedValue>;

    async fn invoke(
        &self,
        object: &ObjectName,
        operation: &str,
        signature: &[&str],
        args: Vec<ManagedValue>,
    ) -> Result<ManagedValue>;

    async fn close(&self) {}
}

/// Opens management connections
#[async_trait]
pub trait ManagementConnector: Send + Sync {
    async fn connect(&self, config: &JmxConfig) -> Result<Arc<dyn ManagementConnection>>;
}

// =============================================================================
// JMX Client
// =============================================================================

struct ActiveConnection {
    connection: Arc<dyn ManagementConnection>,
}

/// Generic management client for one instance
pub struct JmxClient {
    config: JmxConfig,
    connector: Arc<dyn ManagementConnector>,
    connection: ArcSwapOption<ActiveConnection>,
    connect_lock: tokio::sync::Mutex<()>,
}

impl JmxClient {
    pub fn new(config: JmxConfig, connector: Arc<dyn ManagementConnector>) -> Arc<Self> {
        Arc::new(Self {
            config,
            connector,
            connection: ArcSwapOption::const_empty(),
            connect_lock: tokio::sync::Mutex::new(()),
        })
    }

    pub fn config(&self) -> &JmxConfig {
        &self.config
    }

    pub fn is_connected(&self) -> bool {
        self.connection.load().is_some()
    }

    /// Build a typed proxy for `object_name`. Does not connect.
    pub fn proxy<T: ManagedInterface>(self: &Arc<Self>, object_name: &str) -> Result<T> {
        let object_name = ObjectName::parse(object_name)?;
        let interface = T::descriptor().resolve()?;
        Ok(T::bind(MBeanProxy::new(self.clone(), object_name, Arc::new(interface))))
    }

    /// Open the shared connection, or return the one already open
    pub async fn connect(&self) -> Result<()> {
        self.active().await.map(|_| ())
    }

    async fn active(&self) -> Result<Arc<ActiveConnection>> {
        if let Some(active) = self.connection.load_full() {
            return Ok(active);
        }

        let _creation = self.connect_lock.lock().await;
        if let Some(active) = self.connection.load_full() {
            return Ok(active);
        }

        let connection = self.connector.connect(&self.config).await?;
        let active = Arc::new(ActiveConnection { connection });
        self.connection.store(Some(active.clone()));
        info!("Management connection established to {}", self.config.endpoint());
        Ok(active)
    }

    pub(crate) async fn read_attribute(
        &self,
        object: &ObjectName,
        attribute: &str,
    ) -> Result<ManagedValue> {
        let active = self.active().await?;
        let result = active.connection.read_attribute(object, attribute).await;
        self.after_call(&active, result).await
    }

    pub(crate) async fn invoke(
        &self,
        object: &ObjectName,
        operation: &str,
        kind: MemberKind,
        args: Vec<ManagedValue>,
    ) -> Result<ManagedValue> {
        let signature = match kind {
            MemberKind::Operation { signature } => signature,
            MemberKind::Attribute => {
                return Err(Error::Internal(format!("{} is an attribute, not an operation", operation)))
            }
        };
        let active = self.active().await?;
        let result = active.connection.invoke(object, operation, signature, args).await;
        self.after_call(&active, result).await
    }

    /// Forget a connection that failed at the transport level
    async fn after_call(
        &self,
        active: &Arc<ActiveConnection>,
        result: Result<ManagedValue>,
    ) -> Result<ManagedValue> {
        if let Err(e) = &result {
            if e.is_connectivity() {
                warn!("Management call to {} failed: {}", self.config.endpoint(), e);
                let _guard = self.connect_lock.lock().await;
                let current = self.connection.load_full();
                if current.as_ref().is_some_and(|current| Arc::ptr_eq(current, active)) {
                    self.connection.store(None);
                    debug!("Dropped management connection to {}", self.config.endpoint());
                }
            }
        }
        result
    }

    pub async fn close(&self) {
        if let Some(active) = self.connection.swap(None) {
            active.connection.close().await;
            info!("Management connection to {} closed", self.config.endpoint());
        }
    }
}

impl std::fmt::Debug for JmxClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JmxClient")
            .field("endpoint", &self.config.endpoint())
            .field("ssl_enabled", &self.config.ssl_enabled)
            .field("connected", &self.is_connected())
            .finish()
    }
}
