//! Per-instance metadata

use super::delegate::CassandraAdapterDelegate;
use crate::config::InstanceSection;
use crate::cql::{CqlConfig, CqlSessionHolder};
use crate::domain::SessionProvider;
use crate::jmx::{JmxClient, JmxConfig, ManagementConnector};
use crate::version::VersionProvider;
use std::sync::Arc;
use std::time::Duration;

/// Endpoints, credentials and data directories of one instance, plus the
/// delegate coordinating it. Immutable after construction.
#[derive(Debug, Clone)]
pub struct InstanceMetadata {
    id: u32,
    host: String,
    port: u16,
    data_dirs: Vec<String>,
    jmx: JmxConfig,
    delegate: Arc<CassandraAdapterDelegate>,
}

impl InstanceMetadata {
    pub fn new(
        id: u32,
        cql: CqlConfig,
        data_dirs: Vec<String>,
        jmx: JmxConfig,
        delegate: Arc<CassandraAdapterDelegate>,
    ) -> Self {
        Self {
            id,
            host: cql.host,
            port: cql.port,
            data_dirs,
            jmx,
            delegate,
        }
    }

    /// Wire up the session holder, management client and delegate for one
    /// configured instance
    pub fn from_config(
        section: &InstanceSection,
        timeout: Duration,
        connector: Arc<dyn ManagementConnector>,
        versions: Arc<VersionProvider>,
    ) -> Self {
        let cql = section.cql_config(timeout);
        let jmx = section.jmx_config(timeout);
        let sessions: Arc<dyn SessionProvider> = CqlSessionHolder::new(cql.clone());
        let jmx_client = JmxClient::new(jmx.clone(), connector);
        let delegate = CassandraAdapterDelegate::new(section.id, sessions, jmx_client, versions);
        Self::new(section.id, cql, section.data_dirs(), jmx, delegate)
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn data_dirs(&self) -> &[String] {
        &self.data_dirs
    }

    pub fn jmx(&self) -> &JmxConfig {
        &self.jmx
    }

    pub fn delegate(&self) -> &Arc<CassandraAdapterDelegate> {
        &self.delegate
    }
}
