//! Adapter for Cassandra 4.0 and later

use crate::domain::ports::{
    CassandraAdapter, NodeSettings, SessionProvider, SnapshotOptions, StorageOperations,
    LOCAL_SETTINGS_QUERY,
};
use crate::error::{Error, Result};
use crate::jmx::{JmxClient, StorageServiceProxy, STORAGE_SERVICE_OBJ_NAME};
use crate::version::{AdapterFactory, CassandraVersion};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, info};

// =============================================================================
// Factory
// =============================================================================

/// Builds [`Cassandra40Adapter`]s; registered for 4.0.0 and up
#[derive(Debug, Default, Clone, Copy)]
pub struct Cassandra40Factory;

impl AdapterFactory for Cassandra40Factory {
    fn min_version(&self) -> CassandraVersion {
        CassandraVersion::new(4, 0, 0)
    }

    fn name(&self) -> &str {
        "cassandra-4.0"
    }

    fn create(
        &self,
        sessions: Arc<dyn SessionProvider>,
        jmx_client: Arc<JmxClient>,
    ) -> Arc<dyn CassandraAdapter> {
        Arc::new(Cassandra40Adapter::new(sessions, jmx_client))
    }
}

// =============================================================================
// Adapter
// =============================================================================

pub struct Cassandra40Adapter {
    sessions: Arc<dyn SessionProvider>,
    storage: Arc<Cassandra40StorageOperations>,
}

impl Cassandra40Adapter {
    pub fn new(sessions: Arc<dyn SessionProvider>, jmx_client: Arc<JmxClient>) -> Self {
        Self {
            sessions,
            storage: Arc::new(Cassandra40StorageOperations::new(jmx_client)),
        }
    }
}

#[async_trait]
impl CassandraAdapter for Cassandra40Adapter {
    fn name(&self) -> &str {
        "cassandra-4.0"
    }

    fn storage_operations(&self) -> Arc<dyn StorageOperations> {
        self.storage.clone()
    }

    async fn settings(&self) -> Result<Option<NodeSettings>> {
        let Some(session) = self.sessions.local_session().await else {
            return Ok(None);
        };
        let rows = session.execute(LOCAL_SETTINGS_QUERY).await?;
        NodeSettings::from_rows(&rows)
    }
}

// =============================================================================
// Storage Operations
// =============================================================================

/// Storage operations served through the StorageService managed object
pub struct Cassandra40StorageOperations {
    jmx_client: Arc<JmxClient>,
}

impl Cassandra40StorageOperations {
    pub fn new(jmx_client: Arc<JmxClient>) -> Self {
        Self { jmx_client }
    }
}

fn require(name: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(Error::InvalidArgument(format!("{} must be non-empty", name)));
    }
    Ok(())
}

#[async_trait]
impl StorageOperations for Cassandra40StorageOperations {
    async fn take_snapshot(
        &self,
        tag: &str,
        keyspace: &str,
        table: &str,
        options: Option<&SnapshotOptions>,
    ) -> Result<()> {
        require("snapshot tag", tag)?;
        require("keyspace", keyspace)?;
        require("table", table)?;

        let entity = format!("{}.{}", keyspace, table);
        debug!("Taking snapshot {} of {}", tag, entity);

        let storage_service: StorageServiceProxy = self.jmx_client.proxy(STORAGE_SERVICE_OBJ_NAME)?;
        storage_service.take_snapshot(tag, options, &[entity.clone()]).await?;

        info!("Snapshot {} of {} taken", tag, entity);
        Ok(())
    }
}
