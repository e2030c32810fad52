//! Sidecar Daemon
//!
//! Composition root: builds the instance registry, the health-check scheduler
//! and the HTTP server from configuration, and tears them down in order.

pub mod scheduler;

pub use scheduler::HealthCheckScheduler;

use crate::api::{run_rest_server, server, ApiServerConfig, ApiState};
use crate::cluster::InstancesConfig;
use crate::config::SidecarConfiguration;
use crate::error::{Error, Result};
use crate::jmx::{JolokiaConnector, ManagementConnector};
use crate::metrics::SidecarMetrics;
use crate::version::VersionProvider;
use parking_lot::Mutex;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

pub struct SidecarDaemon {
    server_config: ApiServerConfig,
    health_check_period: Duration,
    instances: Arc<InstancesConfig>,
    scheduler: Arc<HealthCheckScheduler>,
    metrics: Arc<SidecarMetrics>,
    shutdown: CancellationToken,
    server: Mutex<Option<JoinHandle<Result<()>>>>,
}

impl SidecarDaemon {
    pub fn new(
        server_config: ApiServerConfig,
        health_check_period: Duration,
        instances: Arc<InstancesConfig>,
    ) -> Result<Self> {
        Ok(Self {
            server_config,
            health_check_period,
            scheduler: HealthCheckScheduler::new(instances.clone()),
            metrics: Arc::new(SidecarMetrics::new()?),
            instances,
            shutdown: CancellationToken::new(),
            server: Mutex::new(None),
        })
    }

    /// Wire every instance to the Jolokia transport and the default adapters
    pub fn from_config(config: &SidecarConfiguration) -> Result<Self> {
        let connector: Arc<dyn ManagementConnector> = Arc::new(JolokiaConnector::new());
        let versions = VersionProvider::with_defaults();
        info!("Supported Cassandra versions: {:?}", versions.supported_versions());

        let instances = Arc::new(InstancesConfig::from_config(config, connector, versions)?);
        let server_config = ApiServerConfig::new(
            &config.sidecar.host,
            config.sidecar.port,
            config.request_timeout(),
        )?;
        Self::new(server_config, config.health_check_period(), instances)
    }

    pub fn instances(&self) -> &Arc<InstancesConfig> {
        &self.instances
    }

    pub fn scheduler(&self) -> &Arc<HealthCheckScheduler> {
        &self.scheduler
    }

    /// Bind the HTTP server, probe once, then start periodic health checks.
    /// Returns the bound address.
    pub async fn start(&self) -> Result<SocketAddr> {
        if self.shutdown.is_cancelled() {
            return Err(Error::Internal("daemon already stopped".into()));
        }

        let listener = server::bind(&self.server_config).await?;
        let addr = listener.local_addr()?;
        let state = ApiState {
            instances: self.instances.clone(),
            metrics: self.metrics.clone(),
            request_timeout: self.server_config.request_timeout,
        };
        let shutdown = self.shutdown.clone();
        let handle = tokio::spawn(async move { run_rest_server(listener, state, shutdown).await });
        *self.server.lock() = Some(handle);

        self.scheduler.health_check();
        self.scheduler.start(self.health_check_period);

        info!(
            "Cassandra sidecar started on {} managing {} instance(s)",
            addr,
            self.instances.len()
        );
        Ok(addr)
    }

    /// Stop serving, cancel the timer and close every instance
    pub async fn stop(&self) {
        info!("Stopping Cassandra sidecar");
        self.shutdown.cancel();
        self.scheduler.stop();

        let handle = self.server.lock().take();
        if let Some(handle) = handle {
            match handle.await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => error!("REST server error: {}", e),
                Err(e) => error!("REST server task failed: {}", e),
            }
        }

        futures::future::join_all(
            self.instances
                .instances()
                .iter()
                .map(|instance| instance.delegate().close()),
        )
        .await;
        info!("Cassandra sidecar stopped");
    }
}

impl std::fmt::Debug for SidecarDaemon {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SidecarDaemon")
            .field("bind_addr", &self.server_config.bind_addr)
            .field("instances", &self.instances.len())
            .field("health_check_period", &self.health_check_period)
            .finish()
    }
}
