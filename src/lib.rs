//! Cassandra Sidecar
//!
//! A management process running next to one or more local Cassandra
//! instances. It probes each instance over CQL, installs the adapter matching
//! the reported release version, and exposes health, settings and snapshot
//! operations over HTTP. Snapshots go through the instance's management
//! endpoint.
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────────┐
//! │                          REST API (axum)                          │
//! ├───────────────────────────────────────────────────────────────────┤
//! │   Instance Registry          │       Health-Check Scheduler       │
//! │   (InstancesConfig)          │       (periodic probes)            │
//! ├──────────────────────────────┴────────────────────────────────────┤
//! │                    Instance Adapter Delegate                      │
//! │   session slot   │   settings snapshot   │   active adapter       │
//! ├──────────────────┴───────────────────────┴────────────────────────┤
//! │   CQL session (native protocol v4)  │  Management client (JMX)    │
//! └─────────────────────────────────────┴─────────────────────────────┘
//! ```
//!
//! # Modules
//!
//! - [`cluster`]: Delegates and the instance registry
//! - [`version`]: Release versions and the adapter registry
//! - [`adapters`]: Version-specific adapters
//! - [`jmx`]: Remote management client and typed proxies
//! - [`cql`]: Minimal CQL client
//! - [`daemon`]: Scheduler and process lifecycle
//! - [`api`]: HTTP routes
//! - [`domain`]: Core domain types and traits
//! - [`error`]: Error types and handling

pub mod adapters;
pub mod api;
pub mod cluster;
pub mod config;
pub mod cql;
pub mod daemon;
pub mod domain;
pub mod error;
pub mod jmx;
pub mod metrics;
pub mod version;

#[cfg(test)]
pub(crate) mod testing;

// Re-export commonly used types
pub use api::{ApiServerConfig, ApiState, RestRouter};

pub use cluster::{CassandraAdapterDelegate, DelegateState, DelegateStats, InstanceMetadata, InstancesConfig};

pub use config::SidecarConfiguration;

pub use daemon::{HealthCheckScheduler, SidecarDaemon};

pub use domain::ports::{
    CassandraAdapter, NodeSettings, QuerySession, SessionProvider, SnapshotOptions,
    StorageOperations,
};

pub use error::{Error, Result};

pub use jmx::{JmxClient, JmxConfig, JolokiaConnector, StorageServiceProxy};

pub use metrics::SidecarMetrics;

pub use version::{AdapterFactory, CassandraVersion, VersionProvider};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");
