//! Sidecar Configuration
//!
//! Loaded once at startup from a YAML file:
//!
//! ```yaml
//! sidecar:
//!   host: 0.0.0.0
//!   port: 9043
//! healthcheck:
//!   poll_freq_millis: 1000
//! cassandra_instances:
//!   - id: 1
//!     host: localhost
//!     port: 9042
//!     data_dirs: /var/lib/cassandra/data
//!     jmx_port: 8778
//! ```
//!
//! A single `cassandra:` block may be used instead of `cassandra_instances:`
//! and takes precedence when both are present.

use crate::cql::CqlConfig;
use crate::error::{Error, Result};
use crate::jmx::{JmxConfig, DEFAULT_JOLOKIA_PORT};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;
use tracing::info;

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    9043
}

fn default_request_timeout_millis() -> u64 {
    5000
}

fn default_poll_freq_millis() -> u64 {
    1000
}

fn default_instance_id() -> u32 {
    1
}

fn default_jmx_host() -> String {
    "127.0.0.1".to_string()
}

fn default_jmx_port() -> u16 {
    DEFAULT_JOLOKIA_PORT
}

/// HTTP listener settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SidecarSection {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Upper bound on delegate work done for one request
    #[serde(default = "default_request_timeout_millis")]
    pub request_timeout_millis: u64,
}

impl Default for SidecarSection {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            request_timeout_millis: default_request_timeout_millis(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthCheckSection {
    #[serde(default = "default_poll_freq_millis")]
    pub poll_freq_millis: u64,
}

impl Default for HealthCheckSection {
    fn default() -> Self {
        Self {
            poll_freq_millis: default_poll_freq_millis(),
        }
    }
}

/// One managed Cassandra instance
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceSection {
    #[serde(default = "default_instance_id")]
    pub id: u32,
    pub host: String,
    pub port: u16,
    /// Comma separated data directories
    pub data_dirs: String,
    #[serde(default = "default_jmx_host")]
    pub jmx_host: String,
    #[serde(default = "default_jmx_port")]
    pub jmx_port: u16,
    #[serde(default)]
    pub jmx_role: Option<String>,
    #[serde(default)]
    pub jmx_role_password: Option<String>,
    #[serde(default)]
    pub jmx_ssl_enabled: bool,
}

impl InstanceSection {
    pub fn data_dirs(&self) -> Vec<String> {
        self.data_dirs
            .split(',')
            .map(str::trim)
            .filter(|dir| !dir.is_empty())
            .map(str::to_string)
            .collect()
    }

    pub fn cql_config(&self, timeout: Duration) -> CqlConfig {
        CqlConfig {
            host: self.host.clone(),
            port: self.port,
            connect_timeout: timeout,
            request_timeout: timeout,
        }
    }

    pub fn jmx_config(&self, timeout: Duration) -> JmxConfig {
        JmxConfig {
            host: self.jmx_host.clone(),
            port: self.jmx_port,
            role: self.jmx_role.clone(),
            password: self.jmx_role_password.clone(),
            ssl_enabled: self.jmx_ssl_enabled,
            timeout,
        }
    }

    fn validate(&self) -> Result<()> {
        let invalid = |reason: &str| Error::Configuration(format!("instance {}: {}", self.id, reason));

        if self.host.trim().is_empty() {
            return Err(invalid("host must be set"));
        }
        if self.port == 0 {
            return Err(invalid("port must be non-zero"));
        }
        if self.jmx_host.trim().is_empty() {
            return Err(invalid("jmx_host must be set"));
        }
        if self.jmx_port == 0 {
            return Err(invalid("jmx_port must be non-zero"));
        }
        if self.data_dirs().is_empty() {
            return Err(invalid("at least one data directory is required"));
        }
        if self.jmx_role.is_some() != self.jmx_role_password.is_some() {
            return Err(invalid("jmx_role and jmx_role_password must be set together"));
        }
        Ok(())
    }
}

/// Complete sidecar configuration
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SidecarConfiguration {
    #[serde(default)]
    pub sidecar: SidecarSection,
    #[serde(default)]
    pub healthcheck: HealthCheckSection,
    #[serde(default)]
    pub cassandra: Option<InstanceSection>,
    #[serde(default)]
    pub cassandra_instances: Vec<InstanceSection>,
}

impl SidecarConfiguration {
    /// Read, parse and validate a configuration file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| {
            Error::Configuration(format!("unable to read {}: {}", path.display(), e))
        })?;
        let config = Self::from_yaml(&raw)?;
        info!(
            "Loaded configuration from {} ({} instance(s))",
            path.display(),
            config.instances().len()
        );
        Ok(config)
    }

    pub fn from_yaml(raw: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Configured instances; a single `cassandra` block wins over the list
    pub fn instances(&self) -> &[InstanceSection] {
        match &self.cassandra {
            Some(single) => std::slice::from_ref(single),
            None => &self.cassandra_instances,
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.sidecar.request_timeout_millis)
    }

    pub fn health_check_period(&self) -> Duration {
        Duration::from_millis(self.healthcheck.poll_freq_millis)
    }

    pub fn validate(&self) -> Result<()> {
        let instances = self.instances();
        if instances.is_empty() {
            return Err(Error::Configuration(
                "at least one cassandra instance must be configured".into(),
            ));
        }
        if self.healthcheck.poll_freq_millis == 0 {
            return Err(Error::Configuration("healthcheck.poll_freq_millis must be positive".into()));
        }
        if self.sidecar.request_timeout_millis == 0 {
            return Err(Error::Configuration("sidecar.request_timeout_millis must be positive".into()));
        }

        let mut ids = HashSet::new();
        for instance in instances {
            instance.validate()?;
            if !ids.insert(instance.id) {
                return Err(Error::Configuration(format!("duplicate instance id {}", instance.id)));
            }
        }
        Ok(())
    }
}
