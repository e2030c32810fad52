//! Instance Registry
//!
//! Fixed after startup. Lookups and iteration are lock-free; delegates may be
//! mid-probe while the registry is iterated.

use super::instance::InstanceMetadata;
use crate::config::SidecarConfiguration;
use crate::error::{Error, Result};
use crate::jmx::ManagementConnector;
use crate::version::VersionProvider;
use std::collections::BTreeMap;
use std::sync::Arc;

#[derive(Debug, Clone)]
pub struct InstancesConfig {
    /// Configuration order
    instances: Vec<Arc<InstanceMetadata>>,
    by_id: BTreeMap<u32, Arc<InstanceMetadata>>,
}

impl InstancesConfig {
    pub fn new(instances: Vec<InstanceMetadata>) -> Result<Self> {
        if instances.is_empty() {
            return Err(Error::Configuration("no instances configured".into()));
        }

        let instances: Vec<_> = instances.into_iter().map(Arc::new).collect();
        let mut by_id = BTreeMap::new();
        for instance in &instances {
            if by_id.insert(instance.id(), instance.clone()).is_some() {
                return Err(Error::Configuration(format!("duplicate instance id {}", instance.id())));
            }
        }
        Ok(Self { instances, by_id })
    }

    pub fn from_config(
        config: &SidecarConfiguration,
        connector: Arc<dyn ManagementConnector>,
        versions: Arc<VersionProvider>,
    ) -> Result<Self> {
        let timeout = config.request_timeout();
        Self::new(
            config
                .instances()
                .iter()
                .map(|section| {
                    InstanceMetadata::from_config(section, timeout, connector.clone(), versions.clone())
                })
                .collect(),
        )
    }

    /// All instances, in configuration order
    pub fn instances(&self) -> &[Arc<InstanceMetadata>] {
        &self.instances
    }

    pub fn instance_from_id(&self, id: u32) -> Result<&Arc<InstanceMetadata>> {
        self.by_id
            .get(&id)
            .ok_or(Error::InstanceNotFound { instance_id: id })
    }

    pub fn instance_from_host(&self, host: &str) -> Option<&Arc<InstanceMetadata>> {
        self.instances
            .iter()
            .find(|instance| instance.host().eq_ignore_ascii_case(host))
    }

    /// The first configured instance; requests without an instance id go here
    pub fn first(&self) -> &Arc<InstanceMetadata> {
        &self.instances[0]
    }

    /// Resolve an optional instance id, defaulting to the first instance
    pub fn resolve(&self, id: Option<u32>) -> Result<&Arc<InstanceMetadata>> {
        match id {
            Some(id) => self.instance_from_id(id),
            None => Ok(self.first()),
        }
    }

    pub fn len(&self) -> usize {
        self.instances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeConnector;
    use assert_matches::assert_matches;

    fn registry() -> InstancesConfig {
        let config = SidecarConfiguration::from_yaml(
            r#"
cassandra_instances:
  - {id: 2, host: Node-B, port: 9042, data_dirs: /b}
  - {id: 1, host: node-a, port: 9042, data_dirs: /a}
"#,
        )
        .unwrap();
        InstancesConfig::from_config(&config, FakeConnector::new(), VersionProvider::with_defaults())
            .unwrap()
    }

    #[test]
    fn test_lookup() {
        let registry = registry();
        assert_eq!(registry.len(), 2);
        assert_eq!(registry.first().id(), 2);
        assert_eq!(registry.instance_from_id(1).unwrap().host(), "node-a");
        assert_eq!(registry.instance_from_host("node-b").unwrap().id(), 2);
        assert!(registry.instance_from_host("node-c").is_none());
        assert_eq!(registry.resolve(None).unwrap().id(), 2);
    }

    #[test]
    fn test_unknown_instance() {
        assert_matches!(
            registry().instance_from_id(7),
            Err(Error::InstanceNotFound { instance_id: 7 })
        );
    }

    #[test]
    fn test_rejects_empty() {
        assert_matches!(InstancesConfig::new(vec![]), Err(Error::Configuration(_)));
    }
}
