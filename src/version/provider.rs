//! Versioned Adapter Registry
//!
//! Maps a parsed Cassandra version to the factory that builds the matching
//! adapter. Built once at startup; lookups never touch the network.

use super::CassandraVersion;
use crate::domain::ports::{CassandraAdapter, SessionProvider};
use crate::error::{Error, Result};
use crate::jmx::JmxClient;
use std::sync::Arc;

// =============================================================================
// Adapter Factory
// =============================================================================

/// Builds a version-specific adapter bound to a session holder and a management client
pub trait AdapterFactory: Send + Sync {
    /// Lowest release this factory supports
    fn min_version(&self) -> CassandraVersion;

    /// Factory name, used for logging
    fn name(&self) -> &str;

    fn create(
        &self,
        sessions: Arc<dyn SessionProvider>,
        jmx_client: Arc<JmxClient>,
    ) -> Arc<dyn CassandraAdapter>;
}

// =============================================================================
// Version Provider
// =============================================================================

/// Registry of adapter factories ordered by minimum version
pub struct VersionProvider {
    factories: Vec<Arc<dyn AdapterFactory>>,
}

impl VersionProvider {
    pub fn builder() -> VersionProviderBuilder {
        VersionProviderBuilder::default()
    }

    /// Registry holding every adapter shipped with the sidecar
    pub fn with_defaults() -> Arc<Self> {
        Arc::new(Self {
            factories: vec![Arc::new(crate::adapters::Cassandra40Factory)],
        })
    }

    /// Select the factory with the highest minimum version not above `version`.
    ///
    /// Pre-release qualifiers are ignored, so `4.0-beta4` resolves to the 4.0
    /// factory. Releases older than every factory are unsupported.
    pub fn resolve(&self, version: &CassandraVersion) -> Result<Arc<dyn AdapterFactory>> {
        self.factories
            .iter()
            .rev()
            .find(|factory| factory.min_version().cmp_release(version).is_le())
            .cloned()
            .ok_or_else(|| Error::UnsupportedVersion {
                version: version.to_string(),
            })
    }

    /// Parse then resolve a raw release version string
    pub fn resolve_str(&self, version: &str) -> Result<Arc<dyn AdapterFactory>> {
        self.resolve(&CassandraVersion::parse(version)?)
    }

    /// Minimum versions of the registered factories, ascending
    pub fn supported_versions(&self) -> Vec<CassandraVersion> {
        self.factories.iter().map(|f| f.min_version()).collect()
    }
}

impl std::fmt::Debug for VersionProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(self.factories.iter().map(|factory| factory.name().to_string()))
            .finish()
    }
}

/// Builder for [`VersionProvider`]
#[derive(Default)]
pub struct VersionProviderBuilder {
    factories: Vec<Arc<dyn AdapterFactory>>,
}

impl VersionProviderBuilder {
    pub fn add(mut self, factory: Arc<dyn AdapterFactory>) -> Self {
        self.factories.push(factory);
        self
    }

    pub fn build(mut self) -> Result<Arc<VersionProvider>> {
        if self.factories.is_empty() {
            return Err(Error::Configuration(
                "at least one adapter factory must be registered".into(),
            ));
        }

        self.factories
            .sort_by(|a, b| a.min_version().cmp_release(&b.min_version()));

        for pair in self.factories.windows(2) {
            if pair[0].min_version().cmp_release(&pair[1].min_version()).is_eq() {
                return Err(Error::Configuration(format!(
                    "factories {} and {} share minimum version {}",
                    pair[0].name(),
                    pair[1].name(),
                    pair[0].min_version()
                )));
            }
        }

        Ok(Arc::new(VersionProvider {
            factories: self.factories,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::CountingFactory;
    use assert_matches::assert_matches;

    fn provider() -> Arc<VersionProvider> {
        VersionProvider::builder()
            .add(CountingFactory::new("c41", CassandraVersion::new(4, 1, 0)))
            .add(CountingFactory::new("c40", CassandraVersion::new(4, 0, 0)))
            .build()
            .unwrap()
    }

    #[test]
    fn test_resolve_picks_highest_applicable() {
        let provider = provider();
        assert_eq!(provider.resolve_str("4.0.0").unwrap().name(), "c40");
        assert_eq!(provider.resolve_str("4.0.11").unwrap().name(), "c40");
        assert_eq!(provider.resolve_str("4.1.0").unwrap().name(), "c41");
        assert_eq!(provider.resolve_str("5.0.2").unwrap().name(), "c41");
    }

    #[test]
    fn test_resolve_pre_release() {
        assert_eq!(provider().resolve_str("4.1-beta1").unwrap().name(), "c41");
    }

    #[test]
    fn test_resolve_unsupported_and_malformed() {
        let provider = provider();
        assert_matches!(
            provider.resolve_str("3.11.4").err(),
            Some(Error::UnsupportedVersion { version }) if version == "3.11.4"
        );
        assert_matches!(
            provider.resolve_str("not-a-version").err(),
            Some(Error::MalformedVersion { .. })
        );
    }

    #[test]
    fn test_builder_rejects_empty_and_duplicates() {
        assert_matches!(VersionProvider::builder().build(), Err(Error::Configuration(_)));

        let result = VersionProvider::builder()
            .add(CountingFactory::new("a", CassandraVersion::new(4, 0, 0)))
            .add(CountingFactory::new("b", CassandraVersion::new(4, 0, 0)))
            .build();
        assert_matches!(result, Err(Error::Configuration(_)));
    }

    #[test]
    fn test_defaults_support_cassandra_40() {
        let provider = VersionProvider::with_defaults();
        assert_eq!(provider.supported_versions(), vec![CassandraVersion::new(4, 0, 0)]);
        assert!(provider.resolve_str("4.0.5").is_ok());
    }
}
