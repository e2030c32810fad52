//! Sidecar Metrics
//!
//! Prometheus metrics owned by the daemon. Delegates keep their own atomic
//! counters; they are copied into the registry when `/metrics` is scraped.

use crate::cluster::InstancesConfig;
use crate::error::Result;
use parking_lot::Mutex;
use prometheus::{Encoder, IntCounterVec, IntGaugeVec, Opts, Registry, TextEncoder};

pub struct SidecarMetrics {
    registry: Registry,
    up: IntGaugeVec,
    probes: IntCounterVec,
    skipped_probes: IntCounterVec,
    adapter_swaps: IntCounterVec,
    probe_failures: IntCounterVec,
    /// Serializes scrapes so each counter delta is applied once
    scrape: Mutex<()>,
}

fn counter(registry: &Registry, name: &str, help: &str) -> Result<IntCounterVec> {
    let counter = IntCounterVec::new(Opts::new(name, help), &["instance"])?;
    registry.register(Box::new(counter.clone()))?;
    Ok(counter)
}

impl SidecarMetrics {
    pub fn new() -> Result<Self> {
        let registry = Registry::new_custom(Some("cassandra_sidecar".to_string()), None)?;

        let up = IntGaugeVec::new(
            Opts::new("instance_up", "Whether the last probe reached the instance"),
            &["instance"],
        )?;
        registry.register(Box::new(up.clone()))?;

        Ok(Self {
            probes: counter(&registry, "probes_total", "Liveness probes issued")?,
            skipped_probes: counter(
                &registry,
                "probes_skipped_total",
                "Probes skipped while another probe was running",
            )?,
            adapter_swaps: counter(&registry, "adapter_swaps_total", "Adapters installed")?,
            probe_failures: counter(&registry, "probe_failures_total", "Probes that found the instance down")?,
            up,
            registry,
            scrape: Mutex::new(()),
        })
    }

    /// Copy delegate counters into the registry
    pub fn refresh(&self, instances: &InstancesConfig) {
        let _scrape = self.scrape.lock();
        self.refresh_locked(instances);
    }

    fn refresh_locked(&self, instances: &InstancesConfig) {
        for instance in instances.instances() {
            let label = instance.id().to_string();
            let labels = [label.as_str()];
            let delegate = instance.delegate();
            let stats = delegate.stats();

            self.up
                .with_label_values(&labels)
                .set(i64::from(delegate.is_up()));
            advance(&self.probes, &labels, stats.probes);
            advance(&self.skipped_probes, &labels, stats.skipped_probes);
            advance(&self.adapter_swaps, &labels, stats.adapter_swaps);
            advance(&self.probe_failures, &labels, stats.failures);
        }
    }

    /// Refresh, then render in the text exposition format
    pub fn encode(&self, instances: &InstancesConfig) -> Result<String> {
        let families = {
            let _scrape = self.scrape.lock();
            self.refresh_locked(instances);
            self.registry.gather()
        };
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&families, &mut buffer)?;
        Ok(String::from_utf8_lossy(&buffer).into_owned())
    }
}

fn advance(counter: &IntCounterVec, labels: &[&str], total: u64) {
    let counter = counter.with_label_values(labels);
    let current = counter.get();
    if total > current {
        counter.inc_by(total - current);
    }
}

impl std::fmt::Debug for SidecarMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SidecarMetrics").finish_non_exhaustive()
    }
}
