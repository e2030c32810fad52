//! StorageService capability interface

use super::descriptor::{InterfaceDescriptor, MemberDescriptor};
use super::proxy::{MBeanProxy, ManagedInterface};
use super::value::ManagedValue;
use crate::domain::SnapshotOptions;
use crate::error::Result;

pub const STORAGE_SERVICE_OBJ_NAME: &str = "org.apache.cassandra.db:type=StorageService";

static STORAGE_SERVICE: InterfaceDescriptor = InterfaceDescriptor {
    name: "StorageServiceMBean",
    members: &[
        MemberDescriptor::operation(
            "take_snapshot",
            "takeSnapshot",
            &["java.lang.String", "java.util.Map", "[Ljava.lang.String;"],
        ),
        MemberDescriptor::attribute("operation_mode", "OperationMode"),
        MemberDescriptor::attribute("release_version", "ReleaseVersion"),
        MemberDescriptor::operation("refresh_size_estimates", "refreshSizeEstimates", &[]),
    ],
};

/// Typed proxy for the storage service managed object
#[derive(Debug, Clone)]
pub struct StorageServiceProxy {
    proxy: MBeanProxy,
}

impl ManagedInterface for StorageServiceProxy {
    fn descriptor() -> &'static InterfaceDescriptor {
        &STORAGE_SERVICE
    }

    fn bind(proxy: MBeanProxy) -> Self {
        Self { proxy }
    }
}

impl StorageServiceProxy {
    /// Snapshot the given `keyspace.table` entities under `tag`
    pub async fn take_snapshot(
        &self,
        tag: &str,
        options: Option<&SnapshotOptions>,
        entities: &[String],
    ) -> Result<()> {
        let options = options.cloned().unwrap_or_default();
        self.proxy
            .call_void(
                "take_snapshot",
                vec![
                    ManagedValue::from(tag),
                    ManagedValue::from(options),
                    ManagedValue::from(entities.to_vec()),
                ],
            )
            .await
    }

    pub async fn operation_mode(&self) -> Result<String> {
        self.proxy.get_string("operation_mode").await
    }

    pub async fn release_version(&self) -> Result<String> {
        self.proxy.get_string("release_version").await
    }

    pub async fn refresh_size_estimates(&self) -> Result<()> {
        self.proxy.call_void("refresh_size_estimates", vec![]).await
    }
}
