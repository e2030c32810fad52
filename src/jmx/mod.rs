//! Remote management (JMX over Jolokia)
//!
//! [`JmxClient`] keeps one shared connection per instance; typed proxies such
//! as [`StorageServiceProxy`] are built from a static interface descriptor and
//! an object name.

pub mod client;
pub mod descriptor;
pub mod jolokia;
pub mod object_name;
pub mod proxy;
pub mod storage_service;
pub mod value;

pub use client::{JmxClient, JmxConfig, ManagementConnection, ManagementConnector, DEFAULT_JOLOKIA_PORT};
pub use descriptor::{InterfaceDescriptor, MemberDescriptor, MemberKind, ResolvedInterface};
pub use jolokia::JolokiaConnector;
pub use object_name::ObjectName;
pub use proxy::{MBeanProxy, ManagedInterface};
pub use storage_service::{StorageServiceProxy, STORAGE_SERVICE_OBJ_NAME};
pub use value::ManagedValue;
