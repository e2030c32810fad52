//! Managed instances and their delegates

pub mod delegate;
pub mod instance;
pub mod instances;

pub use delegate::{CassandraAdapterDelegate, DelegateState, DelegateStats};
pub use instance::InstanceMetadata;
pub use instances::InstancesConfig;
