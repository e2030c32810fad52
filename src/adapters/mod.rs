//! Version-specific adapters

pub mod cassandra40;

pub use cassandra40::{Cassandra40Adapter, Cassandra40Factory, Cassandra40StorageOperations};
