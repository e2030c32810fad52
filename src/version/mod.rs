//! Version Module
//!
//! Release version parsing and the registry mapping versions to adapter factories.

pub mod cassandra_version;
pub mod provider;

pub use cassandra_version::*;
pub use provider::*;
