//! Domain layer - Core port definitions
//!
//! This module defines the traits (ports) that the CQL session, the
//! version-specific adapters and the test doubles implement.

pub mod ports;

pub use ports::*;
