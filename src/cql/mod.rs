//! Minimal CQL native protocol client
//!
//! Enough of protocol v4 to read `system.local` and receive host status and
//! topology events from the local instance.

pub mod connection;
pub mod frame;
pub mod session;

pub use connection::CqlConnection;
pub use session::{CqlConfig, CqlSessionHolder, DEFAULT_CQL_PORT};
