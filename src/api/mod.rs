//! HTTP API

pub mod rest;
pub mod server;

pub use rest::{ApiState, RestRouter};
pub use server::{run_rest_server, ApiServerConfig};
