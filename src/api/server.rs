//! HTTP server
//!
//! Binds the REST router and serves it until the shutdown token fires.

use super::rest::{ApiState, RestRouter};
use crate::error::{Error, Result};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::info;

// =============================================================================
// Server Configuration
// =============================================================================

#[derive(Debug, Clone)]
pub struct ApiServerConfig {
    pub bind_addr: SocketAddr,
    /// Upper bound on delegate work done for one request
    pub request_timeout: Duration,
}

impl Default for ApiServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 9043)),
            request_timeout: Duration::from_secs(5),
        }
    }
}

impl ApiServerConfig {
    pub fn new(host: &str, port: u16, request_timeout: Duration) -> Result<Self> {
        let bind_addr = format!("{}:{}", host, port)
            .parse()
            .map_err(|e| Error::Configuration(format!("invalid bind address {}:{}: {}", host, port, e)))?;
        Ok(Self {
            bind_addr,
            request_timeout,
        })
    }
}

// =============================================================================
// Server
// =============================================================================

pub async fn bind(config: &ApiServerConfig) -> Result<TcpListener> {
    TcpListener::bind(config.bind_addr)
        .await
        .map_err(|e| Error::Internal(format!("Failed to bind REST server on {}: {}", config.bind_addr, e)))
}

/// Serve the REST API on `listener` until `shutdown` is cancelled
pub async fn run_rest_server(
    listener: TcpListener,
    state: ApiState,
    shutdown: CancellationToken,
) -> Result<()> {
    let addr = listener.local_addr()?;
    let app = RestRouter::new(state).build();

    info!("REST API listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown.cancelled().await;
            info!("REST server shutting down");
        })
        .await
        .map_err(|e| Error::Internal(format!("REST server error: {}", e)))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ApiServerConfig::default();
        assert_eq!(config.bind_addr.port(), 9043);
        assert_eq!(config.request_timeout, Duration::from_secs(5));
    }

    #[test]
    fn test_config_from_host_and_port() {
        let config = ApiServerConfig::new("127.0.0.1", 9143, Duration::from_secs(1)).unwrap();
        assert_eq!(config.bind_addr, "127.0.0.1:9143".parse().unwrap());
        assert!(ApiServerConfig::new("not a host", 9143, Duration::from_secs(1)).is_err());
    }
}
