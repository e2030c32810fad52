//! Lazily connected session to the local instance

use super::connection::CqlConnection;
use crate::domain::{QuerySession, SessionProvider};
use arc_swap::ArcSwapOption;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Default native transport port
pub const DEFAULT_CQL_PORT: u16 = 9042;

/// Connection settings for the local instance
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CqlConfig {
    pub host: String,
    pub port: u16,
    pub connect_timeout: Duration,
    pub request_timeout: Duration,
}

impl Default for CqlConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: DEFAULT_CQL_PORT,
            connect_timeout: Duration::from_secs(5),
            request_timeout: Duration::from_secs(5),
        }
    }
}

/// Hands out one shared session, reconnecting after the previous one closed
pub struct CqlSessionHolder {
    config: CqlConfig,
    session: ArcSwapOption<CqlConnection>,
    connect_lock: tokio::sync::Mutex<()>,
}

impl CqlSessionHolder {
    pub fn new(config: CqlConfig) -> Arc<Self> {
        Arc::new(Self {
            config,
            session: ArcSwapOption::const_empty(),
            connect_lock: tokio::sync::Mutex::new(()),
        })
    }

    pub fn config(&self) -> &CqlConfig {
        &self.config
    }

    fn open_session(&self) -> Option<Arc<CqlConnection>> {
        self.session.load_full().filter(|session| !session.is_closed())
    }
}

#[async_trait]
impl SessionProvider for CqlSessionHolder {
    async fn local_session(&self) -> Option<Arc<dyn QuerySession>> {
        if let Some(session) = self.open_session() {
            return Some(session);
        }

        let _creation = self.connect_lock.lock().await;
        if let Some(session) = self.open_session() {
            return Some(session);
        }

        match CqlConnection::connect(
            &self.config.host,
            self.config.port,
            self.config.connect_timeout,
            self.config.request_timeout,
        )
        .await
        {
            Ok(session) => {
                self.session.store(Some(session.clone()));
                Some(session)
            }
            Err(e) => {
                warn!(
                    "Unable to connect to Cassandra at {}:{}: {}",
                    self.config.host, self.config.port, e
                );
                None
            }
        }
    }

    async fn close(&self) {
        if let Some(session) = self.session.swap(None) {
            debug!("Closing session to {}:{}", self.config.host, self.config.port);
            session.close().await;
        }
    }
}

impl std::fmt::Debug for CqlSessionHolder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CqlSessionHolder")
            .field("config", &self.config)
            .field("connected", &self.open_session().is_some())
            .finish()
    }
}
