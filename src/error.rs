//! Error types for the Cassandra Sidecar
//!
//! Provides structured error types for the instance delegates, the CQL
//! session, the versioned adapter registry and the management RPC client.

use thiserror::Error;

/// Unified error type for the sidecar
#[derive(Error, Debug)]
pub enum Error {
    // =========================================================================
    // Internal Errors
    // =========================================================================
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Timed out after {millis}ms: {operation}")]
    Timeout { operation: String, millis: u64 },

    // =========================================================================
    // Query Session Errors
    // =========================================================================
    #[error("CQL session unavailable for {endpoint}: {reason}")]
    SessionUnavailable { endpoint: String, reason: String },

    #[error("CQL query failed with code {code:#06x}: {message}")]
    QueryFailed { code: i32, message: String },

    #[error("CQL protocol error: {0}")]
    Protocol(String),

    // =========================================================================
    // Version Errors
    // =========================================================================
    #[error("Malformed Cassandra version: {version}")]
    MalformedVersion { version: String },

    #[error("Unsupported Cassandra version: {version}")]
    UnsupportedVersion { version: String },

    // =========================================================================
    // Adapter Errors
    // =========================================================================
    #[error("No adapter loaded for instance {instance_id}; no successful health check yet")]
    AdapterUnavailable { instance_id: u32 },

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    // =========================================================================
    // Management RPC Errors
    // =========================================================================
    #[error("Management endpoint unavailable: {endpoint} - {reason}")]
    ManagementUnavailable { endpoint: String, reason: String },

    #[error("Remote invocation failed: {object_name}#{member}: {reason}")]
    RemoteInvocation {
        object_name: String,
        member: String,
        reason: String,
    },

    #[error("Invalid managed object name: {0}")]
    InvalidObjectName(String),

    // =========================================================================
    // Instance Registry Errors
    // =========================================================================
    #[error("Instance not found: {instance_id}")]
    InstanceNotFound { instance_id: u32 },

    // =========================================================================
    // Parse Errors
    // =========================================================================
    #[error("YAML parse error: {0}")]
    YamlParse(#[from] serde_yaml::Error),

    #[error("JSON parse error: {0}")]
    JsonParse(#[from] serde_json::Error),

    #[error("Metrics error: {0}")]
    Metrics(#[from] prometheus::Error),

    // =========================================================================
    // IO Errors
    // =========================================================================
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// The instance or its management endpoint could not be reached
    pub fn is_connectivity(&self) -> bool {
        matches!(
            self,
            Error::SessionUnavailable { .. } | Error::ManagementUnavailable { .. }
        )
    }

    /// Check if this error is transient
    pub fn is_transient(&self) -> bool {
        self.is_connectivity()
            || matches!(self, Error::AdapterUnavailable { .. } | Error::Timeout { .. })
    }

    /// Check if this error is retryable by the caller
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            Error::Configuration(_)
                | Error::InvalidArgument(_)
                | Error::InvalidObjectName(_)
                | Error::MalformedVersion { .. }
                | Error::UnsupportedVersion { .. }
                | Error::InstanceNotFound { .. }
        )
    }
}

/// Result type alias for the sidecar
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connectivity_classification() {
        let err = Error::SessionUnavailable {
            endpoint: "127.0.0.1:9042".into(),
            reason: "connection refused".into(),
        };
        assert!(err.is_connectivity());
        assert!(err.is_transient());
        assert!(err.is_retryable());

        let err = Error::RemoteInvocation {
            object_name: "org.apache.cassandra.db:type=StorageService".into(),
            member: "takeSnapshot".into(),
            reason: "snapshot already exists".into(),
        };
        assert!(!err.is_connectivity());
        assert!(!err.is_transient());
    }

    #[test]
    fn test_caller_errors_not_retryable() {
        let err = Error::InvalidArgument("snapshot tag must be non-empty".into());
        assert!(!err.is_retryable());
        assert!(!err.is_connectivity());

        let err = Error::UnsupportedVersion {
            version: "3.11.4".into(),
        };
        assert!(!err.is_retryable());
    }
}
