//! Jolokia transport
//!
//! Management calls travel as JSON over HTTP to a Jolokia agent attached to
//! the instance. Transport failures and rejected credentials surface as
//! `ManagementUnavailable`; failures reported by the remote object surface as
//! `RemoteInvocation`.

use super::client::{JmxConfig, ManagementConnection, ManagementConnector};
use super::object_name::ObjectName;
use super::value::ManagedValue;
use crate::error::{Error, Result};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::debug;

/// Response envelope returned for every request
#[derive(Debug, Deserialize)]
struct JolokiaResponse {
    status: u16,
    #[serde(default)]
    value: Value,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    error_type: Option<String>,
}

pub(crate) fn version_request() -> Value {
    json!({ "type": "version" })
}

pub(crate) fn read_request(object: &ObjectName, attribute: &str) -> Value {
    json!({
        "type": "read",
        "mbean": object.as_str(),
        "attribute": attribute,
    })
}

/// Operations are addressed by name and signature so overloads resolve
pub(crate) fn exec_request(
    object: &ObjectName,
    operation: &str,
    signature: &[&str],
    args: &[ManagedValue],
) -> Value {
    let operation = if signature.is_empty() {
        operation.to_string()
    } else {
        format!("{}({})", operation, signature.join(","))
    };
    json!({
        "type": "exec",
        "mbean": object.as_str(),
        "operation": operation,
        "arguments": args.iter().map(ManagedValue::to_json).collect::<Vec<_>>(),
    })
}

/// Opens Jolokia connections over HTTP(S)
#[derive(Debug, Default, Clone)]
pub struct JolokiaConnector;

impl JolokiaConnector {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl ManagementConnector for JolokiaConnector {
    async fn connect(&self, config: &JmxConfig) -> Result<Arc<dyn ManagementConnection>> {
        let endpoint = config.endpoint();
        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .connect_timeout(config.timeout)
            .build()
            .map_err(|e| Error::ManagementUnavailable {
                endpoint: endpoint.clone(),
                reason: e.to_string(),
            })?;

        let scheme = if config.ssl_enabled { "https" } else { "http" };
        let connection = JolokiaConnection {
            http,
            url: format!("{}://{}/jolokia/", scheme, endpoint),
            endpoint,
            credentials: config
                .credentials()
                .map(|(role, password)| (role.to_string(), password.to_string())),
        };

        let agent = connection.post(version_request(), None).await?;
        debug!("Connected to Jolokia agent at {}: {}", connection.endpoint, agent);
        Ok(Arc::new(connection))
    }
}

/// An authenticated Jolokia endpoint
pub struct JolokiaConnection {
    http: reqwest::Client,
    url: String,
    endpoint: String,
    credentials: Option<(String, String)>,
}

impl JolokiaConnection {
    async fn post(&self, body: Value, target: Option<(&ObjectName, &str)>) -> Result<Value> {
        let unavailable = |reason: String| Error::ManagementUnavailable {
            endpoint: self.endpoint.clone(),
            reason,
        };

        let mut request = self.http.post(&self.url).json(&body);
        if let Some((role, password)) = &self.credentials {
            request = request.basic_auth(role, Some(password));
        }

        let response = request.send().await.map_err(|e| unavailable(e.to_string()))?;
        let status = response.status();
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
            return Err(unavailable(format!("authentication rejected ({})", status)));
        }
        if !status.is_success() {
            return Err(unavailable(format!("unexpected HTTP status {}", status)));
        }

        let envelope: JolokiaResponse = response
            .json()
            .await
            .map_err(|e| unavailable(format!("invalid response: {}", e)))?;

        if envelope.status != 200 {
            let reason = match (envelope.error_type, envelope.error) {
                (_, Some(error)) => error,
                (Some(error_type), None) => error_type,
                (None, None) => format!("status {}", envelope.status),
            };
            let (object_name, member) = target
                .map(|(object, member)| (object.to_string(), member.to_string()))
                .unwrap_or_else(|| ("jolokia".to_string(), "version".to_string()));
            return Err(Error::RemoteInvocation {
                object_name,
                member,
                reason,
            });
        }

        Ok(envelope.value)
    }
}

#[async_trait]
impl ManagementConnection for JolokiaConnection {
    async fn read_attribute(&self, object: &ObjectName, attribute: &str) -> Result<ManagedValue> {
        let value = self
            .post(read_request(object, attribute), Some((object, attribute)))
            .await?;
        Ok(ManagedValue::from_json(value))
    }

    async fn invoke(
        &self,
        object: &ObjectName,
        operation: &str,
        signature: &[&str],
        args: Vec<ManagedValue>,
    ) -> Result<ManagedValue> {
        let body = exec_request(object, operation, signature, &args);
        let value = self.post(body, Some((object, operation))).await?;
        Ok(ManagedValue::from_json(value))
    }
}
