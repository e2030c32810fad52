//! Managed-object proxies
//!
//! [`MBeanProxy`] performs the marshal/unmarshal for one managed object;
//! typed proxies implementing [`ManagedInterface`] wrap it with one small
//! stub per declared method.

use super::client::JmxClient;
use super::descriptor::{InterfaceDescriptor, MemberKind, ResolvedInterface};
use super::object_name::ObjectName;
use super::value::ManagedValue;
use crate::error::{Error, Result};
use std::sync::Arc;

/// A capability interface served by a remote managed object
pub trait ManagedInterface: Sized {
    fn descriptor() -> &'static InterfaceDescriptor;

    fn bind(proxy: MBeanProxy) -> Self;
}

/// Untyped proxy bound to one managed object
#[derive(Clone)]
pub struct MBeanProxy {
    client: Arc<JmxClient>,
    object_name: ObjectName,
    interface: Arc<ResolvedInterface>,
}

impl MBeanProxy {
    pub(crate) fn new(
        client: Arc<JmxClient>,
        object_name: ObjectName,
        interface: Arc<ResolvedInterface>,
    ) -> Self {
        Self {
            client,
            object_name,
            interface,
        }
    }

    pub fn object_name(&self) -> &ObjectName {
        &self.object_name
    }

    /// Read the attribute behind `method`
    pub async fn get(&self, method: &str) -> Result<ManagedValue> {
        let member = self.interface.member(method)?;
        if member.kind != MemberKind::Attribute {
            return Err(Error::Internal(format!(
                "{}.{} is an operation",
                self.interface.name(),
                method
            )));
        }
        self.client.read_attribute(&self.object_name, member.remote_name).await
    }

    /// Invoke the operation behind `method`
    pub async fn call(&self, method: &str, args: Vec<ManagedValue>) -> Result<ManagedValue> {
        let member = self.interface.member(method)?;
        if args.len() != member.arity() {
            return Err(Error::Internal(format!(
                "{}.{} takes {} arguments, got {}",
                self.interface.name(),
                method,
                member.arity(),
                args.len()
            )));
        }
        self.client
            .invoke(&self.object_name, member.remote_name, member.kind, args)
            .await
    }

    /// Read a string attribute
    pub async fn get_string(&self, method: &str) -> Result<String> {
        let value = self.get(method).await?;
        match value {
            ManagedValue::Text(s) => Ok(s),
            other => Err(self.unexpected(method, "string", &other)),
        }
    }

    /// Invoke a void operation, discarding any returned value
    pub async fn call_void(&self, method: &str, args: Vec<ManagedValue>) -> Result<()> {
        self.call(method, args).await.map(|_| ())
    }

    fn unexpected(&self, method: &str, expected: &str, got: &ManagedValue) -> Error {
        let remote = self
            .interface
            .member(method)
            .map(|m| m.remote_name)
            .unwrap_or("?");
        Error::RemoteInvocation {
            object_name: self.object_name.to_string(),
            member: remote.to_string(),
            reason: format!("expected {}, got {}", expected, got.type_name()),
        }
    }
}

impl std::fmt::Debug for MBeanProxy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MBeanProxy")
            .field("interface", &self.interface.name())
            .field("object_name", &self.object_name.as_str())
            .finish()
    }
}
