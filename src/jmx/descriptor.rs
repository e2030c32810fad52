//! Capability interface descriptors
//!
//! A typed proxy declares, once and statically, how each of its methods maps
//! onto a remote attribute or operation. The descriptor is checked and indexed
//! when a proxy is constructed, so calls never search or reflect at runtime.

use crate::error::{Error, Result};
use std::collections::HashMap;

/// How a proxy method reaches the remote object
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemberKind {
    /// Zero-argument attribute read
    Attribute,
    /// Operation invocation; `signature` lists the remote parameter types
    Operation { signature: &'static [&'static str] },
}

/// One proxy method
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemberDescriptor {
    pub method: &'static str,
    pub remote_name: &'static str,
    pub kind: MemberKind,
}

impl MemberDescriptor {
    pub const fn attribute(method: &'static str, remote_name: &'static str) -> Self {
        Self {
            method,
            remote_name,
            kind: MemberKind::Attribute,
        }
    }

    pub const fn operation(
        method: &'static str,
        remote_name: &'static str,
        signature: &'static [&'static str],
    ) -> Self {
        Self {
            method,
            remote_name,
            kind: MemberKind::Operation { signature },
        }
    }

    pub fn arity(&self) -> usize {
        match self.kind {
            MemberKind::Attribute => 0,
            MemberKind::Operation { signature } => signature.len(),
        }
    }
}

/// Static description of a capability interface
#[derive(Debug)]
pub struct InterfaceDescriptor {
    pub name: &'static str,
    pub members: &'static [MemberDescriptor],
}

impl InterfaceDescriptor {
    /// Validate and index the members by method name
    pub fn resolve(&'static self) -> Result<ResolvedInterface> {
        let mut members = HashMap::with_capacity(self.members.len());

        for member in self.members {
            if member.method.is_empty() || member.remote_name.is_empty() {
                return Err(Error::Internal(format!(
                    "interface {} declares a member without a name",
                    self.name
                )));
            }
            if let MemberKind::Operation { signature } = member.kind {
                if signature.iter().any(|ty| ty.is_empty()) {
                    return Err(Error::Internal(format!(
                        "{}.{} has an empty parameter type",
                        self.name, member.method
                    )));
                }
            }
            if members.insert(member.method, *member).is_some() {
                return Err(Error::Internal(format!(
                    "interface {} declares {} twice",
                    self.name, member.method
                )));
            }
        }

        Ok(ResolvedInterface {
            name: self.name,
            members,
        })
    }
}

/// A validated interface, indexed by method name
#[derive(Debug, Clone)]
pub struct ResolvedInterface {
    name: &'static str,
    members: HashMap<&'static str, MemberDescriptor>,
}

impl ResolvedInterface {
    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn member(&self, method: &str) -> Result<&MemberDescriptor> {
        self.members.get(method).ok_or_else(|| {
            Error::Internal(format!("{} has no method {}", self.name, method))
        })
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }
}
