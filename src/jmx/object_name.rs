//! Managed object names (`domain:key=value[,key=value]`)

use crate::error::{Error, Result};
use std::fmt;

/// A validated managed object name
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ObjectName {
    name: String,
    domain_len: usize,
}

impl ObjectName {
    pub fn parse(name: &str) -> Result<Self> {
        let invalid = |reason: &str| Error::InvalidObjectName(format!("{}: {}", name, reason));

        let (domain, properties) = name
            .split_once(':')
            .ok_or_else(|| invalid("missing ':' between domain and properties"))?;

        if domain.is_empty() {
            return Err(invalid("empty domain"));
        }
        if properties.is_empty() {
            return Err(invalid("no key properties"));
        }

        for property in properties.split(',') {
            match property.split_once('=') {
                Some((key, value)) if !key.is_empty() && !value.is_empty() => {}
                _ => return Err(invalid("key properties must be key=value")),
            }
        }

        Ok(Self {
            name: name.to_string(),
            domain_len: domain.len(),
        })
    }

    pub fn as_str(&self) -> &str {
        &self.name
    }

    pub fn domain(&self) -> &str {
        &self.name[..self.domain_len]
    }

    /// Value of a key property, e.g. `type`
    pub fn property(&self, key: &str) -> Option<&str> {
        self.name[self.domain_len + 1..]
            .split(',')
            .filter_map(|property| property.split_once('='))
            .find(|(k, _)| *k == key)
            .map(|(_, v)| v)
    }
}

impl fmt::Display for ObjectName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}
