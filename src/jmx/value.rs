//! Values exchanged with managed objects

use serde_json::{Map, Number, Value};
use std::collections::BTreeMap;

/// An argument to, or result of, a managed-object attribute read or operation
#[derive(Debug, Clone, PartialEq)]
pub enum ManagedValue {
    Null,
    Bool(bool),
    Long(i64),
    Double(f64),
    Text(String),
    TextArray(Vec<String>),
    TextMap(BTreeMap<String, String>),
    /// Anything without a flat representation (composite data, nested tables)
    Composite(Value),
}

impl ManagedValue {
    pub fn to_json(&self) -> Value {
        match self {
            ManagedValue::Null => Value::Null,
            ManagedValue::Bool(b) => Value::Bool(*b),
            ManagedValue::Long(n) => Value::Number((*n).into()),
            ManagedValue::Double(n) => Number::from_f64(*n).map(Value::Number).unwrap_or(Value::Null),
            ManagedValue::Text(s) => Value::String(s.clone()),
            ManagedValue::TextArray(items) => {
                Value::Array(items.iter().cloned().map(Value::String).collect())
            }
            ManagedValue::TextMap(map) => Value::Object(
                map.iter()
                    .map(|(k, v)| (k.clone(), Value::String(v.clone())))
                    .collect::<Map<String, Value>>(),
            ),
            ManagedValue::Composite(value) => value.clone(),
        }
    }

    pub fn from_json(value: Value) -> Self {
        match value {
            Value::Null => ManagedValue::Null,
            Value::Bool(b) => ManagedValue::Bool(b),
            Value::Number(n) => match n.as_i64() {
                Some(long) => ManagedValue::Long(long),
                None => ManagedValue::Double(n.as_f64().unwrap_or(f64::NAN)),
            },
            Value::String(s) => ManagedValue::Text(s),
            Value::Array(items) if items.iter().all(Value::is_string) => ManagedValue::TextArray(
                items
                    .into_iter()
                    .filter_map(|item| match item {
                        Value::String(s) => Some(s),
                        _ => None,
                    })
                    .collect(),
            ),
            Value::Object(map) if map.values().all(Value::is_string) => ManagedValue::TextMap(
                map.into_iter()
                    .filter_map(|(k, v)| match v {
                        Value::String(s) => Some((k, s)),
                        _ => None,
                    })
                    .collect(),
            ),
            other => ManagedValue::Composite(other),
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            ManagedValue::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, ManagedValue::Null)
    }

    /// Short type name for error messages
    pub fn type_name(&self) -> &'static str {
        match self {
            ManagedValue::Null => "null",
            ManagedValue::Bool(_) => "boolean",
            ManagedValue::Long(_) => "long",
            ManagedValue::Double(_) => "double",
            ManagedValue::Text(_) => "string",
            ManagedValue::TextArray(_) => "string[]",
            ManagedValue::TextMap(_) => "map",
            ManagedValue::Composite(_) => "composite",
        }
    }
}

impl From<&str> for ManagedValue {
    fn from(s: &str) -> Self {
        ManagedValue::Text(s.to_string())
    }
}

impl From<String> for ManagedValue {
    fn from(s: String) -> Self {
        ManagedValue::Text(s)
    }
}

impl From<bool> for ManagedValue {
    fn from(b: bool) -> Self {
        ManagedValue::Bool(b)
    }
}

impl From<i64> for ManagedValue {
    fn from(n: i64) -> Self {
        ManagedValue::Long(n)
    }
}

impl From<Vec<String>> for ManagedValue {
    fn from(items: Vec<String>) -> Self {
        ManagedValue::TextArray(items)
    }
}

impl From<BTreeMap<String, String>> for ManagedValue {
    fn from(map: BTreeMap<String, String>) -> Self {
        ManagedValue::TextMap(map)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_flat_json_values() {
        assert_eq!(ManagedValue::from_json(json!("NORMAL")), ManagedValue::Text("NORMAL".into()));
        assert_eq!(ManagedValue::from_json(json!(7199)), ManagedValue::Long(7199));
        assert_eq!(ManagedValue::from_json(json!(null)), ManagedValue::Null);
        assert_eq!(
            ManagedValue::from_json(json!(["ks.t1", "ks.t2"])),
            ManagedValue::TextArray(vec!["ks.t1".into(), "ks.t2".into()])
        );
    }

    #[test]
    fn test_nested_json_is_composite() {
        let value = json!({"keyspace": "ks", "tables": ["t1"]});
        assert_eq!(ManagedValue::from_json(value.clone()), ManagedValue::Composite(value));
    }

    #[test]
    fn test_map_to_json() {
        let mut options = BTreeMap::new();
        options.insert("ttl".to_string(), "1h".to_string());
        assert_eq!(ManagedValue::from(options).to_json(), json!({"ttl": "1h"}));
    }
}
