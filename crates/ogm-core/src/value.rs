//! Scalar attribute values and hashable identity keys.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Scalar attributes of an entity or relationship, sorted by name.
pub type Properties = BTreeMap<String, Value>;

/// A property value as stored on a node or relationship.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(untagged)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    List(Vec<Value>),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Interpret this value as an identity key.
    ///
    /// Only integers and strings identify nodes. Floats are rejected because
    /// equality on them is not an equivalence relation.
    pub fn as_key(&self) -> Option<KeyValue> {
        match self {
            Value::Int(i) => Some(KeyValue::Int(*i)),
            Value::String(s) => Some(KeyValue::String(s.clone())),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Float(f) => Some(*f),
            Value::Int(i) => Some(*i as f64),
            _ => None,
        }
    }

    /// Short type name used in error messages.
    pub fn kind(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::String(_) => "string",
            Value::List(_) => "list",
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(v as i64)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::String(v)
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(v: Vec<T>) -> Self {
        Value::List(v.into_iter().map(Into::into).collect())
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Value::Null)
    }
}

/// A value that can identify a node: natural keys and surrogate keys alike.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum KeyValue {
    Int(i64),
    String(String),
}

impl fmt::Display for KeyValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyValue::Int(i) => write!(f, "{i}"),
            KeyValue::String(s) => write!(f, "{s:?}"),
        }
    }
}

impl From<KeyValue> for Value {
    fn from(k: KeyValue) -> Self {
        match k {
            KeyValue::Int(i) => Value::Int(i),
            KeyValue::String(s) => Value::String(s),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_conversion() {
        assert_eq!(Value::from(42).as_key(), Some(KeyValue::Int(42)));
        assert_eq!(
            Value::from("123").as_key(),
            Some(KeyValue::String("123".to_string()))
        );
        assert_eq!(Value::Float(20.0).as_key(), None);
        assert_eq!(Value::Null.as_key(), None);
        assert_eq!(Value::Bool(true).as_key(), None);
    }

    #[test]
    fn test_untagged_json_shapes() {
        let v: Value = serde_json::from_str("20").unwrap();
        assert_eq!(v, Value::Int(20));

        let v: Value = serde_json::from_str("20.5").unwrap();
        assert_eq!(v, Value::Float(20.5));

        let v: Value = serde_json::from_str("null").unwrap();
        assert!(v.is_null());

        let v: Value = serde_json::from_str(r#"["a", 1]"#).unwrap();
        assert_eq!(v, Value::List(vec![Value::from("a"), Value::Int(1)]));
    }

    #[test]
    fn test_option_into_value() {
        let none: Option<&str> = None;
        assert_eq!(Value::from(none), Value::Null);
        assert_eq!(Value::from(Some(3)), Value::Int(3));
    }
}
