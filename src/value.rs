//! Typed values produced by locators and consumed by activity fields.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;

/// A single typed value resolved from a raw item.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(untagged)]
pub enum FieldValue {
    String(String),
    Int(i64),
    Float(f64),
    Bool(bool),
    Binary(Vec<u8>),
    Timestamp(DateTime<Utc>),
    List(Vec<FieldValue>),
    Null,
}

impl FieldValue {
    pub fn is_null(&self) -> bool {
        matches!(self, FieldValue::Null)
    }

    /// Borrow the text of a `String` value.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            FieldValue::String(s) => Some(s),
            _ => None,
        }
    }

    /// Integer view of numeric values. Floats are truncated.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            FieldValue::Int(i) => Some(*i),
            FieldValue::Float(f) => Some(*f as i64),
            _ => None,
        }
    }

    /// Convert a JSON value into a field value, keeping numbers typed.
    pub fn from_json(value: &serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => FieldValue::Null,
            serde_json::Value::Bool(b) => FieldValue::Bool(*b),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(i) => FieldValue::Int(i),
                None => n.as_f64().map(FieldValue::Float).unwrap_or(FieldValue::Null),
            },
            serde_json::Value::String(s) => FieldValue::String(s.clone()),
            serde_json::Value::Array(items) => {
                FieldValue::List(items.iter().map(FieldValue::from_json).collect())
            }
            other => FieldValue::String(other.to_string()),
        }
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::String(s) => write!(f, "{}", s),
            FieldValue::Int(i) => write!(f, "{}", i),
            FieldValue::Float(fl) => write!(f, "{}", fl),
            FieldValue::Bool(b) => write!(f, "{}", b),
            FieldValue::Binary(bytes) => write!(f, "{}", String::from_utf8_lossy(bytes)),
            FieldValue::Timestamp(ts) => write!(f, "{}", ts.format("%Y-%m-%d %H:%M:%S%.6f")),
            FieldValue::List(l) => {
                let parts: Vec<String> = l.iter().map(|v| v.to_string()).collect();
                write!(f, "[{}]", parts.join(", "))
            }
            FieldValue::Null => write!(f, "null"),
        }
    }
}

impl From<&str> for FieldValue {
    fn from(s: &str) -> Self {
        FieldValue::String(s.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(s: String) -> Self {
        FieldValue::String(s)
    }
}

impl From<i64> for FieldValue {
    fn from(i: i64) -> Self {
        FieldValue::Int(i)
    }
}

/// Shape of a field's resolved value: one locator's output, or the ordered
/// outputs of several locators that still have to be joined.
#[derive(Debug, Clone, PartialEq)]
pub enum ResolvedValue {
    Scalar(FieldValue),
    Composite(Vec<FieldValue>),
}

impl ResolvedValue {
    /// Collapse a single-element composite into a scalar.
    pub fn normalize(self) -> Self {
        match self {
            ResolvedValue::Composite(mut values) if values.len() == 1 => {
                ResolvedValue::Scalar(values.remove(0))
            }
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_json_keeps_numbers_typed() {
        let json = serde_json::json!({"a": 5, "b": 1.5, "c": "x"});
        assert_eq!(FieldValue::from_json(&json["a"]), FieldValue::Int(5));
        assert_eq!(FieldValue::from_json(&json["b"]), FieldValue::Float(1.5));
        assert_eq!(FieldValue::from_json(&json["c"]), FieldValue::from("x"));
        assert_eq!(FieldValue::from_json(&json["missing"]), FieldValue::Null);
    }

    #[test]
    fn test_normalize_single_composite() {
        let single = ResolvedValue::Composite(vec![FieldValue::Int(1)]);
        assert_eq!(single.normalize(), ResolvedValue::Scalar(FieldValue::Int(1)));

        let pair = ResolvedValue::Composite(vec![FieldValue::Int(1), FieldValue::Int(2)]);
        assert!(matches!(pair.normalize(), ResolvedValue::Composite(v) if v.len() == 2));
    }
}
