//! Values produced by image statistics queries.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A single statistic value.
///
/// Serialized untagged so that statistics records and reference dictionaries
/// read and write as plain JSON (`1.5`, `[0.1, 0.2]`, `true`, `"ellipse[...]"`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Bool(bool),
    Int(i64),
    Float(f64),
    Floats(Vec<f64>),
    Text(String),
}

impl Value {
    /// Numeric view of the value, if it has one.
    ///
    /// Booleans and text have no numeric view. Integers are widened to f64.
    pub fn as_floats(&self) -> Option<Vec<f64>> {
        match self {
            Value::Int(i) => Some(vec![*i as f64]),
            Value::Float(f) => Some(vec![*f]),
            Value::Floats(v) => Some(v.clone()),
            Value::Bool(_) | Value::Text(_) => None,
        }
    }

    /// The value as a single float, if it is scalar numeric or a one-element array.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(i) => Some(*i as f64),
            Value::Float(f) => Some(*f),
            Value::Floats(v) if v.len() == 1 => Some(v[0]),
            _ => None,
        }
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<Vec<f64>> for Value {
    fn from(v: Vec<f64>) -> Self {
        Value::Floats(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Value::Bool(b) => write!(f, "{b}"),
            Value::Int(i) => write!(f, "{i}"),
            Value::Float(v) => write!(f, "{v:?}"),
            Value::Floats(v) => write!(f, "{v:?}"),
            Value::Text(s) => write!(f, "{s}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_untagged_json_forms() {
        let v: Value = serde_json::from_str("1.5").unwrap();
        assert_eq!(v, Value::Float(1.5));

        let v: Value = serde_json::from_str("4").unwrap();
        assert_eq!(v, Value::Int(4));

        let v: Value = serde_json::from_str("[0.5, 2.0]").unwrap();
        assert_eq!(v, Value::Floats(vec![0.5, 2.0]));

        let v: Value = serde_json::from_str("true").unwrap();
        assert_eq!(v, Value::Bool(true));

        let v: Value = serde_json::from_str("\"ellipse\"").unwrap();
        assert_eq!(v, Value::Text("ellipse".to_string()));
    }

    #[test]
    fn test_numeric_views() {
        assert_eq!(Value::Int(3).as_f64(), Some(3.0));
        assert_eq!(Value::Floats(vec![2.0]).as_f64(), Some(2.0));
        assert_eq!(Value::Floats(vec![1.0, 2.0]).as_f64(), None);
        assert_eq!(Value::Bool(true).as_floats(), None);
        assert_eq!(Value::Text("x".into()).as_f64(), None);
    }
}
