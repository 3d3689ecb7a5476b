//! Typed field values
//!
//! Resource fields travel between the spec source, the reconciler and the
//! remote service as [`FieldValue`]s. Every accessor is total: asking for the
//! wrong shape yields [`ReconcileError::InvalidField`] instead of a panic.

use crate::error::{ReconcileError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Field name to value mapping, ordered for stable requests and state files
pub type FieldMap = BTreeMap<String, FieldValue>;

/// A single typed field value
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Bool(bool),
    Int(i64),
    String(String),
    List(Vec<FieldValue>),
    Map(FieldMap),
}

impl FieldValue {
    /// Short name of the variant, used in error messages
    pub fn type_name(&self) -> &'static str {
        match self {
            FieldValue::Bool(_) => "bool",
            FieldValue::Int(_) => "int",
            FieldValue::String(_) => "string",
            FieldValue::List(_) => "list",
            FieldValue::Map(_) => "map",
        }
    }

    fn mismatch(&self, field: &str, expected: &'static str) -> ReconcileError {
        ReconcileError::InvalidField {
            field: field.to_string(),
            expected,
            found: self.type_name().to_string(),
        }
    }

    pub fn as_str(&self, field: &str) -> Result<&str> {
        match self {
            FieldValue::String(s) => Ok(s),
            other => Err(other.mismatch(field, "string")),
        }
    }

    pub fn as_int(&self, field: &str) -> Result<i64> {
        match self {
            FieldValue::Int(i) => Ok(*i),
            other => Err(other.mismatch(field, "int")),
        }
    }

    pub fn as_bool(&self, field: &str) -> Result<bool> {
        match self {
            FieldValue::Bool(b) => Ok(*b),
            other => Err(other.mismatch(field, "bool")),
        }
    }

    pub fn as_list(&self, field: &str) -> Result<&[FieldValue]> {
        match self {
            FieldValue::List(items) => Ok(items),
            other => Err(other.mismatch(field, "list")),
        }
    }

    pub fn as_map(&self, field: &str) -> Result<&FieldMap> {
        match self {
            FieldValue::Map(map) => Ok(map),
            other => Err(other.mismatch(field, "map")),
        }
    }

    /// Render a scalar as an identity segment. Remote APIs return ids as
    /// either strings or integers.
    pub fn as_segment(&self, field: &str) -> Result<String> {
        match self {
            FieldValue::String(s) => Ok(s.clone()),
            FieldValue::Int(i) => Ok(i.to_string()),
            other => Err(other.mismatch(field, "string or int")),
        }
    }

    /// Convert a JSON value. Floats and nulls have no counterpart and are
    /// rejected.
    pub fn from_json(field: &str, value: serde_json::Value) -> Result<Self> {
        use serde_json::Value;

        match value {
            Value::Bool(b) => Ok(FieldValue::Bool(b)),
            Value::Number(n) => n.as_i64().map(FieldValue::Int).ok_or_else(|| {
                ReconcileError::InvalidField {
                    field: field.to_string(),
                    expected: "integer",
                    found: n.to_string(),
                }
            }),
            Value::String(s) => Ok(FieldValue::String(s)),
            Value::Array(items) => items
                .into_iter()
                .map(|item| FieldValue::from_json(field, item))
                .collect::<Result<Vec<_>>>()
                .map(FieldValue::List),
            Value::Object(entries) => entries
                .into_iter()
                .map(|(k, v)| {
                    let nested = format!("{}.{}", field, k);
                    FieldValue::from_json(&nested, v).map(|v| (k, v))
                })
                .collect::<Result<FieldMap>>()
                .map(FieldValue::Map),
            Value::Null => Err(ReconcileError::InvalidField {
                field: field.to_string(),
                expected: "value",
                found: "null".to_string(),
            }),
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        use serde_json::Value;

        match self {
            FieldValue::Bool(b) => Value::Bool(*b),
            FieldValue::Int(i) => Value::from(*i),
            FieldValue::String(s) => Value::String(s.clone()),
            FieldValue::List(items) => Value::Array(items.iter().map(|v| v.to_json()).collect()),
            FieldValue::Map(map) => Value::Object(
                map.iter()
                    .map(|(k, v)| (k.clone(), v.to_json()))
                    .collect(),
            ),
        }
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::String(s) => write!(f, "{}", s),
            other => write!(f, "{}", other.to_json()),
        }
    }
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        FieldValue::String(value.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(value: String) -> Self {
        FieldValue::String(value)
    }
}

impl From<i64> for FieldValue {
    fn from(value: i64) -> Self {
        FieldValue::Int(value)
    }
}

impl From<i32> for FieldValue {
    fn from(value: i32) -> Self {
        FieldValue::Int(value.into())
    }
}

impl From<bool> for FieldValue {
    fn from(value: bool) -> Self {
        FieldValue::Bool(value)
    }
}

impl From<Vec<FieldValue>> for FieldValue {
    fn from(value: Vec<FieldValue>) -> Self {
        FieldValue::List(value)
    }
}

impl From<FieldMap> for FieldValue {
    fn from(value: FieldMap) -> Self {
        FieldValue::Map(value)
    }
}

/// Required-field lookups on a [`FieldMap`]
pub trait FieldMapExt {
    fn require(&self, field: &str, operation: &str) -> Result<&FieldValue>;
}

impl FieldMapExt for FieldMap {
    fn require(&self, field: &str, operation: &str) -> Result<&FieldValue> {
        self.get(field).ok_or_else(|| ReconcileError::MissingField {
            field: field.to_string(),
            operation: operation.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_accessor_mismatch_is_typed_error() {
        let value = FieldValue::Int(2);

        assert_eq!(value.as_int("number").unwrap(), 2);
        match value.as_str("number") {
            Err(ReconcileError::InvalidField {
                field,
                expected,
                found,
            }) => {
                assert_eq!(field, "number");
                assert_eq!(expected, "string");
                assert_eq!(found, "int");
            }
            other => panic!("expected InvalidField, got {:?}", other),
        }
    }

    #[test]
    fn test_from_json_nested() {
        let value = FieldValue::from_json(
            "config",
            json!({"name": "g1", "ports": [80, 443], "public": true}),
        )
        .unwrap();

        let map = value.as_map("config").unwrap();
        assert_eq!(map["name"].as_str("name").unwrap(), "g1");
        assert_eq!(map["ports"].as_list("ports").unwrap().len(), 2);
        assert!(map["public"].as_bool("public").unwrap());
        assert_eq!(value.to_json()["ports"][1], json!(443));
    }

    #[test]
    fn test_from_json_rejects_float_and_null() {
        let err = FieldValue::from_json("spec", json!({"ratio": 0.5})).unwrap_err();
        assert!(err.to_string().contains("spec.ratio"));

        assert!(FieldValue::from_json("x", serde_json::Value::Null).is_err());
    }

    #[test]
    fn test_segment_accepts_string_and_int() {
        assert_eq!(FieldValue::from("gw-1").as_segment("id").unwrap(), "gw-1");
        assert_eq!(FieldValue::Int(42).as_segment("id").unwrap(), "42");
        assert!(FieldValue::from(true).as_segment("id").is_err());
    }

    #[test]
    fn test_untagged_serde() {
        let map: FieldMap =
            serde_json::from_str(r#"{"name":"g1","number":2,"enabled":false}"#).unwrap();
        assert_eq!(map["name"], FieldValue::from("g1"));
        assert_eq!(map["number"], FieldValue::Int(2));
        assert_eq!(map["enabled"], FieldValue::Bool(false));
    }
}
