//! Dynamic record values
//!
//! Storage drivers exchange records as *tuples*: name→value maps. `Value`
//! is the dynamic type a tuple field can hold, and `DataType` is the small
//! set of backend-native column types schema synchronization materializes.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// A record as stored by a driver: field name → value
pub type Tuple = BTreeMap<String, Value>;

/// Build a tuple from field/value pairs
pub fn fields<'a, I>(pairs: I) -> Tuple
where
    I: IntoIterator<Item = (&'a str, Value)>,
{
    pairs
        .into_iter()
        .map(|(name, value)| (name.to_string(), value))
        .collect()
}

// ============================================================================
// Value
// ============================================================================

/// A dynamically typed field value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    Array(Vec<Value>),
    Map(Tuple),
}

impl Value {
    /// Whether the value is null
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Integer view, if the value is an integer
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(v) => Some(*v),
            _ => None,
        }
    }

    /// String view, if the value is a string
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s.as_str()),
            _ => None,
        }
    }

    /// Map view, if the value is a map
    pub fn as_map(&self) -> Option<&Tuple> {
        match self {
            Value::Map(m) => Some(m),
            _ => None,
        }
    }

    /// The column type a value of this shape infers
    pub fn data_type(&self) -> DataType {
        match self {
            Value::Int(_) => DataType::UInt,
            Value::String(_) => DataType::String,
            _ => DataType::Variant,
        }
    }

    /// Convert to a plain JSON value (containers included)
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Null => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(*b),
            Value::Int(i) => serde_json::Value::from(*i),
            Value::Float(f) => serde_json::Number::from_f64(*f)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Value::String(s) => serde_json::Value::String(s.clone()),
            Value::Array(items) => {
                serde_json::Value::Array(items.iter().map(Value::to_json).collect())
            }
            Value::Map(map) => serde_json::Value::Object(
                map.iter().map(|(k, v)| (k.clone(), v.to_json())).collect(),
            ),
        }
    }

    /// Canonical string form used for shard-key hashing
    pub fn to_string_value(&self) -> String {
        match self {
            Value::Null => String::new(),
            Value::Bool(b) => b.to_string(),
            Value::Int(i) => i.to_string(),
            Value::Float(f) => f.to_string(),
            Value::String(s) => s.clone(),
            Value::Array(_) | Value::Map(_) => self.to_json().to_string(),
        }
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

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
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

impl From<Vec<Value>> for Value {
    fn from(v: Vec<Value>) -> Self {
        Value::Array(v)
    }
}

impl From<Tuple> for Value {
    fn from(v: Tuple) -> Self {
        Value::Map(v)
    }
}

// ============================================================================
// Column Types
// ============================================================================

/// Backend-native column types produced by schema synchronization
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DataType {
    /// Unsigned integer
    UInt,
    /// UTF-8 string
    String,
    /// Variant/any (arrays, maps, mixed)
    Variant,
}

/// Column definition
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnDef {
    /// Column name
    pub name: String,
    /// Data type
    pub data_type: DataType,
}

impl ColumnDef {
    /// Create a new column definition
    pub fn new(name: impl Into<String>, data_type: DataType) -> Self {
        Self {
            name: name.into(),
            data_type,
        }
    }
}

// ============================================================================
// Matching
// ============================================================================

/// Full match: every query field equals the corresponding row field
pub fn matches(row: &Tuple, query: &Tuple) -> bool {
    query
        .iter()
        .all(|(name, value)| row.get(name) == Some(value))
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fields_builder() {
        let row = fields([("id", Value::Int(7)), ("name", Value::from("abc"))]);
        assert_eq!(row.get("id"), Some(&Value::Int(7)));
        assert_eq!(row.get("name").and_then(Value::as_str), Some("abc"));
    }

    #[test]
    fn test_string_form() {
        assert_eq!(Value::Int(7).to_string_value(), "7");
        assert_eq!(Value::from("abc").to_string_value(), "abc");
        assert_eq!(Value::Null.to_string_value(), "");
        let arr = Value::Array(vec![Value::Int(1), Value::Int(2)]);
        assert_eq!(arr.to_string_value(), "[1,2]");
    }

    #[test]
    fn test_inferred_types() {
        assert_eq!(Value::Int(1).data_type(), DataType::UInt);
        assert_eq!(Value::from("x").data_type(), DataType::String);
        assert_eq!(Value::Array(Vec::new()).data_type(), DataType::Variant);
    }

    #[test]
    fn test_matches_all_equal() {
        let row = fields([("id", Value::Int(1)), ("sum", Value::Int(10))]);
        assert!(matches(&row, &fields([("id", Value::Int(1))])));
        assert!(matches(&row, &Tuple::new()));
        assert!(!matches(&row, &fields([("id", Value::Int(2))])));
        assert!(!matches(&row, &fields([("missing", Value::Null)])));
    }
}
