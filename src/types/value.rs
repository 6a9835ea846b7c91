use serde::{Deserialize, Serialize};
use std::fmt;

/// The declared type of a property key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DataType {
    String,
    Integer,
    Float,
    Boolean,
    DateTime,
}

/// A single property value stored on a vertex or an edge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PropertyValue {
    String(String),
    Integer(i64),
    Float(f64),
    Boolean(bool),
    /// Unix timestamp in milliseconds.
    DateTime(i64),
}

impl PropertyValue {
    pub fn data_type(&self) -> DataType {
        match self {
            PropertyValue::String(_) => DataType::String,
            PropertyValue::Integer(_) => DataType::Integer,
            PropertyValue::Float(_) => DataType::Float,
            PropertyValue::Boolean(_) => DataType::Boolean,
            PropertyValue::DateTime(_) => DataType::DateTime,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            PropertyValue::String(s) => Some(s),
            _ => None,
        }
    }

    /// Converts a plain JSON scalar. Arrays, objects and null have no property equivalent.
    pub fn from_json(value: &serde_json::Value) -> Option<Self> {
        match value {
            serde_json::Value::String(s) => Some(PropertyValue::String(s.clone())),
            serde_json::Value::Bool(b) => Some(PropertyValue::Boolean(*b)),
            serde_json::Value::Number(n) => n
                .as_i64()
                .map(PropertyValue::Integer)
                .or_else(|| n.as_f64().map(PropertyValue::Float)),
            _ => None,
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        match self {
            PropertyValue::String(s) => serde_json::Value::String(s.clone()),
            PropertyValue::Integer(i) | PropertyValue::DateTime(i) => (*i).into(),
            PropertyValue::Float(f) => serde_json::Number::from_f64(*f)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            PropertyValue::Boolean(b) => serde_json::Value::Bool(*b),
        }
    }
}

impl fmt::Display for PropertyValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PropertyValue::String(s) => write!(f, "\"{}\"", s),
            PropertyValue::Integer(i) => write!(f, "{}", i),
            PropertyValue::Float(fl) => write!(f, "{}", fl),
            PropertyValue::Boolean(b) => write!(f, "{}", b),
            PropertyValue::DateTime(dt) => write!(f, "DateTime({})", dt),
        }
    }
}

impl From<String> for PropertyValue {
    fn from(s: String) -> Self {
        PropertyValue::String(s)
    }
}

impl From<&str> for PropertyValue {
    fn from(s: &str) -> Self {
        PropertyValue::String(s.to_string())
    }
}

impl From<i64> for PropertyValue {
    fn from(i: i64) -> Self {
        PropertyValue::Integer(i)
    }
}

impl From<i32> for PropertyValue {
    fn from(i: i32) -> Self {
        PropertyValue::Integer(i as i64)
    }
}

impl From<f64> for PropertyValue {
    fn from(f: f64) -> Self {
        PropertyValue::Float(f)
    }
}

impl From<bool> for PropertyValue {
    fn from(b: bool) -> Self {
        PropertyValue::Boolean(b)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_json_scalars_convert() {
        assert_eq!(
            PropertyValue::from_json(&json!("u1")),
            Some(PropertyValue::String("u1".into()))
        );
        assert_eq!(
            PropertyValue::from_json(&json!(42)),
            Some(PropertyValue::Integer(42))
        );
        assert_eq!(
            PropertyValue::from_json(&json!(1.5)),
            Some(PropertyValue::Float(1.5))
        );
        assert_eq!(PropertyValue::from_json(&json!(null)), None);
        assert_eq!(PropertyValue::from_json(&json!([1, 2])), None);
    }

    #[test]
    fn test_data_type_follows_variant() {
        assert_eq!(PropertyValue::from("x").data_type(), DataType::String);
        assert_eq!(PropertyValue::from(true).data_type(), DataType::Boolean);
        assert_eq!(PropertyValue::DateTime(0).data_type(), DataType::DateTime);
    }
}
