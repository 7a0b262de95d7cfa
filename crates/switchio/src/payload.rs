//! User-facing event payload values.

use bytes::Bytes;
use serde_json::Value;

/// One argument of an emitted or received event: JSON or raw bytes.
///
/// Bytes arguments turn an outgoing event into a binary event with one
/// attachment per bytes value.
#[derive(Debug, Clone, PartialEq)]
pub enum Data {
    Json(Value),
    Binary(Bytes),
}

impl Data {
    pub fn is_binary(&self) -> bool {
        matches!(self, Data::Binary(_))
    }

    pub fn as_json(&self) -> Option<&Value> {
        match self {
            Data::Json(value) => Some(value),
            Data::Binary(_) => None,
        }
    }

    pub fn as_binary(&self) -> Option<&Bytes> {
        match self {
            Data::Binary(data) => Some(data),
            Data::Json(_) => None,
        }
    }
}

impl From<Value> for Data {
    fn from(value: Value) -> Self {
        Data::Json(value)
    }
}

impl From<&str> for Data {
    fn from(value: &str) -> Self {
        Data::Json(Value::String(value.to_owned()))
    }
}

impl From<String> for Data {
    fn from(value: String) -> Self {
        Data::Json(Value::String(value))
    }
}

impl From<bool> for Data {
    fn from(value: bool) -> Self {
        Data::Json(Value::Bool(value))
    }
}

impl From<i64> for Data {
    fn from(value: i64) -> Self {
        Data::Json(Value::from(value))
    }
}

impl From<f64> for Data {
    fn from(value: f64) -> Self {
        Data::Json(Value::from(value))
    }
}

impl From<Bytes> for Data {
    fn from(value: Bytes) -> Self {
        Data::Binary(value)
    }
}

impl From<Vec<u8>> for Data {
    fn from(value: Vec<u8>) -> Self {
        Data::Binary(value.into())
    }
}
