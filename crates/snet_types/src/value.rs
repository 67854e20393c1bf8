//! Typed value model
//!
//! One variant per supported scalar and array kind. Conversion, transforms,
//! virtual generators and payload formatting all work on this sum type.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use crate::types::{DataType, ScalarType};

/// Format used when a date/time is stringified
pub const DATETIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.f";

// ─────────────────────────────────────────────────────────────────────────────
// Value
// ─────────────────────────────────────────────────────────────────────────────

/// A typed address value
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value")]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    String(String),
    Char(char),
    Double(f64),
    Float(f32),
    Int16(i16),
    UInt16(u16),
    Int32(i32),
    UInt32(u32),
    Int64(i64),
    UInt64(u64),
    DateTime(NaiveDateTime),
    BoolArray(Vec<bool>),
    StringArray(Vec<String>),
    CharArray(Vec<char>),
    DoubleArray(Vec<f64>),
    FloatArray(Vec<f32>),
    Int16Array(Vec<i16>),
    UInt16Array(Vec<u16>),
    Int32Array(Vec<i32>),
    UInt32Array(Vec<u32>),
    Int64Array(Vec<i64>),
    UInt64Array(Vec<u64>),
    DateTimeArray(Vec<NaiveDateTime>),
}

macro_rules! array_items {
    ($arr:expr, $f:expr) => {
        $arr.iter().map($f).collect::<Vec<_>>()
    };
}

impl Value {
    /// Check if value is null
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Whether the value carries nothing usable (null, blank text, empty array)
    pub fn is_empty(&self) -> bool {
        match self {
            Value::Null => true,
            Value::String(s) => s.trim().is_empty(),
            other => other.len() == Some(0),
        }
    }

    /// Number of elements for array values
    pub fn len(&self) -> Option<usize> {
        let len = match self {
            Value::BoolArray(a) => a.len(),
            Value::StringArray(a) => a.len(),
            Value::CharArray(a) => a.len(),
            Value::DoubleArray(a) => a.len(),
            Value::FloatArray(a) => a.len(),
            Value::Int16Array(a) => a.len(),
            Value::UInt16Array(a) => a.len(),
            Value::Int32Array(a) => a.len(),
            Value::UInt32Array(a) => a.len(),
            Value::Int64Array(a) => a.len(),
            Value::UInt64Array(a) => a.len(),
            Value::DateTimeArray(a) => a.len(),
            _ => return None,
        };
        Some(len)
    }

    /// Declared type this value would satisfy
    pub fn data_type(&self) -> DataType {
        use ScalarType as S;
        match self {
            Value::Null => DataType::None,
            Value::Bool(_) => DataType::Scalar(S::Bool),
            Value::String(_) => DataType::Scalar(S::String),
            Value::Char(_) => DataType::Scalar(S::Char),
            Value::Double(_) => DataType::Scalar(S::Double),
            Value::Float(_) => DataType::Scalar(S::Float),
            Value::Int16(_) => DataType::Scalar(S::Int16),
            Value::UInt16(_) => DataType::Scalar(S::UInt16),
            Value::Int32(_) => DataType::Scalar(S::Int32),
            Value::UInt32(_) => DataType::Scalar(S::UInt32),
            Value::Int64(_) => DataType::Scalar(S::Int64),
            Value::UInt64(_) => DataType::Scalar(S::UInt64),
            Value::DateTime(_) => DataType::Scalar(S::DateTime),
            Value::BoolArray(_) => DataType::Array(S::Bool),
            Value::StringArray(_) => DataType::Array(S::String),
            Value::CharArray(_) => DataType::Array(S::Char),
            Value::DoubleArray(_) => DataType::Array(S::Double),
            Value::FloatArray(_) => DataType::Array(S::Float),
            Value::Int16Array(_) => DataType::Array(S::Int16),
            Value::UInt16Array(_) => DataType::Array(S::UInt16),
            Value::Int32Array(_) => DataType::Array(S::Int32),
            Value::UInt32Array(_) => DataType::Array(S::UInt32),
            Value::Int64Array(_) => DataType::Array(S::Int64),
            Value::UInt64Array(_) => DataType::Array(S::UInt64),
            Value::DateTimeArray(_) => DataType::Array(S::DateTime),
        }
    }

    /// Get as f64 (any numeric scalar)
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Double(v) => Some(*v),
            Value::Float(v) => Some(*v as f64),
            Value::Int16(v) => Some(*v as f64),
            Value::UInt16(v) => Some(*v as f64),
            Value::Int32(v) => Some(*v as f64),
            Value::UInt32(v) => Some(*v as f64),
            Value::Int64(v) => Some(*v as f64),
            Value::UInt64(v) => Some(*v as f64),
            _ => None,
        }
    }

    /// Get as i128 (integer scalars only)
    pub fn as_i128(&self) -> Option<i128> {
        match self {
            Value::Int16(v) => Some(*v as i128),
            Value::UInt16(v) => Some(*v as i128),
            Value::Int32(v) => Some(*v as i128),
            Value::UInt32(v) => Some(*v as i128),
            Value::Int64(v) => Some(*v as i128),
            Value::UInt64(v) => Some(*v as i128),
            _ => None,
        }
    }

    /// Get as boolean
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Get as string reference
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    /// Stringified array elements; `None` for scalars
    pub fn array_items(&self) -> Option<Vec<String>> {
        let items = match self {
            Value::BoolArray(a) => array_items!(a, |v| v.to_string()),
            Value::StringArray(a) => a.clone(),
            Value::CharArray(a) => array_items!(a, |v| v.to_string()),
            Value::DoubleArray(a) => array_items!(a, |v| v.to_string()),
            Value::FloatArray(a) => array_items!(a, |v| v.to_string()),
            Value::Int16Array(a) => array_items!(a, |v| v.to_string()),
            Value::UInt16Array(a) => array_items!(a, |v| v.to_string()),
            Value::Int32Array(a) => array_items!(a, |v| v.to_string()),
            Value::UInt32Array(a) => array_items!(a, |v| v.to_string()),
            Value::Int64Array(a) => array_items!(a, |v| v.to_string()),
            Value::UInt64Array(a) => array_items!(a, |v| v.to_string()),
            Value::DateTimeArray(a) => array_items!(a, |v| v.format(DATETIME_FORMAT).to_string()),
            _ => return None,
        };
        Some(items)
    }

    /// Plain JSON form (numbers, strings, arrays), as handed to scripts and sinks
    pub fn to_json(&self) -> serde_json::Value {
        use serde_json::Value as J;
        fn num(f: f64) -> J {
            serde_json::Number::from_f64(f).map(J::Number).unwrap_or(J::Null)
        }
        match self {
            Value::Null => J::Null,
            Value::Bool(b) => J::Bool(*b),
            Value::String(s) => J::String(s.clone()),
            Value::Char(c) => J::String(c.to_string()),
            Value::Double(v) => num(*v),
            Value::Float(v) => num(*v as f64),
            Value::Int16(v) => J::from(*v),
            Value::UInt16(v) => J::from(*v),
            Value::Int32(v) => J::from(*v),
            Value::UInt32(v) => J::from(*v),
            Value::Int64(v) => J::from(*v),
            Value::UInt64(v) => J::from(*v),
            Value::DateTime(d) => J::String(d.format(DATETIME_FORMAT).to_string()),
            Value::BoolArray(a) => J::Array(array_items!(a, |v| J::Bool(*v))),
            Value::DoubleArray(a) => J::Array(array_items!(a, |v| num(*v))),
            Value::FloatArray(a) => J::Array(array_items!(a, |v| num(*v as f64))),
            Value::Int16Array(a) => J::Array(array_items!(a, |v| J::from(*v))),
            Value::UInt16Array(a) => J::Array(array_items!(a, |v| J::from(*v))),
            Value::Int32Array(a) => J::Array(array_items!(a, |v| J::from(*v))),
            Value::UInt32Array(a) => J::Array(array_items!(a, |v| J::from(*v))),
            Value::Int64Array(a) => J::Array(array_items!(a, |v| J::from(*v))),
            Value::UInt64Array(a) => J::Array(array_items!(a, |v| J::from(*v))),
            Value::StringArray(_) | Value::CharArray(_) | Value::DateTimeArray(_) => J::Array(
                self.array_items()
                    .unwrap_or_default()
                    .into_iter()
                    .map(J::String)
                    .collect(),
            ),
        }
    }

    /// Best-effort typed value from plain JSON
    ///
    /// Integers become `Int32` when they fit, otherwise `Int64`/`UInt64`;
    /// homogeneous arrays become the matching array variant, anything else is
    /// kept as text.
    pub fn from_json(json: &serde_json::Value) -> Value {
        use serde_json::Value as J;
        match json {
            J::Null => Value::Null,
            J::Bool(b) => Value::Bool(*b),
            J::Number(n) => {
                if let Some(i) = n.as_i64() {
                    i32::try_from(i).map(Value::Int32).unwrap_or(Value::Int64(i))
                } else if let Some(u) = n.as_u64() {
                    Value::UInt64(u)
                } else {
                    Value::Double(n.as_f64().unwrap_or(f64::NAN))
                }
            }
            J::String(s) => Value::String(s.clone()),
            J::Array(items) => Self::array_from_json(items),
            J::Object(_) => Value::String(json.to_string()),
        }
    }

    fn array_from_json(items: &[serde_json::Value]) -> Value {
        use serde_json::Value as J;
        if !items.is_empty() && items.iter().all(J::is_boolean) {
            return Value::BoolArray(items.iter().filter_map(J::as_bool).collect());
        }
        if !items.is_empty() && items.iter().all(|v| v.as_i64().is_some()) {
            let ints: Vec<i64> = items.iter().filter_map(J::as_i64).collect();
            if ints.iter().all(|i| i32::try_from(*i).is_ok()) {
                return Value::Int32Array(ints.into_iter().map(|i| i as i32).collect());
            }
            return Value::Int64Array(ints);
        }
        if !items.is_empty() && items.iter().all(J::is_number) {
            return Value::DoubleArray(items.iter().filter_map(J::as_f64).collect());
        }
        Value::StringArray(
            items
                .iter()
                .map(|v| match v {
                    J::String(s) => s.clone(),
                    other => other.to_string(),
                })
                .collect(),
        )
    }
}

impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Null => Ok(()),
            Value::Bool(v) => write!(f, "{}", v),
            Value::String(v) => write!(f, "{}", v),
            Value::Char(v) => write!(f, "{}", v),
            Value::Double(v) => write!(f, "{}", v),
            Value::Float(v) => write!(f, "{}", v),
            Value::Int16(v) => write!(f, "{}", v),
            Value::UInt16(v) => write!(f, "{}", v),
            Value::Int32(v) => write!(f, "{}", v),
            Value::UInt32(v) => write!(f, "{}", v),
            Value::Int64(v) => write!(f, "{}", v),
            Value::UInt64(v) => write!(f, "{}", v),
            Value::DateTime(v) => write!(f, "{}", v.format(DATETIME_FORMAT)),
            other => write!(f, "{}", other.array_items().unwrap_or_default().join(",")),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// From Implementations
// ─────────────────────────────────────────────────────────────────────────────

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int32(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int64(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Double(v)
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::String(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_string())
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        match v {
            Some(val) => val.into(),
            None => Value::Null,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
