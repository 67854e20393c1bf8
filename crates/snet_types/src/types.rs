//! Declared data types
//!
//! An address declares one [`DataType`]: a scalar kind, a homogeneous
//! one-dimensional array of a scalar kind, or `None` (passthrough).
//! Tags are written as `"Int32"`, `"Int32[]"` or `"None"`.

use serde::{Deserialize, Serialize};

// ─────────────────────────────────────────────────────────────────────────────
// Scalar Type
// ─────────────────────────────────────────────────────────────────────────────

/// Scalar kinds supported by the pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScalarType {
    Bool,
    String,
    Char,
    Double,
    Float,
    Int16,
    UInt16,
    Int32,
    UInt32,
    Int64,
    UInt64,
    DateTime,
}

impl ScalarType {
    /// All scalar kinds, in declaration order
    pub const ALL: [ScalarType; 12] = [
        ScalarType::Bool,
        ScalarType::String,
        ScalarType::Char,
        ScalarType::Double,
        ScalarType::Float,
        ScalarType::Int16,
        ScalarType::UInt16,
        ScalarType::Int32,
        ScalarType::UInt32,
        ScalarType::Int64,
        ScalarType::UInt64,
        ScalarType::DateTime,
    ];

    /// Canonical tag name
    pub fn name(self) -> &'static str {
        match self {
            ScalarType::Bool => "Bool",
            ScalarType::String => "String",
            ScalarType::Char => "Char",
            ScalarType::Double => "Double",
            ScalarType::Float => "Float",
            ScalarType::Int16 => "Int16",
            ScalarType::UInt16 => "UInt16",
            ScalarType::Int32 => "Int32",
            ScalarType::UInt32 => "UInt32",
            ScalarType::Int64 => "Int64",
            ScalarType::UInt64 => "UInt64",
            ScalarType::DateTime => "DateTime",
        }
    }

    /// Whether arithmetic (step/range generators) applies to this kind
    pub fn is_numeric(self) -> bool {
        matches!(
            self,
            ScalarType::Double
                | ScalarType::Float
                | ScalarType::Int16
                | ScalarType::UInt16
                | ScalarType::Int32
                | ScalarType::UInt32
                | ScalarType::Int64
                | ScalarType::UInt64
        )
    }

    /// Whether this kind is an integer
    pub fn is_integer(self) -> bool {
        self.is_numeric() && !matches!(self, ScalarType::Double | ScalarType::Float)
    }

    fn parse_tag(tag: &str) -> Option<Self> {
        let lower = tag.trim().to_ascii_lowercase();
        let scalar = match lower.as_str() {
            "bool" | "boolean" => ScalarType::Bool,
            "string" | "str" => ScalarType::String,
            "char" => ScalarType::Char,
            "double" | "f64" => ScalarType::Double,
            "float" | "single" | "f32" => ScalarType::Float,
            "int16" | "short" | "i16" => ScalarType::Int16,
            "uint16" | "ushort" | "u16" => ScalarType::UInt16,
            "int32" | "int" | "i32" => ScalarType::Int32,
            "uint32" | "uint" | "u32" => ScalarType::UInt32,
            "int64" | "long" | "i64" => ScalarType::Int64,
            "uint64" | "ulong" | "u64" => ScalarType::UInt64,
            "datetime" | "date" => ScalarType::DateTime,
            _ => return None,
        };
        Some(scalar)
    }
}

impl std::fmt::Display for ScalarType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Data Type
// ─────────────────────────────────────────────────────────────────────────────

/// Declared type of an address
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum DataType {
    /// No conversion; the raw value passes through
    #[default]
    None,
    /// A single value of the given kind
    Scalar(ScalarType),
    /// A homogeneous one-dimensional array of the given kind
    Array(ScalarType),
}

impl DataType {
    /// Scalar kind of this type (element kind for arrays)
    pub fn scalar(self) -> Option<ScalarType> {
        match self {
            DataType::None => None,
            DataType::Scalar(s) | DataType::Array(s) => Some(s),
        }
    }

    /// Whether this is an array type
    pub fn is_array(self) -> bool {
        matches!(self, DataType::Array(_))
    }
}

impl From<ScalarType> for DataType {
    fn from(s: ScalarType) -> Self {
        DataType::Scalar(s)
    }
}

impl std::fmt::Display for DataType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DataType::None => write!(f, "None"),
            DataType::Scalar(s) => write!(f, "{}", s),
            DataType::Array(s) => write!(f, "{}[]", s),
        }
    }
}

/// Error parsing a data type tag
#[derive(Debug, Clone, thiserror::Error)]
#[error("Unknown data type tag: {0}")]
pub struct UnknownDataType(pub String);

impl std::str::FromStr for DataType {
    type Err = UnknownDataType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let tag = s.trim();
        if tag.is_empty() || tag.eq_ignore_ascii_case("none") {
            return Ok(DataType::None);
        }
        let (base, is_array) = match tag.strip_suffix("[]") {
            Some(base) => (base, true),
            None => match tag.strip_suffix("Array") {
                Some(base) if !base.is_empty() => (base, true),
                _ => (tag, false),
            },
        };
        let scalar = ScalarType::parse_tag(base).ok_or_else(|| UnknownDataType(s.to_string()))?;
        Ok(if is_array {
            DataType::Array(scalar)
        } else {
            DataType::Scalar(scalar)
        })
    }
}

impl TryFrom<String> for DataType {
    type Error = UnknownDataType;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<DataType> for String {
    fn from(t: DataType) -> Self {
        t.to_string()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
