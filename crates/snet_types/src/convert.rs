//! Type/quality conversion
//!
//! Turns a raw device value (text or an already-boxed value) into a value of
//! the declared [`DataType`]. Failures are reported as data, never as an error
//! past [`convert`]; the function is pure and safe to call from any thread.

use chrono::{DateTime, NaiveDate, NaiveDateTime};

use crate::quality::Quality;
use crate::types::{DataType, ScalarType};
use crate::value::Value;

/// Date/time layouts accepted for `DateTime` conversion, tried in order
const DATETIME_LAYOUTS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y/%m/%d %H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
    "%Y/%m/%d %H:%M",
];

const DATE_LAYOUTS: &[&str] = &["%Y-%m-%d", "%Y/%m/%d"];

// ─────────────────────────────────────────────────────────────────────────────
// Conversion Error
// ─────────────────────────────────────────────────────────────────────────────

/// Why a raw value could not be converted
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConvertError {
    #[error("No value supplied")]
    Empty,

    #[error("Value '{value}' cannot be converted to {target}: {reason}")]
    Invalid {
        value: String,
        target: DataType,
        reason: String,
    },
}

impl ConvertError {
    /// Quality a caller should attach for this failure
    pub fn quality(&self) -> Quality {
        match self {
            ConvertError::Empty => Quality::Abnormal,
            ConvertError::Invalid { .. } => Quality::TypeError,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Converted
// ─────────────────────────────────────────────────────────────────────────────

/// Outcome of [`convert`]
#[derive(Debug, Clone, PartialEq)]
pub struct Converted {
    /// Typed value; `Null` unless quality is `Normal`
    pub value: Value,
    /// `Normal`, `Abnormal` or `TypeError`
    pub quality: Quality,
    /// Diagnostic text; empty on success
    pub message: String,
}

impl Converted {
    /// Whether conversion succeeded
    pub fn is_ok(&self) -> bool {
        self.quality == Quality::Normal
    }
}

/// Convert a raw value to the declared type
///
/// - empty/blank/missing raw value -> `Abnormal`, null value
/// - malformed or out-of-range value -> `TypeError`, null value, message naming
///   the offending value and the target type
/// - otherwise -> `Normal` with the canonical parse of the input
pub fn convert(data_type: DataType, raw: &Value) -> Converted {
    match try_convert(data_type, raw) {
        Ok(value) => Converted {
            value,
            quality: Quality::Normal,
            message: String::new(),
        },
        Err(e) => Converted {
            value: Value::Null,
            quality: e.quality(),
            message: e.to_string(),
        },
    }
}

/// Convert a raw value to the declared type, as a `Result`
pub fn try_convert(data_type: DataType, raw: &Value) -> Result<Value, ConvertError> {
    if raw.is_empty() {
        return Err(ConvertError::Empty);
    }

    match data_type {
        DataType::None => Ok(raw.clone()),
        DataType::Scalar(scalar) => {
            if raw.len().is_some() {
                return Err(invalid(raw.to_string(), data_type, "array given for a scalar type"));
            }
            parse_scalar(scalar, &raw.to_string())
                .map_err(|reason| invalid(raw.to_string(), data_type, reason))
        }
        DataType::Array(scalar) => {
            let items = array_elements(raw)
                .map_err(|reason| invalid(raw.to_string(), data_type, reason))?;
            parse_array(scalar, &items).map_err(|(item, reason)| {
                invalid(item, data_type, reason)
            })
        }
    }
}

fn invalid(value: String, target: DataType, reason: impl Into<String>) -> ConvertError {
    ConvertError::Invalid {
        value,
        target,
        reason: reason.into(),
    }
}

/// Split a raw array value into element texts
///
/// Boxed arrays are used element by element; text is read as a JSON array when
/// it starts with `[`, otherwise as a comma-separated list.
fn array_elements(raw: &Value) -> Result<Vec<String>, String> {
    if let Some(items) = raw.array_items() {
        return Ok(items);
    }
    let Value::String(text) = raw else {
        return Err("scalar given for an array type".to_string());
    };
    let text = text.trim();
    if text.starts_with('[') {
        let parsed: Vec<serde_json::Value> =
            serde_json::from_str(text).map_err(|e| e.to_string())?;
        return Ok(parsed
            .into_iter()
            .map(|v| match v {
                serde_json::Value::String(s) => s,
                other => other.to_string(),
            })
            .collect());
    }
    Ok(text.split(',').map(|s| s.trim().to_string()).collect())
}

// ─────────────────────────────────────────────────────────────────────────────
// Scalar Parsing
// ─────────────────────────────────────────────────────────────────────────────

fn parse_scalar(scalar: ScalarType, text: &str) -> Result<Value, String> {
    let trimmed = text.trim();
    let value = match scalar {
        ScalarType::Bool => Value::Bool(parse_bool(trimmed)?),
        ScalarType::String => Value::String(text.to_string()),
        ScalarType::Char => Value::Char(parse_char(text)?),
        ScalarType::Double => Value::Double(parse_float::<f64>(trimmed)?),
        ScalarType::Float => Value::Float(parse_float::<f32>(trimmed)?),
        ScalarType::Int16 => Value::Int16(parse_int(trimmed)?),
        ScalarType::UInt16 => Value::UInt16(parse_int(trimmed)?),
        ScalarType::Int32 => Value::Int32(parse_int(trimmed)?),
        ScalarType::UInt32 => Value::UInt32(parse_int(trimmed)?),
        ScalarType::Int64 => Value::Int64(parse_int(trimmed)?),
        ScalarType::UInt64 => Value::UInt64(parse_int(trimmed)?),
        ScalarType::DateTime => Value::DateTime(parse_datetime(trimmed)?),
    };
    Ok(value)
}

fn parse_array(scalar: ScalarType, items: &[String]) -> Result<Value, (String, String)> {
    fn each<T>(
        items: &[String],
        f: impl Fn(&str) -> Result<T, String>,
    ) -> Result<Vec<T>, (String, String)> {
        items
            .iter()
            .map(|item| f(item).map_err(|reason| (item.clone(), reason)))
            .collect()
    }

    let value = match scalar {
        ScalarType::Bool => Value::BoolArray(each(items, |s| parse_bool(s.trim()))?),
        ScalarType::String => Value::StringArray(items.to_vec()),
        ScalarType::Char => Value::CharArray(each(items, parse_char)?),
        ScalarType::Double => Value::DoubleArray(each(items, |s| parse_float(s.trim()))?),
        ScalarType::Float => Value::FloatArray(each(items, |s| parse_float(s.trim()))?),
        ScalarType::Int16 => Value::Int16Array(each(items, |s| parse_int(s.trim()))?),
        ScalarType::UInt16 => Value::UInt16Array(each(items, |s| parse_int(s.trim()))?),
        ScalarType::Int32 => Value::Int32Array(each(items, |s| parse_int(s.trim()))?),
        ScalarType::UInt32 => Value::UInt32Array(each(items, |s| parse_int(s.trim()))?),
        ScalarType::Int64 => Value::Int64Array(each(items, |s| parse_int(s.trim()))?),
        ScalarType::UInt64 => Value::UInt64Array(each(items, |s| parse_int(s.trim()))?),
        ScalarType::DateTime => Value::DateTimeArray(each(items, |s| parse_datetime(s.trim()))?),
    };
    Ok(value)
}

fn parse_bool(text: &str) -> Result<bool, String> {
    if text.eq_ignore_ascii_case("true") || text == "1" {
        Ok(true)
    } else if text.eq_ignore_ascii_case("false") || text == "0" {
        Ok(false)
    } else {
        Err("expected true/false or 1/0".to_string())
    }
}

fn parse_char(text: &str) -> Result<char, String> {
    let mut chars = text.chars();
    match (chars.next(), chars.next()) {
        (Some(c), None) => Ok(c),
        _ => Err("expected exactly one character".to_string()),
    }
}

fn parse_int<T>(text: &str) -> Result<T, String>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    let text = text.strip_prefix('+').unwrap_or(text);
    text.parse::<T>().map_err(|e| e.to_string())
}

fn parse_float<T>(text: &str) -> Result<T, String>
where
    T: std::str::FromStr + Into<f64> + Copy,
    T::Err: std::fmt::Display,
{
    let value = text.parse::<T>().map_err(|e| e.to_string())?;
    if value.into().is_finite() {
        Ok(value)
    } else {
        Err("value is out of range".to_string())
    }
}

fn parse_datetime(text: &str) -> Result<NaiveDateTime, String> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return Ok(dt.naive_utc());
    }
    for layout in DATETIME_LAYOUTS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(text, layout) {
            return Ok(dt);
        }
    }
    for layout in DATE_LAYOUTS {
        if let Ok(date) = NaiveDate::parse_from_str(text, layout) {
            if let Some(dt) = date.and_hms_opt(0, 0, 0) {
                return Ok(dt);
            }
        }
    }
    Err("unrecognized date/time format".to_string())
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn scalar(s: ScalarType) -> DataType {
        DataType::Scalar(s)
    }

    #[test]
    fn test_valid_scalars_are_normal() {
        let cases = [
            (ScalarType::Bool, "true", Value::Bool(true)),
            (ScalarType::Bool, "0", Value::Bool(false)),
            (ScalarType::String, "hello", Value::String("hello".into())),
            (ScalarType::Char, "x", Value::Char('x')),
            (ScalarType::Double, "3.25", Value::Double(3.25)),
            (ScalarType::Float, "-1.5", Value::Float(-1.5)),
            (ScalarType::Int16, "-32768", Value::Int16(i16::MIN)),
            (ScalarType::UInt16, "65535", Value::UInt16(u16::MAX)),
            (ScalarType::Int32, " 42 ", Value::Int32(42)),
            (ScalarType::UInt32, "+7", Value::UInt32(7)),
            (ScalarType::Int64, "-9000000000", Value::Int64(-9_000_000_000)),
            (ScalarType::UInt64, "18446744073709551615", Value::UInt64(u64::MAX)),
        ];

        for (ty, raw, expected) in cases {
            let out = convert(scalar(ty), &Value::from(raw));
            assert_eq!(out.quality, Quality::Normal, "{} {}", ty, raw);
            assert_eq!(out.value, expected);
            assert!(out.message.is_empty());
        }
    }

    #[test]
    fn test_datetime_layouts() {
        let expected = NaiveDate::from_ymd_opt(2024, 3, 1)
            .and_then(|d| d.and_hms_opt(12, 30, 0))
            .unwrap();
        for raw in ["2024-03-01 12:30:00", "2024-03-01T12:30:00", "2024/03/01 12:30", "2024-03-01T12:30:00Z"] {
            let out = convert(scalar(ScalarType::DateTime), &Value::from(raw));
            assert_eq!(out.value, Value::DateTime(expected), "{}", raw);
        }
    }

    #[test]
    fn test_empty_is_abnormal_for_every_type() {
        for s in ScalarType::ALL {
            for ty in [DataType::Scalar(s), DataType::Array(s)] {
                for raw in [Value::Null, Value::from(""), Value::from("   \t")] {
                    let out = convert(ty, &raw);
                    assert_eq!(out.quality, Quality::Abnormal, "{}", ty);
                    assert!(out.value.is_null());
                }
            }
        }
        assert_eq!(convert(DataType::None, &Value::Null).quality, Quality::Abnormal);
    }

    #[test]
    fn test_malformed_is_type_error() {
        let out = convert(scalar(ScalarType::Int32), &Value::from("abc"));
        assert_eq!(out.quality, Quality::TypeError);
        assert!(out.value.is_null());
        assert!(out.message.contains("abc"));
        assert!(out.message.contains("Int32"));

        for s in ScalarType::ALL {
            if s == ScalarType::String {
                continue;
            }
            let out = convert(scalar(s), &Value::from("abc"));
            assert_eq!(out.quality, Quality::TypeError, "{}", s);
        }
    }

    #[test]
    fn test_out_of_range_is_type_error() {
        let out = convert(scalar(ScalarType::Int16), &Value::from("40000"));
        assert_eq!(out.quality, Quality::TypeError);
        let out = convert(scalar(ScalarType::UInt32), &Value::from("-1"));
        assert_eq!(out.quality, Quality::TypeError);
        let out = convert(scalar(ScalarType::Float), &Value::from("1e40"));
        assert_eq!(out.quality, Quality::TypeError);
    }

    #[test]
    fn test_boxed_values_convert() {
        let out = convert(scalar(ScalarType::Double), &Value::Int32(3));
        assert_eq!(out.value, Value::Double(3.0));
        let out = convert(scalar(ScalarType::Int32), &Value::Double(3.5));
        assert_eq!(out.quality, Quality::TypeError);
    }

    #[test]
    fn test_arrays() {
        let ty = DataType::Array(ScalarType::Int32);
        assert_eq!(convert(ty, &Value::from("1, 2,3")).value, Value::Int32Array(vec![1, 2, 3]));
        assert_eq!(convert(ty, &Value::from("[4,5]")).value, Value::Int32Array(vec![4, 5]));
        assert_eq!(
            convert(ty, &Value::Int64Array(vec![7, 8])).value,
            Value::Int32Array(vec![7, 8])
        );

        let bad = convert(ty, &Value::from("1,x,3"));
        assert_eq!(bad.quality, Quality::TypeError);
        assert!(bad.message.contains("'x'"));

        let strings = convert(DataType::Array(ScalarType::String), &Value::from(r#"["a","b"]"#));
        assert_eq!(strings.value, Value::StringArray(vec!["a".into(), "b".into()]));
    }

    #[test]
    fn test_none_passes_through() {
        let raw = Value::UInt16(5);
        let out = convert(DataType::None, &raw);
        assert_eq!(out.quality, Quality::Normal);
        assert_eq!(out.value, raw);
    }

    #[test]
    fn test_concurrent_callers() {
        let handles: Vec<_> = (0..8)
            .map(|i| {
                std::thread::spawn(move || {
                    convert(DataType::Scalar(ScalarType::Int64), &Value::from(i.to_string()))
                })
            })
            .collect();
        for (i, h) in handles.into_iter().enumerate() {
            assert_eq!(h.join().unwrap().value, Value::Int64(i as i64));
        }
    }
}
