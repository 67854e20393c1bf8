//! Value generators for virtual addresses

use chrono::{DateTime, Utc};
use rand::distributions::Alphanumeric;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use snet_types::{ScalarType, Value};

use super::directive::Mode;

/// 2000-01-01T00:00:00Z
const RANDOM_DATETIME_FLOOR: i64 = 946_684_800;
const RANDOM_FLOAT_CEILING: f64 = 10_000.0;
const RANDOM_TEXT_MAX_LEN: usize = 99;
const MAX_CHAR_CODE: f64 = char::MAX as u32 as f64;

/// Produces the next value of one virtual address
pub struct Generator {
    scalar: ScalarType,
    mode: Mode,
    rng: StdRng,
}

impl Generator {
    pub fn new(scalar: ScalarType, mode: Mode) -> Self {
        Self {
            scalar,
            mode,
            rng: StdRng::from_entropy(),
        }
    }

    /// Check that `mode` can drive a value of kind `scalar`
    pub fn validate(scalar: ScalarType, mode: &Mode) -> Result<(), String> {
        if mode.is_sequential() && !scalar.is_numeric() {
            return Err(format!("{} needs a numeric type, not {}", mode.name(), scalar));
        }

        let integral = |label: &str, v: f64| -> Result<(), String> {
            if v.fract() != 0.0 {
                return Err(format!("{} {} must be a whole number for {}", label, v, scalar));
            }
            if int_value(scalar, v as i128).is_none() {
                return Err(format!("{} {} is out of range for {}", label, v, scalar));
            }
            Ok(())
        };

        match *mode {
            Mode::Static | Mode::RandomEachTick => Ok(()),
            Mode::SequentialStep { step } => {
                if scalar.is_integer() && step.fract() != 0.0 {
                    return Err(format!("step {} must be a whole number for {}", step, scalar));
                }
                Ok(())
            }
            Mode::SequentialRangeWrap { step, min, max } => {
                if step <= 0.0 {
                    return Err(format!("step {} must be greater than zero", step));
                }
                if scalar.is_integer() {
                    if step.fract() != 0.0 {
                        return Err(format!("step {} must be a whole number for {}", step, scalar));
                    }
                    integral("min", min)?;
                    integral("max", max)?;
                }
                Ok(())
            }
            Mode::RandomRangeEachTick { min, max } => match scalar {
                s if s.is_integer() => {
                    integral("min", min)?;
                    integral("max", max)
                }
                ScalarType::String if min < 0.0 || max > 4096.0 => {
                    Err(format!("text length range {}^{} must lie within 0^4096", min, max))
                }
                ScalarType::Char if min < 0.0 || max > MAX_CHAR_CODE => {
                    Err(format!("char code range {}^{} is not valid", min, max))
                }
                ScalarType::Double | ScalarType::Float if !(max - min).is_finite() => {
                    Err(format!("range {}^{} is too wide to sample", min, max))
                }
                ScalarType::Float if !(min as f32).is_finite() || !(max as f32).is_finite() => {
                    Err(format!("range {}^{} is out of range for {}", min, max, scalar))
                }
                _ => Ok(()),
            },
        }
    }

    /// Next value given the current one
    pub fn next(&mut self, current: &Value) -> Value {
        match self.mode {
            Mode::Static => current.clone(),
            Mode::RandomEachTick => self.random(current),
            Mode::RandomRangeEachTick { min, max } => self.random_range(min, max),
            Mode::SequentialStep { step } => self.step(current, step),
            Mode::SequentialRangeWrap { step, min, max } => self.wrap(current, step, min, max),
        }
    }

    fn step(&self, current: &Value, step: f64) -> Value {
        let next = if self.scalar.is_integer() {
            current
                .as_i128()
                .and_then(|v| v.checked_add(step as i128))
                .and_then(|v| int_value(self.scalar, v))
        } else {
            current.as_f64().and_then(|v| float_value(self.scalar, v + step))
        };
        next.unwrap_or_else(|| zero(self.scalar))
    }

    fn wrap(&self, current: &Value, step: f64, min: f64, max: f64) -> Value {
        if self.scalar.is_integer() {
            let (min, max) = (min as i128, max as i128);
            let next = match current.as_i128() {
                Some(v) => match v.checked_add(step as i128) {
                    Some(n) if n >= min && n < max => n,
                    _ => min,
                },
                None => min,
            };
            int_value(self.scalar, next).unwrap_or_else(|| zero(self.scalar))
        } else {
            let next = match current.as_f64() {
                Some(v) if v + step >= min && v + step < max => v + step,
                _ => min,
            };
            float_value(self.scalar, next).unwrap_or_else(|| zero(self.scalar))
        }
    }

    fn random(&mut self, current: &Value) -> Value {
        let rng = &mut self.rng;
        match self.scalar {
            ScalarType::Bool => Value::Bool(match current.as_bool() {
                Some(b) => !b,
                None => rng.r#gen(),
            }),
            ScalarType::String => {
                let len = rng.gen_range(1..=RANDOM_TEXT_MAX_LEN);
                Value::String(random_text(rng, len))
            }
            ScalarType::Char => Value::Char(char::from(rng.sample(Alphanumeric))),
            ScalarType::Double => Value::Double(rng.gen_range(0.0..RANDOM_FLOAT_CEILING)),
            ScalarType::Float => Value::Float(rng.gen_range(0.0..RANDOM_FLOAT_CEILING as f32)),
            ScalarType::Int16 => Value::Int16(rng.r#gen()),
            ScalarType::UInt16 => Value::UInt16(rng.r#gen()),
            ScalarType::Int32 => Value::Int32(rng.r#gen()),
            ScalarType::UInt32 => Value::UInt32(rng.r#gen()),
            ScalarType::Int64 => Value::Int64(rng.r#gen()),
            ScalarType::UInt64 => Value::UInt64(rng.r#gen()),
            ScalarType::DateTime => {
                let now = Utc::now().timestamp().max(RANDOM_DATETIME_FLOOR + 1);
                datetime(rng.gen_range(RANDOM_DATETIME_FLOOR..now))
            }
        }
    }

    fn random_range(&mut self, min: f64, max: f64) -> Value {
        let rng = &mut self.rng;
        match self.scalar {
            s if s.is_integer() => {
                let v = rng.gen_range(min as i128..=max as i128);
                int_value(s, v).unwrap_or_else(|| zero(s))
            }
            ScalarType::Double | ScalarType::Float => {
                float_value(self.scalar, rng.gen_range(min..=max)).unwrap_or_else(|| zero(self.scalar))
            }
            ScalarType::Bool => Value::Bool(rng.r#gen()),
            ScalarType::String => {
                let len = rng.gen_range(min as usize..=max as usize);
                Value::String(random_text(rng, len))
            }
            ScalarType::Char => {
                let code = rng.gen_range(min as u32..=max as u32);
                Value::Char(char::from_u32(code).unwrap_or(char::REPLACEMENT_CHARACTER))
            }
            ScalarType::DateTime => datetime(rng.gen_range(min as i64..=max as i64)),
            _ => Value::Null,
        }
    }
}

/// Zero value of a kind
pub fn zero(scalar: ScalarType) -> Value {
    match scalar {
        ScalarType::Bool => Value::Bool(false),
        ScalarType::String => Value::String(String::new()),
        ScalarType::Char => Value::Char('\0'),
        ScalarType::Double => Value::Double(0.0),
        ScalarType::Float => Value::Float(0.0),
        ScalarType::Int16 => Value::Int16(0),
        ScalarType::UInt16 => Value::UInt16(0),
        ScalarType::Int32 => Value::Int32(0),
        ScalarType::UInt32 => Value::UInt32(0),
        ScalarType::Int64 => Value::Int64(0),
        ScalarType::UInt64 => Value::UInt64(0),
        ScalarType::DateTime => datetime(0),
    }
}

fn int_value(scalar: ScalarType, v: i128) -> Option<Value> {
    match scalar {
        ScalarType::Int16 => i16::try_from(v).ok().map(Value::Int16),
        ScalarType::UInt16 => u16::try_from(v).ok().map(Value::UInt16),
        ScalarType::Int32 => i32::try_from(v).ok().map(Value::Int32),
        ScalarType::UInt32 => u32::try_from(v).ok().map(Value::UInt32),
        ScalarType::Int64 => i64::try_from(v).ok().map(Value::Int64),
        ScalarType::UInt64 => u64::try_from(v).ok().map(Value::UInt64),
        _ => None,
    }
}

fn float_value(scalar: ScalarType, v: f64) -> Option<Value> {
    match scalar {
        ScalarType::Double if v.is_finite() => Some(Value::Double(v)),
        ScalarType::Float if (v as f32).is_finite() => Some(Value::Float(v as f32)),
        _ => None,
    }
}

fn datetime(secs: i64) -> Value {
    DateTime::from_timestamp(secs, 0)
        .map(|dt| Value::DateTime(dt.naive_utc()))
        .unwrap_or(Value::Null)
}

fn random_text(rng: &mut StdRng, len: usize) -> String {
    rng.sample_iter(&Alphanumeric).take(len).map(char::from).collect()
}
