//! Address directive parsing
//!
//! A virtual address embeds its generator parameters in a trailing `{...}`
//! block. The shape of the block selects the mode:
//!
//! | directive            | mode                  |
//! |----------------------|-----------------------|
//! | (none)               | `Static`              |
//! | `{1000}`             | `RandomEachTick`      |
//! | `{1000,10^20}`       | `RandomRangeEachTick` |
//! | `{1000,0.5}`         | `SequentialStep`      |
//! | `{1000,0.5,0^100}`   | `SequentialRangeWrap` |
//!
//! The first field is always the tick interval in milliseconds.

use std::time::Duration;

use super::VirtualError;

/// Generation mode of a virtual address
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Mode {
    /// Only changes on explicit write
    Static,
    /// New random sample every tick
    RandomEachTick,
    /// New random sample in `[min, max]` every tick
    RandomRangeEachTick { min: f64, max: f64 },
    /// Previous value plus `step` every tick
    SequentialStep { step: f64 },
    /// Previous value plus `step`, wrapping to `min` at or above `max`
    SequentialRangeWrap { step: f64, min: f64, max: f64 },
}

impl Mode {
    pub fn name(&self) -> &'static str {
        match self {
            Mode::Static => "Static",
            Mode::RandomEachTick => "RandomEachTick",
            Mode::RandomRangeEachTick { .. } => "RandomRangeEachTick",
            Mode::SequentialStep { .. } => "SequentialStep",
            Mode::SequentialRangeWrap { .. } => "SequentialRangeWrap",
        }
    }

    pub fn is_sequential(&self) -> bool {
        matches!(self, Mode::SequentialStep { .. } | Mode::SequentialRangeWrap { .. })
    }
}

/// Parsed `{...}` block of an address name
#[derive(Debug, Clone, PartialEq)]
pub struct Directive {
    /// Address name without the directive
    pub base: String,
    pub mode: Mode,
    /// Tick interval; `None` for `Static`
    pub interval: Option<Duration>,
}

impl Directive {
    /// Parse the directive embedded in an address name
    pub fn parse(name: &str) -> Result<Self, VirtualError> {
        let invalid = |reason: String| VirtualError::Directive {
            name: name.to_string(),
            reason,
        };

        let trimmed = name.trim();
        let Some(open) = trimmed.rfind('{') else {
            if trimmed.contains('}') {
                return Err(invalid("unmatched '}'".into()));
            }
            return Ok(Self {
                base: trimmed.to_string(),
                mode: Mode::Static,
                interval: None,
            });
        };

        let body = trimmed[open + 1..]
            .strip_suffix('}')
            .ok_or_else(|| invalid("directive must close with '}' at the end of the name".into()))?;
        let base = trimmed[..open].trim().to_string();
        if base.is_empty() {
            return Err(invalid("missing address name before directive".into()));
        }

        let parts: Vec<&str> = body.split(',').map(str::trim).collect();
        let interval_ms = parts[0]
            .parse::<u64>()
            .map_err(|_| invalid(format!("interval '{}' is not a whole number of milliseconds", parts[0])))?;
        if interval_ms == 0 {
            return Err(invalid("interval must be greater than zero".into()));
        }

        let mode = match parts.as_slice() {
            [_] => Mode::RandomEachTick,
            [_, range] if range.contains('^') => {
                let (min, max) = parse_range(range).map_err(invalid)?;
                Mode::RandomRangeEachTick { min, max }
            }
            [_, step] => Mode::SequentialStep {
                step: parse_number(step).map_err(invalid)?,
            },
            [_, step, range] => {
                let step = parse_number(step).map_err(invalid)?;
                let (min, max) = parse_range(range).map_err(invalid)?;
                Mode::SequentialRangeWrap { step, min, max }
            }
            _ => return Err(invalid(format!("expected 1 to 3 fields, found {}", parts.len()))),
        };

        Ok(Self {
            base,
            mode,
            interval: Some(Duration::from_millis(interval_ms)),
        })
    }
}

/// Address name with any directive removed
pub fn base_name(name: &str) -> &str {
    let trimmed = name.trim();
    match trimmed.rfind('{') {
        Some(open) if trimmed.ends_with('}') => trimmed[..open].trim(),
        _ => trimmed,
    }
}

fn parse_number(text: &str) -> Result<f64, String> {
    match text.parse::<f64>() {
        Ok(v) if v.is_finite() => Ok(v),
        _ => Err(format!("'{}' is not a finite number", text)),
    }
}

fn parse_range(text: &str) -> Result<(f64, f64), String> {
    let (min, max) = text
        .split_once('^')
        .ok_or_else(|| format!("range '{}' must be written min^max", text))?;
    let (min, max) = (parse_number(min.trim())?, parse_number(max.trim())?);
    if min > max {
        return Err(format!("range min {} is greater than max {}", min, max));
    }
    Ok((min, max))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mode_from_shape() {
        let d = Directive::parse("Tank.Level").unwrap();
        assert_eq!(d.mode, Mode::Static);
        assert_eq!(d.interval, None);

        let d = Directive::parse("Noise{1000}").unwrap();
        assert_eq!(d.base, "Noise");
        assert_eq!(d.mode, Mode::RandomEachTick);
        assert_eq!(d.interval, Some(Duration::from_millis(1000)));

        let d = Directive::parse("Temp{500,10^20}").unwrap();
        assert_eq!(d.mode, Mode::RandomRangeEachTick { min: 10.0, max: 20.0 });

        let d = Directive::parse("Ramp{250, 0.5}").unwrap();
        assert_eq!(d.mode, Mode::SequentialStep { step: 0.5 });

        let d = Directive::parse("Saw{1000,0.5,0^100}").unwrap();
        assert_eq!(
            d.mode,
            Mode::SequentialRangeWrap { step: 0.5, min: 0.0, max: 100.0 }
        );
    }

    #[test]
    fn test_negative_bounds() {
        let d = Directive::parse("Swing{100,-5^-1}").unwrap();
        assert_eq!(d.mode, Mode::RandomRangeEachTick { min: -5.0, max: -1.0 });
    }

    #[test]
    fn test_rejects_malformed_directives() {
        for name in [
            "A{0}",
            "A{abc}",
            "A{100,1,2,3}",
            "A{100,5^1}",
            "A{100,x^1}",
            "A{100",
            "A}",
            "{100}",
            "A{100,1,0-10}",
        ] {
            assert!(Directive::parse(name).is_err(), "{} should be rejected", name);
        }
    }

    #[test]
    fn test_base_name() {
        assert_eq!(base_name("Saw{1000,1,0^10}"), "Saw");
        assert_eq!(base_name(" Plain "), "Plain");
    }
}
