//! Value quality codes
//!
//! Every evaluated address carries a [`Quality`]. The numeric codes are part of
//! the wire contract; the ordering is by trust, not by code.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

/// Confidence/validity classification attached to an evaluated value
///
/// Trust order: `Unprocessed < Abnormal < TypeError < ParseError < ParsedUnverified`,
/// and `ParseError < Normal`. `ParsedUnverified` and `Normal` are distinct
/// terminal states and do not compare.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(i32)]
pub enum Quality {
    /// Value has not been through the pipeline yet
    Unprocessed = -1,
    /// No raw value was supplied
    Abnormal = 0,
    /// Converted without a transform
    Normal = 1,
    /// Raw value could not be converted to the declared type
    TypeError = 2,
    /// A transform produced the value; the pipeline cannot vouch for it
    ParsedUnverified = 3,
    /// The transform failed or returned nothing
    ParseError = 4,
}

impl Quality {
    /// Wire code of this quality
    pub fn code(self) -> i32 {
        self as i32
    }

    /// Look up a quality from its wire code
    pub fn from_code(code: i32) -> Option<Self> {
        match code {
            -1 => Some(Self::Unprocessed),
            0 => Some(Self::Abnormal),
            1 => Some(Self::Normal),
            2 => Some(Self::TypeError),
            3 => Some(Self::ParsedUnverified),
            4 => Some(Self::ParseError),
            _ => None,
        }
    }

    /// Whether a value with this quality may be published
    pub fn is_good(self) -> bool {
        matches!(self, Quality::Normal | Quality::ParsedUnverified)
    }

    fn trust_rank(self) -> u8 {
        match self {
            Quality::Unprocessed => 0,
            Quality::Abnormal => 1,
            Quality::TypeError => 2,
            Quality::ParseError => 3,
            Quality::ParsedUnverified | Quality::Normal => 4,
        }
    }
}

impl PartialOrd for Quality {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        if self == other {
            return Some(Ordering::Equal);
        }
        match (self, other) {
            (Quality::Normal, Quality::ParsedUnverified)
            | (Quality::ParsedUnverified, Quality::Normal) => None,
            _ => self.trust_rank().partial_cmp(&other.trust_rank()),
        }
    }
}

impl std::fmt::Display for Quality {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Quality::Unprocessed => "Unprocessed",
            Quality::Abnormal => "Abnormal",
            Quality::Normal => "Normal",
            Quality::TypeError => "TypeError",
            Quality::ParsedUnverified => "ParsedUnverified",
            Quality::ParseError => "ParseError",
        };
        write!(f, "{}", name)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
