//! Cross-Boundary Value Encoding
//!
//! Defines the boxed value representation exchanged with dynamic units and
//! the conversion contract between native integers and their boxed form.
//!
//! # Wire encoding
//!
//! Every value crossing the boundary travels as a [`RawValue`]: a `#[repr(C)]`
//! pair of 64-bit words. The first word is the type tag, the second the
//! payload:
//!
//! | tag | meaning | payload |
//! |-----|---------|---------|
//! | 0   | unit (no value) | ignored, written as 0 |
//! | 1   | integer | `i64` in two's complement |
//! | 2   | float | `f64` bit pattern |
//!
//! Entry points exported by a unit take and return `RawValue` by value with
//! the C calling convention. Decoding a word pair with an unknown tag fails
//! with a conversion error rather than producing a garbage value.

use std::fmt;

use crate::error::BridgeError;

/// Largest argument count the call dispatch supports.
pub const MAX_ARITY: usize = 6;

/// Tag word for the unit (no value) marker.
pub const TAG_UNIT: u64 = 0;
/// Tag word for a boxed integer.
pub const TAG_INT: u64 = 1;
/// Tag word for a boxed float.
pub const TAG_FLOAT: u64 = 2;

/// A boxed primitive in the cross-boundary representation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ForeignValue {
    /// Explicit "no value" marker for void-like entry points.
    Unit,
    /// Boxed 64-bit signed integer.
    Int(i64),
    /// Boxed 64-bit float.
    Float(f64),
}

/// The two-word wire form of a [`ForeignValue`].
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawValue {
    pub tag: u64,
    pub bits: u64,
}

impl ForeignValue {
    /// Name of this value's tag, for diagnostics.
    pub fn tag_name(&self) -> &'static str {
        match self {
            ForeignValue::Unit => "unit",
            ForeignValue::Int(_) => "int",
            ForeignValue::Float(_) => "float",
        }
    }

    /// Encode into the wire form.
    pub fn to_raw(&self) -> RawValue {
        match self {
            ForeignValue::Unit => RawValue {
                tag: TAG_UNIT,
                bits: 0,
            },
            ForeignValue::Int(v) => RawValue {
                tag: TAG_INT,
                bits: *v as u64,
            },
            ForeignValue::Float(v) => RawValue {
                tag: TAG_FLOAT,
                bits: v.to_bits(),
            },
        }
    }

    /// Decode from the wire form. Unknown tags fail closed.
    pub fn from_raw(raw: RawValue) -> Result<Self, BridgeError> {
        match raw.tag {
            TAG_UNIT => Ok(ForeignValue::Unit),
            TAG_INT => Ok(ForeignValue::Int(raw.bits as i64)),
            TAG_FLOAT => Ok(ForeignValue::Float(f64::from_bits(raw.bits))),
            other => Err(BridgeError::Conversion {
                expected: "a known value tag",
                got: format!("tag {}", other),
            }),
        }
    }

    /// Check if this is the "no value" marker.
    pub fn is_unit(&self) -> bool {
        matches!(self, ForeignValue::Unit)
    }
}

impl fmt::Display for ForeignValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ForeignValue::Unit => write!(f, "unit"),
            ForeignValue::Int(v) => write!(f, "{}", v),
            ForeignValue::Float(v) => write!(f, "{}", v),
        }
    }
}

/// Box a native integer. Total on all of `i64`.
pub fn to_foreign(native: i64) -> ForeignValue {
    ForeignValue::Int(native)
}

/// Unbox a native integer. Fails if the value does not carry the integer
/// tag; never yields a garbage integer.
pub fn from_foreign(value: &ForeignValue) -> Result<i64, BridgeError> {
    match value {
        ForeignValue::Int(v) => Ok(*v),
        other => Err(BridgeError::Conversion {
            expected: "int",
            got: other.tag_name().to_string(),
        }),
    }
}
