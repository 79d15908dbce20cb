use std::fmt;

use crate::error::{Error, Result};

// DType — the closed set of element kinds
//
//   F32     — 32-bit IEEE float, the default
//   F16     — 16-bit IEEE half float
//   I32     — 32-bit signed integer
//   I8      — 8-bit signed integer
//   I4      — 4-bit signed integer, packed two per byte (-8..=7)
//   Ternary — 2-bit ternary weight, packed four per byte ({-1, 0, 1})
//
// The enum is closed on purpose: conversion and promotion are finite tables
// over these six variants, not a general numeric coercion.

/// Element data type of a tensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum DType {
    F32,
    F16,
    I32,
    I8,
    I4,
    Ternary,
}

impl DType {
    /// Every variant, in declaration order.
    pub const ALL: [DType; 6] = [
        DType::F32,
        DType::F16,
        DType::I32,
        DType::I8,
        DType::I4,
        DType::Ternary,
    ];

    /// Width of one element in bits.
    pub fn bits(&self) -> usize {
        match self {
            DType::F32 | DType::I32 => 32,
            DType::F16 => 16,
            DType::I8 => 8,
            DType::I4 => 4,
            DType::Ternary => 2,
        }
    }

    /// All supported kinds are signed.
    pub fn is_signed(&self) -> bool {
        true
    }

    pub fn is_float(&self) -> bool {
        matches!(self, DType::F32 | DType::F16)
    }

    /// Sub-byte kinds stored several elements per byte.
    pub fn is_packed(&self) -> bool {
        matches!(self, DType::I4 | DType::Ternary)
    }

    /// Smallest representable value.
    pub fn min_value(&self) -> f64 {
        match self {
            DType::F32 => f32::MIN as f64,
            DType::F16 => half::f16::MIN.to_f64(),
            DType::I32 => i32::MIN as f64,
            DType::I8 => i8::MIN as f64,
            DType::I4 => -8.0,
            DType::Ternary => -1.0,
        }
    }

    /// Largest representable value.
    pub fn max_value(&self) -> f64 {
        match self {
            DType::F32 => f32::MAX as f64,
            DType::F16 => half::f16::MAX.to_f64(),
            DType::I32 => i32::MAX as f64,
            DType::I8 => i8::MAX as f64,
            DType::I4 => 7.0,
            DType::Ternary => 1.0,
        }
    }

    /// Number of bytes needed to hold `n` elements.
    pub fn storage_bytes(&self, n: usize) -> usize {
        (n * self.bits()).div_ceil(8)
    }

    /// Check that `value` is exactly representable (integers) or within the
    /// finite range (floats). NaN and infinities are accepted by float kinds.
    pub fn validate_value(&self, value: f64) -> Result<()> {
        let out_of_range = Error::ValueOutOfRange {
            value,
            dtype: *self,
        };
        if self.is_float() {
            if value.is_finite() && (value < self.min_value() || value > self.max_value()) {
                return Err(out_of_range);
            }
            return Ok(());
        }
        if !value.is_finite() || value.fract() != 0.0 {
            return Err(out_of_range);
        }
        if value < self.min_value() || value > self.max_value() {
            return Err(out_of_range);
        }
        Ok(())
    }

    /// Whether a tensor of this dtype may be converted to `target`.
    ///
    /// Reflexive; otherwise only the whitelisted pairs convert:
    /// F32↔F16, I32↔I8, I8↔I4, F32↔I32, F16↔I32, Ternary↔I8.
    pub fn is_convertible_to(&self, target: DType) -> bool {
        use DType::*;
        if *self == target {
            return true;
        }
        matches!(
            (*self, target),
            (F32, F16)
                | (F16, F32)
                | (I32, I8)
                | (I8, I32)
                | (I8, I4)
                | (I4, I8)
                | (F32, I32)
                | (I32, F32)
                | (F16, I32)
                | (I32, F16)
                | (Ternary, I8)
                | (I8, Ternary)
        )
    }

    /// Fail with [`Error::ConversionNotSupported`] unless convertible.
    pub fn check_convertible_to(&self, target: DType) -> Result<()> {
        if self.is_convertible_to(target) {
            Ok(())
        } else {
            Err(Error::ConversionNotSupported {
                from: *self,
                to: target,
            })
        }
    }

    /// The dtype both operands of a mixed binary operation are promoted to.
    ///
    /// Floats dominate integers; within a kind the wider type wins. The two
    /// rules cover every pair of the closed enum, so there is no fallback.
    pub fn common_precision_with(&self, other: DType) -> DType {
        match (self.is_float(), other.is_float()) {
            (true, false) => *self,
            (false, true) => other,
            _ if self.bits() >= other.bits() => *self,
            _ => other,
        }
    }
}

impl fmt::Display for DType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DType::F32 => "fp32",
            DType::F16 => "fp16",
            DType::I32 => "int32",
            DType::I8 => "int8",
            DType::I4 => "int4",
            DType::Ternary => "ternary",
        };
        write!(f, "{}", s)
    }
}

impl std::str::FromStr for DType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "fp32" | "f32" | "float32" => Ok(DType::F32),
            "fp16" | "f16" | "float16" => Ok(DType::F16),
            "int32" | "i32" => Ok(DType::I32),
            "int8" | "i8" => Ok(DType::I8),
            "int4" | "i4" => Ok(DType::I4),
            "ternary" => Ok(DType::Ternary),
            other => Err(Error::msg(format!("unknown dtype `{other}`"))),
        }
    }
}

// Element — Rust types that back a byte-aligned dtype
//
// The packed kinds (I4, Ternary) have no Rust scalar of their own; they are
// stored as raw bytes and only ever cross the API as f64.

/// A Rust scalar type that stores elements of one byte-aligned [`DType`].
pub trait Element: Copy + Send + Sync + 'static + num_traits::NumCast + fmt::Debug {
    /// The corresponding DType variant.
    const DTYPE: DType;

    fn to_f64(self) -> f64;

    /// Convert from f64 with cast semantics (float rounding, integer
    /// truncation toward zero and saturation). Used by kernels; checked
    /// stores go through [`DType::validate_value`] first.
    fn from_f64(v: f64) -> Self;

    fn zero() -> Self {
        Self::from_f64(0.0)
    }
}

impl Element for f32 {
    const DTYPE: DType = DType::F32;
    fn to_f64(self) -> f64 {
        self as f64
    }
    fn from_f64(v: f64) -> Self {
        v as f32
    }
}

impl Element for half::f16 {
    const DTYPE: DType = DType::F16;
    fn to_f64(self) -> f64 {
        half::f16::to_f64(self)
    }
    fn from_f64(v: f64) -> Self {
        half::f16::from_f64(v)
    }
}

impl Element for i32 {
    const DTYPE: DType = DType::I32;
    fn to_f64(self) -> f64 {
        self as f64
    }
    fn from_f64(v: f64) -> Self {
        v as i32
    }
}

impl Element for i8 {
    const DTYPE: DType = DType::I8;
    fn to_f64(self) -> f64 {
        self as f64
    }
    fn from_f64(v: f64) -> Self {
        v as i8
    }
}
