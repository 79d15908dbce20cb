use half::f16;

use crate::dtype::{DType, Element};
use crate::error::{Error, Result};

// Storage — the flat element buffer behind every TensorData
//
// One variant per dtype. The byte-aligned kinds hold a typed Vec; the
// sub-byte kinds hold raw bytes plus the logical element count:
//
//   I4       two elements per byte. Element i lives in byte i/2; even i in
//            the low nibble, odd i in the high nibble. Nibbles are 4-bit
//            two's complement: decode n >= 8 as n - 16.
//
//   Ternary  four elements per byte. Element i lives in byte i/4 at bit
//            offset 2*(i%4). Codes are 2-bit two's complement restricted to
//            {-1, 0, 1}: 0b00 = 0, 0b01 = 1, 0b11 = -1. 0b10 is corrupt.
//
// Writes to a packed element touch only its own bits.
//
// Void is the shape-only storage produced by the void backend: it records
// how many elements there would be, and every read fails.

/// Flat element buffer for one dtype.
#[derive(Debug, Clone, PartialEq)]
pub enum Storage {
    F32(Vec<f32>),
    F16(Vec<f16>),
    I32(Vec<i32>),
    I8(Vec<i8>),
    I4 { bytes: Vec<u8>, len: usize },
    Ternary { bytes: Vec<u8>, len: usize },
    Void { dtype: DType, len: usize },
}

impl Storage {
    /// A zero-filled buffer of `len` elements.
    pub fn zeros(dtype: DType, len: usize) -> Self {
        match dtype {
            DType::F32 => Storage::F32(vec![0.0; len]),
            DType::F16 => Storage::F16(vec![f16::ZERO; len]),
            DType::I32 => Storage::I32(vec![0; len]),
            DType::I8 => Storage::I8(vec![0; len]),
            DType::I4 => Storage::I4 {
                bytes: vec![0; dtype.storage_bytes(len)],
                len,
            },
            DType::Ternary => Storage::Ternary {
                bytes: vec![0; dtype.storage_bytes(len)],
                len,
            },
        }
    }

    /// A shape-only buffer that holds no values.
    pub fn void(dtype: DType, len: usize) -> Self {
        Storage::Void { dtype, len }
    }

    /// Build from f64 values, rejecting anything the dtype cannot represent.
    pub fn from_f64_checked(dtype: DType, data: &[f64]) -> Result<Self> {
        for &v in data {
            dtype.validate_value(v)?;
        }
        Ok(Self::from_f64_cast(dtype, data))
    }

    /// Build from f64 values with cast semantics: floats round, integers
    /// truncate toward zero and saturate to the dtype range. Kernels use this
    /// to store their results.
    pub fn from_f64_cast(dtype: DType, data: &[f64]) -> Self {
        fn cast<T: Element>(data: &[f64]) -> Vec<T> {
            data.iter().map(|&v| T::from_f64(v)).collect()
        }
        match dtype {
            DType::F32 => Storage::F32(cast(data)),
            DType::F16 => Storage::F16(cast(data)),
            DType::I32 => Storage::I32(cast(data)),
            DType::I8 => Storage::I8(cast(data)),
            DType::I4 | DType::Ternary => {
                let mut storage = Storage::zeros(dtype, data.len());
                let (lo, hi) = (dtype.min_value(), dtype.max_value());
                for (i, &v) in data.iter().enumerate() {
                    let v = if v.is_nan() { 0.0 } else { v.trunc().clamp(lo, hi) };
                    storage.write_packed(i, v as i8);
                }
                storage
            }
        }
    }

    /// Wrap raw packed bytes (I4 / Ternary) holding `len` elements.
    pub fn from_packed_bytes(dtype: DType, bytes: Vec<u8>, len: usize) -> Result<Self> {
        let needed = dtype.storage_bytes(len);
        if bytes.len() != needed {
            return Err(Error::msg(format!(
                "{dtype} buffer for {len} elements needs {needed} bytes, got {}",
                bytes.len()
            )));
        }
        match dtype {
            DType::I4 => Ok(Storage::I4 { bytes, len }),
            DType::Ternary => Ok(Storage::Ternary { bytes, len }),
            other => Err(Error::msg(format!("{other} is not a packed dtype"))),
        }
    }

    pub fn dtype(&self) -> DType {
        match self {
            Storage::F32(_) => DType::F32,
            Storage::F16(_) => DType::F16,
            Storage::I32(_) => DType::I32,
            Storage::I8(_) => DType::I8,
            Storage::I4 { .. } => DType::I4,
            Storage::Ternary { .. } => DType::Ternary,
            Storage::Void { dtype, .. } => *dtype,
        }
    }

    /// Number of logical elements.
    pub fn len(&self) -> usize {
        match self {
            Storage::F32(v) => v.len(),
            Storage::F16(v) => v.len(),
            Storage::I32(v) => v.len(),
            Storage::I8(v) => v.len(),
            Storage::I4 { len, .. } | Storage::Ternary { len, .. } | Storage::Void { len, .. } => {
                *len
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_void(&self) -> bool {
        matches!(self, Storage::Void { .. })
    }

    /// The raw bytes of a packed buffer.
    pub fn packed_bytes(&self) -> Option<&[u8]> {
        match self {
            Storage::I4 { bytes, .. } | Storage::Ternary { bytes, .. } => Some(bytes),
            _ => None,
        }
    }

    /// Read element `i` of the buffer.
    ///
    /// Callers translate logical indices through a Layout first; `i` is a
    /// buffer position, checked against the buffer length.
    pub fn get(&self, i: usize) -> Result<f64> {
        self.check_position(i)?;
        Ok(match self {
            Storage::F32(v) => v[i] as f64,
            Storage::F16(v) => v[i].to_f64(),
            Storage::I32(v) => v[i] as f64,
            Storage::I8(v) => v[i] as f64,
            Storage::I4 { bytes, .. } => decode_i4(nibble_of(bytes, i)) as f64,
            Storage::Ternary { bytes, .. } => {
                let code = (bytes[i / 4] >> (2 * (i % 4))) & 0b11;
                decode_ternary(code).ok_or(Error::CorruptPackedValue {
                    dtype: DType::Ternary,
                    code,
                    index: i,
                })? as f64
            }
            Storage::Void { .. } => unreachable!("checked by check_position"),
        })
    }

    /// Write element `i` after validating that `value` fits the dtype.
    pub fn set(&mut self, i: usize, value: f64) -> Result<()> {
        self.check_position(i)?;
        let dtype = self.dtype();
        dtype.validate_value(value)?;
        if dtype.is_packed() {
            self.write_packed(i, value as i8);
            return Ok(());
        }
        match self {
            Storage::F32(v) => v[i] = value as f32,
            Storage::F16(v) => v[i] = f16::from_f64(value),
            Storage::I32(v) => v[i] = value as i32,
            Storage::I8(v) => v[i] = value as i8,
            _ => {}
        }
        Ok(())
    }

    /// Copy every element out as f64, in buffer order.
    pub fn to_f64_vec(&self) -> Result<Vec<f64>> {
        (0..self.len()).map(|i| self.get(i)).collect()
    }

    fn check_position(&self, i: usize) -> Result<()> {
        if let Storage::Void { dtype, len } = self {
            log::trace!("access to void {dtype} buffer at {i}");
            return Err(Error::VoidData {
                shape: crate::Shape::from(*len),
            });
        }
        if i >= self.len() {
            return Err(Error::msg(format!(
                "buffer position {i} outside {} buffer of {} elements",
                self.dtype(),
                self.len()
            )));
        }
        Ok(())
    }

    /// Store an already-validated value into a packed slot.
    fn write_packed(&mut self, i: usize, value: i8) {
        match self {
            Storage::I4 { bytes, .. } => {
                let byte = &mut bytes[i / 2];
                let nibble = encode_i4(value);
                if i % 2 == 0 {
                    *byte = (*byte & 0xF0) | nibble;
                } else {
                    *byte = (*byte & 0x0F) | (nibble << 4);
                }
            }
            Storage::Ternary { bytes, .. } => {
                let shift = 2 * (i % 4);
                let byte = &mut bytes[i / 4];
                *byte = (*byte & !(0b11 << shift)) | (encode_ternary(value) << shift);
            }
            _ => {}
        }
    }
}

fn nibble_of(bytes: &[u8], i: usize) -> u8 {
    let byte = bytes[i / 2];
    if i % 2 == 0 {
        byte & 0x0F
    } else {
        byte >> 4
    }
}

/// 4-bit two's complement of a value in [-8, 7].
pub fn encode_i4(value: i8) -> u8 {
    (value as u8) & 0x0F
}

/// Sign-extend a nibble.
pub fn decode_i4(nibble: u8) -> i8 {
    let n = (nibble & 0x0F) as i8;
    if n >= 8 {
        n - 16
    } else {
        n
    }
}

/// 2-bit code of a value in {-1, 0, 1}.
pub fn encode_ternary(value: i8) -> u8 {
    (value as u8) & 0b11
}

/// Decode a 2-bit code; `None` for the unused code 0b10.
pub fn decode_ternary(code: u8) -> Option<i8> {
    match code & 0b11 {
        0b00 => Some(0),
        0b01 => Some(1),
        0b11 => Some(-1),
        _ => None,
    }
}
