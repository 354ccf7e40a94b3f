//! Typed values carried by measurement records.

use std::fmt;

use serde::Serialize;

use super::field::FieldType;

/// A single logged value, tagged with its wire type.
///
/// Floats are carried as raw IEEE754 bits: no rounding happens between
/// encode and decode.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Value {
    /// 64-bit float.
    F64(f64),
    /// 32-bit float.
    F32(f32),
    /// Unsigned 32-bit integer.
    U32(u32),
    /// Signed 32-bit integer.
    S32(i32),
    /// Unsigned 16-bit integer.
    U16(u16),
    /// Signed 16-bit integer.
    S16(i16),
    /// Unsigned 8-bit integer.
    U8(u8),
    /// Signed 8-bit integer.
    S8(i8),
}

impl Value {
    /// The wire type of this value.
    #[must_use]
    pub const fn field_type(&self) -> FieldType {
        match self {
            Self::F64(_) => FieldType::F64,
            Self::F32(_) => FieldType::F32,
            Self::U32(_) => FieldType::U32,
            Self::S32(_) => FieldType::S32,
            Self::U16(_) => FieldType::U16,
            Self::S16(_) => FieldType::S16,
            Self::U8(_) => FieldType::U8,
            Self::S8(_) => FieldType::S8,
        }
    }

    /// Widen to `f64`. Lossless for every variant.
    #[must_use]
    pub fn as_f64(&self) -> f64 {
        match *self {
            Self::F64(v) => v,
            Self::F32(v) => f64::from(v),
            Self::U32(v) => f64::from(v),
            Self::S32(v) => f64::from(v),
            Self::U16(v) => f64::from(v),
            Self::S16(v) => f64::from(v),
            Self::U8(v) => f64::from(v),
            Self::S8(v) => f64::from(v),
        }
    }

    /// Append the little-endian encoding of this value.
    pub(crate) fn write_le(&self, out: &mut Vec<u8>) {
        match *self {
            Self::F64(v) => out.extend_from_slice(&v.to_le_bytes()),
            Self::F32(v) => out.extend_from_slice(&v.to_le_bytes()),
            Self::U32(v) => out.extend_from_slice(&v.to_le_bytes()),
            Self::S32(v) => out.extend_from_slice(&v.to_le_bytes()),
            Self::U16(v) => out.extend_from_slice(&v.to_le_bytes()),
            Self::S16(v) => out.extend_from_slice(&v.to_le_bytes()),
            Self::U8(v) => out.push(v),
            Self::S8(v) => out.extend_from_slice(&v.to_le_bytes()),
        }
    }

    /// Read a value of `field_type` from the front of `bytes`.
    ///
    /// `bytes` must hold at least `field_type.width()` bytes.
    pub(crate) fn read_le(field_type: FieldType, bytes: &[u8]) -> Self {
        match field_type {
            FieldType::F64 => Self::F64(f64::from_le_bytes(array(bytes))),
            FieldType::F32 => Self::F32(f32::from_le_bytes(array(bytes))),
            FieldType::U32 => Self::U32(u32::from_le_bytes(array(bytes))),
            FieldType::S32 => Self::S32(i32::from_le_bytes(array(bytes))),
            FieldType::U16 => Self::U16(u16::from_le_bytes(array(bytes))),
            FieldType::S16 => Self::S16(i16::from_le_bytes(array(bytes))),
            FieldType::U8 => Self::U8(bytes[0]),
            FieldType::S8 => Self::S8(i8::from_le_bytes(array(bytes))),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::F64(v) => write!(f, "{v}"),
            Self::F32(v) => write!(f, "{v}"),
            Self::U32(v) => write!(f, "{v}"),
            Self::S32(v) => write!(f, "{v}"),
            Self::U16(v) => write!(f, "{v}"),
            Self::S16(v) => write!(f, "{v}"),
            Self::U8(v) => write!(f, "{v}"),
            Self::S8(v) => write!(f, "{v}"),
        }
    }
}

pub(crate) fn array<const N: usize>(bytes: &[u8]) -> [u8; N] {
    let mut out = [0u8; N];
    out.copy_from_slice(&bytes[..N]);
    out
}
