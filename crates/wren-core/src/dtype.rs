use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};
use crate::storage::Storage;

// DType — Supported element types
//
// Every tensor carries a DType that fixes its element width and how values
// are coerced when they cross from one representation into another:
//
//   F32  — 32-bit IEEE float, the only type that can carry gradients
//   I32  — 32-bit two's-complement integer, for indices and labels
//   Bool — one byte per element (0/1), for masks
//
// COERCION TABLE (applied by Scalar::cast and every Storage conversion):
//
//   f32  -> i32   truncate toward zero, NaN -> 0, saturate at i32 bounds
//   f32  -> bool  x != 0.0 (NaN is nonzero, so NaN -> true)
//   i32  -> f32   nearest representable f32 (exact for |x| <= 2^24)
//   i32  -> bool  x != 0
//   bool -> f32   0.0 / 1.0
//   bool -> i32   0 / 1

/// Enum of all supported element data types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DType {
    F32,
    I32,
    Bool,
}

impl DType {
    /// Size of one element in bytes.
    pub fn size_in_bytes(&self) -> usize {
        match self {
            DType::F32 => 4,
            DType::I32 => 4,
            DType::Bool => 1,
        }
    }

    /// Whether this dtype is a floating-point type (needed for gradient tracking).
    pub fn is_float(&self) -> bool {
        matches!(self, DType::F32)
    }

    /// Canonical short name, as rendered by `Display`.
    pub fn as_str(&self) -> &'static str {
        match self {
            DType::F32 => "f32",
            DType::I32 => "i32",
            DType::Bool => "bool",
        }
    }
}

impl fmt::Display for DType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DType {
    type Err = Error;

    /// Parse a host element-kind name. Anything outside the three supported
    /// kinds fails with [`Error::UnsupportedDType`].
    fn from_str(s: &str) -> Result<Self> {
        match s {
            "f32" | "float32" => Ok(DType::F32),
            "i32" | "int32" => Ok(DType::I32),
            "bool" => Ok(DType::Bool),
            other => Err(Error::UnsupportedDType(other.to_string())),
        }
    }
}

// Element-wise coercion helpers

pub(crate) fn f32_to_i32(v: f32) -> i32 {
    match num_traits::cast::<f32, i32>(v) {
        Some(i) => i,
        // Out of range or NaN
        None if v.is_nan() => 0,
        None if v > 0.0 => i32::MAX,
        None => i32::MIN,
    }
}

pub(crate) fn f64_to_i32(v: f64) -> i32 {
    match num_traits::cast::<f64, i32>(v) {
        Some(i) => i,
        None if v.is_nan() => 0,
        None if v > 0.0 => i32::MAX,
        None => i32::MIN,
    }
}

/// A single element value tagged with its dtype.
///
/// This is what `Storage::get` returns and what `Storage::set` accepts.
/// Writing a `Scalar` of a different dtype into a storage coerces it with the
/// table above.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Scalar {
    F32(f32),
    I32(i32),
    Bool(bool),
}

impl Scalar {
    /// The dtype this value is tagged with.
    pub fn dtype(&self) -> DType {
        match self {
            Scalar::F32(_) => DType::F32,
            Scalar::I32(_) => DType::I32,
            Scalar::Bool(_) => DType::Bool,
        }
    }

    /// Coerce this value into `dtype`.
    pub fn cast(self, dtype: DType) -> Scalar {
        match dtype {
            DType::F32 => Scalar::F32(self.to_f32()),
            DType::I32 => Scalar::I32(self.to_i32()),
            DType::Bool => Scalar::Bool(self.to_bool()),
        }
    }

    pub fn to_f32(self) -> f32 {
        match self {
            Scalar::F32(v) => v,
            Scalar::I32(v) => v as f32,
            Scalar::Bool(v) => {
                if v {
                    1.0
                } else {
                    0.0
                }
            }
        }
    }

    pub fn to_i32(self) -> i32 {
        match self {
            Scalar::F32(v) => f32_to_i32(v),
            Scalar::I32(v) => v,
            Scalar::Bool(v) => v as i32,
        }
    }

    pub fn to_bool(self) -> bool {
        match self {
            Scalar::F32(v) => v != 0.0,
            Scalar::I32(v) => v != 0,
            Scalar::Bool(v) => v,
        }
    }

    /// Widen to f64 (exact for all three dtypes).
    pub fn to_f64(self) -> f64 {
        match self {
            Scalar::F32(v) => v as f64,
            Scalar::I32(v) => v as f64,
            Scalar::Bool(v) => {
                if v {
                    1.0
                } else {
                    0.0
                }
            }
        }
    }

    /// Build a value of `dtype` from a host f64, applying the float row of
    /// the coercion table.
    pub fn from_f64(v: f64, dtype: DType) -> Scalar {
        match dtype {
            DType::F32 => Scalar::F32(v as f32),
            DType::I32 => Scalar::I32(f64_to_i32(v)),
            DType::Bool => Scalar::Bool(v != 0.0),
        }
    }
}

impl From<f32> for Scalar {
    fn from(v: f32) -> Self {
        Scalar::F32(v)
    }
}

impl From<i32> for Scalar {
    fn from(v: i32) -> Self {
        Scalar::I32(v)
    }
}

impl From<bool> for Scalar {
    fn from(v: bool) -> Self {
        Scalar::Bool(v)
    }
}

impl fmt::Display for Scalar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scalar::F32(v) => write!(f, "{v}"),
            Scalar::I32(v) => write!(f, "{v}"),
            Scalar::Bool(v) => write!(f, "{v}"),
        }
    }
}

// Element — Trait that connects Rust types to the DType enum
//
// Implemented for exactly the three host element kinds that have a DType.
// It lets generic code like `Tensor::from_slice::<T>` pick the dtype from T,
// and gives Storage a dtype-checked way to hand out typed slices.

/// Trait implemented by Rust types that can be stored in a tensor.
pub trait Element: Copy + Send + Sync + PartialEq + fmt::Debug + 'static {
    /// The corresponding DType enum variant.
    const DTYPE: DType;

    /// Tag this value as a [`Scalar`].
    fn into_scalar(self) -> Scalar;

    /// Extract a value of this type from any scalar, coercing as needed.
    fn from_scalar(s: Scalar) -> Self;

    /// Borrow the storage buffer as `&[Self]` if its dtype matches.
    fn storage_slice(storage: &Storage) -> Option<&[Self]>;

    /// Wrap an owned buffer of this type as storage.
    fn into_storage(data: Vec<Self>) -> Storage;
}

impl Element for f32 {
    const DTYPE: DType = DType::F32;
    fn into_scalar(self) -> Scalar {
        Scalar::F32(self)
    }
    fn from_scalar(s: Scalar) -> Self {
        s.to_f32()
    }
    fn storage_slice(storage: &Storage) -> Option<&[Self]> {
        match storage {
            Storage::F32(v) => Some(v),
            _ => None,
        }
    }
    fn into_storage(data: Vec<Self>) -> Storage {
        Storage::F32(data)
    }
}

impl Element for i32 {
    const DTYPE: DType = DType::I32;
    fn into_scalar(self) -> Scalar {
        Scalar::I32(self)
    }
    fn from_scalar(s: Scalar) -> Self {
        s.to_i32()
    }
    fn storage_slice(storage: &Storage) -> Option<&[Self]> {
        match storage {
            Storage::I32(v) => Some(v),
            _ => None,
        }
    }
    fn into_storage(data: Vec<Self>) -> Storage {
        Storage::I32(data)
    }
}

impl Element for bool {
    const DTYPE: DType = DType::Bool;
    fn into_scalar(self) -> Scalar {
        Scalar::Bool(self)
    }
    fn from_scalar(s: Scalar) -> Self {
        s.to_bool()
    }
    fn storage_slice(storage: &Storage) -> Option<&[Self]> {
        match storage {
            Storage::Bool(v) => Some(v),
            _ => None,
        }
    }
    fn into_storage(data: Vec<Self>) -> Storage {
        Storage::Bool(data)
    }
}
