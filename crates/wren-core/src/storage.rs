use crate::dtype::{f32_to_i32, f64_to_i32, DType, Element, Scalar};
use crate::error::{Error, Result};

// Storage — Owned, dtype-tagged, contiguous element buffer
//
// One Vec per dtype behind an enum: the tag selects the buffer at
// construction and every element access goes through a dtype-checked match.
// Nothing is ever reinterpreted through a raw pointer.
//
// Storage never resizes in place and never aliases another Storage. Every
// conversion (to_float, to_int, to_bool, to_dtype) allocates a new buffer of
// the same length and applies the coercion table documented in dtype.rs.
//
// New storage is zero-initialized (0.0 / 0 / false).

/// A contiguous buffer of elements of a single [`DType`].
#[derive(Debug, Clone, PartialEq)]
pub enum Storage {
    F32(Vec<f32>),
    I32(Vec<i32>),
    Bool(Vec<bool>),
}

impl Storage {
    // Creation

    /// Allocate `count` zero-initialized elements of `dtype`.
    pub fn zeros(count: usize, dtype: DType) -> Self {
        match dtype {
            DType::F32 => Storage::F32(vec![0.0; count]),
            DType::I32 => Storage::I32(vec![0; count]),
            DType::Bool => Storage::Bool(vec![false; count]),
        }
    }

    /// Allocate from a signed host-side element count.
    ///
    /// Fails with [`Error::InvalidArgument`] if `count` is negative.
    pub fn with_len(count: i64, dtype: DType) -> Result<Self> {
        if count < 0 {
            return Err(Error::invalid_argument(format!(
                "storage element count must be non-negative, got {count}"
            )));
        }
        Ok(Self::zeros(count as usize, dtype))
    }

    /// Allocate `count` elements all set to `value`, coerced into `dtype`.
    pub fn full(count: usize, value: impl Into<Scalar>, dtype: DType) -> Self {
        match value.into().cast(dtype) {
            Scalar::F32(v) => Storage::F32(vec![v; count]),
            Scalar::I32(v) => Storage::I32(vec![v; count]),
            Scalar::Bool(v) => Storage::Bool(vec![v; count]),
        }
    }

    /// Import a flat host buffer of element kind `T` into a storage of
    /// `dtype`, coercing each element.
    pub fn from_slice<T: Element>(data: &[T], dtype: DType) -> Self {
        if T::DTYPE == dtype {
            return T::into_storage(data.to_vec());
        }
        match dtype {
            DType::F32 => Storage::F32(data.iter().map(|&v| v.into_scalar().to_f32()).collect()),
            DType::I32 => Storage::I32(data.iter().map(|&v| v.into_scalar().to_i32()).collect()),
            DType::Bool => {
                Storage::Bool(data.iter().map(|&v| v.into_scalar().to_bool()).collect())
            }
        }
    }

    /// Take ownership of a host buffer without copying; dtype comes from `T`.
    pub fn from_vec<T: Element>(data: Vec<T>) -> Self {
        T::into_storage(data)
    }

    /// Import a flat buffer of f64 values, coercing each into `dtype`.
    pub fn from_f64_slice(data: &[f64], dtype: DType) -> Self {
        match dtype {
            DType::F32 => Storage::F32(data.iter().map(|&v| v as f32).collect()),
            DType::I32 => Storage::I32(data.iter().map(|&v| f64_to_i32(v)).collect()),
            DType::Bool => Storage::Bool(data.iter().map(|&v| v != 0.0).collect()),
        }
    }

    // Queries

    /// The data type of the elements in this storage.
    pub fn dtype(&self) -> DType {
        match self {
            Storage::F32(_) => DType::F32,
            Storage::I32(_) => DType::I32,
            Storage::Bool(_) => DType::Bool,
        }
    }

    /// Number of elements.
    pub fn len(&self) -> usize {
        match self {
            Storage::F32(v) => v.len(),
            Storage::I32(v) => v.len(),
            Storage::Bool(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Total buffer size in bytes (`len × dtype width`).
    pub fn size_in_bytes(&self) -> usize {
        self.len() * self.dtype().size_in_bytes()
    }

    // Element access

    fn check_index(&self, index: usize) -> Result<()> {
        if index >= self.len() {
            return Err(Error::IndexOutOfRange {
                index,
                len: self.len(),
            });
        }
        Ok(())
    }

    /// Read one element, tagged with this storage's dtype.
    pub fn get(&self, index: usize) -> Result<Scalar> {
        self.check_index(index)?;
        Ok(match self {
            Storage::F32(v) => Scalar::F32(v[index]),
            Storage::I32(v) => Scalar::I32(v[index]),
            Storage::Bool(v) => Scalar::Bool(v[index]),
        })
    }

    /// Write one element. Values of another dtype are coerced first.
    pub fn set(&mut self, index: usize, value: impl Into<Scalar>) -> Result<()> {
        self.check_index(index)?;
        let value = value.into();
        match self {
            Storage::F32(v) => v[index] = value.to_f32(),
            Storage::I32(v) => v[index] = value.to_i32(),
            Storage::Bool(v) => v[index] = value.to_bool(),
        }
        Ok(())
    }

    /// Borrow the buffer as `&[T]`. Fails if `T` is not this storage's dtype.
    pub fn as_slice<T: Element>(&self) -> Result<&[T]> {
        T::storage_slice(self).ok_or(Error::DTypeMismatch {
            expected: self.dtype(),
            got: T::DTYPE,
        })
    }

    /// Borrow the f32 buffer mutably. Fails for non-float storage.
    pub fn as_f32_slice_mut(&mut self) -> Result<&mut [f32]> {
        match self {
            Storage::F32(v) => Ok(v),
            other => Err(Error::DTypeMismatch {
                expected: DType::F32,
                got: other.dtype(),
            }),
        }
    }

    // Export

    /// Copy every element out as `T`, coercing as needed.
    pub fn to_vec<T: Element>(&self) -> Vec<T> {
        if let Some(s) = T::storage_slice(self) {
            return s.to_vec();
        }
        match self {
            Storage::F32(v) => v.iter().map(|&x| T::from_scalar(Scalar::F32(x))).collect(),
            Storage::I32(v) => v.iter().map(|&x| T::from_scalar(Scalar::I32(x))).collect(),
            Storage::Bool(v) => v.iter().map(|&x| T::from_scalar(Scalar::Bool(x))).collect(),
        }
    }

    /// Copy every element out widened to f64.
    pub fn to_f64_vec(&self) -> Vec<f64> {
        match self {
            Storage::F32(v) => v.iter().map(|&x| x as f64).collect(),
            Storage::I32(v) => v.iter().map(|&x| x as f64).collect(),
            Storage::Bool(v) => v.iter().map(|&x| if x { 1.0 } else { 0.0 }).collect(),
        }
    }

    // Conversion (always a new allocation)

    /// New f32 storage: ints convert to the nearest float, bools to 0.0/1.0.
    pub fn to_float(&self) -> Storage {
        Storage::F32(match self {
            Storage::F32(v) => v.clone(),
            Storage::I32(v) => v.iter().map(|&x| x as f32).collect(),
            Storage::Bool(v) => v.iter().map(|&x| if x { 1.0 } else { 0.0 }).collect(),
        })
    }

    /// New i32 storage: floats truncate toward zero, bools become 0/1.
    pub fn to_int(&self) -> Storage {
        Storage::I32(match self {
            Storage::F32(v) => v.iter().map(|&x| f32_to_i32(x)).collect(),
            Storage::I32(v) => v.clone(),
            Storage::Bool(v) => v.iter().map(|&x| x as i32).collect(),
        })
    }

    /// New bool storage: nonzero test.
    pub fn to_bool(&self) -> Storage {
        Storage::Bool(match self {
            Storage::F32(v) => v.iter().map(|&x| x != 0.0).collect(),
            Storage::I32(v) => v.iter().map(|&x| x != 0).collect(),
            Storage::Bool(v) => v.clone(),
        })
    }

    /// New storage of `dtype` (a copy when `dtype` already matches).
    pub fn to_dtype(&self, dtype: DType) -> Storage {
        match dtype {
            DType::F32 => self.to_float(),
            DType::I32 => self.to_int(),
            DType::Bool => self.to_bool(),
        }
    }
}
