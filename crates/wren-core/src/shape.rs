use std::fmt;

use crate::error::{Error, Result};

// Size — N-dimensional shape representation
//
// A Size describes the extent of each dimension of a tensor:
//   - Scalar: Size([])          — 0 dimensions, 1 element
//   - Vector: Size([5])         — 1 dimension, 5 elements
//   - Matrix: Size([3, 4])      — 2 dimensions, 12 elements
//
// Two hard rules are checked at construction and nowhere else, because a
// Size can never be mutated afterwards:
//   1. At most MAX_RANK dimensions. Larger shapes fail, they are never truncated.
//   2. Every extent is positive. There are no empty tensors.
//
// Extents live in a fixed [usize; MAX_RANK] array with unused slots kept at
// zero, so derived equality and hashing only ever see the used prefix plus
// identical padding.

/// Hard cap on the number of dimensions of a [`Size`].
pub const MAX_RANK: usize = 8;

/// Immutable N-dimensional shape of a tensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Size {
    dims: [usize; MAX_RANK],
    rank: u8,
}

impl Size {
    /// Create a size from dimension extents.
    ///
    /// Fails with [`Error::RankExceeded`] for more than [`MAX_RANK`] extents
    /// and [`Error::InvalidExtent`] if any extent is zero. Shapes whose
    /// element count overflows `usize` fail with [`Error::NumelOverflow`].
    pub fn new(extents: impl AsRef<[usize]>) -> Result<Self> {
        let extents = extents.as_ref();
        if extents.len() > MAX_RANK {
            return Err(Error::RankExceeded {
                rank: extents.len(),
                max: MAX_RANK,
            });
        }
        let mut dims = [0usize; MAX_RANK];
        let mut numel = 1usize;
        for (axis, &extent) in extents.iter().enumerate() {
            if extent == 0 {
                return Err(Error::InvalidExtent { axis, extent: 0 });
            }
            numel = numel.checked_mul(extent).ok_or_else(|| Error::NumelOverflow {
                extents: extents.to_vec(),
            })?;
            dims[axis] = extent;
        }
        Ok(Size {
            dims,
            rank: extents.len() as u8,
        })
    }

    /// The 0-dimensional size of a scalar.
    pub fn scalar() -> Self {
        Size {
            dims: [0; MAX_RANK],
            rank: 0,
        }
    }

    /// The dimension extents as a slice.
    pub fn dims(&self) -> &[usize] {
        &self.dims[..self.rank as usize]
    }

    /// Number of dimensions (0 for scalar, 1 for vector, 2 for matrix, etc.).
    pub fn rank(&self) -> usize {
        self.rank as usize
    }

    /// Alias of [`rank`](Self::rank).
    pub fn ndim(&self) -> usize {
        self.rank()
    }

    pub fn is_scalar(&self) -> bool {
        self.rank == 0
    }

    /// Total number of elements (product of all extents).
    /// A scalar size has 1 element. Never overflows: `new` rejects such shapes.
    pub fn numel(&self) -> usize {
        self.dims().iter().product()
    }

    /// Extent of a specific dimension.
    pub fn dim(&self, d: usize) -> Result<usize> {
        self.dims().get(d).copied().ok_or(Error::DimOutOfRange {
            dim: d,
            rank: self.rank(),
        })
    }

    /// Contiguous (row-major / C-order) strides.
    ///
    /// For size [2, 3, 4], strides are [12, 4, 1].
    pub fn strides(&self) -> Vec<usize> {
        let rank = self.rank();
        let mut strides = vec![0usize; rank];
        if rank > 0 {
            strides[rank - 1] = 1;
            for i in (0..rank - 1).rev() {
                strides[i] = strides[i + 1] * self.dims[i + 1];
            }
        }
        strides
    }

    /// Flat row-major offset of a multi-dimensional index.
    pub fn offset(&self, index: &[usize]) -> Result<usize> {
        if index.len() != self.rank() {
            return Err(Error::RankMismatch {
                expected: self.rank(),
                got: index.len(),
            });
        }
        let mut offset = 0usize;
        for ((&i, &extent), stride) in index.iter().zip(self.dims()).zip(self.strides()) {
            if i >= extent {
                return Err(Error::IndexOutOfRange {
                    index: i,
                    len: extent,
                });
            }
            offset += i * stride;
        }
        Ok(offset)
    }
}

impl Default for Size {
    fn default() -> Self {
        Size::scalar()
    }
}

impl fmt::Display for Size {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[")?;
        for (i, d) in self.dims().iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", d)?;
        }
        write!(f, "]")
    }
}

// Fallible conversions
// These let you write: Size::try_from(vec![3, 4])? or Size::try_from(&[2i64, 5][..])?

impl TryFrom<Vec<usize>> for Size {
    type Error = Error;
    fn try_from(v: Vec<usize>) -> Result<Self> {
        Size::new(v)
    }
}

impl TryFrom<&[usize]> for Size {
    type Error = Error;
    fn try_from(s: &[usize]) -> Result<Self> {
        Size::new(s)
    }
}

impl<const N: usize> TryFrom<[usize; N]> for Size {
    type Error = Error;
    fn try_from(a: [usize; N]) -> Result<Self> {
        Size::new(a)
    }
}

impl TryFrom<&[i64]> for Size {
    type Error = Error;

    /// Signed extents, as they arrive from host arrays. Negative and zero
    /// extents both fail with [`Error::InvalidExtent`].
    fn try_from(s: &[i64]) -> Result<Self> {
        if s.len() > MAX_RANK {
            return Err(Error::RankExceeded {
                rank: s.len(),
                max: MAX_RANK,
            });
        }
        let mut dims = Vec::with_capacity(s.len());
        for (axis, &extent) in s.iter().enumerate() {
            if extent <= 0 {
                return Err(Error::InvalidExtent { axis, extent });
            }
            let extent = usize::try_from(extent).map_err(|_| {
                Error::invalid_argument(format!(
                    "extent {extent} for axis {axis} does not fit in usize"
                ))
            })?;
            dims.push(extent);
        }
        Size::new(dims)
    }
}
