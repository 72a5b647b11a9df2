use crate::dtype::DType;
use crate::shape::Size;

/// All errors that can occur within Wren.
///
/// Every failure is a contract violation detected at the point where it
/// happens: bad shapes, dtype misuse, out-of-bounds access, or calling
/// `backward()` on a tensor that does not track gradients. A single error
/// type keeps propagation with `?` uniform across the crates.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// More than [`MAX_RANK`](crate::shape::MAX_RANK) dimensions were requested.
    #[error("rank exceeded: requested {rank} dimensions, at most {max} are supported")]
    RankExceeded { rank: usize, max: usize },

    /// A dimension extent was zero or negative.
    #[error("invalid extent {extent} for axis {axis}: extents must be positive")]
    InvalidExtent { axis: usize, extent: i64 },

    /// The product of the extents does not fit in `usize`.
    #[error("shape {extents:?} has too many elements")]
    NumelOverflow { extents: Vec<usize> },

    /// Shape mismatch between a tensor and a gradient or operand.
    #[error("shape mismatch: expected {expected}, got {got}")]
    ShapeMismatch { expected: Size, got: Size },

    /// Operation requires a specific rank (number of dimensions).
    #[error("rank mismatch: expected rank {expected}, got {got}")]
    RankMismatch { expected: usize, got: usize },

    /// DType mismatch between a tensor and a value or operand.
    #[error("dtype mismatch: expected {expected}, got {got}")]
    DTypeMismatch { expected: DType, got: DType },

    /// `backward()` was called on a tensor that does not require gradients.
    #[error("tensor does not require gradients")]
    NoGradient,

    /// Element access outside of the storage or shape bounds.
    #[error("index {index} out of range for length {len}")]
    IndexOutOfRange { index: usize, len: usize },

    /// Dimension index out of range for the shape's rank.
    #[error("dimension out of range: dim {dim} for shape with {rank} dimensions")]
    DimOutOfRange { dim: usize, rank: usize },

    /// An element kind outside {f32, i32, bool} was requested.
    #[error("unsupported dtype: {0}")]
    UnsupportedDType(String),

    /// A caller-supplied argument violates an operation's contract.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Tried to access a scalar from a non-scalar tensor.
    #[error("not a scalar: tensor has shape {shape}")]
    NotAScalar { shape: Size },

    /// Element count mismatch when creating from a buffer.
    #[error("element count mismatch: shape {shape} requires {expected} elements, got {got}")]
    ElementCountMismatch {
        shape: Size,
        expected: usize,
        got: usize,
    },

    /// Generic message for cases not covered above.
    #[error("{0}")]
    Msg(String),
}

impl Error {
    /// Create an error from any string message.
    pub fn msg(s: impl Into<String>) -> Self {
        Error::Msg(s.into())
    }

    /// Create an [`Error::InvalidArgument`] from any string message.
    pub fn invalid_argument(s: impl Into<String>) -> Self {
        Error::InvalidArgument(s.into())
    }
}

/// Convenience Result type used throughout Wren.
pub type Result<T> = std::result::Result<T, Error>;

/// Macro for early return with a formatted error message.
/// Usage: `bail!("something went wrong: {}", detail)`
#[macro_export]
macro_rules! bail {
    ($($arg:tt)*) => {
        return Err($crate::Error::Msg(format!($($arg)*)))
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_messages() {
        let e = Error::RankExceeded { rank: 9, max: 8 };
        assert_eq!(
            e.to_string(),
            "rank exceeded: requested 9 dimensions, at most 8 are supported"
        );

        let e = Error::DTypeMismatch {
            expected: DType::F32,
            got: DType::Bool,
        };
        assert_eq!(e.to_string(), "dtype mismatch: expected f32, got bool");
    }

    #[test]
    fn test_bail_macro() {
        fn fails(n: usize) -> Result<()> {
            if n > 1 {
                crate::bail!("too many: {}", n);
            }
            Ok(())
        }
        assert!(fails(0).is_ok());
        assert_eq!(fails(3).unwrap_err().to_string(), "too many: 3");
    }
}
