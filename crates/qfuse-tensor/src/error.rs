use crate::Shape;

/// Invalid quantization parameters or tensor data.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum ValidationError {
    /// The scale must be a finite, strictly positive number.
    #[error("Invalid quantization scale {scale}: expected a finite value > 0")]
    NonPositiveScale {
        /// The rejected scale.
        scale: f64,
    },
    /// The zero-point must be representable by the quantized data type.
    #[error("Zero-point {zero_point} is outside of the {dtype} range [{min}, {max}]")]
    ZeroPointOutOfRange {
        /// The rejected zero-point.
        zero_point: i64,
        /// Name of the quantized data type.
        dtype: &'static str,
        /// Lowest representable value.
        min: i64,
        /// Highest representable value.
        max: i64,
    },
    /// The integer dtype tag doesn't name a supported quantized type.
    #[error("Unknown quantized dtype tag {0} (expected 12 for qint8 or 13 for quint8)")]
    UnknownDTypeTag(i64),
    /// The number of values doesn't cover the shape and strides.
    #[error("Buffer of {len} values can't hold a tensor of shape {shape} with strides {strides:?}")]
    BufferTooSmall {
        /// Number of values provided.
        len: usize,
        /// Requested shape.
        shape: Shape,
        /// Requested strides.
        strides: Vec<usize>,
    },
    /// Strides must have one entry per dimension.
    #[error("Expected {expected} strides, got {actual}")]
    StridesRank {
        /// Rank of the shape.
        expected: usize,
        /// Number of strides provided.
        actual: usize,
    },
    /// An operation expected a tensor with another data type.
    #[error("Expected a {expected} tensor, got {actual}")]
    DTypeMismatch {
        /// Expected data type.
        expected: String,
        /// Actual data type.
        actual: String,
    },
    /// An operation expected a tensor with another shape.
    #[error("Invalid shape {actual}: {reason}")]
    InvalidShape {
        /// Actual shape.
        actual: Shape,
        /// Why the shape is rejected.
        reason: String,
    },
    /// A uniform distribution needs finite bounds with `low < high`.
    #[error("Invalid uniform distribution bounds [{low}, {high})")]
    InvalidDistribution {
        /// Lower bound.
        low: f64,
        /// Upper bound.
        high: f64,
    },
    /// Convolution options are degenerate.
    #[error("Invalid conv2d options: {0}")]
    InvalidConvOptions(String),
}
