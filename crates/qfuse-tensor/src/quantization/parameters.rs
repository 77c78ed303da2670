use serde::{Deserialize, Serialize};

use super::QuantDType;
use crate::ValidationError;

/// Per-tensor affine quantization parameters.
///
/// A stored integer `q` represents the real value `scale * (q - zero_point)`.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct QuantParams {
    /// Real-value step per integer code.
    pub scale: f64,
    /// Integer code representing the real value 0.
    pub zero_point: i32,
    /// Storage data type.
    pub dtype: QuantDType,
}

impl QuantParams {
    /// Create validated quantization parameters.
    pub fn new(scale: f64, zero_point: i64, dtype: QuantDType) -> Result<Self, ValidationError> {
        check_scale(scale)?;
        let (min, max) = dtype.range();
        if zero_point < min || zero_point > max {
            return Err(ValidationError::ZeroPointOutOfRange {
                zero_point,
                dtype: dtype.name(),
                min,
                max,
            });
        }

        Ok(Self {
            scale,
            zero_point: zero_point as i32,
            dtype,
        })
    }

    /// Create validated quantization parameters from a serialized dtype tag.
    pub fn from_tag(scale: f64, zero_point: i64, dtype_tag: i64) -> Result<Self, ValidationError> {
        Self::new(scale, zero_point, QuantDType::from_tag(dtype_tag)?)
    }

    /// Check the invariants of parameters that were built field by field.
    pub fn validate(&self) -> Result<(), ValidationError> {
        Self::new(self.scale, self.zero_point as i64, self.dtype).map(|_| ())
    }

    /// Returns the representable range `[a, b]` of the storage type.
    pub fn range(&self) -> (i64, i64) {
        self.dtype.range()
    }
}

/// Scales must be finite and strictly positive.
pub fn check_scale(scale: f64) -> Result<(), ValidationError> {
    if scale.is_finite() && scale > 0.0 {
        Ok(())
    } else {
        Err(ValidationError::NonPositiveScale { scale })
    }
}
