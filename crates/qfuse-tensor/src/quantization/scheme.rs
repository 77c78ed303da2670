use core::fmt;

use serde::{Deserialize, Serialize};

use crate::ValidationError;

/// Quantized storage data type.
#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum QuantDType {
    /// 8-bit signed integer.
    QInt8,
    /// 8-bit unsigned integer.
    QUInt8,
}

impl QuantDType {
    /// Returns the representable range `[a, b]`.
    pub fn range(&self) -> (i64, i64) {
        match self {
            QuantDType::QInt8 => (i8::MIN as i64, i8::MAX as i64),
            QuantDType::QUInt8 => (u8::MIN as i64, u8::MAX as i64),
        }
    }

    /// Resolve the integer dtype tag used by serialized graphs.
    pub fn from_tag(tag: i64) -> Result<Self, ValidationError> {
        match tag {
            12 => Ok(QuantDType::QInt8),
            13 => Ok(QuantDType::QUInt8),
            _ => Err(ValidationError::UnknownDTypeTag(tag)),
        }
    }

    /// The integer dtype tag used by serialized graphs.
    pub fn tag(&self) -> i64 {
        match self {
            QuantDType::QInt8 => 12,
            QuantDType::QUInt8 => 13,
        }
    }

    /// Short name of the data type.
    pub fn name(&self) -> &'static str {
        match self {
            QuantDType::QInt8 => "qint8",
            QuantDType::QUInt8 => "quint8",
        }
    }
}

impl fmt::Display for QuantDType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Rounding applied to `real / scale` before the zero-point shift.
#[derive(Clone, Copy, Debug, Default, Hash, PartialEq, Eq, Serialize, Deserialize)]
pub enum RoundingMode {
    /// Round half to even, the behavior of the reference quantized kernels.
    #[default]
    HalfToEven,
    /// Round half away from zero.
    HalfAwayFromZero,
}

impl RoundingMode {
    /// Round `value` to an integral float.
    pub fn round(&self, value: f64) -> f64 {
        match self {
            RoundingMode::HalfToEven => value.round_ties_even(),
            RoundingMode::HalfAwayFromZero => value.round(),
        }
    }
}
