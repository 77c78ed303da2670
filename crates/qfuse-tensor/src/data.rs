use core::fmt;

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::quantization::{QuantDType, QuantParams, dequantize};
use crate::{Distribution, Shape, ValidationError};

/// Element type of a tensor.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum DType {
    /// 32-bit float.
    F32,
    /// Per-tensor affine quantized values.
    QFloat(QuantParams),
}

impl DType {
    /// Quantization parameters of a quantized type.
    pub fn qparams(&self) -> Option<&QuantParams> {
        match self {
            DType::F32 => None,
            DType::QFloat(params) => Some(params),
        }
    }
}

impl fmt::Display for DType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DType::F32 => f.write_str("f32"),
            DType::QFloat(params) => write!(
                f,
                "{}(scale={}, zero_point={})",
                params.dtype, params.scale, params.zero_point
            ),
        }
    }
}

/// Raw storage of a tensor.
#[derive(Debug, Clone, PartialEq)]
pub enum TensorValues {
    /// Float values.
    F32(Vec<f32>),
    /// Signed 8-bit stored integers.
    QInt8(Vec<i8>),
    /// Unsigned 8-bit stored integers.
    QUInt8(Vec<u8>),
}

impl TensorValues {
    /// Number of values in the buffer.
    pub fn len(&self) -> usize {
        match self {
            TensorValues::F32(values) => values.len(),
            TensorValues::QInt8(values) => values.len(),
            TensorValues::QUInt8(values) => values.len(),
        }
    }

    /// Whether the buffer is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Data of a tensor: a buffer, a shape and the strides used to address it.
#[derive(Debug, Clone, PartialEq)]
pub struct TensorData {
    values: TensorValues,
    shape: Shape,
    strides: Vec<usize>,
    dtype: DType,
}

impl TensorData {
    /// Create a new contiguous float tensor.
    ///
    /// # Panics
    ///
    /// If the number of values doesn't match the shape.
    pub fn new<S: Into<Shape>>(values: Vec<f32>, shape: S) -> Self {
        let shape = shape.into();
        assert_eq!(
            values.len(),
            shape.num_elements(),
            "Shape {shape} is invalid for {} values",
            values.len()
        );

        Self {
            strides: shape.contiguous_strides(),
            values: TensorValues::F32(values),
            shape,
            dtype: DType::F32,
        }
    }

    /// Create a contiguous quantized tensor from stored integers.
    ///
    /// Values outside of the storage range saturate.
    pub fn quantized<S: Into<Shape>>(
        values: Vec<i64>,
        shape: S,
        params: QuantParams,
    ) -> Result<Self, ValidationError> {
        params.validate()?;
        let shape = shape.into();
        if values.len() != shape.num_elements() {
            return Err(ValidationError::BufferTooSmall {
                len: values.len(),
                strides: shape.contiguous_strides(),
                shape,
            });
        }

        let (a, b) = params.range();
        let values = values.into_iter().map(|q| q.clamp(a, b));
        let values = match params.dtype {
            QuantDType::QInt8 => TensorValues::QInt8(values.map(|q| q as i8).collect()),
            QuantDType::QUInt8 => TensorValues::QUInt8(values.map(|q| q as u8).collect()),
        };

        Ok(Self {
            strides: shape.contiguous_strides(),
            values,
            shape,
            dtype: DType::QFloat(params),
        })
    }

    /// Create a float tensor with values sampled from a distribution.
    pub fn random<S: Into<Shape>, R: Rng + ?Sized>(
        shape: S,
        distribution: Distribution,
        rng: &mut R,
    ) -> Result<Self, ValidationError> {
        distribution.validate()?;
        let shape = shape.into();
        let values = (0..shape.num_elements())
            .map(|_| distribution.sample(rng))
            .collect();

        Ok(Self::new(values, shape))
    }

    /// Reinterpret the buffer with custom strides.
    pub fn with_strides(mut self, strides: Vec<usize>) -> Result<Self, ValidationError> {
        if strides.len() != self.shape.num_dims() {
            return Err(ValidationError::StridesRank {
                expected: self.shape.num_dims(),
                actual: strides.len(),
            });
        }
        if self.shape.required_len(&strides) > self.values.len() {
            return Err(ValidationError::BufferTooSmall {
                len: self.values.len(),
                shape: self.shape,
                strides,
            });
        }

        self.strides = strides;
        Ok(self)
    }

    /// The shape of the tensor.
    pub fn shape(&self) -> &Shape {
        &self.shape
    }

    /// The strides used to address the buffer.
    pub fn strides(&self) -> &[usize] {
        &self.strides
    }

    /// The element type.
    pub fn dtype(&self) -> &DType {
        &self.dtype
    }

    /// The raw buffer.
    pub fn values(&self) -> &TensorValues {
        &self.values
    }

    /// Returns the total number of elements of the tensor.
    pub fn num_elements(&self) -> usize {
        self.shape.num_elements()
    }

    /// Whether the strides are the row-major strides of the shape.
    pub fn is_contiguous(&self) -> bool {
        self.strides == self.shape.contiguous_strides()
    }

    /// Buffer offsets of every element, in row-major logical order.
    pub fn offsets(&self) -> Vec<usize> {
        let dims = &self.shape.dims;
        let mut offsets = Vec::with_capacity(self.num_elements());
        if dims.contains(&0) {
            return offsets;
        }

        let mut index = vec![0usize; dims.len()];
        loop {
            offsets.push(index.iter().zip(&self.strides).map(|(i, s)| i * s).sum());

            // Odometer increment, last dimension first.
            let mut dim = dims.len();
            loop {
                if dim == 0 {
                    return offsets;
                }
                dim -= 1;
                index[dim] += 1;
                if index[dim] < dims[dim] {
                    break;
                }
                index[dim] = 0;
            }
        }
    }

    /// Stored integers in row-major logical order, if the tensor is quantized.
    pub fn int_repr(&self) -> Option<Vec<i64>> {
        let offsets = self.offsets();
        match &self.values {
            TensorValues::F32(_) => None,
            TensorValues::QInt8(values) => {
                Some(offsets.iter().map(|o| values[*o] as i64).collect())
            }
            TensorValues::QUInt8(values) => {
                Some(offsets.iter().map(|o| values[*o] as i64).collect())
            }
        }
    }

    /// Real values in row-major logical order; quantized tensors are dequantized.
    pub fn to_f32_vec(&self) -> Vec<f32> {
        match (&self.values, &self.dtype) {
            (TensorValues::F32(values), _) => self.offsets().iter().map(|o| values[*o]).collect(),
            (_, DType::QFloat(params)) => self
                .int_repr()
                .unwrap_or_default()
                .into_iter()
                .map(|q| dequantize(q, params) as f32)
                .collect(),
            (_, DType::F32) => unreachable!("Quantized storage always carries quantization parameters"),
        }
    }

    /// Dequantize into a contiguous float tensor.
    pub fn dequantize(&self) -> Result<TensorData, ValidationError> {
        match self.dtype {
            DType::F32 => Err(ValidationError::DTypeMismatch {
                expected: "quantized".into(),
                actual: self.dtype.to_string(),
            }),
            DType::QFloat(_) => Ok(TensorData::new(self.to_f32_vec(), self.shape.clone())),
        }
    }

    /// Largest absolute element-wise difference of the real values.
    ///
    /// Returns `None` when the shapes differ.
    pub fn max_abs_diff(&self, other: &TensorData) -> Option<f64> {
        if self.shape != other.shape {
            return None;
        }

        let diff = self
            .to_f32_vec()
            .iter()
            .zip(other.to_f32_vec())
            .map(|(a, b)| (*a as f64 - b as f64).abs())
            .fold(0.0, f64::max);
        Some(diff)
    }

    /// Largest absolute real value.
    pub fn max_abs(&self) -> f64 {
        self.to_f32_vec()
            .iter()
            .map(|x| (*x as f64).abs())
            .fold(0.0, f64::max)
    }

    /// Asserts each value is within the given [tolerance](Tolerance) of the other tensor.
    ///
    /// # Panics
    ///
    /// If the shapes differ or the tolerance is exceeded.
    pub fn assert_approx_eq(&self, other: &TensorData, tolerance: Tolerance) {
        let diff = self.max_abs_diff(other).unwrap_or_else(|| {
            panic!(
                "Shapes differ: actual {} vs expected {}",
                self.shape, other.shape
            )
        });

        assert!(
            tolerance.accepts(diff, self.max_abs().max(other.max_abs())),
            "Tensors differ by {diff} (tolerance {tolerance:?})\n=> actual:   {:?}\n=> expected: {:?}",
            self.to_f32_vec(),
            other.to_f32_vec(),
        );
    }
}

/// Acceptance bound for comparing tensors: `max|a - b| < relative * max(|a|, |b|)`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Tolerance {
    relative: f64,
}

impl Default for Tolerance {
    fn default() -> Self {
        Self::rel_to_max(2e-6)
    }
}

impl Tolerance {
    /// Error bound relative to the largest operand magnitude.
    pub fn rel_to_max(relative: f64) -> Self {
        Self { relative }
    }

    /// Whether a maximum difference is acceptable for operands bounded by `max_abs`.
    pub fn accepts(&self, max_diff: f64, max_abs: f64) -> bool {
        max_diff == 0.0 || max_diff < self.relative * max_abs
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    fn int8(scale: f64, zero_point: i64) -> QuantParams {
        QuantParams::new(scale, zero_point, QuantDType::QInt8).unwrap()
    }

    #[test]
    fn random_rejects_empty_ranges() {
        let mut rng = rand::rngs::StdRng::seed_from_u64(3);

        let result = TensorData::random([2, 2], Distribution::Uniform(0.5, -0.5), &mut rng);
        assert_eq!(
            result,
            Err(ValidationError::InvalidDistribution {
                low: 0.5,
                high: -0.5
            })
        );
        let x = TensorData::random([2, 2], Distribution::Uniform(-0.5, 0.5), &mut rng).unwrap();
        assert_eq!(x.shape(), &Shape::new([2, 2]));
    }

    #[test]
    #[should_panic]
    fn new_checks_len() {
        TensorData::new(vec![1.0, 2.0, 3.0], [2, 2]);
    }

    #[test]
    fn strided_view_reads_logical_order() {
        // [[0, 1, 2], [3, 4, 5]] viewed transposed.
        let data = TensorData::new(vec![0.0, 1.0, 2.0, 3.0, 4.0, 5.0], [3, 2])
            .with_strides(vec![1, 3])
            .unwrap();

        assert!(!data.is_contiguous());
        assert_eq!(data.to_f32_vec(), vec![0.0, 3.0, 1.0, 4.0, 2.0, 5.0]);
    }

    #[test]
    fn with_strides_checks_buffer() {
        let data = TensorData::new(vec![0.0; 4], [2, 2]);
        assert!(matches!(
            data.clone().with_strides(vec![4, 1]),
            Err(ValidationError::BufferTooSmall { .. })
        ));
        assert!(matches!(
            data.with_strides(vec![1]),
            Err(ValidationError::StridesRank { .. })
        ));
    }

    #[test]
    fn quantized_saturates_and_dequantizes() {
        let data = TensorData::quantized(vec![13, 23, 300, -300], [2, 2], int8(0.1, 13)).unwrap();

        assert_eq!(data.int_repr().unwrap(), vec![13, 23, 127, -128]);
        let real = data.dequantize().unwrap();
        assert_eq!(real.dtype(), &DType::F32);
        real.assert_approx_eq(
            &TensorData::new(vec![0.0, 1.0, 11.4, -14.1], [2, 2]),
            Tolerance::default(),
        );
    }

    #[test]
    fn dequantize_requires_quantized() {
        let data = TensorData::new(vec![0.0], [1]);
        assert!(data.dequantize().is_err());
    }

    #[test]
    fn tolerance_is_relative_to_max_operand() {
        let tolerance = Tolerance::rel_to_max(2e-6);
        assert!(tolerance.accepts(0.0, 0.0));
        assert!(tolerance.accepts(1e-6, 1.0));
        assert!(!tolerance.accepts(1e-5, 1.0));
    }

    #[test]
    #[should_panic]
    fn assert_approx_eq_detects_difference() {
        let a = TensorData::new(vec![1.0, 2.0], [2]);
        let b = TensorData::new(vec![1.0, 2.1], [2]);
        a.assert_approx_eq(&b, Tolerance::default());
    }

    #[test]
    fn scalar_tensor_has_one_element() {
        let data = TensorData::new(vec![4.0], Shape::new([]));
        assert_eq!(data.offsets(), vec![0]);
    }
}
