use ndarray::Zip;
use qfuse_tensor::quantization::{self as q, QuantDType, QuantParams};
use qfuse_tensor::{TensorData, ValidationError};

use crate::tensor::{float_array, int_array, into_quantized};

/// Quantize a float tensor with per-tensor parameters.
pub fn quantize_per_tensor(
    tensor: &TensorData,
    scale: f64,
    zero_point: i64,
    dtype: QuantDType,
) -> Result<TensorData, ValidationError> {
    let params = QuantParams::new(scale, zero_point, dtype)?;
    let values = float_array(tensor)?.mapv(|value| q::quantize(value as f64, &params));

    into_quantized(values, params)
}

/// Dequantize a quantized tensor.
pub fn dequantize(tensor: &TensorData) -> Result<TensorData, ValidationError> {
    let (values, params) = int_array(tensor)?;
    let values = values.mapv(|value| q::dequantize(value, &params) as f32);

    Ok(TensorData::new(
        values.iter().copied().collect(),
        tensor.shape().clone(),
    ))
}

/// Add two quantized tensors of the same shape.
///
/// The output uses the storage type of `lhs`.
pub fn quantized_add(
    lhs: &TensorData,
    rhs: &TensorData,
    scale: f64,
    zero_point: i64,
) -> Result<TensorData, ValidationError> {
    let (lhs_values, lhs_params) = int_array(lhs)?;
    let (rhs_values, rhs_params) = int_array(rhs)?;
    if lhs.shape() != rhs.shape() {
        return Err(ValidationError::InvalidShape {
            actual: rhs.shape().clone(),
            reason: format!("can't be added to a tensor of shape {}", lhs.shape()),
        });
    }
    let out = QuantParams::new(scale, zero_point, lhs_params.dtype)?;

    let values = Zip::from(&lhs_values)
        .and(&rhs_values)
        .map_collect(|a, b| q::quantized_add(*a, &lhs_params, *b, &rhs_params, &out));

    into_quantized(values, out)
}
