use ndarray::{Array4, ArrayD, IxDyn};
use qfuse_tensor::quantization::QuantParams;
use qfuse_tensor::{DType, TensorData, ValidationError};

/// Stored integers in logical order, with the quantization parameters.
pub(crate) fn int_array(tensor: &TensorData) -> Result<(ArrayD<i64>, QuantParams), ValidationError> {
    let (Some(values), DType::QFloat(params)) = (tensor.int_repr(), tensor.dtype()) else {
        return Err(ValidationError::DTypeMismatch {
            expected: "quantized".into(),
            actual: tensor.dtype().to_string(),
        });
    };
    let array = ArrayD::from_shape_vec(IxDyn(&tensor.shape().dims), values)
        .map_err(|err| shape_error(tensor, err))?;

    Ok((array, *params))
}

/// Float values in logical order.
pub(crate) fn float_array(tensor: &TensorData) -> Result<ArrayD<f32>, ValidationError> {
    if tensor.dtype() != &DType::F32 {
        return Err(ValidationError::DTypeMismatch {
            expected: DType::F32.to_string(),
            actual: tensor.dtype().to_string(),
        });
    }
    ArrayD::from_shape_vec(IxDyn(&tensor.shape().dims), tensor.to_f32_vec())
        .map_err(|err| shape_error(tensor, err))
}

pub(crate) fn int_array4(tensor: &TensorData) -> Result<(Array4<i64>, QuantParams), ValidationError> {
    let (array, params) = int_array(tensor)?;
    let array = array
        .into_dimensionality()
        .map_err(|err| shape_error(tensor, err))?;

    Ok((array, params))
}

pub(crate) fn into_quantized<D: ndarray::Dimension>(
    array: ndarray::Array<i64, D>,
    params: QuantParams,
) -> Result<TensorData, ValidationError> {
    let shape = array.shape().to_vec();
    TensorData::quantized(array.iter().copied().collect(), shape, params)
}

fn shape_error(tensor: &TensorData, err: ndarray::ShapeError) -> ValidationError {
    ValidationError::InvalidShape {
        actual: tensor.shape().clone(),
        reason: err.to_string(),
    }
}
