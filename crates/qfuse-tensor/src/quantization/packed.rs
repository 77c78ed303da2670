use crate::conv::dims4;
use crate::{Conv2dOptions, DType, Shape, TensorData, ValidationError};

use super::QuantParams;

/// Quantized convolution weights prepared once and reused by every convolution
/// consuming them.
///
/// The token can only be produced by [prepack](PackedConv2d::prepack); the
/// weights are stored contiguously.
#[derive(Debug, Clone, PartialEq)]
pub struct PackedConv2d {
    weight: TensorData,
    weight_params: QuantParams,
    bias: Option<Vec<f32>>,
    options: Conv2dOptions,
}

impl PackedConv2d {
    /// Pack quantized weights of shape `[channels_out, channels_in / groups, kernel_height, kernel_width]`
    /// with an optional float bias of shape `[channels_out]`.
    pub fn prepack(
        weight: &TensorData,
        bias: Option<&TensorData>,
        options: Conv2dOptions,
    ) -> Result<Self, ValidationError> {
        options.validate()?;

        let weight_params = match weight.dtype() {
            DType::QFloat(params) => *params,
            DType::F32 => {
                return Err(ValidationError::DTypeMismatch {
                    expected: "quantized weight".into(),
                    actual: weight.dtype().to_string(),
                });
            }
        };
        let [channels_out, ..] = dims4(weight.shape(), "conv2d weight")?;
        if channels_out % options.groups != 0 {
            return Err(ValidationError::InvalidShape {
                actual: weight.shape().clone(),
                reason: format!(
                    "{channels_out} output channels can't be split in {} groups",
                    options.groups
                ),
            });
        }

        let bias = match bias {
            Some(bias) => {
                if bias.dtype() != &DType::F32 {
                    return Err(ValidationError::DTypeMismatch {
                        expected: DType::F32.to_string(),
                        actual: bias.dtype().to_string(),
                    });
                }
                if bias.shape() != &Shape::new([channels_out]) {
                    return Err(ValidationError::InvalidShape {
                        actual: bias.shape().clone(),
                        reason: format!("bias must have shape [{channels_out}]"),
                    });
                }
                Some(bias.to_f32_vec())
            }
            None => None,
        };

        let weight = TensorData::quantized(
            weight.int_repr().unwrap_or_default(),
            weight.shape().clone(),
            weight_params,
        )?;

        Ok(Self {
            weight,
            weight_params,
            bias,
            options,
        })
    }

    /// The packed quantized weights.
    pub fn weight(&self) -> &TensorData {
        &self.weight
    }

    /// Shape of the packed weights.
    pub fn weight_shape(&self) -> &Shape {
        self.weight.shape()
    }

    /// Quantization parameters of the weights.
    pub fn weight_params(&self) -> &QuantParams {
        &self.weight_params
    }

    /// The float bias, one value per output channel.
    pub fn bias(&self) -> Option<&[f32]> {
        self.bias.as_deref()
    }

    /// The convolution attributes.
    pub fn options(&self) -> &Conv2dOptions {
        &self.options
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::quantization::QuantDType;

    fn weight() -> TensorData {
        let params = QuantParams::new(0.1, 12, QuantDType::QInt8).unwrap();
        TensorData::quantized((0..24).collect(), [2, 3, 2, 2], params).unwrap()
    }

    #[test]
    fn prepack_keeps_weights_and_bias() {
        let bias = TensorData::new(vec![0.5, -0.5], [2]);
        let packed = PackedConv2d::prepack(&weight(), Some(&bias), Conv2dOptions::default()).unwrap();

        assert_eq!(packed.weight_shape(), &Shape::new([2, 3, 2, 2]));
        assert_eq!(packed.weight_params().zero_point, 12);
        assert_eq!(packed.bias(), Some([0.5, -0.5].as_slice()));
        assert_eq!(packed.weight().int_repr().unwrap()[5], 5);
    }

    #[test]
    fn prepack_rejects_float_weights() {
        let weight = TensorData::new(vec![0.0; 24], [2, 3, 2, 2]);
        let err = PackedConv2d::prepack(&weight, None, Conv2dOptions::default());
        assert!(matches!(err, Err(ValidationError::DTypeMismatch { .. })));
    }

    #[test]
    fn prepack_rejects_bias_shape() {
        let bias = TensorData::new(vec![0.0; 3], [3]);
        let err = PackedConv2d::prepack(&weight(), Some(&bias), Conv2dOptions::default());
        assert!(matches!(err, Err(ValidationError::InvalidShape { .. })));
    }

    #[test]
    fn prepack_rejects_groups() {
        let options = Conv2dOptions::new([1, 1], [0, 0], [1, 1], 3);
        let err = PackedConv2d::prepack(&weight(), None, options);
        assert!(matches!(err, Err(ValidationError::InvalidShape { .. })));
    }
}
