use ndarray::Array4;
use qfuse_tensor::quantization::{PackedConv2d, QuantParams, conv_term, requantize_accumulator};
use qfuse_tensor::{Conv2dOptions, TensorData, ValidationError, conv2d_output_shape};

use crate::tensor::{int_array4, into_quantized};

/// Pack quantized weights `[channels_out, channels_in / groups, kernel_height, kernel_width]`
/// and an optional float bias `[channels_out]` for [quantized_conv2d].
pub fn quantized_conv2d_prepack(
    weight: &TensorData,
    bias: Option<&TensorData>,
    stride: [usize; 2],
    padding: [usize; 2],
    dilation: [usize; 2],
    groups: usize,
) -> Result<PackedConv2d, ValidationError> {
    PackedConv2d::prepack(
        weight,
        bias,
        Conv2dOptions::new(stride, padding, dilation, groups),
    )
}

/// Quantized 2D convolution of a `[batch_size, channels_in, height, width]` input.
///
/// The output uses the storage type of the input.
pub fn quantized_conv2d(
    x: &TensorData,
    packed: &PackedConv2d,
    scale: f64,
    zero_point: i64,
) -> Result<TensorData, ValidationError> {
    conv2d(x, packed, scale, zero_point, false)
}

/// Quantized 2D convolution followed by a ReLU applied before requantization.
pub fn quantized_conv2d_relu(
    x: &TensorData,
    packed: &PackedConv2d,
    scale: f64,
    zero_point: i64,
) -> Result<TensorData, ValidationError> {
    conv2d(x, packed, scale, zero_point, true)
}

fn conv2d(
    x: &TensorData,
    packed: &PackedConv2d,
    scale: f64,
    zero_point: i64,
    relu: bool,
) -> Result<TensorData, ValidationError> {
    let options = packed.options();
    let out_shape = conv2d_output_shape(x.shape(), packed.weight_shape(), options)?;
    let (x, x_params) = int_array4(x)?;
    let (weight, weight_params) = int_array4(packed.weight())?;
    let out = QuantParams::new(scale, zero_point, x_params.dtype)?;

    let (batch_size, _, in_height, in_width) = x.dim();
    let (channels_out, channels_per_group, kernel_height, kernel_width) = weight.dim();
    let (out_height, out_width) = (out_shape.dims[2], out_shape.dims[3]);
    let [stride_height, stride_width] = options.stride;
    let [padding_height, padding_width] = options.padding;
    let [dilation_height, dilation_width] = options.dilation;
    let out_channels_per_group = channels_out / options.groups;
    let acc_scale = x_params.scale * weight_params.scale;
    let bias = packed.bias();

    let mut output = Array4::<i64>::zeros((batch_size, channels_out, out_height, out_width));

    for b in 0..batch_size {
        for oc in 0..channels_out {
            let group = oc / out_channels_per_group;

            for oh in 0..out_height {
                for ow in 0..out_width {
                    let mut acc = 0i64;

                    for ic in 0..channels_per_group {
                        let c = group * channels_per_group + ic;

                        for kh in 0..kernel_height {
                            let ih = (oh * stride_height + kh * dilation_height) as isize
                                - padding_height as isize;
                            if ih < 0 || ih >= in_height as isize {
                                continue;
                            }

                            for kw in 0..kernel_width {
                                let iw = (ow * stride_width + kw * dilation_width) as isize
                                    - padding_width as isize;
                                if iw < 0 || iw >= in_width as isize {
                                    continue;
                                }

                                acc += conv_term(
                                    x[[b, c, ih as usize, iw as usize]],
                                    &x_params,
                                    weight[[oc, ic, kh, kw]],
                                    &weight_params,
                                );
                            }
                        }
                    }

                    let bias = bias.map(|bias| bias[oc] as f64);
                    output[[b, oc, oh, ow]] =
                        requantize_accumulator(acc, acc_scale, bias, relu, &out);
                }
            }
        }
    }

    into_quantized(output, out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use qfuse_tensor::Shape;
    use qfuse_tensor::quantization::QuantDType;
    use rstest::rstest;

    fn quint8(scale: f64, zero_point: i64) -> QuantParams {
        QuantParams::new(scale, zero_point, QuantDType::QUInt8).unwrap()
    }

    #[test]
    fn conv_matches_a_hand_computed_window() {
        // One 2x2 window per output channel covering the whole input.
        let x = TensorData::quantized((1..=12).collect(), [1, 3, 2, 2], quint8(0.5, 2)).unwrap();
        let weight = TensorData::quantized(
            (0..24).map(|i| i % 5).collect(),
            [2, 3, 2, 2],
            quint8(0.25, 1),
        )
        .unwrap();
        let packed = quantized_conv2d_prepack(&weight, None, [1, 1], [0, 0], [1, 1], 1).unwrap();

        let y = quantized_conv2d(&x, &packed, 1.0, 0).unwrap();

        let expected: Vec<i64> = (0..2)
            .map(|oc| {
                let acc: i64 = (0..12)
                    .map(|i| ((i + 1) - 2) * ((oc * 12 + i) % 5 - 1))
                    .sum();
                ((acc as f64 * 0.125).round_ties_even() as i64).clamp(0, 255)
            })
            .collect();
        assert_eq!(y.shape(), &Shape::new([1, 2, 1, 1]));
        assert_eq!(y.int_repr().unwrap(), expected);
    }

    #[test]
    fn relu_clamps_before_requantization() {
        let params = quint8(1.0, 100);
        let x = TensorData::quantized(vec![90, 110], [1, 1, 1, 2], params).unwrap();
        let weight = TensorData::quantized(vec![101], [1, 1, 1, 1], params).unwrap();
        let packed = quantized_conv2d_prepack(&weight, None, [1, 1], [0, 0], [1, 1], 1).unwrap();

        let plain = quantized_conv2d(&x, &packed, 1.0, 100).unwrap();
        let relu = quantized_conv2d_relu(&x, &packed, 1.0, 100).unwrap();

        assert_eq!(plain.int_repr().unwrap(), vec![90, 110]);
        assert_eq!(relu.int_repr().unwrap(), vec![100, 110]);
    }

    #[test]
    fn padding_contributes_zero() {
        let params = quint8(1.0, 0);
        let x = TensorData::quantized(vec![1, 2, 3, 4], [1, 1, 2, 2], params).unwrap();
        let weight = TensorData::quantized(vec![1; 9], [1, 1, 3, 3], params).unwrap();
        let packed = quantized_conv2d_prepack(&weight, None, [1, 1], [1, 1], [1, 1], 1).unwrap();

        let y = quantized_conv2d(&x, &packed, 1.0, 0).unwrap();

        // Every 3x3 window centered on a 2x2 input covers the whole input.
        assert_eq!(y.int_repr().unwrap(), vec![10, 10, 10, 10]);
    }

    #[test]
    fn bias_is_added_in_the_real_domain() {
        let params = quint8(0.5, 0);
        let x = TensorData::quantized(vec![4], [1, 1, 1, 1], params).unwrap();
        let weight = TensorData::quantized(vec![2, 2], [2, 1, 1, 1], params).unwrap();
        let bias = TensorData::new(vec![1.0, -1.0], [2]);
        let packed =
            quantized_conv2d_prepack(&weight, Some(&bias), [1, 1], [0, 0], [1, 1], 1).unwrap();

        let y = quantized_conv2d(&x, &packed, 0.5, 0).unwrap();

        // 2 * 1 + 1 = 3 and 2 * 1 - 1 = 1, with scale 0.5.
        assert_eq!(y.int_repr().unwrap(), vec![6, 2]);
    }

    #[rstest]
    #[case::groups([1, 1], [0, 0], [1, 1], 2, [1, 2, 3, 3])]
    #[case::stride([2, 2], [0, 0], [1, 1], 1, [1, 2, 2, 2])]
    #[case::dilation([1, 1], [0, 0], [2, 2], 1, [1, 2, 1, 1])]
    #[case::padding([1, 1], [1, 2], [1, 1], 1, [1, 2, 5, 7])]
    fn output_shape_follows_options(
        #[case] stride: [usize; 2],
        #[case] padding: [usize; 2],
        #[case] dilation: [usize; 2],
        #[case] groups: usize,
        #[case] expected: [usize; 4],
    ) {
        let params = quint8(0.1, 0);
        let x = TensorData::quantized(vec![1; 2 * 25], [1, 2, 5, 5], params).unwrap();
        let weight =
            TensorData::quantized(vec![1; 2 * (2 / groups) * 9], [2, 2 / groups, 3, 3], params)
                .unwrap();
        let packed =
            quantized_conv2d_prepack(&weight, None, stride, padding, dilation, groups).unwrap();

        let y = quantized_conv2d(&x, &packed, 0.1, 0).unwrap();
        assert_eq!(y.shape(), &Shape::new(expected));
    }

    #[test]
    fn groups_only_see_their_channels() {
        let params = quint8(1.0, 0);
        // Channel 0 holds ones, channel 1 holds twos.
        let x = TensorData::quantized(vec![1, 1, 1, 1, 2, 2, 2, 2], [1, 2, 2, 2], params).unwrap();
        let weight = TensorData::quantized(vec![1; 8], [2, 1, 2, 2], params).unwrap();
        let packed = quantized_conv2d_prepack(&weight, None, [1, 1], [0, 0], [1, 1], 2).unwrap();

        let y = quantized_conv2d(&x, &packed, 1.0, 0).unwrap();
        assert_eq!(y.int_repr().unwrap(), vec![4, 8]);
    }

    #[test]
    fn mismatched_channels_are_rejected() {
        let params = quint8(0.1, 0);
        let x = TensorData::quantized(vec![1; 12], [1, 3, 2, 2], params).unwrap();
        let weight = TensorData::quantized(vec![1; 8], [2, 2, 2, 1], params).unwrap();
        let packed = quantized_conv2d_prepack(&weight, None, [1, 1], [0, 0], [1, 1], 1).unwrap();

        assert!(matches!(
            quantized_conv2d(&x, &packed, 0.1, 0),
            Err(ValidationError::InvalidShape { .. })
        ));
    }
}
