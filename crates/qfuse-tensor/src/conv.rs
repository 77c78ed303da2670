use serde::{Deserialize, Serialize};

use crate::{Shape, ValidationError};

/// Attributes of a 2D convolution.
#[derive(new, Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Conv2dOptions {
    /// Stride (non-zero).
    pub stride: [usize; 2],

    /// Padding, added evenly to both sides of each spatial dimension.
    pub padding: [usize; 2],

    /// Dilation (non-zero).
    pub dilation: [usize; 2],

    /// Groups (non-zero).
    pub groups: usize,
}

impl Default for Conv2dOptions {
    fn default() -> Self {
        Self::new([1, 1], [0, 0], [1, 1], 1)
    }
}

impl Conv2dOptions {
    /// Build options from the integer lists of a serialized graph.
    pub fn from_lists(
        stride: &[i64],
        padding: &[i64],
        dilation: &[i64],
        groups: i64,
    ) -> Result<Self, ValidationError> {
        let pair = |name: &str, values: &[i64], min: i64| -> Result<[usize; 2], ValidationError> {
            match values {
                [a, b] if *a >= min && *b >= min => Ok([*a as usize, *b as usize]),
                _ => Err(ValidationError::InvalidConvOptions(format!(
                    "{name} must hold two values >= {min}, got {values:?}"
                ))),
            }
        };

        let options = Self::new(
            pair("stride", stride, 1)?,
            pair("padding", padding, 0)?,
            pair("dilation", dilation, 1)?,
            usize::try_from(groups).unwrap_or(0),
        );
        options.validate()?;

        Ok(options)
    }

    /// Check that stride, dilation and groups are non-zero.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.stride.contains(&0) || self.dilation.contains(&0) || self.groups == 0 {
            return Err(ValidationError::InvalidConvOptions(format!(
                "stride, dilation and groups must be non-zero, got {self:?}"
            )));
        }
        Ok(())
    }
}

/// Predict the output size of a 1D convolution operation.
///
/// ```text
/// out_size = floor( ((in_size + 2*padding - dilation*(kernel_size-1) - 1) / stride) + 1 )
/// ```
///
/// Returns `None` when the receptive field doesn't fit in the padded input.
pub fn calculate_conv_output_size(
    kernel_size: usize,
    stride: usize,
    padding: usize,
    dilation: usize,
    size_in: usize,
) -> Option<usize> {
    if kernel_size == 0 || stride == 0 || dilation == 0 {
        return None;
    }

    let effective_size = size_in + 2 * padding;
    let kernel_width = dilation * (kernel_size - 1) + 1;
    if effective_size < kernel_width {
        return None;
    }

    Some((effective_size - kernel_width) / stride + 1)
}

/// Infer the `[batch, channels_out, height_out, width_out]` shape of a 2D convolution.
pub fn conv2d_output_shape(
    input: &Shape,
    weight: &Shape,
    options: &Conv2dOptions,
) -> Result<Shape, ValidationError> {
    options.validate()?;
    let [batch_size, channels_in, height, width] = dims4(input, "conv2d input")?;
    let [channels_out, channels_per_group, kernel_height, kernel_width] =
        dims4(weight, "conv2d weight")?;

    if channels_out % options.groups != 0 || channels_per_group * options.groups != channels_in {
        return Err(ValidationError::InvalidShape {
            actual: weight.clone(),
            reason: format!(
                "weight doesn't match {channels_in} input channels with {} groups",
                options.groups
            ),
        });
    }

    let out = |kernel, dim: usize, size| {
        calculate_conv_output_size(
            kernel,
            options.stride[dim],
            options.padding[dim],
            options.dilation[dim],
            size,
        )
    };

    match (out(kernel_height, 0, height), out(kernel_width, 1, width)) {
        (Some(height_out), Some(width_out)) => Ok(Shape::new([
            batch_size,
            channels_out,
            height_out,
            width_out,
        ])),
        _ => Err(ValidationError::InvalidShape {
            actual: weight.clone(),
            reason: format!("empty receptive field over input {input}"),
        }),
    }
}

pub(crate) fn dims4(shape: &Shape, what: &str) -> Result<[usize; 4], ValidationError> {
    shape
        .dims
        .as_slice()
        .try_into()
        .map_err(|_| ValidationError::InvalidShape {
            actual: shape.clone(),
            reason: format!("{what} must have rank 4"),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(2, 1, 0, 1, 2, Some(1))]
    #[case(3, 1, 1, 1, 5, Some(5))]
    #[case(3, 2, 1, 1, 5, Some(3))]
    #[case(2, 1, 0, 2, 3, Some(1))]
    #[case(3, 1, 0, 1, 2, None)]
    #[case(0, 1, 0, 1, 2, None)]
    fn output_size(
        #[case] kernel: usize,
        #[case] stride: usize,
        #[case] padding: usize,
        #[case] dilation: usize,
        #[case] size_in: usize,
        #[case] expected: Option<usize>,
    ) {
        assert_eq!(
            calculate_conv_output_size(kernel, stride, padding, dilation, size_in),
            expected
        );
    }

    #[test]
    fn output_shape() {
        let shape = conv2d_output_shape(
            &Shape::new([1, 3, 2, 2]),
            &Shape::new([2, 3, 2, 2]),
            &Conv2dOptions::default(),
        )
        .unwrap();
        assert_eq!(shape, Shape::new([1, 2, 1, 1]));
    }

    #[test]
    fn output_shape_with_groups() {
        let options = Conv2dOptions::new([1, 1], [1, 1], [1, 1], 2);
        let shape =
            conv2d_output_shape(&Shape::new([2, 4, 3, 3]), &Shape::new([6, 2, 3, 3]), &options)
                .unwrap();
        assert_eq!(shape, Shape::new([2, 6, 3, 3]));

        let err = conv2d_output_shape(&Shape::new([2, 4, 3, 3]), &Shape::new([6, 4, 3, 3]), &options);
        assert!(err.is_err());
    }

    #[test]
    fn output_shape_rejects_rank() {
        let err = conv2d_output_shape(
            &Shape::new([3, 2, 2]),
            &Shape::new([2, 3, 2, 2]),
            &Conv2dOptions::default(),
        );
        assert!(matches!(err, Err(ValidationError::InvalidShape { .. })));
    }

    #[test]
    fn options_from_lists() {
        let options = Conv2dOptions::from_lists(&[1, 1], &[0, 0], &[1, 1], 1).unwrap();
        assert_eq!(options, Conv2dOptions::default());

        assert!(Conv2dOptions::from_lists(&[0, 1], &[0, 0], &[1, 1], 1).is_err());
        assert!(Conv2dOptions::from_lists(&[1, 1], &[-1, 0], &[1, 1], 1).is_err());
        assert!(Conv2dOptions::from_lists(&[1, 1, 1], &[0, 0], &[1, 1], 1).is_err());
        assert!(Conv2dOptions::from_lists(&[1, 1], &[0, 0], &[1, 1], 0).is_err());
    }
}
