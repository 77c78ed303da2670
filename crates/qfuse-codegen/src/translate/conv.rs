use std::rc::Rc;

use qfuse_ir::{Conv2dPrepackOpIr, NodeId, QuantizedConv2dOpIr};
use qfuse_tensor::quantization::QuantParams;
use qfuse_tensor::{Shape, conv2d_output_shape};

use super::arithmetic;
use super::base::{PackedDef, Translator, Value};
use crate::CompileError;
use crate::codegen::{Elem, Expr};

impl Translator<'_> {
    pub(crate) fn prepack(
        &mut self,
        node: NodeId,
        op: &Conv2dPrepackOpIr,
    ) -> Result<Rc<PackedDef>, CompileError> {
        op.options.validate()?;
        let (weight, weight_params) = self.quantized_operand(node, op.weight)?;
        let dims = &weight.shape.dims;
        if dims.len() != 4 || dims[0] % op.options.groups != 0 {
            return Err(CompileError::TypeMismatch {
                node,
                reason: format!(
                    "conv2d weights of shape {} can't be split in {} groups",
                    weight.shape, op.options.groups
                ),
            });
        }

        let bias = match op.bias {
            Some(edge) => {
                let bias = self.float_operand(node, edge)?;
                let expected = Shape::new([dims[0]]);
                if bias.shape != expected {
                    return Err(CompileError::TypeMismatch {
                        node,
                        reason: format!("bias must have shape {expected}, got {}", bias.shape),
                    });
                }
                Some(bias)
            }
            None => None,
        };

        Ok(Rc::new(PackedDef {
            weight,
            weight_scale: Expr::float(weight_params.scale),
            weight_zero_point: Expr::int(weight_params.zero_point as i64),
            bias,
            options: op.options.clone(),
        }))
    }

    /// Quantized convolution as a sum over input channels and the kernel window.
    ///
    /// Padded positions are skipped by a bounds check, they contribute zero to
    /// the accumulator.
    pub(crate) fn conv2d(
        &mut self,
        node: NodeId,
        op: &QuantizedConv2dOpIr,
        relu: bool,
    ) -> Result<Value, CompileError> {
        let (input, input_params) = self.quantized_operand(node, op.input)?;
        let packed = match self.operand(node, op.packed)? {
            Value::Packed(packed) => packed,
            other => {
                return Err(CompileError::MissingDependency {
                    node,
                    reason: format!(
                        "{} must provide prepacked conv2d weights, got {}",
                        op.packed.node,
                        other_kind(&other)
                    ),
                });
            }
        };
        let out = QuantParams::new(op.scale, op.zero_point, input_params.dtype)?;
        let options = &packed.options;
        let shape = conv2d_output_shape(&input.shape, &packed.weight.shape, options).map_err(
            |err| CompileError::TypeMismatch {
                node,
                reason: err.to_string(),
            },
        )?;

        let (height, width) = (input.shape.dims[2], input.shape.dims[3]);
        let weight_dims = &packed.weight.shape.dims;
        let (channels_out, channels_per_group) = (weight_dims[0], weight_dims[1]);
        let (kernel_height, kernel_width) = (weight_dims[2], weight_dims[3]);
        let out_channels_per_group = channels_out / options.groups;

        let vars = self.fresh_vars(4);
        let [batch, oc, oh, ow] = [vars[0], vars[1], vars[2], vars[3]].map(Expr::Var);
        let ic = self.fresh_var();
        let kh = self.fresh_var();
        let kw = self.fresh_var();

        let channel = if options.groups == 1 {
            Expr::Var(ic)
        } else {
            let group = Expr::div(oc.clone(), Expr::index(out_channels_per_group));
            Expr::add(
                Expr::mul(group, Expr::index(channels_per_group)),
                Expr::Var(ic),
            )
        };
        let position = |out: Expr, kernel: Expr, dim: usize| {
            Expr::sub(
                Expr::add(
                    Expr::mul(out, Expr::index(options.stride[dim])),
                    Expr::mul(kernel, Expr::index(options.dilation[dim])),
                ),
                Expr::index(options.padding[dim]),
            )
        };
        let ih = position(oh, Expr::Var(kh), 0);
        let iw = position(ow, Expr::Var(kw), 1);

        let x = input.at(&[batch, channel, ih.clone(), iw.clone()]);
        let w = packed
            .weight
            .at(&[oc.clone(), Expr::Var(ic), Expr::Var(kh), Expr::Var(kw)]);
        let mut term = Expr::mul(
            Expr::sub(x, Expr::int(input_params.zero_point as i64)),
            Expr::sub(w, packed.weight_zero_point.clone()),
        );

        let mut in_bounds = Vec::new();
        let bounds = [
            (&ih, height, options.padding[0]),
            (&iw, width, options.padding[1]),
        ];
        for (index, size, padding) in bounds {
            if padding > 0 {
                in_bounds.push(Expr::greater_equal(index.clone(), Expr::int(0)));
                in_bounds.push(Expr::lower(index.clone(), Expr::index(size)));
            }
        }
        if let Some(cond) = in_bounds.into_iter().reduce(Expr::and) {
            term = Expr::select(cond, term, Expr::int(0));
        }

        let acc = Expr::sum(
            vec![(ic, channels_per_group), (kh, kernel_height), (kw, kernel_width)],
            term,
        );
        let acc_scale = Expr::mul(
            Expr::float(input_params.scale),
            packed.weight_scale.clone(),
        );
        let mut real = Expr::mul(acc.cast(Elem::Float), acc_scale);
        if let Some(bias) = &packed.bias {
            real = Expr::add(real, bias.at(&[oc]));
        }
        if relu {
            real = Expr::max(real, Expr::float(0.0));
        }
        let body = arithmetic::quantize(real, &out, self.options().rounding);

        Ok(Value::Quantized(self.def(node, shape, vars, body), out))
    }
}

fn other_kind(value: &Value) -> &'static str {
    match value {
        Value::Float(_) => "a float tensor",
        Value::Quantized(..) => "a quantized tensor",
        Value::Packed(_) => "packed weights",
    }
}
