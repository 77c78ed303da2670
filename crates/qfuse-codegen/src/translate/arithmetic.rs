use qfuse_tensor::quantization::{QuantParams, RoundingMode};

use crate::codegen::{Elem, Expr};

// The sequences below mirror the scalar rules of `qfuse_tensor::quantization`
// one operation at a time.

/// `clamp(round(real / scale) + zero_point, a, b)` as an integer.
pub(crate) fn quantize(real: Expr, params: &QuantParams, rounding: RoundingMode) -> Expr {
    let (a, b) = params.range();
    let scaled = Expr::div(real, Expr::float(params.scale)).round(rounding);
    let shifted = Expr::add(scaled, Expr::float(params.zero_point as f64));

    shifted
        .clamp(Expr::float(a as f64), Expr::float(b as f64))
        .cast(Elem::Int)
}

/// `(stored - zero_point) * scale` as a float.
pub(crate) fn dequantize(stored: Expr, params: &QuantParams) -> Expr {
    let shifted = Expr::sub(stored, Expr::int(params.zero_point as i64));
    Expr::mul(shifted.cast(Elem::Float), Expr::float(params.scale))
}

/// Dequantize both operands, add them and requantize.
pub(crate) fn quantized_add(
    lhs: Expr,
    lhs_params: &QuantParams,
    rhs: Expr,
    rhs_params: &QuantParams,
    out: &QuantParams,
    rounding: RoundingMode,
) -> Expr {
    let real = Expr::add(dequantize(lhs, lhs_params), dequantize(rhs, rhs_params));
    quantize(real, out, rounding)
}
