use super::{QuantParams, RoundingMode};

// The scalar rules below are the single definition of the affine arithmetic. The
// code generator emits the same operation sequence, so compiled kernels agree
// with the reference kernels bit for bit.

/// Quantize a real value: `clamp(round(real / scale) + zero_point, a, b)`.
///
/// Rounds half to even and saturates to the range of the storage type.
pub fn quantize(real: f64, params: &QuantParams) -> i64 {
    quantize_with(real, params, RoundingMode::HalfToEven)
}

/// Quantize a real value with an explicit [rounding mode](RoundingMode).
pub fn quantize_with(real: f64, params: &QuantParams, rounding: RoundingMode) -> i64 {
    let (a, b) = params.range();
    let shifted = rounding.round(real / params.scale) + params.zero_point as f64;

    shifted.clamp(a as f64, b as f64) as i64
}

/// Dequantize a stored integer: `scale * (stored - zero_point)`.
pub fn dequantize(stored: i64, params: &QuantParams) -> f64 {
    (stored - params.zero_point as i64) as f64 * params.scale
}

/// Convert a stored integer from one set of parameters to another.
pub fn requantize(stored: i64, from: &QuantParams, to: &QuantParams) -> i64 {
    quantize(dequantize(stored, from), to)
}

/// Add two quantized values in the real domain and requantize the sum.
pub fn quantized_add(
    lhs: i64,
    lhs_params: &QuantParams,
    rhs: i64,
    rhs_params: &QuantParams,
    out: &QuantParams,
) -> i64 {
    quantize(
        dequantize(lhs, lhs_params) + dequantize(rhs, rhs_params),
        out,
    )
}

/// One term of a quantized convolution accumulator: `(x - zx) * (w - zw)`.
pub fn conv_term(
    input: i64,
    input_params: &QuantParams,
    weight: i64,
    weight_params: &QuantParams,
) -> i64 {
    (input - input_params.zero_point as i64) * (weight - weight_params.zero_point as i64)
}

/// Requantize an integer convolution accumulator.
///
/// The accumulator is scaled by `input_scale * weight_scale`, the bias is added
/// in the real domain and `relu` clamps the result at zero before quantization.
pub fn requantize_accumulator(
    acc: i64,
    acc_scale: f64,
    bias: Option<f64>,
    relu: bool,
    out: &QuantParams,
) -> i64 {
    let mut real = acc as f64 * acc_scale;
    if let Some(bias) = bias {
        real = real + bias;
    }
    if relu {
        real = real.max(0.0);
    }

    quantize(real, out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::quantization::QuantDType;
    use rand::{Rng, SeedableRng, rngs::StdRng};

    fn params(scale: f64, zero_point: i64, dtype: QuantDType) -> QuantParams {
        QuantParams::new(scale, zero_point, dtype).unwrap()
    }

    #[test]
    fn quantize_rounds_half_to_even() {
        let p = params(0.5, 0, QuantDType::QInt8);

        assert_eq!(quantize(0.25, &p), 0);
        assert_eq!(quantize(0.75, &p), 2);
        assert_eq!(quantize(-0.25, &p), 0);
        assert_eq!(quantize(-0.75, &p), -2);
        assert_eq!(quantize_with(0.25, &p, RoundingMode::HalfAwayFromZero), 1);
    }

    #[test]
    fn quantize_shifts_by_zero_point() {
        let p = params(0.1, 130, QuantDType::QUInt8);
        assert_eq!(quantize(0.0, &p), 130);
        assert_eq!(quantize(1.0, &p), 140);
        assert_eq!(quantize(-1.0, &p), 120);
    }

    #[test]
    fn quantize_saturates() {
        let int8 = params(0.1, 13, QuantDType::QInt8);
        assert_eq!(quantize(1000.0, &int8), 127);
        assert_eq!(quantize(-1000.0, &int8), -128);

        let uint8 = params(0.1, 130, QuantDType::QUInt8);
        assert_eq!(quantize(-1000.0, &uint8), 0);
        assert_eq!(quantize(f64::INFINITY, &uint8), 255);
    }

    #[test]
    fn dequantize_is_affine() {
        let p = params(0.5, 10, QuantDType::QUInt8);
        assert_eq!(dequantize(10, &p), 0.0);
        assert_eq!(dequantize(14, &p), 2.0);
        assert_eq!(dequantize(4, &p), -3.0);
    }

    #[test]
    fn round_trip_error_is_below_scale() {
        let mut rng = StdRng::seed_from_u64(0);
        let cases = [
            params(0.1, 130, QuantDType::QUInt8),
            params(0.1, 13, QuantDType::QInt8),
            params(0.02, -20, QuantDType::QInt8),
        ];

        for p in cases.iter() {
            let (a, b) = p.range();
            let low = dequantize(a, p);
            let high = dequantize(b, p);

            for _ in 0..1000 {
                let x: f64 = rng.random_range(low..high);
                let error = (dequantize(quantize(x, p), p) - x).abs();
                assert!(error < p.scale, "error {error} for {x} with {p:?}");
            }
        }
    }

    #[test]
    fn requantize_changes_parameters() {
        let from = params(0.1, 0, QuantDType::QInt8);
        let to = params(0.2, 100, QuantDType::QUInt8);
        // 0.1 * 40 = 4.0 -> 4.0 / 0.2 + 100
        assert_eq!(requantize(40, &from, &to), 120);
    }

    #[test]
    fn quantized_add_with_distinct_params() {
        let a = params(0.1, 130, QuantDType::QUInt8);
        let b = params(0.2, 140, QuantDType::QUInt8);
        let out = params(0.3, 150, QuantDType::QUInt8);

        // 0.1 * 6 + 0.2 * 3 = 1.2 -> 1.2 / 0.3 = 4
        assert_eq!(quantized_add(136, &a, 143, &b, &out), 154);
    }

    #[test]
    fn quantized_add_saturates() {
        let p = params(0.1, 13, QuantDType::QInt8);
        assert_eq!(quantized_add(127, &p, 127, &p, &p), 127);
    }

    #[test]
    fn conv_accumulator() {
        let x = params(0.5, 2, QuantDType::QUInt8);
        let w = params(0.25, -1, QuantDType::QInt8);
        let out = params(0.5, 0, QuantDType::QInt8);

        // (4 - 2) * (3 + 1) + (0 - 2) * (1 + 1) = 8 - 4 = 4
        let acc = conv_term(4, &x, 3, &w) + conv_term(0, &x, 1, &w);
        assert_eq!(acc, 4);

        let acc_scale = x.scale * w.scale;
        // 4 * 0.125 = 0.5 -> 1
        assert_eq!(requantize_accumulator(acc, acc_scale, None, false, &out), 1);
        // 0.5 + 1.5 = 2.0 -> 4
        assert_eq!(requantize_accumulator(acc, acc_scale, Some(1.5), false, &out), 4);
        // -0.5 - 1.0 clamped at zero
        assert_eq!(requantize_accumulator(-acc, acc_scale, Some(-1.0), true, &out), 0);
        assert_eq!(requantize_accumulator(-acc, acc_scale, Some(-1.0), false, &out), -3);
    }
}
