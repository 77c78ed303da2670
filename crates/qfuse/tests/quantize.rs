mod common;

use qfuse::ir::{Graph, GraphBuilder};
use qfuse::reference;
use qfuse::tensor::quantization::{QuantDType, QuantParams, RoundingMode};
use qfuse::tensor::{TensorData, Tolerance};
use qfuse::{CompileOptions, compile};
use rstest::rstest;

fn quant_dequant(shape: [usize; 2], scale: f64, zero_point: i64, dtype: QuantDType) -> Graph {
    let mut builder = GraphBuilder::new();
    let x = builder.input(shape);
    let q = builder.quantize(x, scale, zero_point, dtype).unwrap();
    let y = builder.dequantize(q).unwrap();
    builder.output(y).unwrap();
    builder.build().unwrap()
}

#[rstest]
#[case::quint8(0.1, 130, QuantDType::QUInt8)]
#[case::qint8(0.1, 13, QuantDType::QInt8)]
fn quantize_dequantize_matches_reference(
    #[case] scale: f64,
    #[case] zero_point: i64,
    #[case] dtype: QuantDType,
) {
    let graph = quant_dequant([2, 2], scale, zero_point, dtype);
    let kernel = compile(&graph, &CompileOptions::default()).unwrap();
    let x = common::random([2, 2], 0);

    let outputs = kernel.run(&[(&x).into()]).unwrap();

    let q = reference::quantize_per_tensor(&x, scale, zero_point, dtype).unwrap();
    let expected = reference::dequantize(&q).unwrap();
    outputs[0].assert_approx_eq(&expected, Tolerance::default());
}

#[test]
fn elementwise_chain_is_one_pair_of_loops() {
    let graph = quant_dequant([2, 2], 0.1, 130, QuantDType::QUInt8);
    let kernel = compile(&graph, &CompileOptions::default()).unwrap();
    let program = kernel.loop_nest();
    let dump = program.to_string();

    assert_eq!(common::count_loops(&dump), 2, "{dump}");
    assert_eq!(program.num_loop_nests(), 1);
    assert_eq!(program.max_depth(), 2);
    assert!(dump.contains("for (int64_t"), "{dump}");
    assert!(dump.contains("\n  for (int64_t"), "inner loop is nested:\n{dump}");
}

#[test]
fn quantized_output_matches_reference_integers() {
    let mut builder = GraphBuilder::new();
    let x = builder.input([3, 5]);
    let q = builder.quantize(x, 0.02, 3, QuantDType::QInt8).unwrap();
    builder.output(q).unwrap();
    let kernel = compile(&builder.build().unwrap(), &CompileOptions::default()).unwrap();
    let x = common::random([3, 5], 1);

    let outputs = kernel.run(&[(&x).into()]).unwrap();

    let expected = reference::quantize_per_tensor(&x, 0.02, 3, QuantDType::QInt8).unwrap();
    assert_eq!(outputs[0].dtype(), expected.dtype());
    assert_eq!(outputs[0].int_repr(), expected.int_repr());
}

#[rstest]
fn round_trip_error_is_below_scale(
    #[values(0.05, 0.1, 0.3)] scale: f64,
    #[values(0, 13, -20)] zero_point: i64,
    #[values(0, 1, 2)] seed: u64,
) {
    let graph = {
        let mut builder = GraphBuilder::new();
        let x = builder.input([3, 4, 5]);
        let q = builder.quantize(x, scale, zero_point, QuantDType::QInt8).unwrap();
        let y = builder.dequantize(q).unwrap();
        builder.output(y).unwrap();
        builder.build().unwrap()
    };
    let kernel = compile(&graph, &CompileOptions::default()).unwrap();
    let x = common::random([3, 4, 5], seed);

    let outputs = kernel.run(&[(&x).into()]).unwrap();

    // [-4, 4) stays within the int8 range for these parameters.
    let diff = outputs[0].max_abs_diff(&x).unwrap();
    assert!(diff < scale, "error {diff} for scale {scale}");
    assert_eq!(kernel.loop_nest().max_depth(), 3);
}

#[rstest]
#[case::half_to_even(RoundingMode::HalfToEven, vec![0, 0, 2, -2])]
#[case::half_away_from_zero(RoundingMode::HalfAwayFromZero, vec![1, -1, 2, -2])]
fn rounding_mode_is_configurable(#[case] rounding: RoundingMode, #[case] expected: Vec<i64>) {
    let mut builder = GraphBuilder::new();
    let x = builder.input([4]);
    let q = builder.quantize(x, 0.5, 0, QuantDType::QInt8).unwrap();
    builder.output(q).unwrap();
    let options = CompileOptions::default().with_rounding(rounding);
    let kernel = compile(&builder.build().unwrap(), &options).unwrap();
    let x = TensorData::new(vec![0.25, -0.25, 0.75, -0.75], [4]);

    let outputs = kernel.run(&[(&x).into()]).unwrap();

    assert_eq!(outputs[0].int_repr().unwrap(), expected);
}

#[test]
fn quantized_inputs_are_dequantized() {
    let params = QuantParams::new(0.25, 128, QuantDType::QUInt8).unwrap();
    let mut builder = GraphBuilder::new();
    let x = builder.quantized_input([2, 3], params);
    let y = builder.dequantize(x).unwrap();
    builder.output(y).unwrap();
    let kernel = compile(&builder.build().unwrap(), &CompileOptions::default()).unwrap();
    let x = TensorData::quantized(vec![0, 64, 128, 129, 200, 255], [2, 3], params).unwrap();

    let outputs = kernel.run(&[(&x).into()]).unwrap();

    outputs[0].assert_approx_eq(&reference::dequantize(&x).unwrap(), Tolerance::default());
    assert_eq!(
        outputs[0].to_f32_vec(),
        vec![-32.0, -16.0, 0.0, 0.25, 18.0, 31.75]
    );
}
