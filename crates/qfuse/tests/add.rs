mod common;

use qfuse::ir::{GraphBuilder, GraphError};
use qfuse::reference;
use qfuse::tensor::Tolerance;
use qfuse::tensor::quantization::QuantDType;
use qfuse::{CompileOptions, compile};
use rstest::rstest;

#[rstest]
#[case::same_params((0.1, 13), (0.1, 13), (0.1, 13), QuantDType::QInt8)]
#[case::distinct_params((0.1, 130), (0.2, 140), (0.3, 150), QuantDType::QUInt8)]
fn quantized_add_matches_reference(
    #[case] lhs_params: (f64, i64),
    #[case] rhs_params: (f64, i64),
    #[case] out_params: (f64, i64),
    #[case] dtype: QuantDType,
) {
    let mut builder = GraphBuilder::new();
    let x1 = builder.input([2, 2]);
    let x2 = builder.input([2, 2]);
    let q1 = builder.quantize(x1, lhs_params.0, lhs_params.1, dtype).unwrap();
    let q2 = builder.quantize(x2, rhs_params.0, rhs_params.1, dtype).unwrap();
    let sum = builder
        .quantized_add(q1, q2, out_params.0, out_params.1)
        .unwrap();
    let y = builder.dequantize(sum).unwrap();
    builder.output(y).unwrap();
    let kernel = compile(&builder.build().unwrap(), &CompileOptions::default()).unwrap();
    let x1 = common::random([2, 2], 4);
    let x2 = common::random([2, 2], 5);

    let outputs = kernel.run(&[(&x1).into(), (&x2).into()]).unwrap();

    let q1 = reference::quantize_per_tensor(&x1, lhs_params.0, lhs_params.1, dtype).unwrap();
    let q2 = reference::quantize_per_tensor(&x2, rhs_params.0, rhs_params.1, dtype).unwrap();
    let sum = reference::quantized_add(&q1, &q2, out_params.0, out_params.1).unwrap();
    let expected = reference::dequantize(&sum).unwrap();
    outputs[0].assert_approx_eq(&expected, Tolerance::default());
    assert_eq!(kernel.loop_nest().num_loop_nests(), 1);
    assert_eq!(kernel.loop_nest().max_depth(), 2);
}

#[test]
fn shared_operand_is_added_to_itself() {
    let mut builder = GraphBuilder::new();
    let x = builder.input([3, 4]);
    let q = builder.quantize(x, 0.1, 13, QuantDType::QInt8).unwrap();
    let sum = builder.quantized_add(q, q, 0.2, 0).unwrap();
    builder.output(sum).unwrap();
    let kernel = compile(&builder.build().unwrap(), &CompileOptions::default()).unwrap();
    let x = common::random([3, 4], 6);

    let outputs = kernel.run(&[(&x).into()]).unwrap();

    let q = reference::quantize_per_tensor(&x, 0.1, 13, QuantDType::QInt8).unwrap();
    let expected = reference::quantized_add(&q, &q, 0.2, 0).unwrap();
    assert_eq!(outputs[0].dtype(), expected.dtype());
    assert_eq!(outputs[0].int_repr(), expected.int_repr());
    assert_eq!(kernel.loop_nest().num_loop_nests(), 1);
}

#[test]
fn add_of_adds_fuses_into_one_nest() {
    let mut builder = GraphBuilder::new();
    let x = builder.input([2, 3]);
    let q = builder.quantize(x, 0.05, 128, QuantDType::QUInt8).unwrap();
    let a = builder.quantized_add(q, q, 0.1, 128).unwrap();
    let b = builder.quantized_add(a, q, 0.15, 128).unwrap();
    let y = builder.dequantize(b).unwrap();
    builder.output(y).unwrap();
    let kernel = compile(&builder.build().unwrap(), &CompileOptions::default()).unwrap();
    let x = common::random([2, 3], 7);

    let outputs = kernel.run(&[(&x).into()]).unwrap();

    let q = reference::quantize_per_tensor(&x, 0.05, 128, QuantDType::QUInt8).unwrap();
    let a = reference::quantized_add(&q, &q, 0.1, 128).unwrap();
    let b = reference::quantized_add(&a, &q, 0.15, 128).unwrap();
    let expected = reference::dequantize(&b).unwrap();
    outputs[0].assert_approx_eq(&expected, Tolerance::default());
    assert_eq!(common::count_loops(&kernel.loop_nest().to_string()), 2);
}

#[test]
fn operands_of_different_shapes_are_rejected() {
    let mut builder = GraphBuilder::new();
    let x1 = builder.input([2, 2]);
    let x2 = builder.input([2, 3]);
    let q1 = builder.quantize(x1, 0.1, 0, QuantDType::QInt8).unwrap();
    let q2 = builder.quantize(x2, 0.1, 0, QuantDType::QInt8).unwrap();

    let error = builder.quantized_add(q1, q2, 0.1, 0).unwrap_err();

    assert!(
        matches!(error, GraphError::CannotInfer { op: "quantized add", .. }),
        "{error:?}"
    );
}
