#![allow(dead_code)]

use qfuse::reference;
use qfuse::tensor::quantization::QuantDType;
use qfuse::tensor::{Distribution, Shape, TensorData};
use rand::SeedableRng;
use rand::rngs::StdRng;

/// Seeded float tensor with values in `[-4, 4)`.
pub fn random<S: Into<Shape>>(shape: S, seed: u64) -> TensorData {
    let mut rng = StdRng::seed_from_u64(seed);
    TensorData::random(shape, Distribution::Uniform(-4.0, 4.0), &mut rng).unwrap()
}

/// Seeded qint8 convolution weights.
pub fn weight<S: Into<Shape>>(shape: S, seed: u64) -> TensorData {
    reference::quantize_per_tensor(&random(shape, seed), 0.05, 0, QuantDType::QInt8).unwrap()
}

/// Number of loop headers in a loop-nest dump.
pub fn count_loops(dump: &str) -> usize {
    dump.lines()
        .filter(|line| line.trim_start().starts_with("for "))
        .count()
}
