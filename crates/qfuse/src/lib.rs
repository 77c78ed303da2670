#![warn(missing_docs)]

//! # QFuse
//!
//! A compiler lowering graphs of per-tensor affine quantized operators
//! (quantize, dequantize, add, convolution with prepacked weights and fused
//! ReLU) into a single fused loop-nest program.
//!
//! ```rust
//! use qfuse::ir::GraphBuilder;
//! use qfuse::tensor::{TensorData, quantization::QuantDType};
//! use qfuse::{CompileOptions, compile};
//!
//! let mut builder = GraphBuilder::new();
//! let x = builder.input([2, 2]);
//! let q = builder.quantize(x, 0.1, 130, QuantDType::QUInt8).unwrap();
//! let y = builder.dequantize(q).unwrap();
//! builder.output(y).unwrap();
//!
//! let kernel = compile(&builder.build().unwrap(), &CompileOptions::default()).unwrap();
//! let x = TensorData::new(vec![0.0, 0.1, 0.2, 0.3], [2, 2]);
//! let outputs = kernel.run(&[(&x).into()]).unwrap();
//!
//! assert_eq!(kernel.loop_nest().max_depth(), 2);
//! assert_eq!(outputs[0].shape(), x.shape());
//! ```

pub use qfuse_codegen::*;

/// Operator graph representation.
pub mod ir {
    pub use qfuse_ir::*;
}

/// Tensor data and quantization arithmetic.
pub mod tensor {
    pub use qfuse_tensor::*;
}

/// Eager reference kernels.
#[cfg(feature = "reference")]
pub mod reference {
    pub use qfuse_ndarray::*;
}
