#![warn(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg))]

//! # QFuse NdArray
//!
//! Reference quantized kernels computed eagerly on whole tensors with
//! [ndarray]. They apply the same scalar rules as the compiled kernels and
//! serve as the oracle compiled results are compared against.

mod ops;
mod tensor;

pub use ops::*;
