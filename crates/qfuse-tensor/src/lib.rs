#![warn(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg))]

//! # QFuse Tensor
//!
//! Tensor data containers and the affine quantization arithmetic shared by the
//! kernel compiler and the reference kernels.

#[macro_use]
extern crate derive_new;

mod conv;
mod data;
mod distribution;
mod error;
mod shape;

/// Per-tensor affine quantization.
pub mod quantization;

pub use conv::*;
pub use data::*;
pub use distribution::*;
pub use error::*;
pub use shape::*;
