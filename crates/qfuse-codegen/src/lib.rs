#![warn(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg))]

//! # QFuse Codegen
//!
//! Lowers a quantized operator graph into a single fused loop-nest program:
//!
//! 1. The translator turns every node into a scalar [expression](codegen::Expr)
//!    indexed by per-dimension loop variables, embedding the operands'
//!    expressions by substitution.
//! 2. The synthesizer wraps the expressions of the graph outputs in one loop per
//!    output dimension, one [nest](codegen::Nest) per distinct iteration domain.
//! 3. The [kernel](CompiledKernel) binds tensors to the program and interprets it.

#[macro_use]
extern crate derive_new;

/// Expression and loop-nest representation.
pub mod codegen;

mod compile;
mod config;
mod error;
mod interpreter;
mod kernel;
mod synthesize;
mod translate;

pub use compile::*;
pub use config::*;
pub use error::*;
pub use kernel::*;
