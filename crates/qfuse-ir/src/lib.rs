#![warn(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg))]

//! # QFuse IR
//!
//! The operator graph consumed by the kernel compiler. Nodes live in an arena
//! and are addressed by stable integer ids; edges can only point to nodes that
//! already exist, so every graph is acyclic by construction.

#[macro_use]
extern crate derive_new;

mod builder;
mod error;
mod graph;
mod operation;

pub use builder::*;
pub use error::*;
pub use graph::*;
pub use operation::*;
