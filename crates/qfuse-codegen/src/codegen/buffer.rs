use core::fmt;

use qfuse_tensor::{DType, Shape};
use serde::{Deserialize, Serialize};

use super::Elem;

/// Where the content of a buffer comes from when the kernel runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum BufferSource {
    /// A bound tensor argument.
    Input {
        /// Position of the argument.
        position: usize,
    },
    /// The weights of a bound packed convolution argument.
    PackedWeight {
        /// Position of the argument.
        position: usize,
    },
    /// The bias of a bound packed convolution argument.
    PackedBias {
        /// Position of the argument.
        position: usize,
    },
    /// `[scale, zero_point]` of the weights of a bound packed convolution argument.
    PackedQParams {
        /// Position of the argument.
        position: usize,
    },
    /// A graph output, written by the kernel.
    Output {
        /// Position of the output.
        index: usize,
        /// Element type of the produced tensor.
        dtype: DType,
    },
}

/// A buffer read or written by the kernel.
#[derive(new, Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BufferDecl {
    /// Type of the values once loaded.
    pub elem: Elem,
    /// Logical shape.
    pub shape: Shape,
    /// Strides used to compute offsets.
    pub strides: Vec<usize>,
    /// Origin of the content.
    pub source: BufferSource,
}

impl fmt::Display for BufferDecl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let source = match &self.source {
            BufferSource::Input { position } => format!("input {position}"),
            BufferSource::PackedWeight { position } => format!("input {position}, packed weight"),
            BufferSource::PackedBias { position } => format!("input {position}, packed bias"),
            BufferSource::PackedQParams { position } => {
                format!("input {position}, packed weight qparams")
            }
            BufferSource::Output { index, dtype } => format!("output {index}, {dtype}"),
        };
        write!(
            f,
            "{} {:?} strides={:?} ({source})",
            self.elem, self.shape.dims, self.strides
        )
    }
}
