use core::fmt;

use qfuse_tensor::{Conv2dOptions, Shape};
use serde::{Deserialize, Serialize};

use crate::OperationIr;

/// Stable identifier of a node in the graph arena.
#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(pub usize);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "%{}", self.0)
    }
}

/// An input edge: the producing node and the index of the consumed output.
#[derive(new, Clone, Copy, Debug, Hash, PartialEq, Eq, Serialize, Deserialize)]
pub struct Edge {
    /// The producer.
    pub node: NodeId,
    /// Output index of the producer.
    pub output: usize,
}

/// Declared layout of a tensor value.
#[derive(new, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TensorIr {
    /// The declared shape.
    pub shape: Shape,
    /// The declared strides, one per dimension.
    pub strides: Vec<usize>,
}

impl TensorIr {
    /// Row-major contiguous layout.
    pub fn contiguous<S: Into<Shape>>(shape: S) -> Self {
        let shape = shape.into();
        Self {
            strides: shape.contiguous_strides(),
            shape,
        }
    }
}

/// Declared type of packed convolution weights.
#[derive(new, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PackedConv2dIr {
    /// Shape of the packed weights, `[channels_out, channels_in / groups, kernel_height, kernel_width]`.
    pub weight_shape: Shape,
    /// Whether the packed weights carry a bias.
    pub has_bias: bool,
    /// The convolution attributes.
    pub options: Conv2dOptions,
}

/// Declared type of a node output.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ValueIr {
    /// A tensor.
    Tensor(TensorIr),
    /// Prepacked convolution weights.
    PackedConv2d(PackedConv2dIr),
}

impl ValueIr {
    /// The tensor layout, if the value is a tensor.
    pub fn as_tensor(&self) -> Option<&TensorIr> {
        match self {
            ValueIr::Tensor(tensor) => Some(tensor),
            ValueIr::PackedConv2d(_) => None,
        }
    }
}

/// A node of the graph.
#[derive(new, Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NodeIr {
    /// The operation computed by the node.
    pub op: OperationIr,
    /// The declared output type.
    pub out: ValueIr,
}

/// A directed acyclic graph of operations.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Graph {
    pub(crate) nodes: Vec<NodeIr>,
    pub(crate) inputs: Vec<NodeId>,
    pub(crate) outputs: Vec<Edge>,
}

impl Graph {
    /// Get a node by id.
    pub fn node(&self, id: NodeId) -> Option<&NodeIr> {
        self.nodes.get(id.0)
    }

    /// All nodes in insertion (topological) order.
    pub fn nodes(&self) -> &[NodeIr] {
        &self.nodes
    }

    /// The graph inputs in position order.
    pub fn inputs(&self) -> &[NodeId] {
        &self.inputs
    }

    /// The designated outputs in declaration order.
    pub fn outputs(&self) -> &[Edge] {
        &self.outputs
    }

    /// Number of nodes.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Whether the graph has no nodes.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

impl fmt::Display for Graph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "graph(")?;
        for id in self.inputs.iter() {
            match self.nodes.get(id.0) {
                Some(node) => writeln!(f, "  {id} : {}", DisplayValue(&node.out))?,
                None => writeln!(f, "  {id} : <missing>")?,
            }
        }
        writeln!(f, "):")?;
        for (i, node) in self.nodes.iter().enumerate() {
            if matches!(node.op, OperationIr::Input(_) | OperationIr::PackedInput(_)) {
                continue;
            }
            write!(f, "  {} : {} = {}(", NodeId(i), DisplayValue(&node.out), node.op.name())?;
            for (j, edge) in node.op.inputs().iter().enumerate() {
                if j > 0 {
                    f.write_str(", ")?;
                }
                write!(f, "{}", edge.node)?;
            }
            writeln!(f, ")")?;
        }
        f.write_str("  return (")?;
        for (i, edge) in self.outputs.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{}", edge.node)?;
        }
        f.write_str(")")
    }
}

struct DisplayValue<'a>(&'a ValueIr);

impl fmt::Display for DisplayValue<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            ValueIr::Tensor(tensor) => {
                write!(f, "Tensor{}", tensor.shape)?;
                if tensor.strides != tensor.shape.contiguous_strides() {
                    write!(f, "(strides={:?})", tensor.strides)?;
                }
                Ok(())
            }
            ValueIr::PackedConv2d(packed) => write!(f, "PackedConv2d{}", packed.weight_shape),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::GraphBuilder;

    #[test]
    fn display_survives_dangling_inputs() {
        let mut builder = GraphBuilder::new();
        let x = builder.input([2]);
        builder.output(x).unwrap();
        let mut json = serde_json::to_value(builder.build().unwrap()).unwrap();
        json["inputs"][0] = 7.into();
        let graph: Graph = serde_json::from_value(json).unwrap();

        let text = graph.to_string();

        assert!(text.contains("%7 : <missing>"), "{text}");
        assert!(text.ends_with("return (%0)"), "{text}");
    }
}
