use qfuse_tensor::ValidationError;

use crate::{Edge, NodeId};

/// Error raised while building a graph.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum GraphError {
    /// An edge points to a node that doesn't exist (yet).
    #[error("Node {node} doesn't exist, the graph has {len} nodes")]
    UnknownNode {
        /// The referenced node.
        node: NodeId,
        /// Number of nodes in the graph.
        len: usize,
    },
    /// An edge selects an output the producer doesn't have.
    #[error("Node {} has a single output, edge selects output {}", .edge.node, .edge.output)]
    UnknownOutput {
        /// The invalid edge.
        edge: Edge,
    },
    /// An edge points to a node declared after its consumer.
    #[error("Node {node} consumes {} which isn't declared before it", .edge.node)]
    ForwardEdge {
        /// The consumer.
        node: NodeId,
        /// The offending edge.
        edge: Edge,
    },
    /// Graph inputs must be declared with consecutive positions.
    #[error("Expected graph input at position {expected}, got {actual}")]
    InputPosition {
        /// Next free position.
        expected: usize,
        /// Declared position.
        actual: usize,
    },
    /// A graph needs at least one output.
    #[error("The graph doesn't designate any output")]
    NoOutputs,
    /// The declared output type of a node can't be inferred from its operands.
    #[error("Can't infer the output of {op}: {reason}")]
    CannotInfer {
        /// Name of the operation.
        op: &'static str,
        /// Why inference failed.
        reason: String,
    },
    /// Invalid attribute values.
    #[error(transparent)]
    Validation(#[from] ValidationError),
}
