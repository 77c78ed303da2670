use qfuse_ir::{GraphError, NodeId};
use qfuse_tensor::{Shape, ValidationError};

/// Error raised while compiling a graph.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum CompileError {
    /// The node type isn't handled by the compiler.
    #[error("Unsupported operator {name} at node {node}")]
    UnsupportedOperator {
        /// The rejected node.
        node: NodeId,
        /// Name of the operator.
        name: String,
    },
    /// The declared output shape of a node disagrees with the inferred one.
    #[error("Node {node} declares shape {declared}, but computes shape {inferred}")]
    ShapeMismatch {
        /// The rejected node.
        node: NodeId,
        /// Shape declared in the graph.
        declared: Shape,
        /// Shape inferred from the operands.
        inferred: Shape,
    },
    /// The operands of a node don't have the kind or layout the operation needs.
    #[error("Invalid operands for node {node}: {reason}")]
    TypeMismatch {
        /// The rejected node.
        node: NodeId,
        /// What was wrong.
        reason: String,
    },
    /// A required producer is absent, e.g. the prepacked weights of a convolution.
    #[error("Missing dependency for node {node}: {reason}")]
    MissingDependency {
        /// The rejected node.
        node: NodeId,
        /// What was missing.
        reason: String,
    },
    /// Invalid quantization parameters or convolution attributes.
    #[error(transparent)]
    InputValidation(#[from] ValidationError),
    /// The graph structure is invalid.
    #[error(transparent)]
    Graph(#[from] GraphError),
}

/// Error raised while running a compiled kernel.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum ExecutionError {
    /// Wrong number of bound inputs.
    #[error("Expected {expected} inputs, got {actual}")]
    InputArityMismatch {
        /// Number of graph inputs.
        expected: usize,
        /// Number of bound arguments.
        actual: usize,
    },
    /// A bound input doesn't have the declared shape.
    #[error("Input {position} has shape {actual}, expected {expected}")]
    InputShapeMismatch {
        /// Position of the input.
        position: usize,
        /// Declared shape.
        expected: Shape,
        /// Shape of the bound argument.
        actual: Shape,
    },
    /// A bound input doesn't have the declared strides.
    #[error("Input {position} has strides {actual:?}, expected {expected:?}")]
    InputLayoutMismatch {
        /// Position of the input.
        position: usize,
        /// Declared strides.
        expected: Vec<usize>,
        /// Strides of the bound argument.
        actual: Vec<usize>,
    },
    /// A bound input doesn't have the declared type.
    #[error("Input {position} is {actual}, expected {expected}")]
    InputTypeMismatch {
        /// Position of the input.
        position: usize,
        /// Declared type.
        expected: String,
        /// Type of the bound argument.
        actual: String,
    },
    /// Invalid tensor data.
    #[error(transparent)]
    InputValidation(#[from] ValidationError),
}
