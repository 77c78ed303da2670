use qfuse_tensor::quantization::{QuantDType, QuantParams};
use qfuse_tensor::{Conv2dOptions, DType, Shape, conv2d_output_shape};

use crate::{
    Conv2dPrepackOpIr, CustomOpIr, DequantizeOpIr, Edge, Graph, GraphError, InputOpIr, NodeId,
    NodeIr, OperationIr, PackedConv2dIr, PackedInputOpIr, QuantizeOpIr, QuantizedAddOpIr,
    QuantizedConv2dOpIr, TensorIr, ValueIr,
};

/// Incrementally build a [graph](Graph).
///
/// Each operation returns the edge of its single output. The typed helpers
/// declare the output type from their operands; [push](GraphBuilder::push)
/// declares it explicitly.
#[derive(Debug, Default)]
pub struct GraphBuilder {
    nodes: Vec<NodeIr>,
    inputs: Vec<NodeId>,
    outputs: Vec<Edge>,
}

impl GraphBuilder {
    /// Create an empty builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a node with an explicitly declared output type.
    pub fn push(&mut self, op: OperationIr, out: ValueIr) -> Result<Edge, GraphError> {
        for edge in op.inputs() {
            self.check_edge(edge)?;
        }
        let id = NodeId(self.nodes.len());
        match &op {
            OperationIr::Input(InputOpIr { position, .. })
            | OperationIr::PackedInput(PackedInputOpIr { position }) => {
                if *position != self.inputs.len() {
                    return Err(GraphError::InputPosition {
                        expected: self.inputs.len(),
                        actual: *position,
                    });
                }
                self.inputs.push(id);
            }
            _ => {}
        }
        self.nodes.push(NodeIr::new(op, out));

        Ok(Edge::new(id, 0))
    }

    /// Declare a contiguous float input.
    pub fn input<S: Into<Shape>>(&mut self, shape: S) -> Edge {
        self.tensor_input(TensorIr::contiguous(shape), DType::F32)
    }

    /// Declare a contiguous quantized input.
    pub fn quantized_input<S: Into<Shape>>(&mut self, shape: S, params: QuantParams) -> Edge {
        self.tensor_input(TensorIr::contiguous(shape), DType::QFloat(params))
    }

    /// Declare an input with an explicit layout and element type.
    pub fn tensor_input(&mut self, tensor: TensorIr, dtype: DType) -> Edge {
        let position = self.inputs.len();
        self.append(
            OperationIr::Input(InputOpIr::new(position, dtype)),
            ValueIr::Tensor(tensor),
        )
    }

    /// Declare prepacked convolution weights as an input.
    pub fn packed_conv2d_input(&mut self, packed: PackedConv2dIr) -> Edge {
        let position = self.inputs.len();
        self.append(
            OperationIr::PackedInput(PackedInputOpIr::new(position)),
            ValueIr::PackedConv2d(packed),
        )
    }

    /// Quantize a float tensor.
    pub fn quantize(
        &mut self,
        input: Edge,
        scale: f64,
        zero_point: i64,
        dtype: QuantDType,
    ) -> Result<Edge, GraphError> {
        let out = self.tensor_of(input, "quantize")?.shape.clone();
        self.push(
            OperationIr::Quantize(QuantizeOpIr::new(input, scale, zero_point, dtype)),
            ValueIr::Tensor(TensorIr::contiguous(out)),
        )
    }

    /// Dequantize a quantized tensor.
    pub fn dequantize(&mut self, input: Edge) -> Result<Edge, GraphError> {
        let out = self.tensor_of(input, "dequantize")?.shape.clone();
        self.push(
            OperationIr::Dequantize(DequantizeOpIr::new(input)),
            ValueIr::Tensor(TensorIr::contiguous(out)),
        )
    }

    /// Add two quantized tensors of the same shape.
    pub fn quantized_add(
        &mut self,
        lhs: Edge,
        rhs: Edge,
        scale: f64,
        zero_point: i64,
    ) -> Result<Edge, GraphError> {
        let out = self.tensor_of(lhs, "quantized add")?.shape.clone();
        let rhs_shape = &self.tensor_of(rhs, "quantized add")?.shape;
        if rhs_shape != &out {
            return Err(GraphError::CannotInfer {
                op: "quantized add",
                reason: format!("operands have shapes {out} and {rhs_shape}"),
            });
        }
        self.push(
            OperationIr::QuantizedAdd(QuantizedAddOpIr::new(lhs, rhs, scale, zero_point)),
            ValueIr::Tensor(TensorIr::contiguous(out)),
        )
    }

    /// Pack quantized weights and an optional bias.
    pub fn conv2d_prepack(
        &mut self,
        weight: Edge,
        bias: Option<Edge>,
        options: Conv2dOptions,
    ) -> Result<Edge, GraphError> {
        options.validate()?;
        let weight_shape = self.tensor_of(weight, "conv2d prepack")?.shape.clone();
        if let Some(bias) = bias {
            self.tensor_of(bias, "conv2d prepack")?;
        }
        let out = PackedConv2dIr::new(weight_shape, bias.is_some(), options.clone());
        self.push(
            OperationIr::Conv2dPrepack(Conv2dPrepackOpIr::new(weight, bias, options)),
            ValueIr::PackedConv2d(out),
        )
    }

    /// Quantized convolution.
    pub fn quantized_conv2d(
        &mut self,
        input: Edge,
        packed: Edge,
        scale: f64,
        zero_point: i64,
    ) -> Result<Edge, GraphError> {
        let op = QuantizedConv2dOpIr::new(input, packed, scale, zero_point);
        let out = self.conv_output(&op)?;
        self.push(OperationIr::QuantizedConv2d(op), out)
    }

    /// Quantized convolution followed by a ReLU.
    pub fn quantized_conv2d_relu(
        &mut self,
        input: Edge,
        packed: Edge,
        scale: f64,
        zero_point: i64,
    ) -> Result<Edge, GraphError> {
        let op = QuantizedConv2dOpIr::new(input, packed, scale, zero_point);
        let out = self.conv_output(&op)?;
        self.push(OperationIr::QuantizedConv2dRelu(op), out)
    }

    /// Append an operation unknown to the compiler.
    pub fn custom(
        &mut self,
        name: impl Into<String>,
        inputs: Vec<Edge>,
        out: ValueIr,
    ) -> Result<Edge, GraphError> {
        self.push(OperationIr::Custom(CustomOpIr::new(name.into(), inputs)), out)
    }

    /// Designate an edge as a graph output.
    pub fn output(&mut self, edge: Edge) -> Result<(), GraphError> {
        self.check_edge(edge)?;
        self.outputs.push(edge);
        Ok(())
    }

    /// Finish the graph.
    pub fn build(self) -> Result<Graph, GraphError> {
        if self.outputs.is_empty() {
            return Err(GraphError::NoOutputs);
        }

        Ok(Graph {
            nodes: self.nodes,
            inputs: self.inputs,
            outputs: self.outputs,
        })
    }

    fn append(&mut self, op: OperationIr, out: ValueIr) -> Edge {
        let id = NodeId(self.nodes.len());
        if matches!(op, OperationIr::Input(_) | OperationIr::PackedInput(_)) {
            self.inputs.push(id);
        }
        self.nodes.push(NodeIr::new(op, out));
        Edge::new(id, 0)
    }

    fn check_edge(&self, edge: Edge) -> Result<(), GraphError> {
        if edge.node.0 >= self.nodes.len() {
            return Err(GraphError::UnknownNode {
                node: edge.node,
                len: self.nodes.len(),
            });
        }
        if edge.output != 0 {
            return Err(GraphError::UnknownOutput { edge });
        }
        Ok(())
    }

    fn value_of(&self, edge: Edge) -> Result<&ValueIr, GraphError> {
        self.check_edge(edge)?;
        Ok(&self.nodes[edge.node.0].out)
    }

    fn tensor_of(&self, edge: Edge, op: &'static str) -> Result<&TensorIr, GraphError> {
        match self.value_of(edge)? {
            ValueIr::Tensor(tensor) => Ok(tensor),
            ValueIr::PackedConv2d(_) => Err(GraphError::CannotInfer {
                op,
                reason: format!("{} is packed weights, expected a tensor", edge.node),
            }),
        }
    }

    fn conv_output(&self, op: &QuantizedConv2dOpIr) -> Result<ValueIr, GraphError> {
        let input = &self.tensor_of(op.input, "quantized conv2d")?.shape;
        let packed = match self.value_of(op.packed)? {
            ValueIr::PackedConv2d(packed) => packed,
            ValueIr::Tensor(_) => {
                return Err(GraphError::CannotInfer {
                    op: "quantized conv2d",
                    reason: format!("{} isn't packed weights", op.packed.node),
                });
            }
        };
        let out = conv2d_output_shape(input, &packed.weight_shape, &packed.options)?;

        Ok(ValueIr::Tensor(TensorIr::contiguous(out)))
    }
}
