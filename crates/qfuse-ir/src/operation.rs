use qfuse_tensor::quantization::QuantDType;
use qfuse_tensor::{Conv2dOptions, DType};
use serde::{Deserialize, Serialize};

use crate::Edge;

/// Describe all operations supported by the graph.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum OperationIr {
    /// Tensor graph input.
    Input(InputOpIr),
    /// Prepacked convolution weights provided as a graph input.
    PackedInput(PackedInputOpIr),
    /// Float to quantized.
    Quantize(QuantizeOpIr),
    /// Quantized to float.
    Dequantize(DequantizeOpIr),
    /// Quantized addition, requantized to the output parameters.
    QuantizedAdd(QuantizedAddOpIr),
    /// Pack convolution weights and an optional bias.
    Conv2dPrepack(Conv2dPrepackOpIr),
    /// Quantized 2D convolution.
    QuantizedConv2d(QuantizedConv2dOpIr),
    /// Quantized 2D convolution fused with a ReLU.
    QuantizedConv2dRelu(QuantizedConv2dOpIr),
    /// An operation the compiler doesn't know.
    Custom(CustomOpIr),
}

/// Graph input description.
#[derive(new, Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct InputOpIr {
    /// Position in the argument list of the compiled kernel.
    pub position: usize,
    /// Element type of the argument.
    pub dtype: DType,
}

/// Packed weights input description.
#[derive(new, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackedInputOpIr {
    /// Position in the argument list of the compiled kernel.
    pub position: usize,
}

/// Quantize operation description.
#[derive(new, Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct QuantizeOpIr {
    /// Float input.
    pub input: Edge,
    /// Output scale.
    pub scale: f64,
    /// Output zero-point.
    pub zero_point: i64,
    /// Output storage type.
    pub dtype: QuantDType,
}

/// Dequantize operation description.
#[derive(new, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DequantizeOpIr {
    /// Quantized input.
    pub input: Edge,
}

/// Quantized add operation description.
///
/// The output uses the storage type of the left operand.
#[derive(new, Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct QuantizedAddOpIr {
    /// Left operand.
    pub lhs: Edge,
    /// Right operand.
    pub rhs: Edge,
    /// Output scale.
    pub scale: f64,
    /// Output zero-point.
    pub zero_point: i64,
}

/// Weight prepack operation description.
#[derive(new, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conv2dPrepackOpIr {
    /// Quantized weights.
    pub weight: Edge,
    /// Optional float bias.
    pub bias: Option<Edge>,
    /// Convolution attributes.
    pub options: Conv2dOptions,
}

/// Quantized convolution operation description.
///
/// The output uses the storage type of the input.
#[derive(new, Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct QuantizedConv2dOpIr {
    /// Quantized input.
    pub input: Edge,
    /// Packed weights.
    pub packed: Edge,
    /// Output scale.
    pub scale: f64,
    /// Output zero-point.
    pub zero_point: i64,
}

/// Unknown operation description.
#[derive(new, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustomOpIr {
    /// Qualified name of the operation.
    pub name: String,
    /// Inputs.
    pub inputs: Vec<Edge>,
}

impl OperationIr {
    /// Name of the operation as it appears in serialized graphs.
    pub fn name(&self) -> &str {
        match self {
            OperationIr::Input(_) => "graph::input",
            OperationIr::PackedInput(_) => "graph::packed_input",
            OperationIr::Quantize(_) => "aten::quantize_per_tensor",
            OperationIr::Dequantize(_) => "aten::dequantize",
            OperationIr::QuantizedAdd(_) => "quantized::add",
            OperationIr::Conv2dPrepack(_) => "quantized::conv2d_prepack",
            OperationIr::QuantizedConv2d(_) => "quantized::conv2d",
            OperationIr::QuantizedConv2dRelu(_) => "quantized::conv2d_relu",
            OperationIr::Custom(op) => &op.name,
        }
    }

    /// The edges consumed by the operation.
    pub fn inputs(&self) -> Vec<Edge> {
        match self {
            OperationIr::Input(_) | OperationIr::PackedInput(_) => Vec::new(),
            OperationIr::Quantize(op) => vec![op.input],
            OperationIr::Dequantize(op) => vec![op.input],
            OperationIr::QuantizedAdd(op) => vec![op.lhs, op.rhs],
            OperationIr::Conv2dPrepack(op) => {
                let mut inputs = vec![op.weight];
                inputs.extend(op.bias);
                inputs
            }
            OperationIr::QuantizedConv2d(op) | OperationIr::QuantizedConv2dRelu(op) => {
                vec![op.input, op.packed]
            }
            OperationIr::Custom(op) => op.inputs.clone(),
        }
    }
}
