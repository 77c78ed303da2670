use core::fmt;

use log::trace;
use qfuse_tensor::quantization::PackedConv2d;
use qfuse_tensor::{DType, TensorData, TensorValues};

use crate::ExecutionError;
use crate::codegen::{BufferDecl, BufferId, BufferSource, LoopNest};
use crate::interpreter::{Interpreter, Storage};
use crate::translate::InputBinding;

/// An argument bound to a compiled kernel.
#[derive(Debug, Clone, Copy)]
pub enum KernelArg<'a> {
    /// A tensor.
    Tensor(&'a TensorData),
    /// Prepacked convolution weights.
    PackedConv2d(&'a PackedConv2d),
}

impl<'a> From<&'a TensorData> for KernelArg<'a> {
    fn from(value: &'a TensorData) -> Self {
        KernelArg::Tensor(value)
    }
}

impl<'a> From<&'a PackedConv2d> for KernelArg<'a> {
    fn from(value: &'a PackedConv2d) -> Self {
        KernelArg::PackedConv2d(value)
    }
}

impl KernelArg<'_> {
    fn kind(&self) -> String {
        match self {
            KernelArg::Tensor(tensor) => format!("a {} tensor", tensor.dtype()),
            KernelArg::PackedConv2d(_) => "packed conv2d weights".into(),
        }
    }
}

/// A graph lowered to a loop-nest program.
///
/// The kernel is immutable: it can run any number of times, from any number of
/// threads, each run writing fresh output buffers.
#[derive(Debug, Clone)]
pub struct CompiledKernel {
    pub(crate) inputs: Vec<InputBinding>,
    pub(crate) buffers: Vec<BufferDecl>,
    pub(crate) outputs: Vec<BufferId>,
    pub(crate) program: LoopNest,
    pub(crate) num_vars: usize,
    pub(crate) num_locals: usize,
}

impl CompiledKernel {
    /// Number of arguments expected by [run](Self::run).
    pub fn num_inputs(&self) -> usize {
        self.inputs.len()
    }

    /// Number of tensors returned by [run](Self::run).
    pub fn num_outputs(&self) -> usize {
        self.outputs.len()
    }

    /// The synthesized program.
    pub fn loop_nest(&self) -> &LoopNest {
        &self.program
    }

    /// The buffers read and written by the program.
    pub fn buffers(&self) -> &[BufferDecl] {
        &self.buffers
    }

    /// Execute the kernel and return the outputs in declaration order.
    pub fn run(&self, args: &[KernelArg<'_>]) -> Result<Vec<TensorData>, ExecutionError> {
        if args.len() != self.inputs.len() {
            return Err(ExecutionError::InputArityMismatch {
                expected: self.inputs.len(),
                actual: args.len(),
            });
        }
        for (position, (binding, arg)) in self.inputs.iter().zip(args).enumerate() {
            self.validate(position, binding, arg)?;
        }
        trace!("Running kernel with {} bound inputs", args.len());

        let storage = self
            .buffers
            .iter()
            .map(|decl| bind(decl, args))
            .collect();
        let mut storage = Interpreter::new(&self.buffers, storage, self.num_vars, self.num_locals)
            .run(&self.program);

        let mut outputs = Vec::with_capacity(self.outputs.len());
        for buffer in self.outputs.iter() {
            let decl = &self.buffers[buffer.0 as usize];
            let values = core::mem::replace(&mut storage[buffer.0 as usize], Storage::F64(Vec::new()));
            let tensor = match (values, &decl.source) {
                (
                    Storage::OutFloat(values),
                    BufferSource::Output {
                        dtype: DType::F32, ..
                    },
                ) => TensorData::new(values, decl.shape.clone()),
                (
                    Storage::OutInt(values),
                    BufferSource::Output {
                        dtype: DType::QFloat(params),
                        ..
                    },
                ) => TensorData::quantized(values, decl.shape.clone(), *params)?,
                (values, source) => unreachable!("Output {source:?} holds {values:?}"),
            };
            outputs.push(tensor);
        }

        Ok(outputs)
    }

    fn validate(
        &self,
        position: usize,
        binding: &InputBinding,
        arg: &KernelArg<'_>,
    ) -> Result<(), ExecutionError> {
        match (binding, arg) {
            (InputBinding::Tensor { buffer, dtype }, KernelArg::Tensor(tensor)) => {
                let decl = &self.buffers[buffer.0 as usize];
                if tensor.shape() != &decl.shape {
                    return Err(ExecutionError::InputShapeMismatch {
                        position,
                        expected: decl.shape.clone(),
                        actual: tensor.shape().clone(),
                    });
                }
                if tensor.dtype() != dtype {
                    return Err(ExecutionError::InputTypeMismatch {
                        position,
                        expected: format!("a {dtype} tensor"),
                        actual: arg.kind(),
                    });
                }
                if tensor.strides() != decl.strides.as_slice() {
                    return Err(ExecutionError::InputLayoutMismatch {
                        position,
                        expected: decl.strides.clone(),
                        actual: tensor.strides().to_vec(),
                    });
                }
                Ok(())
            }
            (InputBinding::PackedConv2d { decl }, KernelArg::PackedConv2d(packed)) => {
                if packed.weight_shape() != &decl.weight_shape {
                    return Err(ExecutionError::InputShapeMismatch {
                        position,
                        expected: decl.weight_shape.clone(),
                        actual: packed.weight_shape().clone(),
                    });
                }
                if packed.bias().is_some() != decl.has_bias || packed.options() != &decl.options {
                    let bias = |has_bias: bool| if has_bias { "with" } else { "without" };
                    return Err(ExecutionError::InputTypeMismatch {
                        position,
                        expected: format!(
                            "packed conv2d weights {} bias, {:?}",
                            bias(decl.has_bias),
                            decl.options
                        ),
                        actual: format!(
                            "packed conv2d weights {} bias, {:?}",
                            bias(packed.bias().is_some()),
                            packed.options()
                        ),
                    });
                }
                Ok(())
            }
            (InputBinding::Tensor { dtype, .. }, _) => Err(ExecutionError::InputTypeMismatch {
                position,
                expected: format!("a {dtype} tensor"),
                actual: arg.kind(),
            }),
            (InputBinding::PackedConv2d { .. }, _) => Err(ExecutionError::InputTypeMismatch {
                position,
                expected: "packed conv2d weights".into(),
                actual: arg.kind(),
            }),
        }
    }
}

/// Bind the content of a buffer, the arguments being validated.
fn bind<'a>(decl: &BufferDecl, args: &[KernelArg<'a>]) -> Storage<'a> {
    let packed = |position: usize| match args[position] {
        KernelArg::PackedConv2d(packed) => packed,
        KernelArg::Tensor(_) => unreachable!("Argument {position} is validated as packed weights"),
    };

    match &decl.source {
        BufferSource::Input { position } => match args[*position] {
            KernelArg::Tensor(tensor) => tensor_storage(tensor),
            KernelArg::PackedConv2d(_) => {
                unreachable!("Argument {position} is validated as a tensor")
            }
        },
        BufferSource::PackedWeight { position } => tensor_storage(packed(*position).weight()),
        BufferSource::PackedBias { position } => {
            Storage::F32(packed(*position).bias().unwrap_or_default())
        }
        BufferSource::PackedQParams { position } => {
            let params = packed(*position).weight_params();
            Storage::F64(vec![params.scale, params.zero_point as f64])
        }
        BufferSource::Output { dtype, .. } => {
            let len = decl.shape.num_elements();
            match dtype {
                DType::F32 => Storage::OutFloat(vec![0.0; len]),
                DType::QFloat(_) => Storage::OutInt(vec![0; len]),
            }
        }
    }
}

fn tensor_storage(tensor: &TensorData) -> Storage<'_> {
    match tensor.values() {
        TensorValues::F32(values) => Storage::F32(values),
        TensorValues::QInt8(values) => Storage::I8(values),
        TensorValues::QUInt8(values) => Storage::U8(values),
    }
}

impl fmt::Display for CompiledKernel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, buffer) in self.buffers.iter().enumerate() {
            writeln!(f, "// b{i}: {buffer}")?;
        }
        write!(f, "{}", self.program)
    }
}
