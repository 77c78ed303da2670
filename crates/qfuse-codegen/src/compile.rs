use log::{debug, trace};
use qfuse_ir::{Graph, GraphError};
use qfuse_tensor::DType;

use crate::codegen::{BufferDecl, BufferSource, Elem};
use crate::synthesize::Synthesizer;
use crate::translate::{Translator, Value};
use crate::{CompileError, CompileOptions, CompiledKernel};

/// Lower a graph into a [compiled kernel](CompiledKernel).
///
/// Only the nodes reachable from the graph outputs are translated. Every graph
/// input is still bound by the kernel, in position order.
pub fn compile(graph: &Graph, options: &CompileOptions) -> Result<CompiledKernel, CompileError> {
    debug!(
        "Compiling a graph with {} nodes and {} outputs",
        graph.len(),
        graph.outputs().len()
    );
    if graph.outputs().is_empty() {
        return Err(GraphError::NoOutputs.into());
    }

    let mut translator = Translator::new(graph, options);
    let inputs = translator.declare_inputs()?;

    let values = translator.translate(graph.outputs())?;
    let mut outputs = Vec::with_capacity(values.len());
    for (index, (edge, value)) in graph.outputs().iter().zip(values).enumerate() {
        let (def, elem, dtype) = match value {
            Value::Float(def) => (def, Elem::Float, DType::F32),
            Value::Quantized(def, params) => (def, Elem::Int, DType::QFloat(params)),
            Value::Packed(_) => {
                return Err(CompileError::TypeMismatch {
                    node: edge.node,
                    reason: "graph outputs must be tensors, got packed weights".into(),
                });
            }
        };
        let buffer = translator.add_buffer(BufferDecl::new(
            elem,
            def.shape.clone(),
            def.shape.contiguous_strides(),
            BufferSource::Output { index, dtype },
        ));
        outputs.push((buffer, def));
    }

    let synthesized =
        Synthesizer::new(&translator.defs, translator.num_vars()).synthesize(&outputs);
    let program = synthesized.program;
    debug!(
        "Synthesized {} loop nest(s), max depth {}",
        program.num_loop_nests(),
        program.max_depth()
    );
    if options.log_program {
        trace!("Loop nest:\n{program}");
    }

    Ok(CompiledKernel {
        inputs,
        buffers: translator.buffers,
        outputs: outputs.into_iter().map(|(buffer, _)| buffer).collect(),
        program,
        num_vars: synthesized.num_vars,
        num_locals: synthesized.num_locals,
    })
}
