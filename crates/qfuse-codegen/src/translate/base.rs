use std::rc::Rc;

use hashbrown::HashMap;
use qfuse_ir::{
    Edge, Graph, GraphError, InputOpIr, NodeId, NodeIr, OperationIr, PackedConv2dIr,
    PackedInputOpIr, ValueIr,
};
use qfuse_tensor::quantization::QuantParams;
use qfuse_tensor::{Conv2dOptions, DType, Shape};

use super::arithmetic;
use crate::CompileError;
use crate::CompileOptions;
use crate::codegen::{BufferDecl, BufferId, BufferSource, Elem, Expr, VarId};

/// The value computed by a node at every element of its domain.
///
/// Graph inputs have no node: their body is a plain load.
#[derive(Debug)]
pub(crate) struct ComputeDef {
    pub(crate) node: Option<NodeId>,
    pub(crate) shape: Shape,
    pub(crate) vars: Vec<VarId>,
    pub(crate) body: Expr,
}

impl ComputeDef {
    /// The value at the given indices, one per dimension.
    ///
    /// Computed nodes are referenced rather than inlined, so a node consumed
    /// many times is still represented once.
    pub(crate) fn at(&self, indices: &[Expr]) -> Expr {
        match self.node {
            Some(node) => Expr::Node {
                node,
                elem: self.body.elem(),
                indices: indices.to_vec(),
            },
            None => self.expand(indices),
        }
    }

    /// The body with the definition variables replaced by `indices`.
    pub(crate) fn expand(&self, indices: &[Expr]) -> Expr {
        let vars = self
            .vars
            .iter()
            .copied()
            .zip(indices.iter().cloned())
            .collect::<HashMap<_, _>>();
        self.body.substitute(&vars)
    }
}

/// Packed convolution weights, either packed by the graph or bound at run time.
#[derive(Debug)]
pub(crate) struct PackedDef {
    pub(crate) weight: Rc<ComputeDef>,
    pub(crate) weight_scale: Expr,
    pub(crate) weight_zero_point: Expr,
    pub(crate) bias: Option<Rc<ComputeDef>>,
    pub(crate) options: Conv2dOptions,
}

#[derive(Debug, Clone)]
pub(crate) enum Value {
    Float(Rc<ComputeDef>),
    Quantized(Rc<ComputeDef>, QuantParams),
    Packed(Rc<PackedDef>),
}

impl Value {
    fn kind(&self) -> String {
        match self {
            Value::Float(_) => DType::F32.to_string(),
            Value::Quantized(_, params) => DType::QFloat(*params).to_string(),
            Value::Packed(_) => "packed conv2d weights".to_string(),
        }
    }
}

/// A graph input and the buffers it binds.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum InputBinding {
    Tensor { buffer: BufferId, dtype: DType },
    PackedConv2d { decl: PackedConv2dIr },
}

/// Translate graph nodes into expressions, memoized per node.
pub(crate) struct Translator<'a> {
    graph: &'a Graph,
    options: &'a CompileOptions,
    pub(crate) buffers: Vec<BufferDecl>,
    pub(crate) defs: HashMap<NodeId, Rc<ComputeDef>>,
    values: HashMap<NodeId, Value>,
    next_var: u32,
}

impl<'a> Translator<'a> {
    pub(crate) fn new(graph: &'a Graph, options: &'a CompileOptions) -> Self {
        Self {
            graph,
            options,
            buffers: Vec::new(),
            defs: HashMap::new(),
            values: HashMap::new(),
            next_var: 0,
        }
    }

    pub(crate) fn options(&self) -> &CompileOptions {
        self.options
    }

    pub(crate) fn num_vars(&self) -> u32 {
        self.next_var
    }

    pub(crate) fn fresh_var(&mut self) -> VarId {
        let var = VarId(self.next_var);
        self.next_var += 1;
        var
    }

    pub(crate) fn fresh_vars(&mut self, count: usize) -> Vec<VarId> {
        (0..count).map(|_| self.fresh_var()).collect()
    }

    pub(crate) fn add_buffer(&mut self, decl: BufferDecl) -> BufferId {
        let id = BufferId(self.buffers.len() as u32);
        self.buffers.push(decl);
        id
    }

    /// Declare the buffers of every graph input, in position order.
    pub(crate) fn declare_inputs(&mut self) -> Result<Vec<InputBinding>, CompileError> {
        let graph = self.graph;
        let mut bindings = Vec::with_capacity(graph.inputs().len());

        for (expected, id) in graph.inputs().iter().enumerate() {
            let node = self.node(*id)?;
            let (binding, value) = match (&node.op, &node.out) {
                (OperationIr::Input(op), ValueIr::Tensor(tensor)) if op.position == expected => {
                    let elem = match op.dtype {
                        DType::F32 => Elem::Float,
                        DType::QFloat(params) => {
                            params.validate()?;
                            Elem::Int
                        }
                    };
                    if tensor.strides.len() != tensor.shape.num_dims() {
                        return Err(CompileError::TypeMismatch {
                            node: *id,
                            reason: format!(
                                "{} strides declared for shape {}",
                                tensor.strides.len(),
                                tensor.shape
                            ),
                        });
                    }
                    let buffer = self.add_buffer(BufferDecl::new(
                        elem,
                        tensor.shape.clone(),
                        tensor.strides.clone(),
                        BufferSource::Input { position: expected },
                    ));
                    let vars = self.fresh_vars(tensor.shape.num_dims());
                    let body = Expr::load(buffer, elem, vars.iter().copied().map(Expr::Var).collect());
                    let def = Rc::new(ComputeDef {
                        node: None,
                        shape: tensor.shape.clone(),
                        vars,
                        body,
                    });
                    let value = match op.dtype {
                        DType::F32 => Value::Float(def),
                        DType::QFloat(params) => Value::Quantized(def, params),
                    };

                    (
                        InputBinding::Tensor {
                            buffer,
                            dtype: op.dtype,
                        },
                        value,
                    )
                }
                (OperationIr::PackedInput(op), ValueIr::PackedConv2d(decl))
                    if op.position == expected =>
                {
                    let value = self.packed_input(*id, expected, decl)?;
                    (
                        InputBinding::PackedConv2d { decl: decl.clone() },
                        Value::Packed(value),
                    )
                }
                (OperationIr::Input(InputOpIr { position, .. }), _)
                | (OperationIr::PackedInput(PackedInputOpIr { position }), _)
                    if *position != expected =>
                {
                    return Err(GraphError::InputPosition {
                        expected,
                        actual: *position,
                    }
                    .into());
                }
                _ => {
                    return Err(CompileError::TypeMismatch {
                        node: *id,
                        reason: format!("{} doesn't declare a matching input type", node.op.name()),
                    });
                }
            };
            self.values.insert(*id, value);
            bindings.push(binding);
        }

        Ok(bindings)
    }

    fn packed_input(
        &mut self,
        node: NodeId,
        position: usize,
        decl: &PackedConv2dIr,
    ) -> Result<Rc<PackedDef>, CompileError> {
        decl.options.validate()?;
        let shape = &decl.weight_shape;
        if shape.num_dims() != 4 {
            return Err(CompileError::TypeMismatch {
                node,
                reason: format!("packed weights must have rank 4, got {shape}"),
            });
        }

        let weight = self.add_buffer(BufferDecl::new(
            Elem::Int,
            shape.clone(),
            shape.contiguous_strides(),
            BufferSource::PackedWeight { position },
        ));
        let vars = self.fresh_vars(4);
        let body = Expr::load(weight, Elem::Int, vars.iter().copied().map(Expr::Var).collect());
        let weight = Rc::new(ComputeDef {
            node: None,
            shape: shape.clone(),
            vars,
            body,
        });

        let bias = if decl.has_bias {
            let bias_shape = Shape::new([shape.dims[0]]);
            let buffer = self.add_buffer(BufferDecl::new(
                Elem::Float,
                bias_shape.clone(),
                vec![1],
                BufferSource::PackedBias { position },
            ));
            let var = self.fresh_var();
            Some(Rc::new(ComputeDef {
                node: None,
                shape: bias_shape,
                vars: vec![var],
                body: Expr::load(buffer, Elem::Float, vec![Expr::Var(var)]),
            }))
        } else {
            None
        };

        let qparams = self.add_buffer(BufferDecl::new(
            Elem::Float,
            Shape::new([2]),
            vec![1],
            BufferSource::PackedQParams { position },
        ));

        Ok(Rc::new(PackedDef {
            weight,
            weight_scale: Expr::load(qparams, Elem::Float, vec![Expr::index(0)]),
            weight_zero_point: Expr::load(qparams, Elem::Float, vec![Expr::index(1)])
                .cast(Elem::Int),
            bias,
            options: decl.options.clone(),
        }))
    }

    /// The node providing an edge, checking that it's declared before `consumer`.
    fn producer(&self, consumer: NodeId, edge: Edge) -> Result<&'a NodeIr, CompileError> {
        if edge.node >= consumer {
            return Err(GraphError::ForwardEdge {
                node: consumer,
                edge,
            }
            .into());
        }
        if edge.output != 0 {
            return Err(GraphError::UnknownOutput { edge }.into());
        }
        self.node(edge.node)
    }

    fn node(&self, id: NodeId) -> Result<&'a NodeIr, CompileError> {
        let graph = self.graph;
        graph.node(id).ok_or_else(|| {
            GraphError::UnknownNode {
                node: id,
                len: graph.len(),
            }
            .into()
        })
    }

    /// Translate the nodes the graph outputs depend on and return the output values.
    ///
    /// Nodes only consume nodes declared before them, so a single pass in arena
    /// order translates every operand before its consumers.
    pub(crate) fn translate(&mut self, outputs: &[Edge]) -> Result<Vec<Value>, CompileError> {
        let mut reached = vec![false; self.graph.len()];
        for edge in outputs {
            if edge.output != 0 {
                return Err(GraphError::UnknownOutput { edge: *edge }.into());
            }
            self.node(edge.node)?;
            reached[edge.node.0] = true;
        }
        for id in (0..reached.len()).rev() {
            if !reached[id] {
                continue;
            }
            let consumer = NodeId(id);
            for edge in self.node(consumer)?.op.inputs() {
                self.producer(consumer, edge)?;
                reached[edge.node.0] = true;
            }
        }

        for (id, reached) in reached.into_iter().enumerate() {
            let id = NodeId(id);
            if reached && !self.values.contains_key(&id) {
                let value = self.value(id)?;
                self.values.insert(id, value);
            }
        }

        outputs
            .iter()
            .map(|edge| self.translated(edge.node, edge.node))
            .collect()
    }

    /// The operand of `consumer` reached through `edge`.
    pub(crate) fn operand(&mut self, consumer: NodeId, edge: Edge) -> Result<Value, CompileError> {
        self.producer(consumer, edge)?;
        self.translated(consumer, edge.node)
    }

    fn translated(&self, consumer: NodeId, id: NodeId) -> Result<Value, CompileError> {
        self.values
            .get(&id)
            .cloned()
            .ok_or_else(|| CompileError::MissingDependency {
                node: consumer,
                reason: format!("{id} isn't translated before its consumer"),
            })
    }

    fn value(&mut self, id: NodeId) -> Result<Value, CompileError> {
        let node = self.node(id)?;
        let value = match &node.op {
            OperationIr::Input(_) | OperationIr::PackedInput(_) => {
                return Err(CompileError::MissingDependency {
                    node: id,
                    reason: "the input isn't listed among the graph inputs".into(),
                });
            }
            OperationIr::Quantize(op) => {
                let input = self.float_operand(id, op.input)?;
                let params = QuantParams::new(op.scale, op.zero_point, op.dtype)?;
                let vars = self.fresh_vars(input.shape.num_dims());
                let real = input.at(&Self::indices(&vars));
                let body = arithmetic::quantize(real, &params, self.options.rounding);

                Value::Quantized(self.def(id, input.shape.clone(), vars, body), params)
            }
            OperationIr::Dequantize(op) => {
                let (input, params) = self.quantized_operand(id, op.input)?;
                let vars = self.fresh_vars(input.shape.num_dims());
                let stored = input.at(&Self::indices(&vars));
                let body = arithmetic::dequantize(stored, &params);

                Value::Float(self.def(id, input.shape.clone(), vars, body))
            }
            OperationIr::QuantizedAdd(op) => {
                let (lhs, lhs_params) = self.quantized_operand(id, op.lhs)?;
                let (rhs, rhs_params) = self.quantized_operand(id, op.rhs)?;
                if lhs.shape != rhs.shape {
                    return Err(CompileError::TypeMismatch {
                        node: id,
                        reason: format!(
                            "can't add tensors of shapes {} and {}",
                            lhs.shape, rhs.shape
                        ),
                    });
                }
                let out = QuantParams::new(op.scale, op.zero_point, lhs_params.dtype)?;
                let vars = self.fresh_vars(lhs.shape.num_dims());
                let indices = Self::indices(&vars);
                let body = arithmetic::quantized_add(
                    lhs.at(&indices),
                    &lhs_params,
                    rhs.at(&indices),
                    &rhs_params,
                    &out,
                    self.options.rounding,
                );

                Value::Quantized(self.def(id, lhs.shape.clone(), vars, body), out)
            }
            OperationIr::Conv2dPrepack(op) => Value::Packed(self.prepack(id, op)?),
            OperationIr::QuantizedConv2d(op) => self.conv2d(id, op, false)?,
            OperationIr::QuantizedConv2dRelu(op) => self.conv2d(id, op, true)?,
            OperationIr::Custom(op) => {
                return Err(CompileError::UnsupportedOperator {
                    node: id,
                    name: op.name.clone(),
                });
            }
        };

        check_declared(id, &node.out, &value)?;

        Ok(value)
    }

    pub(crate) fn def(
        &mut self,
        node: NodeId,
        shape: Shape,
        vars: Vec<VarId>,
        body: Expr,
    ) -> Rc<ComputeDef> {
        let def = Rc::new(ComputeDef {
            node: Some(node),
            shape,
            vars,
            body,
        });
        self.defs.insert(node, def.clone());
        def
    }

    pub(crate) fn indices(vars: &[VarId]) -> Vec<Expr> {
        vars.iter().copied().map(Expr::Var).collect()
    }

    pub(crate) fn float_operand(
        &mut self,
        consumer: NodeId,
        edge: Edge,
    ) -> Result<Rc<ComputeDef>, CompileError> {
        match self.operand(consumer, edge)? {
            Value::Float(def) => Ok(def),
            other => Err(Self::unexpected(consumer, edge, DType::F32.to_string(), &other)),
        }
    }

    pub(crate) fn quantized_operand(
        &mut self,
        consumer: NodeId,
        edge: Edge,
    ) -> Result<(Rc<ComputeDef>, QuantParams), CompileError> {
        match self.operand(consumer, edge)? {
            Value::Quantized(def, params) => Ok((def, params)),
            other => Err(Self::unexpected(consumer, edge, "a quantized tensor".into(), &other)),
        }
    }

    pub(crate) fn unexpected(
        consumer: NodeId,
        edge: Edge,
        expected: String,
        actual: &Value,
    ) -> CompileError {
        CompileError::TypeMismatch {
            node: consumer,
            reason: format!("expected {expected} for {}, got {}", edge.node, actual.kind()),
        }
    }
}

/// Compare the declared output type of a node with the translated value.
fn check_declared(node: NodeId, declared: &ValueIr, value: &Value) -> Result<(), CompileError> {
    match (declared, value) {
        (ValueIr::Tensor(tensor), Value::Float(def) | Value::Quantized(def, _)) => {
            if tensor.shape != def.shape {
                return Err(CompileError::ShapeMismatch {
                    node,
                    declared: tensor.shape.clone(),
                    inferred: def.shape.clone(),
                });
            }
            Ok(())
        }
        (ValueIr::PackedConv2d(decl), Value::Packed(packed)) => {
            if decl.weight_shape != packed.weight.shape {
                return Err(CompileError::ShapeMismatch {
                    node,
                    declared: decl.weight_shape.clone(),
                    inferred: packed.weight.shape.clone(),
                });
            }
            if decl.has_bias != packed.bias.is_some() || decl.options != packed.options {
                return Err(CompileError::TypeMismatch {
                    node,
                    reason: "the declared packed weights don't match the prepack attributes"
                        .into(),
                });
            }
            Ok(())
        }
        (ValueIr::Tensor(_), Value::Packed(_)) => Err(CompileError::TypeMismatch {
            node,
            reason: "declared as a tensor, but produces packed weights".into(),
        }),
        (ValueIr::PackedConv2d(_), _) => Err(CompileError::TypeMismatch {
            node,
            reason: "declared as packed weights, but produces a tensor".into(),
        }),
    }
}
