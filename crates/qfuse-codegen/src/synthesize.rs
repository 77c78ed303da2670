use std::rc::Rc;

use hashbrown::HashMap;
use qfuse_ir::NodeId;
use qfuse_tensor::Shape;

use crate::codegen::{BufferId, Expr, LocalId, LoopNest, Nest, Stmt, VarId};
use crate::translate::ComputeDef;

/// Wrap output expressions in loop nests.
///
/// Outputs sharing a shape share one nest, so the program holds exactly one nest
/// per distinct iteration domain. Reductions are lowered into accumulator loops
/// placed right before the statement consuming them.
///
/// A node referenced once in a nest is inlined into its consumer. A node
/// referenced more often is computed once into a local at each distinct index
/// and reused wherever that local is in scope.
pub(crate) struct Synthesizer<'a> {
    defs: &'a HashMap<NodeId, Rc<ComputeDef>>,
    next_var: u32,
    next_local: u32,
    uses: HashMap<NodeId, usize>,
    scopes: Vec<Vec<Binding>>,
}

/// A node value computed into a local.
struct Binding {
    node: NodeId,
    indices: Vec<Expr>,
    value: Expr,
}

/// Result of the synthesis.
pub(crate) struct Synthesized {
    pub(crate) program: LoopNest,
    pub(crate) num_vars: usize,
    pub(crate) num_locals: usize,
}

impl<'a> Synthesizer<'a> {
    pub(crate) fn new(defs: &'a HashMap<NodeId, Rc<ComputeDef>>, next_var: u32) -> Self {
        Self {
            defs,
            next_var,
            next_local: 0,
            uses: HashMap::new(),
            scopes: Vec::new(),
        }
    }

    pub(crate) fn synthesize(mut self, outputs: &[(BufferId, Rc<ComputeDef>)]) -> Synthesized {
        let mut domains: Vec<(Shape, Vec<&(BufferId, Rc<ComputeDef>)>)> = Vec::new();
        for output in outputs {
            match domains.iter_mut().find(|(shape, _)| shape == &output.1.shape) {
                Some((_, members)) => members.push(output),
                None => domains.push((output.1.shape.clone(), vec![output])),
            }
        }

        let nests = domains
            .into_iter()
            .map(|(shape, members)| {
                let vars: Vec<VarId> = shape.dims.iter().map(|_| self.fresh_var()).collect();
                let indices: Vec<Expr> = vars.iter().copied().map(Expr::Var).collect();
                let roots: Vec<Expr> = members.iter().map(|(_, def)| def.at(&indices)).collect();
                self.uses = self.count_uses(&roots);
                self.scopes = vec![Vec::new()];

                let mut body = Vec::new();
                for ((buffer, _), root) in members.into_iter().zip(roots) {
                    let value = self.lower(root, &mut body);
                    body.push(Stmt::Store {
                        buffer: *buffer,
                        indices: indices.clone(),
                        value,
                    });
                }
                for (var, end) in vars.into_iter().zip(shape.dims.iter().copied()).rev() {
                    body = vec![Stmt::For { var, end, body }];
                }

                Nest::new(shape, body)
            })
            .collect();

        Synthesized {
            program: LoopNest::new(nests),
            num_vars: self.next_var as usize,
            num_locals: self.next_local as usize,
        }
    }

    /// Count the references to each node from the roots and from the definitions
    /// they reach, each definition being visited once.
    fn count_uses(&self, roots: &[Expr]) -> HashMap<NodeId, usize> {
        let mut uses = HashMap::new();
        let mut pending = Vec::new();
        for root in roots {
            reference(root, &mut uses, &mut pending);
        }
        while let Some(node) = pending.pop() {
            reference(&self.def(node).body, &mut uses, &mut pending);
        }

        uses
    }

    fn def(&self, node: NodeId) -> Rc<ComputeDef> {
        match self.defs.get(&node) {
            Some(def) => def.clone(),
            None => unreachable!("{node} is referenced without a definition"),
        }
    }

    fn fresh_var(&mut self) -> VarId {
        let var = VarId(self.next_var);
        self.next_var += 1;
        var
    }

    fn fresh_local(&mut self) -> LocalId {
        let local = LocalId(self.next_local);
        self.next_local += 1;
        local
    }

    fn bound(&self, node: NodeId, indices: &[Expr]) -> Option<Expr> {
        self.scopes
            .iter()
            .flatten()
            .find(|binding| binding.node == node && binding.indices == indices)
            .map(|binding| binding.value.clone())
    }

    /// Lower an expression into a fresh block, with its own binding scope.
    fn lower_block(&mut self, expr: Expr) -> (Vec<Stmt>, Expr) {
        let mut block = Vec::new();
        self.scopes.push(Vec::new());
        let value = self.lower(expr, &mut block);
        self.scopes.pop();
        (block, value)
    }

    /// Resolve the node references of an expression and hoist its reductions into
    /// statements appended to `stmts`.
    ///
    /// Statements needed by a select branch are lowered inside an `if` so they're
    /// only evaluated when their branch is taken.
    fn lower(&mut self, expr: Expr, stmts: &mut Vec<Stmt>) -> Expr {
        match expr {
            Expr::Node {
                node,
                elem,
                indices,
            } => {
                let indices: Vec<Expr> = indices
                    .into_iter()
                    .map(|index| self.lower(index, stmts))
                    .collect();
                let def = self.def(node);
                if self.uses.get(&node).copied().unwrap_or(0) <= 1 {
                    return self.lower(def.expand(&indices), stmts);
                }
                if let Some(value) = self.bound(node, &indices) {
                    return value;
                }

                let value = self.lower(def.expand(&indices), stmts);
                let local = self.fresh_local();
                stmts.push(Stmt::Let { local, elem, value });
                let value = Expr::Local(local, elem);
                if let Some(scope) = self.scopes.last_mut() {
                    scope.push(Binding {
                        node,
                        indices,
                        value: value.clone(),
                    });
                }

                value
            }
            Expr::Sum { ranges, body } => {
                let elem = body.elem();
                let local = self.fresh_local();
                stmts.push(Stmt::Let {
                    local,
                    elem,
                    value: Expr::Constant(elem.zero()),
                });

                let (mut inner, value) = self.lower_block(*body);
                inner.push(Stmt::Accumulate { local, value });
                for (var, end) in ranges.into_iter().rev() {
                    inner = vec![Stmt::For {
                        var,
                        end,
                        body: inner,
                    }];
                }
                stmts.extend(inner);

                Expr::Local(local, elem)
            }
            Expr::Select {
                cond,
                then,
                otherwise,
            } => {
                let cond = self.lower(*cond, stmts);
                let (mut then_block, then) = self.lower_block(*then);
                let (mut otherwise_block, otherwise) = self.lower_block(*otherwise);
                if then_block.is_empty() && otherwise_block.is_empty() {
                    return Expr::select(cond, then, otherwise);
                }

                let elem = then.elem();
                let local = self.fresh_local();
                stmts.push(Stmt::Let {
                    local,
                    elem,
                    value: Expr::Constant(elem.zero()),
                });
                then_block.push(Stmt::Assign { local, value: then });
                otherwise_block.push(Stmt::Assign {
                    local,
                    value: otherwise,
                });
                stmts.push(Stmt::If {
                    cond,
                    then: then_block,
                    otherwise: otherwise_block,
                });

                Expr::Local(local, elem)
            }
            Expr::Binary { op, lhs, rhs } => Expr::Binary {
                op,
                lhs: Box::new(self.lower(*lhs, stmts)),
                rhs: Box::new(self.lower(*rhs, stmts)),
            },
            Expr::Unary { op, input } => Expr::Unary {
                op,
                input: Box::new(self.lower(*input, stmts)),
            },
            Expr::Clamp { input, min, max } => Expr::Clamp {
                input: Box::new(self.lower(*input, stmts)),
                min: Box::new(self.lower(*min, stmts)),
                max: Box::new(self.lower(*max, stmts)),
            },
            Expr::Load {
                buffer,
                elem,
                indices,
            } => Expr::Load {
                buffer,
                elem,
                indices: indices
                    .into_iter()
                    .map(|index| self.lower(index, stmts))
                    .collect(),
            },
            leaf @ (Expr::Constant(_) | Expr::Var(_) | Expr::Local(..)) => leaf,
        }
    }
}

fn reference(expr: &Expr, uses: &mut HashMap<NodeId, usize>, pending: &mut Vec<NodeId>) {
    expr.visit_nodes(&mut |node, _| {
        let count = uses.entry(node).or_insert(0);
        *count += 1;
        if *count == 1 {
            pending.push(node);
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codegen::Elem;

    fn def(shape: Shape, first_var: u32, body: impl FnOnce(&[VarId]) -> Expr) -> Rc<ComputeDef> {
        node_def(None, shape, first_var, body)
    }

    fn node_def(
        node: Option<NodeId>,
        shape: Shape,
        first_var: u32,
        body: impl FnOnce(&[VarId]) -> Expr,
    ) -> Rc<ComputeDef> {
        let vars: Vec<VarId> = (0..shape.num_dims() as u32)
            .map(|i| VarId(first_var + i))
            .collect();
        let body = body(&vars);
        Rc::new(ComputeDef {
            node,
            shape,
            vars,
            body,
        })
    }

    fn load(buffer: u32, vars: &[VarId]) -> Expr {
        Expr::load(
            BufferId(buffer),
            Elem::Float,
            vars.iter().copied().map(Expr::Var).collect(),
        )
    }

    #[test]
    fn outputs_with_the_same_shape_share_a_nest() {
        let a = def(Shape::new([2, 2]), 0, |vars| load(0, vars));
        let b = def(Shape::new([2, 2]), 2, |vars| load(1, vars));
        let c = def(Shape::new([3]), 4, |vars| load(2, vars));
        let outputs = vec![(BufferId(3), a), (BufferId(4), c), (BufferId(5), b)];

        let program = Synthesizer::new(&HashMap::new(), 5).synthesize(&outputs).program;

        assert_eq!(program.num_loop_nests(), 2);
        assert_eq!(program.max_depth(), 2);
        assert_eq!(program.nests[0].shape, Shape::new([2, 2]));
        assert_eq!(program.nests[1].shape, Shape::new([3]));
    }

    #[test]
    fn reductions_become_accumulator_loops() {
        let acc = def(Shape::new([2]), 0, |vars| {
            let k = VarId(1);
            Expr::sum(
                vec![(k, 4)],
                Expr::load(BufferId(0), Elem::Int, vec![Expr::Var(vars[0]), Expr::Var(k)]),
            )
        });

        let synthesized =
            Synthesizer::new(&HashMap::new(), 2).synthesize(&[(BufferId(1), acc)]);
        let text = synthesized.program.to_string();

        assert_eq!(synthesized.num_locals, 1);
        assert_eq!(synthesized.program.max_depth(), 2);
        assert!(text.contains("int64_t l0 = 0;"));
        assert!(text.contains("l0 += b0[i2][i1];"));
        assert!(text.contains("b1[i2] = l0;"));
    }

    #[test]
    fn guarded_reductions_are_lowered_in_a_branch() {
        let guarded = def(Shape::new([2]), 0, |vars| {
            let k = VarId(1);
            let sum = Expr::sum(vec![(k, 3)], Expr::Var(k));
            Expr::select(
                Expr::lower(Expr::Var(vars[0]), Expr::int(1)),
                sum,
                Expr::int(0),
            )
        });

        let program = Synthesizer::new(&HashMap::new(), 2)
            .synthesize(&[(BufferId(0), guarded)])
            .program;
        let text = program.to_string();

        assert!(text.contains("if ((i2 < 1)) {"));
        assert!(text.contains("} else {"));
        assert_eq!(program.max_depth(), 2);
    }

    #[test]
    fn shared_nodes_are_computed_once_per_index() {
        let shared = node_def(Some(NodeId(1)), Shape::new([3]), 0, |vars| {
            Expr::mul(load(0, vars), Expr::float(2.0))
        });
        let mut defs = HashMap::new();
        defs.insert(NodeId(1), shared.clone());
        let sum = def(Shape::new([3]), 1, |vars| {
            let at = [Expr::Var(vars[0])];
            Expr::add(shared.at(&at), shared.at(&at))
        });
        let outputs = vec![(BufferId(1), shared.clone()), (BufferId(2), sum)];

        let synthesized = Synthesizer::new(&defs, 2).synthesize(&outputs);
        let text = synthesized.program.to_string();

        assert_eq!(synthesized.num_locals, 1);
        assert_eq!(text.matches("b0[").count(), 1);
        assert!(text.contains("b1[i2] = l0;"));
        assert!(text.contains("b2[i2] = (l0 + l0);"));
    }

    #[test]
    fn single_use_nodes_are_inlined() {
        let scaled = node_def(Some(NodeId(1)), Shape::new([3]), 0, |vars| {
            Expr::mul(load(0, vars), Expr::float(2.0))
        });
        let mut defs = HashMap::new();
        defs.insert(NodeId(1), scaled.clone());

        let synthesized = Synthesizer::new(&defs, 1).synthesize(&[(BufferId(1), scaled)]);

        assert_eq!(synthesized.num_locals, 0);
        assert!(synthesized.program.to_string().contains("b1[i1] = (b0[i1] * 2.0);"));
    }
}
