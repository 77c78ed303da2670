use core::fmt;

use hashbrown::HashMap;
use qfuse_ir::NodeId;
use qfuse_tensor::quantization::RoundingMode;
use serde::{Deserialize, Serialize};

/// Element type of an expression.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Elem {
    /// 64-bit float.
    Float,
    /// 64-bit signed integer.
    Int,
    /// Boolean.
    Bool,
}

impl Elem {
    /// The additive identity of the type.
    pub fn zero(&self) -> Scalar {
        match self {
            Elem::Float => Scalar::Float(0.0),
            Elem::Int => Scalar::Int(0),
            Elem::Bool => Scalar::Bool(false),
        }
    }
}

impl fmt::Display for Elem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Elem::Float => f.write_str("double"),
            Elem::Int => f.write_str("int64_t"),
            Elem::Bool => f.write_str("bool"),
        }
    }
}

/// A constant value.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Scalar {
    /// Float constant.
    Float(f64),
    /// Integer constant.
    Int(i64),
    /// Boolean constant.
    Bool(bool),
}

impl Scalar {
    /// Element type of the constant.
    pub fn elem(&self) -> Elem {
        match self {
            Scalar::Float(_) => Elem::Float,
            Scalar::Int(_) => Elem::Int,
            Scalar::Bool(_) => Elem::Bool,
        }
    }
}

impl fmt::Display for Scalar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scalar::Float(value) => write!(f, "{value:?}"),
            Scalar::Int(value) => write!(f, "{value}"),
            Scalar::Bool(value) => write!(f, "{value}"),
        }
    }
}

/// Loop index variable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct VarId(pub u32);

/// Scalar local variable, written by statements.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LocalId(pub u32);

/// Buffer bound to the kernel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BufferId(pub u32);

impl fmt::Display for VarId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "i{}", self.0)
    }
}

impl fmt::Display for LocalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "l{}", self.0)
    }
}

impl fmt::Display for BufferId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "b{}", self.0)
    }
}

/// Binary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[allow(missing_docs)]
pub enum BinaryOperator {
    Add,
    Sub,
    Mul,
    Div,
    Max,
    Min,
    Lower,
    GreaterEqual,
    And,
}

/// Unary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum UnaryOperator {
    /// Numeric conversion, truncating toward zero from float to int.
    Cast(Elem),
    /// Round a float to an integral value.
    Round(RoundingMode),
}

/// A scalar formula evaluated at one element of an iteration domain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Expr {
    /// A constant.
    Constant(Scalar),
    /// A loop index, always an integer.
    Var(VarId),
    /// A local written by a statement.
    Local(LocalId, Elem),
    /// Read a buffer element; the offset is computed with the buffer strides.
    Load {
        /// The buffer.
        buffer: BufferId,
        /// Type of the loaded value.
        elem: Elem,
        /// One index per buffer dimension.
        indices: Vec<Expr>,
    },
    /// Binary operation.
    Binary {
        /// Operator.
        op: BinaryOperator,
        /// Left operand.
        lhs: Box<Expr>,
        /// Right operand.
        rhs: Box<Expr>,
    },
    /// Unary operation.
    Unary {
        /// Operator.
        op: UnaryOperator,
        /// Operand.
        input: Box<Expr>,
    },
    /// Saturate a value to `[min, max]`.
    Clamp {
        /// Operand.
        input: Box<Expr>,
        /// Lower bound.
        min: Box<Expr>,
        /// Upper bound.
        max: Box<Expr>,
    },
    /// Evaluate only the selected branch.
    Select {
        /// Boolean condition.
        cond: Box<Expr>,
        /// Value when the condition holds.
        then: Box<Expr>,
        /// Value otherwise.
        otherwise: Box<Expr>,
    },
    /// Sum of the body over the reduction variables, each ranging over `0..end`.
    Sum {
        /// Reduction variables with their exclusive end, outermost first.
        ranges: Vec<(VarId, usize)>,
        /// Summed value.
        body: Box<Expr>,
    },
    /// Value computed by a graph node at the given indices.
    ///
    /// Resolved by the synthesizer, either inlined or bound to a local.
    Node {
        /// The producer.
        node: NodeId,
        /// Type of the value.
        elem: Elem,
        /// One index per dimension of the node output.
        indices: Vec<Expr>,
    },
}

impl Expr {
    /// Float constant.
    pub fn float(value: f64) -> Self {
        Expr::Constant(Scalar::Float(value))
    }

    /// Integer constant.
    pub fn int(value: i64) -> Self {
        Expr::Constant(Scalar::Int(value))
    }

    /// Index constant.
    pub fn index(value: usize) -> Self {
        Expr::int(value as i64)
    }

    /// Load a buffer element.
    pub fn load(buffer: BufferId, elem: Elem, indices: Vec<Expr>) -> Self {
        Expr::Load {
            buffer,
            elem,
            indices,
        }
    }

    /// `lhs + rhs`
    pub fn add(lhs: Expr, rhs: Expr) -> Self {
        match (&lhs, &rhs) {
            (Expr::Constant(Scalar::Int(a)), Expr::Constant(Scalar::Int(b))) => Expr::int(a + b),
            (_, Expr::Constant(Scalar::Int(0))) => lhs,
            (Expr::Constant(Scalar::Int(0)), _) => rhs,
            _ => Self::binary(BinaryOperator::Add, lhs, rhs),
        }
    }

    /// `lhs - rhs`
    pub fn sub(lhs: Expr, rhs: Expr) -> Self {
        match (&lhs, &rhs) {
            (Expr::Constant(Scalar::Int(a)), Expr::Constant(Scalar::Int(b))) => Expr::int(a - b),
            (_, Expr::Constant(Scalar::Int(0))) => lhs,
            _ => Self::binary(BinaryOperator::Sub, lhs, rhs),
        }
    }

    /// `lhs * rhs`
    pub fn mul(lhs: Expr, rhs: Expr) -> Self {
        match (&lhs, &rhs) {
            (Expr::Constant(Scalar::Int(a)), Expr::Constant(Scalar::Int(b))) => Expr::int(a * b),
            (Expr::Constant(Scalar::Float(a)), Expr::Constant(Scalar::Float(b))) => {
                Expr::float(a * b)
            }
            (_, Expr::Constant(Scalar::Int(1))) => lhs,
            (Expr::Constant(Scalar::Int(1)), _) => rhs,
            _ => Self::binary(BinaryOperator::Mul, lhs, rhs),
        }
    }

    /// `lhs / rhs`, truncating for integers.
    pub fn div(lhs: Expr, rhs: Expr) -> Self {
        match &rhs {
            Expr::Constant(Scalar::Int(1)) => lhs,
            _ => Self::binary(BinaryOperator::Div, lhs, rhs),
        }
    }

    /// `max(lhs, rhs)`
    pub fn max(lhs: Expr, rhs: Expr) -> Self {
        Self::binary(BinaryOperator::Max, lhs, rhs)
    }

    /// `min(lhs, rhs)`
    pub fn min(lhs: Expr, rhs: Expr) -> Self {
        Self::binary(BinaryOperator::Min, lhs, rhs)
    }

    /// `lhs < rhs`
    pub fn lower(lhs: Expr, rhs: Expr) -> Self {
        Self::binary(BinaryOperator::Lower, lhs, rhs)
    }

    /// `lhs >= rhs`
    pub fn greater_equal(lhs: Expr, rhs: Expr) -> Self {
        Self::binary(BinaryOperator::GreaterEqual, lhs, rhs)
    }

    /// `lhs && rhs`
    pub fn and(lhs: Expr, rhs: Expr) -> Self {
        Self::binary(BinaryOperator::And, lhs, rhs)
    }

    /// Convert to another element type.
    pub fn cast(self, elem: Elem) -> Self {
        if self.elem() == elem {
            return self;
        }
        match self {
            Expr::Constant(Scalar::Int(value)) if elem == Elem::Float => Expr::float(value as f64),
            input => Expr::Unary {
                op: UnaryOperator::Cast(elem),
                input: Box::new(input),
            },
        }
    }

    /// Round to an integral float.
    pub fn round(self, mode: RoundingMode) -> Self {
        Expr::Unary {
            op: UnaryOperator::Round(mode),
            input: Box::new(self),
        }
    }

    /// Saturate to `[min, max]`.
    pub fn clamp(self, min: Expr, max: Expr) -> Self {
        Expr::Clamp {
            input: Box::new(self),
            min: Box::new(min),
            max: Box::new(max),
        }
    }

    /// `cond ? then : otherwise`
    pub fn select(cond: Expr, then: Expr, otherwise: Expr) -> Self {
        Expr::Select {
            cond: Box::new(cond),
            then: Box::new(then),
            otherwise: Box::new(otherwise),
        }
    }

    /// Sum over the given reduction variables. Nested sums are merged.
    pub fn sum(mut ranges: Vec<(VarId, usize)>, body: Expr) -> Self {
        match body {
            Expr::Sum {
                ranges: inner,
                body,
            } => {
                ranges.extend(inner);
                Expr::Sum { ranges, body }
            }
            body => Expr::Sum {
                ranges,
                body: Box::new(body),
            },
        }
    }

    fn binary(op: BinaryOperator, lhs: Expr, rhs: Expr) -> Self {
        Expr::Binary {
            op,
            lhs: Box::new(lhs),
            rhs: Box::new(rhs),
        }
    }

    /// Element type of the value.
    pub fn elem(&self) -> Elem {
        match self {
            Expr::Constant(value) => value.elem(),
            Expr::Var(_) => Elem::Int,
            Expr::Local(_, elem) | Expr::Load { elem, .. } | Expr::Node { elem, .. } => *elem,
            Expr::Binary { op, lhs, .. } => match op {
                BinaryOperator::Lower | BinaryOperator::GreaterEqual | BinaryOperator::And => {
                    Elem::Bool
                }
                _ => lhs.elem(),
            },
            Expr::Unary { op, input } => match op {
                UnaryOperator::Cast(elem) => *elem,
                UnaryOperator::Round(_) => input.elem(),
            },
            Expr::Clamp { input, .. } => input.elem(),
            Expr::Select { then, .. } => then.elem(),
            Expr::Sum { body, .. } => body.elem(),
        }
    }

    /// Whether the expression contains a reduction.
    pub fn contains_sum(&self) -> bool {
        match self {
            Expr::Constant(_) | Expr::Var(_) | Expr::Local(..) => false,
            Expr::Load { indices, .. } | Expr::Node { indices, .. } => {
                indices.iter().any(Expr::contains_sum)
            }
            Expr::Binary { lhs, rhs, .. } => lhs.contains_sum() || rhs.contains_sum(),
            Expr::Unary { input, .. } => input.contains_sum(),
            Expr::Clamp { input, min, max } => {
                input.contains_sum() || min.contains_sum() || max.contains_sum()
            }
            Expr::Select {
                cond,
                then,
                otherwise,
            } => cond.contains_sum() || then.contains_sum() || otherwise.contains_sum(),
            Expr::Sum { .. } => true,
        }
    }

    /// Visit the graph nodes referenced by the expression, without descending
    /// into their own definitions.
    pub fn visit_nodes(&self, visitor: &mut impl FnMut(NodeId, &[Expr])) {
        match self {
            Expr::Constant(_) | Expr::Var(_) | Expr::Local(..) => {}
            Expr::Load { indices, .. } => {
                indices.iter().for_each(|index| index.visit_nodes(visitor))
            }
            Expr::Node { node, indices, .. } => {
                indices.iter().for_each(|index| index.visit_nodes(visitor));
                visitor(*node, indices);
            }
            Expr::Binary { lhs, rhs, .. } => {
                lhs.visit_nodes(visitor);
                rhs.visit_nodes(visitor);
            }
            Expr::Unary { input, .. } => input.visit_nodes(visitor),
            Expr::Clamp { input, min, max } => {
                input.visit_nodes(visitor);
                min.visit_nodes(visitor);
                max.visit_nodes(visitor);
            }
            Expr::Select {
                cond,
                then,
                otherwise,
            } => {
                cond.visit_nodes(visitor);
                then.visit_nodes(visitor);
                otherwise.visit_nodes(visitor);
            }
            Expr::Sum { body, .. } => body.visit_nodes(visitor),
        }
    }

    /// Replace loop variables by expressions.
    pub fn substitute(&self, vars: &HashMap<VarId, Expr>) -> Expr {
        let sub = |expr: &Expr| Box::new(expr.substitute(vars));
        match self {
            Expr::Var(var) => vars.get(var).cloned().unwrap_or(Expr::Var(*var)),
            Expr::Constant(_) | Expr::Local(..) => self.clone(),
            Expr::Load {
                buffer,
                elem,
                indices,
            } => Expr::Load {
                buffer: *buffer,
                elem: *elem,
                indices: indices.iter().map(|index| index.substitute(vars)).collect(),
            },
            Expr::Node {
                node,
                elem,
                indices,
            } => Expr::Node {
                node: *node,
                elem: *elem,
                indices: indices.iter().map(|index| index.substitute(vars)).collect(),
            },
            Expr::Binary { op, lhs, rhs } => {
                let (lhs, rhs) = (lhs.substitute(vars), rhs.substitute(vars));
                match op {
                    BinaryOperator::Add => Expr::add(lhs, rhs),
                    BinaryOperator::Sub => Expr::sub(lhs, rhs),
                    BinaryOperator::Mul => Expr::mul(lhs, rhs),
                    BinaryOperator::Div => Expr::div(lhs, rhs),
                    op => Expr::binary(*op, lhs, rhs),
                }
            }
            Expr::Unary { op, input } => Expr::Unary {
                op: *op,
                input: sub(input),
            },
            Expr::Clamp { input, min, max } => Expr::Clamp {
                input: sub(input),
                min: sub(min),
                max: sub(max),
            },
            Expr::Select {
                cond,
                then,
                otherwise,
            } => Expr::Select {
                cond: sub(cond),
                then: sub(then),
                otherwise: sub(otherwise),
            },
            Expr::Sum { ranges, body } => Expr::Sum {
                ranges: ranges.clone(),
                body: sub(body),
            },
        }
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Constant(value) => write!(f, "{value}"),
            Expr::Var(var) => write!(f, "{var}"),
            Expr::Local(local, _) => write!(f, "{local}"),
            Expr::Load {
                buffer, indices, ..
            } => {
                write!(f, "{buffer}")?;
                for index in indices {
                    write!(f, "[{index}]")?;
                }
                Ok(())
            }
            Expr::Binary { op, lhs, rhs } => match op {
                BinaryOperator::Add => write!(f, "({lhs} + {rhs})"),
                BinaryOperator::Sub => write!(f, "({lhs} - {rhs})"),
                BinaryOperator::Mul => write!(f, "({lhs} * {rhs})"),
                BinaryOperator::Div => write!(f, "({lhs} / {rhs})"),
                BinaryOperator::Max => write!(f, "max({lhs}, {rhs})"),
                BinaryOperator::Min => write!(f, "min({lhs}, {rhs})"),
                BinaryOperator::Lower => write!(f, "({lhs} < {rhs})"),
                BinaryOperator::GreaterEqual => write!(f, "({lhs} >= {rhs})"),
                BinaryOperator::And => write!(f, "({lhs} && {rhs})"),
            },
            Expr::Unary { op, input } => match op {
                UnaryOperator::Cast(elem) => write!(f, "({elem})({input})"),
                UnaryOperator::Round(RoundingMode::HalfToEven) => write!(f, "nearbyint({input})"),
                UnaryOperator::Round(RoundingMode::HalfAwayFromZero) => write!(f, "round({input})"),
            },
            Expr::Clamp { input, min, max } => write!(f, "clamp({input}, {min}, {max})"),
            Expr::Select {
                cond,
                then,
                otherwise,
            } => write!(f, "({cond} ? {then} : {otherwise})"),
            Expr::Sum { ranges, body } => {
                f.write_str("sum(")?;
                for (var, end) in ranges {
                    write!(f, "{var} < {end}, ")?;
                }
                write!(f, "{body})")
            }
            Expr::Node { node, indices, .. } => {
                write!(f, "{node}")?;
                for index in indices {
                    write!(f, "[{index}]")?;
                }
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn integer_identities_fold() {
        let i = Expr::Var(VarId(0));

        assert_eq!(Expr::mul(i.clone(), Expr::int(1)), i);
        assert_eq!(Expr::add(i.clone(), Expr::int(0)), i);
        assert_eq!(Expr::sub(i.clone(), Expr::int(0)), i);
        assert_eq!(Expr::add(Expr::int(2), Expr::int(3)), Expr::int(5));
    }

    #[test]
    fn float_products_fold_in_operand_order() {
        assert_eq!(
            Expr::mul(Expr::float(0.1), Expr::float(0.3)),
            Expr::float(0.1 * 0.3)
        );
    }

    #[test]
    fn nested_sums_merge() {
        let body = Expr::Var(VarId(2));
        let inner = Expr::sum(vec![(VarId(2), 3)], body.clone());
        let outer = Expr::sum(vec![(VarId(1), 2)], inner);

        assert_eq!(
            outer,
            Expr::Sum {
                ranges: vec![(VarId(1), 2), (VarId(2), 3)],
                body: Box::new(body)
            }
        );
    }

    #[test]
    fn substitution_replaces_free_vars_and_folds() {
        let expr = Expr::mul(Expr::Var(VarId(0)), Expr::int(4));
        let vars = HashMap::from([(VarId(0), Expr::int(2))]);

        assert_eq!(expr.substitute(&vars), Expr::int(8));
    }

    #[test]
    fn substitution_reaches_node_indices() {
        let expr = Expr::Node {
            node: NodeId(3),
            elem: Elem::Int,
            indices: vec![Expr::add(Expr::Var(VarId(0)), Expr::int(1))],
        };
        let vars = HashMap::from([(VarId(0), Expr::int(2))]);

        let substituted = expr.substitute(&vars);
        assert_eq!(substituted.to_string(), "%3[3]");
        assert_eq!(substituted.elem(), Elem::Int);

        let mut visited = Vec::new();
        substituted.visit_nodes(&mut |node, indices| visited.push((node, indices.to_vec())));
        assert_eq!(visited, vec![(NodeId(3), vec![Expr::int(3)])]);
    }

    #[test]
    fn comparison_is_boolean() {
        let expr = Expr::lower(Expr::Var(VarId(0)), Expr::int(3));
        assert_eq!(expr.elem(), Elem::Bool);
        assert_eq!(expr.to_string(), "(i0 < 3)");
    }

    #[test]
    fn cast_of_matching_type_is_a_no_op() {
        let expr = Expr::load(BufferId(0), Elem::Float, vec![Expr::Var(VarId(0))]);
        assert_eq!(expr.clone().cast(Elem::Float), expr);
        assert_eq!(Expr::int(3).cast(Elem::Float), Expr::float(3.0));
    }
}
