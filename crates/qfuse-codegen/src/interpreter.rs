use crate::codegen::{
    BinaryOperator, BufferDecl, BufferId, Elem, Expr, LoopNest, Scalar, Stmt, UnaryOperator,
    VarId,
};

/// Content of a buffer during one execution.
#[derive(Debug)]
pub(crate) enum Storage<'a> {
    F32(&'a [f32]),
    I8(&'a [i8]),
    U8(&'a [u8]),
    F64(Vec<f64>),
    OutFloat(Vec<f32>),
    OutInt(Vec<i64>),
}

/// Execute a loop-nest program over bound buffers.
///
/// Programs are well typed by construction; a type error is a compiler bug and
/// panics.
pub(crate) struct Interpreter<'a, 'b> {
    buffers: &'b [BufferDecl],
    storage: Vec<Storage<'a>>,
    vars: Vec<i64>,
    locals: Vec<Scalar>,
}

impl<'a, 'b> Interpreter<'a, 'b> {
    pub(crate) fn new(
        buffers: &'b [BufferDecl],
        storage: Vec<Storage<'a>>,
        num_vars: usize,
        num_locals: usize,
    ) -> Self {
        Self {
            buffers,
            storage,
            vars: vec![0; num_vars],
            locals: vec![Scalar::Int(0); num_locals],
        }
    }

    pub(crate) fn run(mut self, program: &LoopNest) -> Vec<Storage<'a>> {
        for nest in program.nests.iter() {
            self.block(&nest.body);
        }
        self.storage
    }

    fn block(&mut self, stmts: &[Stmt]) {
        for stmt in stmts {
            self.stmt(stmt);
        }
    }

    fn stmt(&mut self, stmt: &Stmt) {
        match stmt {
            Stmt::For { var, end, body } => {
                for i in 0..*end {
                    self.vars[var.0 as usize] = i as i64;
                    self.block(body);
                }
            }
            Stmt::Store {
                buffer,
                indices,
                value,
            } => {
                let offset = self.offset(*buffer, indices);
                let value = self.eval(value);
                match (&mut self.storage[buffer.0 as usize], value) {
                    (Storage::OutFloat(values), Scalar::Float(value)) => {
                        values[offset] = value as f32
                    }
                    (Storage::OutInt(values), Scalar::Int(value)) => values[offset] = value,
                    (storage, value) => {
                        unreachable!("Can't store {value:?} into {buffer} ({storage:?})")
                    }
                }
            }
            Stmt::Let { local, value, .. } | Stmt::Assign { local, value } => {
                self.locals[local.0 as usize] = self.eval(value);
            }
            Stmt::Accumulate { local, value } => {
                let value = self.eval(value);
                let acc = &mut self.locals[local.0 as usize];
                *acc = binary(BinaryOperator::Add, *acc, value);
            }
            Stmt::If {
                cond,
                then,
                otherwise,
            } => match self.eval(cond) {
                Scalar::Bool(true) => self.block(then),
                Scalar::Bool(false) => self.block(otherwise),
                other => unreachable!("Condition evaluates to {other:?}"),
            },
        }
    }

    fn offset(&mut self, buffer: BufferId, indices: &[Expr]) -> usize {
        let buffers = self.buffers;
        let decl = &buffers[buffer.0 as usize];
        let mut offset = 0;
        for (dim, index) in indices.iter().enumerate() {
            let index = match self.eval(index) {
                Scalar::Int(index) => index,
                other => unreachable!("Index evaluates to {other:?}"),
            };
            debug_assert!(
                index >= 0 && (index as usize) < decl.shape.dims[dim],
                "Index {index} out of bounds for dim {dim} of {buffer}"
            );
            offset += index as usize * decl.strides[dim];
        }
        offset
    }

    fn eval(&mut self, expr: &Expr) -> Scalar {
        match expr {
            Expr::Constant(value) => *value,
            Expr::Var(var) => Scalar::Int(self.vars[var.0 as usize]),
            Expr::Local(local, _) => self.locals[local.0 as usize],
            Expr::Load {
                buffer,
                elem,
                indices,
            } => {
                let offset = self.offset(*buffer, indices);
                match (&self.storage[buffer.0 as usize], elem) {
                    (Storage::F32(values), Elem::Float) => Scalar::Float(values[offset] as f64),
                    (Storage::F64(values), Elem::Float) => Scalar::Float(values[offset]),
                    (Storage::OutFloat(values), Elem::Float) => {
                        Scalar::Float(values[offset] as f64)
                    }
                    (Storage::I8(values), Elem::Int) => Scalar::Int(values[offset] as i64),
                    (Storage::U8(values), Elem::Int) => Scalar::Int(values[offset] as i64),
                    (Storage::OutInt(values), Elem::Int) => Scalar::Int(values[offset]),
                    (storage, elem) => unreachable!("Can't load {elem} from {storage:?}"),
                }
            }
            Expr::Binary {
                op: BinaryOperator::And,
                lhs,
                rhs,
            } => match self.eval(lhs) {
                Scalar::Bool(false) => Scalar::Bool(false),
                lhs => binary(BinaryOperator::And, lhs, self.eval(rhs)),
            },
            Expr::Binary { op, lhs, rhs } => {
                let lhs = self.eval(lhs);
                let rhs = self.eval(rhs);
                binary(*op, lhs, rhs)
            }
            Expr::Unary { op, input } => {
                let input = self.eval(input);
                match (op, input) {
                    (UnaryOperator::Cast(elem), value) => cast(value, *elem),
                    (UnaryOperator::Round(mode), Scalar::Float(value)) => {
                        Scalar::Float(mode.round(value))
                    }
                    (op, value) => unreachable!("{op:?} isn't defined for {value:?}"),
                }
            }
            Expr::Clamp { input, min, max } => {
                let input = self.eval(input);
                let min = self.eval(min);
                let max = self.eval(max);
                match (input, min, max) {
                    (Scalar::Float(x), Scalar::Float(a), Scalar::Float(b)) => {
                        Scalar::Float(x.clamp(a, b))
                    }
                    (Scalar::Int(x), Scalar::Int(a), Scalar::Int(b)) => Scalar::Int(x.clamp(a, b)),
                    other => unreachable!("Clamp isn't defined for {other:?}"),
                }
            }
            Expr::Select {
                cond,
                then,
                otherwise,
            } => match self.eval(cond) {
                Scalar::Bool(true) => self.eval(then),
                Scalar::Bool(false) => self.eval(otherwise),
                other => unreachable!("Condition evaluates to {other:?}"),
            },
            Expr::Node { node, .. } => unreachable!("{node} is resolved by the synthesizer"),
            Expr::Sum { ranges, body } => {
                let mut acc = body.elem().zero();
                self.sum(ranges, body, &mut acc);
                acc
            }
        }
    }

    fn sum(&mut self, ranges: &[(VarId, usize)], body: &Expr, acc: &mut Scalar) {
        match ranges.split_first() {
            Some(((var, end), rest)) => {
                for i in 0..*end {
                    self.vars[var.0 as usize] = i as i64;
                    self.sum(rest, body, acc);
                }
            }
            None => {
                let value = self.eval(body);
                *acc = binary(BinaryOperator::Add, *acc, value);
            }
        }
    }
}

fn binary(op: BinaryOperator, lhs: Scalar, rhs: Scalar) -> Scalar {
    use BinaryOperator::*;
    use Scalar::{Bool, Float, Int};

    match (op, lhs, rhs) {
        (Add, Float(a), Float(b)) => Float(a + b),
        (Add, Int(a), Int(b)) => Int(a + b),
        (Sub, Float(a), Float(b)) => Float(a - b),
        (Sub, Int(a), Int(b)) => Int(a - b),
        (Mul, Float(a), Float(b)) => Float(a * b),
        (Mul, Int(a), Int(b)) => Int(a * b),
        (Div, Float(a), Float(b)) => Float(a / b),
        (Div, Int(a), Int(b)) => Int(a / b),
        (Max, Float(a), Float(b)) => Float(a.max(b)),
        (Max, Int(a), Int(b)) => Int(a.max(b)),
        (Min, Float(a), Float(b)) => Float(a.min(b)),
        (Min, Int(a), Int(b)) => Int(a.min(b)),
        (Lower, Float(a), Float(b)) => Bool(a < b),
        (Lower, Int(a), Int(b)) => Bool(a < b),
        (GreaterEqual, Float(a), Float(b)) => Bool(a >= b),
        (GreaterEqual, Int(a), Int(b)) => Bool(a >= b),
        (And, Bool(a), Bool(b)) => Bool(a && b),
        (op, lhs, rhs) => unreachable!("{op:?} isn't defined for {lhs:?} and {rhs:?}"),
    }
}

fn cast(value: Scalar, elem: Elem) -> Scalar {
    match (value, elem) {
        (Scalar::Float(value), Elem::Int) => Scalar::Int(value as i64),
        (Scalar::Int(value), Elem::Float) => Scalar::Float(value as f64),
        (Scalar::Bool(value), Elem::Int) => Scalar::Int(value as i64),
        (Scalar::Bool(value), Elem::Float) => Scalar::Float(value as i64 as f64),
        (value, _) if value.elem() == elem => value,
        (value, elem) => unreachable!("Can't cast {value:?} to {elem}"),
    }
}
