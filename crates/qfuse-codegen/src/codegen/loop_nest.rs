use core::fmt;

use qfuse_tensor::Shape;
use serde::{Deserialize, Serialize};

use super::{BufferId, Elem, Expr, LocalId, VarId};

/// A statement of the loop-nest program.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Stmt {
    /// `for (var = 0; var < end; var++) { body }`
    For {
        /// Loop variable.
        var: VarId,
        /// Exclusive upper bound.
        end: usize,
        /// Loop body.
        body: Vec<Stmt>,
    },
    /// Write a value into an output buffer.
    Store {
        /// Output buffer.
        buffer: BufferId,
        /// One index per output dimension.
        indices: Vec<Expr>,
        /// Stored value.
        value: Expr,
    },
    /// Declare a local.
    Let {
        /// Declared local.
        local: LocalId,
        /// Type of the local.
        elem: Elem,
        /// Initial value.
        value: Expr,
    },
    /// Overwrite a local.
    Assign {
        /// Written local.
        local: LocalId,
        /// New value.
        value: Expr,
    },
    /// `local += value`
    Accumulate {
        /// Accumulator.
        local: LocalId,
        /// Added value.
        value: Expr,
    },
    /// Conditional block.
    If {
        /// Boolean condition.
        cond: Expr,
        /// Executed when the condition holds.
        then: Vec<Stmt>,
        /// Executed otherwise.
        otherwise: Vec<Stmt>,
    },
}

impl Stmt {
    /// Maximum number of nested loops in the statement.
    pub fn depth(&self) -> usize {
        match self {
            Stmt::For { body, .. } => 1 + depth(body),
            Stmt::If {
                then, otherwise, ..
            } => depth(then).max(depth(otherwise)),
            _ => 0,
        }
    }
}

fn depth(stmts: &[Stmt]) -> usize {
    stmts.iter().map(Stmt::depth).max().unwrap_or(0)
}

/// One independent loop nest iterating over an output domain.
#[derive(new, Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Nest {
    /// The iteration domain.
    pub shape: Shape,
    /// Top-level statements, the outermost loop first.
    pub body: Vec<Stmt>,
}

/// The synthesized program: a sequence of independent loop nests.
#[derive(new, Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LoopNest {
    /// Nests in execution order.
    pub nests: Vec<Nest>,
}

impl LoopNest {
    /// Number of independent loop nests.
    pub fn num_loop_nests(&self) -> usize {
        self.nests.len()
    }

    /// Maximum number of nested loops over all nests.
    pub fn max_depth(&self) -> usize {
        self.nests
            .iter()
            .map(|nest| depth(&nest.body))
            .max()
            .unwrap_or(0)
    }
}

impl fmt::Display for LoopNest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, nest) in self.nests.iter().enumerate() {
            writeln!(f, "// nest {i} over {}", nest.shape)?;
            write_block(f, &nest.body, 0)?;
        }
        Ok(())
    }
}

fn write_block(f: &mut fmt::Formatter<'_>, stmts: &[Stmt], level: usize) -> fmt::Result {
    for stmt in stmts {
        write_stmt(f, stmt, level)?;
    }
    Ok(())
}

fn write_stmt(f: &mut fmt::Formatter<'_>, stmt: &Stmt, level: usize) -> fmt::Result {
    let indent = "  ".repeat(level);
    match stmt {
        Stmt::For { var, end, body } => {
            writeln!(
                f,
                "{indent}for (int64_t {var} = 0; {var} < {end}; {var}++) {{"
            )?;
            write_block(f, body, level + 1)?;
            writeln!(f, "{indent}}}")
        }
        Stmt::Store {
            buffer,
            indices,
            value,
        } => {
            write!(f, "{indent}{buffer}")?;
            for index in indices {
                write!(f, "[{index}]")?;
            }
            writeln!(f, " = {value};")
        }
        Stmt::Let { local, elem, value } => writeln!(f, "{indent}{elem} {local} = {value};"),
        Stmt::Assign { local, value } => writeln!(f, "{indent}{local} = {value};"),
        Stmt::Accumulate { local, value } => writeln!(f, "{indent}{local} += {value};"),
        Stmt::If {
            cond,
            then,
            otherwise,
        } => {
            writeln!(f, "{indent}if ({cond}) {{")?;
            write_block(f, then, level + 1)?;
            if !otherwise.is_empty() {
                writeln!(f, "{indent}}} else {{")?;
                write_block(f, otherwise, level + 1)?;
            }
            writeln!(f, "{indent}}}")
        }
    }
}
