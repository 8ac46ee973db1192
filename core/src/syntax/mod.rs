//! Expression trees handed to the compiler by a front end.
//!
//! Nodes are allocated in a [`bumpalo::Bump`] arena and reference their
//! children by shared reference, so the whole tree lives as long as the
//! arena. [`ExprBuilder`] is the convenient way to build one.

mod builder;

use core::fmt;
use core::ops::Range;

pub use builder::ExprBuilder;

use crate::types::Type;

/// Byte range of a node in the source text.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct Span {
    pub start: usize,
    pub end: usize,
}

impl Span {
    pub const fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }

    pub fn range(self) -> Range<usize> {
        self.start..self.end
    }
}

#[derive(Debug, PartialEq)]
pub struct Expr<'a> {
    pub kind: ExprKind<'a>,
    pub span: Span,
}

#[derive(Debug, PartialEq)]
pub enum ExprKind<'a> {
    Literal(Literal<'a>),
    Ident(&'a str),
    Unary {
        op: UnaryOp,
        operand: &'a Expr<'a>,
    },
    Binary {
        op: BinaryOp,
        left: &'a Expr<'a>,
        right: &'a Expr<'a>,
    },
    Comparison {
        op: ComparisonOp,
        left: &'a Expr<'a>,
        right: &'a Expr<'a>,
    },
    /// `and` / `or`: short-circuit on Booleans, bitwise on integers.
    Logical {
        op: LogicalOp,
        left: &'a Expr<'a>,
        right: &'a Expr<'a>,
    },
    Xor {
        left: &'a Expr<'a>,
        right: &'a Expr<'a>,
    },
    Shift {
        op: ShiftOp,
        left: &'a Expr<'a>,
        right: &'a Expr<'a>,
    },
    Conditional {
        cond: &'a Expr<'a>,
        then_branch: &'a Expr<'a>,
        else_branch: &'a Expr<'a>,
    },
    /// `operand in (items...)`
    In {
        operand: &'a Expr<'a>,
        items: &'a [&'a Expr<'a>],
    },
    Index {
        array: &'a Expr<'a>,
        index: &'a Expr<'a>,
    },
    Array {
        elements: &'a [&'a Expr<'a>],
    },
    Call {
        name: &'a str,
        args: &'a [&'a Expr<'a>],
    },
    Cast {
        expr: &'a Expr<'a>,
        target: Type<'a>,
    },
    /// `body where name = value, ...`; each binding sees the earlier ones.
    Where {
        body: &'a Expr<'a>,
        bindings: &'a [(&'a str, &'a Expr<'a>)],
    },
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Literal<'a> {
    Bool(bool),
    Int(i32),
    UInt(u32),
    Long(i64),
    ULong(u64),
    Single(f32),
    Double(f64),
    Str(&'a str),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum UnaryOp {
    Neg,
    Not,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Pow,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ComparisonOp {
    Eq,
    Neq,
    Lt,
    Gt,
    Le,
    Ge,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum LogicalOp {
    And,
    Or,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ShiftOp {
    Left,
    Right,
}

impl fmt::Display for UnaryOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            UnaryOp::Neg => "-",
            UnaryOp::Not => "not",
        })
    }
}

impl fmt::Display for BinaryOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Rem => "%",
            BinaryOp::Pow => "^",
        })
    }
}

impl fmt::Display for ComparisonOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ComparisonOp::Eq => "=",
            ComparisonOp::Neq => "<>",
            ComparisonOp::Lt => "<",
            ComparisonOp::Gt => ">",
            ComparisonOp::Le => "<=",
            ComparisonOp::Ge => ">=",
        })
    }
}

impl fmt::Display for LogicalOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            LogicalOp::And => "and",
            LogicalOp::Or => "or",
        })
    }
}

impl fmt::Display for ShiftOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ShiftOp::Left => "<<",
            ShiftOp::Right => ">>",
        })
    }
}
