use bumpalo::Bump;

use super::{
    BinaryOp, ComparisonOp, Expr, ExprKind, Literal, LogicalOp, ShiftOp, Span, UnaryOp,
};
use crate::types::Type;

/// Allocates expression nodes in an arena.
///
/// Nodes built through the shorthand methods get an empty span; use
/// [`at`](ExprBuilder::at) when positions matter.
#[derive(Clone, Copy)]
pub struct ExprBuilder<'a> {
    arena: &'a Bump,
}

impl<'a> ExprBuilder<'a> {
    pub fn new(arena: &'a Bump) -> Self {
        Self { arena }
    }

    pub fn arena(&self) -> &'a Bump {
        self.arena
    }

    pub fn at(&self, kind: ExprKind<'a>, span: Span) -> &'a Expr<'a> {
        self.arena.alloc(Expr { kind, span })
    }

    pub fn expr(&self, kind: ExprKind<'a>) -> &'a Expr<'a> {
        self.at(kind, Span::default())
    }

    pub fn list(&self, items: &[&'a Expr<'a>]) -> &'a [&'a Expr<'a>] {
        self.arena.alloc_slice_copy(items)
    }

    pub fn str(&self, s: &str) -> &'a str {
        self.arena.alloc_str(s)
    }

    /// Array type with `element` allocated in the arena.
    pub fn array_type(&self, element: Type<'a>) -> Type<'a> {
        Type::Array(self.arena.alloc(element))
    }

    // === Leaves ===

    pub fn literal(&self, literal: Literal<'a>) -> &'a Expr<'a> {
        self.expr(ExprKind::Literal(literal))
    }

    pub fn bool(&self, value: bool) -> &'a Expr<'a> {
        self.literal(Literal::Bool(value))
    }

    pub fn int(&self, value: i32) -> &'a Expr<'a> {
        self.literal(Literal::Int(value))
    }

    pub fn double(&self, value: f64) -> &'a Expr<'a> {
        self.literal(Literal::Double(value))
    }

    pub fn string(&self, value: &str) -> &'a Expr<'a> {
        let value = self.str(value);
        self.literal(Literal::Str(value))
    }

    pub fn ident(&self, name: &str) -> &'a Expr<'a> {
        let name = self.str(name);
        self.expr(ExprKind::Ident(name))
    }

    // === Operators ===

    pub fn unary(&self, op: UnaryOp, operand: &'a Expr<'a>) -> &'a Expr<'a> {
        self.expr(ExprKind::Unary { op, operand })
    }

    pub fn binary(&self, op: BinaryOp, left: &'a Expr<'a>, right: &'a Expr<'a>) -> &'a Expr<'a> {
        self.expr(ExprKind::Binary { op, left, right })
    }

    pub fn compare(
        &self,
        op: ComparisonOp,
        left: &'a Expr<'a>,
        right: &'a Expr<'a>,
    ) -> &'a Expr<'a> {
        self.expr(ExprKind::Comparison { op, left, right })
    }

    pub fn and(&self, left: &'a Expr<'a>, right: &'a Expr<'a>) -> &'a Expr<'a> {
        self.expr(ExprKind::Logical {
            op: LogicalOp::And,
            left,
            right,
        })
    }

    pub fn or(&self, left: &'a Expr<'a>, right: &'a Expr<'a>) -> &'a Expr<'a> {
        self.expr(ExprKind::Logical {
            op: LogicalOp::Or,
            left,
            right,
        })
    }

    pub fn xor(&self, left: &'a Expr<'a>, right: &'a Expr<'a>) -> &'a Expr<'a> {
        self.expr(ExprKind::Xor { left, right })
    }

    pub fn shift(&self, op: ShiftOp, left: &'a Expr<'a>, right: &'a Expr<'a>) -> &'a Expr<'a> {
        self.expr(ExprKind::Shift { op, left, right })
    }

    // === Compound ===

    pub fn conditional(
        &self,
        cond: &'a Expr<'a>,
        then_branch: &'a Expr<'a>,
        else_branch: &'a Expr<'a>,
    ) -> &'a Expr<'a> {
        self.expr(ExprKind::Conditional {
            cond,
            then_branch,
            else_branch,
        })
    }

    pub fn is_in(&self, operand: &'a Expr<'a>, items: &[&'a Expr<'a>]) -> &'a Expr<'a> {
        let items = self.list(items);
        self.expr(ExprKind::In { operand, items })
    }

    pub fn index(&self, array: &'a Expr<'a>, index: &'a Expr<'a>) -> &'a Expr<'a> {
        self.expr(ExprKind::Index { array, index })
    }

    pub fn array(&self, elements: &[&'a Expr<'a>]) -> &'a Expr<'a> {
        let elements = self.list(elements);
        self.expr(ExprKind::Array { elements })
    }

    pub fn call(&self, name: &str, args: &[&'a Expr<'a>]) -> &'a Expr<'a> {
        let name = self.str(name);
        let args = self.list(args);
        self.expr(ExprKind::Call { name, args })
    }

    pub fn cast(&self, expr: &'a Expr<'a>, target: Type<'a>) -> &'a Expr<'a> {
        self.expr(ExprKind::Cast { expr, target })
    }

    pub fn where_(&self, body: &'a Expr<'a>, bindings: &[(&str, &'a Expr<'a>)]) -> &'a Expr<'a> {
        let bindings = self.arena.alloc_slice_fill_iter(
            bindings
                .iter()
                .map(|&(name, value)| (&*self.arena.alloc_str(name), value)),
        );
        self.expr(ExprKind::Where { body, bindings })
    }
}
