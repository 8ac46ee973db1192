//! Tests for short-circuit lowering, driven by a minimal chain compiler
//! whose operands are Boolean arguments.

use bumpalo::Bump;
use pretty_assertions::assert_eq;

use crate::compiler::{
    BranchKey, BranchManager, ChainCompiler, CompileError, Connective, FrameState, InternalError,
    ShortCircuitFrame,
};
use crate::emit::{Emitter, Instruction, Operand};
use crate::syntax::{Expr, ExprBuilder, ExprKind, Literal, LogicalOp};
use crate::test_utils::init_test_logging;
use crate::values::Value;
use crate::vm::{Code, OpCode, VM};

const NAMES: [&str; 4] = ["a", "b", "c", "d"];

fn arg_index(name: &str) -> usize {
    NAMES
        .iter()
        .position(|n| *n == name)
        .unwrap_or_else(|| panic!("unknown operand {}", name))
}

/// Every `and` / `or` node is a connective; identifiers load arguments.
#[derive(Default)]
struct ArgChain<'a> {
    emitter: Emitter<'a>,
    compiled: Vec<&'a str>,
}

impl<'a> ChainCompiler<'a> for ArgChain<'a> {
    fn connective(&self, expr: &'a Expr<'a>) -> Option<Connective<'a>> {
        match expr.kind {
            ExprKind::Logical { op, left, right } => Some(Connective {
                op,
                node: expr,
                left,
                right,
            }),
            _ => None,
        }
    }

    fn emitter(&mut self) -> &mut Emitter<'a> {
        &mut self.emitter
    }

    fn compile_operand(&mut self, operand: &'a Expr<'a>) -> Result<(), CompileError> {
        match operand.kind {
            ExprKind::Ident(name) => {
                self.compiled.push(name);
                let index = arg_index(name) as u16;
                self.emitter
                    .emit(Instruction::with(OpCode::LdArg, Operand::U16(index)))?;
            }
            ExprKind::Literal(Literal::Bool(value)) => self.emitter.emit_load_bool(value)?,
            _ => panic!("unexpected operand {:?}", operand),
        }
        Ok(())
    }
}

fn lower_with<'a>(frame: &mut ShortCircuitFrame<'a>, root: &'a Expr<'a>) -> (Code<'a>, Vec<&'a str>) {
    let mut chain = ArgChain::default();
    frame.lower(root, &mut chain).unwrap();
    chain.emitter.emit_op(OpCode::Ret).unwrap();
    (chain.emitter.finalize().unwrap(), chain.compiled)
}

fn eval(expr: &Expr<'_>, values: &[bool]) -> bool {
    match expr.kind {
        ExprKind::Ident(name) => values[arg_index(name)],
        ExprKind::Literal(Literal::Bool(value)) => value,
        ExprKind::Logical {
            op: LogicalOp::And,
            left,
            right,
        } => eval(left, values) && eval(right, values),
        ExprKind::Logical {
            op: LogicalOp::Or,
            left,
            right,
        } => eval(left, values) || eval(right, values),
        _ => panic!("unexpected node {:?}", expr),
    }
}

/// Check the lowered chain against direct evaluation for every assignment.
fn assert_truth_table(root: &Expr<'_>, code: &Code<'_>) {
    for bits in 0..16u8 {
        let values: Vec<bool> = (0..4).map(|i| bits & (1 << i) != 0).collect();
        let args: Vec<Value> = values.iter().map(|&v| Value::Bool(v)).collect();
        assert_eq!(
            VM::execute(code, &args),
            Ok(Value::Bool(eval(root, &values))),
            "a={} b={} c={} d={}",
            values[0],
            values[1],
            values[2],
            values[3],
        );
    }
}

#[test]
fn test_truth_tables() {
    init_test_logging();

    let arena = Bump::new();
    let b = ExprBuilder::new(&arena);
    let (a_, b_, c_, d_) = (b.ident("a"), b.ident("b"), b.ident("c"), b.ident("d"));

    let chains = [
        b.and(a_, b_),
        b.or(a_, b_),
        b.or(b.and(a_, b_), c_),
        b.or(a_, b.and(b_, c_)),
        b.and(b.or(a_, b_), b.or(c_, d_)),
        b.and(b.and(a_, b.or(b_, c_)), d_),
        b.or(b.and(a_, b_), b.and(c_, d_)),
        b.and(a_, b.and(b_, b.and(c_, d_))),
        b.or(b.or(b.or(a_, b_), c_), d_),
        b.and(b.or(a_, b.and(b_, c_)), d_),
    ];
    for root in chains {
        let (code, compiled) = lower_with(&mut ShortCircuitFrame::new(), root);
        assert_truth_table(root, &code);

        // Every operand is compiled exactly once, in source order.
        let mut sorted = compiled.clone();
        sorted.sort();
        sorted.dedup();
        assert_eq!(sorted.len(), compiled.len(), "{}", code.disassemble());
        assert!(compiled.windows(2).all(|w| w[0] < w[1]), "{:?}", compiled);
    }
}

#[test]
fn test_constant_operands() {
    let arena = Bump::new();
    let b = ExprBuilder::new(&arena);
    let root = b.or(b.and(b.ident("a"), b.bool(false)), b.bool(true));
    let (code, _) = lower_with(&mut ShortCircuitFrame::new(), root);
    assert_truth_table(root, &code);
}

#[test]
fn test_mixed_chain_shape() {
    let arena = Bump::new();
    let b = ExprBuilder::new(&arena);
    // a and b or c
    let root = b.or(b.and(b.ident("a"), b.ident("b")), b.ident("c"));

    let mut frame = ShortCircuitFrame::new();
    let mut chain = ArgChain::default();
    frame.lower(root, &mut chain).unwrap();

    let ops: Vec<OpCode> = chain.emitter.instructions().iter().map(|i| i.op).collect();
    assert_eq!(
        ops,
        vec![
            OpCode::LdArg,
            OpCode::BrFalse,
            OpCode::LdArg,
            OpCode::BrTrue,
            OpCode::LdArg,
            OpCode::Br,
            OpCode::LdTrue,
        ]
    );

    // `a` false skips `b` and continues with `c`.
    let c_label = frame
        .branches()
        .find(BranchKey::Operand(root_right(root)))
        .unwrap();
    assert_eq!(chain.emitter.label_position(c_label), Some(4));
    assert_eq!(frame.branches().origins(c_label), &[1]);
    assert_eq!(frame.branches().find(BranchKey::FalseTerminal), None);
    assert_eq!(frame.state(), FrameState::Resolved);
}

fn root_right<'a>(root: &'a Expr<'a>) -> *const Expr<'a> {
    match root.kind {
        ExprKind::Logical { right, .. } => right as *const Expr<'a>,
        _ => panic!("not a connective"),
    }
}

#[test]
fn test_uniform_chain_shares_terminal() {
    let arena = Bump::new();
    let b = ExprBuilder::new(&arena);
    let root = b.or(b.or(b.ident("a"), b.ident("b")), b.ident("c"));

    let mut frame = ShortCircuitFrame::new();
    let mut chain = ArgChain::default();
    frame.lower(root, &mut chain).unwrap();

    let true_label = frame.branches().find(BranchKey::TrueTerminal).unwrap();
    assert_eq!(frame.branches().origins(true_label), &[1, 3]);
    // Only targets get labels: the true terminal and the end.
    assert_eq!(frame.branches().len(), 2);
    assert_eq!(frame.branches().find(BranchKey::operand(root)), None);
}

#[test]
fn test_both_terminals() {
    let arena = Bump::new();
    let b = ExprBuilder::new(&arena);
    // a or (b and c)
    let root = b.or(b.ident("a"), b.and(b.ident("b"), b.ident("c")));

    let mut frame = ShortCircuitFrame::new();
    let mut chain = ArgChain::default();
    frame.lower(root, &mut chain).unwrap();

    let ops: Vec<OpCode> = chain.emitter.instructions().iter().map(|i| i.op).collect();
    assert_eq!(
        ops,
        vec![
            OpCode::LdArg,
            OpCode::BrTrue,
            OpCode::LdArg,
            OpCode::BrFalse,
            OpCode::LdArg,
            OpCode::Br,
            OpCode::LdFalse,
            OpCode::Br,
            OpCode::LdTrue,
        ]
    );
    let end = frame.branches().find(BranchKey::End).unwrap();
    assert_eq!(frame.branches().origins(end), &[5, 7]);
    assert_eq!(chain.emitter.label_position(end), Some(9));
}

#[test]
fn test_reuse_after_clear_matches_fresh_frame() {
    let arena = Bump::new();
    let b = ExprBuilder::new(&arena);
    let first = b.and(b.or(b.ident("a"), b.ident("b")), b.ident("c"));
    let second = b.or(b.and(b.ident("a"), b.ident("d")), b.ident("b"));

    let mut reused = ShortCircuitFrame::new();
    lower_with(&mut reused, first);
    reused.clear_temp_state();
    assert_eq!(reused.state(), FrameState::Idle);
    assert!(reused.branches().is_empty());
    let (from_reused, _) = lower_with(&mut reused, second);

    let (from_fresh, _) = lower_with(&mut ShortCircuitFrame::new(), second);
    assert_eq!(from_reused.bytes, from_fresh.bytes);
    assert_eq!(from_reused.disassemble(), from_fresh.disassemble());
}

#[test]
fn test_reuse_without_clear_is_rejected() {
    let arena = Bump::new();
    let b = ExprBuilder::new(&arena);
    let root = b.and(b.ident("a"), b.ident("b"));

    let mut frame = ShortCircuitFrame::new();
    lower_with(&mut frame, root);

    let mut chain = ArgChain::default();
    assert_eq!(
        frame.lower(root, &mut chain),
        Err(CompileError::Internal(InternalError::FrameInUse))
    );
    assert!(chain.emitter.is_empty());
}

#[test]
fn test_root_must_be_connective() {
    let arena = Bump::new();
    let b = ExprBuilder::new(&arena);

    let mut frame = ShortCircuitFrame::new();
    let mut chain = ArgChain::default();
    assert_eq!(
        frame.lower(b.ident("a"), &mut chain),
        Err(CompileError::Internal(InternalError::OperatorStackUnderflow))
    );
    assert_eq!(frame.state(), FrameState::Idle);
}

#[test]
fn test_branch_manager() {
    let arena = Bump::new();
    let b = ExprBuilder::new(&arena);
    let operand = b.ident("a");

    let mut emitter = Emitter::new();
    let mut manager = BranchManager::new();
    assert_eq!(manager.mark(BranchKey::End, &mut emitter), Ok(None));

    let first = manager
        .add_branch(&mut emitter, OpCode::BrTrue, BranchKey::operand(operand))
        .unwrap();
    let second = manager
        .add_branch(&mut emitter, OpCode::BrFalse, BranchKey::operand(operand))
        .unwrap();
    assert_eq!(first, second);
    assert_eq!(manager.origins(first), &[0, 1]);
    assert_eq!(manager.len(), 1);

    assert_eq!(
        manager.mark(BranchKey::operand(operand), &mut emitter),
        Ok(Some(first))
    );
    assert_eq!(emitter.label_position(first), Some(2));

    manager.clear();
    assert!(manager.is_empty());
    assert_eq!(manager.origins(first), &[] as &[usize]);
}
