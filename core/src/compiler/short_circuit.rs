//! Short-circuit lowering of `and` / `or` chains.
//!
//! A chain of Boolean connectives is first flattened onto two stacks, an
//! operand stack and an operator stack, both in reverse evaluation order.
//! Lowering then pops one operand and the connective after it at a time,
//! evaluates the operand and branches when its value already decides the
//! connective: `brfalse` for `and`, `brtrue` for `or`.
//!
//! The branch target is found by skipping the connective's right subtree
//! and walking outwards. The first enclosing connective of the other kind
//! continues with the operand after it; if there is none the whole chain is
//! decided and the branch goes to a shared terminal that materializes the
//! constant result. All paths meet at one end label.
//!
//! ```text
//! a and b or c        ldarg a
//!                     brfalse L_c
//!                     ldarg b
//!                     brtrue L_true
//!               L_c:  ldarg c
//!                     br L_end
//!            L_true:  ldtrue
//!             L_end:
//! ```

use hashbrown::HashMap;
use smallvec::SmallVec;

use super::error::{CompileError, InternalError};
use crate::emit::{Emitter, Label};
use crate::syntax::{Expr, LogicalOp};
use crate::vm::OpCode;

/// One `and` / `or` node of a chain, with its children.
#[derive(Clone, Copy, Debug)]
pub struct Connective<'a> {
    pub op: LogicalOp,
    pub node: &'a Expr<'a>,
    pub left: &'a Expr<'a>,
    pub right: &'a Expr<'a>,
}

/// What the frame needs from the compiler driving it.
pub trait ChainCompiler<'a> {
    /// The connective `expr` represents if it continues a Boolean chain,
    /// `None` if it is an operand of the chain.
    fn connective(&self, expr: &'a Expr<'a>) -> Option<Connective<'a>>;

    fn emitter(&mut self) -> &mut Emitter<'a>;

    /// Emit code leaving the Boolean value of `operand` on the stack.
    fn compile_operand(&mut self, operand: &'a Expr<'a>) -> Result<(), CompileError>;
}

/// Identifies a branch target within one chain.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BranchKey<'a> {
    /// Start of an operand's evaluation.
    Operand(*const Expr<'a>),
    /// Pushes `true`.
    TrueTerminal,
    /// Pushes `false`.
    FalseTerminal,
    /// Where every path of the chain meets.
    End,
}

impl<'a> BranchKey<'a> {
    pub fn operand(expr: &'a Expr<'a>) -> Self {
        BranchKey::Operand(expr as *const Expr<'a>)
    }
}

/// Labels of one chain and the branches targeting each of them.
#[derive(Default)]
pub struct BranchManager<'a> {
    labels: HashMap<BranchKey<'a>, Label>,
    /// Instruction indices of the branches targeting each label.
    origins: HashMap<Label, SmallVec<[usize; 4]>>,
}

impl<'a> BranchManager<'a> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn find(&self, key: BranchKey<'a>) -> Option<Label> {
        self.labels.get(&key).copied()
    }

    pub fn label(&mut self, key: BranchKey<'a>, emitter: &mut Emitter<'a>) -> Label {
        *self
            .labels
            .entry(key)
            .or_insert_with(|| emitter.define_label())
    }

    /// Emit a branch to the label of `key`, defining it on first use.
    pub fn add_branch(
        &mut self,
        emitter: &mut Emitter<'a>,
        op: OpCode,
        key: BranchKey<'a>,
    ) -> Result<Label, InternalError> {
        let label = self.label(key, emitter);
        let source = emitter.emit_branch(op, label)?;
        self.origins.entry(label).or_default().push(source);
        Ok(label)
    }

    /// Mark the label of `key` here if any branch needs it.
    pub fn mark(
        &mut self,
        key: BranchKey<'a>,
        emitter: &mut Emitter<'a>,
    ) -> Result<Option<Label>, InternalError> {
        match self.find(key) {
            Some(label) => {
                emitter.mark_label(label)?;
                Ok(Some(label))
            }
            None => Ok(None),
        }
    }

    /// Branch instructions targeting `label`.
    pub fn origins(&self, label: Label) -> &[usize] {
        self.origins.get(&label).map(|o| o.as_slice()).unwrap_or(&[])
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    pub fn clear(&mut self) {
        self.labels.clear();
        self.origins.clear();
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum FrameState {
    #[default]
    Idle,
    /// Flattening the chain onto the stacks.
    Collecting,
    /// Emitting operands and branches.
    Branching,
    /// Terminals and end label emitted.
    Resolved,
}

/// Work state for lowering one chain.
///
/// A frame lowers one chain and must be cleared with
/// [`clear_temp_state`](ShortCircuitFrame::clear_temp_state) before it is
/// used for another.
#[derive(Default)]
pub struct ShortCircuitFrame<'a> {
    operands: Vec<&'a Expr<'a>>,
    operators: Vec<Connective<'a>>,
    branches: BranchManager<'a>,
    state: FrameState,
}

impl<'a> ShortCircuitFrame<'a> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> FrameState {
        self.state
    }

    pub fn branches(&self) -> &BranchManager<'a> {
        &self.branches
    }

    /// Return to `Idle`, dropping the stacks and labels of the last chain.
    pub fn clear_temp_state(&mut self) {
        self.operands.clear();
        self.operators.clear();
        self.branches.clear();
        self.state = FrameState::Idle;
    }

    /// Lower the chain rooted at `root`, leaving its Boolean value on the
    /// stack.
    pub fn lower<C>(&mut self, root: &'a Expr<'a>, compiler: &mut C) -> Result<(), CompileError>
    where
        C: ChainCompiler<'a>,
    {
        if self.state != FrameState::Idle {
            return Err(InternalError::FrameInUse.into());
        }
        let root = compiler
            .connective(root)
            .ok_or(InternalError::OperatorStackUnderflow)?;

        self.state = FrameState::Collecting;
        self.populate(root, &*compiler);
        tracing::debug!(
            operands = self.operands.len(),
            operators = self.operators.len(),
            "Lowering short-circuit chain"
        );

        self.state = FrameState::Branching;
        self.emit_chain(compiler)?;
        self.emit_terminals(compiler.emitter())?;
        self.state = FrameState::Resolved;
        Ok(())
    }

    fn populate<C: ChainCompiler<'a>>(&mut self, connective: Connective<'a>, compiler: &C) {
        match compiler.connective(connective.right) {
            Some(right) => self.populate(right, compiler),
            None => self.operands.push(connective.right),
        }
        self.operators.push(connective);
        match compiler.connective(connective.left) {
            Some(left) => self.populate(left, compiler),
            None => self.operands.push(connective.left),
        }
    }

    fn emit_chain<C: ChainCompiler<'a>>(&mut self, compiler: &mut C) -> Result<(), CompileError> {
        while let Some(connective) = self.operators.pop() {
            let operand = self
                .operands
                .pop()
                .ok_or(InternalError::OperandStackUnderflow)?;
            self.emit_operand(operand, compiler)?;

            let target = self.short_circuit_target(connective, &*compiler)?;
            let op = match connective.op {
                LogicalOp::And => OpCode::BrFalse,
                LogicalOp::Or => OpCode::BrTrue,
            };
            self.branches.add_branch(compiler.emitter(), op, target)?;
        }

        let last = self
            .operands
            .pop()
            .ok_or(InternalError::OperandStackUnderflow)?;
        self.emit_operand(last, compiler)?;
        self.branches
            .add_branch(compiler.emitter(), OpCode::Br, BranchKey::End)?;
        Ok(())
    }

    fn emit_operand<C: ChainCompiler<'a>>(
        &mut self,
        operand: &'a Expr<'a>,
        compiler: &mut C,
    ) -> Result<(), CompileError> {
        self.branches
            .mark(BranchKey::operand(operand), compiler.emitter())?;
        compiler.compile_operand(operand)
    }

    /// Where to go when the operand just emitted decides `connective`.
    fn short_circuit_target<C: ChainCompiler<'a>>(
        &self,
        connective: Connective<'a>,
        compiler: &C,
    ) -> Result<BranchKey<'a>, InternalError> {
        let mut operands = self.operands.clone();
        let mut operators = self.operators.clone();
        pop_right_child(connective, &mut operands, &mut operators, compiler)?;

        while let Some(outer) = operators.pop() {
            if outer.op != connective.op {
                let next = operands.pop().ok_or(InternalError::OperandStackUnderflow)?;
                return Ok(BranchKey::operand(next));
            }
            pop_right_child(outer, &mut operands, &mut operators, compiler)?;
        }

        Ok(match connective.op {
            LogicalOp::And => BranchKey::FalseTerminal,
            LogicalOp::Or => BranchKey::TrueTerminal,
        })
    }

    fn emit_terminals(&mut self, emitter: &mut Emitter<'a>) -> Result<(), InternalError> {
        let has_true = self.branches.find(BranchKey::TrueTerminal).is_some();
        if self.branches.mark(BranchKey::FalseTerminal, emitter)?.is_some() {
            emitter.emit_load_bool(false)?;
            if has_true {
                self.branches.add_branch(emitter, OpCode::Br, BranchKey::End)?;
            }
        }
        if self.branches.mark(BranchKey::TrueTerminal, emitter)?.is_some() {
            emitter.emit_load_bool(true)?;
        }
        let end = self.branches.label(BranchKey::End, emitter);
        emitter.mark_label(end)
    }
}

/// Drop the stack entries of `connective`'s right subtree.
fn pop_right_child<'a, C: ChainCompiler<'a>>(
    connective: Connective<'a>,
    operands: &mut Vec<&'a Expr<'a>>,
    operators: &mut Vec<Connective<'a>>,
    compiler: &C,
) -> Result<(), InternalError> {
    pop_child(connective.right, operands, operators, compiler)
}

fn pop_child<'a, C: ChainCompiler<'a>>(
    child: &'a Expr<'a>,
    operands: &mut Vec<&'a Expr<'a>>,
    operators: &mut Vec<Connective<'a>>,
    compiler: &C,
) -> Result<(), InternalError> {
    match compiler.connective(child) {
        Some(subtree) => {
            operators.pop().ok_or(InternalError::OperatorStackUnderflow)?;
            pop_child(subtree.left, operands, operators, compiler)?;
            pop_child(subtree.right, operands, operators, compiler)
        }
        None => operands
            .pop()
            .map(|_| ())
            .ok_or(InternalError::OperandStackUnderflow),
    }
}
