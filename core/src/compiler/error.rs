//! Compilation errors.
//!
//! [`ResolutionError`]s describe expressions the environment cannot compile
//! (no conversion, no operator, unknown name) and are reported to the user.
//! [`InternalError`]s are defects in the compiler or in the registered
//! environment. Both abort compilation.

use core::fmt;

use ecow::EcoString;
use smallvec::SmallVec;

use crate::diagnostics::{MessageKey, format_message};
use crate::emit::Label;
use crate::syntax::Span;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CompileError {
    #[error(transparent)]
    Resolution(#[from] ResolutionError),
    #[error("internal compiler error: {0}")]
    Internal(#[from] InternalError),
}

impl CompileError {
    /// Source location of a resolution failure.
    pub fn span(&self) -> Option<Span> {
        match self {
            CompileError::Resolution(error) => error.span,
            CompileError::Internal(_) => None,
        }
    }

    pub fn is_internal(&self) -> bool {
        matches!(self, CompileError::Internal(_))
    }
}

/// A user-facing compile failure: a message key plus positional arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolutionError {
    pub key: MessageKey,
    pub args: SmallVec<[EcoString; 3]>,
    pub span: Option<Span>,
}

impl ResolutionError {
    pub fn new(key: MessageKey, args: &[&dyn fmt::Display], span: Span) -> Self {
        Self {
            key,
            args: args.iter().map(|arg| ecow::eco_format!("{}", arg)).collect(),
            span: Some(span),
        }
    }

    /// The formatted diagnostic text.
    pub fn message(&self) -> String {
        let args: SmallVec<[&str; 3]> = self.args.iter().map(EcoString::as_str).collect();
        format_message(self.key, &args)
    }
}

impl fmt::Display for ResolutionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message())
    }
}

impl core::error::Error for ResolutionError {}

/// Consistency violations in the compiler or the environment.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum InternalError {
    #[error("label {0} was never marked")]
    UnresolvedLabel(Label),
    #[error("label {0} is already marked")]
    LabelAlreadyMarked(Label),
    #[error("label {0} was not defined by this emitter")]
    UnknownLabel(Label),
    #[error("{candidates} candidates for `{name}` from `{source_type}` to `{dest_type}`")]
    AmbiguousOperator {
        name: EcoString,
        source_type: EcoString,
        dest_type: EcoString,
        candidates: usize,
    },
    #[error("short-circuit operator stack is empty")]
    OperatorStackUnderflow,
    #[error("short-circuit operand stack is empty")]
    OperandStackUnderflow,
    #[error("short-circuit frame reused without clearing")]
    FrameInUse,
    #[error("local {0} is not allocated")]
    UnallocatedLocal(u32),
    #[error("local index {0} is out of range")]
    LocalOutOfRange(u32),
    #[error("more than {0} locals")]
    TooManyLocals(usize),
    #[error("`{op}` does not take operand {operand}")]
    OperandMismatch { op: &'static str, operand: EcoString },
    #[error("{0} table is full")]
    TableOverflow(&'static str),
    #[error("parallel path spliced after its parent changed")]
    StaleFork,
    #[error("node at {}..{} emitted before it was typed", .0.start, .0.end)]
    UntypedNode(Span),
}
