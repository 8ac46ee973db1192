//! Lowering of expression trees to bytecode.
//!
//! [`BytecodeCompiler`] types a tree against an [`Environment`](crate::api::Environment)
//! and emits it; `and` / `or` chains on Booleans are handed to a
//! [`ShortCircuitFrame`].

mod bytecode;
mod error;
pub mod short_circuit;

pub use bytecode::BytecodeCompiler;
pub use error::{CompileError, InternalError, ResolutionError};
pub use short_circuit::{
    BranchKey, BranchManager, ChainCompiler, Connective, FrameState, ShortCircuitFrame,
};

#[cfg(test)]
mod short_circuit_test;
