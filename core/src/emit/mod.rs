//! Instruction emission.
//!
//! The [`Emitter`] records [`Instruction`]s with symbolic [`Label`] targets,
//! allocates local slots and interns table entries. Finalizing it picks the
//! branch encodings and produces a [`Code`](crate::vm::Code) buffer.

pub mod branch;
pub mod emitter;
pub mod instruction;

pub use branch::{BranchForm, BranchLayout, BranchRecord, LONG_BRANCH_THRESHOLD, is_long_branch};
pub use emitter::{Emitter, MAX_LOCALS, sync_labels};
pub use instruction::{Instruction, Label, LocalSlot, Operand};

#[cfg(test)]
mod emitter_test;
