//! Compilation backend for ember expressions.
//!
//! An expression tree ([`syntax`]) is typed against an
//! [`Environment`](api::Environment), lowered to bytecode by
//! [`BytecodeCompiler`](compiler::BytecodeCompiler) through an
//! [`Emitter`](emit::Emitter), and run by the [`VM`](vm::VM).

extern crate alloc;

pub mod api;
pub mod compiler;
pub mod diagnostics;
pub mod emit;
pub mod syntax;
pub mod types;
pub mod values;
pub mod vm;
