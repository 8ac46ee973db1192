//! Host-facing API: the compilation environment and options.
//!
//! # Example
//!
//! ```
//! use bumpalo::Bump;
//! use ember_core::api::{CompileOptions, Environment};
//! use ember_core::compiler::BytecodeCompiler;
//! use ember_core::syntax::{ComparisonOp, ExprBuilder};
//! use ember_core::types::Type;
//! use ember_core::values::Value;
//! use ember_core::vm::VM;
//!
//! let arena = Bump::new();
//! let mut env = Environment::new();
//! env.declare_variable("x", Type::I32).unwrap();
//!
//! let b = ExprBuilder::new(&arena);
//! let expr = b.or(
//!     b.compare(ComparisonOp::Gt, b.ident("x"), b.int(0)),
//!     b.compare(ComparisonOp::Lt, b.ident("x"), b.int(-10)),
//! );
//!
//! let code = BytecodeCompiler::compile(&env, &arena, expr, CompileOptions::default()).unwrap();
//! assert_eq!(VM::execute(&code, &[Value::I32(-20)]), Ok(Value::Bool(true)));
//! ```

mod environment;

pub use environment::{CompileOptions, Environment, EnvironmentError, FunctionSignature};
