//! Ember - compilation backend for an embeddable expression evaluator
//!
//! # Overview
//!
//! Ember turns an already-parsed expression tree into compact bytecode and
//! runs it. Hosts describe what an expression may see through an
//! [`Environment`]: variables, functions, and overloaded operators on their
//! own named types. Typical uses:
//!
//! - Filter and routing rules
//! - Feature flags and conditional logic
//! - Business rules over host objects
//!
//! # Quick Start
//!
//! ```
//! use ember::{Environment, ExprBuilder, Type, Value};
//! use bumpalo::Bump;
//!
//! let arena = Bump::new();
//! let mut env = Environment::new();
//! env.declare_variable("x", Type::I32).unwrap();
//!
//! // (x * 2) + 0.5
//! let b = ExprBuilder::new(&arena);
//! let expr = b.binary(
//!     ember::syntax::BinaryOp::Add,
//!     b.binary(ember::syntax::BinaryOp::Mul, b.ident("x"), b.int(2)),
//!     b.double(0.5),
//! );
//!
//! let value = ember::evaluate(&env, &arena, expr, &[Value::I32(20)]).unwrap();
//! assert_eq!(value, Value::F64(40.5));
//! ```
//!
//! # Host Functions
//!
//! Functions are Rust closures over dynamic values. Arguments arrive
//! already converted to the declared parameter types.
//!
//! ```
//! use ember::{Environment, ExprBuilder, HostFunction, RuntimeError, Type, Value};
//! use bumpalo::Bump;
//!
//! let mut env = Environment::new();
//! env.register_function(
//!     "twice",
//!     &[Type::I64],
//!     Type::I64,
//!     HostFunction::new(|args| match args {
//!         [Value::I64(x)] => Ok(Value::I64(x * 2)),
//!         _ => Err(RuntimeError::Host("expected Int64".into())),
//!     }),
//! )
//! .unwrap();
//!
//! let arena = Bump::new();
//! let b = ExprBuilder::new(&arena);
//! let code = ember::compile(&env, &arena, b.call("twice", &[b.int(21)])).unwrap();
//! assert_eq!(ember::VM::execute(&code, &[]), Ok(Value::I64(42)));
//! ```

use bumpalo::Bump;

// Error rendering utilities
pub mod error_renderer;
pub use error_renderer::{CharSet, RenderConfig, render_error, render_error_to};

// Re-export public API from ember_core
pub use ember_core::api::{CompileOptions, Environment, EnvironmentError};
pub use ember_core::compiler::{BytecodeCompiler, CompileError, InternalError, ResolutionError};
pub use ember_core::diagnostics::MessageKey;
pub use ember_core::syntax::{self, Expr, ExprBuilder, Span};
pub use ember_core::types::{self, OperatorMethod, Type};
pub use ember_core::values::{self, HostFunction, Value};
pub use ember_core::vm::{Code, RuntimeError, VM};

/// Failure of [`evaluate`]: either the expression did not compile or it
/// failed while running.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Compile(#[from] CompileError),
    #[error(transparent)]
    Runtime(#[from] RuntimeError),
}

/// Compile `expr` with default options.
pub fn compile<'a>(
    env: &Environment<'a>,
    arena: &'a Bump,
    expr: &'a Expr<'a>,
) -> Result<Code<'a>, CompileError> {
    BytecodeCompiler::compile(env, arena, expr, CompileOptions::default())
}

/// Compile `expr` and run it once with `args`, in declaration order of the
/// environment's variables.
pub fn evaluate<'a>(
    env: &Environment<'a>,
    arena: &'a Bump,
    expr: &'a Expr<'a>,
    args: &[Value],
) -> Result<Value, Error> {
    let code = compile(env, arena, expr)?;
    Ok(VM::execute(&code, args)?)
}
