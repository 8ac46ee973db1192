mod code;
mod opcode;
#[allow(clippy::module_inception)]
mod vm;

pub use code::{Code, FunctionEntry};
pub use opcode::{FORMAT_VERSION, OpCode, OperandKind};
pub use vm::VM;

use ecow::EcoString;

/// Failures while executing compiled code.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RuntimeError {
    #[error("division by zero")]
    DivisionByZero {},
    #[error("index {index} is out of bounds for an array of length {len}")]
    IndexOutOfBounds { index: i64, len: usize },
    #[error("array length {0} is negative")]
    NegativeArrayLength(i32),
    #[error("null reference")]
    NullReference {},
    /// Error reported by a host function.
    #[error("{0}")]
    Host(EcoString),
    #[error("code was encoded with format version {found}, this VM runs version {expected}")]
    VersionMismatch { found: u8, expected: u8 },
    /// Code that the compiler would never produce.
    #[error("invalid program: {0}")]
    InvalidProgram(&'static str),
}
