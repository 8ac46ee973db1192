//! Host functions callable from compiled code.
//!
//! Both environment functions and overloaded operators are host functions:
//! the compiler records them in the code's function table and emits `Call`
//! with the table index.

use alloc::sync::Arc;
use core::fmt;

use super::dynamic::Value;
use crate::vm::RuntimeError;

/// Signature expected for Rust closures exposed to expressions.
///
/// Arguments arrive already converted to the declared parameter types.
pub type NativeFn = dyn Fn(&[Value]) -> Result<Value, RuntimeError> + Send + Sync;

/// Shared handle to a native function.
#[derive(Clone)]
pub struct HostFunction {
    func: Arc<NativeFn>,
}

impl HostFunction {
    pub fn new<F>(func: F) -> Self
    where
        F: Fn(&[Value]) -> Result<Value, RuntimeError> + Send + Sync + 'static,
    {
        Self {
            func: Arc::new(func),
        }
    }

    #[inline]
    pub fn call(&self, args: &[Value]) -> Result<Value, RuntimeError> {
        (self.func)(args)
    }

    /// Whether both handles share the same closure.
    pub fn ptr_eq(&self, other: &HostFunction) -> bool {
        Arc::ptr_eq(&self.func, &other.func)
    }
}

impl fmt::Debug for HostFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("HostFunction(..)")
    }
}
