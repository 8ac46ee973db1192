pub mod dynamic;
pub mod function;

pub use dynamic::{Address, ArrayRef, Object, Value};
pub use function::{HostFunction, NativeFn};

#[cfg(test)]
mod dynamic_test;
