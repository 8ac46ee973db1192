//! Names and operators visible to compiled expressions.

use ecow::EcoString;
use hashbrown::HashMap;
use static_assertions::assert_impl_all;

use crate::types::operators::DuplicateOperator;
use crate::types::{OperatorMethod, OperatorRegistry, Type};
use crate::values::HostFunction;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EnvironmentError {
    #[error("variable `{0}` is already declared")]
    DuplicateVariable(EcoString),
    #[error("function `{0}` is already declared")]
    DuplicateFunction(EcoString),
    #[error("more than {} variables", u16::MAX as usize + 1)]
    TooManyVariables,
    #[error(transparent)]
    DuplicateOperator(#[from] DuplicateOperator),
}

/// A host function callable by name.
#[derive(Clone, Debug)]
pub struct FunctionSignature<'a> {
    pub params: Vec<Type<'a>>,
    pub ret: Type<'a>,
    pub function: HostFunction,
}

/// The resolution environment of a compilation: variables (passed as
/// arguments when executing), host functions and overloaded operators.
///
/// Compiling the same expression against the same environment always
/// produces the same code.
#[derive(Clone, Default)]
pub struct Environment<'a> {
    variables: Vec<(EcoString, Type<'a>)>,
    functions: HashMap<EcoString, FunctionSignature<'a>>,
    operators: OperatorRegistry<'a>,
}

assert_impl_all!(Environment<'static>: Send, Sync);

impl<'a> Environment<'a> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a variable and return its argument index.
    pub fn declare_variable(&mut self, name: &str, ty: Type<'a>) -> Result<u16, EnvironmentError> {
        if self.variable(name).is_some() {
            return Err(EnvironmentError::DuplicateVariable(name.into()));
        }
        let index =
            u16::try_from(self.variables.len()).map_err(|_| EnvironmentError::TooManyVariables)?;
        self.variables.push((name.into(), ty));
        Ok(index)
    }

    /// Argument index and type of `name`.
    pub fn variable(&self, name: &str) -> Option<(u16, Type<'a>)> {
        self.variables
            .iter()
            .position(|(declared, _)| declared == name)
            .map(|index| (index as u16, self.variables[index].1))
    }

    pub fn variables(&self) -> impl Iterator<Item = (&str, Type<'a>)> {
        self.variables.iter().map(|(name, ty)| (name.as_str(), *ty))
    }

    pub fn register_function(
        &mut self,
        name: &str,
        params: &[Type<'a>],
        ret: Type<'a>,
        function: HostFunction,
    ) -> Result<(), EnvironmentError> {
        if self.functions.contains_key(name) {
            return Err(EnvironmentError::DuplicateFunction(name.into()));
        }
        self.functions.insert(
            name.into(),
            FunctionSignature {
                params: params.to_vec(),
                ret,
                function,
            },
        );
        Ok(())
    }

    pub fn function(&self, name: &str) -> Option<&FunctionSignature<'a>> {
        self.functions.get(name)
    }

    /// Declare an overloaded operator on `declaring_type`.
    pub fn register_operator(
        &mut self,
        declaring_type: Type<'a>,
        method: OperatorMethod<'a>,
    ) -> Result<(), EnvironmentError> {
        Ok(self.operators.register(declaring_type, method)?)
    }

    pub fn operators(&self) -> &OperatorRegistry<'a> {
        &self.operators
    }
}

/// Limits applied while compiling.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CompileOptions {
    /// Most local slots one expression may allocate.
    pub max_locals: usize,
}

impl Default for CompileOptions {
    fn default() -> Self {
        Self {
            max_locals: u16::MAX as usize,
        }
    }
}
