//! Overloaded operator registry.
//!
//! Host-defined types expose operators as static methods named
//! `operator_<Name>` (`operator_Addition`, `operator_Implicit`, ...). The
//! registry is filled while the environment is set up and queried by the
//! compiler as a plain table lookup. Lookups never apply conversions: the
//! caller converts operands first and then asks for an exact signature.

use core::fmt;

use ecow::EcoString;
use hashbrown::HashMap;
use smallvec::SmallVec;

use super::Type;
use crate::compiler::InternalError;
use crate::values::HostFunction;

/// Prefix shared by every operator method name.
pub const OPERATOR_PREFIX: &str = "operator_";

/// A static operator method declared by a host type.
#[derive(Clone)]
pub struct OperatorMethod<'a> {
    /// Full method name, e.g. `operator_Addition`.
    pub name: EcoString,
    pub params: Vec<Type<'a>>,
    pub ret: Type<'a>,
    pub function: HostFunction,
}

impl<'a> OperatorMethod<'a> {
    pub fn new(
        operator: &str,
        params: &[Type<'a>],
        ret: Type<'a>,
        function: HostFunction,
    ) -> Self {
        let mut name = EcoString::from(OPERATOR_PREFIX);
        name.push_str(operator);
        Self {
            name,
            params: params.to_vec(),
            ret,
            function,
        }
    }

    /// Case-insensitive match against `operator_<operator>`.
    fn is_named(&self, operator: &str) -> bool {
        let name = self.name.as_str();
        name.len() == OPERATOR_PREFIX.len() + operator.len()
            && name
                .get(..OPERATOR_PREFIX.len())
                .is_some_and(|prefix| prefix.eq_ignore_ascii_case(OPERATOR_PREFIX))
            && name
                .get(OPERATOR_PREFIX.len()..)
                .is_some_and(|rest| rest.eq_ignore_ascii_case(operator))
    }

    fn same_signature(&self, other: &OperatorMethod<'a>) -> bool {
        self.name.eq_ignore_ascii_case(&other.name) && self.params == other.params
    }
}

impl fmt::Debug for OperatorMethod<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}(", self.name)?;
        for (i, param) in self.params.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{}", param)?;
        }
        write!(f, ") -> {}", self.ret)
    }
}

/// Registering a second method with an identical name and parameter list.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("operator `{name}` with the same parameters is already declared on `{declaring_type}`")]
pub struct DuplicateOperator {
    pub name: EcoString,
    pub declaring_type: EcoString,
}

/// Operators declared per type.
#[derive(Clone, Default)]
pub struct OperatorRegistry<'a> {
    declared: HashMap<Type<'a>, Vec<OperatorMethod<'a>>>,
}

impl<'a> OperatorRegistry<'a> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare `method` on `declaring_type`.
    pub fn register(
        &mut self,
        declaring_type: Type<'a>,
        method: OperatorMethod<'a>,
    ) -> Result<(), DuplicateOperator> {
        let methods = self.declared.entry(declaring_type).or_default();
        if methods.iter().any(|m| m.same_signature(&method)) {
            return Err(DuplicateOperator {
                name: method.name,
                declaring_type: ecow::eco_format!("{}", declaring_type),
            });
        }
        tracing::trace!(ty = %declaring_type, method = ?method, "Registered operator");
        methods.push(method);
        Ok(())
    }

    /// All operators declared on `ty`.
    pub fn methods_of(&self, ty: Type<'a>) -> &[OperatorMethod<'a>] {
        self.declared.get(&ty).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Find a conversion-style operator: named `operator_<name>`, returning
    /// exactly `dest` and taking `source` as its first parameter.
    ///
    /// `source` is searched first and `dest` only if `source` declares no
    /// match. More than one match on the searched type is a defect in the
    /// registered environment and is reported as an internal error; no
    /// tie-break is attempted.
    pub fn find_simple_overloaded_operator(
        &self,
        name: &str,
        source: Type<'a>,
        dest: Type<'a>,
    ) -> Result<Option<&OperatorMethod<'a>>, InternalError> {
        let mut found = self.simple_matches(source, name, source, dest);
        if found.is_empty() && dest != source {
            found = self.simple_matches(dest, name, source, dest);
        }

        match found.as_slice() {
            [] => Ok(None),
            [method] => Ok(Some(*method)),
            candidates => Err(InternalError::AmbiguousOperator {
                name: ecow::eco_format!("{}{}", OPERATOR_PREFIX, name),
                source_type: ecow::eco_format!("{}", source),
                dest_type: ecow::eco_format!("{}", dest),
                candidates: candidates.len(),
            }),
        }
    }

    fn simple_matches(
        &self,
        declaring_type: Type<'a>,
        name: &str,
        source: Type<'a>,
        dest: Type<'a>,
    ) -> SmallVec<[&OperatorMethod<'a>; 2]> {
        self.methods_of(declaring_type)
            .iter()
            .filter(|m| m.is_named(name) && m.ret == dest && m.params.first() == Some(&source))
            .collect()
    }

    /// Find `operator_<name>` declared on `declaring_type` whose parameter
    /// list equals `argument_types` exactly.
    pub fn find_overloaded_operator(
        &self,
        name: &str,
        declaring_type: Type<'a>,
        argument_types: &[Type<'a>],
    ) -> Option<&OperatorMethod<'a>> {
        self.methods_of(declaring_type)
            .iter()
            .find(|m| m.is_named(name) && m.params.as_slice() == argument_types)
    }
}
