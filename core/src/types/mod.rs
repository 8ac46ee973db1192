//! Static types seen by the compiler.
//!
//! Primitive types are plain enum variants. Composite types (arrays) and
//! host-defined named types borrow from the arena that owns the expression,
//! so `Type` stays `Copy` and cheap to compare.

pub mod operators;
pub mod promotion;

use core::fmt;

pub use operators::{OperatorMethod, OperatorRegistry};
pub use promotion::{
    get_binary_result_type, get_bitwise_operand_type, is_implicitly_convertible,
    is_integral_type, is_numeric_type,
};

/// A static type.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Type<'a> {
    Bool,
    I8,
    U8,
    I16,
    U16,
    I32,
    U32,
    I64,
    U64,
    F32,
    F64,
    Str,
    /// One-dimensional array of the element type.
    Array(&'a Type<'a>),
    /// Host-defined type, identified by name. Values are `Value::Object`.
    Named(&'a str),
}

impl<'a> Type<'a> {
    /// The primitive code of this type, used as a conversion operand.
    pub fn code(self) -> TypeCode {
        match self {
            Type::Bool => TypeCode::Bool,
            Type::I8 => TypeCode::I8,
            Type::U8 => TypeCode::U8,
            Type::I16 => TypeCode::I16,
            Type::U16 => TypeCode::U16,
            Type::I32 => TypeCode::I32,
            Type::U32 => TypeCode::U32,
            Type::I64 => TypeCode::I64,
            Type::U64 => TypeCode::U64,
            Type::F32 => TypeCode::F32,
            Type::F64 => TypeCode::F64,
            Type::Str => TypeCode::Str,
            Type::Array(_) | Type::Named(_) => TypeCode::Object,
        }
    }

    /// Size in bytes for primitive numeric and boolean types.
    pub fn width(self) -> Option<u8> {
        match self {
            Type::Bool | Type::I8 | Type::U8 => Some(1),
            Type::I16 | Type::U16 => Some(2),
            Type::I32 | Type::U32 | Type::F32 => Some(4),
            Type::I64 | Type::U64 | Type::F64 => Some(8),
            _ => None,
        }
    }

    pub fn is_signed(self) -> bool {
        matches!(self, Type::I8 | Type::I16 | Type::I32 | Type::I64)
    }

    pub fn is_float(self) -> bool {
        matches!(self, Type::F32 | Type::F64)
    }

    /// Element type if this is an array.
    pub fn element(self) -> Option<Type<'a>> {
        match self {
            Type::Array(element) => Some(*element),
            _ => None,
        }
    }
}

impl fmt::Display for Type<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Type::Bool => f.write_str("Boolean"),
            Type::I8 => f.write_str("SByte"),
            Type::U8 => f.write_str("Byte"),
            Type::I16 => f.write_str("Int16"),
            Type::U16 => f.write_str("UInt16"),
            Type::I32 => f.write_str("Int32"),
            Type::U32 => f.write_str("UInt32"),
            Type::I64 => f.write_str("Int64"),
            Type::U64 => f.write_str("UInt64"),
            Type::F32 => f.write_str("Single"),
            Type::F64 => f.write_str("Double"),
            Type::Str => f.write_str("String"),
            Type::Array(element) => write!(f, "{}[]", element),
            Type::Named(name) => f.write_str(name),
        }
    }
}

/// Primitive type codes, one byte each in the instruction encoding.
#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TypeCode {
    Bool = 0x01,
    I8 = 0x02,
    U8 = 0x03,
    I16 = 0x04,
    U16 = 0x05,
    I32 = 0x06,
    U32 = 0x07,
    I64 = 0x08,
    U64 = 0x09,
    F32 = 0x0A,
    F64 = 0x0B,
    Str = 0x0C,
    Object = 0x0D,
}

impl TypeCode {
    pub fn from_byte(byte: u8) -> Option<TypeCode> {
        use TypeCode::*;
        Some(match byte {
            0x01 => Bool,
            0x02 => I8,
            0x03 => U8,
            0x04 => I16,
            0x05 => U16,
            0x06 => I32,
            0x07 => U32,
            0x08 => I64,
            0x09 => U64,
            0x0A => F32,
            0x0B => F64,
            0x0C => Str,
            0x0D => Object,
            _ => return None,
        })
    }
}

impl fmt::Display for TypeCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TypeCode::Bool => "bool",
            TypeCode::I8 => "i1",
            TypeCode::U8 => "u1",
            TypeCode::I16 => "i2",
            TypeCode::U16 => "u2",
            TypeCode::I32 => "i4",
            TypeCode::U32 => "u4",
            TypeCode::I64 => "i8",
            TypeCode::U64 => "u8",
            TypeCode::F32 => "r4",
            TypeCode::F64 => "r8",
            TypeCode::Str => "str",
            TypeCode::Object => "obj",
        };
        f.write_str(name)
    }
}
