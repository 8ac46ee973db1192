//! Runtime values manipulated by the VM.

use alloc::rc::Rc;
use core::cell::RefCell;
use core::fmt;

use ecow::EcoString;

use crate::types::TypeCode;

/// A dynamically typed runtime value.
///
/// Numeric values keep their exact width so that the element-typed array
/// instructions and conversions can be checked against what the compiler
/// promised.
#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    I8(i8),
    U8(u8),
    I16(i16),
    U16(u16),
    I32(i32),
    U32(u32),
    I64(i64),
    U64(u64),
    F32(f32),
    F64(f64),
    Str(EcoString),
    Array(ArrayRef),
    Object(Object),
    /// Managed reference produced by `Ldloca` / `Ldelema`, consumed by `Ldobj`.
    Address(Address),
}

/// Numeric payload widened for conversions.
#[derive(Clone, Copy)]
enum Numeric {
    Int(i128),
    Float(f64),
}

impl Value {
    /// The zero value stored in fresh locals and array elements.
    pub fn default_for(code: TypeCode) -> Value {
        match code {
            TypeCode::Bool => Value::Bool(false),
            TypeCode::I8 => Value::I8(0),
            TypeCode::U8 => Value::U8(0),
            TypeCode::I16 => Value::I16(0),
            TypeCode::U16 => Value::U16(0),
            TypeCode::I32 => Value::I32(0),
            TypeCode::U32 => Value::U32(0),
            TypeCode::I64 => Value::I64(0),
            TypeCode::U64 => Value::U64(0),
            TypeCode::F32 => Value::F32(0.0),
            TypeCode::F64 => Value::F64(0.0),
            TypeCode::Str => Value::Str(EcoString::new()),
            TypeCode::Object => Value::Null,
        }
    }

    pub fn str(s: &str) -> Value {
        Value::Str(EcoString::from(s))
    }

    pub fn type_code(&self) -> Option<TypeCode> {
        Some(match self {
            Value::Bool(_) => TypeCode::Bool,
            Value::I8(_) => TypeCode::I8,
            Value::U8(_) => TypeCode::U8,
            Value::I16(_) => TypeCode::I16,
            Value::U16(_) => TypeCode::U16,
            Value::I32(_) => TypeCode::I32,
            Value::U32(_) => TypeCode::U32,
            Value::I64(_) => TypeCode::I64,
            Value::U64(_) => TypeCode::U64,
            Value::F32(_) => TypeCode::F32,
            Value::F64(_) => TypeCode::F64,
            Value::Str(_) => TypeCode::Str,
            Value::Null | Value::Array(_) | Value::Object(_) => TypeCode::Object,
            Value::Address(_) => return None,
        })
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_i32(&self) -> Option<i32> {
        match self {
            Value::I32(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::I64(v) => Some(*v),
            _ => None,
        }
    }

    /// Any integer value, widened without loss.
    pub fn as_integer(&self) -> Option<i128> {
        match self.numeric()? {
            Numeric::Int(v) => Some(v),
            Numeric::Float(_) => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::F64(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s.as_str()),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&ArrayRef> {
        match self {
            Value::Array(array) => Some(array),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&Object> {
        match self {
            Value::Object(object) => Some(object),
            _ => None,
        }
    }

    fn numeric(&self) -> Option<Numeric> {
        Some(match *self {
            Value::I8(v) => Numeric::Int(v as i128),
            Value::U8(v) => Numeric::Int(v as i128),
            Value::I16(v) => Numeric::Int(v as i128),
            Value::U16(v) => Numeric::Int(v as i128),
            Value::I32(v) => Numeric::Int(v as i128),
            Value::U32(v) => Numeric::Int(v as i128),
            Value::I64(v) => Numeric::Int(v as i128),
            Value::U64(v) => Numeric::Int(v as i128),
            Value::F32(v) => Numeric::Float(v as f64),
            Value::F64(v) => Numeric::Float(v),
            _ => return None,
        })
    }

    /// Numeric conversion with truncating (`as`) semantics.
    ///
    /// Returns `None` if `self` is not numeric or `code` is not a numeric
    /// type code. Converting to the value's own type is the identity.
    pub fn convert(&self, code: TypeCode) -> Option<Value> {
        if self.type_code() == Some(code) {
            return Some(self.clone());
        }
        let converted = match self.numeric()? {
            Numeric::Int(v) => match code {
                TypeCode::I8 => Value::I8(v as i8),
                TypeCode::U8 => Value::U8(v as u8),
                TypeCode::I16 => Value::I16(v as i16),
                TypeCode::U16 => Value::U16(v as u16),
                TypeCode::I32 => Value::I32(v as i32),
                TypeCode::U32 => Value::U32(v as u32),
                TypeCode::I64 => Value::I64(v as i64),
                TypeCode::U64 => Value::U64(v as u64),
                TypeCode::F32 => Value::F32(v as f32),
                TypeCode::F64 => Value::F64(v as f64),
                _ => return None,
            },
            Numeric::Float(v) => match code {
                TypeCode::I8 => Value::I8(v as i8),
                TypeCode::U8 => Value::U8(v as u8),
                TypeCode::I16 => Value::I16(v as i16),
                TypeCode::U16 => Value::U16(v as u16),
                TypeCode::I32 => Value::I32(v as i32),
                TypeCode::U32 => Value::U32(v as u32),
                TypeCode::I64 => Value::I64(v as i64),
                TypeCode::U64 => Value::U64(v as u64),
                TypeCode::F32 => Value::F32(v as f32),
                TypeCode::F64 => Value::F64(v),
                _ => return None,
            },
        };
        Some(converted)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("null"),
            Value::Bool(v) => write!(f, "{}", v),
            Value::I8(v) => write!(f, "{}", v),
            Value::U8(v) => write!(f, "{}", v),
            Value::I16(v) => write!(f, "{}", v),
            Value::U16(v) => write!(f, "{}", v),
            Value::I32(v) => write!(f, "{}", v),
            Value::U32(v) => write!(f, "{}", v),
            Value::I64(v) => write!(f, "{}", v),
            Value::U64(v) => write!(f, "{}", v),
            Value::F32(v) => write!(f, "{}", v),
            Value::F64(v) => write!(f, "{}", v),
            Value::Str(s) => write!(f, "{:?}", s.as_str()),
            Value::Array(array) => {
                f.write_str("[")?;
                for (i, item) in array.items.borrow().iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{}", item)?;
                }
                f.write_str("]")
            }
            Value::Object(object) => write!(f, "<{}>", object.type_name),
            Value::Address(_) => f.write_str("<address>"),
        }
    }
}

/// Mutable, shared one-dimensional array.
#[derive(Clone, Debug, PartialEq)]
pub struct ArrayRef {
    /// Element type code; stores are converted to it.
    pub element: TypeCode,
    pub items: Rc<RefCell<Vec<Value>>>,
}

impl ArrayRef {
    /// A zero-initialized array.
    pub fn new(element: TypeCode, len: usize) -> Self {
        Self {
            element,
            items: Rc::new(RefCell::new(vec![Value::default_for(element); len])),
        }
    }

    pub fn from_values(element: TypeCode, values: Vec<Value>) -> Self {
        Self {
            element,
            items: Rc::new(RefCell::new(values)),
        }
    }

    pub fn len(&self) -> usize {
        self.items.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, index: usize) -> Option<Value> {
        self.items.borrow().get(index).cloned()
    }
}

/// Instance of a host-defined named type.
#[derive(Clone, Debug, PartialEq)]
pub struct Object {
    pub type_name: EcoString,
    pub fields: Rc<[Value]>,
}

impl Object {
    pub fn new(type_name: &str, fields: Vec<Value>) -> Self {
        Self {
            type_name: EcoString::from(type_name),
            fields: fields.into(),
        }
    }

    pub fn field(&self, index: usize) -> Option<&Value> {
        self.fields.get(index)
    }
}

/// Target of a managed reference.
#[derive(Clone, Debug, PartialEq)]
pub enum Address {
    Local(u16),
    Element(ArrayRef, usize),
}
