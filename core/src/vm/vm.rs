use core::cmp::Ordering;

use super::code::{Code, read_i32, read_i64, read_u16};
use super::opcode::{FORMAT_VERSION, OpCode};
use super::RuntimeError;
use crate::types::TypeCode;
use crate::values::{Address, ArrayRef, Value};

/// Interpreter for finished [`Code`].
///
/// Locals start zero-initialized with the type recorded for each slot.
/// Arguments are the environment variables in declaration order.
pub struct VM<'c, 'a> {
    code: &'c Code<'a>,
    args: &'c [Value],
    stack: Vec<Value>,
    locals: Vec<Value>,
}

impl<'c, 'a> VM<'c, 'a> {
    pub fn new(code: &'c Code<'a>, args: &'c [Value]) -> Self {
        VM {
            code,
            args,
            stack: Vec::new(),
            locals: code.locals.iter().map(|&ty| Value::default_for(ty)).collect(),
        }
    }

    pub fn execute(code: &'c Code<'a>, args: &'c [Value]) -> Result<Value, RuntimeError> {
        if code.version != FORMAT_VERSION {
            return Err(RuntimeError::VersionMismatch {
                found: code.version,
                expected: FORMAT_VERSION,
            });
        }
        let mut vm = VM::new(code, args);
        let result = vm.run();
        debug_assert!(result.is_err() || vm.stack.is_empty(), "Stack should be empty.");
        result
    }

    fn pop(&mut self) -> Result<Value, RuntimeError> {
        self.stack
            .pop()
            .ok_or(RuntimeError::InvalidProgram("stack underflow"))
    }

    fn pop_bool(&mut self) -> Result<bool, RuntimeError> {
        self.pop()?
            .as_bool()
            .ok_or(RuntimeError::InvalidProgram("expected a Boolean"))
    }

    fn pop_i32(&mut self) -> Result<i32, RuntimeError> {
        self.pop()?
            .as_i32()
            .ok_or(RuntimeError::InvalidProgram("expected an Int32"))
    }

    fn pop_array(&mut self) -> Result<ArrayRef, RuntimeError> {
        match self.pop()? {
            Value::Array(array) => Ok(array),
            Value::Null => Err(RuntimeError::NullReference {}),
            _ => Err(RuntimeError::InvalidProgram("expected an array")),
        }
    }

    /// Pop an index of any integer type and an array, checking bounds.
    fn pop_element(&mut self) -> Result<(ArrayRef, usize), RuntimeError> {
        let index = self
            .pop()?
            .as_integer()
            .ok_or(RuntimeError::InvalidProgram("expected an integer index"))?;
        let array = self.pop_array()?;
        let len = array.len();
        match usize::try_from(index) {
            Ok(i) if i < len => Ok((array, i)),
            _ => Err(RuntimeError::IndexOutOfBounds {
                index: i64::try_from(index).unwrap_or(i64::MAX),
                len,
            }),
        }
    }

    fn local(&self, index: usize) -> Result<Value, RuntimeError> {
        self.locals
            .get(index)
            .cloned()
            .ok_or(RuntimeError::InvalidProgram("local out of range"))
    }

    fn store_local(&mut self, index: usize) -> Result<(), RuntimeError> {
        let value = self.pop()?;
        let slot = self
            .locals
            .get_mut(index)
            .ok_or(RuntimeError::InvalidProgram("local out of range"))?;
        *slot = value;
        Ok(())
    }

    fn token<T>(table: &[T], immediate: &[u8]) -> Result<usize, RuntimeError> {
        let index = read_u16(immediate) as usize;
        if index < table.len() {
            Ok(index)
        } else {
            Err(RuntimeError::InvalidProgram("token out of range"))
        }
    }

    fn jump(next: usize, displacement: i64) -> Result<usize, RuntimeError> {
        usize::try_from(next as i64 + displacement)
            .map_err(|_| RuntimeError::InvalidProgram("branch before start of code"))
    }

    pub fn run(&mut self) -> Result<Value, RuntimeError> {
        let code = self.code;
        let mut pc = 0;
        loop {
            let (op, immediate, next) = code
                .decode_at(pc)
                .ok_or(RuntimeError::InvalidProgram("truncated or unknown instruction"))?;
            pc = next;

            use OpCode::*;
            match op {
                Halt => return Err(RuntimeError::InvalidProgram("reached halt")),
                Nop => {}
                Ret => return self.pop(),
                Dup => {
                    let top = self
                        .stack
                        .last()
                        .cloned()
                        .ok_or(RuntimeError::InvalidProgram("stack underflow"))?;
                    self.stack.push(top);
                }
                Pop => {
                    self.pop()?;
                }

                // === Constants ===
                LdTrue => self.stack.push(Value::Bool(true)),
                LdFalse => self.stack.push(Value::Bool(false)),
                LdNull => self.stack.push(Value::Null),
                LdcI4S => self.stack.push(Value::I32(immediate[0] as i8 as i32)),
                LdcI4 => self.stack.push(Value::I32(read_i32(immediate))),
                LdcI8 => self.stack.push(Value::I64(read_i64(immediate))),
                LdcR4 => self
                    .stack
                    .push(Value::F32(f32::from_bits(read_i32(immediate) as u32))),
                LdcR8 => self
                    .stack
                    .push(Value::F64(f64::from_bits(read_i64(immediate) as u64))),
                LdStr => {
                    let index = Self::token(&code.strings, immediate)?;
                    self.stack.push(Value::Str(code.strings[index].clone()));
                }

                // === Locals & Arguments ===
                Ldloc0 | Ldloc1 | Ldloc2 | Ldloc3 => {
                    let value = self.local((op as u8 - Ldloc0 as u8) as usize)?;
                    self.stack.push(value);
                }
                Stloc0 | Stloc1 | Stloc2 | Stloc3 => {
                    self.store_local((op as u8 - Stloc0 as u8) as usize)?;
                }
                LdlocS => {
                    let value = self.local(immediate[0] as usize)?;
                    self.stack.push(value);
                }
                StlocS => self.store_local(immediate[0] as usize)?,
                Ldloc => {
                    let value = self.local(read_u16(immediate) as usize)?;
                    self.stack.push(value);
                }
                Stloc => self.store_local(read_u16(immediate) as usize)?,
                LdlocaS | Ldloca => {
                    let index = match op {
                        LdlocaS => immediate[0] as u16,
                        _ => read_u16(immediate),
                    };
                    if index as usize >= self.locals.len() {
                        return Err(RuntimeError::InvalidProgram("local out of range"));
                    }
                    self.stack.push(Value::Address(Address::Local(index)));
                }
                LdArg => {
                    let value = self
                        .args
                        .get(read_u16(immediate) as usize)
                        .cloned()
                        .ok_or(RuntimeError::InvalidProgram("argument out of range"))?;
                    self.stack.push(value);
                }
                Ldobj => {
                    let value = match self.pop()? {
                        Value::Address(Address::Local(index)) => self.local(index as usize)?,
                        Value::Address(Address::Element(array, index)) => array
                            .get(index)
                            .ok_or(RuntimeError::IndexOutOfBounds {
                                index: index as i64,
                                len: array.len(),
                            })?,
                        Value::Null => return Err(RuntimeError::NullReference {}),
                        _ => return Err(RuntimeError::InvalidProgram("expected an address")),
                    };
                    self.stack.push(value);
                }

                // === Arithmetic ===
                Add | Sub | Mul | Div | Rem | Pow | And | Or | Xor => {
                    let b = self.pop()?;
                    let a = self.pop()?;
                    self.stack.push(binary(op, a, b)?);
                }
                Neg => {
                    let a = self.pop()?;
                    self.stack.push(negate(a)?);
                }
                Not => {
                    let a = self.pop()?;
                    self.stack.push(complement(a)?);
                }
                Shl | Shr => {
                    let count = self.pop_i32()? as u32;
                    let a = self.pop()?;
                    self.stack.push(shift(op, a, count)?);
                }

                // === Comparison ===
                Ceq | Cne | Clt | Cgt | Cle | Cge => {
                    let b = self.pop()?;
                    let a = self.pop()?;
                    let ordering = compare(&a, &b)?;
                    let result = match op {
                        Ceq => ordering == Some(Ordering::Equal),
                        Cne => ordering != Some(Ordering::Equal),
                        Clt => ordering == Some(Ordering::Less),
                        Cgt => ordering == Some(Ordering::Greater),
                        Cle => matches!(ordering, Some(Ordering::Less | Ordering::Equal)),
                        _ => matches!(ordering, Some(Ordering::Greater | Ordering::Equal)),
                    };
                    self.stack.push(Value::Bool(result));
                }

                // === Conversion ===
                Conv => {
                    let target = TypeCode::from_byte(immediate[0])
                        .ok_or(RuntimeError::InvalidProgram("unknown type code"))?;
                    let value = self.pop()?;
                    let converted = value
                        .convert(target)
                        .ok_or(RuntimeError::InvalidProgram("invalid conversion"))?;
                    self.stack.push(converted);
                }

                // === Branches ===
                BrS => pc = Self::jump(next, immediate[0] as i8 as i64)?,
                Br => pc = Self::jump(next, read_i32(immediate) as i64)?,
                BrTrueS | BrFalseS => {
                    if self.pop_bool()? == (op == BrTrueS) {
                        pc = Self::jump(next, immediate[0] as i8 as i64)?;
                    }
                }
                BrTrue | BrFalse => {
                    if self.pop_bool()? == (op == BrTrue) {
                        pc = Self::jump(next, read_i32(immediate) as i64)?;
                    }
                }

                // === Arrays ===
                Newarr => {
                    let index = Self::token(&code.types, immediate)?;
                    let len = self.pop_i32()?;
                    let len = usize::try_from(len).map_err(|_| RuntimeError::NegativeArrayLength(len))?;
                    let array = ArrayRef::new(code.types[index].code(), len);
                    self.stack.push(Value::Array(array));
                }
                Ldlen => {
                    let array = self.pop_array()?;
                    self.stack.push(Value::I32(array.len() as i32));
                }
                LdelemI1 | LdelemU1 | LdelemI2 | LdelemU2 | LdelemI4 | LdelemU4 | LdelemI8
                | LdelemR4 | LdelemR8 | LdelemRef => {
                    let (array, index) = self.pop_element()?;
                    let value = array.items.borrow()[index].clone();
                    self.stack.push(value);
                }
                Ldelema => {
                    Self::token(&code.types, immediate)?;
                    let (array, index) = self.pop_element()?;
                    self.stack.push(Value::Address(Address::Element(array, index)));
                }
                StelemI1 | StelemI2 | StelemI4 | StelemI8 | StelemR4 | StelemR8 | StelemRef
                | Stelem => {
                    let value = self.pop()?;
                    let (array, index) = self.pop_element()?;
                    let value = match array.element {
                        TypeCode::Bool | TypeCode::Str | TypeCode::Object => value,
                        numeric => value
                            .convert(numeric)
                            .ok_or(RuntimeError::InvalidProgram("invalid element store"))?,
                    };
                    array.items.borrow_mut()[index] = value;
                }

                // === Calls ===
                Call => {
                    let index = Self::token(&code.functions, immediate)?;
                    let entry = &code.functions[index];
                    let arity = entry.arity as usize;
                    if self.stack.len() < arity {
                        return Err(RuntimeError::InvalidProgram("stack underflow"));
                    }
                    let args = self.stack.split_off(self.stack.len() - arity);
                    let result = entry.function.call(&args).inspect_err(|error| {
                        tracing::debug!(function = %entry.name, %error, "Host function failed");
                    })?;
                    self.stack.push(result);
                }
            }
        }
    }
}

fn binary(op: OpCode, a: Value, b: Value) -> Result<Value, RuntimeError> {
    macro_rules! int_op {
        ($variant:ident, $x:expr, $y:expr) => {
            Value::$variant(match op {
                OpCode::Add => $x.wrapping_add($y),
                OpCode::Sub => $x.wrapping_sub($y),
                OpCode::Mul => $x.wrapping_mul($y),
                OpCode::Div | OpCode::Rem if $y == 0 => {
                    return Err(RuntimeError::DivisionByZero {});
                }
                OpCode::Div => $x.wrapping_div($y),
                OpCode::Rem => $x.wrapping_rem($y),
                OpCode::And => $x & $y,
                OpCode::Or => $x | $y,
                OpCode::Xor => $x ^ $y,
                _ => return Err(RuntimeError::InvalidProgram("operation not defined on integers")),
            })
        };
    }
    macro_rules! float_op {
        ($variant:ident, $x:expr, $y:expr) => {
            Value::$variant(match op {
                OpCode::Add => $x + $y,
                OpCode::Sub => $x - $y,
                OpCode::Mul => $x * $y,
                OpCode::Div => $x / $y,
                OpCode::Rem => $x % $y,
                OpCode::Pow => $x.powf($y),
                _ => return Err(RuntimeError::InvalidProgram("operation not defined on floats")),
            })
        };
    }

    Ok(match (a, b) {
        (Value::I8(x), Value::I8(y)) => int_op!(I8, x, y),
        (Value::U8(x), Value::U8(y)) => int_op!(U8, x, y),
        (Value::I16(x), Value::I16(y)) => int_op!(I16, x, y),
        (Value::U16(x), Value::U16(y)) => int_op!(U16, x, y),
        (Value::I32(x), Value::I32(y)) => int_op!(I32, x, y),
        (Value::U32(x), Value::U32(y)) => int_op!(U32, x, y),
        (Value::I64(x), Value::I64(y)) => int_op!(I64, x, y),
        (Value::U64(x), Value::U64(y)) => int_op!(U64, x, y),
        (Value::F32(x), Value::F32(y)) => float_op!(F32, x, y),
        (Value::F64(x), Value::F64(y)) => float_op!(F64, x, y),
        (Value::Bool(x), Value::Bool(y)) => Value::Bool(match op {
            OpCode::And => x & y,
            OpCode::Or => x | y,
            OpCode::Xor => x ^ y,
            _ => return Err(RuntimeError::InvalidProgram("operation not defined on Booleans")),
        }),
        (Value::Str(x), Value::Str(y)) if op == OpCode::Add => {
            let mut joined = x;
            joined.push_str(&y);
            Value::Str(joined)
        }
        _ => return Err(RuntimeError::InvalidProgram("operand types do not match")),
    })
}

fn negate(a: Value) -> Result<Value, RuntimeError> {
    Ok(match a {
        Value::I32(x) => Value::I32(x.wrapping_neg()),
        Value::I64(x) => Value::I64(x.wrapping_neg()),
        Value::F32(x) => Value::F32(-x),
        Value::F64(x) => Value::F64(-x),
        _ => return Err(RuntimeError::InvalidProgram("negation of an unsigned or non-numeric value")),
    })
}

fn complement(a: Value) -> Result<Value, RuntimeError> {
    Ok(match a {
        Value::Bool(x) => Value::Bool(!x),
        Value::I32(x) => Value::I32(!x),
        Value::U32(x) => Value::U32(!x),
        Value::I64(x) => Value::I64(!x),
        Value::U64(x) => Value::U64(!x),
        _ => return Err(RuntimeError::InvalidProgram("complement of a non-integral value")),
    })
}

fn shift(op: OpCode, a: Value, count: u32) -> Result<Value, RuntimeError> {
    macro_rules! shift_op {
        ($variant:ident, $x:expr) => {
            Value::$variant(if op == OpCode::Shl {
                $x.wrapping_shl(count)
            } else {
                $x.wrapping_shr(count)
            })
        };
    }
    Ok(match a {
        Value::I32(x) => shift_op!(I32, x),
        Value::U32(x) => shift_op!(U32, x),
        Value::I64(x) => shift_op!(I64, x),
        Value::U64(x) => shift_op!(U64, x),
        _ => return Err(RuntimeError::InvalidProgram("shift of a non-integral value")),
    })
}

/// Ordering of two values of the same type. `None` for unordered floats.
fn compare(a: &Value, b: &Value) -> Result<Option<Ordering>, RuntimeError> {
    Ok(match (a, b) {
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        (Value::I8(x), Value::I8(y)) => Some(x.cmp(y)),
        (Value::U8(x), Value::U8(y)) => Some(x.cmp(y)),
        (Value::I16(x), Value::I16(y)) => Some(x.cmp(y)),
        (Value::U16(x), Value::U16(y)) => Some(x.cmp(y)),
        (Value::I32(x), Value::I32(y)) => Some(x.cmp(y)),
        (Value::U32(x), Value::U32(y)) => Some(x.cmp(y)),
        (Value::I64(x), Value::I64(y)) => Some(x.cmp(y)),
        (Value::U64(x), Value::U64(y)) => Some(x.cmp(y)),
        (Value::F32(x), Value::F32(y)) => x.partial_cmp(y),
        (Value::F64(x), Value::F64(y)) => x.partial_cmp(y),
        (Value::Str(x), Value::Str(y)) => Some(x.as_str().cmp(y.as_str())),
        _ => return Err(RuntimeError::InvalidProgram("comparison of mismatched types")),
    })
}
