use alloc::string::String;
use core::fmt::Write;

use ecow::EcoString;
use static_assertions::assert_impl_all;

use super::opcode::{OpCode, OperandKind};
use crate::emit::BranchRecord;
use crate::types::{Type, TypeCode};
use crate::values::HostFunction;

/// Entry of the function table referenced by `Call`.
#[derive(Clone, Debug)]
pub struct FunctionEntry {
    /// Function or operator method name, for disassembly and errors.
    pub name: EcoString,
    pub arity: u16,
    pub function: HostFunction,
}

/// Finished, immutable instruction buffer for one expression.
///
/// Code holds no interior mutability and can be shared between threads
/// that execute it.
#[derive(Clone, Debug)]
pub struct Code<'a> {
    /// Opcode table version the bytes were encoded with.
    pub version: u8,
    pub bytes: Vec<u8>,
    /// Type of each local slot, used to zero-initialize them.
    pub locals: Vec<TypeCode>,
    pub strings: Vec<EcoString>,
    pub types: Vec<Type<'a>>,
    pub functions: Vec<FunctionEntry>,
    /// Resolved branches, in instruction order.
    pub branches: Vec<BranchRecord>,
}

assert_impl_all!(Code<'static>: Send, Sync);

impl<'a> Code<'a> {
    pub fn num_locals(&self) -> usize {
        self.locals.len()
    }

    /// Decode one instruction at `offset`.
    ///
    /// Returns the opcode, the raw immediate bytes and the offset of the
    /// next instruction, or `None` if the bytes are truncated or unknown.
    pub fn decode_at(&self, offset: usize) -> Option<(OpCode, &[u8], usize)> {
        let op = OpCode::from_byte(*self.bytes.get(offset)?)?;
        let end = offset + op.encoded_len();
        let immediate = self.bytes.get(offset + 1..end)?;
        Some((op, immediate, end))
    }

    /// Offsets of every instruction, in order.
    pub fn instruction_offsets(&self) -> Vec<usize> {
        let mut offsets = Vec::new();
        let mut offset = 0;
        while let Some((_, _, next)) = self.decode_at(offset) {
            offsets.push(offset);
            offset = next;
        }
        offsets
    }

    /// Human readable listing, one instruction per line.
    ///
    /// ```text
    /// 0000: ldarg 0
    /// 0003: brtrue.s -> 000a
    /// ```
    pub fn disassemble(&self) -> String {
        let mut out = String::new();
        let mut offset = 0;
        while offset < self.bytes.len() {
            let Some((op, immediate, next)) = self.decode_at(offset) else {
                let _ = writeln!(out, "{:04x}: <invalid {:#04x}>", offset, self.bytes[offset]);
                break;
            };
            let _ = write!(out, "{:04x}: {}", offset, op.mnemonic());
            self.write_immediate(&mut out, op, immediate, next);
            out.push('\n');
            offset = next;
        }
        out
    }

    fn write_immediate(&self, out: &mut String, op: OpCode, immediate: &[u8], next: usize) {
        let _ = match op.operand_kind() {
            OperandKind::None => Ok(()),
            OperandKind::I8 => write!(out, " {}", immediate[0] as i8),
            OperandKind::U8 => write!(out, " {}", immediate[0]),
            OperandKind::U16 => write!(out, " {}", read_u16(immediate)),
            OperandKind::I32 => write!(out, " {}", read_i32(immediate)),
            OperandKind::I64 => write!(out, " {}", read_i64(immediate)),
            OperandKind::F32 => write!(out, " {}", f32::from_bits(read_i32(immediate) as u32)),
            OperandKind::F64 => write!(out, " {}", f64::from_bits(read_i64(immediate) as u64)),
            OperandKind::TypeCode => match TypeCode::from_byte(immediate[0]) {
                Some(code) => write!(out, " {}", code),
                None => write!(out, " <type {:#04x}>", immediate[0]),
            },
            OperandKind::Token => {
                let token = read_u16(immediate) as usize;
                match op {
                    OpCode::LdStr => match self.strings.get(token) {
                        Some(s) => write!(out, " {:?}", s.as_str()),
                        None => write!(out, " #{}", token),
                    },
                    OpCode::Call => match self.functions.get(token) {
                        Some(entry) => write!(out, " {}/{}", entry.name, entry.arity),
                        None => write!(out, " #{}", token),
                    },
                    _ => match self.types.get(token) {
                        Some(ty) => write!(out, " {}", ty),
                        None => write!(out, " #{}", token),
                    },
                }
            }
            OperandKind::Target8 => {
                let target = next as isize + immediate[0] as i8 as isize;
                write!(out, " -> {:04x}", target)
            }
            OperandKind::Target32 => {
                let target = next as isize + read_i32(immediate) as isize;
                write!(out, " -> {:04x}", target)
            }
        };
    }
}

pub(crate) fn read_u16(bytes: &[u8]) -> u16 {
    u16::from_le_bytes([bytes[0], bytes[1]])
}

pub(crate) fn read_i32(bytes: &[u8]) -> i32 {
    i32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
}

pub(crate) fn read_i64(bytes: &[u8]) -> i64 {
    let mut buf = [0u8; 8];
    buf.copy_from_slice(&bytes[..8]);
    i64::from_le_bytes(buf)
}
