//! Instructions as recorded by the emitter, before encoding.

use core::fmt;

use crate::types::TypeCode;
use crate::vm::{OpCode, OperandKind};

/// Symbolic position in the instruction stream.
///
/// Created unresolved by [`Emitter::define_label`](super::Emitter::define_label)
/// and resolved exactly once by `mark_label`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Label(pub(crate) u32);

impl Label {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Index of a local slot. Slots 0-3 have one-byte encodings, slots up to
/// 255 a one-byte index, and higher slots a two-byte index.
pub type LocalSlot = u32;

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "L{}", self.0)
    }
}

/// Immediate operand of an instruction.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Operand {
    None,
    I8(i8),
    U8(u8),
    U16(u16),
    I32(i32),
    I64(i64),
    F32(f32),
    F64(f64),
    TypeCode(TypeCode),
    Token(u16),
    /// Branch target; the displacement width is chosen when finalizing.
    Label(Label),
}

impl Operand {
    /// Whether this operand can be the immediate of an opcode expecting `kind`.
    pub fn fits(&self, kind: OperandKind) -> bool {
        matches!(
            (self, kind),
            (Operand::None, OperandKind::None)
                | (Operand::I8(_), OperandKind::I8)
                | (Operand::U8(_), OperandKind::U8)
                | (Operand::U16(_), OperandKind::U16)
                | (Operand::I32(_), OperandKind::I32)
                | (Operand::I64(_), OperandKind::I64)
                | (Operand::F32(_), OperandKind::F32)
                | (Operand::F64(_), OperandKind::F64)
                | (Operand::TypeCode(_), OperandKind::TypeCode)
                | (Operand::Token(_), OperandKind::Token)
                | (Operand::Label(_), OperandKind::Target8 | OperandKind::Target32)
        )
    }
}

/// One emitted operation.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Instruction {
    pub op: OpCode,
    pub operand: Operand,
}

impl Instruction {
    pub const fn new(op: OpCode) -> Self {
        Self {
            op,
            operand: Operand::None,
        }
    }

    pub const fn with(op: OpCode, operand: Operand) -> Self {
        Self { op, operand }
    }

    pub fn target(&self) -> Option<Label> {
        match self.operand {
            Operand::Label(label) => Some(label),
            _ => None,
        }
    }

    /// Encoded size, with branches measured in the requested form.
    pub fn encoded_len(&self, long_branch: bool) -> usize {
        match self.op.branch_forms() {
            Some((short, long)) => {
                if long_branch {
                    long.encoded_len()
                } else {
                    short.encoded_len()
                }
            }
            None => self.op.encoded_len(),
        }
    }

    /// Local slot referenced by a load/store opcode.
    pub fn local_index(&self) -> Option<LocalSlot> {
        use OpCode::*;
        match (self.op, self.operand) {
            (Ldloc0 | Stloc0, _) => Some(0),
            (Ldloc1 | Stloc1, _) => Some(1),
            (Ldloc2 | Stloc2, _) => Some(2),
            (Ldloc3 | Stloc3, _) => Some(3),
            (LdlocS | StlocS | LdlocaS, Operand::U8(index)) => Some(index as LocalSlot),
            (Ldloc | Stloc | Ldloca, Operand::U16(index)) => Some(index as LocalSlot),
            _ => None,
        }
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.op.mnemonic())?;
        match self.operand {
            Operand::None => Ok(()),
            Operand::I8(v) => write!(f, " {}", v),
            Operand::U8(v) => write!(f, " {}", v),
            Operand::U16(v) => write!(f, " {}", v),
            Operand::I32(v) => write!(f, " {}", v),
            Operand::I64(v) => write!(f, " {}", v),
            Operand::F32(v) => write!(f, " {}", v),
            Operand::F64(v) => write!(f, " {}", v),
            Operand::TypeCode(code) => write!(f, " {}", code),
            Operand::Token(token) => write!(f, " #{}", token),
            Operand::Label(label) => write!(f, " {}", label),
        }
    }
}
