//! Ember VM opcodes.
//!
//! # Encoding
//!
//! Every instruction is one opcode byte followed by a fixed-size immediate
//! determined by the opcode (see [`OperandKind`]). Immediates are little
//! endian.
//!
//! ```text
//! ┌──────────┬──────────────────────┐
//! │  OpCode  │ Immediate (0-8 bytes)│
//! │ (8 bits) │                      │
//! └──────────┴──────────────────────┘
//! ```
//!
//! Locals have three encodings: a compact opcode for slots 0-3, a one-byte
//! index for slots up to 255 and a two-byte index beyond. Branches have a
//! short form with a signed one-byte displacement and a long form with a
//! four-byte displacement, both relative to the end of the branch.
//!
//! # Stack Discipline
//!
//! Stack effect notation: `[..., operand1, operand2] -> [..., result]`

use static_assertions::assert_eq_size;

/// Version of the opcode table. Bumped whenever an opcode changes meaning.
pub const FORMAT_VERSION: u8 = 1;

/// Immediate operand shape of an opcode.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OperandKind {
    None,
    I8,
    U8,
    U16,
    I32,
    I64,
    F32,
    F64,
    /// One-byte [`TypeCode`](crate::types::TypeCode).
    TypeCode,
    /// Two-byte index into one of the code tables (strings, types, functions).
    Token,
    /// One-byte signed branch displacement.
    Target8,
    /// Four-byte signed branch displacement.
    Target32,
}

impl OperandKind {
    /// Encoded size of the immediate in bytes.
    pub const fn size(self) -> usize {
        match self {
            OperandKind::None => 0,
            OperandKind::I8 | OperandKind::U8 | OperandKind::TypeCode | OperandKind::Target8 => 1,
            OperandKind::U16 | OperandKind::Token => 2,
            OperandKind::I32 | OperandKind::F32 | OperandKind::Target32 => 4,
            OperandKind::I64 | OperandKind::F64 => 8,
        }
    }
}

macro_rules! opcodes {
    ($( $(#[$doc:meta])* $name:ident = $byte:literal, $mnemonic:literal, $operand:ident; )*) => {
        /// A single VM opcode (exactly one byte).
        #[repr(u8)]
        #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
        pub enum OpCode {
            $( $(#[$doc])* $name = $byte, )*
        }

        impl OpCode {
            pub fn from_byte(byte: u8) -> Option<OpCode> {
                match byte {
                    $( $byte => Some(OpCode::$name), )*
                    _ => None,
                }
            }

            pub fn mnemonic(self) -> &'static str {
                match self {
                    $( OpCode::$name => $mnemonic, )*
                }
            }

            pub fn operand_kind(self) -> OperandKind {
                match self {
                    $( OpCode::$name => OperandKind::$operand, )*
                }
            }
        }
    };
}

opcodes! {
    // ========================================================================
    // Special (0x00 - 0x0F)
    // ========================================================================
    /// Stop execution. At 0x00 so zeroed memory never executes as code.
    Halt = 0x00, "halt", None;
    Nop = 0x01, "nop", None;
    /// Return the top of the stack.
    /// Stack: [..., value] -> []
    Ret = 0x02, "ret", None;
    /// Stack: [..., a] -> [..., a, a]
    Dup = 0x03, "dup", None;
    /// Stack: [..., a] -> [...]
    Pop = 0x04, "pop", None;

    // ========================================================================
    // Constants (0x10 - 0x1F)
    // ========================================================================
    LdTrue = 0x10, "ldtrue", None;
    LdFalse = 0x11, "ldfalse", None;
    LdNull = 0x12, "ldnull", None;
    /// Push a small Int32 (-128 to 127).
    LdcI4S = 0x13, "ldc.i4.s", I8;
    LdcI4 = 0x14, "ldc.i4", I32;
    LdcI8 = 0x15, "ldc.i8", I64;
    LdcR4 = 0x16, "ldc.r4", F32;
    LdcR8 = 0x17, "ldc.r8", F64;
    /// Push a string from the string table.
    LdStr = 0x18, "ldstr", Token;

    // ========================================================================
    // Locals & Arguments (0x20 - 0x2F)
    // ========================================================================
    Ldloc0 = 0x20, "ldloc.0", None;
    Ldloc1 = 0x21, "ldloc.1", None;
    Ldloc2 = 0x22, "ldloc.2", None;
    Ldloc3 = 0x23, "ldloc.3", None;
    Stloc0 = 0x24, "stloc.0", None;
    Stloc1 = 0x25, "stloc.1", None;
    Stloc2 = 0x26, "stloc.2", None;
    Stloc3 = 0x27, "stloc.3", None;
    LdlocS = 0x28, "ldloc.s", U8;
    StlocS = 0x29, "stloc.s", U8;
    /// Push a reference to a local.
    /// Stack: [...] -> [..., &local]
    LdlocaS = 0x2A, "ldloca.s", U8;
    Ldloc = 0x2B, "ldloc", U16;
    Stloc = 0x2C, "stloc", U16;
    Ldloca = 0x2D, "ldloca", U16;
    /// Push a host-provided variable.
    LdArg = 0x2E, "ldarg", U16;
    /// Dereference an address pushed by `Ldloca`/`Ldelema`.
    /// Stack: [..., &value] -> [..., value]
    Ldobj = 0x2F, "ldobj", Token;

    // ========================================================================
    // Arithmetic (0x30 - 0x3F)
    // Both operands have the same type; integers wrap.
    // Stack: [..., a, b] -> [..., result]
    // ========================================================================
    Add = 0x30, "add", None;
    Sub = 0x31, "sub", None;
    Mul = 0x32, "mul", None;
    /// Can error on integer division by zero.
    Div = 0x33, "div", None;
    Rem = 0x34, "rem", None;
    /// Float power.
    Pow = 0x35, "pow", None;
    /// Stack: [..., a] -> [..., -a]
    Neg = 0x36, "neg", None;
    And = 0x37, "and", None;
    Or = 0x38, "or", None;
    Xor = 0x39, "xor", None;
    /// Logical not for Boolean, bitwise complement for integers.
    Not = 0x3A, "not", None;
    /// Shift amount is an Int32 on top of the stack.
    Shl = 0x3B, "shl", None;
    Shr = 0x3C, "shr", None;

    // ========================================================================
    // Comparison (0x40 - 0x47)
    // Stack: [..., a, b] -> [..., result: Bool]
    // ========================================================================
    Ceq = 0x40, "ceq", None;
    Cne = 0x41, "cne", None;
    Clt = 0x42, "clt", None;
    Cgt = 0x43, "cgt", None;
    Cle = 0x44, "cle", None;
    Cge = 0x45, "cge", None;

    // ========================================================================
    // Conversion (0x48 - 0x4F)
    // ========================================================================
    /// Numeric conversion to the operand type code.
    Conv = 0x48, "conv", TypeCode;

    // ========================================================================
    // Branches (0x50 - 0x5F)
    // ========================================================================
    BrS = 0x50, "br.s", Target8;
    /// Stack: [..., cond: Bool] -> [...]
    BrTrueS = 0x51, "brtrue.s", Target8;
    BrFalseS = 0x52, "brfalse.s", Target8;
    Br = 0x53, "br", Target32;
    BrTrue = 0x54, "brtrue", Target32;
    BrFalse = 0x55, "brfalse", Target32;

    // ========================================================================
    // Arrays (0x60 - 0x7F)
    // Load stack: [..., array, index: Int32] -> [..., element]
    // Store stack: [..., array, index: Int32, value] -> [...]
    // ========================================================================
    /// Stack: [..., len: Int32] -> [..., array]
    Newarr = 0x60, "newarr", Token;
    Ldlen = 0x61, "ldlen", None;
    LdelemI1 = 0x62, "ldelem.i1", None;
    LdelemU1 = 0x63, "ldelem.u1", None;
    LdelemI2 = 0x64, "ldelem.i2", None;
    LdelemU2 = 0x65, "ldelem.u2", None;
    LdelemI4 = 0x66, "ldelem.i4", None;
    LdelemU4 = 0x67, "ldelem.u4", None;
    LdelemI8 = 0x68, "ldelem.i8", None;
    LdelemR4 = 0x69, "ldelem.r4", None;
    LdelemR8 = 0x6A, "ldelem.r8", None;
    LdelemRef = 0x6B, "ldelem.ref", None;
    /// Stack: [..., array, index: Int32] -> [..., &element]
    Ldelema = 0x6C, "ldelema", Token;
    StelemI1 = 0x70, "stelem.i1", None;
    StelemI2 = 0x71, "stelem.i2", None;
    StelemI4 = 0x72, "stelem.i4", None;
    StelemI8 = 0x73, "stelem.i8", None;
    StelemR4 = 0x74, "stelem.r4", None;
    StelemR8 = 0x75, "stelem.r8", None;
    StelemRef = 0x76, "stelem.ref", None;
    /// Store an element of a named type.
    Stelem = 0x77, "stelem", Token;

    // ========================================================================
    // Calls (0x80 - 0x8F)
    // ========================================================================
    /// Call a host function from the function table.
    /// Stack: [..., arg0, ..., argN] -> [..., result]
    Call = 0x80, "call", Token;
}

assert_eq_size!(OpCode, u8);

impl OpCode {
    /// Short and long forms of a branch opcode, `None` for non-branches.
    pub fn branch_forms(self) -> Option<(OpCode, OpCode)> {
        match self {
            OpCode::BrS | OpCode::Br => Some((OpCode::BrS, OpCode::Br)),
            OpCode::BrTrueS | OpCode::BrTrue => Some((OpCode::BrTrueS, OpCode::BrTrue)),
            OpCode::BrFalseS | OpCode::BrFalse => Some((OpCode::BrFalseS, OpCode::BrFalse)),
            _ => None,
        }
    }

    pub fn is_branch(self) -> bool {
        self.branch_forms().is_some()
    }

    /// Encoded size of the opcode and its immediate.
    pub fn encoded_len(self) -> usize {
        1 + self.operand_kind().size()
    }
}
