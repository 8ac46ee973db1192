//! The instruction emitter.

use ecow::EcoString;
use hashbrown::HashMap;
use static_assertions::assert_impl_all;

use super::branch::{self, BranchLayout, BranchRecord};
use super::instruction::{Instruction, Label, LocalSlot, Operand};
use crate::compiler::InternalError;
use crate::types::Type;
use crate::values::HostFunction;
use crate::vm::{Code, FORMAT_VERSION, FunctionEntry, OpCode};

/// Largest number of local slots addressable by the wide encoding.
pub const MAX_LOCALS: usize = u16::MAX as usize + 1;

/// String, type and function tables referenced by token operands.
#[derive(Clone, Default)]
struct Tables<'a> {
    strings: Vec<EcoString>,
    string_tokens: HashMap<EcoString, u16>,
    types: Vec<Type<'a>>,
    type_tokens: HashMap<Type<'a>, u16>,
    functions: Vec<FunctionEntry>,
}

/// Sizes of the parent at the time a child emitter was forked.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct ForkPoint {
    instructions: usize,
    locals: usize,
    strings: usize,
    types: usize,
    functions: usize,
}

/// Records instructions, local slots and labels for one code unit and turns
/// them into a [`Code`] buffer.
///
/// Branch targets stay symbolic until [`finalize`](Emitter::finalize), which
/// picks the short or long form of every branch.
#[derive(Clone)]
pub struct Emitter<'a> {
    instructions: Vec<Instruction>,
    /// Instruction index marked by each label, `None` until marked.
    labels: Vec<Option<usize>>,
    locals: Vec<Type<'a>>,
    max_locals: usize,
    /// Byte offset of the next instruction with every branch short.
    offset: usize,
    tables: Tables<'a>,
    forked_from: Option<ForkPoint>,
}

assert_impl_all!(Emitter<'static>: Send);

impl<'a> Default for Emitter<'a> {
    fn default() -> Self {
        Self::new()
    }
}

impl<'a> Emitter<'a> {
    pub fn new() -> Self {
        Self::with_max_locals(MAX_LOCALS)
    }

    pub fn with_max_locals(max_locals: usize) -> Self {
        Self {
            instructions: Vec::new(),
            labels: Vec::new(),
            locals: Vec::new(),
            max_locals: max_locals.min(MAX_LOCALS),
            offset: 0,
            tables: Tables::default(),
            forked_from: None,
        }
    }

    pub fn instructions(&self) -> &[Instruction] {
        &self.instructions
    }

    /// Index the next instruction will get.
    pub fn len(&self) -> usize {
        self.instructions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instructions.is_empty()
    }

    /// Byte offset of the next instruction, assuming every branch is short.
    ///
    /// Final offsets can only grow from this; see [`finalize`](Emitter::finalize).
    pub fn current_offset(&self) -> usize {
        self.offset
    }

    // === Emission ===

    /// Append an instruction.
    ///
    /// The operand must fit the opcode, a local operand must reference an
    /// allocated slot and a label operand must belong to this emitter.
    pub fn emit(&mut self, instruction: Instruction) -> Result<(), InternalError> {
        let op = instruction.op;
        if !instruction.operand.fits(op.operand_kind()) {
            return Err(InternalError::OperandMismatch {
                op: op.mnemonic(),
                operand: ecow::eco_format!("{:?}", instruction.operand),
            });
        }
        if let Some(index) = instruction.local_index() {
            if index as usize >= self.locals.len() {
                return Err(InternalError::UnallocatedLocal(index));
            }
        }
        if let Some(label) = instruction.target() {
            if label.index() >= self.labels.len() {
                return Err(InternalError::UnknownLabel(label));
            }
        }
        self.offset += instruction.encoded_len(false);
        self.instructions.push(instruction);
        Ok(())
    }

    /// Append an instruction without an immediate.
    pub fn emit_op(&mut self, op: OpCode) -> Result<(), InternalError> {
        self.emit(Instruction::new(op))
    }

    /// Append a branch to `target` and return its instruction index.
    ///
    /// Either form of the opcode may be given; the form actually encoded is
    /// decided when finalizing.
    pub fn emit_branch(&mut self, op: OpCode, target: Label) -> Result<usize, InternalError> {
        let Some((_, long)) = op.branch_forms() else {
            return Err(InternalError::OperandMismatch {
                op: op.mnemonic(),
                operand: ecow::eco_format!("{:?}", Operand::Label(target)),
            });
        };
        let source = self.instructions.len();
        self.emit(Instruction::with(long, Operand::Label(target)))?;
        Ok(source)
    }

    // === Labels ===

    /// Allocate a new, unmarked label.
    pub fn define_label(&mut self) -> Label {
        let label = Label(self.labels.len() as u32);
        self.labels.push(None);
        label
    }

    pub fn label_count(&self) -> usize {
        self.labels.len()
    }

    /// Resolve `label` to the position of the next instruction.
    pub fn mark_label(&mut self, label: Label) -> Result<(), InternalError> {
        let position = self.instructions.len();
        self.mark_label_at(label, position)
    }

    fn mark_label_at(&mut self, label: Label, position: usize) -> Result<(), InternalError> {
        match self.labels.get_mut(label.index()) {
            None => Err(InternalError::UnknownLabel(label)),
            Some(Some(_)) => Err(InternalError::LabelAlreadyMarked(label)),
            Some(slot) => {
                *slot = Some(position);
                Ok(())
            }
        }
    }

    /// Instruction index marked by `label`, if marked.
    pub fn label_position(&self, label: Label) -> Option<usize> {
        self.labels.get(label.index()).copied().flatten()
    }

    // === Locals ===

    /// Allocate a new local slot of type `ty` and return its index.
    pub fn declare_local(&mut self, ty: Type<'a>) -> Result<LocalSlot, InternalError> {
        if self.locals.len() >= self.max_locals {
            return Err(InternalError::TooManyLocals(self.max_locals));
        }
        let index = self.locals.len() as LocalSlot;
        self.locals.push(ty);
        Ok(index)
    }

    pub fn local_count(&self) -> usize {
        self.locals.len()
    }

    pub fn local_type(&self, index: LocalSlot) -> Option<Type<'a>> {
        self.locals.get(index as usize).copied()
    }

    /// Store the top of the stack into a local: `stloc.0`-`stloc.3`,
    /// `stloc.s` up to 255, `stloc` beyond.
    pub fn emit_store_local(&mut self, index: LocalSlot) -> Result<(), InternalError> {
        let instruction = match index {
            0 => Instruction::new(OpCode::Stloc0),
            1 => Instruction::new(OpCode::Stloc1),
            2 => Instruction::new(OpCode::Stloc2),
            3 => Instruction::new(OpCode::Stloc3),
            4..=255 => Instruction::with(OpCode::StlocS, Operand::U8(index as u8)),
            _ => Instruction::with(OpCode::Stloc, Operand::U16(wide_local(index)?)),
        };
        self.emit(instruction)
    }

    /// Push a local: `ldloc.0`-`ldloc.3`, `ldloc.s` up to 255, `ldloc` beyond.
    pub fn emit_load_local(&mut self, index: LocalSlot) -> Result<(), InternalError> {
        let instruction = match index {
            0 => Instruction::new(OpCode::Ldloc0),
            1 => Instruction::new(OpCode::Ldloc1),
            2 => Instruction::new(OpCode::Ldloc2),
            3 => Instruction::new(OpCode::Ldloc3),
            4..=255 => Instruction::with(OpCode::LdlocS, Operand::U8(index as u8)),
            _ => Instruction::with(OpCode::Ldloc, Operand::U16(wide_local(index)?)),
        };
        self.emit(instruction)
    }

    /// Push a reference to a local: `ldloca.s` up to 255, `ldloca` beyond.
    pub fn emit_load_local_address(&mut self, index: LocalSlot) -> Result<(), InternalError> {
        let instruction = if index <= 255 {
            Instruction::with(OpCode::LdlocaS, Operand::U8(index as u8))
        } else {
            Instruction::with(OpCode::Ldloca, Operand::U16(wide_local(index)?))
        };
        self.emit(instruction)
    }

    // === Constants ===

    pub fn emit_load_bool(&mut self, value: bool) -> Result<(), InternalError> {
        self.emit_op(if value { OpCode::LdTrue } else { OpCode::LdFalse })
    }

    /// Push an Int32, using `ldc.i4.s` when it fits in a byte.
    pub fn emit_load_i4(&mut self, value: i32) -> Result<(), InternalError> {
        match i8::try_from(value) {
            Ok(small) => self.emit(Instruction::with(OpCode::LdcI4S, Operand::I8(small))),
            Err(_) => self.emit(Instruction::with(OpCode::LdcI4, Operand::I32(value))),
        }
    }

    pub fn emit_load_i8(&mut self, value: i64) -> Result<(), InternalError> {
        self.emit(Instruction::with(OpCode::LdcI8, Operand::I64(value)))
    }

    pub fn emit_load_r4(&mut self, value: f32) -> Result<(), InternalError> {
        self.emit(Instruction::with(OpCode::LdcR4, Operand::F32(value)))
    }

    pub fn emit_load_r8(&mut self, value: f64) -> Result<(), InternalError> {
        self.emit(Instruction::with(OpCode::LdcR8, Operand::F64(value)))
    }

    pub fn emit_load_string(&mut self, value: &str) -> Result<(), InternalError> {
        let token = self.string_token(value)?;
        self.emit(Instruction::with(OpCode::LdStr, Operand::Token(token)))
    }

    // === Arrays ===

    /// Create an array of `element` with the length on top of the stack.
    pub fn emit_new_array(&mut self, element: Type<'a>) -> Result<(), InternalError> {
        let token = self.type_token(element)?;
        self.emit(Instruction::with(OpCode::Newarr, Operand::Token(token)))
    }

    /// Load an array element of type `element`.
    ///
    /// Primitive and reference element types have a dedicated opcode. Named
    /// element types load the element address and copy the value out.
    pub fn emit_array_load(&mut self, element: Type<'a>) -> Result<(), InternalError> {
        let op = match element {
            Type::Bool | Type::I8 => OpCode::LdelemI1,
            Type::U8 => OpCode::LdelemU1,
            Type::I16 => OpCode::LdelemI2,
            Type::U16 => OpCode::LdelemU2,
            Type::I32 => OpCode::LdelemI4,
            Type::U32 => OpCode::LdelemU4,
            Type::I64 | Type::U64 => OpCode::LdelemI8,
            Type::F32 => OpCode::LdelemR4,
            Type::F64 => OpCode::LdelemR8,
            Type::Str | Type::Array(_) => OpCode::LdelemRef,
            Type::Named(_) => {
                let token = self.type_token(element)?;
                self.emit(Instruction::with(OpCode::Ldelema, Operand::Token(token)))?;
                return self.emit(Instruction::with(OpCode::Ldobj, Operand::Token(token)));
            }
        };
        self.emit_op(op)
    }

    /// Store an array element of type `element`. Signed and unsigned types
    /// of the same width share an opcode.
    pub fn emit_array_store(&mut self, element: Type<'a>) -> Result<(), InternalError> {
        let op = match element {
            Type::Bool | Type::I8 | Type::U8 => OpCode::StelemI1,
            Type::I16 | Type::U16 => OpCode::StelemI2,
            Type::I32 | Type::U32 => OpCode::StelemI4,
            Type::I64 | Type::U64 => OpCode::StelemI8,
            Type::F32 => OpCode::StelemR4,
            Type::F64 => OpCode::StelemR8,
            Type::Str | Type::Array(_) => OpCode::StelemRef,
            Type::Named(_) => {
                let token = self.type_token(element)?;
                return self.emit(Instruction::with(OpCode::Stelem, Operand::Token(token)));
            }
        };
        self.emit_op(op)
    }

    // === Calls ===

    /// Call a host function taking `arity` arguments.
    pub fn emit_call(
        &mut self,
        name: &str,
        arity: usize,
        function: &HostFunction,
    ) -> Result<(), InternalError> {
        let token = self.function_token(name, arity, function)?;
        self.emit(Instruction::with(OpCode::Call, Operand::Token(token)))
    }

    // === Tables ===

    fn string_token(&mut self, value: &str) -> Result<u16, InternalError> {
        if let Some(&token) = self.tables.string_tokens.get(value) {
            return Ok(token);
        }
        let token = next_token(self.tables.strings.len(), "strings")?;
        let value = EcoString::from(value);
        self.tables.strings.push(value.clone());
        self.tables.string_tokens.insert(value, token);
        Ok(token)
    }

    fn type_token(&mut self, ty: Type<'a>) -> Result<u16, InternalError> {
        if let Some(&token) = self.tables.type_tokens.get(&ty) {
            return Ok(token);
        }
        let token = next_token(self.tables.types.len(), "types")?;
        self.tables.types.push(ty);
        self.tables.type_tokens.insert(ty, token);
        Ok(token)
    }

    fn function_token(
        &mut self,
        name: &str,
        arity: usize,
        function: &HostFunction,
    ) -> Result<u16, InternalError> {
        if let Some(index) = self
            .tables
            .functions
            .iter()
            .position(|entry| entry.function.ptr_eq(function) && entry.name == name)
        {
            return Ok(index as u16);
        }
        let token = next_token(self.tables.functions.len(), "functions")?;
        let arity = u16::try_from(arity).map_err(|_| InternalError::TableOverflow("arguments"))?;
        self.tables.functions.push(FunctionEntry {
            name: EcoString::from(name),
            arity,
            function: function.clone(),
        });
        Ok(token)
    }

    // === Parallel paths ===

    /// Start a child emitter for a code path that will later be spliced back
    /// with [`splice`](Emitter::splice).
    ///
    /// The child sees the same locals, tables and labels as `self`. Nothing
    /// may be emitted into `self` until the child is spliced.
    pub fn fork(&self) -> Emitter<'a> {
        let mut child = Emitter {
            instructions: Vec::new(),
            labels: Vec::new(),
            locals: self.locals.clone(),
            max_locals: self.max_locals,
            offset: 0,
            tables: self.tables.clone(),
            forked_from: Some(self.fork_point()),
        };
        sync_labels(self, &mut child);
        child
    }

    /// Append the code of a forked child at the current position.
    ///
    /// Labels the child marked are marked here at the corresponding
    /// position; labels the child defined become defined here.
    pub fn splice(&mut self, child: Emitter<'a>) -> Result<(), InternalError> {
        if child.forked_from != Some(self.fork_point()) {
            return Err(InternalError::StaleFork);
        }
        sync_labels(&child, self);
        let base = self.instructions.len();
        for (index, position) in child.labels.iter().enumerate() {
            if let Some(position) = position {
                self.mark_label_at(Label(index as u32), base + position)?;
            }
        }
        self.instructions.extend(child.instructions);
        self.offset += child.offset;
        self.locals = child.locals;
        self.tables = child.tables;
        Ok(())
    }

    fn fork_point(&self) -> ForkPoint {
        ForkPoint {
            instructions: self.instructions.len(),
            locals: self.locals.len(),
            strings: self.tables.strings.len(),
            types: self.tables.types.len(),
            functions: self.tables.functions.len(),
        }
    }

    // === Finalization ===

    /// Resolve every branch to its short or long form.
    pub fn resolve_branches(&self) -> Result<BranchLayout, InternalError> {
        self.resolve_branches_from(&[])
    }

    /// Resolve branches starting from an earlier resolution. Branches that
    /// were long in `previous` stay long.
    pub fn resolve_branches_from(
        &self,
        previous: &[BranchRecord],
    ) -> Result<BranchLayout, InternalError> {
        let positions = self.label_positions()?;
        Ok(branch::resolve(&self.instructions, &positions, previous))
    }

    fn label_positions(&self) -> Result<Vec<usize>, InternalError> {
        self.labels
            .iter()
            .enumerate()
            .map(|(index, position)| position.ok_or(InternalError::UnresolvedLabel(Label(index as u32))))
            .collect()
    }

    /// Encode the instructions into a finished [`Code`].
    ///
    /// Fails if a label was defined but never marked.
    pub fn finalize(self) -> Result<Code<'a>, InternalError> {
        let positions = self.label_positions()?;
        let layout = branch::resolve(&self.instructions, &positions, &[]);

        let mut bytes = Vec::with_capacity(layout.code_len());
        let mut branches = layout.branches.iter().peekable();
        for (index, instruction) in self.instructions.iter().enumerate() {
            let start = layout.offsets[index];
            let end = layout.offsets[index + 1];
            debug_assert_eq!(bytes.len(), start);
            match instruction.operand {
                Operand::Label(label) => {
                    let record = branches
                        .next_if(|record| record.source == index)
                        .ok_or(InternalError::UnknownLabel(label))?;
                    let (short, long) = instruction
                        .op
                        .branch_forms()
                        .ok_or(InternalError::UnknownLabel(label))?;
                    let displacement =
                        layout.offsets[positions[label.index()]] as i64 - end as i64;
                    match record.form {
                        branch::BranchForm::Short => {
                            bytes.push(short as u8);
                            bytes.push(displacement as i8 as u8);
                        }
                        branch::BranchForm::Long => {
                            bytes.push(long as u8);
                            bytes.extend_from_slice(&(displacement as i32).to_le_bytes());
                        }
                    }
                }
                operand => {
                    bytes.push(instruction.op as u8);
                    encode_operand(&mut bytes, operand);
                }
            }
        }

        tracing::debug!(
            instructions = self.instructions.len(),
            bytes = bytes.len(),
            branches = layout.branches.len(),
            passes = layout.passes,
            locals = self.locals.len(),
            "Finalized code"
        );

        Ok(Code {
            version: FORMAT_VERSION,
            bytes,
            locals: self.locals.iter().map(|ty| ty.code()).collect(),
            strings: self.tables.strings,
            types: self.tables.types,
            functions: self.tables.functions,
            branches: layout.branches,
        })
    }
}

/// Define labels in `target` until it has as many as `source`.
///
/// Used when two emitters carry code for parallel paths that must agree on
/// label numbering.
pub fn sync_labels(source: &Emitter<'_>, target: &mut Emitter<'_>) {
    while target.label_count() < source.label_count() {
        target.define_label();
    }
}

fn wide_local(index: LocalSlot) -> Result<u16, InternalError> {
    u16::try_from(index).map_err(|_| InternalError::LocalOutOfRange(index))
}

fn next_token(len: usize, table: &'static str) -> Result<u16, InternalError> {
    u16::try_from(len).map_err(|_| InternalError::TableOverflow(table))
}

fn encode_operand(bytes: &mut Vec<u8>, operand: Operand) {
    match operand {
        Operand::None | Operand::Label(_) => {}
        Operand::I8(v) => bytes.push(v as u8),
        Operand::U8(v) => bytes.push(v),
        Operand::U16(v) | Operand::Token(v) => bytes.extend_from_slice(&v.to_le_bytes()),
        Operand::I32(v) => bytes.extend_from_slice(&v.to_le_bytes()),
        Operand::I64(v) => bytes.extend_from_slice(&v.to_le_bytes()),
        Operand::F32(v) => bytes.extend_from_slice(&v.to_le_bytes()),
        Operand::F64(v) => bytes.extend_from_slice(&v.to_le_bytes()),
        Operand::TypeCode(code) => bytes.push(code as u8),
    }
}
