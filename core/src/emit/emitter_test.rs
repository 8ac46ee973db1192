//! Tests for the instruction emitter.

use pretty_assertions::assert_eq;

use crate::compiler::InternalError;
use crate::emit::{
    BranchForm, BranchRecord, Emitter, Instruction, Label, Operand, sync_labels,
};
use crate::test_utils::init_test_logging;
use crate::types::Type;
use crate::values::Value;
use crate::vm::{OpCode, VM};

fn pad(emitter: &mut Emitter<'_>, bytes: usize) {
    for _ in 0..bytes {
        emitter.emit_op(OpCode::Nop).unwrap();
    }
}

fn ops(emitter: &Emitter<'_>) -> Vec<OpCode> {
    emitter.instructions().iter().map(|i| i.op).collect()
}

// === Locals ===

#[test]
fn test_local_encodings() {
    let mut e = Emitter::new();
    for _ in 0..300 {
        e.declare_local(Type::I32).unwrap();
    }

    e.emit_store_local(0).unwrap();
    e.emit_load_local(3).unwrap();
    e.emit_load_local(4).unwrap();
    e.emit_store_local(255).unwrap();
    e.emit_load_local(256).unwrap();
    e.emit_store_local(299).unwrap();

    assert_eq!(
        e.instructions(),
        &[
            Instruction::new(OpCode::Stloc0),
            Instruction::new(OpCode::Ldloc3),
            Instruction::with(OpCode::LdlocS, Operand::U8(4)),
            Instruction::with(OpCode::StlocS, Operand::U8(255)),
            Instruction::with(OpCode::Ldloc, Operand::U16(256)),
            Instruction::with(OpCode::Stloc, Operand::U16(299)),
        ]
    );
    // 1 + 1 + 2 + 2 + 3 + 3
    assert_eq!(e.current_offset(), 12);
}

#[test]
fn test_local_address_encodings() {
    let mut e = Emitter::new();
    for _ in 0..257 {
        e.declare_local(Type::F64).unwrap();
    }
    e.emit_load_local_address(2).unwrap();
    e.emit_load_local_address(256).unwrap();
    assert_eq!(ops(&e), vec![OpCode::LdlocaS, OpCode::Ldloca]);
}

#[test]
fn test_unallocated_local_is_rejected() {
    let mut e = Emitter::new();
    assert_eq!(e.emit_load_local(0), Err(InternalError::UnallocatedLocal(0)));

    e.declare_local(Type::Bool).unwrap();
    assert_eq!(e.emit_store_local(1), Err(InternalError::UnallocatedLocal(1)));
    assert!(e.is_empty());
}

#[test]
fn test_local_limit() {
    let mut e = Emitter::with_max_locals(2);
    assert_eq!(e.declare_local(Type::I32), Ok(0));
    assert_eq!(e.declare_local(Type::Str), Ok(1));
    assert_eq!(e.declare_local(Type::I32), Err(InternalError::TooManyLocals(2)));
    assert_eq!(e.local_type(1), Some(Type::Str));
    assert_eq!(e.local_count(), 2);
}

#[test]
fn test_store_then_load_through_vm() {
    let mut e = Emitter::new();
    for _ in 0..300 {
        e.declare_local(Type::I32).unwrap();
    }
    e.emit_load_i4(42).unwrap();
    e.emit_store_local(256).unwrap();
    e.emit_load_i4(-3).unwrap();
    e.emit_store_local(7).unwrap();
    e.emit_load_local(256).unwrap();
    e.emit_load_local(7).unwrap();
    e.emit_op(OpCode::Add).unwrap();
    e.emit_op(OpCode::Ret).unwrap();

    let code = e.finalize().unwrap();
    assert_eq!(code.num_locals(), 300);
    assert_eq!(VM::execute(&code, &[]), Ok(Value::I32(39)));
}

#[test]
fn test_local_address_then_ldobj() {
    let mut e = Emitter::new();
    let slot = e.declare_local(Type::I64).unwrap();
    e.emit_load_i8(7).unwrap();
    e.emit_store_local(slot).unwrap();
    e.emit_load_local_address(slot).unwrap();
    e.emit(Instruction::with(OpCode::Ldobj, Operand::Token(0)))
        .unwrap();
    e.emit_op(OpCode::Ret).unwrap();

    let code = e.finalize().unwrap();
    assert_eq!(VM::execute(&code, &[]), Ok(Value::I64(7)));
}

// === Operands ===

#[test]
fn test_operand_must_fit_opcode() {
    let mut e = Emitter::new();
    let result = e.emit(Instruction::with(OpCode::LdcI4, Operand::I8(1)));
    assert!(
        matches!(result, Err(InternalError::OperandMismatch { op: "ldc.i4", .. })),
        "{:?}",
        result
    );
    assert!(e.emit(Instruction::new(OpCode::LdcI8)).is_err());
    assert!(e.emit_branch(OpCode::Add, Label(0)).is_err());
}

#[test]
fn test_small_constants_use_short_form() {
    let mut e = Emitter::new();
    e.emit_load_i4(127).unwrap();
    e.emit_load_i4(-128).unwrap();
    e.emit_load_i4(128).unwrap();
    assert_eq!(ops(&e), vec![OpCode::LdcI4S, OpCode::LdcI4S, OpCode::LdcI4]);
}

#[test]
fn test_strings_are_interned() {
    let mut e = Emitter::new();
    e.emit_load_string("abc").unwrap();
    e.emit_load_string("xyz").unwrap();
    e.emit_load_string("abc").unwrap();
    e.emit_op(OpCode::Pop).unwrap();
    e.emit_op(OpCode::Pop).unwrap();
    e.emit_op(OpCode::Ret).unwrap();

    assert_eq!(e.instructions()[2].operand, Operand::Token(0));
    let code = e.finalize().unwrap();
    assert_eq!(code.strings.len(), 2);
    assert_eq!(VM::execute(&code, &[]), Ok(Value::str("abc")));
}

// === Arrays ===

#[test]
fn test_array_load_opcodes() {
    let cases = [
        (Type::Bool, OpCode::LdelemI1),
        (Type::I8, OpCode::LdelemI1),
        (Type::U8, OpCode::LdelemU1),
        (Type::I16, OpCode::LdelemI2),
        (Type::U16, OpCode::LdelemU2),
        (Type::I32, OpCode::LdelemI4),
        (Type::U32, OpCode::LdelemU4),
        (Type::I64, OpCode::LdelemI8),
        (Type::U64, OpCode::LdelemI8),
        (Type::F32, OpCode::LdelemR4),
        (Type::F64, OpCode::LdelemR8),
        (Type::Str, OpCode::LdelemRef),
        (Type::Array(&Type::I32), OpCode::LdelemRef),
    ];
    for (ty, expected) in cases {
        let mut e = Emitter::new();
        e.emit_array_load(ty).unwrap();
        assert_eq!(ops(&e), vec![expected], "load of {}", ty);
    }
}

#[test]
fn test_array_store_opcodes_share_signedness() {
    let cases = [
        (Type::I8, OpCode::StelemI1),
        (Type::U8, OpCode::StelemI1),
        (Type::I16, OpCode::StelemI2),
        (Type::U16, OpCode::StelemI2),
        (Type::I32, OpCode::StelemI4),
        (Type::U32, OpCode::StelemI4),
        (Type::I64, OpCode::StelemI8),
        (Type::U64, OpCode::StelemI8),
        (Type::F32, OpCode::StelemR4),
        (Type::F64, OpCode::StelemR8),
        (Type::Str, OpCode::StelemRef),
    ];
    for (ty, expected) in cases {
        let mut e = Emitter::new();
        e.emit_array_store(ty).unwrap();
        assert_eq!(ops(&e), vec![expected], "store of {}", ty);
    }
}

#[test]
fn test_named_element_goes_through_address() {
    let mut e = Emitter::new();
    e.emit_array_load(Type::Named("Money")).unwrap();
    e.emit_array_store(Type::Named("Money")).unwrap();
    assert_eq!(
        e.instructions(),
        &[
            Instruction::with(OpCode::Ldelema, Operand::Token(0)),
            Instruction::with(OpCode::Ldobj, Operand::Token(0)),
            Instruction::with(OpCode::Stelem, Operand::Token(0)),
        ]
    );
}

#[test]
fn test_unsigned_elements_round_trip() {
    let mut e = Emitter::new();
    e.emit_load_i4(2).unwrap();
    e.emit_new_array(Type::U8).unwrap();
    e.emit_op(OpCode::Dup).unwrap();
    e.emit_load_i4(1).unwrap();
    e.emit_load_i4(200).unwrap();
    e.emit_array_store(Type::U8).unwrap();
    e.emit_load_i4(1).unwrap();
    e.emit_array_load(Type::U8).unwrap();
    e.emit_op(OpCode::Ret).unwrap();

    let code = e.finalize().unwrap();
    assert_eq!(VM::execute(&code, &[]), Ok(Value::U8(200)));
}

// === Labels ===

#[test]
fn test_unresolved_label_fails_finalize() {
    let mut e = Emitter::new();
    let label = e.define_label();
    e.emit_branch(OpCode::Br, label).unwrap();
    assert_eq!(e.finalize().err(), Some(InternalError::UnresolvedLabel(label)));
}

#[test]
fn test_label_marked_once() {
    let mut e = Emitter::new();
    let label = e.define_label();
    e.mark_label(label).unwrap();
    e.emit_op(OpCode::Nop).unwrap();
    assert_eq!(e.mark_label(label), Err(InternalError::LabelAlreadyMarked(label)));
    assert_eq!(e.label_position(label), Some(0));
}

#[test]
fn test_foreign_label_is_rejected() {
    let mut other = Emitter::new();
    other.define_label();
    let foreign = other.define_label();

    let mut e = Emitter::new();
    e.define_label();
    assert_eq!(e.mark_label(foreign), Err(InternalError::UnknownLabel(foreign)));
    assert_eq!(
        e.emit_branch(OpCode::BrTrue, foreign),
        Err(InternalError::UnknownLabel(foreign))
    );
}

#[test]
fn test_sync_labels() {
    let mut a = Emitter::new();
    let mut b = Emitter::new();
    a.define_label();
    a.define_label();
    a.define_label();
    b.define_label();

    sync_labels(&a, &mut b);
    assert_eq!(b.label_count(), 3);
    assert_eq!(b.label_position(Label(2)), None);

    sync_labels(&b, &mut a);
    assert_eq!(a.label_count(), 3);
}

// === Branch sizing ===

#[test]
fn test_branch_127_bytes_ahead_is_short() {
    init_test_logging();

    let mut e = Emitter::new();
    let label = e.define_label();
    e.emit_branch(OpCode::Br, label).unwrap();
    pad(&mut e, 125);
    e.mark_label(label).unwrap();
    e.emit_op(OpCode::Ret).unwrap();

    let layout = e.resolve_branches().unwrap();
    assert_eq!(layout.form_of(0), Some(BranchForm::Short));
    assert_eq!(layout.offsets[126], 127);

    let code = e.finalize().unwrap();
    assert_eq!(code.bytes[0], OpCode::BrS as u8);
    assert_eq!(code.bytes[1] as i8, 125);
    assert_eq!(code.bytes.len(), 128);
}

#[test]
fn test_branch_128_bytes_ahead_is_long() {
    let mut e = Emitter::new();
    let label = e.define_label();
    e.emit_branch(OpCode::BrFalse, label).unwrap();
    pad(&mut e, 126);
    e.mark_label(label).unwrap();
    e.emit_op(OpCode::Ret).unwrap();

    let code = e.finalize().unwrap();
    assert_eq!(code.bytes[0], OpCode::BrFalse as u8);
    // Target at 5 + 126 once the branch itself is long.
    assert_eq!(i32::from_le_bytes(code.bytes[1..5].try_into().unwrap()), 126);
    assert_eq!(code.branches[0].form, BranchForm::Long);
}

#[test]
fn test_backward_branch_limits() {
    for (padding, expected) in [(126, BranchForm::Short), (127, BranchForm::Long)] {
        let mut e = Emitter::new();
        let top = e.define_label();
        e.mark_label(top).unwrap();
        pad(&mut e, padding);
        let source = e.emit_branch(OpCode::BrS, top).unwrap();
        let layout = e.resolve_branches().unwrap();
        assert_eq!(layout.form_of(source), Some(expected), "padding {}", padding);
    }
}

#[test]
fn test_widening_cascades_to_fixed_point() {
    init_test_logging();

    // b0 reaches l0 with exactly 127 bytes while everything is short; b1
    // is long from the start and its widening pushes l0 out of b0's reach.
    let mut e = Emitter::new();
    let l0 = e.define_label();
    let l1 = e.define_label();
    let b0 = e.emit_branch(OpCode::Br, l0).unwrap();
    let b1 = e.emit_branch(OpCode::BrTrue, l1).unwrap();
    pad(&mut e, 123);
    e.mark_label(l0).unwrap();
    pad(&mut e, 10);
    e.mark_label(l1).unwrap();
    e.emit_op(OpCode::Ret).unwrap();

    let layout = e.resolve_branches().unwrap();
    assert_eq!(layout.form_of(b0), Some(BranchForm::Long));
    assert_eq!(layout.form_of(b1), Some(BranchForm::Long));
    assert_eq!(layout.passes, 3);
    assert_eq!(layout.code_len(), 144);

    let code = e.finalize().unwrap();
    assert_eq!(i32::from_le_bytes(code.bytes[1..5].try_into().unwrap()), 128);
    assert_eq!(i32::from_le_bytes(code.bytes[6..10].try_into().unwrap()), 133);
}

#[test]
fn test_widening_is_idempotent() {
    let mut e = Emitter::new();
    let l0 = e.define_label();
    let l1 = e.define_label();
    e.emit_branch(OpCode::Br, l0).unwrap();
    e.emit_branch(OpCode::BrTrue, l1).unwrap();
    pad(&mut e, 123);
    e.mark_label(l0).unwrap();
    pad(&mut e, 10);
    e.mark_label(l1).unwrap();

    let first = e.resolve_branches().unwrap();
    let again = e.resolve_branches_from(&first.branches).unwrap();
    assert_eq!(again.branches, first.branches);
    assert_eq!(again.offsets, first.offsets);
    assert_eq!(again.passes, 1);
}

#[test]
fn test_seeded_long_branch_never_shrinks() {
    let mut e = Emitter::new();
    let label = e.define_label();
    let source = e.emit_branch(OpCode::Br, label).unwrap();
    e.emit_op(OpCode::Nop).unwrap();
    e.mark_label(label).unwrap();

    let seed = [BranchRecord {
        source,
        target: label,
        form: BranchForm::Long,
    }];
    let layout = e.resolve_branches_from(&seed).unwrap();
    assert_eq!(layout.form_of(source), Some(BranchForm::Long));
    assert_eq!(e.resolve_branches().unwrap().form_of(source), Some(BranchForm::Short));
}

#[test]
fn test_conditional_jump_through_vm() {
    // if arg then 1 else 2, with the else arm pushed past the short range.
    let mut e = Emitter::new();
    let else_label = e.define_label();
    let end = e.define_label();
    e.emit(Instruction::with(OpCode::LdArg, Operand::U16(0)))
        .unwrap();
    e.emit_branch(OpCode::BrFalse, else_label).unwrap();
    e.emit_load_i4(1).unwrap();
    e.emit_branch(OpCode::Br, end).unwrap();
    pad(&mut e, 200);
    e.mark_label(else_label).unwrap();
    e.emit_load_i4(2).unwrap();
    e.mark_label(end).unwrap();
    e.emit_op(OpCode::Ret).unwrap();

    let code = e.finalize().unwrap();
    assert!(code.branches.iter().all(|b| b.form == BranchForm::Long));
    assert_eq!(VM::execute(&code, &[Value::Bool(true)]), Ok(Value::I32(1)));
    assert_eq!(VM::execute(&code, &[Value::Bool(false)]), Ok(Value::I32(2)));
}

// === Parallel paths ===

#[test]
fn test_fork_and_splice() {
    let mut parent = Emitter::new();
    parent.emit_load_bool(true).unwrap();
    let shared = parent.define_label();

    let mut child = parent.fork();
    assert_eq!(child.label_count(), 1);
    let inner = child.define_label();
    let slot = child.declare_local(Type::I32).unwrap();
    child.emit_op(OpCode::Pop).unwrap();
    child.mark_label(inner).unwrap();
    child.emit_load_i4(5).unwrap();
    child.emit_store_local(slot).unwrap();
    child.emit_load_local(slot).unwrap();

    parent.splice(child).unwrap();
    assert_eq!(parent.label_count(), 2);
    assert_eq!(parent.label_position(inner), Some(2));
    assert_eq!(parent.label_position(shared), None);
    assert_eq!(parent.local_count(), 1);

    parent.mark_label(shared).unwrap();
    parent.emit_op(OpCode::Ret).unwrap();
    let code = parent.finalize().unwrap();
    assert_eq!(VM::execute(&code, &[]), Ok(Value::I32(5)));
}

#[test]
fn test_splice_after_parent_changed_is_stale() {
    let mut parent = Emitter::new();
    let child = parent.fork();
    parent.emit_op(OpCode::Nop).unwrap();
    assert_eq!(parent.splice(child), Err(InternalError::StaleFork));
}

#[test]
fn test_disassemble() {
    let mut e = Emitter::new();
    let label = e.define_label();
    e.emit(Instruction::with(OpCode::LdArg, Operand::U16(0)))
        .unwrap();
    e.emit_branch(OpCode::BrTrue, label).unwrap();
    e.emit_load_string("no").unwrap();
    e.emit_op(OpCode::Ret).unwrap();
    e.mark_label(label).unwrap();
    e.emit_load_string("yes").unwrap();
    e.emit_op(OpCode::Ret).unwrap();

    let code = e.finalize().unwrap();
    assert_eq!(
        code.disassemble(),
        "0000: ldarg 0\n\
         0003: brtrue.s -> 0009\n\
         0005: ldstr \"no\"\n\
         0008: ret\n\
         0009: ldstr \"yes\"\n\
         000c: ret\n"
    );
}
