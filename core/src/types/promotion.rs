//! Implicit numeric promotion.
//!
//! The conversion table mirrors the usual widening rules: an integer converts
//! to any wider integer that can represent all of its values, and every
//! integer converts to both floating point types. Binary operations promote
//! both operands to the first entry of [`BINARY_RESULT_TYPES`] that both can
//! reach, so small integers compute in `I32` and mixed signedness widens.

use super::Type;

/// Candidate result types for binary numeric operations, in promotion order.
const BINARY_RESULT_TYPES: [Type<'static>; 6] =
    [Type::I32, Type::U32, Type::I64, Type::U64, Type::F32, Type::F64];

/// True for every signed and unsigned integer width and for `Bool`.
pub fn is_integral_type(ty: Type<'_>) -> bool {
    matches!(
        ty,
        Type::Bool
            | Type::I8
            | Type::U8
            | Type::I16
            | Type::U16
            | Type::I32
            | Type::U32
            | Type::I64
            | Type::U64
    )
}

/// True for integer and floating point types (not `Bool`).
pub fn is_numeric_type(ty: Type<'_>) -> bool {
    ty != Type::Bool && (is_integral_type(ty) || ty.is_float())
}

/// Whether a value of `from` can be used where `to` is expected without an
/// explicit cast. Only primitive types are covered here; conversions to and
/// from named types go through `operator_Implicit`.
pub fn is_implicitly_convertible(from: Type<'_>, to: Type<'_>) -> bool {
    if from == to {
        return true;
    }
    use Type::*;
    match from {
        I8 => matches!(to, I16 | I32 | I64 | F32 | F64),
        U8 => matches!(to, I16 | U16 | I32 | U32 | I64 | U64 | F32 | F64),
        I16 => matches!(to, I32 | I64 | F32 | F64),
        U16 => matches!(to, I32 | U32 | I64 | U64 | F32 | F64),
        I32 => matches!(to, I64 | F32 | F64),
        U32 => matches!(to, I64 | U64 | F32 | F64),
        I64 | U64 => matches!(to, F32 | F64),
        F32 => to == F64,
        _ => false,
    }
}

/// Common type both numeric operands are promoted to before a binary
/// arithmetic or comparison operation. `None` if either is not numeric or no
/// common type exists.
pub fn get_binary_result_type<'a>(left: Type<'a>, right: Type<'a>) -> Option<Type<'a>> {
    if !is_numeric_type(left) || !is_numeric_type(right) {
        return None;
    }
    BINARY_RESULT_TYPES
        .iter()
        .copied()
        .find(|&candidate| {
            is_implicitly_convertible(left, candidate) && is_implicitly_convertible(right, candidate)
        })
}

/// Operand type for a bitwise operation (`and`, `or`, `xor` on integers).
///
/// Returns `None` unless both operands are integral. Two booleans stay
/// boolean; a boolean never mixes with an integer. Integer pairs use the
/// binary promotion table, and a pair that only meets at a floating point
/// type (`U64` with a signed type) has no bitwise operand type.
pub fn get_bitwise_operand_type<'a>(left: Type<'a>, right: Type<'a>) -> Option<Type<'a>> {
    if !is_integral_type(left) || !is_integral_type(right) {
        return None;
    }
    match (left, right) {
        (Type::Bool, Type::Bool) => Some(Type::Bool),
        (Type::Bool, _) | (_, Type::Bool) => None,
        _ => get_binary_result_type(left, right).filter(|&ty| is_integral_type(ty)),
    }
}

/// Type an integral operand is promoted to for unary and shift operations.
pub fn get_unary_promoted_type(ty: Type<'_>) -> Option<Type<'static>> {
    use Type::*;
    match ty {
        I8 | U8 | I16 | U16 | I32 => Some(I32),
        U32 => Some(U32),
        I64 => Some(I64),
        U64 => Some(U64),
        F32 => Some(F32),
        F64 => Some(F64),
        _ => None,
    }
}
