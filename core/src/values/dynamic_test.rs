//! Tests for runtime values.

use crate::types::TypeCode;
use crate::values::{ArrayRef, Object, Value};

#[test]
fn test_convert_widening_is_exact() {
    assert_eq!(Value::U8(200).convert(TypeCode::I32), Some(Value::I32(200)));
    assert_eq!(Value::I32(-7).convert(TypeCode::I64), Some(Value::I64(-7)));
    assert_eq!(Value::U32(u32::MAX).convert(TypeCode::I64), Some(Value::I64(4294967295)));
    assert_eq!(Value::I32(3).convert(TypeCode::F64), Some(Value::F64(3.0)));
}

#[test]
fn test_convert_narrowing_truncates() {
    assert_eq!(Value::I32(300).convert(TypeCode::U8), Some(Value::U8(44)));
    assert_eq!(Value::I32(-1).convert(TypeCode::U32), Some(Value::U32(u32::MAX)));
    assert_eq!(Value::F64(2.9).convert(TypeCode::I32), Some(Value::I32(2)));
}

#[test]
fn test_convert_identity_and_non_numeric() {
    assert_eq!(Value::str("a").convert(TypeCode::Str), Some(Value::str("a")));
    assert_eq!(Value::Bool(true).convert(TypeCode::I32), None);
    assert_eq!(Value::I32(1).convert(TypeCode::Str), None);
}

#[test]
fn test_default_values() {
    assert_eq!(Value::default_for(TypeCode::I16), Value::I16(0));
    assert_eq!(Value::default_for(TypeCode::Bool), Value::Bool(false));
    assert_eq!(Value::default_for(TypeCode::Object), Value::Null);
}

#[test]
fn test_array_is_shared() {
    let array = ArrayRef::new(TypeCode::I32, 3);
    let alias = array.clone();
    alias.items.borrow_mut()[1] = Value::I32(9);
    assert_eq!(array.get(1), Some(Value::I32(9)));
    assert_eq!(array.get(3), None);
    assert_eq!(array.len(), 3);
}

#[test]
fn test_display() {
    let array = ArrayRef::from_values(TypeCode::I32, vec![Value::I32(1), Value::I32(2)]);
    assert_eq!(Value::Array(array).to_string(), "[1, 2]");
    assert_eq!(Value::str("hi").to_string(), "\"hi\"");
    let money = Object::new("Money", vec![Value::I64(100)]);
    assert_eq!(Value::Object(money).to_string(), "<Money>");
}
