//! Integration tests for the public API.
//!
//! These tests build expression trees the way a front end would, compile
//! them against a host environment and run the result.

use bumpalo::Bump;
use ember_core::api::{CompileOptions, Environment, EnvironmentError};
use ember_core::compiler::{BytecodeCompiler, CompileError};
use ember_core::diagnostics::MessageKey;
use ember_core::syntax::{BinaryOp, ComparisonOp, ExprBuilder};
use ember_core::types::{OperatorMethod, Type};
use ember_core::values::{HostFunction, Object, Value};
use ember_core::vm::{RuntimeError, VM};

#[test]
fn test_basic_compilation_and_execution() {
    let arena = Bump::new();
    let env = Environment::new();
    let b = ExprBuilder::new(&arena);

    let expr = b.binary(BinaryOp::Add, b.int(1), b.int(2));
    let code = BytecodeCompiler::compile(&env, &arena, expr, CompileOptions::default())
        .expect("compilation should succeed");

    let result = VM::execute(&code, &[]).expect("execution should succeed");
    assert_eq!(result.as_i32(), Some(3));
}

#[test]
fn test_parameterized_expression() {
    let arena = Bump::new();
    let mut env = Environment::new();
    env.declare_variable("x", Type::I64).unwrap();
    env.declare_variable("y", Type::I32).unwrap();
    let b = ExprBuilder::new(&arena);

    let expr = b.binary(BinaryOp::Sub, b.ident("x"), b.ident("y"));
    let code = BytecodeCompiler::compile(&env, &arena, expr, CompileOptions::default()).unwrap();

    // Compiled once, run many times.
    for (x, y) in [(10, 3), (0, 7), (i64::MAX, -1)] {
        let result = VM::execute(&code, &[Value::I64(x), Value::I32(y as i32)]);
        assert_eq!(result, Ok(Value::I64(x.wrapping_sub(y))));
    }
}

#[test]
fn test_environment_rejects_duplicates() {
    let mut env = Environment::new();
    env.declare_variable("x", Type::I32).unwrap();
    assert_eq!(
        env.declare_variable("x", Type::F64),
        Err(EnvironmentError::DuplicateVariable("x".into()))
    );

    let noop = HostFunction::new(|_| Ok(Value::Null));
    env.register_function("f", &[], Type::Bool, noop.clone()).unwrap();
    assert_eq!(
        env.register_function("f", &[Type::I32], Type::Bool, noop.clone()),
        Err(EnvironmentError::DuplicateFunction("f".into()))
    );

    let money = Type::Named("Money");
    let method = OperatorMethod::new("Addition", &[money, money], money, noop);
    env.register_operator(money, method.clone()).unwrap();
    assert!(matches!(
        env.register_operator(money, method),
        Err(EnvironmentError::DuplicateOperator(_))
    ));
}

#[test]
fn test_rule_over_host_objects() {
    // order.total > limit or vip(order), with totals in cents.
    let arena = Bump::new();
    let order = Type::Named("Order");
    let mut env = Environment::new();
    env.declare_variable("order", order).unwrap();
    env.declare_variable("limit", Type::I64).unwrap();
    env.register_function(
        "total",
        &[order],
        Type::I64,
        HostFunction::new(|args| {
            args[0]
                .as_object()
                .and_then(|o| o.field(0))
                .cloned()
                .ok_or_else(|| RuntimeError::Host("expected Order".into()))
        }),
    )
    .unwrap();
    env.register_function(
        "vip",
        &[order],
        Type::Bool,
        HostFunction::new(|args| {
            args[0]
                .as_object()
                .and_then(|o| o.field(1))
                .cloned()
                .ok_or_else(|| RuntimeError::Host("expected Order".into()))
        }),
    )
    .unwrap();

    let b = ExprBuilder::new(&arena);
    let expr = b.or(
        b.compare(
            ComparisonOp::Gt,
            b.call("total", &[b.ident("order")]),
            b.ident("limit"),
        ),
        b.call("vip", &[b.ident("order")]),
    );
    let code = BytecodeCompiler::compile(&env, &arena, expr, CompileOptions::default()).unwrap();

    let make = |total: i64, vip: bool| {
        Value::Object(Object::new("Order", vec![Value::I64(total), Value::Bool(vip)]))
    };
    let limit = Value::I64(10_000);
    assert_eq!(VM::execute(&code, &[make(20_000, false), limit.clone()]), Ok(Value::Bool(true)));
    assert_eq!(VM::execute(&code, &[make(500, true), limit.clone()]), Ok(Value::Bool(true)));
    assert_eq!(VM::execute(&code, &[make(500, false), limit]), Ok(Value::Bool(false)));
}

#[test]
fn test_resolution_error_carries_message_and_span() {
    let arena = Bump::new();
    let env = Environment::new();
    let b = ExprBuilder::new(&arena);

    let expr = b.binary(BinaryOp::Add, b.bool(true), b.int(1));
    let error = BytecodeCompiler::compile(&env, &arena, expr, CompileOptions::default())
        .unwrap_err();
    match &error {
        CompileError::Resolution(resolution) => {
            assert_eq!(resolution.key, MessageKey::OperationNotDefinedForTypes);
            assert_eq!(resolution.key.code(), "E001");
        }
        other => panic!("unexpected error {:?}", other),
    }
    assert_eq!(
        error.to_string(),
        "operation '+' is not defined for types 'Boolean' and 'Int32'"
    );
}

#[test]
fn test_check_reports_result_type() {
    let arena = Bump::new();
    let mut env = Environment::new();
    env.declare_variable("s", Type::Str).unwrap();
    let b = ExprBuilder::new(&arena);

    let expr = b.binary(BinaryOp::Add, b.ident("s"), b.string("!"));
    assert_eq!(BytecodeCompiler::check(&env, &arena, expr), Ok(Type::Str));

    let code = BytecodeCompiler::compile(&env, &arena, expr, CompileOptions::default()).unwrap();
    assert_eq!(VM::execute(&code, &[Value::str("hi")]), Ok(Value::str("hi!")));
}

/// Built once and shared by every compilation below.
fn host_environment() -> Environment<'static> {
    let money = Type::Named("Money");
    let mut env = Environment::new();
    env.declare_variable("price", money).unwrap();
    env.declare_variable("qty", Type::I32).unwrap();
    env.register_function(
        "cents",
        &[money],
        Type::I64,
        HostFunction::new(|args| {
            args[0]
                .as_object()
                .and_then(|o| o.field(0))
                .cloned()
                .ok_or_else(|| RuntimeError::Host("expected Money".into()))
        }),
    )
    .unwrap();
    let equal = HostFunction::new(|args| {
        let cents = |v: &Value| v.as_object().and_then(|o| o.field(0)).cloned();
        Ok(Value::Bool(cents(&args[0]) == cents(&args[1])))
    });
    env.register_operator(
        money,
        OperatorMethod::new("Equality", &[money, money], Type::Bool, equal),
    )
    .unwrap();
    env
}

#[test]
fn test_shared_environment_with_per_expression_arenas() {
    let env = host_environment();
    let price = Value::Object(Object::new("Money", vec![Value::I64(250)]));
    let args = [price, Value::I32(4)];

    for factor in 1..=3 {
        // Each expression lives only as long as its own arena.
        let arena = Bump::new();
        let b = ExprBuilder::new(&arena);
        let expr = b.binary(
            BinaryOp::Mul,
            b.call("cents", &[b.ident("price")]),
            b.binary(BinaryOp::Mul, b.ident("qty"), b.int(factor)),
        );
        let code =
            BytecodeCompiler::compile(&env, &arena, expr, CompileOptions::default()).unwrap();
        assert_eq!(
            VM::execute(&code, &args),
            Ok(Value::I64(250 * 4 * factor as i64))
        );
    }

    let arena = Bump::new();
    let b = ExprBuilder::new(&arena);
    let expr = b.compare(ComparisonOp::Eq, b.ident("price"), b.ident("price"));
    let code = BytecodeCompiler::compile(&env, &arena, expr, CompileOptions::default()).unwrap();
    assert_eq!(VM::execute(&code, &args), Ok(Value::Bool(true)));
}
