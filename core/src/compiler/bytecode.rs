//! Bytecode compiler implementation.

use core::mem;

use bumpalo::Bump;
use hashbrown::HashMap;

use super::error::{CompileError, InternalError, ResolutionError};
use super::short_circuit::{ChainCompiler, Connective, ShortCircuitFrame};
use crate::api::{CompileOptions, Environment};
use crate::diagnostics::MessageKey;
use crate::emit::{Emitter, Instruction, LocalSlot, Operand};
use crate::syntax::{
    BinaryOp, ComparisonOp, Expr, ExprKind, Literal, LogicalOp, ShiftOp, Span, UnaryOp,
};
use crate::types::promotion::get_unary_promoted_type;
use crate::types::{
    OperatorMethod, Type, get_binary_result_type, get_bitwise_operand_type,
    is_implicitly_convertible, is_integral_type, is_numeric_type,
};
use crate::vm::{Code, OpCode};

/// How an operator node is carried out, decided while typing.
#[derive(Clone, Debug)]
enum Resolution<'a> {
    /// Built-in instruction on operands converted to this type.
    Primitive(Type<'a>),
    /// Call to a host operator method, operands converted to its parameters.
    Overload(OperatorMethod<'a>),
}

/// Compiles an expression tree into [`Code`].
///
/// Compilation runs in two passes over the tree. Typing computes the static
/// type of every node bottom-up, memoized per node, and decides how each
/// operator is carried out. Emission then walks the tree again and writes
/// instructions through the [`Emitter`].
pub struct BytecodeCompiler<'env, 'a> {
    env: &'env Environment<'a>,
    arena: &'a Bump,
    emitter: Emitter<'a>,

    /// Static type of every node typed so far.
    types: HashMap<*const Expr<'a>, Type<'a>>,

    /// Resolution of operator nodes.
    resolutions: HashMap<*const Expr<'a>, Resolution<'a>>,

    /// Equality test used for each item of an `in` list, keyed by item.
    memberships: HashMap<*const Expr<'a>, Resolution<'a>>,

    /// `where` bindings in scope while typing, innermost last.
    type_scope: Vec<(&'a str, Type<'a>)>,

    /// `where` bindings in scope while emitting, innermost last.
    local_scope: Vec<(&'a str, LocalSlot)>,

    /// Idle short-circuit frames, reused across chains.
    frames: Vec<ShortCircuitFrame<'a>>,
}

impl<'env, 'a> BytecodeCompiler<'env, 'a> {
    pub fn new(env: &'env Environment<'a>, arena: &'a Bump, options: CompileOptions) -> Self {
        Self {
            env,
            arena,
            emitter: Emitter::with_max_locals(options.max_locals),
            types: HashMap::new(),
            resolutions: HashMap::new(),
            memberships: HashMap::new(),
            type_scope: Vec::new(),
            local_scope: Vec::new(),
            frames: Vec::new(),
        }
    }

    /// Compile `expr` into finished code ending with `ret`.
    pub fn compile(
        env: &'env Environment<'a>,
        arena: &'a Bump,
        expr: &'a Expr<'a>,
        options: CompileOptions,
    ) -> Result<Code<'a>, CompileError> {
        let mut compiler = Self::new(env, arena, options);
        let ty = compiler.type_of(expr)?;
        tracing::debug!(result_type = %ty, "Compiling expression");

        compiler.compile_expr(expr)?;
        compiler.emitter.emit_op(OpCode::Ret)?;
        let code = compiler.emitter.finalize()?;

        tracing::debug!(
            bytes = code.bytes.len(),
            locals = code.num_locals(),
            "Compiled expression"
        );
        Ok(code)
    }

    /// Static type of `expr` without emitting code.
    pub fn check(
        env: &'env Environment<'a>,
        arena: &'a Bump,
        expr: &'a Expr<'a>,
    ) -> Result<Type<'a>, CompileError> {
        Self::new(env, arena, CompileOptions::default()).type_of(expr)
    }

    // ========================================================================
    // Typing
    // ========================================================================

    fn type_of(&mut self, expr: &'a Expr<'a>) -> Result<Type<'a>, CompileError> {
        let key = expr as *const Expr<'a>;
        if let Some(&ty) = self.types.get(&key) {
            return Ok(ty);
        }
        let ty = self.infer(expr)?;
        self.types.insert(key, ty);
        Ok(ty)
    }

    fn infer(&mut self, expr: &'a Expr<'a>) -> Result<Type<'a>, CompileError> {
        let key = expr as *const Expr<'a>;
        let span = expr.span;
        match expr.kind {
            ExprKind::Literal(literal) => Ok(match literal {
                Literal::Bool(_) => Type::Bool,
                Literal::Int(_) => Type::I32,
                Literal::UInt(_) => Type::U32,
                Literal::Long(_) => Type::I64,
                Literal::ULong(_) => Type::U64,
                Literal::Single(_) => Type::F32,
                Literal::Double(_) => Type::F64,
                Literal::Str(_) => Type::Str,
            }),

            ExprKind::Ident(name) => {
                if let Some(&(_, ty)) = self.type_scope.iter().rev().find(|(n, _)| *n == name) {
                    return Ok(ty);
                }
                match self.env.variable(name) {
                    Some((_, ty)) => Ok(ty),
                    None => Err(resolution_error(MessageKey::UndefinedName, &[&name], span)),
                }
            }

            ExprKind::Unary { op, operand } => {
                let ty = self.type_of(operand)?;
                if let Type::Named(_) = ty {
                    let method = self.find_unary_overload(op, ty);
                    return self.record_overload(key, method, || {
                        resolution_error(MessageKey::OperationNotDefinedForType, &[&op, &ty], span)
                    });
                }
                let result = match (op, ty) {
                    (UnaryOp::Not, Type::Bool) => Some(Type::Bool),
                    (UnaryOp::Not, ty) if is_integral_type(ty) => get_unary_promoted_type(ty),
                    (UnaryOp::Neg, Type::U32) => Some(Type::I64),
                    (UnaryOp::Neg, Type::U64) => None,
                    (UnaryOp::Neg, ty) if is_numeric_type(ty) => get_unary_promoted_type(ty),
                    _ => None,
                };
                let result = result.ok_or_else(|| {
                    resolution_error(MessageKey::OperationNotDefinedForType, &[&op, &ty], span)
                })?;
                self.resolutions.insert(key, Resolution::Primitive(result));
                Ok(result)
            }

            ExprKind::Binary { op, left, right } => {
                let (lt, rt) = (self.type_of(left)?, self.type_of(right)?);
                let not_defined = || {
                    resolution_error(MessageKey::OperationNotDefinedForTypes, &[&op, &lt, &rt], span)
                };
                if is_named(lt) || is_named(rt) {
                    let method = self.find_binary_overload(binary_method(op), lt, rt)?;
                    return self.record_overload(key, method, not_defined);
                }
                let operand_type = match (op, lt, rt) {
                    (BinaryOp::Add, Type::Str, Type::Str) => Some(Type::Str),
                    (BinaryOp::Pow, lt, rt) if is_numeric_type(lt) && is_numeric_type(rt) => {
                        Some(Type::F64)
                    }
                    _ => get_binary_result_type(lt, rt),
                };
                let operand_type = operand_type.ok_or_else(not_defined)?;
                self.resolutions.insert(key, Resolution::Primitive(operand_type));
                Ok(operand_type)
            }

            ExprKind::Comparison { op, left, right } => {
                let (lt, rt) = (self.type_of(left)?, self.type_of(right)?);
                let not_defined = || {
                    resolution_error(MessageKey::OperationNotDefinedForTypes, &[&op, &lt, &rt], span)
                };
                if is_named(lt) || is_named(rt) {
                    let method = self.find_binary_overload(comparison_method(op), lt, rt)?;
                    return self.record_overload(key, method, not_defined);
                }
                let operand_type = comparison_operand_type(op, lt, rt).ok_or_else(not_defined)?;
                self.resolutions.insert(key, Resolution::Primitive(operand_type));
                Ok(Type::Bool)
            }

            ExprKind::Logical { op, left, right } => {
                let (lt, rt) = (self.type_of(left)?, self.type_of(right)?);
                if lt == Type::Bool && rt == Type::Bool {
                    return Ok(Type::Bool);
                }
                let not_defined = || {
                    resolution_error(MessageKey::OperationNotDefinedForTypes, &[&op, &lt, &rt], span)
                };
                if is_named(lt) || is_named(rt) {
                    let name = match op {
                        LogicalOp::And => "BitwiseAnd",
                        LogicalOp::Or => "BitwiseOr",
                    };
                    let method = self.find_binary_overload(name, lt, rt)?;
                    return self.record_overload(key, method, not_defined);
                }
                let operand_type = get_bitwise_operand_type(lt, rt).ok_or_else(not_defined)?;
                self.resolutions.insert(key, Resolution::Primitive(operand_type));
                Ok(operand_type)
            }

            ExprKind::Xor { left, right } => {
                let (lt, rt) = (self.type_of(left)?, self.type_of(right)?);
                let not_defined = || {
                    resolution_error(MessageKey::OperationNotDefinedForTypes, &[&"xor", &lt, &rt], span)
                };
                if is_named(lt) || is_named(rt) {
                    let method = self.find_binary_overload("ExclusiveOr", lt, rt)?;
                    return self.record_overload(key, method, not_defined);
                }
                let operand_type = get_bitwise_operand_type(lt, rt).ok_or_else(not_defined)?;
                self.resolutions.insert(key, Resolution::Primitive(operand_type));
                Ok(operand_type)
            }

            ExprKind::Shift { op, left, right } => {
                let (lt, rt) = (self.type_of(left)?, self.type_of(right)?);
                if !is_integral_type(rt) || rt == Type::Bool {
                    return Err(resolution_error(MessageKey::ShiftCountNotInteger, &[&rt], right.span));
                }
                if is_named(lt) {
                    let name = match op {
                        ShiftOp::Left => "LeftShift",
                        ShiftOp::Right => "RightShift",
                    };
                    let method = self
                        .env
                        .operators()
                        .find_overloaded_operator(name, lt, &[lt, Type::I32])
                        .cloned();
                    return self.record_overload(key, method, || {
                        resolution_error(MessageKey::OperationNotDefinedForType, &[&op, &lt], span)
                    });
                }
                let result = match lt {
                    Type::Bool => None,
                    lt if is_integral_type(lt) => get_unary_promoted_type(lt),
                    _ => None,
                };
                let result = result.ok_or_else(|| {
                    resolution_error(MessageKey::OperationNotDefinedForType, &[&op, &lt], span)
                })?;
                self.resolutions.insert(key, Resolution::Primitive(result));
                Ok(result)
            }

            ExprKind::Conditional {
                cond,
                then_branch,
                else_branch,
            } => {
                let ct = self.type_of(cond)?;
                if ct != Type::Bool {
                    return Err(resolution_error(MessageKey::ConditionNotBoolean, &[&ct], cond.span));
                }
                let (tt, et) = (self.type_of(then_branch)?, self.type_of(else_branch)?);
                self.unify(tt, et)?.ok_or_else(|| {
                    resolution_error(MessageKey::BranchTypeMismatch, &[&tt, &et], span)
                })
            }

            ExprKind::In { operand, items } => {
                let ot = self.type_of(operand)?;
                for &item in items {
                    let it = self.type_of(item)?;
                    let test = if is_named(ot) || is_named(it) {
                        self.find_binary_overload("Equality", ot, it)?
                            .map(Resolution::Overload)
                    } else {
                        comparison_operand_type(ComparisonOp::Eq, ot, it).map(Resolution::Primitive)
                    };
                    let test = test.ok_or_else(|| {
                        resolution_error(MessageKey::MembershipTypeMismatch, &[&ot, &it], item.span)
                    })?;
                    self.memberships.insert(item as *const Expr<'a>, test);
                }
                Ok(Type::Bool)
            }

            ExprKind::Index { array, index } => {
                let at = self.type_of(array)?;
                let element = at
                    .element()
                    .ok_or_else(|| resolution_error(MessageKey::NotAnArray, &[&at], array.span))?;
                let it = self.type_of(index)?;
                if !is_integral_type(it) || it == Type::Bool {
                    return Err(resolution_error(MessageKey::IndexNotInteger, &[&it], index.span));
                }
                Ok(element)
            }

            ExprKind::Array { elements } => {
                let Some((&first, rest)) = elements.split_first() else {
                    return Err(resolution_error(MessageKey::EmptyArrayLiteral, &[], span));
                };
                let mut element = self.type_of(first)?;
                for &other in rest {
                    let ot = self.type_of(other)?;
                    element = self.unify(element, ot)?.ok_or_else(|| {
                        resolution_error(MessageKey::ArrayElementMismatch, &[&element, &ot], other.span)
                    })?;
                }
                Ok(Type::Array(self.arena.alloc(element)))
            }

            ExprKind::Call { name, args } => {
                let env = self.env;
                let signature = env
                    .function(name)
                    .ok_or_else(|| resolution_error(MessageKey::UndefinedFunction, &[&name], span))?;
                if signature.params.len() != args.len() {
                    return Err(resolution_error(
                        MessageKey::ArgumentCountMismatch,
                        &[&name, &signature.params.len(), &args.len()],
                        span,
                    ));
                }
                for (&arg, &param) in args.iter().zip(&signature.params) {
                    let at = self.type_of(arg)?;
                    if !self.can_convert(at, param)? {
                        return Err(resolution_error(
                            MessageKey::CannotConvertType,
                            &[&at, &param],
                            arg.span,
                        ));
                    }
                }
                Ok(signature.ret)
            }

            ExprKind::Cast { expr: inner, target } => {
                let source = self.type_of(inner)?;
                let convertible = self.can_convert(source, target)?
                    || (is_numeric_type(source) && is_numeric_type(target))
                    || self.find_conversion("Explicit", source, target)?.is_some();
                if convertible {
                    Ok(target)
                } else {
                    Err(resolution_error(MessageKey::NoExplicitConversion, &[&source, &target], span))
                }
            }

            ExprKind::Where { body, bindings } => {
                let depth = self.type_scope.len();
                let result = self.infer_where(body, bindings);
                self.type_scope.truncate(depth);
                result
            }
        }
    }

    fn infer_where(
        &mut self,
        body: &'a Expr<'a>,
        bindings: &'a [(&'a str, &'a Expr<'a>)],
    ) -> Result<Type<'a>, CompileError> {
        for &(name, value) in bindings {
            let ty = self.type_of(value)?;
            self.type_scope.push((name, ty));
        }
        self.type_of(body)
    }

    fn record_overload(
        &mut self,
        key: *const Expr<'a>,
        method: Option<OperatorMethod<'a>>,
        not_found: impl FnOnce() -> CompileError,
    ) -> Result<Type<'a>, CompileError> {
        let method = method.ok_or_else(not_found)?;
        let ret = method.ret;
        self.resolutions.insert(key, Resolution::Overload(method));
        Ok(ret)
    }

    /// Whether `from` converts to `to` without a cast: numeric widening or
    /// an `operator_Implicit` on either type.
    fn can_convert(&self, from: Type<'a>, to: Type<'a>) -> Result<bool, CompileError> {
        if is_implicitly_convertible(from, to) {
            return Ok(true);
        }
        Ok(self.find_conversion("Implicit", from, to)?.is_some())
    }

    fn find_conversion(
        &self,
        name: &str,
        from: Type<'a>,
        to: Type<'a>,
    ) -> Result<Option<OperatorMethod<'a>>, CompileError> {
        if !is_named(from) && !is_named(to) {
            return Ok(None);
        }
        let found = self
            .env
            .operators()
            .find_simple_overloaded_operator(name, from, to)?;
        Ok(found.cloned())
    }

    /// Common type of two values that meet (conditional arms, array elements).
    fn unify(&self, a: Type<'a>, b: Type<'a>) -> Result<Option<Type<'a>>, CompileError> {
        if is_implicitly_convertible(a, b) {
            return Ok(Some(b));
        }
        if is_implicitly_convertible(b, a) {
            return Ok(Some(a));
        }
        if let Some(common) = get_binary_result_type(a, b) {
            return Ok(Some(common));
        }
        if self.can_convert(a, b)? {
            return Ok(Some(b));
        }
        if self.can_convert(b, a)? {
            return Ok(Some(a));
        }
        Ok(None)
    }

    fn find_unary_overload(&self, op: UnaryOp, ty: Type<'a>) -> Option<OperatorMethod<'a>> {
        let name = match op {
            UnaryOp::Neg => "UnaryNegation",
            UnaryOp::Not => "LogicalNot",
        };
        self.env
            .operators()
            .find_overloaded_operator(name, ty, &[ty])
            .cloned()
    }

    /// Find `operator_<name>` taking `(left, right)`.
    ///
    /// The exact signature is tried first on both operand types, then with
    /// the right operand implicitly converted to the left type, then the
    /// other way round. Lookups never widen on their own.
    fn find_binary_overload(
        &self,
        name: &str,
        left: Type<'a>,
        right: Type<'a>,
    ) -> Result<Option<OperatorMethod<'a>>, CompileError> {
        let mut signatures = vec![[left, right]];
        if left != right {
            if self.can_convert(right, left)? {
                signatures.push([left, left]);
            }
            if self.can_convert(left, right)? {
                signatures.push([right, right]);
            }
        }

        let operators = self.env.operators();
        for signature in &signatures {
            for declaring_type in [left, right] {
                if let Some(method) =
                    operators.find_overloaded_operator(name, declaring_type, signature)
                {
                    return Ok(Some(method.clone()));
                }
            }
        }
        Ok(None)
    }

    // ========================================================================
    // Emission
    // ========================================================================

    fn compile_expr(&mut self, expr: &'a Expr<'a>) -> Result<(), CompileError> {
        match expr.kind {
            // === Constants ===
            ExprKind::Literal(literal) => {
                let emitter = &mut self.emitter;
                match literal {
                    Literal::Bool(value) => emitter.emit_load_bool(value)?,
                    Literal::Int(value) => emitter.emit_load_i4(value)?,
                    Literal::UInt(value) => {
                        emitter.emit_load_i4(value as i32)?;
                        emitter.emit(Instruction::with(
                            OpCode::Conv,
                            Operand::TypeCode(Type::U32.code()),
                        ))?;
                    }
                    Literal::Long(value) => emitter.emit_load_i8(value)?,
                    Literal::ULong(value) => {
                        emitter.emit_load_i8(value as i64)?;
                        emitter.emit(Instruction::with(
                            OpCode::Conv,
                            Operand::TypeCode(Type::U64.code()),
                        ))?;
                    }
                    Literal::Single(value) => emitter.emit_load_r4(value)?,
                    Literal::Double(value) => emitter.emit_load_r8(value)?,
                    Literal::Str(value) => emitter.emit_load_string(value)?,
                }
            }

            // === Variables ===
            ExprKind::Ident(name) => {
                if let Some(&(_, slot)) = self.local_scope.iter().rev().find(|(n, _)| *n == name) {
                    self.emitter.emit_load_local(slot)?;
                } else {
                    let (index, _) = self.env.variable(name).ok_or_else(|| {
                        resolution_error(MessageKey::UndefinedName, &[&name], expr.span)
                    })?;
                    self.emitter
                        .emit(Instruction::with(OpCode::LdArg, Operand::U16(index)))?;
                }
            }

            // === Operators ===
            ExprKind::Unary { op, operand } => {
                match self.resolution(expr)? {
                    Resolution::Overload(method) => self.emit_overload_call(&method, &[operand])?,
                    Resolution::Primitive(ty) => {
                        self.compile_converted(operand, ty)?;
                        self.emitter.emit_op(match op {
                            UnaryOp::Neg => OpCode::Neg,
                            UnaryOp::Not => OpCode::Not,
                        })?;
                    }
                }
            }

            ExprKind::Binary { op, left, right } => {
                let instruction = match op {
                    BinaryOp::Add => OpCode::Add,
                    BinaryOp::Sub => OpCode::Sub,
                    BinaryOp::Mul => OpCode::Mul,
                    BinaryOp::Div => OpCode::Div,
                    BinaryOp::Rem => OpCode::Rem,
                    BinaryOp::Pow => OpCode::Pow,
                };
                self.compile_binary(expr, instruction, left, right)?;
            }

            ExprKind::Comparison { op, left, right } => {
                let instruction = match op {
                    ComparisonOp::Eq => OpCode::Ceq,
                    ComparisonOp::Neq => OpCode::Cne,
                    ComparisonOp::Lt => OpCode::Clt,
                    ComparisonOp::Gt => OpCode::Cgt,
                    ComparisonOp::Le => OpCode::Cle,
                    ComparisonOp::Ge => OpCode::Cge,
                };
                self.compile_binary(expr, instruction, left, right)?;
            }

            ExprKind::Logical { op, left, right } => {
                if self.connective(expr).is_some() {
                    self.compile_short_circuit(expr)?;
                } else {
                    let instruction = match op {
                        LogicalOp::And => OpCode::And,
                        LogicalOp::Or => OpCode::Or,
                    };
                    self.compile_binary(expr, instruction, left, right)?;
                }
            }

            ExprKind::Xor { left, right } => {
                self.compile_binary(expr, OpCode::Xor, left, right)?;
            }

            ExprKind::Shift { op, left, right } => match self.resolution(expr)? {
                Resolution::Overload(method) => {
                    self.compile_expr(left)?;
                    let lt = self.type_of(left)?;
                    self.emit_convert(lt, method.params[0], left.span)?;
                    self.compile_expr(right)?;
                    let rt = self.type_of(right)?;
                    self.emit_numeric_conversion(rt, Type::I32)?;
                    self.emit_call(&method)?;
                }
                Resolution::Primitive(ty) => {
                    self.compile_converted(left, ty)?;
                    self.compile_expr(right)?;
                    let rt = self.type_of(right)?;
                    self.emit_numeric_conversion(rt, Type::I32)?;
                    self.emitter.emit_op(match op {
                        ShiftOp::Left => OpCode::Shl,
                        ShiftOp::Right => OpCode::Shr,
                    })?;
                }
            },

            // === Control flow ===
            ExprKind::Conditional {
                cond,
                then_branch,
                else_branch,
            } => {
                let ty = self.type_of(expr)?;
                self.compile_expr(cond)?;

                let else_label = self.emitter.define_label();
                let end_label = self.emitter.define_label();
                self.emitter.emit_branch(OpCode::BrFalse, else_label)?;
                self.compile_arm(then_branch, ty)?;
                self.emitter.emit_branch(OpCode::Br, end_label)?;
                self.emitter.mark_label(else_label)?;
                self.compile_arm(else_branch, ty)?;
                self.emitter.mark_label(end_label)?;
            }

            ExprKind::In { operand, items } => {
                let ot = self.type_of(operand)?;
                self.compile_expr(operand)?;
                let temp = self.emitter.declare_local(ot)?;
                self.emitter.emit_store_local(temp)?;

                let found = self.emitter.define_label();
                let end = self.emitter.define_label();
                for &item in items {
                    let test = self
                        .memberships
                        .get(&(item as *const Expr<'a>))
                        .cloned()
                        .ok_or_else(|| missing_resolution(item))?;
                    let it = self.type_of(item)?;
                    match test {
                        Resolution::Primitive(ty) => {
                            self.emitter.emit_load_local(temp)?;
                            self.emit_convert(ot, ty, operand.span)?;
                            self.compile_converted(item, ty)?;
                            self.emitter.emit_op(OpCode::Ceq)?;
                        }
                        Resolution::Overload(method) => {
                            self.emitter.emit_load_local(temp)?;
                            self.emit_convert(ot, method.params[0], operand.span)?;
                            self.compile_expr(item)?;
                            self.emit_convert(it, method.params[1], item.span)?;
                            self.emit_call(&method)?;
                        }
                    }
                    self.emitter.emit_branch(OpCode::BrTrue, found)?;
                }
                self.emitter.emit_load_bool(false)?;
                self.emitter.emit_branch(OpCode::Br, end)?;
                self.emitter.mark_label(found)?;
                self.emitter.emit_load_bool(true)?;
                self.emitter.mark_label(end)?;
            }

            // === Arrays ===
            ExprKind::Index { array, index } => {
                let element = self.type_of(expr)?;
                self.compile_expr(array)?;
                // Indices keep their width; the VM bounds-checks the full value.
                self.compile_expr(index)?;
                self.emitter.emit_array_load(element)?;
            }

            ExprKind::Array { elements } => {
                let array_type = self.type_of(expr)?;
                let element = array_type.element().ok_or_else(|| missing_resolution(expr))?;
                self.emit_length(elements.len())?;
                self.emitter.emit_new_array(element)?;
                for (i, &value) in elements.iter().enumerate() {
                    self.emitter.emit_op(OpCode::Dup)?;
                    self.emit_length(i)?;
                    self.compile_converted(value, element)?;
                    self.emitter.emit_array_store(element)?;
                }
            }

            // === Calls and conversions ===
            ExprKind::Call { name, args } => {
                let env = self.env;
                let signature = env
                    .function(name)
                    .ok_or_else(|| resolution_error(MessageKey::UndefinedFunction, &[&name], expr.span))?;
                for (&arg, &param) in args.iter().zip(&signature.params) {
                    self.compile_converted(arg, param)?;
                }
                self.emitter
                    .emit_call(name, args.len(), &signature.function)?;
            }

            ExprKind::Cast { expr: inner, target } => {
                let source = self.type_of(inner)?;
                self.compile_expr(inner)?;
                self.emit_cast(source, target, expr.span)?;
            }

            ExprKind::Where { body, bindings } => {
                let depth = self.local_scope.len();
                let result = self.compile_where(body, bindings);
                self.local_scope.truncate(depth);
                result?;
            }
        }
        Ok(())
    }

    fn compile_where(
        &mut self,
        body: &'a Expr<'a>,
        bindings: &'a [(&'a str, &'a Expr<'a>)],
    ) -> Result<(), CompileError> {
        for &(name, value) in bindings {
            let ty = self.type_of(value)?;
            self.compile_expr(value)?;
            let slot = self.emitter.declare_local(ty)?;
            self.emitter.emit_store_local(slot)?;
            self.local_scope.push((name, slot));
        }
        self.compile_expr(body)
    }

    /// Compile one arm of a conditional in a forked emitter and splice it
    /// back at the current position.
    fn compile_arm(&mut self, arm: &'a Expr<'a>, ty: Type<'a>) -> Result<(), CompileError> {
        let child = self.emitter.fork();
        let parent = mem::replace(&mut self.emitter, child);
        let result = self.compile_converted(arm, ty);
        let child = mem::replace(&mut self.emitter, parent);
        result?;
        self.emitter.splice(child)?;
        Ok(())
    }

    fn compile_short_circuit(&mut self, expr: &'a Expr<'a>) -> Result<(), CompileError> {
        let mut frame = self.frames.pop().unwrap_or_default();
        let result = frame.lower(expr, self);
        frame.clear_temp_state();
        self.frames.push(frame);
        result
    }

    /// Compile two operands converted to the resolved operand type, then
    /// `instruction`; or call the resolved operator method.
    fn compile_binary(
        &mut self,
        expr: &'a Expr<'a>,
        instruction: OpCode,
        left: &'a Expr<'a>,
        right: &'a Expr<'a>,
    ) -> Result<(), CompileError> {
        match self.resolution(expr)? {
            Resolution::Overload(method) => self.emit_overload_call(&method, &[left, right]),
            Resolution::Primitive(ty) => {
                self.compile_converted(left, ty)?;
                self.compile_converted(right, ty)?;
                self.emitter.emit_op(instruction)?;
                Ok(())
            }
        }
    }

    fn compile_converted(&mut self, expr: &'a Expr<'a>, ty: Type<'a>) -> Result<(), CompileError> {
        let from = self.type_of(expr)?;
        self.compile_expr(expr)?;
        self.emit_convert(from, ty, expr.span)
    }

    fn emit_overload_call(
        &mut self,
        method: &OperatorMethod<'a>,
        args: &[&'a Expr<'a>],
    ) -> Result<(), CompileError> {
        for (&arg, &param) in args.iter().zip(&method.params) {
            self.compile_converted(arg, param)?;
        }
        self.emit_call(method)
    }

    fn emit_call(&mut self, method: &OperatorMethod<'a>) -> Result<(), CompileError> {
        self.emitter
            .emit_call(&method.name, method.params.len(), &method.function)?;
        Ok(())
    }

    fn emit_length(&mut self, len: usize) -> Result<(), CompileError> {
        let len = i32::try_from(len)
            .map_err(|_| resolution_error(MessageKey::LiteralOutOfRange, &[&len], Span::default()))?;
        self.emitter.emit_load_i4(len)?;
        Ok(())
    }

    /// Implicit conversion of the value on top of the stack.
    fn emit_convert(&mut self, from: Type<'a>, to: Type<'a>, span: Span) -> Result<(), CompileError> {
        if from == to {
            return Ok(());
        }
        if is_implicitly_convertible(from, to) {
            return self.emit_numeric_conversion(from, to);
        }
        match self.find_conversion("Implicit", from, to)? {
            Some(method) => self.emit_call(&method),
            None => Err(resolution_error(MessageKey::CannotConvertType, &[&from, &to], span)),
        }
    }

    /// Explicit cast of the value on top of the stack.
    fn emit_cast(&mut self, from: Type<'a>, to: Type<'a>, span: Span) -> Result<(), CompileError> {
        if from == to || self.can_convert(from, to)? {
            return self.emit_convert(from, to, span);
        }
        if is_numeric_type(from) && is_numeric_type(to) {
            return self.emit_numeric_conversion(from, to);
        }
        match self.find_conversion("Explicit", from, to)? {
            Some(method) => self.emit_call(&method),
            None => Err(resolution_error(MessageKey::NoExplicitConversion, &[&from, &to], span)),
        }
    }

    fn emit_numeric_conversion(&mut self, from: Type<'a>, to: Type<'a>) -> Result<(), CompileError> {
        if from != to {
            self.emitter
                .emit(Instruction::with(OpCode::Conv, Operand::TypeCode(to.code())))?;
        }
        Ok(())
    }

    fn resolution(&self, expr: &'a Expr<'a>) -> Result<Resolution<'a>, CompileError> {
        self.resolutions
            .get(&(expr as *const Expr<'a>))
            .cloned()
            .ok_or_else(|| missing_resolution(expr))
    }
}

impl<'env, 'a> ChainCompiler<'a> for BytecodeCompiler<'env, 'a> {
    /// `and` / `or` nodes on two Boolean operands continue a chain; on
    /// integers or named types they are ordinary operands.
    fn connective(&self, expr: &'a Expr<'a>) -> Option<Connective<'a>> {
        let ExprKind::Logical { op, left, right } = expr.kind else {
            return None;
        };
        let is_bool = |e: &'a Expr<'a>| self.types.get(&(e as *const Expr<'a>)) == Some(&Type::Bool);
        (is_bool(left) && is_bool(right)).then_some(Connective {
            op,
            node: expr,
            left,
            right,
        })
    }

    fn emitter(&mut self) -> &mut Emitter<'a> {
        &mut self.emitter
    }

    fn compile_operand(&mut self, operand: &'a Expr<'a>) -> Result<(), CompileError> {
        self.compile_expr(operand)
    }
}

fn resolution_error(key: MessageKey, args: &[&dyn core::fmt::Display], span: Span) -> CompileError {
    ResolutionError::new(key, args, span).into()
}

fn missing_resolution(expr: &Expr<'_>) -> CompileError {
    InternalError::UntypedNode(expr.span).into()
}

fn is_named(ty: Type<'_>) -> bool {
    matches!(ty, Type::Named(_))
}

fn binary_method(op: BinaryOp) -> &'static str {
    match op {
        BinaryOp::Add => "Addition",
        BinaryOp::Sub => "Subtraction",
        BinaryOp::Mul => "Multiply",
        BinaryOp::Div => "Division",
        BinaryOp::Rem => "Modulus",
        BinaryOp::Pow => "Exponent",
    }
}

fn comparison_method(op: ComparisonOp) -> &'static str {
    match op {
        ComparisonOp::Eq => "Equality",
        ComparisonOp::Neq => "Inequality",
        ComparisonOp::Lt => "LessThan",
        ComparisonOp::Gt => "GreaterThan",
        ComparisonOp::Le => "LessThanOrEqual",
        ComparisonOp::Ge => "GreaterThanOrEqual",
    }
}

/// Type both sides of a built-in comparison are converted to.
fn comparison_operand_type<'a>(op: ComparisonOp, left: Type<'a>, right: Type<'a>) -> Option<Type<'a>> {
    match (left, right) {
        (Type::Bool, Type::Bool) => {
            matches!(op, ComparisonOp::Eq | ComparisonOp::Neq).then_some(Type::Bool)
        }
        (Type::Str, Type::Str) => Some(Type::Str),
        _ => get_binary_result_type(left, right),
    }
}
