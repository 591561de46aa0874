//! Expression analysis: evaluation typing, the cast matrix, autoboxing, and
//! binary-operation checking.

use super::Analyzer;
use crate::errors::SemanticError;
use crate::resolution::{BoxingRewrite, ResolvedCall};
use crate::{encode, well_known};
use obi_frontend::ast::*;
use obi_frontend::types::{Type, TypeKind};

impl Analyzer {
    pub(crate) fn analyze_expression(&mut self, expr: &Expression) {
        match &expr.kind {
            ExprKind::BoolLit(_) => self.data.set_eval(expr.node_id, Type::bool_type()),
            ExprKind::ByteLit(_) => self.data.set_eval(expr.node_id, Type::byte()),
            ExprKind::CharLit(_) => self.data.set_eval(expr.node_id, Type::char_type()),
            ExprKind::IntLit(_) => self.data.set_eval(expr.node_id, Type::int()),
            ExprKind::FloatLit(_) => self.data.set_eval(expr.node_id, Type::float()),
            ExprKind::StringLit(_) => {
                let mut ty = Type::class(well_known::STRING_CLASS);
                self.resolve_class_enum_type(&mut ty);
                self.data.set_eval(expr.node_id, ty);
            }
            ExprKind::Variable(variable) => {
                self.analyze_variable(variable);
                if let Some(ty) = self.data.eval_type(variable.node_id).cloned() {
                    self.data.set_eval(expr.node_id, ty);
                }
            }
            ExprKind::MethodCall(_) => {
                self.analyze_method_call(expr);
            }
            ExprKind::Lambda(lambda) => self.analyze_lambda(expr.node_id, lambda),
            ExprKind::Calc(calc) => self.analyze_calculation(expr.node_id, calc, expr.loc),
            ExprKind::Cond(cond) => self.analyze_conditional(expr.node_id, cond, expr.loc),
            ExprKind::StaticArray(items) => self.analyze_static_array(expr.node_id, items, expr.loc),
            ExprKind::TypeOf(type_of) => self.analyze_type_of(expr.node_id, type_of, expr.loc),
        }

        if let Some(cast) = expr.cast_type.clone() {
            self.analyze_explicit_cast(expr, &cast);
        }

        // chained call on a non-call expression (`"s"->Size()`)
        if expr.chain.is_some() && !matches!(expr.kind, ExprKind::MethodCall(_)) {
            self.analyze_expression_chain(expr);
        }
    }

    // =========================================================================
    // Variables
    // =========================================================================

    pub(crate) fn analyze_variable(&mut self, variable: &Variable) {
        let Some(entry) = self.get_entry(&variable.name) else {
            self.report(
                variable.loc,
                SemanticError::UndefinedVariable {
                    name: variable.name.clone(),
                },
            );
            return;
        };

        self.variable_entries.insert(variable.node_id, entry);
        if self.invalid_static_entry(entry) && !self.in_lambda {
            self.report(variable.loc, SemanticError::InstanceVariableFromStatic);
        }

        if let Some(indices) = &variable.indices {
            self.analyze_indices(indices);
            let declared_dim = self.entry_type(entry).dim;
            if indices.len() as u32 > declared_dim {
                self.report(variable.loc, SemanticError::DimensionMismatch);
            }
        }

        let ty = self.entry_type(entry);
        self.data.set_eval(variable.node_id, ty);
    }

    /// Array index expressions must be integer-valued: Int, Char, Byte or
    /// an enum item.
    pub(crate) fn analyze_indices(&mut self, indices: &[Expression]) {
        for index in indices {
            self.analyze_expression(index);
            if !self.is_integer_expression(index) {
                self.report(index.loc, SemanticError::InvalidArrayIndex);
            }
        }
    }

    // =========================================================================
    // Predicates
    // =========================================================================

    pub(crate) fn is_boolean_expression(&self, expr: &Expression) -> bool {
        matches!(self.expression_type(expr), Some(ty) if ty.kind == TypeKind::Bool)
    }

    pub(crate) fn is_integer_expression(&self, expr: &Expression) -> bool {
        match self.expression_type(expr) {
            Some(ty) => {
                ty.is_integer_kind() || (ty.kind == TypeKind::Class && self.has_enum(&ty.name))
            }
            None => false,
        }
    }

    // =========================================================================
    // Binary operations
    // =========================================================================

    fn analyze_calculation(&mut self, node: NodeId, calc: &CalcExpression, loc: Loc) {
        self.analyze_expression(&calc.left);
        self.analyze_expression(&calc.right);

        let Some(left) = self.operand_type(&calc.left) else {
            return;
        };
        let Some(right) = self.operand_type(&calc.right) else {
            return;
        };

        if calc.op.is_logical() {
            if left.kind != TypeKind::Bool || right.kind != TypeKind::Bool {
                self.report(loc, SemanticError::ExpectedBoolean);
            }
            self.data.set_eval(node, Type::bool_type());
            return;
        }

        if calc.op.is_comparison() {
            self.check_comparison_operands(&calc.left, &left, &calc.right, &right, calc.op, loc);
            self.data.set_eval(node, Type::bool_type());
            return;
        }

        if calc.op.is_integer_only() {
            for (operand, ty) in [(&calc.left, &left), (&calc.right, &right)] {
                if !self.numeric_integer_kind(ty) {
                    self.report(
                        operand.loc,
                        SemanticError::InvalidOperation {
                            left: left.to_string(),
                            right: right.to_string(),
                        },
                    );
                    self.data.set_eval(node, Type::int());
                    return;
                }
            }
            let _ = loc;
            self.data.set_eval(node, Type::int());
            return;
        }

        // arithmetic: Float dominates and the other side gets a cast
        let result = self.arithmetic_result(&calc.left, &left, &calc.right, &right, loc);
        self.data.set_eval(node, result);
    }

    /// Operand type with holder unwrapping applied: a `System.IntHolder` in
    /// arithmetic position reads through `Get()`.
    fn operand_type(&mut self, operand: &Expression) -> Option<Type> {
        let ty = self.expression_type(operand)?;
        if ty.kind == TypeKind::Class && well_known::is_holder_type(&ty.name) && ty.dim == 0 {
            let primitive = holder_primitive(&ty.name);
            let tail = self.chain_tail(operand).node_id;
            self.boxing.insert(tail, BoxingRewrite::Unwrap);
            self.data.set_cast(tail, primitive.clone());
            return Some(primitive);
        }
        Some(ty)
    }

    fn numeric_integer_kind(&self, ty: &Type) -> bool {
        ty.is_integer_kind() || (ty.kind == TypeKind::Class && self.has_enum(&ty.name))
    }

    fn check_comparison_operands(
        &mut self,
        left_expr: &Expression,
        left: &Type,
        right_expr: &Expression,
        right: &Type,
        op: CalcOp,
        loc: Loc,
    ) {
        let numeric = |ty: &Type| {
            matches!(
                ty.kind,
                TypeKind::Byte | TypeKind::Char | TypeKind::Int | TypeKind::Float
            )
        };

        if numeric(left) && numeric(right) {
            // mixed int/float comparisons read through a cast
            if left.kind == TypeKind::Float && right.kind != TypeKind::Float {
                self.data.set_cast(self.chain_tail(right_expr).node_id, Type::float());
            } else if right.kind == TypeKind::Float && left.kind != TypeKind::Float {
                self.data.set_cast(self.chain_tail(left_expr).node_id, Type::float());
            }
            return;
        }

        let enum_side = |analyzer: &Analyzer, ty: &Type| {
            ty.kind == TypeKind::Class && analyzer.has_enum(&ty.name)
        };
        if enum_side(self, left) || enum_side(self, right) {
            let other_ok = |ty: &Type| ty.kind == TypeKind::Int || ty.kind == TypeKind::Class;
            if other_ok(left) && other_ok(right) {
                return;
            }
        }

        let equality = matches!(op, CalcOp::Eq | CalcOp::Neq);
        if equality {
            match (left.kind, right.kind) {
                (TypeKind::Bool, TypeKind::Bool) => return,
                (TypeKind::Class, TypeKind::Class) => return,
                (TypeKind::Class, TypeKind::Nil) | (TypeKind::Nil, TypeKind::Class) => return,
                (TypeKind::Func, TypeKind::Func) => return,
                _ => {}
            }
        }

        self.report(
            loc,
            SemanticError::InvalidOperation {
                left: left.to_string(),
                right: right.to_string(),
            },
        );
    }

    fn arithmetic_result(
        &mut self,
        left_expr: &Expression,
        left: &Type,
        right_expr: &Expression,
        right: &Type,
        loc: Loc,
    ) -> Type {
        let numeric = |analyzer: &Analyzer, ty: &Type| {
            matches!(
                ty.kind,
                TypeKind::Byte | TypeKind::Char | TypeKind::Int | TypeKind::Float
            ) || (ty.kind == TypeKind::Class && analyzer.has_enum(&ty.name))
        };

        if !numeric(self, left) || !numeric(self, right) {
            self.report(
                loc,
                SemanticError::InvalidOperation {
                    left: left.to_string(),
                    right: right.to_string(),
                },
            );
            return Type::int();
        }

        if left.kind == TypeKind::Float || right.kind == TypeKind::Float {
            if left.kind != TypeKind::Float {
                self.data
                    .set_cast(self.chain_tail(left_expr).node_id, Type::float());
            }
            if right.kind != TypeKind::Float {
                self.data
                    .set_cast(self.chain_tail(right_expr).node_id, Type::float());
            }
            return Type::float();
        }

        if left.kind == right.kind && left.kind != TypeKind::Class {
            return left.clone();
        }
        Type::int()
    }

    fn analyze_conditional(&mut self, node: NodeId, cond: &CondExpression, loc: Loc) {
        self.analyze_expression(&cond.cond);
        if !self.is_boolean_expression(&cond.cond) {
            self.report(loc, SemanticError::ExpectedBoolean);
        }
        self.analyze_expression(&cond.then_expr);
        self.analyze_expression(&cond.else_expr);

        if let Some(then_ty) = self.expression_type(&cond.then_expr) {
            let is_scalar = self.is_scalar(&cond.else_expr);
            self.analyze_right_cast(&then_ty, &cond.else_expr, is_scalar);
            self.data.set_eval(node, then_ty);
        }
    }

    fn analyze_static_array(&mut self, node: NodeId, items: &[Expression], loc: Loc) {
        if items.is_empty() {
            self.report(loc, SemanticError::EmptyArrayIndex);
            return;
        }
        for item in items {
            self.analyze_expression(item);
        }
        let Some(first) = self.expression_type(&items[0]) else {
            return;
        };
        for item in &items[1..] {
            if let Some(ty) = self.expression_type(item) {
                if ty.kind != first.kind {
                    self.report(item.loc, SemanticError::InvalidArrayCast);
                }
            }
        }
        let mut array = first;
        array.dim += 1;
        self.data.set_eval(node, array);
    }

    fn analyze_type_of(&mut self, node: NodeId, type_of: &TypeOfExpression, loc: Loc) {
        self.analyze_expression(&type_of.expr);
        let operand = self.expression_type(&type_of.expr);
        let mut queried = type_of.queried.clone();
        let queried_ok = queried.kind == TypeKind::Class && self.resolve_class_enum_type(&mut queried);
        let operand_ok = matches!(&operand, Some(ty) if ty.kind == TypeKind::Class);
        if !queried_ok || !operand_ok {
            self.report(loc, SemanticError::InvalidTypeOf);
        }
        self.data.set_eval(node, Type::bool_type());
    }

    // =========================================================================
    // Explicit casts
    // =========================================================================

    fn analyze_explicit_cast(&mut self, expr: &Expression, cast: &Type) {
        let mut cast = cast.clone();
        if cast.kind == TypeKind::Class && !self.resolve_class_enum_type(&mut cast) {
            self.report(
                expr.loc,
                SemanticError::UndefinedClassOrEnum {
                    name: cast.name.replace('#', "->"),
                },
            );
            return;
        }
        self.data.set_cast(expr.node_id, cast.clone());

        let Some(eval) = self.data.eval_type(expr.node_id).cloned() else {
            return;
        };

        match (cast.kind, eval.kind) {
            (TypeKind::Class, TypeKind::Class) => {
                self.analyze_class_cast(&cast, &eval, expr.loc);
            }
            (TypeKind::Class, k)
                if matches!(
                    k,
                    TypeKind::Bool | TypeKind::Byte | TypeKind::Char | TypeKind::Int | TypeKind::Float
                ) =>
            {
                if !self.box_expression(&cast, expr) && !self.has_enum(&cast.name) {
                    self.report(
                        expr.loc,
                        SemanticError::InvalidCast {
                            left: cast.to_string(),
                            right: eval.to_string(),
                        },
                    );
                }
            }
            (k, TypeKind::Class)
                if matches!(
                    k,
                    TypeKind::Bool | TypeKind::Byte | TypeKind::Char | TypeKind::Int | TypeKind::Float
                ) =>
            {
                let enum_to_int = k == TypeKind::Int && self.has_enum(&eval.name);
                if !enum_to_int && !self.unbox_expression(&cast, expr) {
                    self.report(
                        expr.loc,
                        SemanticError::InvalidCast {
                            left: cast.to_string(),
                            right: eval.to_string(),
                        },
                    );
                }
            }
            _ => {
                // explicit conversions between primitives are always allowed,
                // except into or out of Bool
                let bool_involved = (cast.kind == TypeKind::Bool) != (eval.kind == TypeKind::Bool);
                if bool_involved {
                    self.report(
                        expr.loc,
                        SemanticError::InvalidCast {
                            left: cast.to_string(),
                            right: eval.to_string(),
                        },
                    );
                }
            }
        }
    }

    // =========================================================================
    // The cast matrix
    // =========================================================================

    pub(crate) fn analyze_right_cast(&mut self, left: &Type, expr: &Expression, is_scalar: bool) {
        let Some(right) = self.expression_type(expr) else {
            return;
        };
        self.analyze_right_cast_types(left, &right, expr, is_scalar);
    }

    /// Assignment and argument passing route through this kind-pair matrix.
    /// Implicit conversions are recorded as cast annotations on the value
    /// expression; incompatible pairs produce per-pair diagnostics.
    pub(crate) fn analyze_right_cast_types(
        &mut self,
        left: &Type,
        right: &Type,
        expr: &Expression,
        is_scalar: bool,
    ) {
        let loc = expr.loc;
        let tail = self.chain_tail(expr).node_id;

        if !is_scalar {
            // array assignment: equal rank, equal element kind, or Nil
            if right.kind == TypeKind::Nil {
                return;
            }
            if left.dim != right.dim {
                self.report(loc, SemanticError::DimensionMismatch);
            }
            if left.kind != right.kind {
                self.report(loc, SemanticError::InvalidArrayCast);
            } else if left.kind == TypeKind::Class {
                self.analyze_class_cast(left, right, loc);
            }
            return;
        }

        match left.kind {
            TypeKind::Var => {
                if right.kind == TypeKind::Var {
                    self.report(
                        loc,
                        SemanticError::InvalidOperation {
                            left: "Var".to_string(),
                            right: "Var".to_string(),
                        },
                    );
                }
            }

            TypeKind::Nil => {
                let error = match right.kind {
                    TypeKind::Nil => SemanticError::NilWithNil,
                    TypeKind::Var | TypeKind::Func => SemanticError::InvalidOperation {
                        left: "Nil".to_string(),
                        right: right.to_string(),
                    },
                    _ => SemanticError::InvalidCast {
                        left: "Nil".to_string(),
                        right: right.to_string(),
                    },
                };
                self.report(loc, error);
            }

            TypeKind::Byte | TypeKind::Char | TypeKind::Int => match right.kind {
                TypeKind::Byte | TypeKind::Char | TypeKind::Int => {}
                TypeKind::Float => {
                    // implicit narrowing cast on the value
                    self.data.set_cast(tail, left.clone());
                }
                TypeKind::Nil => {
                    if left.dim < 1 {
                        self.report(
                            loc,
                            SemanticError::InvalidCast {
                                left: left.to_string(),
                                right: "Nil".to_string(),
                            },
                        );
                    }
                }
                TypeKind::Class => {
                    if !self.has_enum(&right.name) && !self.unbox_expression(left, expr) {
                        self.report(
                            loc,
                            SemanticError::InvalidCast {
                                left: left.to_string(),
                                right: right.to_string(),
                            },
                        );
                    }
                }
                TypeKind::Bool | TypeKind::Func | TypeKind::Var => {
                    self.report_scalar_mismatch(left, right, loc);
                }
                TypeKind::Alias => {}
            },

            TypeKind::Float => match right.kind {
                TypeKind::Float => {}
                TypeKind::Byte | TypeKind::Char | TypeKind::Int => {
                    // implicit widening cast on the value
                    self.data.set_cast(tail, left.clone());
                }
                TypeKind::Nil => {
                    if left.dim < 1 {
                        self.report(
                            loc,
                            SemanticError::InvalidCast {
                                left: left.to_string(),
                                right: "Nil".to_string(),
                            },
                        );
                    }
                }
                TypeKind::Class => {
                    if !self.has_enum(&right.name) && !self.unbox_expression(left, expr) {
                        self.report(
                            loc,
                            SemanticError::InvalidCast {
                                left: left.to_string(),
                                right: right.to_string(),
                            },
                        );
                    }
                }
                _ => self.report_scalar_mismatch(left, right, loc),
            },

            TypeKind::Bool => match right.kind {
                TypeKind::Bool => {}
                TypeKind::Nil => {
                    if left.dim < 1 {
                        self.report(
                            loc,
                            SemanticError::InvalidCast {
                                left: left.to_string(),
                                right: "Nil".to_string(),
                            },
                        );
                    }
                }
                TypeKind::Class => {
                    if !self.unbox_expression(left, expr) {
                        self.report(
                            loc,
                            SemanticError::InvalidCast {
                                left: left.to_string(),
                                right: right.to_string(),
                            },
                        );
                    }
                }
                _ => self.report_scalar_mismatch(left, right, loc),
            },

            TypeKind::Class => match right.kind {
                TypeKind::Nil => {
                    self.data.set_cast(tail, left.clone());
                }
                TypeKind::Bool
                | TypeKind::Byte
                | TypeKind::Char
                | TypeKind::Int
                | TypeKind::Float => {
                    if !self.has_enum(&left.name) && !self.box_expression(left, expr) {
                        self.report(
                            loc,
                            SemanticError::InvalidCast {
                                left: left.to_string(),
                                right: right.to_string(),
                            },
                        );
                    } else if self.has_enum(&left.name) && right.kind != TypeKind::Int {
                        self.report(
                            loc,
                            SemanticError::InvalidCast {
                                left: left.to_string(),
                                right: right.to_string(),
                            },
                        );
                    }
                }
                TypeKind::Class => self.analyze_class_cast(left, right, loc),
                TypeKind::Func | TypeKind::Var => self.report_scalar_mismatch(left, right, loc),
                TypeKind::Alias => {}
            },

            TypeKind::Func => match right.kind {
                TypeKind::Func => {
                    let left_name = self.function_type_name(left);
                    let right_name = self.function_type_name(right);
                    if left_name != right_name {
                        self.report(
                            loc,
                            SemanticError::InvalidCast {
                                left: left.to_string(),
                                right: right.to_string(),
                            },
                        );
                    }
                }
                _ => self.report_scalar_mismatch(left, right, loc),
            },

            TypeKind::Alias => {}
        }
    }

    fn report_scalar_mismatch(&mut self, left: &Type, right: &Type, loc: Loc) {
        let error = if right.kind == TypeKind::Var || right.kind == TypeKind::Func {
            SemanticError::InvalidOperation {
                left: left.to_string(),
                right: right.to_string(),
            }
        } else {
            SemanticError::InvalidCast {
                left: left.to_string(),
                right: right.to_string(),
            }
        };
        self.report(loc, error);
    }

    /// The cached `m.(..)~..` spelling of a function type.
    pub(crate) fn function_type_name(&self, ty: &Type) -> String {
        if !ty.name.is_empty() {
            return ty.name.clone();
        }
        match ty.func.as_deref() {
            Some(sig) => format!(
                "m.{}",
                encode::encode_function_type(&sig.params, &sig.ret, |n| self
                    .canonical_class_name(n))
            ),
            None => String::new(),
        }
    }

    // =========================================================================
    // Class casts
    // =========================================================================

    /// Class-to-class assignment: identical classes need matching generics;
    /// otherwise the value's class must be related to the target by
    /// inheritance or interface, in either direction (up-casts are checked
    /// at run time).
    pub(crate) fn analyze_class_cast(&mut self, left: &Type, right: &Type, loc: Loc) {
        let mut left = left.clone();
        let mut right = right.clone();

        // generic formals stand for their backing interfaces
        if let Some(current) = self.current_class {
            for side in [&mut left, &mut right] {
                let backing = self
                    .program
                    .class(current)
                    .generic(&side.name)
                    .and_then(|g| g.backing.clone());
                if let Some(backing) = backing {
                    side.name = backing.name;
                }
            }
        }

        let left_name = self.class_name_or(&left.name);
        let right_name = self.class_name_or(&right.name);

        if left_name == right_name {
            if (left.has_generics() || right.has_generics())
                && !self.generic_arguments_equal(&left, &right)
            {
                self.report(
                    loc,
                    SemanticError::InvalidCast {
                        left: left.to_string(),
                        right: right.to_string(),
                    },
                );
            }
            return;
        }

        let right_target = self.find_class(&right_name);
        if self.valid_downcast(&left_name, right_target) {
            return;
        }
        // target below the value's static class: resolved at run time
        if let Some(right_target) = right_target {
            if self.valid_upcast(&left_name, right_target) {
                return;
            }
        }

        // enum identity
        if self.has_enum(&left_name) && left_name == right_name {
            return;
        }

        self.report(
            loc,
            SemanticError::InvalidCast {
                left: left_name.replace('#', "->"),
                right: right_name.replace('#', "->"),
            },
        );
    }

    // =========================================================================
    // Autoboxing
    // =========================================================================

    /// Rewrite a primitive value into a holder construction when the target
    /// is a holder class. The rewrite is an annotation; code generation
    /// materializes `new XHolder(v)`.
    pub(crate) fn box_expression(&mut self, to: &Type, expr: &Expression) -> bool {
        if to.kind != TypeKind::Class {
            return false;
        }
        let holder_name = self.class_name_or(&to.name);
        if !well_known::is_holder_type(&holder_name) {
            return false;
        }

        let Some(from) = self.expression_type(expr) else {
            return false;
        };
        let tail = self.chain_tail(expr).node_id;
        let is_enum_item = matches!(
            self.resolutions.get(&tail),
            Some(ResolvedCall::EnumItem { .. }) | Some(ResolvedCall::LibraryEnumItem { .. })
        );
        let boxable = is_enum_item
            || matches!(
                from.kind,
                TypeKind::Bool | TypeKind::Byte | TypeKind::Char | TypeKind::Int | TypeKind::Float
            );
        if !boxable {
            return false;
        }

        self.boxing.insert(
            tail,
            BoxingRewrite::Construct {
                holder: holder_name.clone(),
            },
        );
        let mut holder = Type::class(holder_name);
        self.resolve_class_enum_type(&mut holder);
        self.data.set_cast(tail, holder);
        true
    }

    /// Rewrite a holder value into a `Get()` read when a primitive is
    /// expected.
    pub(crate) fn unbox_expression(&mut self, to: &Type, expr: &Expression) -> bool {
        let Some(from) = self.expression_type(expr) else {
            return false;
        };
        if from.kind != TypeKind::Class || from.dim > 0 {
            return false;
        }
        let holder_name = self.class_name_or(&from.name);
        if !well_known::is_holder_type(&holder_name) {
            return false;
        }

        let primitive = holder_primitive(&holder_name);
        if primitive.kind != to.kind
            && !matches!(
                (primitive.kind, to.kind),
                // holder reads widen between integer kinds
                (TypeKind::Byte | TypeKind::Char | TypeKind::Int, TypeKind::Byte | TypeKind::Char | TypeKind::Int)
            )
        {
            return false;
        }

        let tail = self.chain_tail(expr).node_id;
        self.boxing.insert(tail, BoxingRewrite::Unwrap);
        self.data.set_cast(tail, primitive);
        true
    }
}

/// Primitive read out of a holder class.
pub(crate) fn holder_primitive(holder_name: &str) -> Type {
    match holder_name {
        well_known::BOOL_HOLDER => Type::bool_type(),
        well_known::BYTE_HOLDER => Type::byte(),
        well_known::CHAR_HOLDER => Type::char_type(),
        well_known::FLOAT_HOLDER => Type::float(),
        _ => Type::int(),
    }
}
