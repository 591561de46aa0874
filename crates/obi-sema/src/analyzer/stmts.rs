//! Statement analysis.

use super::Analyzer;
use crate::errors::SemanticError;
use crate::resolution::ResolvedCall;
use obi_frontend::ast::*;
use obi_frontend::types::{Type, TypeKind};
use rustc_hash::FxHashSet;

impl Analyzer {
    pub(crate) fn analyze_statement(&mut self, statement: &Statement, top_level: bool) {
        match statement {
            Statement::Declaration(declaration) => {
                if let Some(class_id) = self.current_class {
                    self.analyze_declaration(declaration, class_id);
                }
            }
            Statement::Assignment(assignment) => self.analyze_assignment(assignment),
            Statement::Expression(expr) => self.analyze_expression(expr),
            Statement::If(if_stmt) => self.analyze_if(if_stmt),
            Statement::Select(select) => self.analyze_select(select),
            Statement::While(while_stmt) => {
                self.analyze_expression(&while_stmt.cond);
                if !self.is_boolean_expression(&while_stmt.cond) {
                    self.report(while_stmt.loc, SemanticError::ExpectedBoolean);
                }
                self.loop_depth += 1;
                for inner in &while_stmt.body {
                    self.analyze_statement(inner, false);
                }
                self.loop_depth -= 1;
            }
            Statement::DoWhile(do_while) => {
                self.loop_depth += 1;
                for inner in &do_while.body {
                    self.analyze_statement(inner, false);
                }
                self.loop_depth -= 1;
                self.analyze_expression(&do_while.cond);
                if !self.is_boolean_expression(&do_while.cond) {
                    self.report(do_while.loc, SemanticError::ExpectedBoolean);
                }
            }
            Statement::For(for_stmt) => {
                self.analyze_statement(&for_stmt.pre, false);
                self.analyze_expression(&for_stmt.cond);
                if !self.is_boolean_expression(&for_stmt.cond) {
                    self.report(for_stmt.loc, SemanticError::ExpectedBoolean);
                }
                self.loop_depth += 1;
                self.analyze_statement(&for_stmt.update, false);
                for inner in &for_stmt.body {
                    self.analyze_statement(inner, false);
                }
                self.loop_depth -= 1;
            }
            Statement::Return(ret) => self.analyze_return(ret),
            Statement::Break(loc) | Statement::Continue(loc) => {
                if self.loop_depth == 0 {
                    self.report(*loc, SemanticError::BreakOutsideLoop);
                }
            }
            Statement::Critical(critical) => {
                self.analyze_variable(&critical.variable);
                let guard_ty = self
                    .variable_entries
                    .get(&critical.variable.node_id)
                    .map(|&e| self.entry_type(e));
                if !matches!(guard_ty, Some(ty) if ty.kind == TypeKind::Class) {
                    self.report(critical.loc, SemanticError::InvalidReceiverType);
                }
                for inner in &critical.body {
                    self.analyze_statement(inner, false);
                }
            }
            Statement::Leaving(leaving) => {
                if !top_level {
                    self.report(leaving.loc, SemanticError::NestedLeaving);
                }
                if self.leaving_seen {
                    self.report(leaving.loc, SemanticError::MultipleLeaving);
                }
                self.leaving_seen = true;
                for inner in &leaving.body {
                    self.analyze_statement(inner, false);
                }
            }
            Statement::Empty(_) => {}
        }
    }

    fn analyze_if(&mut self, if_stmt: &IfStatement) {
        let mut cursor = Some(if_stmt);
        while let Some(stmt) = cursor {
            self.analyze_expression(&stmt.cond);
            if !self.is_boolean_expression(&stmt.cond) {
                self.report(stmt.loc, SemanticError::ExpectedBoolean);
            }
            for inner in &stmt.then_block {
                self.analyze_statement(inner, false);
            }
            if let Some(else_block) = &stmt.else_block {
                for inner in else_block {
                    self.analyze_statement(inner, false);
                }
            }
            cursor = stmt.next.as_deref();
        }
    }

    fn analyze_select(&mut self, select: &SelectStatement) {
        self.analyze_expression(&select.operand);
        if !self.is_integer_expression(&select.operand) {
            self.report(select.loc, SemanticError::InvalidSelectLabel);
        }

        if select.arms.is_empty() {
            self.report(select.loc, SemanticError::EmptySelect);
        }

        let mut seen: FxHashSet<i64> = FxHashSet::default();
        for arm in &select.arms {
            for label in &arm.labels {
                self.analyze_expression(label);
                match self.select_label_value(label) {
                    Some(value) => {
                        if !seen.insert(value) {
                            self.report(label.loc, SemanticError::DuplicateSelectLabel);
                        }
                    }
                    None => self.report(label.loc, SemanticError::InvalidSelectLabel),
                }
            }
            for inner in &arm.body {
                self.analyze_statement(inner, false);
            }
        }
        if let Some(other) = &select.other {
            for inner in other {
                self.analyze_statement(inner, false);
            }
        }
    }

    /// Constant value of a select label: an integer-like literal or an enum
    /// item reference.
    fn select_label_value(&self, label: &Expression) -> Option<i64> {
        match &label.kind {
            ExprKind::IntLit(value) => Some(*value),
            ExprKind::CharLit(value) => Some(*value as i64),
            ExprKind::ByteLit(value) => Some(*value as i64),
            ExprKind::MethodCall(call) => match self.resolutions.get(&call.node_id) {
                Some(ResolvedCall::EnumItem { value, .. })
                | Some(ResolvedCall::LibraryEnumItem { value, .. }) => Some(*value),
                _ => None,
            },
            _ => None,
        }
    }

    fn analyze_return(&mut self, ret: &ReturnStatement) {
        let return_type = self
            .current_method
            .map(|(c, m)| self.program.class(c).methods[m].return_type.clone());
        let Some(mut return_type) = return_type else {
            return;
        };
        if return_type.kind == TypeKind::Class {
            self.resolve_class_enum_type(&mut return_type);
        }

        match &ret.expr {
            Some(expr) => {
                self.analyze_expression(expr);
                if return_type.kind == TypeKind::Nil {
                    self.report(ret.loc, SemanticError::InvalidReturn);
                } else {
                    let is_scalar = self.is_scalar(expr);
                    self.analyze_right_cast(&return_type, expr, is_scalar);
                }
            }
            None => {
                if return_type.kind != TypeKind::Nil {
                    self.report(ret.loc, SemanticError::InvalidReturn);
                }
            }
        }
    }

    // =========================================================================
    // Assignment
    // =========================================================================

    pub(crate) fn analyze_assignment(&mut self, assignment: &Assignment) {
        self.analyze_variable(&assignment.variable);
        self.analyze_expression(&assignment.expr);

        let entry = self.variable_entries.get(&assignment.variable.node_id).copied();
        let Some(entry) = entry else {
            return;
        };

        let declared = self.entry_type(entry);
        if declared.kind == TypeKind::Var {
            // first assignment fixes an inferred declaration's type
            if let Some(mut inferred) = self.expression_type(&assignment.expr) {
                if inferred.kind == TypeKind::Class {
                    self.resolve_class_enum_type(&mut inferred);
                }
                if inferred.kind == TypeKind::Nil || inferred.kind == TypeKind::Var {
                    self.report(
                        assignment.loc,
                        SemanticError::InvalidOperation {
                            left: "Var".to_string(),
                            right: inferred.to_string(),
                        },
                    );
                } else {
                    self.program.symbols.entry_mut(entry).ty = inferred.clone();
                    self.data.set_eval(assignment.variable.node_id, inferred);
                }
            } else if matches!(assignment.expr.kind, ExprKind::Lambda(_)) {
                self.report(assignment.loc, SemanticError::InvalidLambdaType);
            }
            return;
        }

        if matches!(assignment.expr.kind, ExprKind::Lambda(_))
            && self.data.eval_type(assignment.expr.node_id).is_none()
        {
            self.report(assignment.loc, SemanticError::InvalidLambdaType);
            return;
        }

        // compound forms type-check as the matching binary operation
        if assignment.op != AssignOp::Assign {
            let left_ty = self
                .data
                .eval_type(assignment.variable.node_id)
                .cloned()
                .unwrap_or(declared.clone());
            if !matches!(
                left_ty.kind,
                TypeKind::Byte | TypeKind::Char | TypeKind::Int | TypeKind::Float
            ) && !self.is_holder_expression_type(&left_ty)
            {
                let right = self
                    .expression_type(&assignment.expr)
                    .map(|t| t.to_string())
                    .unwrap_or_else(|| "Nil".to_string());
                self.report(
                    assignment.loc,
                    SemanticError::InvalidOperation {
                        left: left_ty.to_string(),
                        right,
                    },
                );
                return;
            }
        }

        let left_ty = self
            .data
            .eval_type(assignment.variable.node_id)
            .cloned()
            .unwrap_or(declared);

        // assignment into Float is direction-sensitive: an integer value
        // needs an explicit cast, while Float into an integer variable gets
        // an implicit narrowing cast in the matrix below
        if left_ty.kind == TypeKind::Float && left_ty.dim == 0 {
            if let Some(right) = self.expression_type(&assignment.expr) {
                if right.is_integer_kind() {
                    self.report(
                        assignment.loc,
                        SemanticError::InvalidCast {
                            left: right.to_string(),
                            right: left_ty.to_string(),
                        },
                    );
                    return;
                }
            }
        }

        let is_scalar = self.is_scalar(&assignment.expr);
        if assignment.variable.indices.is_some() && !is_scalar {
            self.report(assignment.loc, SemanticError::DimensionMismatch);
        }
        let left_ty = self.indexed_type(&assignment.variable, left_ty);
        self.analyze_right_cast(&left_ty, &assignment.expr, is_scalar);
    }

    /// Fully indexed variables assign at element rank.
    fn indexed_type(&self, variable: &Variable, mut ty: Type) -> Type {
        if let Some(indices) = &variable.indices {
            ty.dim = ty.dim.saturating_sub(indices.len() as u32);
        }
        ty
    }

    pub(crate) fn is_holder_expression_type(&self, ty: &Type) -> bool {
        ty.kind == TypeKind::Class && crate::well_known::is_holder_type(&ty.name)
    }
}
