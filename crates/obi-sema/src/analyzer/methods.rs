//! Method-level analysis: bodies, constructor parent calls, return-path
//! completeness, entry-point identification, and lambda hoisting.

use super::Analyzer;
use crate::errors::SemanticError;
use crate::resolution::ResolvedCall;
use crate::{encode, well_known};
use obi_frontend::ast::*;
use obi_frontend::types::{Type, TypeKind};

impl Analyzer {
    pub(crate) fn analyze_methods(&mut self, class_id: ClassId) {
        self.current_class = Some(class_id);

        let method_count = self.program.class(class_id).methods.len();
        for m in 0..method_count {
            self.analyze_method(class_id, m);
        }

        // a virtual parent behaves like an interface for conformance
        let (parent, lib_parent) = {
            let class = self.program.class(class_id);
            (class.parent, class.lib_parent)
        };
        if let Some(parent_id) = parent {
            if self.program.class(parent_id).is_virtual
                && !self.analyze_virtual_methods(class_id, super::ClassTarget::Program(parent_id))
            {
                let name = self.program.class(parent_id).name.clone();
                let loc = self.program.class(class_id).loc;
                self.report(loc, SemanticError::VirtualMethodsMissing { name });
            }
        } else if let Some(lib_parent) = lib_parent {
            if self.library.class(lib_parent).is_virtual
                && !self.analyze_virtual_methods(class_id, super::ClassTarget::Library(lib_parent))
            {
                let name = self.library.class(lib_parent).name.clone();
                let loc = self.program.class(class_id).loc;
                self.report(loc, SemanticError::VirtualMethodsMissing { name });
            }
        }
    }

    pub(crate) fn analyze_method(&mut self, class_id: ClassId, method_idx: MethodIdx) {
        let saved_method = self.current_method;
        self.current_method = Some((class_id, method_idx));

        {
            let method = &mut self.program.class_mut(class_id).methods[method_idx];
            if method.id < 0 {
                method.id = self.next_method_id;
                self.next_method_id += 1;
            }
        }
        tracing::trace!(
            method = %self.program.class(class_id).methods[method_idx].name,
            "analyzing method"
        );

        let declarations = self.program.class(class_id).methods[method_idx]
            .declarations
            .clone();
        for declaration in &declarations {
            self.analyze_declaration(declaration, class_id);
        }

        let is_virtual = self.program.class(class_id).methods[method_idx].is_virtual;
        if !is_virtual {
            let statements =
                std::mem::take(&mut self.program.class_mut(class_id).methods[method_idx].statements);

            let saved_loop = std::mem::replace(&mut self.loop_depth, 0);
            let saved_leaving = std::mem::replace(&mut self.leaving_seen, false);
            for statement in &statements {
                self.analyze_statement(statement, true);
            }
            self.loop_depth = saved_loop;
            self.leaving_seen = saved_leaving;

            self.check_parent_call(class_id, method_idx, &statements);
            self.check_return_paths(class_id, method_idx, &statements);
            self.check_entry_point(class_id, method_idx);

            self.program.class_mut(class_id).methods[method_idx].statements = statements;
        }

        self.current_method = saved_method;
    }

    /// Constructors of derived classes must begin with a parent call.
    fn check_parent_call(&mut self, class_id: ClassId, method_idx: MethodIdx, body: &[Statement]) {
        let (kind, loc) = {
            let method = &self.program.class(class_id).methods[method_idx];
            (method.kind, method.loc)
        };
        if !kind.is_new() {
            return;
        }

        let class = self.program.class(class_id);
        let has_real_parent = class.parent.is_some()
            || class
                .lib_parent
                .map(|p| self.library.class(p).name != well_known::SYSTEM_BASE)
                .unwrap_or(false);
        if !has_real_parent || class.is_interface {
            return;
        }

        let starts_with_parent_call = matches!(
            body.first(),
            Some(Statement::Expression(Expression {
                kind: ExprKind::MethodCall(call),
                ..
            })) if call.kind == CallKind::Parent
        );
        if !starts_with_parent_call {
            self.report(loc, SemanticError::ParentCallRequired);
        }
    }

    // =========================================================================
    // Return-path analysis
    // =========================================================================

    fn check_return_paths(&mut self, class_id: ClassId, method_idx: MethodIdx, body: &[Statement]) {
        let (kind, return_kind, is_alt, loc) = {
            let method = &self.program.class(class_id).methods[method_idx];
            (
                method.kind,
                method.return_type.kind,
                method.is_alt(),
                method.loc,
            )
        };
        if kind.is_new() || return_kind == TypeKind::Nil {
            return;
        }
        if !self.returns_on_all_paths(body) && !is_alt {
            self.report(loc, SemanticError::NonReturningPath);
        }
    }

    /// A statement list terminates when its last statement is a return, or
    /// an if/select whose every branch terminates.
    pub(crate) fn returns_on_all_paths(&self, statements: &[Statement]) -> bool {
        match statements.last() {
            Some(Statement::Return(_)) => true,
            Some(Statement::If(if_stmt)) => self.if_returns_on_all_paths(if_stmt),
            Some(Statement::Select(select)) => self.select_returns_on_all_paths(select),
            _ => false,
        }
    }

    fn if_returns_on_all_paths(&self, if_stmt: &IfStatement) -> bool {
        let then_ok = self.returns_on_all_paths(&if_stmt.then_block);
        let chain_ok = if_stmt
            .next
            .as_deref()
            .map(|next| self.if_returns_on_all_paths(next))
            .unwrap_or(false);

        let else_ok = match &if_stmt.else_block {
            Some(block) => self.returns_on_all_paths(block),
            // a chain without a final else only suffices through the chain
            None => {
                if !chain_ok {
                    return false;
                }
                false
            }
        };

        if if_stmt.next.is_none() {
            return then_ok && (else_ok || chain_ok);
        }
        then_ok && chain_ok
    }

    fn select_returns_on_all_paths(&self, select: &SelectStatement) -> bool {
        for arm in &select.arms {
            if !self.returns_on_all_paths(&arm.body) {
                return false;
            }
        }
        match &select.other {
            Some(other) => self.returns_on_all_paths(other),
            None => false,
        }
    }

    // =========================================================================
    // Entry points
    // =========================================================================

    fn check_entry_point(&mut self, class_id: ClassId, method_idx: MethodIdx) {
        let (encoded, is_static, loc) = {
            let method = &self.program.class(class_id).methods[method_idx];
            (method.encoded_name.clone(), method.is_static, method.loc)
        };
        let class_name = self.program.class(class_id).name.clone();

        if encoded == well_known::main_encoded_name(&class_name) {
            if self.main_found {
                self.report(loc, SemanticError::MainRedefined);
            } else if is_static {
                self.program.class_mut(class_id).is_called = true;
                self.entry_point = Some((class_id, method_idx));
                self.main_found = true;
            }
            if self.main_found && (self.program.is_lib || self.program.is_web) {
                self.report(loc, SemanticError::MainInLibrary);
            }
        } else if self.program.is_web && encoded == well_known::action_encoded_name(&class_name) {
            if self.web_found {
                self.report(loc, SemanticError::ActionRedefined);
            } else if is_static {
                self.program.class_mut(class_id).is_called = true;
                self.entry_point = Some((class_id, method_idx));
                self.web_found = true;
            }
        }
    }

    // =========================================================================
    // Lambdas
    // =========================================================================

    /// A lambda with a declared or alias type is built immediately; an
    /// untyped one is left for the enclosing call's overload selection to
    /// infer against the callee's function parameter.
    pub(crate) fn analyze_lambda(&mut self, expr_node: NodeId, lambda: &Lambda) {
        if self.data.eval_type(lambda.node_id).is_some() {
            return;
        }

        let lambda_type = if let Some(ty) = lambda.lambda_type.clone() {
            Some(ty)
        } else if !lambda.alias_name.is_empty() {
            self.resolve_alias_reference(&lambda.alias_name, lambda.loc)
        } else {
            None
        };

        if let Some(lambda_type) = lambda_type {
            if lambda_type.kind == TypeKind::Func {
                self.build_lambda_function(lambda, expr_node, &lambda_type);
            } else {
                self.report(lambda.loc, SemanticError::InvalidLambdaType);
            }
        }
    }

    /// Expand an `Alias#Suffix` reference.
    pub(crate) fn resolve_alias_reference(&mut self, name: &str, loc: Loc) -> Option<Type> {
        let (alias_name, type_name) = match name.find('#') {
            Some(middle) => (&name[..middle], &name[middle + 1..]),
            None => (name, ""),
        };

        let expansion = self
            .program
            .aliases
            .iter()
            .find(|a| a.name == alias_name)
            .and_then(|a| a.type_for(type_name))
            .cloned()
            .or_else(|| {
                self.library
                    .search_aliases(alias_name, &self.program.uses)
                    .and_then(|a| a.type_for(type_name))
                    .cloned()
            });

        match expansion {
            Some(ty) if ty.kind == TypeKind::Alias => {
                self.report(loc, SemanticError::NestedAlias);
                None
            }
            Some(ty) => Some(ty),
            None => {
                self.report(
                    loc,
                    SemanticError::UndefinedAlias {
                        name: name.replace('#', "->"),
                    },
                );
                None
            }
        }
    }

    /// Hoist a typed lambda into the current class: type its parameter
    /// entries from the function type, register and analyze the generated
    /// method, and bind the lambda expression to it.
    pub(crate) fn build_lambda_function(
        &mut self,
        lambda: &Lambda,
        expr_node: NodeId,
        lambda_type: &Type,
    ) {
        let Some(sig) = lambda_type.func.as_deref() else {
            self.report(lambda.loc, SemanticError::InvalidLambdaType);
            return;
        };
        let Some(class_id) = self.current_class else {
            return;
        };

        // closures change the enclosing method's frame layout
        if let Some((enclosing_class, enclosing_idx)) = self.current_method {
            self.program.class_mut(enclosing_class).methods[enclosing_idx].and_or = true;
        }

        let mut method = (*lambda.method).clone();
        if sig.params.len() != method.declarations.len() {
            self.report(lambda.loc, SemanticError::LambdaParamMismatch);
            return;
        }
        method.return_type = sig.ret.clone();
        method.is_lambda = true;
        for (declaration, ty) in method.declarations.iter().zip(sig.params.iter()) {
            self.program.symbols.entry_mut(declaration.entry).ty = ty.clone();
        }

        self.program.class_mut(class_id).methods.push(method);
        let method_idx = self.program.class(class_id).methods.len() - 1;
        let encoded = self.encode_method_signature(class_id, method_idx);
        self.program.class_mut(class_id).methods[method_idx].encoded_name = encoded.clone();
        self.program
            .class_mut(class_id)
            .method_index
            .insert(encoded, method_idx);

        let saved_lambda = std::mem::replace(&mut self.in_lambda, true);
        self.analyze_method(class_id, method_idx);
        self.in_lambda = saved_lambda;

        let mut func_type = lambda_type.clone();
        if func_type.name.is_empty() {
            func_type.name = format!(
                "m.{}",
                encode::encode_function_type(&sig.params, &sig.ret, |n| self
                    .canonical_class_name(n))
            );
        }
        self.resolutions.insert(
            lambda.node_id,
            ResolvedCall::Method {
                class: class_id,
                method: method_idx,
            },
        );
        self.data.set_eval(lambda.node_id, func_type.clone());
        self.data.set_eval(expr_node, func_type);
    }
}
