//! Method-call analysis: receiver resolution across the program/library
//! split, overload selection with autoboxing and lambda inference, enum and
//! parent calls, function references, and call chaining.

use super::{Analyzer, ClassTarget};
use crate::errors::SemanticError;
use crate::overload::{self, CandidateMatch, MATCH_EXACT, MATCH_NONE, MATCH_RELATIVE};
use crate::resolution::{BoxingRewrite, ResolvedCall};
use crate::{encode, well_known};
use obi_frontend::ast::*;
use obi_frontend::types::{Type, TypeKind};

/// How a call found its receiver; threads the substitution sources for
/// generic resolution.
#[derive(Debug, Clone, Default)]
pub(crate) struct ReceiverCtx {
    pub entry: Option<EntryId>,
    /// Concrete generics read off the receiver expression's type when the
    /// call is chained.
    pub generics: Vec<Type>,
}

impl Analyzer {
    pub(crate) fn analyze_method_call(&mut self, expr: &Expression) {
        let ExprKind::MethodCall(call) = &expr.kind else {
            return;
        };

        match call.kind {
            CallKind::NewArray => self.analyze_new_array_call(expr, call),
            CallKind::Enum => self.analyze_enum_call(expr, call),
            CallKind::Parent => self.analyze_parent_call(expr, call),
            CallKind::New | CallKind::Method => self.analyze_general_call(expr, call),
        }
    }

    /// Short name the candidates are gathered under: a bare `F(..)` call
    /// parses with the name in receiver position.
    fn effective_method_name<'c>(&self, call: &'c MethodCall) -> &'c str {
        if call.method_name.is_empty() {
            &call.receiver_name
        } else {
            &call.method_name
        }
    }

    // =========================================================================
    // General method / constructor calls
    // =========================================================================

    fn analyze_general_call(&mut self, expr: &Expression, call: &MethodCall) {
        // resolve the receiver binding, when there is one
        let entry = if let Some(variable) = call.variable.as_deref() {
            if self.get_entry(&variable.name).is_some() {
                self.analyze_variable(variable);
            }
            self.variable_entries.get(&variable.node_id).copied()
        } else {
            self.get_entry(&call.receiver_name)
        };
        if let Some(entry) = entry {
            self.variable_entries.insert(call.node_id, entry);
            if self.invalid_static_entry(entry) && !self.in_lambda {
                self.report(expr.loc, SemanticError::InstanceVariableFromStatic);
            }
        }

        let ctx = ReceiverCtx {
            entry,
            generics: Vec::new(),
        };

        // program receiver
        if let Some((class_id, encoding)) = self.resolve_program_receiver(call, entry) {
            if call.is_func_reference {
                self.analyze_function_reference(ClassTarget::Program(class_id), expr, call);
            } else {
                self.analyze_class_method_call(class_id, expr, call, false, &encoding, ctx);
            }
            return;
        }

        // library receiver
        if let Some((lib_id, encoding)) = self.resolve_library_receiver(call, entry) {
            if call.is_func_reference {
                self.analyze_function_reference(ClassTarget::Library(lib_id), expr, call);
            } else {
                self.analyze_library_method_call(lib_id, expr, call, false, &encoding, false, ctx);
            }
            return;
        }

        // receiver through a bound expression's type
        if let Some(entry) = entry {
            let receiver_cast_indexed = call
                .variable
                .as_deref()
                .map(|v| v.indices.is_some() && self.receiver_has_cast(call, v))
                .unwrap_or(false);
            if receiver_cast_indexed {
                self.report(expr.loc, SemanticError::IndexedCallReceiver);
                return;
            }

            let ty = self.entry_type(entry);
            let dim = if self.receiver_fully_indexed(call) {
                0
            } else {
                ty.dim
            };
            match self.receiver_class_for_type(&ty, dim) {
                Some(receiver) => {
                    let ctx = ReceiverCtx {
                        entry: Some(entry),
                        generics: ty.generics.to_vec(),
                    };
                    self.dispatch_receiver(receiver, expr, call, ctx);
                }
                None => self.report(expr.loc, SemanticError::InvalidReceiverType),
            }
            return;
        }

        if !call.receiver_name.is_empty() {
            let name = call.receiver_name.clone();
            self.report(expr.loc, SemanticError::UndefinedClass { name });
        } else {
            let name = self.effective_method_name(call).to_string();
            let alternatives = self.take_alternatives();
            self.report(
                expr.loc,
                SemanticError::NoMatchingOverload { name, alternatives },
            );
        }
    }

    fn receiver_has_cast(&self, call: &MethodCall, variable: &Variable) -> bool {
        let _ = call;
        self.data.cast_type(variable.node_id).is_some()
    }

    fn receiver_fully_indexed(&self, call: &MethodCall) -> bool {
        call.variable
            .as_deref()
            .map(|v| v.indices.is_some())
            .unwrap_or(false)
    }

    fn dispatch_receiver(
        &mut self,
        receiver: ResolvedReceiver,
        expr: &Expression,
        call: &MethodCall,
        ctx: ReceiverCtx,
    ) {
        if let Some(class_id) = receiver.class {
            self.analyze_class_method_call(class_id, expr, call, true, &receiver.encoding, ctx);
        } else if let Some(lib_id) = receiver.library {
            self.analyze_library_method_call(lib_id, expr, call, true, &receiver.encoding, false, ctx);
        } else {
            self.report(expr.loc, SemanticError::InvalidReceiverType);
        }
    }

    /// Program-side receiver: the current class for bare calls, the bound
    /// entry's class (or its cast), `System.Base` for array receivers, or
    /// the receiver name as a static class reference.
    fn resolve_program_receiver(
        &mut self,
        call: &MethodCall,
        entry: Option<EntryId>,
    ) -> Option<(ClassId, String)> {
        if call.method_name.is_empty() && call.kind != CallKind::New {
            let current = self.current_class?;
            let name = self.program.class(current).name.clone();
            return self.search_program_classes(&name).map(|id| (id, String::new()));
        }

        if let Some(entry) = entry {
            let ty = self.entry_type(entry);
            if ty.kind == TypeKind::Class {
                if ty.dim > 0 && !self.receiver_fully_indexed(call) {
                    if let Some(id) = self.search_program_classes(well_known::SYSTEM_BASE) {
                        let mut encoding = format!("o.{}", well_known::SYSTEM_BASE);
                        for _ in 0..ty.dim {
                            encoding.push('*');
                        }
                        encoding.push(',');
                        return Some((id, encoding));
                    }
                }
                let cast = call
                    .variable
                    .as_deref()
                    .and_then(|v| self.data.cast_type(v.node_id).cloned());
                if let Some(cast) = cast {
                    if cast.kind == TypeKind::Class {
                        if let Some(id) = self.search_program_classes(&cast.name) {
                            return Some((id, String::new()));
                        }
                    }
                }
                if let Some(id) = self.search_program_classes(&ty.name) {
                    return Some((id, String::new()));
                }
                return None;
            }
        }

        // static reference
        self.search_program_classes(&call.receiver_name)
            .map(|id| (id, String::new()))
    }

    fn resolve_library_receiver(
        &mut self,
        call: &MethodCall,
        entry: Option<EntryId>,
    ) -> Option<(LibClassId, String)> {
        if let Some(entry) = entry {
            let ty = self.entry_type(entry);
            if ty.kind == TypeKind::Class {
                if ty.dim > 0 && !self.receiver_fully_indexed(call) {
                    if let Some(id) = self.search_library_classes(well_known::SYSTEM_BASE) {
                        let mut encoding = format!("o.{}", well_known::SYSTEM_BASE);
                        for _ in 0..ty.dim {
                            encoding.push('*');
                        }
                        encoding.push(',');
                        return Some((id, encoding));
                    }
                }
                let cast = call
                    .variable
                    .as_deref()
                    .and_then(|v| self.data.cast_type(v.node_id).cloned());
                if let Some(cast) = cast {
                    if cast.kind == TypeKind::Class {
                        if let Some(id) = self.search_library_classes(&cast.name) {
                            return Some((id, String::new()));
                        }
                    }
                }
                if let Some(id) = self.search_library_classes(&ty.name) {
                    return Some((id, String::new()));
                }
                return None;
            }
        }

        self.search_library_classes(&call.receiver_name)
            .map(|id| (id, String::new()))
    }

    /// Receiver classes for an expression's type: primitives call through
    /// their `System` classes, arrays through `System.Base`, enums through
    /// `System.Int`.
    fn receiver_class_for_type(&mut self, ty: &Type, dim: u32) -> Option<ResolvedReceiver> {
        let primitive = |analyzer: &Self, class_name: &str, letter: &str| {
            let mut encoding = letter.to_string();
            for _ in 0..dim {
                encoding.push('*');
            }
            encoding.push(',');
            Some(ResolvedReceiver {
                class: analyzer.search_program_classes(class_name),
                library: analyzer.search_library_classes(class_name),
                encoding,
                is_enum_call: false,
            })
        };

        match ty.kind {
            TypeKind::Bool => primitive(self, well_known::BOOL_CLASS, "l"),
            TypeKind::Byte => primitive(self, well_known::BYTE_CLASS, "b"),
            TypeKind::Char => primitive(self, well_known::CHAR_CLASS, "c"),
            TypeKind::Int => primitive(self, well_known::INT_CLASS, "i"),
            TypeKind::Float => primitive(self, well_known::FLOAT_CLASS, "f"),
            TypeKind::Var | TypeKind::Nil | TypeKind::Alias | TypeKind::Func => None,
            TypeKind::Class => {
                // un-indexed arrays dispatch through the base class
                if dim > 0 && ty.dim > 0 {
                    let mut encoding = format!("o.{}", well_known::SYSTEM_BASE);
                    for _ in 0..dim {
                        encoding.push('*');
                    }
                    encoding.push(',');
                    return Some(ResolvedReceiver {
                        class: self.search_program_classes(well_known::SYSTEM_BASE),
                        library: self.search_library_classes(well_known::SYSTEM_BASE),
                        encoding,
                        is_enum_call: false,
                    });
                }

                let class = self.search_program_classes(&ty.name);
                let library = self.search_library_classes(&ty.name);
                if class.is_some() || library.is_some() {
                    return Some(ResolvedReceiver {
                        class,
                        library,
                        encoding: String::new(),
                        is_enum_call: false,
                    });
                }
                if self.has_enum(&ty.name) {
                    return Some(ResolvedReceiver {
                        class: self.search_program_classes(well_known::INT_CLASS),
                        library: self.search_library_classes(well_known::INT_CLASS),
                        encoding: "i,".to_string(),
                        is_enum_call: true,
                    });
                }
                None
            }
        }
    }

    // =========================================================================
    // Program-class calls
    // =========================================================================

    pub(crate) fn analyze_class_method_call(
        &mut self,
        class_id: ClassId,
        expr: &Expression,
        call: &MethodCall,
        is_expr: bool,
        encoding: &str,
        ctx: ReceiverCtx,
    ) {
        tracing::trace!(
            class = %self.program.class(class_id).name,
            method = %self.effective_method_name(call),
            "program call"
        );

        for arg in &call.args {
            self.analyze_expression(arg);
        }

        let mut selected = self.resolve_program_method(class_id, call, &ctx);

        // fallback: system-style methods found by encoded name
        if selected.is_none() {
            let encoded = format!(
                "{}:{}:{}{}",
                self.program.class(class_id).name,
                self.effective_method_name(call),
                encoding,
                self.encode_call_arguments(call)
            );
            selected = self.program.class(class_id).method_by_encoded_name(&encoded);
        }

        let Some(method_idx) = selected else {
            // continue up the inheritance chain
            let (parent, lib_parent) = {
                let class = self.program.class(class_id);
                (class.parent, class.lib_parent)
            };
            if let Some(parent_id) = parent {
                self.analyze_class_method_call(parent_id, expr, call, is_expr, "", ctx);
                return;
            }
            if let Some(lib_parent) = lib_parent {
                self.analyze_library_method_call(lib_parent, expr, call, is_expr, "", true, ctx);
                return;
            }
            if self.analyze_variable_function_call(expr, call) {
                return;
            }
            let name = self.effective_method_name(call).to_string();
            let alternatives = self.take_alternatives();
            self.report(
                expr.loc,
                SemanticError::NoMatchingOverload { name, alternatives },
            );
            return;
        };

        self.alt_method_names.clear();

        let env = self.generic_env(
            ClassTarget::Program(class_id),
            call,
            ctx.entry,
            &ctx.generics,
        );

        // argument casts against the selected signature
        let param_types: Vec<Type> = self.program.class(class_id).methods[method_idx]
            .declarations
            .iter()
            .map(|d| self.entry_type(d.entry))
            .collect();
        if param_types.len() != call.args.len() {
            self.report(expr.loc, SemanticError::InvalidCallContext);
            return;
        }
        for (param_ty, arg) in param_types.iter().zip(call.args.iter()) {
            if let Some(arg_ty) = self.expression_type(arg) {
                if arg_ty.kind == TypeKind::Nil && matches!(arg.kind, ExprKind::MethodCall(_)) {
                    self.report(expr.loc, SemanticError::NilOperation);
                }
            }
            let left = self.resolve_generic_type(param_ty, &env);
            let is_scalar = self.is_scalar(arg);
            self.analyze_right_cast(&left, arg, is_scalar);
        }

        let (method_kind, method_static, method_return) = {
            let method = &self.program.class(class_id).methods[method_idx];
            (method.kind, method.is_static, method.return_type.clone())
        };

        // visibility
        if method_kind.is_private() && !method_static {
            let same_class = self.current_class == Some(class_id);
            let mut in_ancestors = false;
            if let Some(current) = self.current_class {
                let mut parent = self.program.class(current).parent;
                while let Some(parent_id) = parent {
                    if parent_id == class_id {
                        in_ancestors = true;
                        break;
                    }
                    parent = self.program.class(parent_id).parent;
                }
            }
            if !same_class && !in_ancestors {
                self.report(expr.loc, SemanticError::PrivateMethod);
            }
        }

        let (class_public, class_bundle, class_virtual, class_name) = {
            let class = self.program.class(class_id);
            (
                class.is_public,
                class.bundle_name.clone(),
                class.is_virtual,
                class.name.clone(),
            )
        };
        if !class_public && self.current_bundle != class_bundle {
            self.report(expr.loc, SemanticError::PrivateClass { name: class_name.clone() });
        }

        if !is_expr && self.invalid_static_call(call, method_static, method_kind) {
            self.report(expr.loc, SemanticError::InstanceMethodFromStatic);
        }

        // virtual classes and interfaces cannot be instantiated
        if method_kind.is_new() && class_virtual {
            let from_child_ctor = self
                .current_class
                .map(|c| self.program.class(c).parent == Some(class_id))
                .unwrap_or(false);
            if !from_child_ctor {
                self.report(expr.loc, SemanticError::VirtualInstance);
            }
        }

        self.program.class_mut(class_id).is_called = true;
        self.resolutions.insert(
            call.node_id,
            ResolvedCall::Method {
                class: class_id,
                method: method_idx,
            },
        );

        // evaluation type, with generics substituted
        let mut eval = self.resolve_generic_type(&method_return, &env);
        let class_has_generics = self.program.class(class_id).has_generics();
        if method_kind.is_new() && class_has_generics {
            let concrete_types = call.concrete_types.clone();
            self.validate_generic_concrete_mapping(
                &concrete_types,
                ClassTarget::Program(class_id),
                expr.loc,
            );
            eval.generics = concrete_types.into();
        }
        if eval.kind == TypeKind::Class && !self.resolve_class_enum_type(&mut eval) {
            self.report(
                expr.loc,
                SemanticError::UndefinedClassOrEnum {
                    name: eval.name.replace('#', "->"),
                },
            );
        }
        self.data.set_eval(call.node_id, eval.clone());
        self.data.set_eval(expr.node_id, eval);

        self.analyze_expression_chain(expr);
    }

    /// Score every arity-matching overload of the simple name, with
    /// autobox/unbox rewrites per position, and pick the winner. Falls back
    /// to lambda inference when the only candidate takes a single function
    /// parameter.
    fn resolve_program_method(
        &mut self,
        class_id: ClassId,
        call: &MethodCall,
        ctx: &ReceiverCtx,
    ) -> Option<MethodIdx> {
        let name = self.effective_method_name(call).to_string();
        let candidates: Vec<MethodIdx> = if call.kind == CallKind::New {
            self.program.class(class_id).methods_by_short_name("New")
        } else {
            self.program.class(class_id).methods_by_short_name(&name)
        };
        let env = self.generic_env(ClassTarget::Program(class_id), call, ctx.entry, &ctx.generics);

        let arity_matched: Vec<MethodIdx> = candidates
            .iter()
            .copied()
            .filter(|&m| {
                self.program.class(class_id).methods[m].declarations.len() == call.args.len()
            })
            .collect();

        let mut matches: Vec<CandidateMatch> = Vec::with_capacity(arity_matched.len());
        for &candidate in &arity_matched {
            let param_types: Vec<Type> = self.program.class(class_id).methods[candidate]
                .declarations
                .iter()
                .map(|d| self.entry_type(d.entry))
                .collect();
            matches.push(self.score_candidate(call, &param_types, &env));
        }

        if let Some(winner) = overload::select(&matches) {
            self.install_rewrites(call, &matches[winner]);
            return Some(arity_matched[winner]);
        }

        // lambda inference: one untyped lambda argument against one
        // candidate taking a single function parameter
        if call.args.len() == 1 && arity_matched.len() == 1 {
            if let ExprKind::Lambda(lambda) = &call.args[0].kind {
                if self.data.eval_type(lambda.node_id).is_none() {
                    let param_ty = {
                        let method = &self.program.class(class_id).methods[arity_matched[0]];
                        self.entry_type(method.declarations[0].entry)
                    };
                    if param_ty.kind == TypeKind::Func {
                        let inferred = self.resolve_generic_type(&param_ty, &env);
                        self.build_lambda_function(lambda, call.args[0].node_id, &inferred);

                        let rescored =
                            self.score_candidate(call, std::slice::from_ref(&param_ty), &env);
                        let matches = vec![rescored];
                        if let Some(winner) = overload::select(&matches) {
                            self.install_rewrites(call, &matches[winner]);
                            return Some(arity_matched[0]);
                        }
                    }
                }
            }
        }

        // remember alternatives for the diagnostic
        for &candidate in &arity_matched {
            let encoded = self.program.class(class_id).methods[candidate]
                .encoded_name
                .clone();
            self.alt_method_names.push(encoded);
        }
        None
    }

    fn score_candidate(
        &mut self,
        call: &MethodCall,
        param_types: &[Type],
        env: &super::generics::GenericEnv,
    ) -> CandidateMatch {
        let mut candidate = CandidateMatch::new(call.args.len());
        for (arg, param_ty) in call.args.iter().zip(param_types.iter()) {
            let method_ty = self.resolve_generic_type(param_ty, env);
            let calling_ty = self.expression_type(arg);

            let (calling_ty, rewrite) = match calling_ty {
                Some(ty) => self.apply_boxing(&ty, &method_ty),
                None => (None, None),
            };

            let score = match calling_ty {
                Some(ref ty) => {
                    let is_scalar = self.is_scalar(arg);
                    self.match_calling_parameter(ty, &method_ty, is_scalar)
                }
                None => MATCH_NONE,
            };
            candidate.scores.push(score);
            candidate.rewrites.push(rewrite);
        }
        candidate
    }

    /// Autobox/unbox adjustment for one argument position: a primitive
    /// against a holder parameter boxes, a holder against a primitive
    /// parameter unboxes. Returns the adjusted type and the rewrite.
    fn apply_boxing(
        &mut self,
        calling: &Type,
        method: &Type,
    ) -> (Option<Type>, Option<BoxingRewrite>) {
        let primitive = |ty: &Type| {
            matches!(
                ty.kind,
                TypeKind::Bool | TypeKind::Byte | TypeKind::Char | TypeKind::Int | TypeKind::Float
            ) && ty.dim == 0
        };

        if method.kind == TypeKind::Class && method.dim == 0 && primitive(calling) {
            let holder_name = self.class_name_or(&method.name);
            if well_known::is_holder_type(&holder_name) {
                let mut holder = Type::class(holder_name.clone());
                self.resolve_class_enum_type(&mut holder);
                return (
                    Some(holder),
                    Some(BoxingRewrite::Construct { holder: holder_name }),
                );
            }
        }

        if primitive(method) && calling.kind == TypeKind::Class && calling.dim == 0 {
            let holder_name = self.class_name_or(&calling.name);
            if well_known::is_holder_type(&holder_name) {
                return (
                    Some(super::expr::holder_primitive(&holder_name)),
                    Some(BoxingRewrite::Unwrap),
                );
            }
        }

        (Some(calling.clone()), None)
    }

    fn install_rewrites(&mut self, call: &MethodCall, winner: &CandidateMatch) {
        for (arg, rewrite) in call.args.iter().zip(winner.rewrites.iter()) {
            if let Some(rewrite) = rewrite {
                let tail = self.chain_tail(arg).node_id;
                self.boxing.insert(tail, rewrite.clone());
            }
        }
    }

    /// Per-position match score. 0 exact, 1 relative (widening, valid
    /// down-cast, enum to Int, Nil to class), -1 incompatible.
    pub(crate) fn match_calling_parameter(
        &mut self,
        calling: &Type,
        method: &Type,
        calling_is_scalar: bool,
    ) -> i8 {
        // arrays match on kind and rank only
        if !calling_is_scalar {
            if calling.kind == method.kind {
                if calling.kind == TypeKind::Class {
                    if self.class_enum_names_match(&calling.name, &method.name)
                        && calling.dim == method.dim
                    {
                        return MATCH_EXACT;
                    }
                    return MATCH_NONE;
                }
                if calling.dim == method.dim {
                    return MATCH_EXACT;
                }
            }
            return MATCH_NONE;
        }

        // exact primitive match
        if calling.kind != TypeKind::Class
            && method.kind != TypeKind::Class
            && calling.kind != TypeKind::Func
            && method.kind != TypeKind::Func
            && method.dim == 0
            && calling.kind == method.kind
        {
            return MATCH_EXACT;
        }

        if method.dim != 0 {
            return MATCH_NONE;
        }

        match calling.kind {
            TypeKind::Nil => {
                if method.kind == TypeKind::Class {
                    MATCH_RELATIVE
                } else {
                    MATCH_NONE
                }
            }
            TypeKind::Bool => MATCH_NONE,
            TypeKind::Byte | TypeKind::Char | TypeKind::Int | TypeKind::Float => match method.kind {
                TypeKind::Byte | TypeKind::Char | TypeKind::Int | TypeKind::Float => MATCH_RELATIVE,
                _ => MATCH_NONE,
            },
            TypeKind::Class => {
                if method.kind == TypeKind::Class {
                    if self.class_enum_names_match(&calling.name, &method.name) {
                        if calling.has_generics() || method.has_generics() {
                            if self.generic_arguments_equal(calling, method) {
                                return MATCH_EXACT;
                            }
                            return MATCH_NONE;
                        }
                        return MATCH_EXACT;
                    }
                    // relative: the argument's class down-casts to the
                    // parameter's class
                    let from = self.find_class(&calling.name);
                    let to_name = self.class_name_or(&method.name);
                    if self.valid_downcast(&to_name, from) {
                        return MATCH_RELATIVE;
                    }
                    MATCH_NONE
                } else if method.kind == TypeKind::Int && self.has_enum(&calling.name) {
                    MATCH_RELATIVE
                } else {
                    MATCH_NONE
                }
            }
            TypeKind::Func => {
                if method.kind != TypeKind::Func {
                    return MATCH_NONE;
                }
                let calling_name = self.function_type_name(calling);
                let method_name = self.function_type_name(method);
                if calling_name == method_name {
                    MATCH_EXACT
                } else {
                    MATCH_NONE
                }
            }
            TypeKind::Alias | TypeKind::Var => MATCH_NONE,
        }
    }

    /// Encoded parameter string of the actual arguments; used for the
    /// encoded-name fallback lookup.
    fn encode_call_arguments(&self, call: &MethodCall) -> String {
        let mut encoded = String::new();
        for arg in &call.args {
            let Some(ty) = self.expression_type(arg) else {
                continue;
            };
            encoded.push_str(&encode::encode_type(&ty, |n| self.canonical_class_name(n)));
            if !self.is_scalar(arg) {
                for _ in 0..ty.dim {
                    encoded.push('*');
                }
            }
            encoded.push(',');
        }
        encoded
    }

    // =========================================================================
    // Library-class calls
    // =========================================================================

    #[allow(clippy::too_many_arguments)]
    pub(crate) fn analyze_library_method_call(
        &mut self,
        lib_id: LibClassId,
        expr: &Expression,
        call: &MethodCall,
        is_expr: bool,
        encoding: &str,
        is_parent: bool,
        ctx: ReceiverCtx,
    ) {
        tracing::trace!(
            class = %self.library.class(lib_id).name,
            method = %self.effective_method_name(call),
            "library call"
        );

        for arg in &call.args {
            self.analyze_expression(arg);
        }

        let mut selected = self.resolve_library_method(lib_id, call, &ctx);

        // walk the library parent chain
        if selected.is_none() {
            let mut parent_name = self.library.class(lib_id).parent_name.clone();
            while selected.is_none() && !parent_name.is_empty() {
                let Some(parent_id) = self.search_library_classes(&parent_name) else {
                    break;
                };
                selected = self.resolve_library_method(parent_id, call, &ctx);
                parent_name = self.library.class(parent_id).parent_name.clone();
            }
        }

        // encoded-name fallback
        if selected.is_none() {
            let mut encoded = format!(
                "{}:{}:{}{}",
                self.library.class(lib_id).name,
                self.effective_method_name(call),
                encoding,
                self.encode_call_arguments(call)
            );
            if encoded.ends_with('*') {
                encoded.push(',');
            }
            if self.library.class(lib_id).method(&encoded).is_some() {
                selected = Some(crate::library::LibMethodRef {
                    class: lib_id,
                    encoded,
                });
            }
        }

        let (class_public, class_bundle, class_name) = {
            let class = self.library.class(lib_id);
            (class.is_public, class.bundle_name.clone(), class.name.clone())
        };
        if !class_public && self.current_bundle != class_bundle {
            self.report(expr.loc, SemanticError::PrivateClass { name: class_name });
        }

        let Some(method_ref) = selected else {
            let name = self.effective_method_name(call).to_string();
            let alternatives = self.take_alternatives();
            self.report(
                expr.loc,
                SemanticError::NoMatchingOverload { name, alternatives },
            );
            return;
        };

        self.alt_method_names.clear();

        let env = self.generic_env(ClassTarget::Library(lib_id), call, ctx.entry, &ctx.generics);
        let (param_types, method_static, method_kind, method_return) = {
            let method = self.library.method_ref(&method_ref);
            (
                method.param_types.clone(),
                method.is_static,
                method.kind,
                method.return_type.clone(),
            )
        };

        for (param_ty, arg) in param_types.iter().zip(call.args.iter()) {
            if let Some(arg_ty) = self.expression_type(arg) {
                if arg_ty.kind == TypeKind::Nil && matches!(arg.kind, ExprKind::MethodCall(_)) {
                    self.report(expr.loc, SemanticError::NilOperation);
                }
            }
            let left = self.resolve_generic_type(param_ty, &env);
            let is_scalar = self.is_scalar(arg);
            self.analyze_right_cast(&left, arg, is_scalar);
        }

        if !is_expr && self.invalid_static_call(call, method_static, method_kind) {
            self.report(expr.loc, SemanticError::InstanceMethodFromStatic);
        }

        // constructor chaining into a virtual parent is the one allowed
        // instantiation path
        if method_kind.is_new() && self.library.class(lib_id).is_virtual && !is_parent {
            self.report(expr.loc, SemanticError::VirtualInstance);
        }

        // generic construction validation
        let lib_has_generics = self.library.class(lib_id).has_generics();
        let mut eval = self.resolve_generic_type(&method_return, &env);
        if method_kind.is_new() && lib_has_generics {
            let concrete_types = call.concrete_types.clone();
            self.validate_generic_concrete_mapping(
                &concrete_types,
                ClassTarget::Library(lib_id),
                expr.loc,
            );
            eval.generics = concrete_types.into();
        }
        if eval.kind == TypeKind::Class && !self.resolve_class_enum_type(&mut eval) {
            self.report(
                expr.loc,
                SemanticError::UndefinedClassOrEnum {
                    name: eval.name.replace('#', "->"),
                },
            );
        }

        self.resolutions
            .insert(call.node_id, ResolvedCall::LibraryMethod(method_ref));
        self.data.set_eval(call.node_id, eval.clone());
        self.data.set_eval(expr.node_id, eval);

        self.analyze_expression_chain(expr);
    }

    fn resolve_library_method(
        &mut self,
        lib_id: LibClassId,
        call: &MethodCall,
        ctx: &ReceiverCtx,
    ) -> Option<crate::library::LibMethodRef> {
        let name = if call.kind == CallKind::New {
            "New".to_string()
        } else {
            self.effective_method_name(call).to_string()
        };
        let env = self.generic_env(ClassTarget::Library(lib_id), call, ctx.entry, &ctx.generics);

        let arity_matched: Vec<(String, Vec<Type>)> = self
            .library
            .class(lib_id)
            .methods_by_short_name(&name)
            .into_iter()
            .filter(|m| m.param_types.len() == call.args.len())
            .map(|m| (m.name.clone(), m.param_types.clone()))
            .collect();

        let mut matches: Vec<CandidateMatch> = Vec::with_capacity(arity_matched.len());
        for (_, param_types) in &arity_matched {
            matches.push(self.score_candidate(call, param_types, &env));
        }

        if let Some(winner) = overload::select(&matches) {
            self.install_rewrites(call, &matches[winner]);
            return Some(crate::library::LibMethodRef {
                class: lib_id,
                encoded: arity_matched[winner].0.clone(),
            });
        }

        // lambda inference against a single function-parameter candidate
        if call.args.len() == 1 && arity_matched.len() == 1 {
            if let ExprKind::Lambda(lambda) = &call.args[0].kind {
                if self.data.eval_type(lambda.node_id).is_none()
                    && arity_matched[0].1[0].kind == TypeKind::Func
                {
                    let inferred = self.resolve_generic_type(&arity_matched[0].1[0], &env);
                    self.build_lambda_function(lambda, call.args[0].node_id, &inferred);

                    let rescored = self.score_candidate(call, &arity_matched[0].1, &env);
                    let matches = vec![rescored];
                    if let Some(winner) = overload::select(&matches) {
                        self.install_rewrites(call, &matches[winner]);
                        return Some(crate::library::LibMethodRef {
                            class: lib_id,
                            encoded: arity_matched[0].0.clone(),
                        });
                    }
                }
            }
        }

        for (encoded, _) in &arity_matched {
            self.alt_method_names.push(encoded.clone());
        }
        None
    }

    // =========================================================================
    // Static-context validation
    // =========================================================================

    /// A static caller may only reach an instance method through a local or
    /// static binding.
    fn invalid_static_call(&self, call: &MethodCall, target_static: bool, kind: MethodKind) -> bool {
        let caller_static = self
            .current_method
            .map(|(c, m)| self.program.class(c).methods[m].is_static)
            .unwrap_or(false);
        if !caller_static || target_static || kind.is_new() {
            return false;
        }

        let entry = self
            .variable_entries
            .get(&call.node_id)
            .copied()
            .or_else(|| {
                call.variable
                    .as_deref()
                    .and_then(|v| self.variable_entries.get(&v.node_id).copied())
            });
        if let Some(entry) = entry {
            let entry = self.program.symbols.entry(entry);
            if entry.is_local || entry.is_static {
                return false;
            }
        }
        true
    }

    // =========================================================================
    // Variable function calls
    // =========================================================================

    /// Call through a variable of function type. Returns true when the call
    /// was resolved (or definitively diagnosed) as a functional call.
    fn analyze_variable_function_call(&mut self, expr: &Expression, call: &MethodCall) -> bool {
        let entry = self
            .variable_entries
            .get(&call.node_id)
            .copied()
            .or_else(|| self.get_entry(self.effective_method_name(call)));
        let Some(entry) = entry else {
            return false;
        };

        let ty = self.entry_type(entry);
        if ty.kind != TypeKind::Func {
            return false;
        }
        let Some(sig) = ty.func.as_deref() else {
            return false;
        };
        let (params, ret) = (sig.params.clone(), sig.ret.clone());

        if params.len() != call.args.len() {
            let name = self.effective_method_name(call).to_string();
            let alternatives = self.take_alternatives();
            self.report(
                expr.loc,
                SemanticError::NoMatchingOverload { name, alternatives },
            );
            return true;
        }
        for (param, arg) in params.iter().zip(call.args.iter()) {
            let is_scalar = self.is_scalar(arg);
            self.analyze_right_cast(param, arg, is_scalar);
        }

        self.resolutions
            .insert(call.node_id, ResolvedCall::Functional { entry });
        self.data.set_eval(call.node_id, ret.clone());
        self.data.set_eval(expr.node_id, ret);
        self.analyze_expression_chain(expr);
        true
    }

    // =========================================================================
    // Enum calls
    // =========================================================================

    fn analyze_enum_call(&mut self, expr: &Expression, call: &MethodCall) {
        let enum_name = call.receiver_name.clone();
        let item_name = call.method_name.clone();

        // library enums first, fully qualified then plain
        let lib_enum = self
            .search_library_enums(&format!("{enum_name}#{item_name}"))
            .or_else(|| self.search_library_enums(&enum_name));
        if let Some(lib_id) = lib_enum {
            let (name, item) = {
                let eenum = self.library.enum_def(lib_id);
                (eenum.name.clone(), eenum.item(&item_name))
            };
            match item {
                Some(value) => {
                    self.resolutions.insert(
                        call.node_id,
                        ResolvedCall::LibraryEnumItem {
                            enum_id: lib_id,
                            value,
                        },
                    );
                    let mut eval = Type::class(name);
                    eval.resolved = true;
                    self.data.set_eval(call.node_id, eval.clone());
                    self.data.set_eval(expr.node_id, eval);
                }
                None => {
                    self.report(expr.loc, SemanticError::UndefinedEnumItem { name: item_name })
                }
            }
            self.analyze_expression_chain(expr);
            return;
        }

        // program enums: qualified, nested in the current class, standalone
        let eenum = self
            .search_program_enums(&format!("{enum_name}#{item_name}"))
            .or_else(|| {
                self.current_class.and_then(|c| {
                    let nested = format!("{}#{enum_name}", self.program.class(c).name);
                    self.search_program_enums(&nested)
                })
            })
            .or_else(|| self.search_program_enums(&enum_name));

        match eenum {
            Some(enum_id) => {
                let (name, item) = {
                    let eenum = self.program.enum_def(enum_id);
                    (eenum.name.clone(), eenum.item(&item_name))
                };
                match item {
                    Some(value) => {
                        self.resolutions.insert(
                            call.node_id,
                            ResolvedCall::EnumItem { enum_id, value },
                        );
                        let mut eval = Type::class(name);
                        eval.resolved = true;
                        self.data.set_eval(call.node_id, eval.clone());
                        self.data.set_eval(expr.node_id, eval);
                    }
                    None => self.report(
                        expr.loc,
                        SemanticError::UndefinedEnumItem { name: item_name },
                    ),
                }
            }
            None => {
                self.report(
                    expr.loc,
                    SemanticError::UndefinedEnum {
                        name: enum_name.replace('#', "->"),
                    },
                );
            }
        }

        self.analyze_expression_chain(expr);
    }

    // =========================================================================
    // Parent calls
    // =========================================================================

    fn analyze_parent_call(&mut self, expr: &Expression, call: &MethodCall) {
        for arg in &call.args {
            self.analyze_expression(arg);
        }

        let Some(current) = self.current_class else {
            return;
        };
        let (parent, lib_parent) = {
            let class = self.program.class(current);
            (class.parent, class.lib_parent)
        };

        if let Some(parent_id) = parent {
            self.analyze_class_method_call(parent_id, expr, call, false, "", ReceiverCtx::default());
        } else if let Some(lib_parent) = lib_parent {
            self.analyze_library_method_call(
                lib_parent,
                expr,
                call,
                false,
                "",
                true,
                ReceiverCtx::default(),
            );
        } else {
            self.report(expr.loc, SemanticError::NoParent);
        }
    }

    // =========================================================================
    // Array construction
    // =========================================================================

    fn analyze_new_array_call(&mut self, expr: &Expression, call: &MethodCall) {
        let Some(mut element) = call.array_type.clone() else {
            self.report(expr.loc, SemanticError::InvalidReceiverType);
            return;
        };

        // a generic element type backed by an interface constructs as the
        // backing
        if let Some(current) = self.current_class {
            let backing = self
                .program
                .class(current)
                .generic(&element.name)
                .and_then(|g| g.backing.clone());
            if let Some(backing) = backing {
                let dim = element.dim;
                element = backing;
                element.dim = dim;
            }
        }

        if call.args.is_empty() {
            self.report(expr.loc, SemanticError::EmptyArrayIndex);
        }
        for index in &call.args {
            self.analyze_expression(index);
            if !self.is_integer_expression(index) {
                self.report(index.loc, SemanticError::InvalidArrayIndex);
            }
        }

        element.dim = call.args.len() as u32;
        if element.kind == TypeKind::Class {
            self.resolve_class_enum_type(&mut element);

            // concrete generic arguments on the element type
            if !call.concrete_types.is_empty() {
                if let Some(target) = self.find_class(&element.name) {
                    let formals = match target {
                        ClassTarget::Program(id) => self.program.class(id).generics.len(),
                        ClassTarget::Library(id) => self.library.class(id).generics.len(),
                    };
                    if formals == call.concrete_types.len() {
                        element.generics = call.concrete_types.clone().into();
                    } else {
                        self.report(expr.loc, SemanticError::ConcreteSizeMismatch);
                    }
                }
            }
        }

        self.resolutions.insert(call.node_id, ResolvedCall::NewArray);
        self.data.set_eval(call.node_id, element.clone());
        self.data.set_eval(expr.node_id, element);
        self.analyze_expression_chain(expr);
    }

    // =========================================================================
    // Function references
    // =========================================================================

    /// `Klass->Method(Int, String)` names a method as a value; arguments are
    /// type names, not expressions.
    fn analyze_function_reference(
        &mut self,
        target: ClassTarget,
        expr: &Expression,
        call: &MethodCall,
    ) {
        let mut encoded_params = String::new();
        let mut param_types: Vec<Type> = Vec::with_capacity(call.args.len());
        for arg in &call.args {
            let ExprKind::Variable(variable) = &arg.kind else {
                self.report(arg.loc, SemanticError::InvalidReceiverType);
                return;
            };

            let mut ty = match well_known::reference_primitive(&variable.name) {
                Some(primitive) => primitive,
                None => {
                    let mut class_ty = Type::class(variable.name.clone());
                    self.resolve_class_enum_type(&mut class_ty);
                    class_ty
                }
            };
            if let Some(indices) = &variable.indices {
                ty.dim = indices.len() as u32;
            }

            encoded_params.push_str(&encode::encode_param(&ty, |n| self.canonical_class_name(n)));
            self.data.set_eval(variable.node_id, ty.clone());
            self.data.set_eval(arg.node_id, ty.clone());
            param_types.push(ty);
        }

        let method_name = self.effective_method_name(call);
        let encoded = format!("{}:{}:{}", self.target_name(target), method_name, encoded_params);

        let found: Option<(Type, ResolvedCall)> = match target {
            ClassTarget::Program(class_id) => self
                .program
                .class(class_id)
                .method_by_encoded_name(&encoded)
                .map(|idx| {
                    let ret = self.program.class(class_id).methods[idx].return_type.clone();
                    (
                        ret,
                        ResolvedCall::Method {
                            class: class_id,
                            method: idx,
                        },
                    )
                }),
            ClassTarget::Library(lib_id) => {
                self.library.class(lib_id).method(&encoded).map(|method| {
                    (
                        method.return_type.clone(),
                        ResolvedCall::LibraryMethod(crate::library::LibMethodRef {
                            class: lib_id,
                            encoded: encoded.clone(),
                        }),
                    )
                })
            }
        };

        match found {
            Some((ret, resolution)) => {
                // the declared functional return must agree when present
                if let Some(declared) = &call.func_return {
                    if declared.kind != ret.kind {
                        self.report(
                            expr.loc,
                            SemanticError::InvalidCast {
                                left: declared.to_string(),
                                right: ret.to_string(),
                            },
                        );
                    }
                }
                let mut fun = Type::func(param_types, ret);
                fun.name = format!(
                    "m.{}",
                    encode::encode_function_type(
                        &fun.func.as_deref().unwrap().params,
                        &fun.func.as_deref().unwrap().ret,
                        |n| self.canonical_class_name(n),
                    )
                );
                self.resolutions.insert(call.node_id, resolution);
                self.data.set_eval(call.node_id, fun.clone());
                self.data.set_eval(expr.node_id, fun);
            }
            None => {
                let name = method_name.to_string();
                let alternatives = self.take_alternatives();
                self.report(
                    expr.loc,
                    SemanticError::NoMatchingOverload { name, alternatives },
                );
            }
        }
    }

    // =========================================================================
    // Chains
    // =========================================================================

    /// Analyze the chained call hanging off an expression whose value type
    /// is now known.
    pub(crate) fn analyze_expression_chain(&mut self, expr: &Expression) {
        let Some(chained) = expr.chain.as_deref() else {
            return;
        };
        let ExprKind::MethodCall(chained_call) = &chained.kind else {
            return;
        };
        if chained_call.kind == CallKind::Enum {
            self.report(chained.loc, SemanticError::UndefinedEnum {
                name: chained_call.receiver_name.clone(),
            });
            return;
        }

        // a cast applied to an indexed variable cannot be called through
        if let ExprKind::Variable(variable) = &expr.kind {
            if variable.indices.is_some() && expr.cast_type.is_some() {
                self.report(chained.loc, SemanticError::IndexedCallReceiver);
                return;
            }
        }
        if matches!(expr.kind, ExprKind::StaticArray(_)) {
            self.report(chained.loc, SemanticError::StaticArrayCall);
            return;
        }

        let receiver_ty = if let Some(cast) = expr
            .cast_type
            .clone()
            .or_else(|| self.data.cast_type(expr.node_id).cloned())
        {
            cast
        } else {
            match self.data.eval_type(expr.node_id).cloned() {
                Some(ty) => ty,
                None => return,
            }
        };

        let dim = if self.is_scalar_at(expr, false) {
            0
        } else {
            receiver_ty.dim
        };
        match self.receiver_class_for_type(&receiver_ty, dim) {
            Some(receiver) => {
                let ctx = ReceiverCtx {
                    entry: None,
                    generics: receiver_ty.generics.to_vec(),
                };
                if let Some(class_id) = receiver.class {
                    self.analyze_class_method_call(
                        class_id,
                        chained,
                        chained_call,
                        true,
                        &receiver.encoding,
                        ctx,
                    );
                } else if let Some(lib_id) = receiver.library {
                    self.analyze_library_method_call(
                        lib_id,
                        chained,
                        chained_call,
                        true,
                        &receiver.encoding,
                        false,
                        ctx,
                    );
                } else {
                    self.report(
                        chained.loc,
                        SemanticError::UndefinedClassReference {
                            name: receiver_ty.to_string(),
                        },
                    );
                }
            }
            None => self.report(chained.loc, SemanticError::InvalidReceiverType),
        }
    }
}

/// Receiver classes and the encoding prefix for the fallback lookup.
struct ResolvedReceiver {
    class: Option<ClassId>,
    library: Option<LibClassId>,
    encoding: String,
    #[allow(dead_code)]
    is_enum_call: bool,
}
