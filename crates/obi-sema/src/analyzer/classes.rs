//! Program-structure phases: alias resolution, default-parameter expansion,
//! signature encoding, parent and interface binding, and per-class analysis.

use super::{Analyzer, ClassTarget};
use crate::encode;
use crate::errors::SemanticError;
use crate::well_known;
use obi_frontend::ast::*;
use obi_frontend::types::{Type, TypeKind};
use rustc_hash::FxHashMap;

impl Analyzer {
    // =========================================================================
    // Phase 3: alias resolution
    // =========================================================================

    /// Rewrite every alias-kind type in the program with its expansion.
    /// Aliases may not expand to aliases.
    pub(crate) fn resolve_alias_types(&mut self) {
        // Collect expansions up front so the tree walk can mutate freely.
        let mut expansions: FxHashMap<String, FxHashMap<String, Type>> = FxHashMap::default();
        for alias in &self.program.aliases {
            expansions.insert(alias.name.clone(), alias.types.clone().into_iter().collect());
        }

        let uses = self.program.uses.clone();
        let mut failures: Vec<(Loc, SemanticError)> = Vec::new();
        let library = &self.library;
        let lookup = |name: &str, loc: Loc, failures: &mut Vec<(Loc, SemanticError)>| {
            let (alias_name, type_name) = match name.find('#') {
                Some(middle) => (&name[..middle], &name[middle + 1..]),
                None => (name, ""),
            };

            let expansion = expansions
                .get(alias_name)
                .and_then(|types| types.get(type_name))
                .cloned()
                .or_else(|| {
                    library
                        .search_aliases(alias_name, &uses)
                        .and_then(|a| a.type_for(type_name))
                        .cloned()
                });
            match expansion {
                Some(ty) if ty.kind == TypeKind::Alias => {
                    failures.push((loc, SemanticError::NestedAlias));
                    None
                }
                Some(ty) => Some(ty),
                None => {
                    failures.push((
                        loc,
                        SemanticError::UndefinedAlias {
                            name: name.replace('#', "->"),
                        },
                    ));
                    None
                }
            }
        };

        fn rewrite(
            ty: &mut Type,
            loc: Loc,
            lookup: &impl Fn(&str, Loc, &mut Vec<(Loc, SemanticError)>) -> Option<Type>,
            failures: &mut Vec<(Loc, SemanticError)>,
        ) {
            if ty.kind == TypeKind::Alias {
                if let Some(expansion) = lookup(&ty.name, loc, failures) {
                    ty.replace_with(&expansion);
                }
            }
            for generic in ty.generics.iter_mut() {
                rewrite(generic, loc, lookup, failures);
            }
            if let Some(sig) = ty.func.as_deref_mut() {
                for param in sig.params.iter_mut() {
                    rewrite(param, loc, lookup, failures);
                }
                rewrite(&mut sig.ret, loc, lookup, failures);
            }
        }

        fn rewrite_expr(
            expr: &mut Expression,
            lookup: &impl Fn(&str, Loc, &mut Vec<(Loc, SemanticError)>) -> Option<Type>,
            failures: &mut Vec<(Loc, SemanticError)>,
        ) {
            let loc = expr.loc;
            if let Some(cast) = expr.cast_type.as_mut() {
                rewrite(cast, loc, lookup, failures);
            }
            match &mut expr.kind {
                ExprKind::MethodCall(call) => {
                    for concrete in call.concrete_types.iter_mut() {
                        rewrite(concrete, loc, lookup, failures);
                    }
                    if let Some(ret) = call.func_return.as_mut() {
                        rewrite(ret, loc, lookup, failures);
                    }
                    if let Some(array) = call.array_type.as_mut() {
                        rewrite(array, loc, lookup, failures);
                    }
                    for arg in call.args.iter_mut() {
                        rewrite_expr(arg, lookup, failures);
                    }
                    if let Some(var) = call.variable.as_mut() {
                        rewrite_var(var, lookup, failures);
                    }
                }
                ExprKind::Lambda(lambda) => {
                    if let Some(ty) = lambda.lambda_type.as_mut() {
                        rewrite(ty, loc, lookup, failures);
                    }
                    rewrite(&mut lambda.method.return_type, loc, lookup, failures);
                    rewrite_stmts(&mut lambda.method.statements, lookup, failures);
                }
                ExprKind::Calc(calc) => {
                    rewrite_expr(&mut calc.left, lookup, failures);
                    rewrite_expr(&mut calc.right, lookup, failures);
                }
                ExprKind::Cond(cond) => {
                    rewrite_expr(&mut cond.cond, lookup, failures);
                    rewrite_expr(&mut cond.then_expr, lookup, failures);
                    rewrite_expr(&mut cond.else_expr, lookup, failures);
                }
                ExprKind::StaticArray(items) => {
                    for item in items {
                        rewrite_expr(item, lookup, failures);
                    }
                }
                ExprKind::TypeOf(type_of) => {
                    rewrite_expr(&mut type_of.expr, lookup, failures);
                    rewrite(&mut type_of.queried, loc, lookup, failures);
                }
                ExprKind::Variable(var) => rewrite_var(var, lookup, failures),
                _ => {}
            }
            if let Some(chain) = expr.chain.as_deref_mut() {
                rewrite_expr(chain, lookup, failures);
            }
        }

        fn rewrite_var(
            var: &mut Variable,
            lookup: &impl Fn(&str, Loc, &mut Vec<(Loc, SemanticError)>) -> Option<Type>,
            failures: &mut Vec<(Loc, SemanticError)>,
        ) {
            if let Some(indices) = var.indices.as_mut() {
                for index in indices {
                    rewrite_expr(index, lookup, failures);
                }
            }
        }

        fn rewrite_stmts(
            statements: &mut [Statement],
            lookup: &impl Fn(&str, Loc, &mut Vec<(Loc, SemanticError)>) -> Option<Type>,
            failures: &mut Vec<(Loc, SemanticError)>,
        ) {
            for statement in statements {
                match statement {
                    Statement::Assignment(a) => {
                        rewrite_var(&mut a.variable, lookup, failures);
                        rewrite_expr(&mut a.expr, lookup, failures);
                    }
                    Statement::Declaration(d) => {
                        if let Some(a) = d.assignment.as_deref_mut() {
                            rewrite_var(&mut a.variable, lookup, failures);
                            rewrite_expr(&mut a.expr, lookup, failures);
                        }
                    }
                    Statement::Expression(e) => rewrite_expr(e, lookup, failures),
                    Statement::If(s) => {
                        let mut cursor = Some(s);
                        while let Some(stmt) = cursor {
                            rewrite_expr(&mut stmt.cond, lookup, failures);
                            rewrite_stmts(&mut stmt.then_block, lookup, failures);
                            if let Some(block) = stmt.else_block.as_mut() {
                                rewrite_stmts(block, lookup, failures);
                            }
                            cursor = stmt.next.as_deref_mut();
                        }
                    }
                    Statement::Select(s) => {
                        rewrite_expr(&mut s.operand, lookup, failures);
                        for arm in &mut s.arms {
                            for label in &mut arm.labels {
                                rewrite_expr(label, lookup, failures);
                            }
                            rewrite_stmts(&mut arm.body, lookup, failures);
                        }
                        if let Some(other) = s.other.as_mut() {
                            rewrite_stmts(other, lookup, failures);
                        }
                    }
                    Statement::While(s) | Statement::DoWhile(s) => {
                        rewrite_expr(&mut s.cond, lookup, failures);
                        rewrite_stmts(&mut s.body, lookup, failures);
                    }
                    Statement::For(s) => {
                        rewrite_stmts(std::slice::from_mut(&mut *s.pre), lookup, failures);
                        rewrite_expr(&mut s.cond, lookup, failures);
                        rewrite_stmts(std::slice::from_mut(&mut *s.update), lookup, failures);
                        rewrite_stmts(&mut s.body, lookup, failures);
                    }
                    Statement::Return(s) => {
                        if let Some(expr) = s.expr.as_mut() {
                            rewrite_expr(expr, lookup, failures);
                        }
                    }
                    Statement::Critical(s) => rewrite_stmts(&mut s.body, lookup, failures),
                    Statement::Leaving(s) => rewrite_stmts(&mut s.body, lookup, failures),
                    _ => {}
                }
            }
        }

        // Symbol entries carry parameter, field and local types.
        for index in 0..self.program.symbols.entry_count() {
            let id = EntryId::new(index as u32);
            let mut ty = self.program.symbols.entry(id).ty.clone();
            if ty.kind == TypeKind::Alias
                || ty.generics.iter().any(|g| g.kind == TypeKind::Alias)
                || ty.func.is_some()
            {
                let loc = Loc {
                    file: FileId::new(0),
                    line: 1,
                };
                rewrite(&mut ty, loc, &lookup, &mut failures);
                self.program.symbols.entry_mut(id).ty = ty;
            }
        }

        // Method returns and bodies, class fields.
        let mut classes = std::mem::take(&mut self.program.classes);
        for class in &mut classes {
            rewrite_stmts(&mut class.statements, &lookup, &mut failures);
            for method in &mut class.methods {
                rewrite(&mut method.return_type, method.loc, &lookup, &mut failures);
                rewrite_stmts(&mut method.statements, &lookup, &mut failures);
            }
        }
        self.program.classes = classes;

        for (loc, error) in failures {
            self.report(loc, error);
        }
    }

    // =========================================================================
    // Phase 4: default-parameter expansion
    // =========================================================================

    pub(crate) fn expand_default_parameters(&mut self) {
        for cid in 0..self.program.classes.len() {
            let class_id = ClassId::new(cid as u32);
            let method_count = self.program.class(class_id).methods.len();
            for m in 0..method_count {
                self.add_default_parameter_methods(class_id, m);
            }
        }
    }

    fn add_default_parameter_methods(&mut self, class_id: ClassId, method_idx: MethodIdx) {
        let (is_virtual, method_loc, first_loc, has_default) = {
            let method = &self.program.class(class_id).methods[method_idx];
            (
                method.is_virtual,
                method.loc,
                method.declarations.first().map(|d| d.loc),
                method
                    .declarations
                    .iter()
                    .map(|d| d.assignment.is_some())
                    .collect::<Vec<bool>>(),
            )
        };

        if has_default.last() != Some(&true) {
            return;
        }

        if is_virtual {
            self.report(method_loc, SemanticError::DefaultParamOnVirtual);
            return;
        }

        // defaults must be contiguous at the tail
        let mut in_defaults = true;
        for &defaulted in has_default.iter().rev() {
            if defaulted {
                if !in_defaults {
                    let loc = first_loc.unwrap_or(method_loc);
                    self.report(loc, SemanticError::DefaultParamNotTrailing);
                    return;
                }
            } else {
                in_defaults = false;
            }
        }

        self.generate_parameter_methods(class_id, method_idx);
    }

    /// Synthesize one trampoline per trailing-default prefix: the kept
    /// parameters become the signature, each dropped default becomes an
    /// assignment prepended to the body, and code generation stitches the
    /// trampoline to its original.
    fn generate_parameter_methods(&mut self, class_id: ClassId, method_idx: MethodIdx) {
        let method = self.program.class(class_id).methods[method_idx].clone();
        let first_default = method
            .declarations
            .iter()
            .position(|d| d.assignment.is_some())
            .expect("caller checked a default exists");

        for prefix_len in first_default..method.declarations.len() {
            let parsed_name = format!("{}#{}", method.parsed_name, prefix_len);

            let mut alt_declarations = Vec::with_capacity(prefix_len);
            let mut alt_statements = Vec::new();
            self.program.symbols.new_parse_scope();
            for (i, declaration) in method.declarations.iter().enumerate() {
                let mut declaration = declaration.clone();
                // every parameter entry stays visible in the trampoline's
                // scope; dropped ones are assigned, not declared
                self.program.symbols.add_to_parse_scope(declaration.entry);
                if i < prefix_len {
                    declaration.assignment = None;
                    alt_declarations.push(declaration);
                } else {
                    let assignment = declaration
                        .assignment
                        .take()
                        .expect("trailing declarations carry defaults");
                    let ty = self.program.symbols.entry(declaration.entry).ty.clone();
                    self.data.set_eval_soft(assignment.expr.node_id, ty);
                    alt_statements.push(Statement::Assignment(*assignment));
                }
            }
            self.program.symbols.previous_parse_scope(&parsed_name);

            let alt_method = Method {
                loc: method.loc,
                name: method.name.clone(),
                short_name: method.short_name.clone(),
                parsed_name,
                encoded_name: String::new(),
                kind: method.kind,
                is_static: method.is_static,
                is_virtual: false,
                is_native: method.is_native,
                is_lambda: false,
                return_type: method.return_type.clone(),
                declarations: alt_declarations,
                statements: alt_statements,
                original: Some(method_idx),
                and_or: false,
                id: -1,
            };
            self.program.class_mut(class_id).methods.push(alt_method);
        }
    }

    // =========================================================================
    // Phase 5: signature re-encoding
    // =========================================================================

    pub(crate) fn encode_signatures(&mut self) {
        for cid in 0..self.program.classes.len() {
            let class_id = ClassId::new(cid as u32);
            self.current_bundle = self.program.class(class_id).bundle_name.clone();
            let method_count = self.program.class(class_id).methods.len();
            for m in 0..method_count {
                if self.program.class(class_id).methods[m].is_lambda {
                    continue;
                }
                let encoded = self.encode_method_signature(class_id, m);
                self.program.class_mut(class_id).methods[m].encoded_name = encoded;
            }
        }
        self.current_bundle = String::new();
    }

    /// Canonical signature of a method from its class, short name and
    /// parameter entry types.
    pub(crate) fn encode_method_signature(&self, class_id: ClassId, method_idx: MethodIdx) -> String {
        let class = self.program.class(class_id);
        let method = &class.methods[method_idx];
        let param_types: Vec<Type> = method
            .declarations
            .iter()
            .map(|d| self.program.symbols.entry(d.entry).ty.clone())
            .collect();
        encode::encode_method_name(&class.name, &method.short_name, &param_types, |n| {
            self.canonical_class_name(n)
        })
    }

    // =========================================================================
    // Phase 6: parent binding and method association
    // =========================================================================

    pub(crate) fn bind_parents_and_associate(&mut self) {
        for cid in 0..self.program.classes.len() {
            let class_id = ClassId::new(cid as u32);
            self.current_bundle = self.program.class(class_id).bundle_name.clone();

            let mut parent_name = self.program.class(class_id).parent_name.clone();
            if parent_name.is_empty() && self.program.class(class_id).name != well_known::SYSTEM_BASE
            {
                parent_name = well_known::SYSTEM_BASE.to_string();
                self.program.class_mut(class_id).parent_name = parent_name.clone();
            }

            if !parent_name.is_empty() {
                if let Some(parent_id) = self.search_program_classes(&parent_name) {
                    self.program.class_mut(class_id).parent = Some(parent_id);
                    self.program.class_mut(parent_id).children.push(class_id);
                } else if let Some(lib_parent) = self.search_library_classes(&parent_name) {
                    self.program.class_mut(class_id).lib_parent = Some(lib_parent);
                    self.library
                        .class_mut(lib_parent)
                        .program_children
                        .push(class_id);
                } else {
                    let loc = self.program.class(class_id).loc;
                    self.report(loc, SemanticError::UndefinedParent);
                }
            }

            self.associate_methods(class_id);
        }
        self.current_bundle = String::new();
    }

    /// Index a class's methods by encoded name.
    pub(crate) fn associate_methods(&mut self, class_id: ClassId) {
        let mut index = FxHashMap::default();
        let mut duplicates: Vec<(Loc, String)> = Vec::new();
        {
            let class = self.program.class(class_id);
            for (idx, method) in class.methods.iter().enumerate() {
                if method.encoded_name.is_empty() {
                    continue;
                }
                if index
                    .insert(method.encoded_name.clone(), idx)
                    .is_some()
                {
                    duplicates.push((method.loc, method.short_name.clone()));
                }
            }
        }
        self.program.class_mut(class_id).method_index = index;
        for (loc, name) in duplicates {
            self.report(loc, SemanticError::AlreadyOverloaded { name });
        }
    }

    // =========================================================================
    // Phase 7: per-bundle class analysis
    // =========================================================================

    pub(crate) fn analyze_enum(&mut self, id: EnumId) {
        let (name, loc) = {
            let eenum = self.program.enum_def(id);
            (eenum.name.clone(), eenum.loc)
        };

        if self.search_library_classes(&name).is_some()
            || self.search_library_enums(&name).is_some()
        {
            self.report(
                loc,
                SemanticError::EnumShadowsLibrary {
                    name: name.replace('#', "->"),
                },
            );
        }
    }

    pub(crate) fn analyze_class(&mut self, class_id: ClassId) {
        self.current_class = Some(class_id);
        self.program.class_mut(class_id).is_called = true;

        let (name, loc) = {
            let class = self.program.class(class_id);
            (class.name.clone(), class.loc)
        };
        tracing::trace!(class = %name, "analyzing class");

        if self.search_library_classes(&name).is_some()
            || self.search_library_enums(&name).is_some()
        {
            self.report(loc, SemanticError::ClassShadowsLibrary { name: name.clone() });
        }

        self.analyze_class_generics(class_id);
        self.check_parent(class_id);
        self.analyze_interfaces(class_id);

        // field declarations
        self.current_method = None;
        let statements = std::mem::take(&mut self.program.class_mut(class_id).statements);
        for statement in &statements {
            if let Statement::Declaration(declaration) = statement {
                self.analyze_declaration(declaration, class_id);
            }
        }
        self.program.class_mut(class_id).statements = statements;
    }

    /// Generic formal parameters must not shadow real classes, and their
    /// backing interfaces must resolve.
    fn analyze_class_generics(&mut self, class_id: ClassId) {
        let loc = self.program.class(class_id).loc;
        let generics = self.program.class(class_id).generics.clone();
        for (index, generic) in generics.into_iter().enumerate() {
            if self.has_class(&generic.name) {
                self.report(
                    loc,
                    SemanticError::GenericShadowsClass { name: generic.name },
                );
                continue;
            }
            if let Some(mut backing) = generic.backing {
                if let Some(canonical) = self.canonical_class_name(&backing.name) {
                    backing.name = canonical;
                    backing.resolved = true;
                    self.program.class_mut(class_id).generics[index].backing = Some(backing);
                } else {
                    self.report(
                        loc,
                        SemanticError::UndefinedBackingInterface { name: backing.name },
                    );
                }
            }
        }
    }

    fn check_parent(&mut self, class_id: ClassId) {
        let (loc, name, parent, lib_parent) = {
            let class = self.program.class(class_id);
            (class.loc, class.name.clone(), class.parent, class.lib_parent)
        };
        if let Some(parent_id) = parent {
            let parent = self.program.class(parent_id);
            if parent.is_interface || parent.has_generics() {
                self.report(loc, SemanticError::InheritFromInterfaceOrGeneric { name });
            }
        } else if let Some(lib_parent) = lib_parent {
            if self.library.class(lib_parent).is_interface {
                self.report(loc, SemanticError::InheritFromLibraryInterface);
            }
        }
    }

    fn analyze_interfaces(&mut self, class_id: ClassId) {
        let loc = self.program.class(class_id).loc;
        let interface_names = self.program.class(class_id).interface_names.clone();
        let mut interfaces = Vec::new();
        let mut lib_interfaces = Vec::new();

        for interface_name in interface_names {
            if let Some(interface_id) = self.search_program_classes(&interface_name) {
                if !self.program.class(interface_id).is_interface {
                    self.report(loc, SemanticError::ExpectedInterface);
                    return;
                }

                // interface members must be virtual
                let non_virtual: Vec<Loc> = self
                    .program
                    .class(interface_id)
                    .methods
                    .iter()
                    .filter(|m| !m.is_virtual)
                    .map(|m| m.loc)
                    .collect();
                for method_loc in non_virtual {
                    self.report(method_loc, SemanticError::InterfaceMethodNotVirtual);
                }

                if !self.analyze_virtual_methods(class_id, ClassTarget::Program(interface_id)) {
                    let name = self.program.class(interface_id).name.clone();
                    self.report(loc, SemanticError::InterfaceNotImplemented { name });
                } else {
                    self.program.class_mut(interface_id).is_called = true;
                    self.program.class_mut(interface_id).children.push(class_id);
                    interfaces.push(interface_id);
                }
            } else if let Some(lib_interface) = self.search_library_classes(&interface_name) {
                if !self.library.class(lib_interface).is_interface {
                    self.report(loc, SemanticError::ExpectedInterface);
                    return;
                }

                let all_virtual = self
                    .library
                    .class(lib_interface)
                    .methods
                    .values()
                    .all(|m| m.is_virtual || m.kind.is_new());
                if !all_virtual {
                    self.report(loc, SemanticError::InterfaceMethodNotVirtual);
                }

                if !self.analyze_virtual_methods(class_id, ClassTarget::Library(lib_interface)) {
                    let name = self.library.class(lib_interface).name.clone();
                    self.report(loc, SemanticError::InterfaceNotImplemented { name });
                } else {
                    self.library
                        .class_mut(lib_interface)
                        .program_children
                        .push(class_id);
                    lib_interfaces.push(lib_interface);
                }
            } else {
                self.report(
                    loc,
                    SemanticError::UndefinedInterface {
                        name: interface_name,
                    },
                );
            }
        }

        let class = self.program.class_mut(class_id);
        class.interfaces = interfaces;
        class.lib_interfaces = lib_interfaces;
    }

    // =========================================================================
    // Virtual-method conformance
    // =========================================================================

    /// Every virtual method of `virtual_target` must have a concrete
    /// implementation with the same parameter encoding on `impl_class` or up
    /// its inheritance chain.
    pub(crate) fn analyze_virtual_methods(
        &mut self,
        impl_class: ClassId,
        virtual_target: ClassTarget,
    ) -> bool {
        let virtual_methods: Vec<VirtualShape> = match virtual_target {
            ClassTarget::Program(id) => self
                .program
                .class(id)
                .methods
                .iter()
                .filter(|m| m.is_virtual)
                .map(|m| VirtualShape {
                    owner: self.program.class(id).name.clone(),
                    encoded_name: m.encoded_name.clone(),
                    kind: m.kind,
                    return_type: m.return_type.clone(),
                    is_static: m.is_static,
                })
                .collect(),
            ClassTarget::Library(id) => self
                .library
                .class(id)
                .methods
                .values()
                .filter(|m| m.is_virtual)
                .map(|m| VirtualShape {
                    owner: self.library.class(id).name.clone(),
                    encoded_name: m.name.clone(),
                    kind: m.kind,
                    return_type: m.return_type.clone(),
                    is_static: m.is_static,
                })
                .collect(),
        };

        let mut all_defined = true;
        for shape in virtual_methods {
            let Some(suffix_at) = shape.encoded_name.find(':') else {
                continue;
            };
            let suffix = shape.encoded_name[suffix_at..].to_string();

            match self.find_implementation(impl_class, &suffix) {
                Some(found) => self.check_virtual_implementation(impl_class, &shape, found),
                None => all_defined = false,
            }
        }

        all_defined
    }

    /// Search `impl_class` then its ancestors for a method whose encoded
    /// name matches `{class}{suffix}`.
    fn find_implementation(&self, impl_class: ClassId, suffix: &str) -> Option<ImplShape> {
        let mut cursor = Some(impl_class);
        while let Some(class_id) = cursor {
            let class = self.program.class(class_id);
            let encoded = format!("{}{suffix}", class.name);
            if let Some(idx) = class.method_by_encoded_name(&encoded) {
                let method = &class.methods[idx];
                return Some(ImplShape {
                    kind: method.kind,
                    return_type: method.return_type.clone(),
                    is_static: method.is_static,
                    is_virtual: method.is_virtual,
                });
            }
            if let Some(lib_parent) = class.lib_parent {
                let lib_class = self.library.class(lib_parent);
                let encoded = format!("{}{suffix}", lib_class.name);
                if let Some(method) = lib_class.method(&encoded) {
                    return Some(ImplShape {
                        kind: method.kind,
                        return_type: method.return_type.clone(),
                        is_static: method.is_static,
                        is_virtual: method.is_virtual,
                    });
                }
            }
            cursor = class.parent;
        }
        None
    }

    fn check_virtual_implementation(
        &mut self,
        impl_class: ClassId,
        shape: &VirtualShape,
        found: ImplShape,
    ) {
        let loc = self.program.class(impl_class).loc;
        let mismatch = SemanticError::VirtualMethodMismatch {
            name: shape.owner.clone(),
        };

        if found.kind != shape.kind {
            self.report(loc, mismatch.clone());
        }
        if found.return_type.kind != shape.return_type.kind {
            self.report(loc, mismatch.clone());
        } else if found.return_type.kind == TypeKind::Class
            && found.return_type.name != shape.return_type.name
        {
            let impl_name = self.class_name_or(&found.return_type.name);
            let virtual_name = self.class_name_or(&shape.return_type.name);
            if impl_name != virtual_name {
                self.report(loc, mismatch.clone());
            }
        }
        if found.is_static != shape.is_static {
            self.report(loc, mismatch);
        }
        if found.is_virtual {
            self.report(loc, SemanticError::ImplementationIsVirtual);
        }
    }

    // =========================================================================
    // Phase 8: duplicate-field check
    // =========================================================================

    pub(crate) fn analyze_duplicate_entries(&mut self, class_ids: &[ClassId]) {
        for &class_id in class_ids {
            let declarations: Vec<(Loc, EntryId)> = self
                .program
                .class(class_id)
                .statements
                .iter()
                .filter_map(|s| match s {
                    Statement::Declaration(d) => Some((d.loc, d.entry)),
                    _ => None,
                })
                .collect();

            for (loc, entry) in declarations {
                if self.duplicate_parent_entry(entry, class_id) {
                    let short = self
                        .program
                        .symbols
                        .entry(entry)
                        .short_name()
                        .to_string();
                    self.report(loc, SemanticError::DuplicateParentEntry { name: short });
                }
            }
        }
    }

    fn duplicate_parent_entry(&self, entry: EntryId, class_id: ClassId) -> bool {
        let entry = self.program.symbols.entry(entry);
        if entry.is_local && !entry.is_static {
            return false;
        }
        let short = entry.short_name().to_string();

        let mut parent = self.program.class(class_id).parent;
        while let Some(parent_id) = parent {
            let parent_name = self.program.class(parent_id).name.clone();
            let lookup = format!("{parent_name}:{short}");
            if self.program.symbols.lookup(&parent_name, &lookup).is_some() {
                return true;
            }
            parent = self.program.class(parent_id).parent;
        }
        false
    }

    // =========================================================================
    // Declarations
    // =========================================================================

    pub(crate) fn analyze_declaration(&mut self, declaration: &Declaration, class_id: ClassId) {
        let mut ty = self.program.symbols.entry(declaration.entry).ty.clone();

        match ty.kind {
            TypeKind::Class => {
                if !self.resolve_class_enum_type(&mut ty) {
                    self.report(
                        declaration.loc,
                        SemanticError::UndefinedClassOrEnum {
                            name: ty.name.replace('#', "->"),
                        },
                    );
                } else {
                    // declared concrete generics must satisfy their backings
                    let generics = ty.generics.clone();
                    if !generics.is_empty() {
                        self.validate_declared_generics(&ty, declaration.loc, class_id);
                    }
                    self.program.symbols.entry_mut(declaration.entry).ty = ty;
                }
            }
            TypeKind::Alias => {
                // surviving alias means resolution failed earlier
                self.report(
                    declaration.loc,
                    SemanticError::UndefinedAlias {
                        name: ty.name.replace('#', "->"),
                    },
                );
            }
            _ => {}
        }

        if let Some(assignment) = declaration.assignment.as_deref() {
            self.analyze_assignment(assignment);
        }
    }
}

struct VirtualShape {
    owner: String,
    encoded_name: String,
    kind: MethodKind,
    return_type: Type,
    is_static: bool,
}

struct ImplShape {
    kind: MethodKind,
    return_type: Type,
    is_static: bool,
    is_virtual: bool,
}
