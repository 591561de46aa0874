//! Contextual analysis driver.
//!
//! [`Analyzer::analyze`] runs the phases in order over a parsed program and
//! a loaded-library index: uses validation, alias resolution,
//! default-parameter expansion, signature re-encoding, parent and interface
//! binding, then per-bundle class and method analysis, finishing with the
//! entry-point check. Errors accumulate in a line-keyed map; nothing is
//! emitted downstream when any error was reported, and the program AST is
//! consumed either way.

mod calls;
mod classes;
mod expr;
mod generics;
mod methods;
mod stmts;
#[cfg(test)]
mod tests;

use crate::errors::{Diagnostic, ErrorMap, SemanticError};
use crate::library::LibraryIndex;
use crate::resolution::{AnalyzedProgram, BoxingRewrite, ExpressionData, ResolvedCall};
use crate::well_known;
use obi_frontend::ast::*;
use obi_frontend::types::{ClassRef, Type};
use rustc_hash::FxHashMap;

/// Either side of the program/library class split. Most resolution paths
/// have to try both, in that order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClassTarget {
    Program(ClassId),
    Library(LibClassId),
}

pub struct Analyzer {
    pub(crate) program: Program,
    pub(crate) library: LibraryIndex,
    pub(crate) errors: ErrorMap,

    pub(crate) data: ExpressionData,
    pub(crate) resolutions: FxHashMap<NodeId, ResolvedCall>,
    pub(crate) variable_entries: FxHashMap<NodeId, EntryId>,
    pub(crate) boxing: FxHashMap<NodeId, BoxingRewrite>,

    pub(crate) classes_by_name: FxHashMap<String, ClassId>,
    pub(crate) enums_by_name: FxHashMap<String, EnumId>,

    /// Context while walking a bundle / class / method.
    pub(crate) current_bundle: String,
    pub(crate) current_class: Option<ClassId>,
    pub(crate) current_method: Option<(ClassId, MethodIdx)>,
    /// Analyzing the body of a lambda hoisted into the current class.
    pub(crate) in_lambda: bool,
    pub(crate) loop_depth: u32,
    pub(crate) leaving_seen: bool,

    pub(crate) entry_point: Option<(ClassId, MethodIdx)>,
    pub(crate) main_found: bool,
    pub(crate) web_found: bool,
    /// Formatted alternative signatures for the next overload diagnostic.
    pub(crate) alt_method_names: Vec<String>,
    pub(crate) next_method_id: i32,
}

impl Analyzer {
    pub fn new(program: Program, library: LibraryIndex) -> Self {
        let mut classes_by_name = FxHashMap::default();
        for class in &program.classes {
            classes_by_name.insert(class.name.clone(), class.id);
        }
        let mut enums_by_name = FxHashMap::default();
        for eenum in &program.enums {
            enums_by_name.insert(eenum.name.clone(), eenum.id);
        }

        Analyzer {
            program,
            library,
            errors: ErrorMap::new(),
            data: ExpressionData::default(),
            resolutions: FxHashMap::default(),
            variable_entries: FxHashMap::default(),
            boxing: FxHashMap::default(),
            classes_by_name,
            enums_by_name,
            current_bundle: String::new(),
            current_class: None,
            current_method: None,
            in_lambda: false,
            loop_depth: 0,
            leaving_seen: false,
            entry_point: None,
            main_found: false,
            web_found: false,
            alt_method_names: Vec::new(),
            next_method_id: 0,
        }
    }

    /// Run the full pass. The program is consumed: on failure only the
    /// diagnostics survive.
    pub fn analyze(mut self) -> Result<AnalyzedProgram, Vec<Diagnostic>> {
        tracing::debug!(file = %self.program.file_name, "contextual analysis");

        self.check_uses();
        self.resolve_alias_types();
        self.expand_default_parameters();
        self.encode_signatures();
        self.bind_parents_and_associate();

        let bundle_count = self.program.bundles.len();
        for b in 0..bundle_count {
            self.current_bundle = self.program.bundles[b].name.clone();

            let enum_ids: Vec<EnumId> = self.program.bundles[b].enums.clone();
            for id in enum_ids {
                self.analyze_enum(id);
            }

            let class_ids: Vec<ClassId> = self.program.bundles[b].classes.clone();
            for &id in &class_ids {
                self.analyze_class(id);
            }
            self.analyze_duplicate_entries(&class_ids);
            for &id in &class_ids {
                self.analyze_methods(id);
            }
        }

        // entry points
        if !self.main_found && !self.program.is_lib && !self.program.is_web {
            let file = self.program.file_name.clone();
            self.errors.report(&file, 1, SemanticError::MainNotDefined);
        }
        if self.program.is_web && !self.web_found {
            let file = self.program.file_name.clone();
            self.errors.report(&file, 1, SemanticError::ActionNotDefined);
        }

        if self.errors.is_empty() {
            Ok(AnalyzedProgram {
                program: self.program,
                expression_data: self.data,
                resolutions: self.resolutions,
                variable_entries: self.variable_entries,
                boxing: self.boxing,
                entry_point: self.entry_point,
            })
        } else {
            Err(self.errors.into_diagnostics())
        }
    }

    // =========================================================================
    // Error reporting
    // =========================================================================

    pub(crate) fn report(&mut self, loc: Loc, error: SemanticError) {
        let file = self.program.files[loc.file.index()].clone();
        self.errors.report(&file, loc.line, error);
    }

    pub(crate) fn report_at_file(&mut self, error: SemanticError) {
        let file = self.program.file_name.clone();
        self.errors.report(&file, 1, error);
    }

    /// Consume the buffered alternative signatures into a diagnostic suffix.
    pub(crate) fn take_alternatives(&mut self) -> String {
        if self.alt_method_names.is_empty() {
            return String::new();
        }
        let mut text = String::from("\n\tPossible alternative(s):\n");
        for name in self.alt_method_names.drain(..) {
            text.push_str("\t\t");
            text.push_str(&name);
            text.push('\n');
        }
        text
    }

    // =========================================================================
    // Phase 2: uses validation
    // =========================================================================

    fn check_uses(&mut self) {
        let uses = self.program.uses.clone();
        for name in uses {
            if !self.program.has_bundle(&name) && !self.library.has_bundle(&name) {
                self.report_at_file(SemanticError::BundleNotDefined { name });
            }
        }
    }

    // =========================================================================
    // Name resolution over the program / library split
    // =========================================================================

    pub(crate) fn search_program_classes(&self, name: &str) -> Option<ClassId> {
        if let Some(&id) = self.classes_by_name.get(name) {
            return Some(id);
        }
        if !self.current_bundle.is_empty() {
            let qualified = format!("{}.{name}", self.current_bundle);
            if let Some(&id) = self.classes_by_name.get(&qualified) {
                return Some(id);
            }
        }
        for prefix in &self.program.uses {
            if let Some(&id) = self.classes_by_name.get(&format!("{prefix}.{name}")) {
                return Some(id);
            }
        }
        None
    }

    pub(crate) fn search_program_enums(&self, name: &str) -> Option<EnumId> {
        if let Some(&id) = self.enums_by_name.get(name) {
            return Some(id);
        }
        if !self.current_bundle.is_empty() {
            let qualified = format!("{}.{name}", self.current_bundle);
            if let Some(&id) = self.enums_by_name.get(&qualified) {
                return Some(id);
            }
        }
        for prefix in &self.program.uses {
            if let Some(&id) = self.enums_by_name.get(&format!("{prefix}.{name}")) {
                return Some(id);
            }
        }
        None
    }

    pub(crate) fn search_library_classes(&self, name: &str) -> Option<LibClassId> {
        self.library.search_classes(name, &self.program.uses)
    }

    pub(crate) fn search_library_enums(&self, name: &str) -> Option<LibEnumId> {
        self.library.search_enums(name, &self.program.uses)
    }

    /// Program class first, then library; the resolution order every lookup
    /// in the analyzer follows.
    pub(crate) fn find_class(&self, name: &str) -> Option<ClassTarget> {
        if let Some(id) = self.search_program_classes(name) {
            return Some(ClassTarget::Program(id));
        }
        self.search_library_classes(name).map(ClassTarget::Library)
    }

    pub(crate) fn has_class(&self, name: &str) -> bool {
        self.find_class(name).is_some()
    }

    pub(crate) fn has_enum(&self, name: &str) -> bool {
        self.search_program_enums(name).is_some() || self.search_library_enums(name).is_some()
    }

    /// Canonical fully qualified spelling of a class name, if it resolves.
    pub(crate) fn canonical_class_name(&self, name: &str) -> Option<String> {
        match self.find_class(name)? {
            ClassTarget::Program(id) => Some(self.program.class(id).name.clone()),
            ClassTarget::Library(id) => Some(self.library.class(id).name.clone()),
        }
    }

    /// Canonical spelling with fallback to the given name.
    pub(crate) fn class_name_or(&self, name: &str) -> String {
        self.canonical_class_name(name)
            .unwrap_or_else(|| name.to_string())
    }

    pub(crate) fn target_name(&self, target: ClassTarget) -> &str {
        match target {
            ClassTarget::Program(id) => &self.program.class(id).name,
            ClassTarget::Library(id) => &self.library.class(id).name,
        }
    }

    /// Canonicalize a class-or-enum type in place: fix up the name, set the
    /// registry short-circuit, flag resolution, and mark the class called.
    /// Falls back to the current class's generic parameters (substituting
    /// the backing interface when one is declared). Returns false when the
    /// name resolves to nothing.
    pub(crate) fn resolve_class_enum_type(&mut self, ty: &mut Type) -> bool {
        if ty.resolved {
            return true;
        }

        if let Some(id) = self.search_program_classes(&ty.name) {
            ty.name = self.program.class(id).name.clone();
            ty.class_ref = Some(ClassRef::Program(id));
            ty.resolved = true;
            self.program.class_mut(id).is_called = true;
            return true;
        }
        if let Some(id) = self.search_library_classes(&ty.name) {
            ty.name = self.library.class(id).name.clone();
            ty.class_ref = Some(ClassRef::Library(id));
            ty.resolved = true;
            return true;
        }

        // generic parameter of the enclosing class
        if let Some(current) = self.current_class {
            let generic = self
                .program
                .class(current)
                .generic(&ty.name)
                .cloned();
            if let Some(generic) = generic {
                if let Some(mut backing) = generic.backing {
                    if self.resolve_class_enum_type(&mut backing) {
                        ty.name = backing.name;
                        ty.resolved = true;
                        return true;
                    }
                } else {
                    ty.resolved = true;
                    return true;
                }
            }
        }

        if let Some(id) = self.search_program_enums(&ty.name) {
            ty.name = self.program.enum_def(id).name.clone();
            ty.resolved = true;
            return true;
        }
        // nested enum of the enclosing class
        if let Some(current) = self.current_class {
            let nested = format!("{}#{}", self.program.class(current).name, ty.name);
            if self.search_program_enums(&nested).is_some() {
                ty.name = nested;
                ty.resolved = true;
                return true;
            }
        }
        if let Some(id) = self.search_library_enums(&ty.name) {
            ty.name = self.library.enum_def(id).name.clone();
            ty.resolved = true;
            return true;
        }

        false
    }

    /// Whether two class/enum names refer to the same definition once both
    /// are canonicalized.
    pub(crate) fn class_enum_names_match(&self, calling: &str, method: &str) -> bool {
        let left = self.resolve_name_with_generics(calling);
        let right = self.resolve_name_with_generics(method);
        match (left, right) {
            (Some(l), Some(r)) => l == r,
            _ => {
                // enum side
                let l = self.canonical_enum_name(calling);
                let r = self.canonical_enum_name(method);
                matches!((l, r), (Some(l), Some(r)) if l == r)
            }
        }
    }

    fn resolve_name_with_generics(&self, name: &str) -> Option<String> {
        if let Some(canonical) = self.canonical_class_name(name) {
            return Some(canonical);
        }
        let current = self.current_class?;
        self.program
            .class(current)
            .generic(name)
            .map(|g| g.name.clone())
    }

    fn canonical_enum_name(&self, name: &str) -> Option<String> {
        if let Some(id) = self.search_program_enums(name) {
            return Some(self.program.enum_def(id).name.clone());
        }
        self.search_library_enums(name)
            .map(|id| self.library.enum_def(id).name.clone())
    }

    // =========================================================================
    // Cast lattice over the class graph
    // =========================================================================

    /// `from` down-casts to `to_name` when walking `from`'s parent chain, or
    /// any ancestor's interface list, reaches a class named `to_name`.
    /// `System.Base` is the universal super-type.
    pub(crate) fn valid_downcast(&self, to_name: &str, from: Option<ClassTarget>) -> bool {
        if to_name == well_known::SYSTEM_BASE {
            return true;
        }

        let mut cursor = from;
        while let Some(target) = cursor {
            let (cast_name, interface_names) = match target {
                ClassTarget::Program(id) => {
                    let class = self.program.class(id);
                    (class.name.clone(), class.interface_names.clone())
                }
                ClassTarget::Library(id) => {
                    let class = self.library.class(id);
                    (class.name.clone(), class.interface_names.clone())
                }
            };

            if cast_name == to_name {
                return true;
            }
            for interface in &interface_names {
                if self.class_name_or(interface) == to_name {
                    return true;
                }
            }

            cursor = match target {
                ClassTarget::Program(id) => {
                    let class = self.program.class(id);
                    if let Some(parent) = class.parent {
                        Some(ClassTarget::Program(parent))
                    } else {
                        class.lib_parent.map(ClassTarget::Library)
                    }
                }
                // Library parents resolve by name at each step.
                ClassTarget::Library(id) => self
                    .search_library_classes(&self.library.class(id).parent_name.clone())
                    .map(ClassTarget::Library),
            };
        }

        false
    }

    /// `from` up-casts to `to` when `to` is reachable through `from`'s
    /// (recursive) child set, or names `from` itself or one of its
    /// interfaces.
    pub(crate) fn valid_upcast(&self, to: &str, from: ClassTarget) -> bool {
        let (name, interface_names) = match from {
            ClassTarget::Program(id) => {
                let class = self.program.class(id);
                (class.name.clone(), class.interface_names.clone())
            }
            ClassTarget::Library(id) => {
                let class = self.library.class(id);
                (class.name.clone(), class.interface_names.clone())
            }
        };

        if name == well_known::SYSTEM_BASE || name == to {
            return true;
        }
        for interface in &interface_names {
            if self.class_name_or(interface) == to {
                return true;
            }
        }

        match from {
            ClassTarget::Program(id) => {
                let children = self.program.class(id).children.clone();
                children
                    .into_iter()
                    .any(|child| self.valid_upcast(to, ClassTarget::Program(child)))
            }
            ClassTarget::Library(id) => {
                let class = self.library.class(id);
                let lib_children = class.library_children.clone();
                let program_children = class.program_children.clone();
                lib_children
                    .into_iter()
                    .any(|child| self.valid_upcast(to, ClassTarget::Library(child)))
                    || program_children
                        .into_iter()
                        .any(|child| self.valid_upcast(to, ClassTarget::Program(child)))
            }
        }
    }

    // =========================================================================
    // Expression type access
    // =========================================================================

    /// Follow the call chain to the expression whose value a use site sees.
    pub(crate) fn chain_tail<'e>(&self, expr: &'e Expression) -> &'e Expression {
        let mut cursor = expr;
        while let Some(next) = cursor.chain.as_deref() {
            cursor = next;
        }
        cursor
    }

    /// The type a use site observes: the chain tail's cast when present,
    /// else its evaluation type.
    pub(crate) fn expression_type(&self, expr: &Expression) -> Option<Type> {
        let tail = self.chain_tail(expr);
        if let Some(cast) = tail
            .cast_type
            .clone()
            .or_else(|| self.data.cast_type(tail.node_id).cloned())
        {
            return Some(cast);
        }
        self.data.eval_type(tail.node_id).cloned()
    }

    /// An expression is scalar unless it evaluates to an array that is not
    /// fully indexed.
    pub(crate) fn is_scalar(&self, expr: &Expression) -> bool {
        self.is_scalar_at(expr, true)
    }

    pub(crate) fn is_scalar_at(&self, expr: &Expression, follow_chain: bool) -> bool {
        let target = if follow_chain { self.chain_tail(expr) } else { expr };

        let eval = self.data.eval_type(target.node_id);
        let cast = target
            .cast_type
            .as_ref()
            .or_else(|| self.data.cast_type(target.node_id));
        let ty = match cast {
            Some(cast) if !matches!(eval, Some(e) if e.dim > 0) => Some(cast),
            _ => eval,
        };

        match ty {
            Some(ty) if ty.dim > 0 => match &target.kind {
                ExprKind::Variable(var) => var.indices.is_some(),
                _ => false,
            },
            Some(_) => true,
            None => true,
        }
    }

    // =========================================================================
    // Symbol lookup
    // =========================================================================

    /// Resolve a short name against the method scope, then the class scope,
    /// then ancestor class scopes.
    pub(crate) fn get_entry(&self, name: &str) -> Option<EntryId> {
        if let Some((class_id, method_idx)) = self.current_method {
            // tables are keyed by the parsed name (unique per overload);
            // entry names are qualified by the method name
            let (scope, method_name) = {
                let method = &self.program.class(class_id).methods[method_idx];
                (method.parsed_name.clone(), method.name.clone())
            };
            let qualified = format!("{method_name}:{name}");
            if let Some(entry) = self.program.symbols.lookup(&scope, &qualified) {
                return Some(entry);
            }
        }

        if let Some(class_id) = self.current_class {
            let class_name = self.program.class(class_id).name.clone();
            let qualified = format!("{class_name}:{name}");
            if let Some(entry) = self.program.symbols.lookup(&class_name, &qualified) {
                return Some(entry);
            }

            // ancestor scopes
            let mut parent = self.program.class(class_id).parent;
            while let Some(parent_id) = parent {
                let parent_name = self.program.class(parent_id).name.clone();
                let qualified = format!("{parent_name}:{name}");
                if let Some(entry) = self.program.symbols.lookup(&parent_name, &qualified) {
                    return Some(entry);
                }
                parent = self.program.class(parent_id).parent;
            }
        }

        None
    }

    pub(crate) fn entry_type(&self, id: EntryId) -> Type {
        self.program.symbols.entry(id).ty.clone()
    }

    /// Instance state referenced from a static method, outside any local or
    /// static binding.
    pub(crate) fn invalid_static_entry(&self, entry: EntryId) -> bool {
        let in_static = self
            .current_method
            .map(|(c, m)| self.program.class(c).methods[m].is_static)
            .unwrap_or(false);
        if !in_static {
            return false;
        }
        let entry = self.program.symbols.entry(entry);
        !entry.is_local && !entry.is_static
    }
}
