//! Generic validation and substitution.
//!
//! Substitution is environment-based: a [`GenericEnv`] pairs a receiver
//! class's formal parameters with the concrete types in force at a call
//! site, and resolution produces fresh `Type` values on demand. Stored types
//! are never rewritten.

use super::{Analyzer, ClassTarget};
use crate::errors::SemanticError;
use obi_frontend::ast::{ClassId, EntryId, Loc, MethodCall};
use obi_frontend::types::{GenericParam, Type, TypeKind};

/// Substitution environment for one call site.
#[derive(Debug, Clone, Default)]
pub(crate) struct GenericEnv {
    pub formals: Vec<GenericParam>,
    pub concretes: Vec<Type>,
}

impl GenericEnv {
    pub fn is_empty(&self) -> bool {
        self.formals.is_empty() || self.concretes.is_empty()
    }
}

impl Analyzer {
    /// Environment for a call: the receiver class's formal parameters paired
    /// with concrete types taken from, in order, the receiver entry's
    /// declared generics, then the previous call's generics, then the
    /// call's own concrete-type list (new instances and explicitly
    /// qualified calls).
    pub(crate) fn generic_env(
        &self,
        receiver: ClassTarget,
        call: &MethodCall,
        receiver_entry: Option<EntryId>,
        receiver_generics: &[Type],
    ) -> GenericEnv {
        let formals = match receiver {
            ClassTarget::Program(id) => self.program.class(id).generics.clone(),
            ClassTarget::Library(id) => self.library.class(id).generics.clone(),
        };
        if formals.is_empty() {
            return GenericEnv::default();
        }

        let mut concretes: Vec<Type> = Vec::new();
        if let Some(entry) = receiver_entry {
            let entry_ty = self.entry_type(entry);
            if entry_ty.has_generics() {
                concretes = entry_ty.generics.to_vec();
            }
        }
        if concretes.is_empty() && !receiver_generics.is_empty() {
            concretes = receiver_generics.to_vec();
        }
        if concretes.is_empty() && !call.concrete_types.is_empty() {
            concretes = call.concrete_types.clone();
        }

        GenericEnv { formals, concretes }
    }

    /// Substitute the receiver's formal generics out of a candidate type,
    /// returning a fresh value. Function types substitute componentwise.
    pub(crate) fn resolve_generic_type(&mut self, candidate: &Type, env: &GenericEnv) -> Type {
        if env.is_empty() {
            return candidate.clone();
        }

        if candidate.kind == TypeKind::Func {
            if let Some(sig) = candidate.func.as_deref() {
                let params = sig
                    .params
                    .iter()
                    .map(|p| self.resolve_generic_type(p, env))
                    .collect();
                let ret = self.resolve_generic_type(&sig.ret, env);
                let mut fun = Type::func(params, ret);
                fun.dim = candidate.dim;
                return fun;
            }
            return candidate.clone();
        }

        if candidate.kind == TypeKind::Class {
            if let Some(index) = env.formals.iter().position(|g| g.name == candidate.name) {
                if let Some(concrete) = env.concretes.get(index) {
                    let mut resolved = concrete.clone();
                    resolved.dim = candidate.dim;
                    self.resolve_class_enum_type(&mut resolved);
                    return resolved;
                }
            }
        }

        candidate.clone()
    }

    /// Two generic argument lists describe the same instantiation.
    pub(crate) fn generic_arguments_equal(&self, left: &Type, right: &Type) -> bool {
        if left.generics.len() != right.generics.len() {
            return false;
        }
        left.generics
            .iter()
            .zip(right.generics.iter())
            .all(|(l, r)| {
                if l.kind != r.kind {
                    return false;
                }
                if l.kind == TypeKind::Class {
                    let l_name = self.class_name_or(&l.name);
                    let r_name = self.class_name_or(&r.name);
                    if l_name != r_name {
                        return false;
                    }
                }
                self.generic_arguments_equal(l, r)
            })
    }

    /// A concrete type satisfies a backing interface when it down-casts to
    /// it (or names it directly).
    pub(crate) fn validate_generic_backing(
        &mut self,
        concrete: &Type,
        backing_name: &str,
        loc: Loc,
    ) {
        let concrete_name = concrete.name.clone();

        let target = self.find_class(&concrete_name).or_else(|| {
            // a formal generic of the enclosing class stands for its backing
            let current = self.current_class?;
            let generic = self.program.class(current).generic(&concrete_name)?;
            let backing = generic.backing.as_ref()?;
            self.find_class(&backing.name)
        });

        match target {
            Some(target) => {
                let matches_directly = self.target_name(target) == backing_name;
                if !matches_directly && !self.valid_downcast(backing_name, Some(target)) {
                    self.report(
                        loc,
                        SemanticError::IncompatibleBacking {
                            concrete: concrete_name,
                            backing: backing_name.to_string(),
                        },
                    );
                }
            }
            None => {
                self.report(
                    loc,
                    SemanticError::UndefinedClassOrInterface {
                        name: concrete_name,
                    },
                );
            }
        }
    }

    /// A construction or qualified use must supply one concrete type per
    /// formal, each compatible with its backing interface.
    pub(crate) fn validate_generic_concrete_mapping(
        &mut self,
        concrete_types: &[Type],
        receiver: ClassTarget,
        loc: Loc,
    ) {
        let (formals, class_name) = match receiver {
            ClassTarget::Program(id) => {
                let class = self.program.class(id);
                (class.generics.clone(), class.name.clone())
            }
            ClassTarget::Library(id) => {
                let class = self.library.class(id);
                (class.generics.clone(), class.name.clone())
            }
        };

        if formals.len() != concrete_types.len() {
            let error = match receiver {
                ClassTarget::Program(_) => {
                    SemanticError::UnqualifiedGenericInstance { name: class_name }
                }
                ClassTarget::Library(_) => SemanticError::UnqualifiedGenericUse { name: class_name },
            };
            self.report(loc, error);
            return;
        }

        for (concrete, formal) in concrete_types.iter().zip(formals.iter()) {
            let mut concrete = concrete.clone();
            self.resolve_class_enum_type(&mut concrete);
            if let Some(backing) = &formal.backing {
                let backing_name = self.class_name_or(&backing.name);
                self.validate_generic_backing(&concrete, &backing_name, loc);
            }
        }
    }

    /// Validation for a declared type such as `v : Box<String>`.
    pub(crate) fn validate_declared_generics(&mut self, ty: &Type, loc: Loc, _class_id: ClassId) {
        let Some(target) = self.find_class(&ty.name) else {
            return;
        };
        let concrete_types: Vec<Type> = ty.generics.to_vec();
        self.validate_generic_concrete_mapping(&concrete_types, target, loc);
    }
}
