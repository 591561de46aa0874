//! The type model shared by the parser contract and the analyzer.
//!
//! A [`Type`] is a plain value: substitution and resolution produce fresh
//! values instead of rewriting shared instances, so a type literal reused
//! across call sites can never be corrupted by one of them.

use crate::ast::{ClassId, LibClassId};

/// Discriminant of a [`Type`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TypeKind {
    Nil,
    Bool,
    Byte,
    Char,
    Int,
    Float,
    /// Declared `:=`-inferred; replaced during analysis.
    Var,
    /// Alias placeholder; must be rewritten before analysis completes.
    Alias,
    Class,
    Func,
}

/// Resolved registry target for a class-kind type, short-circuiting repeated
/// name lookups.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClassRef {
    Program(ClassId),
    Library(LibClassId),
}

/// Parameter and return signature of a function-kind type.
#[derive(Debug, Clone, PartialEq)]
pub struct FuncSig {
    pub params: Vec<Type>,
    pub ret: Type,
}

/// A formal generic parameter of a class, optionally constrained by a backing
/// interface name.
#[derive(Debug, Clone, PartialEq)]
pub struct GenericParam {
    pub name: String,
    pub backing: Option<Type>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Type {
    pub kind: TypeKind,
    /// Class, enum, alias or generic-parameter name; for function kinds the
    /// cached `m.(..)~..` encoding once computed.
    pub name: String,
    /// Array rank.
    pub dim: u32,
    /// Name has been canonicalized against the program or library registry.
    pub resolved: bool,
    pub class_ref: Option<ClassRef>,
    /// Concrete generic arguments attached to a class-kind type.
    pub generics: Vec<Type>,
    pub func: Option<Box<FuncSig>>,
}

impl Type {
    fn new(kind: TypeKind) -> Self {
        Type {
            kind,
            name: String::new(),
            dim: 0,
            resolved: false,
            class_ref: None,
            generics: Vec::new(),
            func: None,
        }
    }

    pub fn nil() -> Self {
        Type::new(TypeKind::Nil)
    }

    pub fn bool_type() -> Self {
        Type::new(TypeKind::Bool)
    }

    pub fn byte() -> Self {
        Type::new(TypeKind::Byte)
    }

    pub fn char_type() -> Self {
        Type::new(TypeKind::Char)
    }

    pub fn int() -> Self {
        Type::new(TypeKind::Int)
    }

    pub fn float() -> Self {
        Type::new(TypeKind::Float)
    }

    pub fn var() -> Self {
        Type::new(TypeKind::Var)
    }

    pub fn class(name: impl Into<String>) -> Self {
        let mut ty = Type::new(TypeKind::Class);
        ty.name = name.into();
        ty
    }

    pub fn alias(name: impl Into<String>) -> Self {
        let mut ty = Type::new(TypeKind::Alias);
        ty.name = name.into();
        ty
    }

    pub fn func(params: Vec<Type>, ret: Type) -> Self {
        let mut ty = Type::new(TypeKind::Func);
        ty.func = Some(Box::new(FuncSig { params, ret }));
        ty
    }

    pub fn with_dim(mut self, dim: u32) -> Self {
        self.dim = dim;
        self
    }

    pub fn with_generics(mut self, generics: Vec<Type>) -> Self {
        self.generics = generics.into();
        self
    }

    pub fn is_class(&self) -> bool {
        self.kind == TypeKind::Class
    }

    pub fn has_generics(&self) -> bool {
        !self.generics.is_empty()
    }

    /// Function parameter count, `0` for non-function kinds.
    pub fn func_param_count(&self) -> usize {
        self.func.as_ref().map_or(0, |f| f.params.len())
    }

    /// Integer-valued primitive (array index, select label operand).
    pub fn is_integer_kind(&self) -> bool {
        matches!(self.kind, TypeKind::Int | TypeKind::Char | TypeKind::Byte)
    }

    /// Overwrite this placeholder with the expansion of an alias. The only
    /// sanctioned in-place rewrite: it runs once, before any analysis reads
    /// the type.
    pub fn replace_with(&mut self, other: &Type) {
        let dim = self.dim.max(other.dim);
        *self = other.clone();
        self.dim = dim;
    }
}

/// Human-readable rendering used in diagnostics: primitive names match the
/// library spelling (`System.Byte`), nested enums print `->`.
impl std::fmt::Display for Type {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.kind {
            TypeKind::Nil => write!(f, "Nil")?,
            TypeKind::Bool => write!(f, "System.Bool")?,
            TypeKind::Byte => write!(f, "System.Byte")?,
            TypeKind::Char => write!(f, "System.Char")?,
            TypeKind::Int => write!(f, "Int")?,
            TypeKind::Float => write!(f, "System.Float")?,
            TypeKind::Var => write!(f, "Var")?,
            TypeKind::Alias => write!(f, "{}", self.name.replace('#', "->"))?,
            TypeKind::Class => write!(f, "{}", self.name.replace('#', "->"))?,
            TypeKind::Func => match &self.func {
                Some(sig) => {
                    write!(f, "(")?;
                    for (i, p) in sig.params.iter().enumerate() {
                        if i > 0 {
                            write!(f, ", ")?;
                        }
                        write!(f, "{p}")?;
                    }
                    write!(f, ") ~ {}", sig.ret)?;
                }
                None => write!(f, "function reference")?,
            },
        }
        for _ in 0..self.dim {
            write!(f, "[]")?;
        }
        Ok(())
    }
}
