//! Analysis side tables: the annotations that turn the parsed AST into the
//! validated AST handed to code generation.
//!
//! Nodes are never mutated; every inferred fact is keyed by [`NodeId`]. The
//! code generator reads the AST and these tables together.

use crate::library::LibMethodRef;
use obi_frontend::ast::{ClassId, EntryId, EnumId, LibEnumId, MethodIdx, NodeId};
use obi_frontend::types::Type;
use rustc_hash::FxHashMap;

/// The single resolved target of a method-call node. Exactly one of these is
/// recorded for every call in a program that type-checks.
#[derive(Debug, Clone, PartialEq)]
pub enum ResolvedCall {
    Method {
        class: ClassId,
        method: MethodIdx,
    },
    LibraryMethod(LibMethodRef),
    EnumItem {
        enum_id: EnumId,
        value: i64,
    },
    LibraryEnumItem {
        enum_id: LibEnumId,
        value: i64,
    },
    /// Call through a variable holding a function reference.
    Functional {
        entry: EntryId,
    },
    /// `Klass->New[..]` array construction.
    NewArray,
}

/// Implicit conversion installed on a call argument by the overload
/// selector. The code generator materializes the rewrite.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BoxingRewrite {
    /// Wrap a primitive in `new <holder>(value)`.
    Construct { holder: String },
    /// Append a `Get()` call to read the primitive out of a holder.
    Unwrap,
}

/// Per-expression type annotations.
#[derive(Debug, Default)]
pub struct ExpressionData {
    eval: FxHashMap<NodeId, Type>,
    cast: FxHashMap<NodeId, Type>,
}

impl ExpressionData {
    pub fn eval_type(&self, node: NodeId) -> Option<&Type> {
        self.eval.get(&node)
    }

    pub fn cast_type(&self, node: NodeId) -> Option<&Type> {
        self.cast.get(&node)
    }

    pub fn set_eval(&mut self, node: NodeId, ty: Type) {
        self.eval.insert(node, ty);
    }

    /// Set the evaluation type only if the node does not have one yet.
    pub fn set_eval_soft(&mut self, node: NodeId, ty: Type) {
        self.eval.entry(node).or_insert(ty);
    }

    pub fn set_cast(&mut self, node: NodeId, ty: Type) {
        self.cast.insert(node, ty);
    }

    /// The effective type at a use site: the cast target when present,
    /// otherwise the evaluation type.
    pub fn effective_type(&self, node: NodeId) -> Option<&Type> {
        self.cast.get(&node).or_else(|| self.eval.get(&node))
    }
}

/// Output of a successful analysis: the program, untouched structurally,
/// plus every annotation code generation needs.
#[derive(Debug)]
pub struct AnalyzedProgram {
    pub program: obi_frontend::ast::Program,
    pub expression_data: ExpressionData,
    pub resolutions: FxHashMap<NodeId, ResolvedCall>,
    pub variable_entries: FxHashMap<NodeId, EntryId>,
    pub boxing: FxHashMap<NodeId, BoxingRewrite>,
    /// `(class, method)` of `Main(args)` or `Action(req, resp)`.
    pub entry_point: Option<(ClassId, MethodIdx)>,
}
