//! Obi frontend contract: the parsed AST handed to contextual analysis.
//!
//! The lexer and parser live outside this repository; they produce the
//! [`Program`] tree defined here. The [`TreeBuilder`] factory is the only way
//! nodes are created, which keeps node ids dense and per-program.

pub mod ast;
pub mod symbols;
pub mod types;

pub use ast::*;
pub use symbols::{SymbolEntry, SymbolTable, SymbolTableManager};
pub use types::{ClassRef, FuncSig, GenericParam, Type, TypeKind};
