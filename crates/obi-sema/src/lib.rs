//! Contextual analysis for the Obi compiler: name binding, overload
//! selection, type inference and validation, cast checking, generics, and
//! return-path analysis over a parsed AST plus a loaded-library index.

pub mod analyzer;
pub mod encode;
pub mod errors;
pub mod library;
pub mod overload;
pub mod resolution;
pub mod well_known;

pub use analyzer::Analyzer;
pub use errors::{Diagnostic, ErrorMap, SemanticError};
pub use library::{LibMethodRef, LibraryClass, LibraryEnum, LibraryIndex, LibraryMethod};
pub use resolution::{AnalyzedProgram, BoxingRewrite, ExpressionData, ResolvedCall};
