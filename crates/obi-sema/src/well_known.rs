//! Well-known library names the analyzer is contractually tied to.

use obi_frontend::types::{Type, TypeKind};

/// Universal super-type; every class without an explicit parent gets it.
pub const SYSTEM_BASE: &str = "System.Base";
pub const STRING_CLASS: &str = "System.String";

/// Receiver classes for method calls on primitive values.
pub const BOOL_CLASS: &str = "System.Bool";
pub const BYTE_CLASS: &str = "System.Byte";
pub const CHAR_CLASS: &str = "System.Char";
pub const INT_CLASS: &str = "System.Int";
pub const FLOAT_CLASS: &str = "System.Float";

/// Boxed-primitive holder classes with `New(v)` / `Get()`.
pub const BOOL_HOLDER: &str = "System.BoolHolder";
pub const BYTE_HOLDER: &str = "System.ByteHolder";
pub const CHAR_HOLDER: &str = "System.CharHolder";
pub const INT_HOLDER: &str = "System.IntHolder";
pub const FLOAT_HOLDER: &str = "System.FloatHolder";

pub fn is_holder_type(name: &str) -> bool {
    matches!(
        name,
        BOOL_HOLDER | BYTE_HOLDER | CHAR_HOLDER | INT_HOLDER | FLOAT_HOLDER
    )
}

/// Holder class for a primitive kind.
pub fn holder_for(kind: TypeKind) -> Option<&'static str> {
    match kind {
        TypeKind::Bool => Some(BOOL_HOLDER),
        TypeKind::Byte => Some(BYTE_HOLDER),
        TypeKind::Char => Some(CHAR_HOLDER),
        TypeKind::Int => Some(INT_HOLDER),
        TypeKind::Float => Some(FLOAT_HOLDER),
        _ => None,
    }
}

/// Primitive type named in a function-reference parameter list
/// (`Klass->Method(Int, Float)`).
pub fn reference_primitive(name: &str) -> Option<Type> {
    match name {
        "Bool" => Some(Type::bool_type()),
        "Byte" => Some(Type::byte()),
        "Char" => Some(Type::char_type()),
        "Int" => Some(Type::int()),
        "Float" => Some(Type::float()),
        "Nil" => Some(Type::nil()),
        "Var" => Some(Type::var()),
        _ => None,
    }
}

/// Encoded name of the program entry point for a given class.
pub fn main_encoded_name(class_name: &str) -> String {
    format!("{class_name}:Main:o.System.String*,")
}

/// Encoded name of the web entry point for a given class.
pub fn action_encoded_name(class_name: &str) -> String {
    format!("{class_name}:Action:o.Web.FastCgi.Request,o.Web.FastCgi.Response,")
}
