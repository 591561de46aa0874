//! Signature encoding: the compact strings keyed into class method maps.
//!
//! Grammar (also consumed by the linker and code generator):
//!
//! ```text
//! method   := className ":" shortName ":" (param ",")*
//! param    := paramKind dim*
//! paramKind:= "l" | "b" | "c" | "i" | "f" | "n" | "v"
//!           | "o." className | "m." funcSig
//! funcSig  := "(" (param ",")* ")~" param
//! dim      := "*"
//! ```
//!
//! Class names are encoded fully qualified; the `resolve` callback maps a
//! source-level name to its canonical spelling (program classes first, then
//! libraries). The encoding is a pure function of the inputs, so two runs
//! over the same program produce byte-identical keys.

use obi_frontend::types::{Type, TypeKind};

/// Encode a single type without its array dimensions.
pub fn encode_type(ty: &Type, resolve: impl Fn(&str) -> Option<String> + Copy) -> String {
    match ty.kind {
        TypeKind::Bool => "l".to_string(),
        TypeKind::Byte => "b".to_string(),
        TypeKind::Char => "c".to_string(),
        TypeKind::Int => "i".to_string(),
        TypeKind::Float => "f".to_string(),
        TypeKind::Nil => "n".to_string(),
        TypeKind::Var => "v".to_string(),
        // Aliases must be resolved away before encoding runs.
        TypeKind::Alias => String::new(),
        TypeKind::Class => {
            let name = resolve(&ty.name).unwrap_or_else(|| ty.name.clone());
            format!("o.{name}")
        }
        TypeKind::Func => match &ty.func {
            Some(sig) => format!("m.{}", encode_function_type(&sig.params, &sig.ret, resolve)),
            // Pre-encoded function name cached on the type.
            None => ty.name.clone(),
        },
    }
}

/// Encode a parameter: type, `*` per array rank, trailing comma.
pub fn encode_param(ty: &Type, resolve: impl Fn(&str) -> Option<String> + Copy) -> String {
    let mut encoded = encode_type(ty, resolve);
    for _ in 0..ty.dim {
        encoded.push('*');
    }
    encoded.push(',');
    encoded
}

/// Encode a function signature, `(p1,p2,)~R`.
pub fn encode_function_type(
    params: &[Type],
    ret: &Type,
    resolve: impl Fn(&str) -> Option<String> + Copy,
) -> String {
    let mut encoded = String::from("(");
    for param in params {
        encoded.push_str(&encode_param(param, resolve));
    }
    encoded.push_str(")~");
    encoded.push_str(&encode_type(ret, resolve));
    for _ in 0..ret.dim {
        encoded.push('*');
    }
    encoded
}

/// Canonical method key: `Class:Short:P1,P2,`.
pub fn encode_method_name(
    class_name: &str,
    short_name: &str,
    param_types: &[Type],
    resolve: impl Fn(&str) -> Option<String> + Copy,
) -> String {
    let mut encoded = format!("{class_name}:{short_name}:");
    for param in param_types {
        encoded.push_str(&encode_param(param, resolve));
    }
    encoded
}

// =============================================================================
// Decoding
// =============================================================================

/// Parse one encoded parameter back into a [`Type`]. Used for generic
/// substitution over library signatures. Returns `None` on malformed input.
pub fn parse_type(encoded: &str) -> Option<Type> {
    let mut cursor = Cursor::new(encoded);
    let ty = cursor.parse_param()?;
    if cursor.at_end() {
        Some(ty)
    } else {
        None
    }
}

struct Cursor<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(text: &'a str) -> Self {
        Cursor {
            bytes: text.as_bytes(),
            pos: 0,
        }
    }

    fn at_end(&self) -> bool {
        self.pos >= self.bytes.len()
    }

    fn peek(&self) -> Option<u8> {
        self.bytes.get(self.pos).copied()
    }

    fn bump(&mut self) -> Option<u8> {
        let b = self.peek()?;
        self.pos += 1;
        Some(b)
    }

    fn eat(&mut self, expected: u8) -> bool {
        if self.peek() == Some(expected) {
            self.pos += 1;
            return true;
        }
        false
    }

    fn parse_param(&mut self) -> Option<Type> {
        let mut ty = match self.bump()? {
            b'l' => Type::bool_type(),
            b'b' => Type::byte(),
            b'c' => Type::char_type(),
            b'i' => Type::int(),
            b'f' => Type::float(),
            b'n' => Type::nil(),
            b'v' => Type::var(),
            b'o' => {
                if !self.eat(b'.') {
                    return None;
                }
                Type::class(self.parse_class_name())
            }
            b'm' => {
                if !self.eat(b'.') {
                    return None;
                }
                self.parse_func_sig()?
            }
            _ => return None,
        };
        while self.eat(b'*') {
            ty.dim += 1;
        }
        Some(ty)
    }

    fn parse_class_name(&mut self) -> String {
        let start = self.pos;
        while let Some(b) = self.peek() {
            if matches!(b, b',' | b'*' | b')' | b'~') {
                break;
            }
            self.pos += 1;
        }
        String::from_utf8_lossy(&self.bytes[start..self.pos]).into_owned()
    }

    fn parse_func_sig(&mut self) -> Option<Type> {
        if !self.eat(b'(') {
            return None;
        }
        let mut params = Vec::new();
        while self.peek() != Some(b')') {
            params.push(self.parse_param()?);
            if !self.eat(b',') {
                return None;
            }
        }
        self.eat(b')');
        if !self.eat(b'~') {
            return None;
        }
        let ret = self.parse_param()?;
        Some(Type::func(params, ret))
    }
}
