//! Index over classes, enums and aliases loaded from linked libraries.
//!
//! The linker (outside this repository) decodes the on-disk library format
//! and populates this index before analysis starts. Lookups mirror source
//! resolution: a name is tried verbatim first, then under every `use`
//! prefix. Parent chains are walked by name at each step, which keeps very
//! deep hierarchies at O(depth * log n) like the original linker index.

use crate::encode;
use obi_frontend::ast::{ClassId, LibClassId, LibEnumId, MethodKind};
use obi_frontend::types::{GenericParam, Type};
use rustc_hash::FxHashMap;
use std::collections::BTreeMap;

/// A method decoded from a library class. `name` is the canonical encoded
/// signature and the key in the owning class's method map.
#[derive(Debug, Clone)]
pub struct LibraryMethod {
    pub name: String,
    pub short_name: String,
    pub kind: MethodKind,
    pub is_static: bool,
    pub is_virtual: bool,
    pub is_native: bool,
    pub return_type: Type,
    pub param_types: Vec<Type>,
}

/// Stable reference to a library method.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LibMethodRef {
    pub class: LibClassId,
    pub encoded: String,
}

#[derive(Debug)]
pub struct LibraryClass {
    pub id: LibClassId,
    pub name: String,
    pub bundle_name: String,
    pub parent_name: String,
    pub interface_names: Vec<String>,
    pub generics: Vec<GenericParam>,
    /// Encoded name -> method; ordered so alternative-signature diagnostics
    /// are deterministic.
    pub methods: BTreeMap<String, LibraryMethod>,
    pub is_interface: bool,
    pub is_virtual: bool,
    pub is_public: bool,
    /// Program classes bound under this class by the binder.
    pub program_children: Vec<ClassId>,
    pub library_children: Vec<LibClassId>,
}

impl LibraryClass {
    pub fn method(&self, encoded: &str) -> Option<&LibraryMethod> {
        self.methods.get(encoded)
    }

    pub fn methods_by_short_name(&self, short: &str) -> Vec<&LibraryMethod> {
        self.methods
            .values()
            .filter(|m| m.short_name == short)
            .collect()
    }

    pub fn generic_index(&self, name: &str) -> Option<usize> {
        self.generics.iter().position(|g| g.name == name)
    }

    pub fn has_generics(&self) -> bool {
        !self.generics.is_empty()
    }
}

#[derive(Debug)]
pub struct LibraryEnum {
    pub id: LibEnumId,
    pub name: String,
    pub items: Vec<(String, i64)>,
}

impl LibraryEnum {
    pub fn item(&self, name: &str) -> Option<i64> {
        self.items.iter().find(|(n, _)| n == name).map(|&(_, v)| v)
    }
}

#[derive(Debug)]
pub struct LibraryAlias {
    pub name: String,
    pub types: FxHashMap<String, Type>,
}

impl LibraryAlias {
    pub fn type_for(&self, name: &str) -> Option<&Type> {
        self.types.get(name)
    }
}

#[derive(Debug, Default)]
pub struct LibraryIndex {
    classes: Vec<LibraryClass>,
    classes_by_name: FxHashMap<String, LibClassId>,
    enums: Vec<LibraryEnum>,
    enums_by_name: FxHashMap<String, LibEnumId>,
    aliases: FxHashMap<String, LibraryAlias>,
    bundles: Vec<String>,
}

impl LibraryIndex {
    pub fn new() -> Self {
        LibraryIndex::default()
    }

    pub fn has_bundle(&self, name: &str) -> bool {
        self.bundles.iter().any(|b| b == name)
    }

    pub fn add_bundle(&mut self, name: impl Into<String>) {
        self.bundles.push(name.into());
    }

    pub fn class(&self, id: LibClassId) -> &LibraryClass {
        &self.classes[id.index()]
    }

    pub fn class_mut(&mut self, id: LibClassId) -> &mut LibraryClass {
        &mut self.classes[id.index()]
    }

    pub fn enum_def(&self, id: LibEnumId) -> &LibraryEnum {
        &self.enums[id.index()]
    }

    /// Register a class under its fully qualified name.
    #[allow(clippy::too_many_arguments)]
    pub fn add_class(
        &mut self,
        name: impl Into<String>,
        bundle_name: impl Into<String>,
        parent_name: impl Into<String>,
        interface_names: Vec<String>,
        generics: Vec<GenericParam>,
        is_interface: bool,
        is_virtual: bool,
        is_public: bool,
    ) -> LibClassId {
        let id = LibClassId::new(self.classes.len() as u32);
        let name = name.into();
        self.classes_by_name.insert(name.clone(), id);
        self.classes.push(LibraryClass {
            id,
            name,
            bundle_name: bundle_name.into(),
            parent_name: parent_name.into(),
            interface_names,
            generics,
            methods: BTreeMap::new(),
            is_interface,
            is_virtual,
            is_public,
            program_children: Vec::new(),
            library_children: Vec::new(),
        });
        id
    }

    /// Register a method on a library class. The encoded name is derived
    /// from the class name, short name and parameter types.
    pub fn add_method(
        &mut self,
        class: LibClassId,
        short_name: impl Into<String>,
        kind: MethodKind,
        is_static: bool,
        is_virtual: bool,
        param_types: Vec<Type>,
        return_type: Type,
    ) -> LibMethodRef {
        let short_name = short_name.into();
        let class_name = self.classes[class.index()].name.clone();
        let encoded = encode::encode_method_name(&class_name, &short_name, &param_types, |n| {
            self.canonical_class_name(n)
        });
        let method = LibraryMethod {
            name: encoded.clone(),
            short_name,
            kind,
            is_static,
            is_virtual,
            is_native: false,
            return_type,
            param_types,
        };
        self.classes[class.index()]
            .methods
            .insert(encoded.clone(), method);
        LibMethodRef { class, encoded }
    }

    pub fn add_enum(&mut self, name: impl Into<String>, items: Vec<(String, i64)>) -> LibEnumId {
        let id = LibEnumId::new(self.enums.len() as u32);
        let name = name.into();
        self.enums_by_name.insert(name.clone(), id);
        self.enums.push(LibraryEnum { id, name, items });
        id
    }

    pub fn add_alias(&mut self, name: impl Into<String>, types: FxHashMap<String, Type>) {
        let name = name.into();
        self.aliases.insert(name.clone(), LibraryAlias { name, types });
    }

    /// Qualified-first class search: the name verbatim, then under each
    /// `use` prefix.
    pub fn search_classes(&self, name: &str, uses: &[String]) -> Option<LibClassId> {
        if let Some(&id) = self.classes_by_name.get(name) {
            return Some(id);
        }
        for prefix in uses {
            if let Some(&id) = self.classes_by_name.get(&format!("{prefix}.{name}")) {
                return Some(id);
            }
        }
        None
    }

    pub fn search_enums(&self, name: &str, uses: &[String]) -> Option<LibEnumId> {
        if let Some(&id) = self.enums_by_name.get(name) {
            return Some(id);
        }
        for prefix in uses {
            if let Some(&id) = self.enums_by_name.get(&format!("{prefix}.{name}")) {
                return Some(id);
            }
        }
        None
    }

    pub fn search_aliases(&self, name: &str, uses: &[String]) -> Option<&LibraryAlias> {
        if let Some(alias) = self.aliases.get(name) {
            return Some(alias);
        }
        for prefix in uses {
            if let Some(alias) = self.aliases.get(&format!("{prefix}.{name}")) {
                return Some(alias);
            }
        }
        None
    }

    /// Canonical (fully qualified) spelling of a class name, if loaded.
    /// Used by the signature encoder; no `use` expansion here, callers
    /// resolve short names first.
    pub fn canonical_class_name(&self, name: &str) -> Option<String> {
        self.classes_by_name
            .get(name)
            .map(|&id| self.classes[id.index()].name.clone())
    }

    pub fn method_ref(&self, reference: &LibMethodRef) -> &LibraryMethod {
        self.classes[reference.class.index()]
            .methods
            .get(&reference.encoded)
            .expect("library method reference must stay valid")
    }
}
