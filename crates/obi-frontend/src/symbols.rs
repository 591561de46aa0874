//! Scoped symbol tables.
//!
//! Entries are owned by a single arena on the manager and referenced by
//! [`EntryId`]; each table maps fully qualified names of the form
//! `EnclosingScope:shortName` to entries. Class- and method-level tables are
//! registered under their scope names and survive the whole analysis; the
//! parse-scope stack exists for construction (the parser and the
//! default-parameter expander both build method scopes through it).

use crate::ast::EntryId;
use crate::types::Type;
use rustc_hash::FxHashMap;

#[derive(Debug, Clone)]
pub struct SymbolEntry {
    /// Fully qualified `Scope:short` name.
    pub name: String,
    pub ty: Type,
    pub is_local: bool,
    pub is_static: bool,
}

impl SymbolEntry {
    /// Portion after the scope qualifier.
    pub fn short_name(&self) -> &str {
        match self.name.rfind(':') {
            Some(pos) => &self.name[pos + 1..],
            None => &self.name,
        }
    }
}

#[derive(Debug, Default)]
pub struct SymbolTable {
    entries: FxHashMap<String, EntryId>,
    /// Declaration order, for deterministic iteration.
    order: Vec<EntryId>,
}

impl SymbolTable {
    pub fn entry(&self, qualified: &str) -> Option<EntryId> {
        self.entries.get(qualified).copied()
    }

    pub fn add(&mut self, qualified: String, id: EntryId) -> bool {
        if self.entries.contains_key(&qualified) {
            return false;
        }
        self.entries.insert(qualified, id);
        self.order.push(id);
        true
    }

    pub fn ids(&self) -> impl Iterator<Item = EntryId> + '_ {
        self.order.iter().copied()
    }
}

#[derive(Debug, Default)]
pub struct SymbolTableManager {
    tables: FxHashMap<String, SymbolTable>,
    entries: Vec<SymbolEntry>,
    /// Scopes opened during construction, closed by `previous_parse_scope`.
    parse_stack: Vec<SymbolTable>,
}

impl SymbolTableManager {
    pub fn new() -> Self {
        SymbolTableManager::default()
    }

    pub fn entry(&self, id: EntryId) -> &SymbolEntry {
        &self.entries[id.index()]
    }

    pub fn entry_mut(&mut self, id: EntryId) -> &mut SymbolEntry {
        &mut self.entries[id.index()]
    }

    pub fn entry_count(&self) -> usize {
        self.entries.len()
    }

    /// Allocate an entry in the arena without binding it to a table.
    pub fn make_entry(&mut self, name: String, ty: Type, is_local: bool, is_static: bool) -> EntryId {
        let id = EntryId::new(self.entries.len() as u32);
        self.entries.push(SymbolEntry {
            name,
            ty,
            is_local,
            is_static,
        });
        id
    }

    pub fn table(&self, scope: &str) -> Option<&SymbolTable> {
        self.tables.get(scope)
    }

    pub fn table_mut(&mut self, scope: &str) -> &mut SymbolTable {
        self.tables.entry(scope.to_string()).or_default()
    }

    /// Look up `Scope:short` in the table registered for `scope`.
    pub fn lookup(&self, scope: &str, qualified: &str) -> Option<EntryId> {
        self.tables.get(scope).and_then(|t| t.entry(qualified))
    }

    /// Create and bind an entry in the table registered for `scope`.
    /// Returns `None` when the name is already bound there.
    pub fn bind(
        &mut self,
        scope: &str,
        name: String,
        ty: Type,
        is_local: bool,
        is_static: bool,
    ) -> Option<EntryId> {
        let id = self.make_entry(name.clone(), ty, is_local, is_static);
        if self.table_mut(scope).add(name, id) {
            Some(id)
        } else {
            None
        }
    }

    // -------------------------------------------------------------------------
    // Parse scopes
    // -------------------------------------------------------------------------

    pub fn new_parse_scope(&mut self) {
        self.parse_stack.push(SymbolTable::default());
    }

    /// Add an already-allocated entry to the innermost open parse scope.
    pub fn add_to_parse_scope(&mut self, id: EntryId) {
        let name = self.entries[id.index()].name.clone();
        if let Some(scope) = self.parse_stack.last_mut() {
            scope.add(name, id);
        }
    }

    /// Close the innermost parse scope and register its table under `scope`.
    pub fn previous_parse_scope(&mut self, scope: &str) {
        if let Some(table) = self.parse_stack.pop() {
            self.tables.insert(scope.to_string(), table);
        }
    }
}
