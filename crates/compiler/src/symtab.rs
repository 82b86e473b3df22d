//! Symbol tables.
//!
//! A `SymTab` is a stack of scope hash maps keyed by identifier string, belonging to one
//! declaration (a function, class, module, or enum body) — nested blocks inside that
//! declaration push and pop scopes on the same table. Symbol tables are arena allocated
//! here (`SymTabArena`) rather than owned directly by their AST node, purely so
//! `ast::Node` doesn't need a lifetime; the same "owned by its host declaration, freed
//! with it" lifecycle still holds in spirit — a `SymTabId` is only ever reachable by
//! walking from the AST node that names it, and the whole arena drops together with the
//! `Ast`.

use crate::ast::NodeId;
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SymTabId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SymTabKind {
    Global,
    Function,
    Class,
    Module,
    Enum,
}

#[derive(Debug, Default)]
struct Scope {
    map: HashMap<String, NodeId>,
}

#[derive(Debug)]
pub struct SymTab {
    kind: SymTabKind,
    scopes: Vec<Scope>,
    local_count: u16,
    ivar_count: u16,
    static_ivar_count: u16,
}

impl SymTab {
    fn new(kind: SymTabKind) -> Self {
        SymTab {
            kind,
            scopes: vec![Scope::default()],
            local_count: 0,
            ivar_count: 0,
            static_ivar_count: 0,
        }
    }

    pub fn tag(&self) -> SymTabKind {
        self.kind
    }

    /// Fails (returns `false`) if `name` already exists in the *current* (innermost)
    /// scope — shadowing an outer scope's binding is allowed, re-declaring in the same
    /// scope is not.
    pub fn insert(&mut self, name: impl Into<String>, node: NodeId) -> bool {
        let scope = self.scopes.last_mut().expect("symbol table has no scope");
        let name = name.into();
        if scope.map.contains_key(&name) {
            false
        } else {
            scope.map.insert(name, node);
            true
        }
    }

    /// Walks every scope in this table, innermost first.
    pub fn lookup(&self, name: &str) -> Option<NodeId> {
        self.scopes
            .iter()
            .rev()
            .find_map(|scope| scope.map.get(name).copied())
    }

    pub fn enter_scope(&mut self) {
        self.scopes.push(Scope::default());
    }

    /// Pops the current scope, returning the minimum slot among any variable in it for
    /// which `captured_slot_of` returns `Some`.
    pub fn exit_scope(&mut self, captured_slot_of: impl Fn(NodeId) -> Option<u16>) -> Option<u16> {
        let scope = self.scopes.pop().expect("exit_scope without enter_scope");
        scope
            .map
            .values()
            .filter_map(|&id| captured_slot_of(id))
            .min()
    }

    pub fn set_ivar(&mut self, is_static: bool) -> u16 {
        if is_static {
            let slot = self.static_ivar_count;
            self.static_ivar_count += 1;
            slot
        } else {
            let slot = self.ivar_count;
            self.ivar_count += 1;
            slot
        }
    }

    pub fn set_local_index(&mut self) -> u16 {
        let slot = self.local_count;
        self.local_count += 1;
        slot
    }

    pub fn local_count(&self) -> u16 {
        self.local_count
    }

    pub fn ivar_count(&self) -> u16 {
        self.ivar_count
    }

    pub fn static_ivar_count(&self) -> u16 {
        self.static_ivar_count
    }
}

/// Owns every `SymTab` created during a compilation.
#[derive(Debug, Default)]
pub struct SymTabArena {
    tables: Vec<SymTab>,
}

impl SymTabArena {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn new_table(&mut self, kind: SymTabKind) -> SymTabId {
        let id = SymTabId(self.tables.len() as u32);
        self.tables.push(SymTab::new(kind));
        id
    }

    pub fn get(&self, id: SymTabId) -> &SymTab {
        &self.tables[id.0 as usize]
    }

    pub fn get_mut(&mut self, id: SymTabId) -> &mut SymTab {
        &mut self.tables[id.0 as usize]
    }

    /// Direct fallback lookup against a known global table, used by semantic pass 2
    /// once the declaration-stack walk exhausts every enclosing function/class without
    /// a hit.
    pub fn global_lookup(&self, global: SymTabId, name: &str) -> Option<NodeId> {
        self.get(global).lookup(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_fails_on_shadow_in_same_scope_but_not_across_scopes() {
        let mut arena = SymTabArena::new();
        let id = arena.new_table(SymTabKind::Function);
        let table = arena.get_mut(id);
        assert!(table.insert("x", NodeId(0)));
        assert!(!table.insert("x", NodeId(1)));
        table.enter_scope();
        assert!(table.insert("x", NodeId(2)));
        assert_eq!(table.lookup("x"), Some(NodeId(2)));
        table.exit_scope(|_| None);
        assert_eq!(table.lookup("x"), Some(NodeId(0)));
    }

    #[test]
    fn slot_counters_increment_independently() {
        let mut arena = SymTabArena::new();
        let id = arena.new_table(SymTabKind::Class);
        let table = arena.get_mut(id);
        assert_eq!(table.set_ivar(false), 0);
        assert_eq!(table.set_ivar(false), 1);
        assert_eq!(table.set_ivar(true), 0);
        assert_eq!(table.ivar_count(), 2);
        assert_eq!(table.static_ivar_count(), 1);
    }

    #[test]
    fn exit_scope_reports_minimum_captured_slot() {
        let mut arena = SymTabArena::new();
        let id = arena.new_table(SymTabKind::Function);
        let table = arena.get_mut(id);
        table.insert("a", NodeId(0));
        table.insert("b", NodeId(1));
        let min = table.exit_scope(|id| match id.0 {
            0 => Some(3),
            1 => Some(1),
            _ => None,
        });
        assert_eq!(min, Some(1));
    }
}
