//! Semantic pass 1: declaration collection.
//!
//! A single visitor that only descends into list/compound statements and the five
//! declaration variants (function, variable, enum, class, module). For each
//! declaration it inserts a binding into the current symbol table; for
//! classes/modules/enums it also allocates a fresh nested symbol table and recurses
//! into the body. Function bodies are not visited here — every name in the program
//! must already be bound before pass 2 walks into function/method bodies to resolve
//! identifiers.

use crate::ast::{Ast, NodeId, NodeKind, Storage};
use crate::error::{CompileError, ErrorKind, ErrorSink};
use crate::symtab::{SymTabArena, SymTabId, SymTabKind};

/// Runs pass 1 over every top-level node in `roots`, returning the newly created
/// global symbol table.
pub fn run(
    ast: &mut Ast,
    symtabs: &mut SymTabArena,
    roots: &[NodeId],
    errors: &mut ErrorSink,
) -> SymTabId {
    let global = symtabs.new_table(SymTabKind::Global);
    walk_stmts(ast, symtabs, global, roots, errors);
    global
}

fn walk_stmts(
    ast: &mut Ast,
    symtabs: &mut SymTabArena,
    table: SymTabId,
    ids: &[NodeId],
    errors: &mut ErrorSink,
) {
    for &id in ids {
        walk_stmt(ast, symtabs, table, id, errors);
    }
}

fn walk_stmt(
    ast: &mut Ast,
    symtabs: &mut SymTabArena,
    table: SymTabId,
    id: NodeId,
    errors: &mut ErrorSink,
) {
    // Children are cloned out (NodeId is Copy, Vec<NodeId> is cheap) so the
    // recursive calls below can re-borrow `ast` mutably to stamp `symtab` fields.
    match ast.get(id).kind.clone() {
        NodeKind::List { stmts } => walk_stmts(ast, symtabs, table, &stmts, errors),
        NodeKind::Compound { stmts, .. } => walk_stmts(ast, symtabs, table, &stmts, errors),

        NodeKind::Function {
            identifier,
            storage,
            ..
        } => {
            insert_declaration(ast, symtabs, table, &identifier, storage, id, errors);
        }

        NodeKind::VariableDecl { storage, vars, .. } => {
            for var_id in vars {
                let name = match &ast.get(var_id).kind {
                    NodeKind::Variable { identifier, .. } => identifier.clone(),
                    _ => continue,
                };
                insert_declaration(ast, symtabs, table, &name, storage, var_id, errors);
            }
        }

        NodeKind::Enum {
            identifier,
            members,
            ..
        } => {
            insert_declaration(ast, symtabs, table, &identifier, Storage::Default, id, errors);
            let enum_table = symtabs.new_table(SymTabKind::Enum);
            for (name, member_id) in &members {
                if !symtabs.get_mut(enum_table).insert(name.clone(), *member_id) {
                    report_duplicate(ast, errors, *member_id, name);
                }
            }
            if let NodeKind::Enum { symtab, .. } = &mut ast.get_mut(id).kind {
                *symtab = Some(enum_table);
            }
        }

        NodeKind::Class {
            identifier,
            storage,
            decls,
            ..
        } => {
            insert_declaration(ast, symtabs, table, &identifier, storage, id, errors);
            let class_table = symtabs.new_table(SymTabKind::Class);
            walk_stmts(ast, symtabs, class_table, &decls, errors);
            if let NodeKind::Class { symtab, .. } = &mut ast.get_mut(id).kind {
                *symtab = Some(class_table);
            }
        }

        NodeKind::Module {
            identifier, decls, ..
        } => {
            insert_declaration(ast, symtabs, table, &identifier, Storage::Default, id, errors);
            let module_table = symtabs.new_table(SymTabKind::Module);
            walk_stmts(ast, symtabs, module_table, &decls, errors);
            if let NodeKind::Module { symtab, .. } = &mut ast.get_mut(id).kind {
                *symtab = Some(module_table);
            }
        }

        _ => {}
    }
}

/// Inserts `name` into `table`, mangling it as `$name` when `storage` is `Static` so
/// a static member never collides with an instance member of the same name.
fn insert_declaration(
    ast: &Ast,
    symtabs: &mut SymTabArena,
    table: SymTabId,
    name: &str,
    storage: Storage,
    node: NodeId,
    errors: &mut ErrorSink,
) {
    let key = if storage == Storage::Static {
        format!("${name}")
    } else {
        name.to_string()
    };
    if !symtabs.get_mut(table).insert(key, node) {
        report_duplicate(ast, errors, node, name);
    }
}

fn report_duplicate(ast: &Ast, errors: &mut ErrorSink, node: NodeId, name: &str) {
    let token = &ast.get(node).meta.token;
    errors.report(CompileError::new(
        ErrorKind::Semantic,
        token.file_id,
        token.line,
        token.column,
        token.offset,
        format!("Identifier {name} redeclared."),
    ));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{Access, NodeMeta, VarInit};
    use crate::token::{Token, TokenKind};

    fn tok() -> Token {
        Token {
            kind: TokenKind::Identifier,
            offset: 0,
            byte_len: 1,
            utf8_len: 1,
            line: 1,
            column: 1,
            file_id: 0,
            builtin: None,
        }
    }

    fn variable_decl(ast: &mut Ast, name: &str, storage: Storage) -> NodeId {
        let var = ast.alloc(
            NodeMeta::new(tok()),
            NodeKind::Variable {
                identifier: name.to_string(),
                type_annotation: None,
                init: VarInit::None,
                parent_decl: None,
                is_computed: false,
                is_upvalue: false,
                slot_index: 0,
            },
        );
        ast.alloc(
            NodeMeta::new(tok()),
            NodeKind::VariableDecl {
                is_const: false,
                access: Access::Default,
                storage,
                vars: vec![var],
            },
        )
    }

    #[test]
    fn collects_top_level_variable() {
        let mut ast = Ast::new();
        let mut symtabs = SymTabArena::new();
        let mut errors = ErrorSink::new();
        let decl = variable_decl(&mut ast, "x", Storage::Default);
        let global = run(&mut ast, &mut symtabs, &[decl], &mut errors);
        assert!(symtabs.get(global).lookup("x").is_some());
        assert!(!errors.has_errors());
    }

    #[test]
    fn duplicate_top_level_declaration_errors() {
        let mut ast = Ast::new();
        let mut symtabs = SymTabArena::new();
        let mut errors = ErrorSink::new();
        let d1 = variable_decl(&mut ast, "x", Storage::Default);
        let d2 = variable_decl(&mut ast, "x", Storage::Default);
        run(&mut ast, &mut symtabs, &[d1, d2], &mut errors);
        assert!(errors.has_errors());
    }

    #[test]
    fn static_member_does_not_collide_with_instance_member() {
        let mut ast = Ast::new();
        let mut symtabs = SymTabArena::new();
        let mut errors = ErrorSink::new();
        let instance = variable_decl(&mut ast, "count", Storage::Default);
        let static_one = variable_decl(&mut ast, "count", Storage::Static);
        let class = ast.alloc(
            NodeMeta::new(tok()),
            NodeKind::Class {
                access: Access::Default,
                storage: Storage::Default,
                identifier: "Counter".to_string(),
                superclass: None,
                is_struct: false,
                is_extern_superclass: false,
                decls: vec![instance, static_one],
                symtab: None,
                ivar_count: 0,
                static_ivar_count: 0,
                runtime_class: None,
                protocols: Vec::new(),
            },
        );
        run(&mut ast, &mut symtabs, &[class], &mut errors);
        assert!(!errors.has_errors());
        match &ast.get(class).kind {
            NodeKind::Class { symtab, .. } => {
                let table = symtabs.get(symtab.unwrap());
                assert!(table.lookup("count").is_some());
                assert!(table.lookup("$count").is_some());
            }
            _ => panic!("expected class node"),
        }
    }
}
