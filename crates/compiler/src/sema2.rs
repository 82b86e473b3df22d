//! Semantic pass 2: identifier resolution and locality checks.
//!
//! Runs after pass 1 has populated every declaration-level symbol table. This pass
//! walks into function/method/getter/setter bodies (which pass 1 skips), assigns
//! local/ivar slots, resolves every identifier reference to a [`crate::ast::Location`],
//! builds upvalue chains for closures, and checks a handful of locality rules
//! (break/continue placement, assignment targets, range literal endpoints, duplicate
//! map keys, and so on).
//!
//! Resolution order: walk the declaration stack top-down.
//! 1. Each enclosing function, innermost first — stop at the first class/module
//!    boundary crossed, since a method or nested class is never a lexical closure
//!    over whatever function happens to enclose its declaration in the source.
//! 2. Each enclosing class/module, innermost first, including each superclass in a
//!    class's inheritance chain.
//! 3. The global table.
//! 4. `CompilerConfig::is_extern_global` as a final host-declared fallback.
//! 5. Otherwise, a "not found" error.

use crate::ast::{
    Ast, Location, LocationKind, NodeId, NodeKind, Storage, UpvalueEntry, VarInit, NOT_IVAR_SLOT,
};
use crate::config::CompilerConfig;
use crate::error::{CompileError, ErrorKind, ErrorSink};
use crate::ircode::{MAX_LOCALS, MAX_UPVALUES};
use crate::symtab::{SymTabArena, SymTabId, SymTabKind};
use crate::token::Keyword;

#[derive(Debug, Clone, Copy)]
enum Frame {
    Function(NodeId, SymTabId),
    Class(NodeId, SymTabId),
    Module(NodeId, SymTabId),
}

pub fn run(
    ast: &mut Ast,
    symtabs: &mut SymTabArena,
    global: SymTabId,
    roots: &[NodeId],
    config: &CompilerConfig,
    errors: &mut ErrorSink,
) {
    assign_ivar_slots(ast, symtabs, roots);
    let mut sema = Sema2 {
        ast,
        symtabs,
        config,
        errors,
        global,
        decl_stack: Vec::new(),
        loop_depth: 0,
        switch_depth: 0,
    };
    sema.visit_many(roots);
}

/// Pre-pass: assign every class ivar/static-ivar its slot before any method body is
/// visited, so a method can reference a sibling class's ivars (declared later in
/// source order) without the slot still reading its zero default.
fn assign_ivar_slots(ast: &mut Ast, symtabs: &mut SymTabArena, ids: &[NodeId]) {
    for &id in ids {
        assign_ivar_slots_node(ast, symtabs, id);
    }
}

fn assign_ivar_slots_node(ast: &mut Ast, symtabs: &mut SymTabArena, id: NodeId) {
    match ast.get(id).kind.clone() {
        NodeKind::List { stmts } | NodeKind::Compound { stmts, .. } => {
            assign_ivar_slots(ast, symtabs, &stmts);
        }
        NodeKind::Class { decls, symtab, .. } => {
            let class_table = symtab.expect("class symtab set by pass 1");
            for &decl in &decls {
                if let NodeKind::VariableDecl { storage, vars, .. } = ast.get(decl).kind.clone() {
                    let is_static = storage == Storage::Static;
                    let is_lazy = storage == Storage::Lazy;
                    for var_id in &vars {
                        assign_one_ivar(ast, symtabs, class_table, *var_id, is_static, is_lazy, decl);
                    }
                }
            }
            let (ivar_count, static_ivar_count) = {
                let table = symtabs.get(class_table);
                (table.ivar_count(), table.static_ivar_count())
            };
            if let NodeKind::Class {
                ivar_count: ic,
                static_ivar_count: sic,
                ..
            } = &mut ast.get_mut(id).kind
            {
                *ic = ivar_count;
                *sic = static_ivar_count;
            }
            for &decl in &decls {
                assign_ivar_slots_node(ast, symtabs, decl);
            }
        }
        NodeKind::Module { decls, .. } => {
            assign_ivar_slots(ast, symtabs, &decls);
        }
        _ => {}
    }
}

/// Assigns one ivar's slot. A `lazy var` reserves two consecutive slots: the value
/// at `slot_index` and an implicit cached-flag at `slot_index + 1`, so codegen can
/// emit the cached-getter check-or-evaluate sequence without extra bookkeeping
///.
fn assign_one_ivar(
    ast: &mut Ast,
    symtabs: &mut SymTabArena,
    class_table: SymTabId,
    var_id: NodeId,
    is_static: bool,
    is_lazy: bool,
    parent_decl: NodeId,
) {
    let is_computed = matches!(
        &ast.get(var_id).kind,
        NodeKind::Variable { is_computed: true, .. }
    );
    let slot = if is_computed {
        NOT_IVAR_SLOT
    } else {
        let table = symtabs.get_mut(class_table);
        let slot = table.set_ivar(is_static);
        if is_lazy {
            table.set_ivar(is_static);
        }
        slot
    };
    if let NodeKind::Variable {
        slot_index,
        parent_decl: pd,
        ..
    } = &mut ast.get_mut(var_id).kind
    {
        *slot_index = slot;
        *pd = Some(parent_decl);
    }
}

struct Sema2<'a> {
    ast: &'a mut Ast,
    symtabs: &'a mut SymTabArena,
    config: &'a CompilerConfig,
    errors: &'a mut ErrorSink,
    global: SymTabId,
    decl_stack: Vec<Frame>,
    loop_depth: u32,
    switch_depth: u32,
}

impl<'a> Sema2<'a> {
    fn visit_many(&mut self, ids: &[NodeId]) {
        for &id in ids {
            self.visit(id);
        }
    }

    fn error_at(&mut self, node: NodeId, message: impl Into<String>) {
        let token = self.ast.get(node).meta.token.clone();
        self.errors.report(CompileError::new(
            ErrorKind::Semantic,
            token.file_id,
            token.line,
            token.column,
            token.offset,
            message.into(),
        ));
    }

    /// Non-fatal diagnostic (spec.md §7's "superclass-property shadowing" example).
    /// Unlike `error_at`, this never prevents codegen from running.
    fn warn_at(&mut self, node: NodeId, message: impl Into<String>) {
        let token = self.ast.get(node).meta.token.clone();
        self.errors.report(CompileError::new(
            ErrorKind::Warning,
            token.file_id,
            token.line,
            token.column,
            token.offset,
            message.into(),
        ));
    }

    fn current_function_node(&self) -> Option<NodeId> {
        self.decl_stack.iter().rev().find_map(|f| match f {
            Frame::Function(n, _) => Some(*n),
            _ => None,
        })
    }

    fn visit(&mut self, id: NodeId) {
        match self.ast.get(id).kind.clone() {
            NodeKind::List { stmts } | NodeKind::Compound { stmts, .. } => {
                self.visit_compound(id, &stmts)
            }
            NodeKind::Label {
                expr, body, ..
            } => {
                if self.switch_depth == 0 {
                    self.error_at(id, "'case'/'default' not allowed outside of a switch statement.");
                }
                if let Some(e) = expr {
                    self.visit(e);
                }
                if let Some(b) = body {
                    self.visit(b);
                }
            }
            NodeKind::Flow {
                flow_kind,
                cond,
                then_branch,
                else_branch,
            } => {
                self.visit(cond);
                match flow_kind {
                    crate::ast::FlowKind::Switch => {
                        self.switch_depth += 1;
                        self.visit(then_branch);
                        self.switch_depth -= 1;
                    }
                    _ => {
                        self.visit(then_branch);
                        if let Some(e) = else_branch {
                            self.visit(e);
                        }
                    }
                }
            }
            NodeKind::Loop {
                loop_kind,
                cond,
                body,
                expr,
                ..
            } => self.visit_loop(id, loop_kind, cond, body, expr),
            NodeKind::Jump { jump_kind, expr } => {
                self.visit_jump(id, jump_kind, expr);
            }
            NodeKind::Empty => {}

            NodeKind::Function { .. } => self.visit_function(id),
            NodeKind::VariableDecl { vars, .. } => self.visit_variable_decl(vars),
            NodeKind::Variable { .. } => {
                // Reached only when a Variable stands alone as a for-loop binder
                // reused from an outer scope; resolve it like any identifier use.
            }
            NodeKind::Enum { .. } => {}
            NodeKind::Class { .. } => self.visit_class(id),
            NodeKind::Module { .. } => self.visit_module(id),

            NodeKind::Binary { op, left, right } => self.visit_binary(id, op, left, right),
            NodeKind::Unary { expr, .. } => self.visit(expr),
            NodeKind::FileRef { .. } => {}
            NodeKind::Identifier { .. } => self.resolve_identifier(id),
            NodeKind::Literal { value } => {
                if let crate::ast::LiteralValue::InterpolatedList(parts) = value {
                    self.visit_many(&parts);
                }
            }
            NodeKind::KeywordExpr { keyword } => {
                if keyword == Keyword::Args {
                    if let Some(func) = self.current_function_node() {
                        if let NodeKind::Function { useargs, .. } = &mut self.ast.get_mut(func).kind {
                            *useargs = true;
                        }
                    }
                }
            }
            NodeKind::ListExpr { is_map, keys, values } => {
                self.visit_many(&keys);
                self.visit_many(&values);
                if is_map {
                    self.check_duplicate_map_keys(&keys);
                }
            }
            NodeKind::Postfix { base, subops } => {
                self.visit(base);
                for sub in subops {
                    if let NodeKind::PostfixSubOp { kind } = self.ast.get(sub).kind.clone() {
                        match kind {
                            crate::ast::SubOpKind::Call(args) => self.visit_many(&args),
                            crate::ast::SubOpKind::Subscript(idx) => self.visit(idx),
                            crate::ast::SubOpKind::Access(_) => {}
                        }
                    }
                }
            }
            NodeKind::PostfixSubOp { .. } => {}
        }
    }

    fn visit_compound(&mut self, id: NodeId, stmts: &[NodeId]) {
        let table = self.current_scope_table();
        self.symtabs.get_mut(table).enter_scope();
        self.visit_many(stmts);
        let ast = &self.ast;
        let min_captured = self
            .symtabs
            .get_mut(table)
            .exit_scope(|node| captured_slot_of(ast, node));
        match &mut self.ast.get_mut(id).kind {
            NodeKind::Compound { symtab, close_at_slot, .. } => {
                *symtab = Some(table);
                *close_at_slot = min_captured;
            }
            _ => {}
        }
    }

    /// The symbol table whose scope stack the current block pushes onto: the
    /// innermost enclosing function's table, or `global` at the top level.
    fn current_scope_table(&self) -> SymTabId {
        self.decl_stack
            .iter()
            .rev()
            .find_map(|f| match f {
                Frame::Function(_, t) => Some(*t),
                _ => None,
            })
            .unwrap_or(self.global)
    }

    fn visit_loop(
        &mut self,
        id: NodeId,
        loop_kind: crate::ast::LoopKind,
        cond: Option<NodeId>,
        body: NodeId,
        expr: Option<NodeId>,
    ) {
        use crate::ast::LoopKind::*;
        match loop_kind {
            While => {
                if let Some(c) = cond {
                    self.visit(c);
                }
                self.loop_depth += 1;
                self.visit(body);
                self.loop_depth -= 1;
            }
            Repeat => {
                self.loop_depth += 1;
                self.visit(body);
                self.loop_depth -= 1;
                if let Some(e) = expr {
                    self.visit(e);
                }
            }
            For => {
                let table = self.current_scope_table();
                self.symtabs.get_mut(table).enter_scope();
                if let Some(c) = cond {
                    match self.ast.get(c).kind.clone() {
                        NodeKind::VariableDecl { vars, .. } => self.visit_variable_decl(vars),
                        _ => self.visit(c),
                    }
                }
                if let Some(e) = expr {
                    self.visit(e);
                }
                self.loop_depth += 1;
                self.visit(body);
                self.loop_depth -= 1;
                let ast = &self.ast;
                let min_captured = self
                    .symtabs
                    .get_mut(table)
                    .exit_scope(|node| captured_slot_of(ast, node));
                if let NodeKind::Loop { close_at_slot, .. } = &mut self.ast.get_mut(id).kind {
                    *close_at_slot = min_captured;
                }
            }
        }
    }

    fn visit_jump(&mut self, id: NodeId, jump_kind: crate::ast::JumpKind, expr: Option<NodeId>) {
        use crate::ast::JumpKind::*;
        match jump_kind {
            Break => {
                if self.loop_depth == 0 && self.switch_depth == 0 {
                    self.error_at(id, "'break' not allowed outside of a loop or switch.");
                }
            }
            Continue => {
                if self.loop_depth == 0 {
                    self.error_at(id, "'continue' not allowed outside of a loop.");
                }
            }
            Return => {}
        }
        if let Some(e) = expr {
            self.visit(e);
        }
    }

    fn visit_variable_decl(&mut self, vars: Vec<NodeId>) {
        let local_frame = self.decl_stack.last().and_then(|f| match f {
            Frame::Function(_, t) => Some(*t),
            _ => None,
        });
        for var_id in vars {
            let (name, init) = match self.ast.get(var_id).kind.clone() {
                NodeKind::Variable { identifier, init, .. } => (identifier, init),
                _ => continue,
            };
            if let Some(table) = local_frame {
                if !self.symtabs.get_mut(table).insert(name.clone(), var_id) {
                    self.error_at(var_id, format!("Identifier {name} redeclared."));
                }
                let slot = self.symtabs.get_mut(table).set_local_index();
                if self.symtabs.get(table).local_count() > MAX_LOCALS {
                    self.error_at(var_id, "Too many local variables in this function.");
                }
                if let NodeKind::Variable { slot_index, .. } = &mut self.ast.get_mut(var_id).kind {
                    *slot_index = slot;
                }
            }
            match init {
                VarInit::Expr(e) => self.visit(e),
                VarInit::Accessor { getter, setter } => {
                    self.visit_function(getter);
                    if let Some(s) = setter {
                        self.visit_function(s);
                    }
                }
                VarInit::None => {}
            }
        }
    }

    fn visit_function(&mut self, id: NodeId) {
        let (params, block, identifier) = match self.ast.get(id).kind.clone() {
            NodeKind::Function {
                params,
                block,
                identifier,
                ..
            } => (params, block, identifier),
            _ => return,
        };
        let table = self.symtabs.new_table(SymTabKind::Function);
        for &param in &params {
            let name = match &self.ast.get(param).kind {
                NodeKind::Variable { identifier, .. } => identifier.clone(),
                _ => continue,
            };
            if !self.symtabs.get_mut(table).insert(name.clone(), param) {
                self.error_at(param, format!("Parameter {name} redeclared."));
            }
            let slot = self.symtabs.get_mut(table).set_local_index();
            if let NodeKind::Variable { slot_index, .. } = &mut self.ast.get_mut(param).kind {
                *slot_index = slot;
            }
        }

        self.decl_stack.push(Frame::Function(id, table));
        if let Some(block_id) = block {
            self.visit(block_id);
        }
        self.decl_stack.pop();

        let nlocals = self.symtabs.get(table).local_count();
        let nparams = params.len() as u16;
        if nlocals > MAX_LOCALS {
            self.error_at(id, format!("Function '{identifier}' has too many locals."));
        }
        if let NodeKind::Function {
            symtab,
            nlocals: nl,
            nparams: np,
            ..
        } = &mut self.ast.get_mut(id).kind
        {
            *symtab = Some(table);
            *nl = nlocals;
            *np = nparams;
        }
        let nupvalues = match &self.ast.get(id).kind {
            NodeKind::Function { upvalues, .. } => upvalues.len() as u16,
            _ => 0,
        };
        if nupvalues > MAX_UPVALUES {
            self.error_at(id, format!("Function '{identifier}' captures too many upvalues."));
        }
        if let NodeKind::Function {
            is_closure,
            upvalues,
            ..
        } = &mut self.ast.get_mut(id).kind
        {
            *is_closure = !upvalues.is_empty();
        }

        if identifier == "init" {
            if let Some(Frame::Class(class_node, _)) =
                self.decl_stack.iter().rev().find(|f| matches!(f, Frame::Class(..)))
            {
                let class_node = *class_node;
                if let Some(block_id) = block {
                    self.check_init_recursion(class_node, block_id);
                }
            }
        }
    }

    fn visit_class(&mut self, id: NodeId) {
        let (identifier, decls, symtab, superclass) = match self.ast.get(id).kind.clone() {
            NodeKind::Class {
                identifier,
                decls,
                symtab,
                superclass,
                ..
            } => (identifier, decls, symtab, superclass),
            _ => return,
        };
        let table = symtab.expect("class symtab set by pass 1");

        let mut super_class_node = None;
        if let Some(super_id) = superclass {
            self.visit(super_id);
            if let NodeKind::Identifier { name, .. } = &self.ast.get(super_id).kind {
                if *name == identifier {
                    self.error_at(id, format!("Class '{identifier}' cannot be its own superclass."));
                } else {
                    super_class_node = self.symtabs.global_lookup(self.global, name);
                }
            }
        }

        if let Some(super_node) = super_class_node {
            self.check_property_shadowing(&identifier, super_node, &decls);
        }

        self.decl_stack.push(Frame::Class(id, table));
        for &decl in &decls {
            match self.ast.get(decl).kind.clone() {
                NodeKind::Function { .. } => self.visit_function(decl),
                NodeKind::VariableDecl { vars, .. } => {
                    for var_id in vars {
                        if let NodeKind::Variable { init, .. } = self.ast.get(var_id).kind.clone() {
                            match init {
                                VarInit::Expr(e) => self.visit(e),
                                VarInit::Accessor { getter, setter } => {
                                    self.visit_function(getter);
                                    if let Some(s) = setter {
                                        self.visit_function(s);
                                    }
                                }
                                VarInit::None => {}
                            }
                        }
                    }
                }
                NodeKind::Class { .. } => self.visit_class(decl),
                NodeKind::Module { .. } => self.visit_module(decl),
                NodeKind::Enum { .. } => {}
                _ => {}
            }
        }
        self.decl_stack.pop();
    }

    fn visit_module(&mut self, id: NodeId) {
        let (decls, symtab) = match self.ast.get(id).kind.clone() {
            NodeKind::Module { decls, symtab, .. } => (decls, symtab),
            _ => return,
        };
        let table = symtab.expect("module symtab set by pass 1");
        self.decl_stack.push(Frame::Module(id, table));
        self.visit_many(&decls);
        self.decl_stack.pop();
    }

    fn visit_binary(&mut self, id: NodeId, op: crate::token::Operator, left: NodeId, right: NodeId) {
        use crate::token::Operator::*;
        self.visit(left);
        self.visit(right);
        if op == Assign && !is_lvalue(self.ast, left) {
            self.error_at(id, "Invalid assignment target.");
        }
        if op == Assign {
            if let NodeKind::Identifier { symbol: Some(sym), .. } = &self.ast.get(left).kind {
                let sym = *sym;
                if let NodeKind::Variable { parent_decl: Some(decl), identifier, .. } =
                    &self.ast.get(sym).kind
                {
                    let (decl, identifier) = (*decl, identifier.clone());
                    if let NodeKind::VariableDecl { is_const: true, .. } = &self.ast.get(decl).kind {
                        self.error_at(id, format!("Cannot assign to constant '{identifier}'."));
                    }
                }
            }
        }
        if matches!(op, RangeExcl | RangeIncl) {
            for endpoint in [left, right] {
                if let NodeKind::Literal { value } = &self.ast.get(endpoint).kind {
                    if !matches!(value, crate::ast::LiteralValue::Int(_)) {
                        self.error_at(id, "Range literal endpoints must be integers.");
                    }
                }
            }
        }
    }

    fn check_duplicate_map_keys(&mut self, keys: &[NodeId]) {
        use crate::ast::LiteralValue::*;
        let mut seen: Vec<crate::ast::LiteralValue> = Vec::new();
        for &key in keys {
            let literal_key = match &self.ast.get(key).kind {
                NodeKind::Literal { value: value @ (String(_) | Int(_) | Bool(_) | Double(_)) } => {
                    Some(value.clone())
                }
                _ => None,
            };
            if let Some(k) = literal_key {
                // Structural equality: a type mismatch (e.g. `5` vs `"5"`) is never a
                // duplicate even if their display forms coincide.
                if seen.contains(&k) {
                    let display = match &k {
                        String(s) => s.clone(),
                        Int(n) => n.to_string(),
                        Bool(b) => b.to_string(),
                        Double(d) => d.to_string(),
                        InterpolatedList(_) => unreachable!(),
                    };
                    self.error_at(key, format!("Duplicate key '{display}' in map literal."));
                } else {
                    seen.push(k);
                }
            }
        }
    }

    /// Warns (spec.md §7's "superclass-property shadowing" example) when this class
    /// declares a `var`/`const` whose name already exists somewhere in `super_node`'s
    /// own superclass chain. Non-fatal: compilation proceeds either way.
    fn check_property_shadowing(&mut self, identifier: &str, super_node: NodeId, decls: &[NodeId]) {
        for &decl in decls {
            let NodeKind::VariableDecl { vars, .. } = self.ast.get(decl).kind.clone() else {
                continue;
            };
            for var_id in vars {
                let NodeKind::Variable { identifier: name, .. } = self.ast.get(var_id).kind.clone()
                else {
                    continue;
                };
                if lookup_in_class_chain(self.ast, self.symtabs, self.global, super_node, &name)
                    .is_some()
                {
                    self.warn_at(
                        var_id,
                        format!(
                            "Property '{name}' in class '{identifier}' shadows a member of its superclass."
                        ),
                    );
                }
            }
        }
    }

    /// Best-effort check for the most common infinite-recursion shape: `init`
    /// unconditionally invoking its own class's constructor at the top level of its
    /// body — as a bare expression statement (`C();`), as a `var` initializer
    /// (`var x = C();`), or as `self()`. Nested/conditional calls are not analyzed —
    /// this is not a general termination check.
    fn check_init_recursion(&mut self, class_node: NodeId, block: NodeId) {
        let stmts = match &self.ast.get(block).kind {
            NodeKind::Compound { stmts, .. } => stmts.clone(),
            _ => return,
        };
        for stmt in stmts {
            match self.ast.get(stmt).kind.clone() {
                NodeKind::Postfix { .. } => {
                    self.flag_if_self_instantiation(class_node, stmt, stmt);
                }
                NodeKind::VariableDecl { vars, .. } => {
                    for var_id in vars {
                        if let NodeKind::Variable { init: VarInit::Expr(e), .. } =
                            self.ast.get(var_id).kind.clone()
                        {
                            self.flag_if_self_instantiation(class_node, e, stmt);
                        }
                    }
                }
                _ => {}
            }
        }
    }

    /// If `expr` is a postfix chain that calls `ClassName(...)` (the enclosing class)
    /// or `self(...)`, reports the infinite-recursion error at `report_at`.
    fn flag_if_self_instantiation(&mut self, class_node: NodeId, expr: NodeId, report_at: NodeId) {
        let NodeKind::Postfix { base, subops } = &self.ast.get(expr).kind else {
            return;
        };
        let calls_constructor = subops.iter().any(|&sub| {
            matches!(
                &self.ast.get(sub).kind,
                NodeKind::PostfixSubOp { kind: crate::ast::SubOpKind::Call(_) }
            )
        });
        if !calls_constructor {
            return;
        }
        let targets_self = match &self.ast.get(*base).kind {
            NodeKind::Identifier { name, symbol: Some(sym), .. } => {
                *sym == class_node || name == "self"
            }
            NodeKind::Identifier { name, .. } => name == "self",
            _ => false,
        };
        if targets_self {
            self.error_at(report_at, "Infinite loop detected in init func.");
        }
    }

    fn resolve_identifier(&mut self, id: NodeId) {
        let name = match &self.ast.get(id).kind {
            NodeKind::Identifier { name, .. } => name.clone(),
            _ => return,
        };

        // Step 1: enclosing functions, innermost first, stopping at a class/module
        // boundary.
        let mut function_frames: Vec<(NodeId, SymTabId)> = Vec::new();
        for frame in self.decl_stack.iter().rev() {
            match frame {
                Frame::Function(n, t) => function_frames.push((*n, *t)),
                Frame::Class(..) | Frame::Module(..) => break,
            }
        }
        for (idx, &(_func_node, func_table)) in function_frames.iter().enumerate() {
            if let Some(found) = self.symtabs.get(func_table).lookup(&name) {
                if idx == 0 {
                    let slot = variable_slot(self.ast, found);
                    self.set_location(id, Some(found), LocationKind::Local, slot, 0);
                } else {
                    let entry = build_upvalue_chain(self.ast, &function_frames[..=idx], found);
                    self.set_location(id, Some(found), LocationKind::Upvalue, entry.self_index, idx as u16);
                    if let NodeKind::Identifier { upvalue, .. } = &mut self.ast.get_mut(id).kind {
                        *upvalue = Some(entry);
                    }
                    mark_is_upvalue(self.ast, found);
                }
                return;
            }
        }

        // Step 2: enclosing classes/modules, innermost first (ignoring any function
        // frames interleaved between them), including superclass chains for classes.
        let mut container_frames: Vec<Frame> = Vec::new();
        for frame in self.decl_stack.iter().rev() {
            if matches!(frame, Frame::Class(..) | Frame::Module(..)) {
                container_frames.push(*frame);
            }
        }
        for (classes_crossed, frame) in container_frames.iter().enumerate() {
            let found = match frame {
                Frame::Class(class_node, _) => {
                    lookup_in_class_chain(self.ast, self.symtabs, self.global, *class_node, &name)
                }
                Frame::Module(_, table) => self.symtabs.get(*table).lookup(&name),
                Frame::Function(..) => unreachable!(),
            };
            if let Some(found) = found {
                let slot = class_member_slot(self.ast, found);
                let kind = if classes_crossed == 0 {
                    LocationKind::ClassIvarSame
                } else {
                    LocationKind::ClassIvarOuter
                };
                self.set_location(id, Some(found), kind, slot, classes_crossed as u16);
                return;
            }
        }

        // Step 3: global table.
        if let Some(found) = self.symtabs.global_lookup(self.global, &name) {
            self.set_location(id, Some(found), LocationKind::Global, 0, 0);
            return;
        }

        // Step 4: host-declared extern globals.
        if self.config.is_extern_global(&name) {
            self.set_location(id, None, LocationKind::Global, 0, 0);
            return;
        }

        self.error_at(id, format!("Identifier {name} not found."));
    }

    fn set_location(
        &mut self,
        id: NodeId,
        symbol: Option<NodeId>,
        kind: LocationKind,
        slot_index: u16,
        nup: u16,
    ) {
        if let NodeKind::Identifier {
            symbol: sym_field,
            location,
            ..
        } = &mut self.ast.get_mut(id).kind
        {
            *sym_field = symbol;
            *location = Some(Location { kind, slot_index, nup });
        }
    }
}

fn captured_slot_of(ast: &Ast, node: NodeId) -> Option<u16> {
    match &ast.get(node).kind {
        NodeKind::Variable {
            is_upvalue: true,
            slot_index,
            ..
        } => Some(*slot_index),
        _ => None,
    }
}

fn variable_slot(ast: &Ast, node: NodeId) -> u16 {
    match &ast.get(node).kind {
        NodeKind::Variable { slot_index, .. } => *slot_index,
        _ => NOT_IVAR_SLOT,
    }
}

fn class_member_slot(ast: &Ast, node: NodeId) -> u16 {
    match &ast.get(node).kind {
        NodeKind::Variable {
            is_computed: false,
            slot_index,
            ..
        } => *slot_index,
        _ => NOT_IVAR_SLOT,
    }
}

fn mark_is_upvalue(ast: &mut Ast, node: NodeId) {
    if let NodeKind::Variable { is_upvalue, .. } = &mut ast.get_mut(node).kind {
        *is_upvalue = true;
    }
}

/// Resolves a class's own member table first, then walks its superclass chain
/// (resolved by name through the global table — nested/local class hierarchies with
/// a non-global superclass are not supported by this lookup).
fn lookup_in_class_chain(
    ast: &Ast,
    symtabs: &SymTabArena,
    global: SymTabId,
    mut class_node: NodeId,
    name: &str,
) -> Option<NodeId> {
    loop {
        let (table, superclass) = match &ast.get(class_node).kind {
            NodeKind::Class {
                symtab, superclass, ..
            } => (symtab.expect("class symtab set by pass 1"), *superclass),
            _ => return None,
        };
        if let Some(found) = symtabs.get(table).lookup(name) {
            return Some(found);
        }
        let super_id = superclass?;
        let super_name = match &ast.get(super_id).kind {
            NodeKind::Identifier { name, .. } => name.clone(),
            _ => return None,
        };
        class_node = symtabs.global_lookup(global, &super_name)?;
    }
}

/// Builds (or reuses) the chain of [`UpvalueEntry`] records from the function that
/// owns `found` out to the innermost function in `function_frames` (ordered
/// innermost-first; the last element owns `found` as a local). Returns the
/// innermost function's own upvalue entry.
fn build_upvalue_chain(
    ast: &mut Ast,
    function_frames: &[(NodeId, SymTabId)],
    found: NodeId,
) -> UpvalueEntry {
    let def_slot = variable_slot(ast, found);
    let mut index_in_target = def_slot;
    let mut is_direct = true;
    let mut entry = UpvalueEntry {
        captured_variable: found,
        index_in_target: def_slot,
        self_index: 0,
        is_direct: true,
    };
    for i in (0..function_frames.len() - 1).rev() {
        let (func_node, _) = function_frames[i];
        let self_index = find_or_add_upvalue(ast, func_node, found, index_in_target, is_direct);
        entry = UpvalueEntry {
            captured_variable: found,
            index_in_target,
            self_index,
            is_direct,
        };
        index_in_target = self_index;
        is_direct = false;
    }
    entry
}

fn find_or_add_upvalue(
    ast: &mut Ast,
    func_node: NodeId,
    captured_variable: NodeId,
    index_in_target: u16,
    is_direct: bool,
) -> u16 {
    if let NodeKind::Function { upvalues, .. } = &ast.get(func_node).kind {
        if let Some(pos) = upvalues.iter().position(|u| u.captured_variable == captured_variable) {
            return upvalues[pos].self_index;
        }
    }
    let new_index = match &ast.get(func_node).kind {
        NodeKind::Function { upvalues, .. } => upvalues.len() as u16,
        _ => 0,
    };
    if let NodeKind::Function { upvalues, .. } = &mut ast.get_mut(func_node).kind {
        upvalues.push(UpvalueEntry {
            captured_variable,
            index_in_target,
            self_index: new_index,
            is_direct,
        });
    }
    new_index
}

/// An assignable expression shape: a bare identifier, or a postfix chain whose last
/// sub-op is a member access or subscript (not a call).
fn is_lvalue(ast: &Ast, id: NodeId) -> bool {
    match &ast.get(id).kind {
        NodeKind::Identifier { .. } => true,
        NodeKind::Postfix { subops, .. } => match subops.last() {
            Some(&last) => matches!(
                &ast.get(last).kind,
                NodeKind::PostfixSubOp {
                    kind: crate::ast::SubOpKind::Access(_) | crate::ast::SubOpKind::Subscript(_)
                }
            ),
            None => false,
        },
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{Access, NodeMeta};
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

    fn ident(ast: &mut Ast, name: &str) -> NodeId {
        ast.alloc(
            NodeMeta::new(tok()),
            NodeKind::Identifier {
                name: name.to_string(),
                secondary: None,
                symbol: None,
                location: None,
                upvalue: None,
            },
        )
    }

    fn var_decl(ast: &mut Ast, name: &str) -> (NodeId, NodeId) {
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
        let decl = ast.alloc(
            NodeMeta::new(tok()),
            NodeKind::VariableDecl {
                is_const: false,
                access: Access::Default,
                storage: Storage::Default,
                vars: vec![var],
            },
        );
        (decl, var)
    }

    fn run_full(ast: &mut Ast, roots: Vec<NodeId>) -> ErrorSink {
        let mut symtabs = SymTabArena::new();
        let mut errors = ErrorSink::new();
        let global = crate::sema1::run(ast, &mut symtabs, &roots, &mut errors);
        let config = CompilerConfig::new();
        run(ast, &mut symtabs, global, &roots, &config, &mut errors);
        errors
    }

    #[test]
    fn resolves_global_variable_reference() {
        let mut ast = Ast::new();
        let (decl, _var) = var_decl(&mut ast, "x");
        let reference = ident(&mut ast, "x");
        let errors = run_full(&mut ast, vec![decl, reference]);
        assert!(!errors.has_errors());
        match &ast.get(reference).kind {
            NodeKind::Identifier { location, .. } => {
                assert_eq!(location.unwrap().kind, LocationKind::Global);
            }
            _ => panic!("expected identifier"),
        }
    }

    #[test]
    fn unknown_identifier_is_reported() {
        let mut ast = Ast::new();
        let reference = ident(&mut ast, "missing");
        let errors = run_full(&mut ast, vec![reference]);
        assert!(errors.has_errors());
    }

    #[test]
    fn break_outside_loop_is_rejected() {
        let mut ast = Ast::new();
        let brk = ast.alloc(
            NodeMeta::new(tok()),
            NodeKind::Jump {
                jump_kind: crate::ast::JumpKind::Break,
                expr: None,
            },
        );
        let errors = run_full(&mut ast, vec![brk]);
        assert!(errors.has_errors());
    }

    #[test]
    fn extern_global_resolves_without_a_declaration() {
        let mut ast = Ast::new();
        let mut symtabs = SymTabArena::new();
        let mut errors = ErrorSink::new();
        let reference = ident(&mut ast, "Socket");
        let roots = vec![reference];
        let global = crate::sema1::run(&mut ast, &mut symtabs, &roots, &mut errors);
        let config = CompilerConfig::new()
            .with_builtin(crate::config::ExternalBuiltin::new("Socket"));
        run(&mut ast, &mut symtabs, global, &roots, &config, &mut errors);
        assert!(!errors.has_errors());
    }
}
