//! Codegen: the AST → IR visitor, and the runtime object graph it builds alongside it.
//!
//! Everything upstream (parser, `sema1`, `sema2`) has already done the hard semantic
//! work: every identifier carries a resolved [`crate::ast::Location`], every class's
//! ivar slots are assigned, every closure's upvalue chain is built. This module's job
//! is mechanical by comparison — walk the tree once, drive [`crate::ircode::IrBuffer`]'s
//! register allocator, and assemble `lumen_runtime` objects (`FunctionObject`,
//! `ClassObject`, `RuntimeArena`) as it goes. A function's AST subtree and its
//! `IrBuffer` are built together and immediately finalized (peephole + encode) before
//! codegen moves on to the next one — there is no separate "optimize everything at the
//! end" pass.
//!
//! Two runtime objects don't correspond to a single AST node with a body to visit:
//! a `lazy var`'s cached getter, and the default getter/setter pair synthesized for a
//! plain public ivar. Both are assembled directly against an `IrBuffer` rather than by
//! visiting an existing `Function` node.

use crate::ast::{
    Access, Ast, FlowKind, JumpKind, LiteralValue, LocationKind, LoopKind, NodeId, NodeKind,
    NOT_IVAR_SLOT, Storage, SubOpKind, VarInit,
};
use crate::config::CompilerConfig;
use crate::error::ErrorSink;
use crate::ircode::{IrBuffer, Opcode, Tag, MAX_REGISTERS};
use crate::optimizer;
use crate::symtab::SymTabArena;
use crate::token::Operator;
use lumen_runtime::{
    Bound, ClassHandle, ClassObject, FunctionHandle, FunctionObject, ModuleClosure, RuntimeArena,
    Value,
};
use std::collections::HashMap;

const SELF_REGISTER: u16 = 0;

/// Runs codegen over every top-level root, wrapping them in a synthetic
/// `$moduleinit` function. Returns `None` (after reporting through `errors`) if
/// codegen hit a register-allocation failure or a `module` declaration reached
/// this far (both should already be impossible by the time sema2 has run clean).
pub fn generate(
    ast: &mut Ast,
    symtabs: &SymTabArena,
    roots: &[NodeId],
    config: &CompilerConfig,
    errors: &mut ErrorSink,
) -> Option<ModuleClosure> {
    let mut cg = CodeGen {
        ast,
        symtabs,
        config,
        errors,
        arena: RuntimeArena::new(),
        class_handles: HashMap::new(),
    };
    let entry = cg.build_module_init(roots);
    if cg.errors.has_errors() {
        cg.arena.release();
        return None;
    }
    Some(ModuleClosure::new(cg.arena, entry))
}

struct CodeGen<'a> {
    ast: &'a mut Ast,
    symtabs: &'a SymTabArena,
    config: &'a CompilerConfig,
    errors: &'a mut ErrorSink,
    arena: RuntimeArena,
    class_handles: HashMap<NodeId, ClassHandle>,
}

impl<'a> CodeGen<'a> {
    fn line_of(&self, node: NodeId) -> u32 {
        self.ast.get(node).meta.token.line
    }

    fn emit_error(&mut self, node: NodeId, message: impl Into<String>) {
        let tok = self.ast.get(node).meta.token.clone();
        self.errors.report(crate::error::CompileError::new(
            crate::error::ErrorKind::Semantic,
            tok.file_id,
            tok.line,
            tok.column,
            tok.offset,
            message.into(),
        ));
    }

    /// Finalizes a function: pops the peephole optimizer over its raw IR, bit-packs
    /// it, and writes the result back into the `FunctionObject` already sitting in
    /// the arena at `handle`.
    fn finalize_function(&mut self, handle: FunctionHandle, mut ir: IrBuffer) {
        if let Some(err) = ir.take_error() {
            let node = self.ast.len().saturating_sub(1);
            let _ = node;
            self.errors.report(crate::error::CompileError::new(
                crate::error::ErrorKind::Semantic,
                0,
                0,
                0,
                0,
                err,
            ));
            return;
        }
        let nlocals = self.arena.function(handle).nlocals;
        {
            let arena = &mut self.arena;
            optimizer::run_peephole(ir.instructions_mut(), nlocals, &mut |v| {
                arena.function_mut(handle).constants.add(v)
            });
        }
        let encoded = optimizer::encode(ir.instructions(), self.config.emit_line_table);
        let func = self.arena.function_mut(handle);
        func.body = lumen_runtime::FunctionBody::Encoded {
            words: encoded.words,
            lines: encoded.lines,
        };
        func.purity = Some(encoded.purity);
    }

    /// Builds the synthetic top-level function every module compiles to: every root
    /// statement runs in its body, and top-level declarations additionally get
    /// `STOREG`'d under their name so later code can look them up dynamically.
    fn build_module_init(&mut self, roots: &[NodeId]) -> FunctionHandle {
        let fo = FunctionObject::new("$moduleinit");
        let handle = self.arena.push_function(fo);
        let mut ir = IrBuffer::new(0);
        for &root in roots {
            self.emit_top_level_statement(&mut ir, handle, root);
            ir.register_temps_clear();
        }
        let line = roots.last().map(|&r| self.line_of(r)).unwrap_or(1);
        ir.add(Opcode::Ret0, 0, 0, 0, line);
        self.finalize_function(handle, ir);
        handle
    }

    fn emit_top_level_statement(&mut self, ir: &mut IrBuffer, module_fn: FunctionHandle, id: NodeId) {
        match self.ast.get(id).kind.clone() {
            NodeKind::Function { identifier, storage, .. } => {
                if storage == Storage::Extern {
                    return;
                }
                let fh = self.build_function(id);
                self.store_global(ir, module_fn, &identifier, Value::Function(fh), self.line_of(id));
            }
            NodeKind::Class { identifier, .. } => {
                let ch = self.class_handle_for(id);
                self.store_global(ir, module_fn, &identifier, Value::Class(ch), self.line_of(id));
            }
            NodeKind::Enum { .. } => {
                // A pure compile-time construct: member values are folded directly
                // into referencing expressions, so there is nothing to emit here.
            }
            NodeKind::Module { .. } => {
                self.emit_error(id, "module declarations are not supported by codegen");
            }
            NodeKind::VariableDecl { storage, vars, .. } => {
                if storage == Storage::Extern {
                    return;
                }
                for var_id in vars {
                    self.emit_top_level_var(ir, module_fn, var_id);
                }
            }
            _ => self.visit_statement(ir, module_fn, id),
        }
    }

    fn emit_top_level_var(&mut self, ir: &mut IrBuffer, module_fn: FunctionHandle, var_id: NodeId) {
        let (identifier, init) = match self.ast.get(var_id).kind.clone() {
            NodeKind::Variable { identifier, init, .. } => (identifier, init),
            _ => return,
        };
        let line = self.line_of(var_id);
        let reg = match init {
            VarInit::Expr(e) => self.visit_expr(ir, module_fn, e),
            VarInit::Accessor { .. } | VarInit::None => {
                ir.add_int(0, line).unwrap_or(0)
            }
        };
        ir.add(Opcode::Storeg, reg as i32, self.name_const(module_fn, &identifier) as i32, 0, line);
        ir.free_register(reg);
    }

    fn store_global(&mut self, ir: &mut IrBuffer, func: FunctionHandle, name: &str, value: Value, line: u32) {
        let cidx = self.arena.function_mut(func).constants.add(value);
        let dst = ir.add_constant(cidx, line).unwrap_or(0);
        let name_idx = self.name_const(func, name);
        ir.add(Opcode::Storeg, dst as i32, name_idx as i32, 0, line);
        ir.free_register(dst);
    }

    fn name_const(&mut self, func: FunctionHandle, name: &str) -> u32 {
        self.arena.function_mut(func).constants.add(Value::string(name))
    }

    // ----------------------------------------------------------------- classes ---

    fn class_handle_for(&mut self, node: NodeId) -> ClassHandle {
        if let Some(&h) = self.class_handles.get(&node) {
            return h;
        }
        self.build_class(node)
    }

    fn build_class(&mut self, node: NodeId) -> ClassHandle {
        let (identifier, superclass, is_struct, is_extern_superclass, decls, ivar_count, static_ivar_count, protocols) =
            match self.ast.get(node).kind.clone() {
                NodeKind::Class {
                    identifier,
                    superclass,
                    is_struct,
                    is_extern_superclass,
                    decls,
                    ivar_count,
                    static_ivar_count,
                    protocols,
                    ..
                } => (identifier, superclass, is_struct, is_extern_superclass, decls, ivar_count, static_ivar_count, protocols),
                _ => return self.arena.push_class(ClassObject::new("<not-a-class>")),
            };

        let handle = self.arena.push_class(ClassObject::new(identifier.clone()));
        self.class_handles.insert(node, handle);
        let meta = self.arena.push_class(ClassObject::new(format!("{identifier} class")));
        {
            let class = self.arena.class_mut(handle);
            class.metaclass = Some(meta);
            class.ivar_count = ivar_count;
            class.static_ivar_count = static_ivar_count;
            class.is_struct = is_struct;
            class.is_extern_superclass = is_extern_superclass;
            class.protocols = protocols;
        }

        if let Some(super_id) = superclass {
            if let NodeKind::Identifier { symbol: Some(sym), .. } = self.ast.get(super_id).kind.clone() {
                if matches!(self.ast.get(sym).kind, NodeKind::Class { .. }) {
                    if sym == node {
                        self.emit_error(node, format!("Class '{identifier}' cannot be its own superclass."));
                    } else {
                        let super_handle = self.class_handle_for(sym);
                        self.arena.class_mut(handle).superclass = Some(super_handle);
                    }
                }
            }
        }

        if let NodeKind::Class { runtime_class, .. } = &mut self.ast.get_mut(node).kind {
            *runtime_class = Some(handle);
        }

        self.process_class_members(handle, meta, &decls);
        handle
    }

    fn process_class_members(&mut self, handle: ClassHandle, meta: ClassHandle, decls: &[NodeId]) {
        self.synthesize_own_dollar_init(handle, decls);

        for &decl in decls {
            match self.ast.get(decl).kind.clone() {
                NodeKind::Function { identifier, storage, access, .. } => {
                    if identifier == "init" && storage != Storage::Static {
                        let fh = self.process_constructor(decl, handle);
                        self.arena.class_mut(handle).bind_method("init", fh);
                        continue;
                    }
                    let fh = self.build_function(decl);
                    let target = if storage == Storage::Static { meta } else { handle };
                    self.arena.class_mut(target).bind_method(identifier, fh);
                    let _ = access;
                }
                NodeKind::VariableDecl { storage, vars, access, .. } => {
                    for var_id in vars {
                        self.process_class_var(handle, meta, storage, access, var_id);
                    }
                }
                NodeKind::Class { .. } => {
                    // Nested class: built lazily the first time something references
                    // it (as a superclass, or an identifier access); nothing to do
                    // here beyond making sure it eventually gets built so dead
                    // inner classes still show up in the arena.
                    self.class_handle_for(decl);
                }
                _ => {}
            }
        }

        // `$init` exists but the class never declared its own `init`: synthesize one
        // that just calls `$init` and returns `self`.
        if self.arena.class(handle).lookup("init").is_none()
            && matches!(self.arena.class(handle).lookup("$init"), Some(Bound::Method(_)))
        {
            let fh = self.synthesize_default_init();
            self.arena.class_mut(handle).bind_method("init", fh);
        }
    }

    /// Builds this class's own `$init` — the compiler-synthesized function that stores
    /// each plain instance var's declared default into its slot — and binds it under
    /// `"$init"`, but only if there is something for it to do: an own default, or a
    /// superclass `$init` to carry forward. Chains to the superclass's `$init` by a
    /// direct reference to its exact function, not a by-name lookup through `self`:
    /// `self` is always the most-derived instance being constructed, so a by-name
    /// lookup of `$init` from inside an ancestor's own `$init` body would resolve back
    /// to the most-derived override and recurse forever once a hierarchy is more than
    /// one level deep.
    fn synthesize_own_dollar_init(&mut self, handle: ClassHandle, decls: &[NodeId]) {
        let mut defaults: Vec<(u16, NodeId)> = Vec::new();
        for &decl in decls {
            let NodeKind::VariableDecl { storage, vars, .. } = self.ast.get(decl).kind.clone() else {
                continue;
            };
            if storage == Storage::Static {
                continue;
            }
            for var_id in vars {
                let NodeKind::Variable { identifier, init: VarInit::Expr(e), slot_index, .. } =
                    self.ast.get(var_id).kind.clone()
                else {
                    continue;
                };
                if identifier == "outer" || storage == Storage::Lazy {
                    continue;
                }
                defaults.push((slot_index, e));
            }
        }

        let super_init = match self.arena.class(handle).superclass {
            Some(s) => match self.arena.class(s).lookup("$init") {
                Some(&Bound::Method(h)) => Some(h),
                _ => None,
            },
            None => None,
        };
        if defaults.is_empty() && super_init.is_none() {
            return;
        }

        let fo = self.new_function_object("$init", 1, 1, 0, false, &[], false);
        let fh = self.arena.push_function(fo);
        let mut ir = IrBuffer::new(1);

        if let Some(super_fh) = super_init {
            let cidx = self.arena.function_mut(fh).constants.add(Value::Function(super_fh));
            let t = ir.push_temp().unwrap_or(0);
            ir.add(Opcode::Closure, t as i32, cidx as i32, 0, 0);
            ir.add(Opcode::Move, t as i32 + 1, SELF_REGISTER as i32, 0, 0);
            ir.add(Opcode::Call, t as i32, t as i32, 1, 0);
            ir.free_register(t);
        }

        for (slot, init_expr) in defaults {
            let line = self.line_of(init_expr);
            let value_reg = self.visit_expr(&mut ir, fh, init_expr);
            let c = slot as i32 + MAX_REGISTERS as i32;
            ir.add(Opcode::Store, value_reg as i32, SELF_REGISTER as i32, c, line);
            ir.free_register(value_reg);
        }
        ir.add(Opcode::Ret0, 0, 0, 0, 0);

        self.finalize_function(fh, ir);
        self.arena.class_mut(handle).bind_method("$init", fh);
    }

    /// `$init` exists but the class declared no `init` of its own: a 4-instruction
    /// call to `$init` (by name — dispatching to the most-derived `$init` is exactly
    /// right here, since that one already folds in every ancestor's defaults) followed
    /// by an explicit `RET self`.
    fn synthesize_default_init(&mut self) -> FunctionHandle {
        let fo = self.new_function_object("init", 1, 1, 0, false, &[], false);
        let fh = self.arena.push_function(fo);
        let mut ir = IrBuffer::new(1);
        let slot = ir.reserve_patch_init_slot(0);
        let idx = self.name_const(fh, "$init");
        let _ = ir.patch_init(slot, idx, 0);
        ir.add(Opcode::Ret, SELF_REGISTER as i32, 0, 0, 0);
        self.finalize_function(fh, ir);
        fh
    }

    fn process_class_var(
        &mut self,
        handle: ClassHandle,
        meta: ClassHandle,
        storage: Storage,
        access: Access,
        var_id: NodeId,
    ) {
        let target = if storage == Storage::Static { meta } else { handle };
        let (identifier, init, is_computed, slot_index) = match self.ast.get(var_id).kind.clone() {
            NodeKind::Variable { identifier, init, is_computed, slot_index, .. } => {
                (identifier, init, is_computed, slot_index)
            }
            _ => return,
        };
        if identifier == "outer" {
            return; // hidden ivar, never bound as a member
        }
        match init {
            VarInit::Accessor { getter, setter } => {
                let gh = self.build_function(getter);
                let sh = setter.map(|s| self.build_function(s));
                self.arena.class_mut(target).bind_property(identifier, gh, sh);
            }
            VarInit::Expr(e) if storage == Storage::Lazy => {
                let gh = self.synthesize_lazy_getter(&identifier, slot_index, e);
                self.arena.class_mut(target).bind_property(identifier, gh, None);
            }
            _ => {
                if !is_computed && access == Access::Public {
                    let (gh, sh) = self.synthesize_default_accessor(&identifier, slot_index);
                    self.arena.class_mut(target).bind_property(identifier, gh, Some(sh));
                }
            }
        }
    }

    /// `init` gets two things a plain method doesn't: if this class's own `$init`
    /// exists (synthesized by [`Self::synthesize_own_dollar_init`] before any `init`
    /// is processed), a patched-in call to it at the very top — `$init` already folds
    /// in every ancestor's defaults, so `init` only ever needs to call its *own*
    /// class's `$init`, never the superclass's directly — and an explicit `RET self`
    /// in place of the implicit-return fallback every other method gets.
    fn process_constructor(&mut self, node: NodeId, handle: ClassHandle) -> FunctionHandle {
        let (params, block, nlocals, nparams, useargs, has_defaults, upvalues) = match self.ast.get(node).kind.clone() {
            NodeKind::Function { params, block, nlocals, nparams, useargs, has_defaults, upvalues, .. } => {
                (params, block, nlocals, nparams, useargs, has_defaults, upvalues)
            }
            _ => unreachable!("process_constructor called on a non-function node"),
        };
        let fo = self.new_function_object("init", nparams, nlocals, upvalues.len() as u16, useargs, &params, has_defaults);
        let fh = self.arena.push_function(fo);
        let mut ir = IrBuffer::new(nlocals);

        let has_own_dollar_init =
            matches!(self.arena.class(handle).lookup("$init"), Some(Bound::Method(_)));
        let patch_slot = has_own_dollar_init.then(|| ir.reserve_patch_init_slot(self.line_of(node)));

        if let Some(block_id) = block {
            self.visit_function_body(&mut ir, fh, block_id);
        }
        let line = block.map(|b| self.line_of(b)).unwrap_or_else(|| self.line_of(node));
        ir.add(Opcode::Ret, SELF_REGISTER as i32, 0, 0, line);

        if let Some(slot) = patch_slot {
            let idx = self.name_const(fh, "$init");
            let _ = ir.patch_init(slot, idx, self.line_of(node));
        }

        self.finalize_function(fh, ir);
        fh
    }

    fn new_function_object(
        &mut self,
        identifier: &str,
        nparams: u16,
        nlocals: u16,
        nupvalues: u16,
        useargs: bool,
        params: &[NodeId],
        has_defaults: bool,
    ) -> FunctionObject {
        let mut fo = FunctionObject::new(identifier);
        fo.nparams = nparams;
        fo.nlocals = nlocals;
        fo.nupvalues = nupvalues;
        fo.useargs = useargs;
        fo.param_names = params
            .iter()
            .filter_map(|&p| match &self.ast.get(p).kind {
                NodeKind::Variable { identifier, .. } => Some(identifier.clone()),
                _ => None,
            })
            .collect();
        if has_defaults {
            let defaults = params
                .iter()
                .map(|&p| match &self.ast.get(p).kind {
                    NodeKind::Variable { init: VarInit::Expr(e), .. } => self.literal_to_value(*e),
                    _ => Value::Undefined,
                })
                .collect();
            fo.defaults = Some(defaults);
        }
        fo
    }

    fn literal_to_value(&self, node: NodeId) -> Value {
        match &self.ast.get(node).kind {
            NodeKind::Literal { value: LiteralValue::Int(n) } => Value::Int(*n),
            NodeKind::Literal { value: LiteralValue::Double(d) } => Value::Float(*d),
            NodeKind::Literal { value: LiteralValue::Bool(b) } => Value::Bool(*b),
            NodeKind::Literal { value: LiteralValue::String(s) } => Value::string(s.clone()),
            NodeKind::KeywordExpr { keyword } => match keyword {
                crate::token::Keyword::True => Value::Bool(true),
                crate::token::Keyword::False => Value::Bool(false),
                crate::token::Keyword::Null => Value::Null,
                _ => Value::Undefined,
            },
            _ => Value::Undefined,
        }
    }

    /// Builds an ordinary `Function` AST node into a `FunctionHandle`: allocate the
    /// `FunctionObject`, build and finalize its `IrBuffer`, return the handle.
    /// `extern` functions never reach here (filtered by their callers) since they
    /// carry no body for this compiler to generate.
    fn build_function(&mut self, node: NodeId) -> FunctionHandle {
        let (identifier, params, block, nlocals, nparams, useargs, has_defaults, upvalues) =
            match self.ast.get(node).kind.clone() {
                NodeKind::Function {
                    identifier, params, block, nlocals, nparams, useargs, has_defaults, upvalues, ..
                } => (identifier, params, block, nlocals, nparams, useargs, has_defaults, upvalues),
                _ => unreachable!("build_function called on a non-function node"),
            };
        let fo = self.new_function_object(&identifier, nparams, nlocals, upvalues.len() as u16, useargs, &params, has_defaults);
        let fh = self.arena.push_function(fo);
        let mut ir = IrBuffer::new(nlocals);
        if let Some(block_id) = block {
            self.visit_function_body(&mut ir, fh, block_id);
        }
        let line = block.map(|b| self.line_of(b)).unwrap_or_else(|| self.line_of(node));
        ir.add(Opcode::Ret0, 0, 0, 0, line);
        self.finalize_function(fh, ir);
        fh
    }

    fn visit_function_body(&mut self, ir: &mut IrBuffer, func: FunctionHandle, block: NodeId) {
        let (stmts, close_at_slot) = match self.ast.get(block).kind.clone() {
            NodeKind::Compound { stmts, close_at_slot, .. } => (stmts, close_at_slot),
            _ => return,
        };
        for &stmt in &stmts {
            self.visit_statement(ir, func, stmt);
            ir.register_temps_clear();
        }
        if let Some(slot) = close_at_slot {
            ir.add(Opcode::Close, slot as i32, 0, 0, self.line_of(block));
        }
    }

    /// A `lazy var x = <init>` has no getter/setter AST node; the value lives at
    /// `slot`, a compiler-reserved cached flag at `slot + 1` (reserved by `sema2`'s
    /// `assign_one_ivar`).
    fn synthesize_lazy_getter(&mut self, name: &str, slot: u16, init_expr: NodeId) -> FunctionHandle {
        let fo = self.new_function_object(name, 1, 1, 0, false, &[], false);
        let fh = self.arena.push_function(fo);
        let mut ir = IrBuffer::new(1);
        let line = self.line_of(init_expr);
        let flag_c = slot as i32 + 1 + MAX_REGISTERS as i32;
        let value_c = slot as i32 + MAX_REGISTERS as i32;

        let flag_reg = ir.push_temp().unwrap_or(0);
        ir.add(Opcode::Load, flag_reg as i32, SELF_REGISTER as i32, flag_c, line);
        let skip_label = ir.new_label();
        ir.add(Opcode::Jumpf, flag_reg as i32, skip_label as i32, 1, line);
        ir.pop();

        let value_reg = self.visit_expr(&mut ir, fh, init_expr);
        ir.add(Opcode::Store, value_reg as i32, SELF_REGISTER as i32, value_c, line);
        ir.free_register(value_reg);
        let true_reg = ir.add_int(1, line).unwrap_or(0);
        ir.add(Opcode::Store, true_reg as i32, SELF_REGISTER as i32, flag_c, line);
        ir.free_register(true_reg);

        ir.mark_label(skip_label, line);
        let result = ir.push_temp().unwrap_or(0);
        ir.add(Opcode::Load, result as i32, SELF_REGISTER as i32, value_c, line);
        ir.add(Opcode::Ret, result as i32, 0, 0, line);

        self.finalize_function(fh, ir);
        fh
    }

    /// A plain `public var x` gets a default getter/setter pair bound under its own
    /// name, purely so `obj.x` dispatches the same way a computed property would.
    fn synthesize_default_accessor(&mut self, name: &str, slot: u16) -> (FunctionHandle, FunctionHandle) {
        let value_c = slot as i32 + MAX_REGISTERS as i32;

        let getter_fo = self.new_function_object(name, 1, 1, 0, false, &[], false);
        let gh = self.arena.push_function(getter_fo);
        let mut gir = IrBuffer::new(1);
        let dst = gir.push_temp().unwrap_or(0);
        gir.add(Opcode::Load, dst as i32, SELF_REGISTER as i32, value_c, 0);
        gir.add(Opcode::Ret, dst as i32, 0, 0, 0);
        self.finalize_function(gh, gir);

        let setter_fo = self.new_function_object(name, 2, 2, 0, false, &[], false);
        let sh = self.arena.push_function(setter_fo);
        let mut sir = IrBuffer::new(2);
        sir.add(Opcode::Store, 1, SELF_REGISTER as i32, value_c, 0);
        sir.add(Opcode::Ret0, 0, 0, 0, 0);
        self.finalize_function(sh, sir);

        (gh, sh)
    }

    // -------------------------------------------------------------- statements ---

    fn visit_statement(&mut self, ir: &mut IrBuffer, func: FunctionHandle, id: NodeId) {
        let line = self.line_of(id);
        match self.ast.get(id).kind.clone() {
            NodeKind::List { stmts } | NodeKind::Compound { stmts, .. } => {
                for s in stmts {
                    self.visit_statement(ir, func, s);
                    ir.register_temps_clear();
                }
                if let NodeKind::Compound { close_at_slot: Some(slot), .. } = &self.ast.get(id).kind {
                    ir.add(Opcode::Close, *slot as i32, 0, 0, line);
                }
            }
            NodeKind::Empty => {}
            NodeKind::Flow { flow_kind, cond, then_branch, else_branch } => {
                self.visit_flow(ir, func, flow_kind, cond, then_branch, else_branch, line);
            }
            NodeKind::Loop { loop_kind, cond, body, expr, close_at_slot } => {
                self.visit_loop(ir, func, loop_kind, cond, body, expr, close_at_slot, line);
            }
            NodeKind::Jump { jump_kind, expr } => self.visit_jump(ir, func, jump_kind, expr, line),
            NodeKind::Function { identifier, storage, .. } => {
                // A nested function declared directly inside a class/module body
                // walks this path too via `process_class_members`; at statement
                // level (only reachable for module-level bare declarations that
                // weren't lowered to a `var`) just build it, no binding needed.
                if storage != Storage::Extern {
                    let _ = self.build_function(id);
                }
                let _ = identifier;
            }
            NodeKind::VariableDecl { vars, storage, .. } => {
                if storage == Storage::Extern {
                    return;
                }
                for var_id in vars {
                    self.visit_local_var(ir, func, var_id);
                }
            }
            NodeKind::Class { .. } => {
                self.class_handle_for(id);
            }
            NodeKind::Enum { .. } => {}
            NodeKind::Module { .. } => {
                self.emit_error(id, "module declarations are not supported by codegen");
            }
            NodeKind::Label { body, .. } => {
                // The `expr`/label-matching dispatch was already emitted by
                // `visit_switch`; here we only emit the statement guarded by the label.
                if let Some(body_id) = body {
                    self.visit_statement(ir, func, body_id);
                }
            }
            _ => {
                // Bare expression statement.
                let reg = self.visit_expr(ir, func, id);
                ir.free_register(reg);
            }
        }
    }

    fn visit_local_var(&mut self, ir: &mut IrBuffer, func: FunctionHandle, var_id: NodeId) {
        let (slot, init) = match self.ast.get(var_id).kind.clone() {
            NodeKind::Variable { slot_index, init, .. } => (slot_index, init),
            _ => return,
        };
        let line = self.line_of(var_id);
        match init {
            VarInit::Expr(e) => {
                let reg = self.visit_expr(ir, func, e);
                if reg != slot {
                    ir.add(Opcode::Move, slot as i32, reg as i32, 0, line);
                    ir.add_check(line);
                }
                ir.free_register(reg);
            }
            VarInit::Accessor { .. } | VarInit::None => {}
        }
    }

    fn visit_flow(
        &mut self,
        ir: &mut IrBuffer,
        func: FunctionHandle,
        flow_kind: FlowKind,
        cond: NodeId,
        then_branch: NodeId,
        else_branch: Option<NodeId>,
        line: u32,
    ) {
        match flow_kind {
            FlowKind::Switch => self.visit_switch(ir, func, cond, then_branch, line),
            FlowKind::If | FlowKind::Ternary => {
                let cond_reg = self.visit_expr(ir, func, cond);
                let false_label = ir.new_label();
                ir.add(Opcode::Jumpf, cond_reg as i32, false_label as i32, 0, line);
                ir.free_register(cond_reg);
                self.visit_statement(ir, func, then_branch);
                if let Some(else_id) = else_branch {
                    let end_label = ir.new_label();
                    ir.add(Opcode::Jump, end_label as i32, 0, 0, line);
                    ir.mark_label(false_label, line);
                    self.visit_statement(ir, func, else_id);
                    ir.mark_label(end_label, line);
                } else {
                    ir.mark_label(false_label, line);
                }
            }
        }
    }

    /// `switch (scrutinee) { case a: ...; case b: ...; default: ... }`: the body is an
    /// ordinary compound whose `case`/`default` statements are `Label` nodes threaded in
    /// among whatever follows them, so fallthrough (no `break`) is just "keep visiting
    /// the next statement in source order." Dispatch is a flat chain of per-case
    /// `NEQ`+`JUMPF` tests against the scrutinee followed by a jump to whichever label
    /// (a case body, `default`, or the end) matched, per spec.md's switch lowering.
    fn visit_switch(&mut self, ir: &mut IrBuffer, func: FunctionHandle, cond: NodeId, then_branch: NodeId, line: u32) {
        let stmts = match self.ast.get(then_branch).kind.clone() {
            NodeKind::Compound { stmts, .. } | NodeKind::List { stmts } => stmts,
            _ => Vec::new(),
        };

        let scrutinee_reg = self.visit_expr(ir, func, cond);
        ir.register_temp_protect(scrutinee_reg);

        let mut label_marks: std::collections::HashMap<NodeId, u32> = std::collections::HashMap::new();
        let mut default_label = None;
        for &stmt in &stmts {
            if let NodeKind::Label { expr, .. } = self.ast.get(stmt).kind.clone() {
                let case_label = ir.new_label();
                label_marks.insert(stmt, case_label);
                if expr.is_none() {
                    default_label = Some(case_label);
                }
            }
        }

        for &stmt in &stmts {
            let NodeKind::Label { expr: Some(case_expr), .. } = self.ast.get(stmt).kind.clone() else {
                continue;
            };
            let case_label = label_marks[&stmt];
            let case_reg = self.visit_expr(ir, func, case_expr);
            let cmp_reg = ir.push_temp().unwrap_or(0);
            ir.add(Opcode::Neq, cmp_reg as i32, scrutinee_reg as i32, case_reg as i32, line);
            ir.free_register(case_reg);
            ir.add(Opcode::Jumpf, cmp_reg as i32, case_label as i32, 0, line);
            ir.pop();
        }

        let end_label = ir.new_label();
        match default_label {
            Some(label) => ir.add(Opcode::Jump, label as i32, 0, 0, line),
            None => ir.add(Opcode::Jump, end_label as i32, 0, 0, line),
        }

        ir.enter_switch(end_label);
        for &stmt in &stmts {
            if let Some(&label) = label_marks.get(&stmt) {
                ir.mark_label(label, line);
            }
            self.visit_statement(ir, func, stmt);
            ir.register_temps_clear();
        }
        ir.exit_switch();

        ir.mark_label(end_label, line);
        ir.register_temp_unprotect(scrutinee_reg);
        ir.free_register(scrutinee_reg);
    }

    fn visit_loop(
        &mut self,
        ir: &mut IrBuffer,
        func: FunctionHandle,
        loop_kind: LoopKind,
        cond: Option<NodeId>,
        body: NodeId,
        expr: Option<NodeId>,
        close_at_slot: Option<u16>,
        line: u32,
    ) {
        match loop_kind {
            LoopKind::While => {
                let check_label = ir.new_label();
                let false_label = ir.new_label();
                let true_label = ir.new_label();
                ir.mark_label(check_label, line);
                if let Some(c) = cond {
                    let cond_reg = self.visit_expr(ir, func, c);
                    ir.add(Opcode::Jumpf, cond_reg as i32, false_label as i32, 0, line);
                    ir.free_register(cond_reg);
                }
                ir.mark_label(true_label, line);
                ir.enter_loop(true_label, false_label, check_label);
                self.visit_statement(ir, func, body);
                ir.exit_loop();
                ir.add(Opcode::Jump, check_label as i32, 0, 0, line);
                ir.mark_label(false_label, line);
            }
            LoopKind::Repeat => {
                let check_label = ir.new_label();
                let false_label = ir.new_label();
                let true_label = ir.new_label();
                ir.mark_label(true_label, line);
                ir.enter_loop(true_label, false_label, check_label);
                self.visit_statement(ir, func, body);
                ir.exit_loop();
                ir.mark_label(check_label, line);
                if let Some(e) = expr {
                    let cond_reg = self.visit_expr(ir, func, e);
                    ir.add(Opcode::Jumpf, cond_reg as i32, true_label as i32, 1, line);
                    ir.free_register(cond_reg);
                }
                ir.mark_label(false_label, line);
            }
            LoopKind::For => {
                // `for (x in iterable)`: evaluate the iterable once into a
                // protected temp, call `.iterate()`/`.next()` each pass the way a
                // generic for-in construct over a range/list/collection would.
                let iter_expr = expr.expect("for loop always carries the iterated expression");
                let iterable_reg = self.visit_expr(ir, func, iter_expr);
                ir.register_temp_protect(iterable_reg);

                let binder_slot = match cond {
                    Some(c) => match self.ast.get(c).kind.clone() {
                        NodeKind::VariableDecl { vars, .. } => vars
                            .first()
                            .and_then(|&v| match self.ast.get(v).kind {
                                NodeKind::Variable { slot_index, .. } => Some(slot_index),
                                _ => None,
                            }),
                        NodeKind::Identifier { location: Some(loc), .. }
                            if loc.kind == LocationKind::Local =>
                        {
                            Some(loc.slot_index)
                        }
                        _ => None,
                    },
                    None => None,
                };

                let check_label = ir.new_label();
                let false_label = ir.new_label();
                let true_label = ir.new_label();
                ir.mark_label(check_label, line);

                let next_name = self.name_const(func, "next");
                let has_more = ir.push_temp().unwrap_or(0);
                ir.add(Opcode::Load, has_more as i32, iterable_reg as i32, next_name as i32, line);
                ir.add(
                    Opcode::Call,
                    has_more as i32,
                    has_more as i32,
                    1,
                    line,
                );
                ir.add(Opcode::Jumpf, has_more as i32, false_label as i32, 0, line);
                ir.pop();

                if let Some(slot) = binder_slot {
                    let value_name = self.name_const(func, "current");
                    let value_reg = ir.push_temp().unwrap_or(0);
                    ir.add(Opcode::Load, value_reg as i32, iterable_reg as i32, value_name as i32, line);
                    ir.add(Opcode::Call, value_reg as i32, value_reg as i32, 1, line);
                    ir.add(Opcode::Move, slot as i32, value_reg as i32, 0, line);
                    ir.add_check(line);
                    ir.pop();
                }

                ir.mark_label(true_label, line);
                ir.enter_loop(true_label, false_label, check_label);
                self.visit_statement(ir, func, body);
                ir.exit_loop();
                ir.add(Opcode::Jump, check_label as i32, 0, 0, line);
                ir.mark_label(false_label, line);

                if let Some(slot) = close_at_slot {
                    ir.add(Opcode::Close, slot as i32, 0, 0, line);
                }
                ir.register_temp_unprotect(iterable_reg);
                ir.free_register(iterable_reg);
            }
        }
    }

    fn visit_jump(&mut self, ir: &mut IrBuffer, func: FunctionHandle, jump_kind: JumpKind, expr: Option<NodeId>, line: u32) {
        match jump_kind {
            JumpKind::Break => {
                if let Some(target) = ir.break_target() {
                    ir.add(Opcode::Jump, target as i32, 0, 0, line);
                }
            }
            JumpKind::Continue => {
                if let Some(target) = ir.continue_target() {
                    ir.add(Opcode::Jump, target as i32, 0, 0, line);
                }
            }
            JumpKind::Return => match expr {
                Some(e) => {
                    let reg = self.visit_expr(ir, func, e);
                    ir.add(Opcode::Ret, reg as i32, 0, 0, line);
                    ir.free_register(reg);
                }
                None => {
                    ir.add(Opcode::Ret0, 0, 0, 0, line);
                }
            },
        }
    }

    // -------------------------------------------------------------- expressions --

    /// Visits `id` as an expression, returning the register holding its value. The
    /// register is left busy as if it were still live — callers free it themselves
    /// (via `ir.free_register`) once they've consumed it. A local slot is simply
    /// returned as-is; nothing needs freeing in that case.
    fn visit_expr(&mut self, ir: &mut IrBuffer, func: FunctionHandle, id: NodeId) -> u16 {
        let line = self.line_of(id);
        match self.ast.get(id).kind.clone() {
            NodeKind::Literal { value } => self.visit_literal(ir, func, &value, line),
            NodeKind::KeywordExpr { keyword } => self.visit_keyword(ir, keyword, line),
            NodeKind::Identifier { .. } => self.visit_identifier_load(ir, func, id, line),
            NodeKind::Binary { op, left, right } => self.visit_binary(ir, func, op, left, right, id, line),
            NodeKind::Unary { op, expr } => self.visit_unary(ir, func, op, expr, line),
            NodeKind::FileRef { parts } => {
                let text = parts.join(".");
                let cidx = self.arena.function_mut(func).constants.add(Value::string(text));
                ir.add_constant(cidx, line).unwrap_or(0)
            }
            NodeKind::ListExpr { is_map, keys, values } => self.visit_list_expr(ir, func, is_map, keys, values, line),
            NodeKind::Postfix { base, subops } => self.visit_postfix(ir, func, base, &subops, id, false),
            NodeKind::Function { .. } => {
                let fh = self.build_function(id);
                let cidx = self.arena.function_mut(func).constants.add(Value::Function(fh));
                let dst = ir.push_temp().unwrap_or(0);
                ir.add(Opcode::Closure, dst as i32, cidx as i32, 0, line);
                dst
            }
            NodeKind::Class { .. } => {
                let ch = self.class_handle_for(id);
                let cidx = self.arena.function_mut(func).constants.add(Value::Class(ch));
                ir.add_constant(cidx, line).unwrap_or(0)
            }
            _ => ir.add_int(0, line).unwrap_or(0),
        }
    }

    fn visit_literal(&mut self, ir: &mut IrBuffer, func: FunctionHandle, value: &LiteralValue, line: u32) -> u16 {
        match value {
            LiteralValue::Int(n) => ir.add_int(*n, line).unwrap_or(0),
            LiteralValue::Double(d) => ir.add_double(*d, line).unwrap_or(0),
            LiteralValue::Bool(b) => {
                let cidx = self.arena.function_mut(func).constants.add(Value::Bool(*b));
                ir.add_constant(cidx, line).unwrap_or(0)
            }
            LiteralValue::String(s) => {
                let cidx = self.arena.function_mut(func).constants.add(Value::string(s.clone()));
                ir.add_constant(cidx, line).unwrap_or(0)
            }
            LiteralValue::InterpolatedList(parts) => self.visit_interpolation(ir, func, parts, line),
        }
    }

    /// `"a\(x)b"` lowers to building a list of the component expressions then a
    /// single `join()` call on it, rather than threading a dedicated opcode through
    /// the VM for string concatenation.
    fn visit_interpolation(&mut self, ir: &mut IrBuffer, func: FunctionHandle, parts: &[NodeId], line: u32) -> u16 {
        let list_reg = ir.push_temp().unwrap_or(0);
        ir.add(Opcode::Listnew, list_reg as i32, parts.len() as i32, 0, line);
        for (i, &part) in parts.iter().enumerate() {
            let value_reg = self.visit_expr(ir, func, part);
            ir.add(Opcode::Setlist, list_reg as i32, i as i32, value_reg as i32, line);
            ir.free_register(value_reg);
        }
        let join_name = self.name_const(func, "join");
        let callee = ir.push_temp().unwrap_or(0);
        ir.add(Opcode::Load, callee as i32, list_reg as i32, join_name as i32, line);
        let frame = ir.push_contiguous(1).unwrap_or(callee);
        if frame != callee {
            ir.add(Opcode::Move, frame as i32, callee as i32, 0, line);
            ir.free_register(callee);
        }
        ir.add(Opcode::Move, frame as i32 + 1, list_reg as i32, 0, line);
        ir.add(Opcode::Call, frame as i32, frame as i32, 1, line);
        ir.free_register(list_reg);
        frame
    }

    fn visit_list_expr(
        &mut self,
        ir: &mut IrBuffer,
        func: FunctionHandle,
        is_map: bool,
        keys: Vec<NodeId>,
        values: Vec<NodeId>,
        line: u32,
    ) -> u16 {
        let dst = ir.push_temp().unwrap_or(0);
        if is_map {
            ir.add(Opcode::Mapnew, dst as i32, values.len() as i32, 0, line);
            for (k, v) in keys.iter().zip(values.iter()) {
                let key_reg = self.visit_expr(ir, func, *k);
                let val_reg = self.visit_expr(ir, func, *v);
                ir.add(Opcode::Setlist, dst as i32, key_reg as i32, val_reg as i32, line);
                ir.free_register(val_reg);
                ir.free_register(key_reg);
            }
        } else {
            ir.add(Opcode::Listnew, dst as i32, values.len() as i32, 0, line);
            for (i, v) in values.iter().enumerate() {
                let val_reg = self.visit_expr(ir, func, *v);
                ir.add(Opcode::Setlist, dst as i32, i as i32, val_reg as i32, line);
                ir.free_register(val_reg);
            }
        }
        dst
    }

    fn visit_keyword(&mut self, ir: &mut IrBuffer, keyword: crate::token::Keyword, line: u32) -> u16 {
        use crate::token::Keyword::*;
        match keyword {
            Null => {
                let dst = ir.push_temp().unwrap_or(0);
                ir.add(Opcode::Loadk, dst as i32, lumen_runtime::sentinel::NULL_TAG as i32, 0, line);
                dst
            }
            True => {
                let dst = ir.push_temp().unwrap_or(0);
                ir.add(Opcode::Loadk, dst as i32, lumen_runtime::sentinel::TRUE_TAG as i32, 0, line);
                dst
            }
            False => {
                let dst = ir.push_temp().unwrap_or(0);
                ir.add(Opcode::Loadk, dst as i32, lumen_runtime::sentinel::FALSE_TAG as i32, 0, line);
                dst
            }
            Undefined => {
                let dst = ir.push_temp().unwrap_or(0);
                ir.add(Opcode::Loadk, dst as i32, lumen_runtime::sentinel::UNDEFINED_TAG as i32, 0, line);
                dst
            }
            Args => {
                let dst = ir.push_temp().unwrap_or(0);
                ir.add(Opcode::Loadk, dst as i32, lumen_runtime::sentinel::ARGUMENTS_TAG as i32, 0, line);
                dst
            }
            Func_ => {
                let dst = ir.push_temp().unwrap_or(0);
                ir.add(Opcode::Loadk, dst as i32, lumen_runtime::sentinel::FUNC_TAG as i32, 0, line);
                dst
            }
            Super => SELF_REGISTER,
            _ => ir.add_int(0, line).unwrap_or(0),
        }
    }

    fn visit_identifier_load(&mut self, ir: &mut IrBuffer, func: FunctionHandle, id: NodeId, line: u32) -> u16 {
        let (name, location, symbol) = match self.ast.get(id).kind.clone() {
            NodeKind::Identifier { name, location, symbol, .. } => (name, location, symbol),
            _ => return ir.add_int(0, line).unwrap_or(0),
        };
        let Some(loc) = location else {
            self.emit_error(id, format!("Identifier {name} was never resolved."));
            return ir.add_int(0, line).unwrap_or(0);
        };
        match loc.kind {
            LocationKind::Local => loc.slot_index,
            LocationKind::Global => {
                // A global naming a class/enum/function declaration is a
                // compile-time constant; everything else round-trips through the
                // module's global table by name.
                if let Some(sym) = symbol {
                    match self.ast.get(sym).kind.clone() {
                        NodeKind::Class { .. } => {
                            let ch = self.class_handle_for(sym);
                            let cidx = self.arena.function_mut(func).constants.add(Value::Class(ch));
                            return ir.add_constant(cidx, line).unwrap_or(0);
                        }
                        NodeKind::Enum { symtab, .. } => {
                            self.emit_error(id, "Enum type referenced without a member access.");
                            let _ = symtab;
                            return ir.add_int(0, line).unwrap_or(0);
                        }
                        _ => {}
                    }
                }
                let name_idx = self.name_const(func, &name);
                let dst = ir.push_temp().unwrap_or(0);
                ir.add(Opcode::Loadg, dst as i32, name_idx as i32, 0, line);
                dst
            }
            LocationKind::Upvalue => {
                let dst = ir.push_temp().unwrap_or(0);
                ir.add(Opcode::Loadu, dst as i32, loc.slot_index as i32, 0, line);
                dst
            }
            LocationKind::ClassIvarSame | LocationKind::ClassIvarOuter => {
                let self_reg = self.walk_outer(ir, loc.nup, line);
                let dst = ir.push_temp().unwrap_or(0);
                if loc.slot_index == NOT_IVAR_SLOT {
                    let name_idx = self.name_const(func, &name);
                    let key_reg = ir.add_constant(name_idx, line).unwrap_or(0);
                    ir.add(Opcode::Load, dst as i32, self_reg as i32, key_reg as i32, line);
                    ir.free_register(key_reg);
                } else {
                    let c = loc.slot_index as i32 + MAX_REGISTERS as i32;
                    ir.add(Opcode::Load, dst as i32, self_reg as i32, c, line);
                }
                if self_reg != SELF_REGISTER {
                    ir.free_register(self_reg);
                }
                dst
            }
        }
    }

    /// Walks `nup` `outer` hops starting from `self` (register 0), used by both
    /// bare-identifier ivar access crossing class boundaries and postfix chains
    /// rooted at such an identifier. Slot 0 is always the hidden `outer` ivar a
    /// nested class carries.
    fn walk_outer(&mut self, ir: &mut IrBuffer, nup: u16, line: u32) -> u16 {
        if nup == 0 {
            return SELF_REGISTER;
        }
        let mut reg = SELF_REGISTER;
        let mut tmp = 0;
        for i in 0..nup {
            let dst = ir.push_temp().unwrap_or(0);
            ir.add(Opcode::Load, dst as i32, reg as i32, MAX_REGISTERS as i32, line);
            if i > 0 {
                ir.free_register(tmp);
            }
            tmp = dst;
            reg = dst;
        }
        reg
    }

    fn visit_unary(&mut self, ir: &mut IrBuffer, func: FunctionHandle, op: Operator, expr: NodeId, line: u32) -> u16 {
        let src = self.visit_expr(ir, func, expr);
        let dst = ir.push_temp().unwrap_or(0);
        let opcode = match op {
            Operator::Minus => Opcode::Neg,
            Operator::Bang => Opcode::Not,
            Operator::Tilde => Opcode::Bnot,
            Operator::Plus => {
                ir.free_register(dst);
                return src;
            }
            _ => Opcode::Not,
        };
        ir.add(opcode, dst as i32, src as i32, 0, line);
        ir.free_register(src);
        dst
    }

    fn visit_binary(
        &mut self,
        ir: &mut IrBuffer,
        func: FunctionHandle,
        op: Operator,
        left: NodeId,
        right: NodeId,
        node: NodeId,
        line: u32,
    ) -> u16 {
        if op == Operator::Assign {
            let rhs = self.visit_expr(ir, func, right);
            return self.emit_store(ir, func, left, rhs, line);
        }
        if matches!(op, Operator::And | Operator::Or) {
            return self.visit_short_circuit(ir, func, op, left, right, line);
        }
        if matches!(op, Operator::RangeExcl | Operator::RangeIncl) {
            let from = self.visit_expr(ir, func, left);
            let to = self.visit_expr(ir, func, right);
            let dst = ir.push_temp().unwrap_or(0);
            let tag = if op == Operator::RangeIncl { Tag::RangeInclude } else { Tag::RangeExclude };
            ir.add_tag(Opcode::Rangenew, dst as i32, from as i32, to as i32, tag, line);
            ir.free_register(to);
            ir.free_register(from);
            return dst;
        }

        let lreg = self.visit_expr(ir, func, left);
        let rreg = self.visit_expr(ir, func, right);
        let dst = ir.push_temp().unwrap_or(0);
        let opcode = binary_opcode(op);
        ir.add(opcode, dst as i32, lreg as i32, rreg as i32, line);
        ir.free_register(rreg);
        ir.free_register(lreg);
        let _ = node;
        dst
    }

    fn visit_short_circuit(&mut self, ir: &mut IrBuffer, func: FunctionHandle, op: Operator, left: NodeId, right: NodeId, line: u32) -> u16 {
        let lreg = self.visit_expr(ir, func, left);
        let dst = ir.push_temp().unwrap_or(0);
        ir.add(Opcode::Move, dst as i32, lreg as i32, 0, line);
        ir.free_register(lreg);
        let end_label = ir.new_label();
        let want_short_circuit_on = if op == Operator::Or { 1 } else { 0 };
        ir.add(Opcode::Jumpf, dst as i32, end_label as i32, want_short_circuit_on, line);
        let rreg = self.visit_expr(ir, func, right);
        ir.add(Opcode::Move, dst as i32, rreg as i32, 0, line);
        ir.free_register(rreg);
        ir.mark_label(end_label, line);
        dst
    }

    /// Assigns `rhs_reg`'s value into the lvalue `target`, returning the register
    /// holding the assignment's own value (assignment is an expression).
    fn emit_store(&mut self, ir: &mut IrBuffer, func: FunctionHandle, target: NodeId, rhs_reg: u16, line: u32) -> u16 {
        match self.ast.get(target).kind.clone() {
            NodeKind::Identifier { location: Some(loc), name, .. } => match loc.kind {
                LocationKind::Local => {
                    if loc.slot_index != rhs_reg {
                        ir.add(Opcode::Move, loc.slot_index as i32, rhs_reg as i32, 0, line);
                        ir.add_check(line);
                    }
                    ir.free_register(rhs_reg);
                    loc.slot_index
                }
                LocationKind::Global => {
                    let name_idx = self.name_const(func, &name);
                    ir.add(Opcode::Storeg, rhs_reg as i32, name_idx as i32, 0, line);
                    rhs_reg
                }
                LocationKind::Upvalue => {
                    ir.add(Opcode::Storeu, rhs_reg as i32, loc.slot_index as i32, 0, line);
                    rhs_reg
                }
                LocationKind::ClassIvarSame | LocationKind::ClassIvarOuter => {
                    let self_reg = self.walk_outer(ir, loc.nup, line);
                    if loc.slot_index == NOT_IVAR_SLOT {
                        let name_idx = self.name_const(func, &name);
                        let key_reg = ir.add_constant(name_idx, line).unwrap_or(0);
                        ir.add(Opcode::Store, rhs_reg as i32, self_reg as i32, key_reg as i32, line);
                        ir.free_register(key_reg);
                    } else {
                        let c = loc.slot_index as i32 + MAX_REGISTERS as i32;
                        ir.add(Opcode::Store, rhs_reg as i32, self_reg as i32, c, line);
                    }
                    if self_reg != SELF_REGISTER {
                        ir.free_register(self_reg);
                    }
                    rhs_reg
                }
            },
            NodeKind::Postfix { base, subops } => self.visit_postfix_store(ir, func, base, &subops, rhs_reg, line),
            _ => rhs_reg,
        }
    }

    /// One link's worth of postfix-chain state: `value` is what the link just
    /// produced (the thing a following `Access`/`Subscript` reads from, or a
    /// following `Call` invokes), `receiver` is the object it was fetched *off of*
    /// — what a following `Call` passes as `self`. For a fresh base they're the
    /// same register; `Access` is the only sub-op that splits them, since that's
    /// the one case where "the value to call" and "the object to call it on"
    /// genuinely differ (`obj.method(...)`).
    fn visit_postfix_link(&mut self, ir: &mut IrBuffer, func: FunctionHandle, base: NodeId, subops: &[NodeId], line: u32) -> (u16, u16) {
        if let Some((value, rest)) = self.fold_enum_member_access(ir, func, base, subops, line) {
            let mut link = (value, value);
            for &sub in rest {
                link = self.visit_subop(ir, func, link, sub, line, false);
            }
            return link;
        }
        let (reg, is_super) = self.postfix_base_register(ir, func, base, line);
        let mut link = (reg, reg);
        for (i, &sub) in subops.iter().enumerate() {
            link = self.visit_subop(ir, func, link, sub, line, i == 0 && is_super);
        }
        link
    }

    fn visit_postfix(&mut self, ir: &mut IrBuffer, func: FunctionHandle, base: NodeId, subops: &[NodeId], _node: NodeId, _for_store: bool) -> u16 {
        let line = self.line_of(base);
        let (value, receiver) = self.visit_postfix_link(ir, func, base, subops, line);
        if receiver != value && receiver != SELF_REGISTER {
            ir.free_register(receiver);
        }
        value
    }

    fn visit_postfix_store(&mut self, ir: &mut IrBuffer, func: FunctionHandle, base: NodeId, subops: &[NodeId], rhs_reg: u16, line: u32) -> u16 {
        if subops.is_empty() {
            return rhs_reg;
        }
        let (self_reg, receiver) = self.visit_postfix_link(ir, func, base, &subops[..subops.len() - 1], line);
        let last = *subops.last().unwrap();
        match self.ast.get(last).kind.clone() {
            NodeKind::PostfixSubOp { kind: SubOpKind::Access(name) } => {
                let name_idx = self.name_const(func, &name);
                let key_reg = ir.add_constant(name_idx, line).unwrap_or(0);
                ir.add(Opcode::Store, rhs_reg as i32, self_reg as i32, key_reg as i32, line);
                ir.free_register(key_reg);
            }
            NodeKind::PostfixSubOp { kind: SubOpKind::Subscript(idx) } => {
                let idx_reg = self.visit_expr(ir, func, idx);
                ir.add(Opcode::Storeat, rhs_reg as i32, self_reg as i32, idx_reg as i32, line);
                ir.free_register(idx_reg);
            }
            _ => {}
        }
        if self_reg != SELF_REGISTER {
            ir.free_register(self_reg);
        }
        if receiver != self_reg && receiver != SELF_REGISTER {
            ir.free_register(receiver);
        }
        rhs_reg
    }

    /// Computes the register/self used for the *first* link of a postfix chain,
    /// plus whether that base was the literal `super` keyword. `self.x`/bare-ivar
    /// bases resolve to register 0 (or the walked `outer` chain) directly, without
    /// a separate generic evaluation — matching how the identifier load for those
    /// cases would already read `self`. A `super` base shares register 0 with
    /// plain `self`, so the distinction has to travel alongside the register:
    /// it picks `LOADS` over `LOAD` for the chain's first member access, so the
    /// method lookup starts at the superclass's table instead of the receiver's
    /// dynamic class.
    fn postfix_base_register(&mut self, ir: &mut IrBuffer, func: FunctionHandle, base: NodeId, line: u32) -> (u16, bool) {
        match self.ast.get(base).kind.clone() {
            NodeKind::Identifier { location: Some(loc), .. }
                if matches!(loc.kind, LocationKind::ClassIvarSame | LocationKind::ClassIvarOuter) =>
            {
                (self.walk_outer(ir, loc.nup, line), false)
            }
            NodeKind::KeywordExpr { keyword: crate::token::Keyword::Super } => (SELF_REGISTER, true),
            _ => (self.visit_expr(ir, func, base), false),
        }
    }

    fn visit_subop(&mut self, ir: &mut IrBuffer, func: FunctionHandle, link: (u16, u16), sub: NodeId, line: u32, is_super: bool) -> (u16, u16) {
        let (self_reg, receiver) = link;
        match self.ast.get(sub).kind.clone() {
            NodeKind::PostfixSubOp { kind: SubOpKind::Access(name) } => {
                let name_idx = self.name_const(func, &name);
                let key_reg = ir.add_constant(name_idx, line).unwrap_or(0);
                let dst = ir.push_temp().unwrap_or(0);
                let op = if is_super { Opcode::Loads } else { Opcode::Load };
                ir.add(op, dst as i32, self_reg as i32, key_reg as i32, line);
                ir.free_register(key_reg);
                if receiver != self_reg && receiver != SELF_REGISTER {
                    ir.free_register(receiver);
                }
                // `self_reg` becomes the receiver for a following `Call` — kept
                // alive rather than freed here.
                (dst, self_reg)
            }
            NodeKind::PostfixSubOp { kind: SubOpKind::Subscript(idx) } => {
                let idx_reg = self.visit_expr(ir, func, idx);
                let dst = ir.push_temp().unwrap_or(0);
                ir.add(Opcode::Loadat, dst as i32, self_reg as i32, idx_reg as i32, line);
                ir.free_register(idx_reg);
                if self_reg != SELF_REGISTER {
                    ir.free_register(self_reg);
                }
                if receiver != self_reg && receiver != SELF_REGISTER {
                    ir.free_register(receiver);
                }
                (dst, dst)
            }
            NodeKind::PostfixSubOp { kind: SubOpKind::Call(args) } => {
                let frame = ir.push_contiguous(args.len() as u16 + 1).unwrap_or(self_reg);
                if frame != self_reg {
                    ir.add(Opcode::Move, frame as i32, self_reg as i32, 0, line);
                    if self_reg != SELF_REGISTER {
                        ir.free_register(self_reg);
                    }
                }
                ir.add(Opcode::Move, frame as i32 + 1, receiver as i32, 0, line);
                if receiver != self_reg && receiver != SELF_REGISTER {
                    ir.free_register(receiver);
                }
                for (i, &arg) in args.iter().enumerate() {
                    let areg = self.visit_expr(ir, func, arg);
                    ir.add(Opcode::Move, frame as i32 + 2 + i as i32, areg as i32, 0, line);
                    ir.free_register(areg);
                }
                ir.add(Opcode::Call, frame as i32, frame as i32, args.len() as i32 + 1, line);
                (frame, frame)
            }
            _ => (self_reg, receiver),
        }
    }
}

fn binary_opcode(op: Operator) -> Opcode {
    use Operator::*;
    match op {
        Plus => Opcode::Add,
        Minus => Opcode::Sub,
        Star => Opcode::Mul,
        Slash => Opcode::Div,
        Percent => Opcode::Rem,
        Amp => Opcode::Band,
        Pipe => Opcode::Bor,
        Caret => Opcode::Bxor,
        Shl => Opcode::Lshift,
        Shr => Opcode::Rshift,
        Lt => Opcode::Lt,
        Gt => Opcode::Gt,
        Leq => Opcode::Leq,
        Geq => Opcode::Geq,
        Eq => Opcode::Eq,
        Neq => Opcode::Neq,
        StrictEq => Opcode::Eqq,
        StrictNeq => Opcode::Neqq,
        Is => Opcode::Isa,
        TildeAssign => Opcode::Match,
        _ => Opcode::Eq,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CompilerConfig;
    use crate::delegate::Delegate;
    use crate::error::ErrorSink;
    use crate::symtab::SymTabArena;
    use crate::{parser, sema1, sema2};

    fn compile(source: &str) -> Option<ModuleClosure> {
        let mut delegate = Delegate::default();
        let out = parser::parse(source, 0, &mut delegate);
        let mut ast = out.ast;
        let mut symtabs = SymTabArena::new();
        let mut errors = ErrorSink::new();
        let global = sema1::run(&mut ast, &mut symtabs, &out.root, &mut errors);
        let config = CompilerConfig::new();
        sema2::run(&mut ast, &mut symtabs, global, &out.root, &config, &mut errors);
        if errors.has_errors() {
            return None;
        }
        generate(&mut ast, &symtabs, &out.root, &config, &mut errors)
    }

    #[test]
    fn simple_return_folds_to_one_instruction() {
        let closure = compile("func f() { return 1 + 2; }").expect("compiles");
        let arena = closure.arena();
        let f = arena
            .functions()
            .find(|(_, f)| f.identifier == "f")
            .expect("function f exists")
            .1;
        assert!(f.is_encoded());
        assert!(f.instruction_count() <= 3, "1+2 should fold to a single LOADI+RET");
    }

    #[test]
    fn class_with_superclass_links_handles() {
        let closure = compile("class A { var x = 1; } class B : A { var y = 2; }").expect("compiles");
        let arena = closure.arena();
        let (_, a) = arena.classes().find(|(_, c)| c.identifier == "A").unwrap();
        let (b_handle, b) = arena.classes().find(|(_, c)| c.identifier == "B").unwrap();
        assert!(b.superclass.is_some());
        assert_eq!(arena.class(b.superclass.unwrap()).identifier, a.identifier);
        assert_ne!(b_handle.index(), 0);
    }

    #[test]
    fn module_init_stores_top_level_function_global() {
        let closure = compile("func greet() { return \"hi\"; }").expect("compiles");
        let entry = closure.entry_function();
        assert!(entry.is_encoded());
        assert!(entry.instruction_count() > 0);
    }

    #[test]
    fn public_ivar_gets_default_accessor_pair() {
        let closure = compile("class Point { var x = 0; }").expect("compiles");
        let arena = closure.arena();
        let (_, point) = arena.classes().find(|(_, c)| c.identifier == "Point").unwrap();
        match point.lookup("x") {
            Some(lumen_runtime::Bound::Property { setter: Some(_), .. }) => {}
            other => panic!("expected a bound default accessor, got {other:?}"),
        }
    }

    #[test]
    fn field_default_synthesizes_dollar_init_and_default_init() {
        let closure = compile("class Point { var x = 5; }").expect("compiles");
        let arena = closure.arena();
        let (_, point) = arena.classes().find(|(_, c)| c.identifier == "Point").unwrap();
        match point.lookup("$init") {
            Some(Bound::Method(fh)) => {
                let f = arena.function(*fh);
                assert!(f.is_encoded());
                assert!(f.instruction_count() > 0, "$init should STORE the default");
            }
            other => panic!("expected a synthesized $init, got {other:?}"),
        }
        match point.lookup("init") {
            Some(Bound::Method(fh)) => {
                let f = arena.function(*fh);
                assert!(f.is_encoded(), "default init calling $init should be synthesized");
            }
            other => panic!("expected a synthesized default init, got {other:?}"),
        }
    }

    #[test]
    fn subclass_dollar_init_embeds_superclass_dollar_init() {
        let closure = compile("class A { var x = 1; } class B : A { var y = 2; }").expect("compiles");
        let arena = closure.arena();
        let (_, a) = arena.classes().find(|(_, c)| c.identifier == "A").unwrap();
        let (_, b) = arena.classes().find(|(_, c)| c.identifier == "B").unwrap();
        let a_init = match a.lookup("$init") {
            Some(Bound::Method(fh)) => *fh,
            other => panic!("expected A to have its own $init, got {other:?}"),
        };
        let b_init = match b.lookup("$init") {
            Some(Bound::Method(fh)) => *fh,
            other => panic!("expected B to have its own $init, got {other:?}"),
        };
        let b_init_fn = arena.function(b_init);
        assert!(
            b_init_fn.constants.iter().any(|v| *v == Value::Function(a_init)),
            "B's $init should reference A's $init function directly"
        );
    }

    #[test]
    fn user_init_chains_into_own_dollar_init() {
        let closure =
            compile("class Point { var x = 1; func init() { } }").expect("compiles");
        let arena = closure.arena();
        let (_, point) = arena.classes().find(|(_, c)| c.identifier == "Point").unwrap();
        let dollar_init = match point.lookup("$init") {
            Some(Bound::Method(fh)) => *fh,
            other => panic!("expected Point to have its own $init, got {other:?}"),
        };
        let init = match point.lookup("init") {
            Some(Bound::Method(fh)) => *fh,
            other => panic!("expected Point to have a user init, got {other:?}"),
        };
        let _ = dollar_init;
        let init_fn = arena.function(init);
        assert!(
            init_fn.constants.iter().any(|v| matches!(v, Value::String(s) if &**s == "$init")),
            "user init should call $init by name"
        );
    }
}
