//! IR instruction model and per-function code buffer.
//!
//! The register allocator keeps the original's semantics — temps are the lowest free
//! register above the local range, a context frame freezes a set of temps until the
//! enclosing expression completes, and `temp_protect` survives statement boundaries for
//! loop-carried locals (`$e`, `$v` in the `for` lowering) — through three primitives: a
//! register-busy bitmap, a register-stack (the emit-time virtual expression stack), and
//! a context-bitmap stack.

/// Register operand fields are wire-encoded in 8 bits.
pub const MAX_REGISTERS: usize = 256;
pub const MAX_LOCALS: u16 = 200;
pub const MAX_UPVALUES: u16 = 200;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Opcode {
    Halt,
    Nop,
    Ret0,
    Ret,
    Jump,
    Loadk,
    Loadg,
    Storeg,
    Loadu,
    Storeu,
    Mapnew,
    Listnew,
    Closure,
    Close,
    Check,
    Move,
    Loadi,
    Jumpf,
    Rangenew,
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    And,
    Or,
    Lt,
    Gt,
    Eq,
    Leq,
    Geq,
    Neq,
    Eqq,
    Neqq,
    Isa,
    Match,
    Lshift,
    Rshift,
    Bor,
    Band,
    Bnot,
    Bxor,
    Neg,
    Not,
    Load,
    Store,
    Loads,
    Loadat,
    Storeat,
    Call,
    Setlist,
}

impl Opcode {
    /// Does this opcode read or write through a register rather than operate purely on
    /// temps.
    pub fn is_impure(self) -> bool {
        matches!(
            self,
            Opcode::Load
                | Opcode::Store
                | Opcode::Loadg
                | Opcode::Storeg
                | Opcode::Loadu
                | Opcode::Storeu
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tag {
    None,
    Int,
    Double,
    Label,
    Skip,
    RangeInclude,
    RangeExclude,
    PragmaMoveOptimization,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Payload {
    None,
    Int(i64),
    Double(f64),
}

/// One unpacked IR instruction, before the optimizer/encoder bit-packs it into a word.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Instr {
    pub opcode: Opcode,
    pub tag: Tag,
    pub p1: i32,
    pub p2: i32,
    pub p3: i32,
    pub payload: Payload,
    pub line: u32,
}

/// The per-function IR code buffer codegen emits into.
#[derive(Debug)]
pub struct IrBuffer {
    code: Vec<Instr>,
    true_labels: Vec<u32>,
    false_labels: Vec<u32>,
    check_labels: Vec<u32>,
    label_counter: u32,
    maxtemp: u16,
    nlocals: u16,
    error: Option<String>,
    register_busy: [bool; MAX_REGISTERS],
    register_protected: [bool; MAX_REGISTERS],
    register_skip_clear: [bool; MAX_REGISTERS],
    register_stack: Vec<u16>,
    context_stack: Vec<[bool; MAX_REGISTERS]>,
}

impl IrBuffer {
    pub fn new(nlocals: u16) -> Self {
        IrBuffer {
            code: Vec::new(),
            true_labels: Vec::new(),
            false_labels: Vec::new(),
            check_labels: Vec::new(),
            label_counter: 0,
            maxtemp: nlocals,
            nlocals,
            error: None,
            register_busy: [false; MAX_REGISTERS],
            register_protected: [false; MAX_REGISTERS],
            register_skip_clear: [false; MAX_REGISTERS],
            register_stack: Vec::new(),
            context_stack: Vec::new(),
        }
    }

    pub fn has_error(&self) -> bool {
        self.error.is_some()
    }

    pub fn take_error(&mut self) -> Option<String> {
        self.error.take()
    }

    pub fn instructions(&self) -> &[Instr] {
        &self.code
    }

    /// Mutable view for the optimizer, which rewrites instructions in place.
    pub fn instructions_mut(&mut self) -> &mut [Instr] {
        &mut self.code
    }

    pub fn maxtemp(&self) -> u16 {
        self.maxtemp
    }

    // --- Register stack ---

    /// Allocate a fresh temp register (lowest free register above the local range),
    /// mark it busy, and push it onto the emit-time expression stack.
    pub fn push_temp(&mut self) -> Result<u16, String> {
        for r in self.nlocals..MAX_REGISTERS as u16 {
            if !self.register_busy[r as usize] {
                self.register_busy[r as usize] = true;
                self.register_stack.push(r);
                self.maxtemp = self.maxtemp.max(r + 1);
                return Ok(r);
            }
        }
        self.error = Some("maximum number of registers used".to_string());
        Err("maximum number of registers used".to_string())
    }

    /// Push an already-live register (e.g. a local slot) onto the expression stack
    /// without affecting its busy/protected state.
    pub fn push(&mut self, reg: u16) {
        self.register_stack.push(reg);
    }

    fn pop_raw(&mut self) -> u16 {
        self.register_stack
            .pop()
            .expect("pop from empty register stack")
    }

    fn maybe_free(&mut self, r: u16) {
        if r >= self.nlocals
            && !self.register_protected[r as usize]
            && !self.register_skip_clear[r as usize]
        {
            self.register_busy[r as usize] = false;
        }
    }

    pub fn pop(&mut self) -> u16 {
        let r = self.pop_raw();
        self.maybe_free(r);
        r
    }

    /// Pop, and when `protect` flag the popped register in the current context bitmap
    /// so it is freed only when that context is popped.
    pub fn pop_context_protect(&mut self, protect: bool) -> u16 {
        let r = self.pop_raw();
        if protect && r >= self.nlocals {
            self.register_protected[r as usize] = true;
            if let Some(ctx) = self.context_stack.last_mut() {
                ctx[r as usize] = true;
            }
        } else {
            self.maybe_free(r);
        }
        r
    }

    /// Allocate `count` consecutive free temp registers (for a `CALL`'s
    /// self+argument window, which the wire format requires to be contiguous), mark
    /// them all busy, and return the first. Does not touch the register stack —
    /// callers place results into the window explicitly.
    pub fn push_contiguous(&mut self, count: u16) -> Result<u16, String> {
        if count == 0 {
            return self.push_temp();
        }
        let mut start = self.nlocals;
        'search: while start as usize + count as usize <= MAX_REGISTERS {
            for r in start..start + count {
                if self.register_busy[r as usize] {
                    start = r + 1;
                    continue 'search;
                }
            }
            for r in start..start + count {
                self.register_busy[r as usize] = true;
            }
            self.maxtemp = self.maxtemp.max(start + count);
            return Ok(start);
        }
        self.error = Some("maximum number of registers used".to_string());
        Err("maximum number of registers used".to_string())
    }

    /// Free a register allocated via `push_contiguous` that isn't being kept alive on
    /// the register stack (e.g. an argument slot consumed by `CALL`).
    pub fn free_register(&mut self, reg: u16) {
        self.maybe_free(reg);
    }

    // --- Context stack ---

    pub fn push_context(&mut self) {
        self.context_stack.push([false; MAX_REGISTERS]);
    }

    pub fn pop_context(&mut self) {
        let ctx = self
            .context_stack
            .pop()
            .expect("pop_context without matching push_context");
        for (r, &flagged) in ctx.iter().enumerate() {
            if flagged {
                self.register_protected[r] = false;
                if !self.register_skip_clear[r] {
                    self.register_busy[r] = false;
                }
            }
        }
    }

    pub fn register_protect_in_context(&mut self, reg: u16) {
        self.register_protected[reg as usize] = true;
        if let Some(ctx) = self.context_stack.last_mut() {
            ctx[reg as usize] = true;
        }
    }

    /// Hand a register's protection to the context one level up the stack (used when a
    /// postfix sub-op's result must outlive its immediate context, e.g. the receiver of
    /// a chained call).
    pub fn register_protect_outside_context(&mut self, reg: u16) {
        self.register_protected[reg as usize] = true;
        if self.context_stack.len() >= 2 {
            let idx = self.context_stack.len() - 2;
            self.context_stack[idx][reg as usize] = true;
        }
    }

    /// Free every temp register not flagged `skip-clear` (called at each statement
    /// boundary).
    pub fn register_temps_clear(&mut self) {
        for r in self.nlocals as usize..MAX_REGISTERS {
            if !self.register_skip_clear[r] {
                self.register_busy[r] = false;
                self.register_protected[r] = false;
            }
        }
    }

    /// `skip-clear` survives statement boundaries; used for long-lived loop temps.
    pub fn register_temp_protect(&mut self, reg: u16) {
        self.register_skip_clear[reg as usize] = true;
    }

    pub fn register_temp_unprotect(&mut self, reg: u16) {
        self.register_skip_clear[reg as usize] = false;
        self.register_busy[reg as usize] = false;
    }

    // --- Labels ---

    pub fn new_label(&mut self) -> u32 {
        let id = self.label_counter;
        self.label_counter += 1;
        id
    }

    pub fn mark_label(&mut self, id: u32, line: u32) {
        self.code.push(Instr {
            opcode: Opcode::Nop,
            tag: Tag::Label,
            p1: id as i32,
            p2: 0,
            p3: 0,
            payload: Payload::None,
            line,
        });
    }

    /// `break` jumps to the top "false" label, `continue` to the top "check" label
    ///.
    pub fn enter_loop(&mut self, true_label: u32, false_label: u32, check_label: u32) {
        self.true_labels.push(true_label);
        self.false_labels.push(false_label);
        self.check_labels.push(check_label);
    }

    pub fn exit_loop(&mut self) {
        self.true_labels.pop();
        self.false_labels.pop();
        self.check_labels.pop();
    }

    pub fn break_target(&self) -> Option<u32> {
        self.false_labels.last().copied()
    }

    pub fn continue_target(&self) -> Option<u32> {
        self.check_labels.last().copied()
    }

    /// `switch` only ever installs a `break` target; `continue` inside a switch must
    /// still reach whatever loop (if any) lexically encloses it, so this leaves
    /// `check_labels` untouched.
    pub fn enter_switch(&mut self, end_label: u32) {
        self.false_labels.push(end_label);
    }

    pub fn exit_switch(&mut self) {
        self.false_labels.pop();
    }

    pub fn true_target(&self) -> Option<u32> {
        self.true_labels.last().copied()
    }

    // --- Emit helpers ---

    pub fn add(&mut self, op: Opcode, p1: i32, p2: i32, p3: i32, line: u32) -> usize {
        self.add_tag(op, p1, p2, p3, Tag::None, line)
    }

    pub fn add_tag(&mut self, op: Opcode, p1: i32, p2: i32, p3: i32, tag: Tag, line: u32) -> usize {
        self.code.push(Instr {
            opcode: op,
            tag,
            p1,
            p2,
            p3,
            payload: Payload::None,
            line,
        });
        self.code.len() - 1
    }

    pub fn add_double(&mut self, value: f64, line: u32) -> Result<u16, String> {
        let dst = self.push_temp()?;
        self.code.push(Instr {
            opcode: Opcode::Loadi,
            tag: Tag::Double,
            p1: dst as i32,
            p2: 0,
            p3: 0,
            payload: Payload::Double(value),
            line,
        });
        Ok(dst)
    }

    pub fn add_int(&mut self, value: i64, line: u32) -> Result<u16, String> {
        let dst = self.push_temp()?;
        self.code.push(Instr {
            opcode: Opcode::Loadi,
            tag: Tag::Int,
            p1: dst as i32,
            p2: 0,
            p3: 0,
            payload: Payload::Int(value),
            line,
        });
        Ok(dst)
    }

    pub fn add_constant(&mut self, cpool_index: u32, line: u32) -> Result<u16, String> {
        let dst = self.push_temp()?;
        self.add(Opcode::Loadk, dst as i32, cpool_index as i32, 0, line);
        Ok(dst)
    }

    /// Insert a placeholder instruction to be overwritten later via `set_index`.
    pub fn add_skip(&mut self, line: u32) -> usize {
        self.code.push(Instr {
            opcode: Opcode::Nop,
            tag: Tag::Skip,
            p1: 0,
            p2: 0,
            p3: 0,
            payload: Payload::None,
            line,
        });
        self.code.len() - 1
    }

    /// If the last emitted instruction is a `MOVE`, append a `CHECK` on its
    /// destination (value-type semantics).
    pub fn add_check(&mut self, line: u32) {
        if let Some(last) = self.code.last() {
            if last.opcode == Opcode::Move {
                let dst = last.p1;
                self.add(Opcode::Check, dst, 0, 0, line);
            }
        }
    }

    pub fn set_index(&mut self, index: usize, op: Opcode, p1: i32, p2: i32, p3: i32) {
        let line = self.code[index].line;
        self.code[index] = Instr {
            opcode: op,
            tag: Tag::None,
            p1,
            p2,
            p3,
            payload: Payload::None,
            line,
        };
    }

    /// Reserve the 4-instruction slot `process_constructor` leaves at the top of a
    /// user `init` for a later `patch_init` call.
    pub fn reserve_patch_init_slot(&mut self, line: u32) -> usize {
        let start = self.code.len();
        for _ in 0..4 {
            self.add_skip(line);
        }
        start
    }

    /// Fill a previously reserved 4-instruction slot (or prepend fresh instructions, if
    /// `slot_start == self.instructions().len()`) with the super-`$init` call sequence
    /// `LOADK t, idx; LOAD t, 0, t; MOVE t+1, 0; CALL t, t, 1`.
    pub fn patch_init(&mut self, slot_start: usize, cpool_idx: u32, line: u32) -> Result<(), String> {
        let t = self.push_temp()?;
        self.set_index(slot_start, Opcode::Loadk, t as i32, cpool_idx as i32, 0);
        self.set_index(slot_start + 1, Opcode::Load, t as i32, 0, t as i32);
        self.set_index(slot_start + 2, Opcode::Move, t as i32 + 1, 0, 0);
        self.set_index(slot_start + 3, Opcode::Call, t as i32, t as i32, 1);
        self.pop_raw_free(t);
        Ok(())
    }

    fn pop_raw_free(&mut self, reg: u16) {
        self.register_busy[reg as usize] = false;
        self.register_protected[reg as usize] = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn temps_allocate_above_locals_and_free_on_pop() {
        let mut buf = IrBuffer::new(2);
        let t1 = buf.push_temp().unwrap();
        assert_eq!(t1, 2);
        let t2 = buf.push_temp().unwrap();
        assert_eq!(t2, 3);
        assert_eq!(buf.pop(), 3);
        let t3 = buf.push_temp().unwrap();
        assert_eq!(t3, 3, "freed register 3 should be reused before allocating a new one");
        assert_eq!(buf.maxtemp(), 4);
    }

    #[test]
    fn context_protect_defers_free_until_pop_context() {
        let mut buf = IrBuffer::new(0);
        let t = buf.push_temp().unwrap();
        buf.push(t);
        buf.push_context();
        let popped = buf.pop_context_protect(true);
        assert_eq!(popped, t);
        // still busy: a fresh temp must not reuse it yet
        let other = buf.push_temp().unwrap();
        assert_ne!(other, t);
        buf.pop();
        buf.pop_context();
        let reused = buf.push_temp().unwrap();
        assert_eq!(reused, t);
    }

    #[test]
    fn skip_clear_survives_statement_boundary() {
        let mut buf = IrBuffer::new(0);
        let t = buf.push_temp().unwrap();
        buf.register_temp_protect(t);
        buf.pop();
        buf.register_temps_clear();
        let next = buf.push_temp().unwrap();
        assert_ne!(next, t, "protected temp must survive register_temps_clear");
        buf.register_temp_unprotect(t);
        buf.register_temps_clear();
        let reused = buf.push_temp().unwrap();
        assert_eq!(reused, t);
    }

    #[test]
    fn patch_init_fills_reserved_slot() {
        let mut buf = IrBuffer::new(1);
        let slot = buf.reserve_patch_init_slot(1);
        buf.patch_init(slot, 7, 1).unwrap();
        let instrs = buf.instructions();
        assert_eq!(instrs[slot].opcode, Opcode::Loadk);
        assert_eq!(instrs[slot + 3].opcode, Opcode::Call);
    }

    #[test]
    fn running_out_of_registers_sets_error_flag() {
        let mut buf = IrBuffer::new(0);
        for _ in 0..MAX_REGISTERS {
            buf.push_temp().unwrap();
        }
        assert!(buf.push_temp().is_err());
        assert!(buf.has_error());
    }
}
