//! Peephole optimizer and bit-packed encoder.

use crate::ircode::{Instr, Opcode, Payload, Tag};
use lumen_runtime::Value;
use std::collections::HashMap;

fn is_temp(nlocals: u16, reg: i32) -> bool {
    reg >= nlocals as i32
}

fn is_alive(instr: &Instr) -> bool {
    !matches!(instr.tag, Tag::Skip)
}

/// `LOADI d, n ; NEG d2, d` where `d` is a temp → rewrite the `LOADI` payload's sign
/// and retarget it to `d2`, delete the `NEG`.
fn fold_neg(code: &mut [Instr], nlocals: u16) -> bool {
    let mut changed = false;
    for i in 1..code.len() {
        if code[i].opcode != Opcode::Neg || !is_alive(&code[i]) {
            continue;
        }
        let (d2, d) = (code[i].p1, code[i].p2);
        let j = i - 1;
        if !is_alive(&code[j]) || code[j].opcode != Opcode::Loadi || code[j].p1 != d {
            continue;
        }
        if !is_temp(nlocals, d) {
            continue;
        }
        match &mut code[j].payload {
            Payload::Int(n) => *n = -*n,
            Payload::Double(v) => *v = -*v,
            Payload::None => continue,
        }
        code[j].p1 = d2;
        code[i].tag = Tag::Skip;
        changed = true;
    }
    changed
}

const ARITH_OPS: &[Opcode] = &[
    Opcode::Add,
    Opcode::Sub,
    Opcode::Mul,
    Opcode::Div,
    Opcode::Rem,
];

fn numeric_of(payload: &Payload) -> Option<f64> {
    match payload {
        Payload::Int(n) => Some(*n as f64),
        Payload::Double(d) => Some(*d),
        Payload::None => None,
    }
}

fn is_zero(payload: &Payload) -> bool {
    matches!(payload, Payload::Int(0)) || matches!(payload, Payload::Double(d) if *d == 0.0)
}

/// For any `ADD/SUB/MUL/DIV/REM` whose two operand-producing instructions are both
/// `LOADI` of the same temps (register identity `inst.p2==i1.p1 && inst.p3==i2.p1`),
/// compute the result (widening to double if the tags differ) and collapse all three
/// into a single `LOADI`. Division/modulo by literal zero are left unfolded.
fn fold_constant_arith(code: &mut [Instr], nlocals: u16) -> bool {
    let mut changed = false;
    for i in 2..code.len() {
        if !ARITH_OPS.contains(&code[i].opcode) || !is_alive(&code[i]) {
            continue;
        }
        let (dst, lreg, rreg) = (code[i].p1, code[i].p2, code[i].p3);
        let (j1, j2) = (i - 2, i - 1);
        if !is_alive(&code[j1]) || !is_alive(&code[j2]) {
            continue;
        }
        if code[j1].opcode != Opcode::Loadi || code[j2].opcode != Opcode::Loadi {
            continue;
        }
        if code[j1].p1 != lreg || code[j2].p1 != rreg {
            continue;
        }
        if !is_temp(nlocals, lreg) || !is_temp(nlocals, rreg) {
            continue;
        }
        let op = code[i].opcode;
        if matches!(op, Opcode::Div | Opcode::Rem) && is_zero(&code[j2].payload) {
            continue;
        }
        let (Some(l), Some(r)) = (numeric_of(&code[j1].payload), numeric_of(&code[j2].payload))
        else {
            continue;
        };
        let both_int = matches!(code[j1].payload, Payload::Int(_))
            && matches!(code[j2].payload, Payload::Int(_));
        let result_payload = if both_int {
            let (li, ri) = match (code[j1].payload, code[j2].payload) {
                (Payload::Int(a), Payload::Int(b)) => (a, b),
                _ => unreachable!(),
            };
            match op {
                Opcode::Add => Payload::Int(li.wrapping_add(ri)),
                Opcode::Sub => Payload::Int(li.wrapping_sub(ri)),
                Opcode::Mul => Payload::Int(li.wrapping_mul(ri)),
                Opcode::Div => Payload::Int(li / ri),
                Opcode::Rem => Payload::Int(li % ri),
                _ => unreachable!(),
            }
        } else {
            let result = match op {
                Opcode::Add => l + r,
                Opcode::Sub => l - r,
                Opcode::Mul => l * r,
                Opcode::Div => l / r,
                Opcode::Rem => l % r,
                _ => unreachable!(),
            };
            Payload::Double(result)
        };
        code[j1].tag = Tag::Skip;
        code[j2].tag = Tag::Skip;
        code[i].opcode = Opcode::Loadi;
        code[i].tag = match result_payload {
            Payload::Int(_) => Tag::Int,
            Payload::Double(_) => Tag::Double,
            Payload::None => Tag::None,
        };
        code[i].p1 = dst;
        code[i].p2 = 0;
        code[i].p3 = 0;
        code[i].payload = result_payload;
        changed = true;
    }
    changed
}

/// If a `MOVE d, s` immediately follows a `LOADI/LOADK/LOADG` into `s` where `s` is a
/// temp, retarget the load to `d` and delete the `MOVE`.
fn eliminate_move(code: &mut [Instr], nlocals: u16) -> bool {
    let mut changed = false;
    for i in 1..code.len() {
        if code[i].opcode != Opcode::Move || !is_alive(&code[i]) {
            continue;
        }
        let (dst, src) = (code[i].p1, code[i].p2);
        let j = i - 1;
        if !is_alive(&code[j])
            || !matches!(code[j].opcode, Opcode::Loadi | Opcode::Loadk | Opcode::Loadg)
            || code[j].p1 != src
            || !is_temp(nlocals, src)
        {
            continue;
        }
        code[j].p1 = dst;
        code[i].tag = Tag::Skip;
        changed = true;
    }
    changed
}

/// `MOVE d, s; RET d` where `d` is a temp → `RET s`, delete the `MOVE`.
fn fold_ret(code: &mut [Instr], nlocals: u16) -> bool {
    let mut changed = false;
    for i in 1..code.len() {
        if code[i].opcode != Opcode::Ret || !is_alive(&code[i]) {
            continue;
        }
        let dst = code[i].p1;
        let j = i - 1;
        if !is_alive(&code[j]) || code[j].opcode != Opcode::Move || code[j].p1 != dst {
            continue;
        }
        if !is_temp(nlocals, dst) {
            continue;
        }
        code[i].p1 = code[j].p2;
        code[j].tag = Tag::Skip;
        changed = true;
    }
    changed
}

/// Any `LOADI` with an int payload outside the signed 17-bit inline range, or any
/// `LOADI` with a double payload (always widened), becomes `LOADK dst, idx`.
fn widen_integers(code: &mut [Instr], add_constant: &mut dyn FnMut(Value) -> u32) {
    const INLINE_MAX: i64 = (1 << 17) - 1;
    const INLINE_MIN: i64 = -((1 << 17) - 1);
    for instr in code.iter_mut() {
        if instr.opcode != Opcode::Loadi || !is_alive(instr) {
            continue;
        }
        let needs_widen = match instr.payload {
            Payload::Int(n) => !(INLINE_MIN..=INLINE_MAX).contains(&n),
            Payload::Double(_) => true,
            Payload::None => false,
        };
        if !needs_widen {
            continue;
        }
        let value = match instr.payload {
            Payload::Int(n) => Value::Int(n),
            Payload::Double(d) => Value::Float(d),
            Payload::None => continue,
        };
        let idx = add_constant(value);
        instr.opcode = Opcode::Loadk;
        instr.tag = Tag::None;
        instr.p2 = idx as i32;
        instr.p3 = 0;
        instr.payload = Payload::None;
    }
}

/// Run every peephole pass to a fixed point, then widen any surviving out-of-range
/// `LOADI`.
pub fn run_peephole(code: &mut [Instr], nlocals: u16, add_constant: &mut dyn FnMut(Value) -> u32) {
    loop {
        let mut changed = false;
        changed |= fold_neg(code, nlocals);
        changed |= fold_constant_arith(code, nlocals);
        changed |= eliminate_move(code, nlocals);
        changed |= fold_ret(code, nlocals);
        if !changed {
            break;
        }
    }
    widen_integers(code, add_constant);
}

pub struct Encoded {
    pub words: Vec<u32>,
    pub lines: Option<Vec<u32>>,
    pub purity: f64,
}

fn pack(instr: &Instr, label_map: &HashMap<u32, u32>) -> u32 {
    use Opcode::*;
    let op = instr.opcode as u32;
    match instr.opcode {
        Halt | Nop | Ret0 => op << 26,
        Ret => (op << 26) | ((instr.p1 as u32 & 0xFF) << 18),
        Jump => {
            let target = *label_map.get(&(instr.p1 as u32)).unwrap_or(&0);
            (op << 26) | (target & 0x3FF_FFFF)
        }
        Loadk | Loadg | Storeg | Loadu | Storeu | Mapnew | Listnew | Closure | Close | Check
        | Move => (op << 26) | ((instr.p1 as u32 & 0xFF) << 18) | (instr.p2 as u32 & 0x3_FFFF),
        Loadi => {
            let (sign, mag) = match instr.payload {
                Payload::Int(n) => (u32::from(n < 0), (n.unsigned_abs() as u32) & 0x1_FFFF),
                _ => (0, 0),
            };
            (op << 26) | ((instr.p1 as u32 & 0xFF) << 18) | (sign << 17) | mag
        }
        Jumpf => {
            let target = *label_map.get(&(instr.p2 as u32)).unwrap_or(&0);
            let flag = instr.p3 as u32 & 1;
            (op << 26) | ((instr.p1 as u32 & 0xFF) << 18) | (flag << 17) | (target & 0x1_FFFF)
        }
        Rangenew => {
            let tag = match instr.tag {
                Tag::RangeInclude => 0,
                Tag::RangeExclude => 1,
                _ => 0,
            };
            (op << 26)
                | ((instr.p1 as u32 & 0xFF) << 18)
                | ((instr.p2 as u32 & 0xFF) << 10)
                | ((instr.p3 as u32 & 0xFF) << 2)
                | tag
        }
        _ => {
            (op << 26)
                | ((instr.p1 as u32 & 0xFF) << 18)
                | ((instr.p2 as u32 & 0xFF) << 10)
                | (instr.p3 as u32 & 0x3FF)
        }
    }
}

fn is_countable(instr: &Instr) -> bool {
    !matches!(instr.tag, Tag::Skip | Tag::Label | Tag::PragmaMoveOptimization)
}

/// Encode peephole-optimized IR into the final 32-bit word stream.
pub fn encode(code: &[Instr], emit_line_table: bool) -> Encoded {
    let mut label_map = HashMap::new();
    let mut ninst: u32 = 0;
    for instr in code {
        if matches!(instr.tag, Tag::Label) {
            label_map.insert(instr.p1 as u32, ninst);
        } else if is_countable(instr) {
            ninst += 1;
        }
    }

    let mut words = vec![0u32; ninst as usize + 1];
    let mut lines = emit_line_table.then(|| vec![0u32; ninst as usize + 1]);
    let mut impure = 0u32;
    let mut idx = 0usize;
    for instr in code {
        if !is_countable(instr) {
            continue;
        }
        if instr.opcode.is_impure() {
            impure += 1;
        }
        words[idx] = pack(instr, &label_map);
        if let Some(lt) = lines.as_mut() {
            lt[idx] = instr.line;
        }
        idx += 1;
    }

    let purity = if ninst == 0 {
        1.0
    } else {
        1.0 - (impure as f64 / ninst as f64)
    };

    Encoded {
        words,
        lines,
        purity,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn loadi_int(p1: i32, n: i64, line: u32) -> Instr {
        Instr {
            opcode: Opcode::Loadi,
            tag: Tag::Int,
            p1,
            p2: 0,
            p3: 0,
            payload: Payload::Int(n),
            line,
        }
    }

    #[test]
    fn folds_one_plus_two_to_single_loadi() {
        // `return 1 + 2;`, nlocals=0 (temps start at reg 0)
        let mut code = vec![
            loadi_int(0, 1, 1),
            loadi_int(1, 2, 1),
            Instr {
                opcode: Opcode::Add,
                tag: Tag::None,
                p1: 2,
                p2: 0,
                p3: 1,
                payload: Payload::None,
                line: 1,
            },
            Instr {
                opcode: Opcode::Ret,
                tag: Tag::None,
                p1: 2,
                p2: 0,
                p3: 0,
                payload: Payload::None,
                line: 1,
            },
        ];
        let mut pool = Vec::new();
        run_peephole(&mut code, 0, &mut |v| {
            pool.push(v);
            (pool.len() - 1) as u32
        });
        let live: Vec<_> = code.iter().filter(|i| !matches!(i.tag, Tag::Skip)).collect();
        assert_eq!(live.len(), 2, "only LOADI 3 and RET should remain");
        assert_eq!(live[0].opcode, Opcode::Loadi);
        assert_eq!(live[0].payload, Payload::Int(3));
        assert_eq!(live[1].opcode, Opcode::Ret);
        assert_eq!(live[1].p1, live[0].p1);
    }

    #[test]
    fn division_by_literal_zero_is_left_unfolded() {
        let mut code = vec![
            loadi_int(0, 10, 1),
            loadi_int(1, 0, 1),
            Instr {
                opcode: Opcode::Div,
                tag: Tag::None,
                p1: 2,
                p2: 0,
                p3: 1,
                payload: Payload::None,
                line: 1,
            },
        ];
        run_peephole(&mut code, 0, &mut |_| 0);
        assert_eq!(code[2].opcode, Opcode::Div, "div by zero must not be folded");
    }

    #[test]
    fn widens_out_of_range_int_to_loadk() {
        let mut code = vec![loadi_int(0, 1_000_000, 1)];
        let mut pool = Vec::new();
        run_peephole(&mut code, 0, &mut |v| {
            pool.push(v);
            (pool.len() - 1) as u32
        });
        assert_eq!(code[0].opcode, Opcode::Loadk);
        assert_eq!(pool, vec![Value::Int(1_000_000)]);
    }

    #[test]
    fn encode_counts_purity_and_resolves_labels() {
        let mut code = Vec::new();
        let label = 0u32;
        code.push(Instr {
            opcode: Opcode::Jump,
            tag: Tag::None,
            p1: label as i32,
            p2: 0,
            p3: 0,
            payload: Payload::None,
            line: 1,
        });
        code.push(Instr {
            opcode: Opcode::Nop,
            tag: Tag::Label,
            p1: label as i32,
            p2: 0,
            p3: 0,
            payload: Payload::None,
            line: 2,
        });
        code.push(Instr {
            opcode: Opcode::Ret0,
            tag: Tag::None,
            p1: 0,
            p2: 0,
            p3: 0,
            payload: Payload::None,
            line: 2,
        });
        let encoded = encode(&code, true);
        assert_eq!(encoded.words.len(), 3); // 2 real instructions + trailing terminator
        assert_eq!(encoded.purity, 1.0);
        assert!(encoded.lines.is_some());
        // JUMP should resolve to instruction index 1 (the RET0 right after the label)
        let jump_word = encoded.words[0];
        let target = jump_word & 0x3FF_FFFF;
        assert_eq!(target, 1);
    }
}
