//! Peephole rewrites over one function's instruction list.
//!
//! Every pass returns how many rewrites it made. Passes run before delay
//! slots are filled, so every branch is still followed by a literal `nop`.

use super::deps::{analyze, in_delay_slot};
use crate::compiler::asm::build::*;
use crate::compiler::asm::{Arg, AsmFunction, AsmLine, AsmOp, Opcode, ASSERT_HANDLER, DISPATCH_LOOP};
use crate::compiler::types::{Reg, VElem};
use std::collections::{HashMap, HashSet};

fn op_at(lines: &[AsmLine], i: usize) -> Option<&AsmOp> {
    lines.get(i).and_then(AsmLine::as_op)
}

fn movable(op: &AsmOp) -> bool {
    op.debug.barrier.is_none()
}

pub fn strip_comments(lines: &mut Vec<AsmLine>) -> usize {
    let before = lines.len();
    lines.retain(|l| !matches!(l, AsmLine::Comment(_)));
    before - lines.len()
}

/// Whether any instruction or raw `asm()` line still names `label`.
fn label_referenced(lines: &[AsmLine], label: &str) -> bool {
    lines.iter().any(|l| match l {
        AsmLine::Op(op) => op.args.iter().any(|a| matches!(a, Arg::Label(t) | Arg::LabelLo(t, _) if t == label)),
        AsmLine::Raw(text) => text.contains(label),
        _ => false,
    })
}

/// `bXX L1; nop; j T; nop; L1:` becomes `bNXX T; nop`, keeping `L1:` only
/// while something else still jumps to it.
///
/// In commands a `jal T` is merged too; the return address is then set
/// explicitly in the delay slot since commands never return through `$ra`.
pub fn merge_branch_jump(lines: &mut Vec<AsmLine>, is_command: bool) -> Result<usize, String> {
    let mut count = 0;
    let mut i = 0;
    while i + 4 < lines.len() {
        let (Some(br), Some(slot1), Some(jump), Some(slot2), Some(AsmLine::Label(after))) = (
            op_at(lines, i),
            op_at(lines, i + 1),
            op_at(lines, i + 2),
            op_at(lines, i + 3),
            lines.get(i + 4),
        ) else {
            i += 1;
            continue;
        };
        let call = jump.opcode == Opcode::Jal;
        let shape = br.opcode.is_cond_branch()
            && (jump.opcode == Opcode::J || (call && is_command))
            && slot1.is_nop()
            && slot2.is_nop()
            && br.target() == Some(after.as_str())
            && movable(br)
            && movable(jump);
        let Some(target) = jump.target().filter(|_| shape) else {
            i += 1;
            continue;
        };

        let negated = br.opcode.negated().ok_or_else(|| format!("branch '{}' has no inverse", br))?;
        let mut merged = br.clone();
        merged.opcode = negated;
        merged.set_target(target);
        let slot = if call {
            AsmOp {
                opcode: Opcode::Ori,
                args: vec![r(Reg::RA), r(Reg::ZERO), Arg::LabelLo(after.clone(), 0)],
                debug: jump.debug.clone(),
            }
        } else {
            AsmOp::new(Opcode::Nop, Vec::new())
        };
        let after = after.clone();
        lines.splice(i..i + 4, [AsmLine::Op(merged), AsmLine::Op(slot)]);
        if !label_referenced(lines, &after) {
            lines.remove(i + 2);
        }
        count += 1;
        i += 2;
    }
    Ok(count)
}

/// `bXX L1; nop; lui $at, C; j assertion_failed; nop; L1:` becomes
/// `bNXX assertion_failed; lui $at, C; L1:`.
pub fn merge_assert(lines: &mut Vec<AsmLine>) -> Result<usize, String> {
    let mut count = 0;
    let mut i = 0;
    while i + 5 < lines.len() {
        let (Some(br), Some(slot1), Some(code), Some(jump), Some(slot2), Some(AsmLine::Label(after))) = (
            op_at(lines, i),
            op_at(lines, i + 1),
            op_at(lines, i + 2),
            op_at(lines, i + 3),
            op_at(lines, i + 4),
            lines.get(i + 5),
        ) else {
            i += 1;
            continue;
        };
        let shape = br.opcode.is_cond_branch()
            && slot1.is_nop()
            && code.opcode == Opcode::Lui
            && code.args.first() == Some(&Arg::Reg(Reg::AT))
            && jump.opcode == Opcode::J
            && jump.target() == Some(ASSERT_HANDLER)
            && slot2.is_nop()
            && br.target() == Some(after.as_str())
            && movable(br);
        if !shape {
            i += 1;
            continue;
        }
        let negated = br.opcode.negated().ok_or_else(|| format!("branch '{}' has no inverse", br))?;
        let mut merged = br.clone();
        merged.opcode = negated;
        merged.set_target(ASSERT_HANDLER);
        let code = code.clone();
        lines.splice(i..i + 5, [AsmLine::Op(merged), AsmLine::Op(code)]);
        count += 1;
        i += 2;
    }
    Ok(count)
}

fn rename_label(lines: &mut [AsmLine], from: &str, to: &str) -> usize {
    let mut count = 0;
    for op in lines.iter_mut().filter_map(AsmLine::as_op_mut) {
        for arg in op.args.iter_mut() {
            match arg {
                Arg::Label(l) | Arg::LabelLo(l, _) if l == from => {
                    *l = to.to_string();
                    count += 1;
                }
                _ => {}
            }
        }
    }
    count
}

/// Branches to a label that is directly followed by `j T` go to `T`
/// instead. Code between an unconditional jump's delay slot and the next
/// label is unreachable and removed.
pub fn collapse_jump_chains(lines: &mut Vec<AsmLine>) -> usize {
    let mut hops: HashMap<String, String> = HashMap::new();
    for (i, line) in lines.iter().enumerate() {
        let AsmLine::Label(l) = line else { continue };
        let next = lines[i + 1..].iter().find(|l| !matches!(l, AsmLine::Label(_)));
        if let Some(AsmLine::Op(op)) = next {
            if op.opcode == Opcode::J && movable(op) {
                if let Some(t) = op.target().filter(|t| *t != l.as_str()) {
                    hops.insert(l.clone(), t.to_string());
                }
            }
        }
    }

    let resolve = |start: &str| -> String {
        let mut seen = HashSet::new();
        let mut cur = start.to_string();
        while let Some(next) = hops.get(&cur) {
            if !seen.insert(cur.clone()) {
                break;
            }
            cur = next.clone();
        }
        cur
    };

    let mut count = 0;
    for i in 0..lines.len() {
        let Some(op) = lines[i].as_op() else { continue };
        let Some(target) = op.target() else { continue };
        let fin = resolve(target);
        if fin != target {
            if let Some(op) = lines[i].as_op_mut() {
                op.set_target(&fin);
            }
            count += 1;
        }
    }

    let mut i = 0;
    while i + 2 < lines.len() {
        let jump = matches!(lines[i].opcode(), Some(Opcode::J | Opcode::Jr));
        if jump && !in_delay_slot(lines, i) {
            let dead = lines[i + 2..].iter().take_while(|l| matches!(l, AsmLine::Op(_))).count();
            if dead > 0 {
                lines.drain(i + 2..i + 2 + dead);
                count += dead;
            }
        }
        i += 1;
    }
    count
}

/// Adjacent labels collapse into the last one. A label named in a raw
/// `asm()` line is kept.
pub fn dedupe_labels(lines: &mut Vec<AsmLine>) -> usize {
    let raw: Vec<String> = lines
        .iter()
        .filter_map(|l| match l {
            AsmLine::Raw(text) => Some(text.clone()),
            _ => None,
        })
        .collect();
    let mut count = 0;
    let mut i = 0;
    while i + 1 < lines.len() {
        let (AsmLine::Label(first), AsmLine::Label(second)) = (&lines[i], &lines[i + 1]) else {
            i += 1;
            continue;
        };
        if raw.iter().any(|text| text.contains(first.as_str())) {
            i += 1;
            continue;
        }
        let (from, to) = (first.clone(), second.clone());
        rename_label(lines, &from, &to);
        lines.remove(i);
        count += 1;
    }
    count
}

/// Value loaded into a scalar register by an immediate-load sequence
/// starting at `i`: register, canonical value text and sequence length.
fn immediate_load(lines: &[AsmLine], i: usize) -> Option<(u8, String, usize)> {
    let op = op_at(lines, i)?;
    let dst = match op.args.first() {
        Some(Arg::Reg(Reg::Scalar(d))) if *d != 0 => *d,
        _ => return None,
    };
    let from_zero = op.args.get(1) == Some(&Arg::Reg(Reg::ZERO));
    match (op.opcode, op.args.get(2)) {
        (Opcode::Or, Some(Arg::Reg(Reg::ZERO))) if from_zero => Some((dst, "0x0".into(), 1)),
        (Opcode::Addiu, Some(Arg::Imm(v))) if from_zero => Some((dst, format!("{:#x}", *v as u32), 1)),
        (Opcode::Ori, Some(Arg::Hex(v))) if from_zero => Some((dst, format!("{:#x}", v), 1)),
        (Opcode::Ori, Some(Arg::LabelLo(l, o))) if from_zero => Some((dst, format!("%lo({}+{})", l, o), 1)),
        (Opcode::Lui, _) => {
            let Some(Arg::Hex(hi)) = op.args.get(1) else { return None };
            if let Some(next) = op_at(lines, i + 1) {
                let pair = next.opcode == Opcode::Ori
                    && next.args.first() == Some(&Arg::Reg(Reg::Scalar(dst)))
                    && next.args.get(1) == Some(&Arg::Reg(Reg::Scalar(dst)));
                if let (true, Some(Arg::Hex(lo))) = (pair, next.args.get(2)) {
                    return Some((dst, format!("{:#x}", (hi << 16) | lo), 2));
                }
            }
            Some((dst, format!("{:#x}", hi << 16), 1))
        }
        _ => None,
    }
}

/// Drop an immediate load when the register provably already holds the
/// value. Knowledge is reset at labels, branches and raw lines.
pub fn dedupe_immediates(lines: &mut Vec<AsmLine>) -> usize {
    let mut known: HashMap<u8, String> = HashMap::new();
    let mut count = 0;
    let mut i = 0;
    while i < lines.len() {
        let Some(op) = lines[i].as_op() else {
            known.clear();
            i += 1;
            continue;
        };
        if op.opcode.is_branch() {
            known.clear();
            i += 1;
            continue;
        }
        let barrier = !movable(op);
        if let Some((reg, value, len)) = immediate_load(lines, i) {
            if !barrier && !in_delay_slot(lines, i) && known.get(&reg) == Some(&value) {
                lines.drain(i..i + len);
                count += 1;
                continue;
            }
            known.insert(reg, value);
            i += len;
            continue;
        }
        for id in analyze(op).dst.iter().filter(|id| *id < 32) {
            known.remove(&(id as u8));
        }
        i += 1;
    }
    count
}

fn zero_input_lane(op: &AsmOp) -> Option<u8> {
    match op.args.get(1) {
        Some(Arg::VReg(Reg::Vector(0), Some(VElem::E(lane)))) => Some(*lane),
        _ => None,
    }
}

fn dest_lane(op: &AsmOp) -> Option<u8> {
    match op.args.first() {
        Some(Arg::VReg(_, Some(VElem::E(lane)))) => Some(*lane),
        _ => None,
    }
}

/// In a per-lane reciprocal sequence over a `vec16` source, the high-input
/// step of lane N+1 repeats the zero input the final step of lane N
/// already latched. It is dropped when the same lane's final step follows.
pub fn fold_reciprocals(lines: &mut Vec<AsmLine>) -> usize {
    let mut count = 0;
    let mut i = 0;
    while i + 3 < lines.len() {
        let ops = (op_at(lines, i), op_at(lines, i + 1), op_at(lines, i + 2), op_at(lines, i + 3));
        let (Some(prev), Some(first), Some(low), Some(last)) = ops else {
            i += 1;
            continue;
        };
        let low_op = match first.opcode {
            Opcode::Vrcph => Opcode::Vrcpl,
            Opcode::Vrsqh => Opcode::Vrsql,
            _ => {
                i += 1;
                continue;
            }
        };
        let lane = zero_input_lane(first);
        let redundant = prev.opcode == first.opcode
            && zero_input_lane(prev).is_some()
            && lane.is_some()
            && dest_lane(first) == lane
            && low.opcode == low_op
            && dest_lane(low) == lane
            && last.opcode == first.opcode
            && last.args == first.args
            && movable(first);
        if redundant {
            lines.remove(i + 1);
            count += 1;
        }
        i += 1;
    }
    count
}

/// `jal F; nop; j RSPQ_Loop; nop` in a command becomes `j F; nop`: the
/// dispatcher enters commands with `$ra` pointing at the loop. Only done
/// when nothing else in the command writes `$ra`.
pub fn tail_calls(lines: &mut Vec<AsmLine>) -> usize {
    let ra = Reg::RA.index() as u16;
    let is_site = |lines: &[AsmLine], i: usize| {
        let ops = (op_at(lines, i), op_at(lines, i + 1), op_at(lines, i + 2), op_at(lines, i + 3));
        matches!(ops, (Some(call), Some(s1), Some(jump), Some(s2))
            if call.opcode == Opcode::Jal && s1.is_nop() && jump.opcode == Opcode::J
                && jump.target() == Some(DISPATCH_LOOP) && s2.is_nop() && movable(call))
    };
    let sites: Vec<usize> = (0..lines.len()).filter(|i| is_site(&lines[..], *i)).collect();
    if sites.is_empty() || lines.iter().any(|l| matches!(l, AsmLine::Raw(_))) {
        return 0;
    }
    let writers = lines
        .iter()
        .filter_map(AsmLine::as_op)
        .filter(|op| analyze(op).dst.contains(ra))
        .count();
    if writers != sites.len() {
        return 0;
    }
    for &i in sites.iter().rev() {
        if let Some(op) = lines[i].as_op_mut() {
            op.opcode = Opcode::J;
        }
        lines.drain(i + 2..i + 4);
    }
    sites.len()
}

/// Truncate unreachable code after the last unconditional jump of the
/// function's final label-free stretch.
pub fn truncate_dead_tail(lines: &mut Vec<AsmLine>) -> usize {
    let start = lines.iter().rposition(|l| !matches!(l, AsmLine::Op(_))).map_or(0, |p| p + 1);
    let jump = (start..lines.len())
        .find(|&u| matches!(lines[u].opcode(), Some(Opcode::J | Opcode::Jr)) && !in_delay_slot(lines, u));
    match jump {
        Some(u) if u + 2 < lines.len() => {
            let dead = lines.len() - (u + 2);
            lines.truncate(u + 2);
            dead
        }
        _ => 0,
    }
}

/// A command whose whole body is `j T; nop` is dropped and its dispatch
/// entry points at `T`. Commands named by any jump elsewhere keep their
/// body, so aliases never chain. Empty commands (`j RSPQ_Loop`) keep their
/// own entry.
pub fn alias_commands(funcs: &mut [AsmFunction]) -> usize {
    let referenced: HashSet<String> = funcs
        .iter()
        .flat_map(|f| f.lines.iter())
        .filter_map(AsmLine::as_op)
        .flat_map(|op| op.args.iter())
        .filter_map(|a| match a {
            Arg::Label(l) | Arg::LabelLo(l, _) => Some(l.clone()),
            _ => None,
        })
        .collect();

    let mut aliases: HashMap<String, String> = HashMap::new();
    for f in funcs.iter().filter(|f| f.is_command()) {
        if let [AsmLine::Op(jump), AsmLine::Op(slot)] = f.lines.as_slice() {
            if jump.opcode == Opcode::J && slot.is_nop() && !referenced.contains(&f.name) {
                if let Some(t) = jump.target().filter(|t| *t != f.name && *t != DISPATCH_LOOP) {
                    aliases.insert(f.name.clone(), t.to_string());
                }
            }
        }
    }

    let mut count = 0;
    for f in funcs.iter_mut() {
        let Some(target) = aliases.get(&f.name) else { continue };
        tracing::debug!(command = %f.name, target = %target, "aliased command");
        f.alias_of = Some(target.clone());
        f.lines.clear();
        count += 1;
    }
    count
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::ast::FuncKind;

    fn op(opcode: Opcode, args: Vec<Arg>) -> AsmLine {
        AsmLine::op(opcode, args)
    }

    fn lbl(name: &str) -> AsmLine {
        AsmLine::Label(name.into())
    }

    fn render(lines: &[AsmLine]) -> Vec<String> {
        lines.iter().map(|l| l.to_string().trim().to_string()).collect()
    }

    fn t(n: u8) -> Reg {
        Reg::Scalar(n)
    }

    #[test]
    fn test_branch_jump_merge() {
        let mut lines = vec![
            op(Opcode::Bne, vec![r(t(8)), r(Reg::ZERO), label("L1")]),
            AsmLine::nop(),
            op(Opcode::J, vec![label("END")]),
            AsmLine::nop(),
            lbl("L1"),
        ];
        assert_eq!(merge_branch_jump(&mut lines, false), Ok(1));
        assert_eq!(render(&lines), vec!["beq $t0, $zero, END", "nop"]);
    }

    #[test]
    fn test_branch_jump_merge_keeps_shared_label() {
        let mut lines = vec![
            op(Opcode::Bne, vec![r(t(8)), r(Reg::ZERO), label("L1")]),
            AsmLine::nop(),
            op(Opcode::J, vec![label("END")]),
            AsmLine::nop(),
            lbl("L1"),
            op(Opcode::Addiu, vec![r(t(8)), r(t(8)), imm(-1)]),
            op(Opcode::Bgtz, vec![r(t(8)), label("L1")]),
            AsmLine::nop(),
        ];
        assert_eq!(merge_branch_jump(&mut lines, false), Ok(1));
        assert_eq!(
            render(&lines),
            vec!["beq $t0, $zero, END", "nop", "L1:", "addiu $t0, $t0, -1", "bgtz $t0, L1", "nop"]
        );

        let mut raw = vec![
            op(Opcode::Bne, vec![r(t(8)), r(Reg::ZERO), label("L1")]),
            AsmLine::nop(),
            op(Opcode::J, vec![label("END")]),
            AsmLine::nop(),
            lbl("L1"),
            AsmLine::Raw("j L1".into()),
        ];
        assert_eq!(merge_branch_jump(&mut raw, false), Ok(1));
        assert!(raw[2].is_label("L1"));
    }

    #[test]
    fn test_branch_call_merge_only_in_commands() {
        let source = vec![
            op(Opcode::Beq, vec![r(t(8)), r(Reg::ZERO), label("L1")]),
            AsmLine::nop(),
            op(Opcode::Jal, vec![label("helper")]),
            AsmLine::nop(),
            lbl("L1"),
        ];
        let mut lines = source.clone();
        assert_eq!(merge_branch_jump(&mut lines, false), Ok(0));
        assert_eq!(lines, source);
        assert_eq!(merge_branch_jump(&mut lines, true), Ok(1));
        assert_eq!(render(&lines), vec!["bne $t0, $zero, helper", "ori $ra, $zero, %lo(L1)", "L1:"]);
    }

    #[test]
    fn test_assert_merge() {
        let mut lines = vec![
            op(Opcode::Slti, vec![r(Reg::AT), r(t(8)), imm(5)]),
            op(Opcode::Bne, vec![r(Reg::AT), r(Reg::ZERO), label("LABEL_0001")]),
            AsmLine::nop(),
            op(Opcode::Lui, vec![r(Reg::AT), hex(0x1234)]),
            op(Opcode::J, vec![label(ASSERT_HANDLER)]),
            AsmLine::nop(),
            lbl("LABEL_0001"),
        ];
        assert_eq!(merge_assert(&mut lines), Ok(1));
        assert_eq!(
            render(&lines),
            vec!["slti $at, $t0, 5", "beq $at, $zero, assertion_failed", "lui $at, 0x1234", "LABEL_0001:"]
        );
    }

    #[test]
    fn test_jump_chain_and_dead_code() {
        let mut lines = vec![
            op(Opcode::Beq, vec![r(t(8)), r(Reg::ZERO), label("A")]),
            AsmLine::nop(),
            op(Opcode::J, vec![label("B")]),
            AsmLine::nop(),
            op(Opcode::Addiu, vec![r(t(9)), r(Reg::ZERO), imm(1)]),
            lbl("A"),
            op(Opcode::J, vec![label("B")]),
            AsmLine::nop(),
            lbl("B"),
            op(Opcode::Jr, vec![r(Reg::RA)]),
            AsmLine::nop(),
        ];
        assert_eq!(collapse_jump_chains(&mut lines), 2);
        assert_eq!(lines[0].as_op().and_then(AsmOp::target), Some("B"));
        assert!(lines[4].is_label("A"));
    }

    #[test]
    fn test_jump_cycle_terminates() {
        let mut lines = vec![
            lbl("A"),
            op(Opcode::J, vec![label("B")]),
            AsmLine::nop(),
            lbl("B"),
            op(Opcode::J, vec![label("A")]),
            AsmLine::nop(),
        ];
        collapse_jump_chains(&mut lines);
        assert_eq!(lines.len(), 6);
    }

    #[test]
    fn test_label_dedupe() {
        let mut lines = vec![
            op(Opcode::Beq, vec![r(t(8)), r(Reg::ZERO), label("A")]),
            AsmLine::nop(),
            op(Opcode::Bne, vec![r(t(8)), r(Reg::ZERO), label("B")]),
            AsmLine::nop(),
            lbl("A"),
            lbl("B"),
        ];
        assert_eq!(dedupe_labels(&mut lines), 1);
        assert_eq!(lines[0].as_op().and_then(AsmOp::target), Some("B"));
        assert_eq!(lines.len(), 5);

        let mut kept = vec![lbl("A"), lbl("B"), AsmLine::Raw("j A".into())];
        assert_eq!(dedupe_labels(&mut kept), 0);
    }

    #[test]
    fn test_immediate_dedupe() {
        let mut lines = vec![
            op(Opcode::Ori, vec![r(Reg::AT), r(Reg::ZERO), hex(0x8000)]),
            op(Opcode::Sw, vec![r(Reg::AT), mem(0, t(8))]),
            op(Opcode::Ori, vec![r(Reg::AT), r(Reg::ZERO), hex(0x8000)]),
            op(Opcode::Sw, vec![r(Reg::AT), mem(4, t(8))]),
            op(Opcode::Addiu, vec![r(Reg::AT), r(Reg::AT), imm(1)]),
            op(Opcode::Ori, vec![r(Reg::AT), r(Reg::ZERO), hex(0x8000)]),
        ];
        assert_eq!(dedupe_immediates(&mut lines), 1);
        assert_eq!(lines.len(), 5);
        assert_eq!(lines[4].opcode(), Some(Opcode::Ori));
    }

    #[test]
    fn test_immediate_dedupe_resets_at_labels() {
        let mut lines = vec![
            op(Opcode::Lui, vec![r(Reg::AT), hex(0x12)]),
            op(Opcode::Ori, vec![r(Reg::AT), r(Reg::AT), hex(0x3456)]),
            lbl("L"),
            op(Opcode::Lui, vec![r(Reg::AT), hex(0x12)]),
            op(Opcode::Ori, vec![r(Reg::AT), r(Reg::AT), hex(0x3456)]),
            op(Opcode::Lui, vec![r(Reg::AT), hex(0x12)]),
            op(Opcode::Ori, vec![r(Reg::AT), r(Reg::AT), hex(0x3456)]),
        ];
        assert_eq!(dedupe_immediates(&mut lines), 1);
        assert_eq!(lines.len(), 5);
    }

    #[test]
    fn test_reciprocal_fold() {
        let d = Reg::Vector(4);
        let f = Reg::Vector(5);
        let s = Reg::Vector(2);
        let mut lines = Vec::new();
        for lane in 0..2 {
            lines.push(op(Opcode::Vrcph, vec![e(d, lane), e(Reg::VZERO, lane)]));
            lines.push(op(Opcode::Vrcpl, vec![e(f, lane), e(s, lane)]));
            lines.push(op(Opcode::Vrcph, vec![e(d, lane), e(Reg::VZERO, lane)]));
        }
        assert_eq!(fold_reciprocals(&mut lines), 1);
        assert_eq!(
            render(&lines),
            vec![
                "vrcph $v04.e0, $v00.e0",
                "vrcpl $v05.e0, $v02.e0",
                "vrcph $v04.e0, $v00.e0",
                "vrcpl $v05.e1, $v02.e1",
                "vrcph $v04.e1, $v00.e1",
            ]
        );
    }

    #[test]
    fn test_tail_call() {
        let mut lines = vec![
            op(Opcode::Jal, vec![label("helper")]),
            AsmLine::nop(),
            op(Opcode::J, vec![label(DISPATCH_LOOP)]),
            AsmLine::nop(),
        ];
        assert_eq!(tail_calls(&mut lines), 1);
        assert_eq!(render(&lines), vec!["j helper", "nop"]);

        let mut nested = vec![
            op(Opcode::Jal, vec![label("first")]),
            AsmLine::nop(),
            op(Opcode::Jal, vec![label("helper")]),
            AsmLine::nop(),
            op(Opcode::J, vec![label(DISPATCH_LOOP)]),
            AsmLine::nop(),
        ];
        assert_eq!(tail_calls(&mut nested), 0);
    }

    #[test]
    fn test_dead_tail() {
        let mut lines = vec![
            op(Opcode::Jr, vec![r(Reg::RA)]),
            AsmLine::nop(),
            op(Opcode::Jr, vec![r(Reg::RA)]),
            AsmLine::nop(),
            AsmLine::nop(),
        ];
        assert_eq!(truncate_dead_tail(&mut lines), 3);
        assert_eq!(lines.len(), 2);
    }

    #[test]
    fn test_command_alias() {
        let func = |name: &str, kind: FuncKind, lines: Vec<AsmLine>| AsmFunction {
            name: name.into(),
            kind,
            arg_size: 4,
            align: None,
            lines,
            alias_of: None,
        };
        let mut funcs = vec![
            func("CmdA", FuncKind::Command(0), vec![op(Opcode::J, vec![label("CmdB")]), AsmLine::nop()]),
            func("CmdB", FuncKind::Command(1), vec![op(Opcode::J, vec![label(DISPATCH_LOOP)]), AsmLine::nop()]),
            func("CmdC", FuncKind::Command(2), vec![op(Opcode::J, vec![label("CmdD")]), AsmLine::nop()]),
            func("CmdD", FuncKind::Command(3), vec![op(Opcode::Jr, vec![r(Reg::RA)]), AsmLine::nop()]),
        ];
        assert_eq!(alias_commands(&mut funcs), 2);
        assert_eq!(funcs[0].alias_of.as_deref(), Some("CmdB"));
        assert!(funcs[0].lines.is_empty());
        assert_eq!(funcs[1].alias_of, None);
        assert_eq!(funcs[2].alias_of.as_deref(), Some("CmdD"));
        assert!(funcs[3].alias_of.is_none());
    }

    #[test]
    fn test_empty_command_keeps_its_entry() {
        let mut funcs = vec![AsmFunction {
            name: "CmdNop".into(),
            kind: FuncKind::Command(0),
            arg_size: 4,
            align: None,
            lines: vec![op(Opcode::J, vec![label(DISPATCH_LOOP)]), AsmLine::nop()],
            alias_of: None,
        }];
        assert_eq!(alias_commands(&mut funcs), 0);
        assert_eq!(funcs[0].alias_of, None);
        assert_eq!(render(&funcs[0].lines), vec!["j RSPQ_Loop", "nop"]);
    }
}
