//! Cost-guided instruction reordering and delay-slot filling.

use super::cost::estimate_cycles;
use super::deps::{in_delay_slot, infos, move_line, reorder_range};
use crate::compiler::asm::{AsmLine, Opcode};
use crate::compiler::types::Reg;

/// Lines of context on each side of a move that the cost model looks at.
const WINDOW_MARGIN: usize = 4;

/// Move single instructions inside their legal range while that lowers the
/// estimated cycle count. Returns the number of moves made.
pub fn schedule(lines: &mut Vec<AsmLine>, rounds: usize) -> usize {
    let mut moves = 0;
    for round in 0..rounds {
        let mut improved = false;
        for i in 0..lines.len() {
            let info = infos(lines);
            let (min, max) = reorder_range(lines, &info, i);
            if min == max {
                continue;
            }
            let lo = min.saturating_sub(WINDOW_MARGIN);
            let hi = (max + WINDOW_MARGIN + 1).min(lines.len());
            let mut best = estimate_cycles(&lines[lo..hi]);
            let mut best_pos = None;
            for j in min..=max {
                if j == i {
                    continue;
                }
                let mut candidate = lines[lo..hi].to_vec();
                move_line(&mut candidate, i - lo, j - lo);
                let cost = estimate_cycles(&candidate);
                if cost < best {
                    best = cost;
                    best_pos = Some(j);
                }
            }
            if let Some(j) = best_pos {
                tracing::trace!(round, from = i, to = j, cycles = best, "reordered instruction");
                move_line(lines, i, j);
                moves += 1;
                improved = true;
            }
        }
        if !improved {
            break;
        }
    }
    moves
}

/// Replace `nop` delay slots with the closest earlier instruction that can
/// legally move past the branch.
pub fn fill_delay_slots(lines: &mut Vec<AsmLine>) -> usize {
    let mut filled = 0;
    let mut b = 0;
    while b + 1 < lines.len() {
        let Some(branch) = lines[b].as_op() else {
            b += 1;
            continue;
        };
        if !branch.opcode.is_branch() || branch.debug.barrier.is_some() || !lines[b + 1].is_nop() {
            b += 1;
            continue;
        }
        let info = infos(lines);
        let Some(branch_info) = info[b] else {
            b += 1;
            continue;
        };
        let is_call = branch.opcode == Opcode::Jal;

        let mut picked = None;
        for i in (0..b).rev() {
            let Some(cand) = info[i] else { break };
            if cand.branch || in_delay_slot(lines, i) {
                break;
            }
            if lines[i].is_nop() || cand.barrier {
                continue;
            }
            let ra = Reg::RA.index() as u16;
            let touches_ra = is_call && (cand.src.contains(ra) || cand.dst.contains(ra));
            let (_, max) = reorder_range(lines, &info, i);
            if max + 1 >= b && !cand.dst.intersects(&branch_info.src) && !touches_ra {
                picked = Some(i);
                break;
            }
        }

        if let Some(i) = picked {
            let op = lines.remove(i);
            // Branch now sits at b - 1 and its slot at b.
            lines[b] = op;
            filled += 1;
        }
        b += 1;
    }
    filled
}

/// Every branch must be followed by exactly one non-branch instruction.
pub fn check_delay_slots(lines: &[AsmLine]) -> Result<(), String> {
    for (i, line) in lines.iter().enumerate() {
        if !line.is_branch() {
            continue;
        }
        match lines.get(i + 1) {
            Some(AsmLine::Op(slot)) if !slot.opcode.is_branch() => {}
            Some(AsmLine::Raw(_)) => {}
            _ => return Err(format!("branch '{}' has no delay slot", line.to_string().trim())),
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::asm::build::*;

    fn addiu(d: u8, s: u8, v: i64) -> AsmLine {
        AsmLine::op(Opcode::Addiu, vec![r(Reg::Scalar(d)), r(Reg::Scalar(s)), imm(v)])
    }

    fn render(lines: &[AsmLine]) -> Vec<String> {
        lines.iter().map(|l| l.to_string().trim().to_string()).collect()
    }

    #[test]
    fn test_fill_delay_slot_with_independent_op() {
        let mut lines = vec![
            addiu(8, 0, 1),
            addiu(9, 0, 2),
            AsmLine::op(Opcode::Beq, vec![r(Reg::Scalar(9)), r(Reg::ZERO), label("L")]),
            AsmLine::nop(),
            AsmLine::Label("L".into()),
        ];
        assert_eq!(fill_delay_slots(&mut lines), 1);
        assert_eq!(render(&lines), vec!["addiu $t1, $zero, 2", "beq $t1, $zero, L", "addiu $t0, $zero, 1", "L:"]);
    }

    #[test]
    fn test_no_fill_when_branch_reads_result() {
        let mut lines = vec![
            addiu(9, 0, 2),
            AsmLine::op(Opcode::Beq, vec![r(Reg::Scalar(9)), r(Reg::ZERO), label("L")]),
            AsmLine::nop(),
            AsmLine::Label("L".into()),
        ];
        assert_eq!(fill_delay_slots(&mut lines), 0);
        assert!(lines[2].is_nop());
    }

    #[test]
    fn test_call_slot_never_touches_ra() {
        let mut lines = vec![
            AsmLine::op(Opcode::Or, vec![r(Reg::Scalar(8)), r(Reg::RA), r(Reg::ZERO)]),
            AsmLine::op(Opcode::Jal, vec![label("f")]),
            AsmLine::nop(),
        ];
        assert_eq!(fill_delay_slots(&mut lines), 0);
        assert!(check_delay_slots(&lines).is_ok());
    }

    #[test]
    fn test_schedule_interleaves_units() {
        let mut lines = vec![
            AsmLine::op(Opcode::Vor, vec![v(Reg::Vector(1)), v(Reg::Vector(2)), v(Reg::Vector(3))]),
            AsmLine::op(Opcode::Vor, vec![v(Reg::Vector(4)), v(Reg::Vector(1)), v(Reg::Vector(3))]),
            addiu(8, 8, 1),
            addiu(9, 9, 1),
        ];
        let before = estimate_cycles(&lines);
        assert!(schedule(&mut lines, 4) > 0);
        assert!(estimate_cycles(&lines) < before);
        assert_eq!(lines.len(), 4);
    }

    #[test]
    fn test_missing_delay_slot_is_reported() {
        let lines = vec![AsmLine::op(Opcode::J, vec![label("L")]), AsmLine::Label("L".into())];
        assert!(check_delay_slots(&lines).is_err());
    }
}
