//! Approximate cycle model of the RSP pipeline used to rank schedules.
//!
//! One scalar-unit and one vector-unit instruction can issue together when
//! the second does not read the first's result. Results become visible after
//! `Opcode::latency` cycles.

use super::deps::{analyze, REG_IDS};
use crate::compiler::asm::AsmLine;

pub fn estimate_cycles(lines: &[AsmLine]) -> u32 {
    let mut ready = [0u32; REG_IDS];
    let mut end = 0u32;
    // (issue cycle, vector unit, paired already, written registers)
    let mut prev: Option<(u32, bool, bool, super::deps::RegSet)> = None;

    for line in lines {
        let AsmLine::Op(op) = line else {
            prev = None;
            continue;
        };
        let info = analyze(op);
        let vector = op.opcode.is_vector_unit();
        let operands_ready = info.src.iter().map(|id| ready[id as usize]).max().unwrap_or(0);

        let issue = match prev {
            Some((at, unit, paired, written))
                if unit != vector && !paired && !written.intersects(&info.src) && operands_ready <= at =>
            {
                prev = Some((at, vector, true, info.dst));
                at
            }
            Some((at, ..)) => {
                let t = operands_ready.max(at + 1);
                prev = Some((t, vector, false, info.dst));
                t
            }
            None => {
                let t = operands_ready.max(end);
                prev = Some((t, vector, false, info.dst));
                t
            }
        };

        let latency = op.opcode.latency();
        for id in info.dst.iter() {
            ready[id as usize] = issue + latency;
        }
        end = end.max(issue + 1);
    }
    end
}
