//! Register and memory dependencies of single instructions, and the range
//! an instruction can be moved within without changing program meaning.
//!
//! Registers are numbered: scalar `0..32`, vector lanes `32 + reg * 8 + lane`,
//! then the hidden vector-unit registers.

use crate::compiler::asm::{Arg, AsmLine, AsmOp, Opcode};
use crate::compiler::types::Reg;

pub const ACC: u16 = 32 + 32 * 8;
pub const VCC: u16 = ACC + 1;
pub const VCO: u16 = ACC + 2;
pub const VCE: u16 = ACC + 3;
/// Reciprocal unit input/output latches.
pub const DIV: u16 = ACC + 4;
pub const REG_IDS: usize = DIV as usize + 1;

const WORDS: usize = REG_IDS.div_ceil(64);

/// Fixed-size bitset over register ids.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RegSet([u64; WORDS]);

impl RegSet {
    pub fn insert(&mut self, id: u16) {
        self.0[id as usize / 64] |= 1 << (id % 64);
    }

    pub fn contains(&self, id: u16) -> bool {
        self.0[id as usize / 64] & (1 << (id % 64)) != 0
    }

    pub fn intersects(&self, other: &RegSet) -> bool {
        self.0.iter().zip(other.0.iter()).any(|(a, b)| a & b != 0)
    }

    pub fn is_empty(&self) -> bool {
        self.0.iter().all(|w| *w == 0)
    }

    pub fn iter(&self) -> impl Iterator<Item = u16> + '_ {
        (0..REG_IDS as u16).filter(move |id| self.contains(*id))
    }

    /// Add a register operand. `$zero` and `$v00` are constants and never tracked.
    fn add(&mut self, reg: Reg, lanes: u8) {
        match reg {
            Reg::Scalar(0) | Reg::Vector(0) => {}
            Reg::Scalar(i) => self.insert(i as u16),
            Reg::Vector(i) => {
                for lane in 0..8 {
                    if lanes & (1 << lane) != 0 {
                        self.insert(32 + i as u16 * 8 + lane);
                    }
                }
            }
        }
    }

    fn add_arg(&mut self, arg: Option<&Arg>, whole: bool) {
        match arg {
            Some(Arg::Reg(reg)) => self.add(*reg, 0xFF),
            Some(Arg::VReg(reg, elem)) => {
                let lanes = match elem {
                    Some(e) if !whole => e.lane_mask(),
                    _ => 0xFF,
                };
                self.add(*reg, lanes)
            }
            Some(Arg::Mem { base, .. }) => self.add(*base, 0xFF),
            _ => {}
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemAccess {
    None,
    Load,
    Store,
}

/// Registers read and written by one instruction.
#[derive(Debug, Clone, Copy)]
pub struct OpInfo {
    pub src: RegSet,
    pub dst: RegSet,
    pub mem: MemAccess,
    pub branch: bool,
    pub barrier: bool,
}

impl OpInfo {
    /// True if the two instructions cannot swap places.
    pub fn conflicts(&self, other: &OpInfo) -> bool {
        self.dst.intersects(&other.src)
            || self.src.intersects(&other.dst)
            || self.dst.intersects(&other.dst)
            || match (self.mem, other.mem) {
                (MemAccess::Load, MemAccess::Store) => true,
                (MemAccess::Store, MemAccess::Load | MemAccess::Store) => true,
                _ => false,
            }
    }
}

/// Every register of a transposed access (`ltv`/`stv` touch 8 registers).
fn add_transposed(set: &mut RegSet, arg: Option<&Arg>) {
    if let Some(Arg::VReg(Reg::Vector(base), _)) = arg {
        for i in *base..(*base + 8).min(32) {
            set.add(Reg::Vector(i), 0xFF);
        }
    }
}

pub fn analyze(op: &AsmOp) -> OpInfo {
    let mut src = RegSet::default();
    let mut dst = RegSet::default();
    let mut mem = MemAccess::None;
    let a = |i: usize| op.args.get(i);
    let opcode = op.opcode;

    match opcode {
        Opcode::Nop | Opcode::Vnop | Opcode::J => {}
        Opcode::Jal => dst.add(Reg::RA, 0xFF),
        Opcode::Jr | Opcode::Blez | Opcode::Bgtz | Opcode::Bltz | Opcode::Bgez => src.add_arg(a(0), true),
        Opcode::Beq | Opcode::Bne => {
            src.add_arg(a(0), true);
            src.add_arg(a(1), true);
        }
        Opcode::Lui => dst.add_arg(a(0), true),
        Opcode::Mtc2 => {
            src.add_arg(a(0), true);
            dst.add_arg(a(1), false);
        }
        Opcode::Mfc2 => {
            dst.add_arg(a(0), true);
            src.add_arg(a(1), false);
        }
        Opcode::Ctc2 => {
            src.add_arg(a(0), true);
            [VCC, VCO, VCE].into_iter().for_each(|id| dst.insert(id));
        }
        Opcode::Cfc2 => {
            dst.add_arg(a(0), true);
            [VCC, VCO, VCE].into_iter().for_each(|id| src.insert(id));
        }
        o if o.is_scalar_load() => {
            dst.add_arg(a(0), true);
            src.add_arg(a(1), true);
            mem = MemAccess::Load;
        }
        o if o.is_scalar_store() => {
            src.add_arg(a(0), true);
            src.add_arg(a(1), true);
            mem = MemAccess::Store;
        }
        o if o.is_vector_load() => {
            match o {
                Opcode::Ltv => add_transposed(&mut dst, a(0)),
                Opcode::Lsv => dst.add_arg(a(0), false),
                _ => dst.add_arg(a(0), true),
            }
            src.add_arg(a(2), true);
            mem = MemAccess::Load;
        }
        o if o.is_vector_store() => {
            match o {
                Opcode::Stv => add_transposed(&mut src, a(0)),
                Opcode::Ssv => src.add_arg(a(0), false),
                _ => src.add_arg(a(0), true),
            }
            src.add_arg(a(2), true);
            mem = MemAccess::Store;
        }
        Opcode::Vmov => {
            dst.add_arg(a(0), false);
            src.add_arg(a(1), false);
            dst.insert(ACC);
        }
        o if o.is_reciprocal() => {
            dst.add_arg(a(0), false);
            src.add_arg(a(1), false);
            src.insert(DIV);
            dst.insert(DIV);
            dst.insert(ACC);
        }
        o if o.is_vector_unit() => {
            dst.add_arg(a(0), true);
            src.add_arg(a(1), true);
            src.add_arg(a(2), false);
            dst.insert(ACC);
            if o.accumulates() {
                src.insert(ACC);
            }
            match o {
                Opcode::Vadd | Opcode::Vsub => {
                    src.insert(VCO);
                    dst.insert(VCO);
                }
                Opcode::Vaddc | Opcode::Vsubc => dst.insert(VCO),
                Opcode::Vlt | Opcode::Veq | Opcode::Vne | Opcode::Vge => {
                    src.insert(VCO);
                    dst.insert(VCC);
                    dst.insert(VCO);
                }
                Opcode::Vcl | Opcode::Vch | Opcode::Vcr => {
                    for id in [VCC, VCO, VCE] {
                        src.insert(id);
                        dst.insert(id);
                    }
                }
                Opcode::Vmrg => src.insert(VCC),
                _ => {}
            }
        }
        _ => {
            dst.add_arg(a(0), true);
            for arg in op.args.iter().skip(1) {
                src.add_arg(Some(arg), true);
            }
        }
    }

    OpInfo { src, dst, mem, branch: opcode.is_branch(), barrier: op.debug.barrier.is_some() }
}

pub fn infos(lines: &[AsmLine]) -> Vec<Option<OpInfo>> {
    lines.iter().map(|l| l.as_op().map(analyze)).collect()
}

pub fn in_delay_slot(lines: &[AsmLine], i: usize) -> bool {
    i > 0 && lines[i - 1].is_branch()
}

/// Inclusive range of positions instruction `i` can be moved to.
/// Labels, raw lines, branches and barriers bound the range.
pub fn reorder_range(lines: &[AsmLine], infos: &[Option<OpInfo>], i: usize) -> (usize, usize) {
    let Some(info) = infos[i] else {
        return (i, i);
    };
    if info.branch || info.barrier || lines[i].is_nop() || in_delay_slot(lines, i) {
        return (i, i);
    }

    let mut max = i;
    for j in i + 1..lines.len() {
        match infos[j] {
            Some(other) if !other.branch && !other.barrier && !info.conflicts(&other) => max = j,
            _ => break,
        }
    }

    let mut min = i;
    for j in (0..i).rev() {
        match infos[j] {
            Some(other)
                if !other.branch && !other.barrier && !in_delay_slot(lines, j) && !info.conflicts(&other) =>
            {
                min = j
            }
            _ => break,
        }
    }
    (min, max)
}

/// Move the line at `from` so it ends up at index `to`.
pub fn move_line(lines: &mut Vec<AsmLine>, from: usize, to: usize) {
    let line = lines.remove(from);
    lines.insert(to, line);
}
