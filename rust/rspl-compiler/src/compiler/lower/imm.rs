//! Constant materialisation and compare-and-branch lowering.

use super::{FuncGen, Src};
use crate::compiler::asm::build::*;
use crate::compiler::asm::{Arg, AsmOp, Opcode};
use crate::compiler::ast::{CmpOp, Compare, Num};
use crate::compiler::types::Reg;
use crate::CompileError;

/// Shortest sequence loading `value` into `dst`.
///
/// The rule order matters: later peepholes match on these exact shapes.
pub fn imm_load_sequence(dst: Reg, value: u32) -> Vec<AsmOp> {
    let signed = value as i32;
    if value == 0 {
        vec![AsmOp::new(Opcode::Or, vec![r(dst), r(Reg::ZERO), r(Reg::ZERO)])]
    } else if (-0x8000..=0x7FFF).contains(&signed) {
        vec![AsmOp::new(Opcode::Addiu, vec![r(dst), r(Reg::ZERO), imm(signed as i64)])]
    } else if value <= 0xFFFF {
        vec![AsmOp::new(Opcode::Ori, vec![r(dst), r(Reg::ZERO), hex(value)])]
    } else if value & 0xFFFF == 0 {
        vec![AsmOp::new(Opcode::Lui, vec![r(dst), hex(value >> 16)])]
    } else {
        vec![
            AsmOp::new(Opcode::Lui, vec![r(dst), hex(value >> 16)]),
            AsmOp::new(Opcode::Ori, vec![r(dst), r(dst), hex(value & 0xFFFF)]),
        ]
    }
}

pub(crate) fn fits_i16(value: i64) -> bool {
    (-0x8000..=0x7FFF).contains(&value)
}

pub(crate) fn fits_u16(value: i64) -> bool {
    (0..=0xFFFF).contains(&value)
}

/// Right-hand side of a scalar comparison after resolution.
enum Rhs {
    Reg(Reg),
    Imm(i64),
}

fn eval_cmp(op: CmpOp, a: f64, b: f64) -> bool {
    match op {
        CmpOp::Eq => a == b,
        CmpOp::Ne => a != b,
        CmpOp::Lt => a < b,
        CmpOp::Le => a <= b,
        CmpOp::Gt => a > b,
        CmpOp::Ge => a >= b,
    }
}

fn num_value(n: Num) -> f64 {
    match n {
        Num::Int(v) => v as f64,
        Num::Float(f) => f,
    }
}

impl FuncGen<'_> {
    pub(crate) fn load_imm(&mut self, dst: Reg, value: u32) {
        for op in imm_load_sequence(dst, value) {
            self.emit(op.opcode, op.args);
        }
    }

    /// Branch to `target` when `cmp` holds, followed by its delay slot.
    pub(crate) fn branch_if(&mut self, cmp: &Compare, target: &str) -> Result<(), CompileError> {
        let mut left = self.resolve(&cmp.left)?;
        let mut right = self.resolve(&cmp.right)?;
        let mut op = cmp.op;
        if !matches!(left, Src::Var(_)) && matches!(right, Src::Var(_)) {
            std::mem::swap(&mut left, &mut right);
            op = op.swap();
        }

        let lhs = match left {
            Src::Var(var) if !var.ty.is_vector() => var,
            Src::Var(_) => {
                return Err(self.err("Conditions need scalar operands, compare vectors with an assignment instead"));
            }
            Src::Num(a) => {
                let Src::Num(b) = right else {
                    return Err(self.err("State variables cannot be compared directly, load() them first"));
                };
                if eval_cmp(op, num_value(a), num_value(b)) {
                    self.emit_branch(Opcode::J, vec![label(target)]);
                }
                return Ok(());
            }
            Src::Label(l) => {
                return Err(self.err(format!(
                    "State variable '{}' cannot be compared directly, load() it first",
                    l
                )));
            }
        };

        let rhs = match right {
            Src::Var(var) if !var.ty.is_vector() => Rhs::Reg(var.reg),
            Src::Var(_) => {
                return Err(self.err("Conditions need scalar operands, compare vectors with an assignment instead"));
            }
            Src::Num(n) => Rhs::Imm(
                n.as_int().ok_or_else(|| self.err("Float constants cannot be compared with scalar variables"))?,
            ),
            Src::Label(l) => {
                self.emit(Opcode::Ori, vec![r(Reg::AT), r(Reg::ZERO), Arg::LabelLo(l, 0)]);
                Rhs::Reg(Reg::AT)
            }
        };

        if matches!(op, CmpOp::Eq | CmpOp::Ne) {
            let opcode = if op == CmpOp::Eq { Opcode::Beq } else { Opcode::Bne };
            let other = match rhs {
                Rhs::Reg(reg) => reg,
                Rhs::Imm(0) => Reg::ZERO,
                Rhs::Imm(v) => {
                    self.load_imm(Reg::AT, v as u32);
                    Reg::AT
                }
            };
            self.emit_branch(opcode, vec![r(lhs.reg), r(other), label(target)]);
            return Ok(());
        }

        let signed = lhs.ty.is_signed();
        let slt = if signed { Opcode::Slt } else { Opcode::Sltu };
        let op = match rhs {
            Rhs::Reg(other) => {
                let (a, b, op) = match op {
                    CmpOp::Gt => (other, lhs.reg, CmpOp::Lt),
                    CmpOp::Le => (other, lhs.reg, CmpOp::Ge),
                    op => (lhs.reg, other, op),
                };
                self.emit(slt, vec![r(Reg::AT), r(a), r(b)]);
                op
            }
            Rhs::Imm(v) => {
                let (v, op) = match op {
                    CmpOp::Gt => (v.wrapping_add(1), CmpOp::Ge),
                    CmpOp::Le => (v.wrapping_add(1), CmpOp::Lt),
                    op => (v, op),
                };
                let v32 = v as u32;
                if fits_i16(v32 as i32 as i64) {
                    let slti = if signed { Opcode::Slti } else { Opcode::Sltiu };
                    self.emit(slti, vec![r(Reg::AT), r(lhs.reg), imm(v32 as i32 as i64)]);
                } else {
                    self.load_imm(Reg::AT, v32);
                    self.emit(slt, vec![r(Reg::AT), r(lhs.reg), r(Reg::AT)]);
                }
                op
            }
        };
        let opcode = if op == CmpOp::Lt { Opcode::Bne } else { Opcode::Beq };
        self.emit_branch(opcode, vec![r(Reg::AT), r(Reg::ZERO), label(target)]);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn render(value: u32) -> Vec<String> {
        imm_load_sequence(Reg::Scalar(8), value).iter().map(|op| op.to_string()).collect()
    }

    #[test]
    fn test_immediate_decision_table() {
        assert_eq!(render(0), vec!["or $t0, $zero, $zero"]);
        assert_eq!(render(0x7FFF), vec!["addiu $t0, $zero, 32767"]);
        assert_eq!(render(0x8000), vec!["ori $t0, $zero, 0x8000"]);
        assert_eq!(render(0xFFFF_8000), vec!["addiu $t0, $zero, -32768"]);
        assert_eq!(render(0x0012_0000), vec!["lui $t0, 0x0012"]);
        assert_eq!(render(0x0012_3456), vec!["lui $t0, 0x0012", "ori $t0, $t0, 0x3456"]);
    }

    #[test]
    fn test_range_helpers() {
        assert!(fits_i16(-32768) && !fits_i16(32768));
        assert!(fits_u16(0xFFFF) && !fits_u16(-1));
    }
}
