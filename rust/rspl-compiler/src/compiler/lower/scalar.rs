//! Scalar instruction selection.

use super::imm::{fits_i16, fits_u16};
use super::{Dst, FuncGen, Src};
use crate::compiler::asm::build::*;
use crate::compiler::asm::{Arg, Opcode};
use crate::compiler::ast::{BinOp, Calc, CmpOp, Compare, Num, Operand, UnaryOp};
use crate::compiler::types::Reg;
use crate::CompileError;

fn log2_exact(v: i64) -> Option<i64> {
    (v > 0 && (v as u64).is_power_of_two()).then(|| v.trailing_zeros() as i64)
}

impl FuncGen<'_> {
    fn int_const(&self, n: Num) -> Result<i64, CompileError> {
        n.as_int().ok_or_else(|| self.err(format!("Float constant {} needs a vector type", n)))
    }

    pub(crate) fn move_scalar(&mut self, dst: Reg, src: Reg) {
        if dst != src {
            self.emit(Opcode::Or, vec![r(dst), r(src), r(Reg::ZERO)]);
        }
    }

    /// Bring an operand into a scalar register, using `scratch` if needed.
    pub(crate) fn scalar_operand(&mut self, src: Src, scratch: Reg) -> Result<Reg, CompileError> {
        match src {
            Src::Var(var) if !var.ty.is_vector() => Ok(var.reg),
            Src::Var(var) => match var.swizzle {
                Some(s) if s.is_single_lane() => {
                    self.emit(Opcode::Mfc2, vec![r(scratch), ve(var.int(), var.elem())]);
                    Ok(scratch)
                }
                _ => Err(self.err("Moving a vector into a scalar needs a single-lane swizzle")),
            },
            Src::Num(n) => {
                let value = self.int_const(n)?;
                self.load_imm(scratch, value as u32);
                Ok(scratch)
            }
            Src::Label(l) => {
                self.emit(Opcode::Ori, vec![r(scratch), r(Reg::ZERO), Arg::LabelLo(l, 0)]);
                Ok(scratch)
            }
        }
    }

    fn check_scalar_types(&self, dst: &Dst, op: BinOp, left: &Src, right: &Src) -> Result<(), CompileError> {
        let ty_of = |s: &Src| match s {
            Src::Var(v) => Some(v.ty),
            _ => None,
        };
        for ty in [ty_of(left), ty_of(right)].into_iter().flatten() {
            if ty != dst.var.ty {
                return Err(self.err(format!(
                    "Type mismatch in '{}': operator '{}' on {} with {} result",
                    dst.name, op, ty, dst.var.ty
                )));
            }
        }
        Ok(())
    }

    pub(crate) fn scalar_assign(&mut self, dst: &Dst, calc: &Calc) -> Result<(), CompileError> {
        let d = dst.var.reg;
        match calc {
            Calc::Num(n) => {
                let value = self.int_const(*n)?;
                self.load_imm(d, value as u32);
            }
            Calc::Var { op: None, operand } => {
                let src = self.resolve(operand)?;
                let s = self.scalar_operand(src, d)?;
                self.move_scalar(d, s);
            }
            Calc::Var { op: Some(op), operand } => {
                let src = self.resolve(operand)?;
                if let Src::Num(n) = src {
                    let v = self.int_const(n)?;
                    let folded = match op {
                        UnaryOp::Neg => v.wrapping_neg(),
                        UnaryOp::Not => !v,
                        UnaryOp::LogicalNot => (v == 0) as i64,
                    };
                    self.load_imm(d, folded as u32);
                    return Ok(());
                }
                let s = self.scalar_operand(src, d)?;
                match op {
                    UnaryOp::Neg => self.emit(Opcode::Subu, vec![r(d), r(Reg::ZERO), r(s)]),
                    UnaryOp::Not => self.emit(Opcode::Nor, vec![r(d), r(s), r(Reg::ZERO)]),
                    UnaryOp::LogicalNot => self.emit(Opcode::Sltiu, vec![r(d), r(s), imm(1)]),
                }
            }
            Calc::VarVar { op, left, right } => self.scalar_var_var(dst, *op, left, right)?,
            Calc::VarNum { op, left, right } => self.scalar_var_num(dst, *op, left, *right)?,
            Calc::Compare { cmp, ternary: None } => self.scalar_compare(dst, cmp)?,
            Calc::Compare { cmp, ternary: Some((a, b)) } => {
                let else_label = self.ctx.next_label();
                let end_label = self.ctx.next_label();
                let negated = Compare { left: cmp.left.clone(), op: cmp.op.negate(), right: cmp.right.clone() };
                self.branch_if(&negated, &else_label)?;
                self.scalar_assign(dst, &Calc::Var { op: None, operand: a.clone() })?;
                self.emit_branch(Opcode::J, vec![label(&end_label)]);
                self.emit_label(&else_label);
                self.scalar_assign(dst, &Calc::Var { op: None, operand: b.clone() })?;
                self.emit_label(&end_label);
            }
            Calc::Func { .. } | Calc::Multi(_) => {
                return Err(self.err("Unexpected expression kind for a scalar assignment"));
            }
        }
        Ok(())
    }

    fn scalar_var_var(&mut self, dst: &Dst, op: BinOp, left: &Operand, right: &Operand) -> Result<(), CompileError> {
        let d = dst.var.reg;
        let l = self.resolve(left)?;
        let rr = self.resolve(right)?;
        self.check_scalar_types(dst, op, &l, &rr)?;
        let signed = match &l {
            Src::Var(v) => v.ty.is_signed(),
            _ => dst.var.ty.is_signed(),
        };
        let right_is_dst = matches!(&rr, Src::Var(v) if v.reg == d);
        let ls = self.scalar_operand(l, if right_is_dst { Reg::AT } else { d })?;
        let rs = match rr {
            Src::Var(_) => self.scalar_operand(rr, Reg::AT)?,
            _ if ls == Reg::AT => {
                return Err(self.err("Expression needs two temporaries, split it into two statements"));
            }
            other => self.scalar_operand(other, Reg::AT)?,
        };
        let opcode = match op {
            BinOp::Add => Opcode::Addu,
            BinOp::Sub => Opcode::Subu,
            BinOp::And => Opcode::And,
            BinOp::Or => Opcode::Or,
            BinOp::Xor => Opcode::Xor,
            BinOp::Nor => Opcode::Nor,
            BinOp::Shl => Opcode::Sllv,
            BinOp::Shr if signed => Opcode::Srav,
            BinOp::Shr => Opcode::Srlv,
            BinOp::Mul | BinOp::Div | BinOp::Mod => {
                return Err(self.err(format!(
                    "Operator '{}' on scalars only supports constant powers of two",
                    op
                )));
            }
            BinOp::MulAdd => {
                return Err(self.err("Operator '+*' is only supported for vector types"));
            }
        };
        self.emit(opcode, vec![r(d), r(ls), r(rs)]);
        Ok(())
    }

    fn scalar_var_num(&mut self, dst: &Dst, op: BinOp, left: &Operand, right: Num) -> Result<(), CompileError> {
        let d = dst.var.reg;
        let v = self.int_const(right)?;
        let l = self.resolve(left)?;
        self.check_scalar_types(dst, op, &l, &Src::Num(right))?;
        if let (Src::Label(name), BinOp::Add | BinOp::Sub) = (&l, op) {
            let offset = if op == BinOp::Add { v } else { -v };
            self.emit(Opcode::Ori, vec![r(d), r(Reg::ZERO), Arg::LabelLo(name.clone(), offset)]);
            return Ok(());
        }
        let signed = match &l {
            Src::Var(var) => var.ty.is_signed(),
            _ => dst.var.ty.is_signed(),
        };
        let ls = self.scalar_operand(l, d)?;

        match op {
            BinOp::Add | BinOp::Sub => {
                let add = if op == BinOp::Add { v } else { v.wrapping_neg() };
                if add == 0 {
                    self.move_scalar(d, ls);
                } else if fits_i16(add) {
                    self.emit(Opcode::Addiu, vec![r(d), r(ls), imm(add)]);
                } else {
                    self.load_imm(Reg::AT, v as u32);
                    let opcode = if op == BinOp::Add { Opcode::Addu } else { Opcode::Subu };
                    self.emit(opcode, vec![r(d), r(ls), r(Reg::AT)]);
                }
            }
            BinOp::Mul => match (v, log2_exact(v)) {
                (0, _) => self.load_imm(d, 0),
                (_, Some(0)) => self.move_scalar(d, ls),
                (_, Some(shift)) => self.emit(Opcode::Sll, vec![r(d), r(ls), imm(shift)]),
                _ => return Err(self.err(format!("Multiplication by {} is not supported, only powers of two", v))),
            },
            BinOp::Div => match (v, log2_exact(v)) {
                (0, _) => return Err(self.err("Division by zero")),
                (_, Some(0)) => self.move_scalar(d, ls),
                (_, Some(shift)) => {
                    let opcode = if signed { Opcode::Sra } else { Opcode::Srl };
                    self.emit(opcode, vec![r(d), r(ls), imm(shift)]);
                }
                _ => return Err(self.err(format!("Division by {} is not supported, only powers of two", v))),
            },
            BinOp::Mod => match log2_exact(v) {
                Some(_) if fits_u16(v - 1) => self.emit(Opcode::Andi, vec![r(d), r(ls), hex((v - 1) as u32)]),
                Some(_) => {
                    self.load_imm(Reg::AT, (v - 1) as u32);
                    self.emit(Opcode::And, vec![r(d), r(ls), r(Reg::AT)]);
                }
                None => return Err(self.err(format!("Modulo by {} is not supported, only powers of two", v))),
            },
            BinOp::And | BinOp::Or | BinOp::Xor => {
                let (imm_op, reg_op) = match op {
                    BinOp::And => (Opcode::Andi, Opcode::And),
                    BinOp::Or => (Opcode::Ori, Opcode::Or),
                    _ => (Opcode::Xori, Opcode::Xor),
                };
                if fits_u16(v) {
                    self.emit(imm_op, vec![r(d), r(ls), hex(v as u32)]);
                } else {
                    self.load_imm(Reg::AT, v as u32);
                    self.emit(reg_op, vec![r(d), r(ls), r(Reg::AT)]);
                }
            }
            BinOp::Nor => {
                let rs = if v == 0 {
                    Reg::ZERO
                } else {
                    self.load_imm(Reg::AT, v as u32);
                    Reg::AT
                };
                self.emit(Opcode::Nor, vec![r(d), r(ls), r(rs)]);
            }
            BinOp::Shl | BinOp::Shr => {
                if !(0..32).contains(&v) {
                    return Err(self.err(format!("Shift amount {} is out of range (0-31)", v)));
                }
                let opcode = match op {
                    BinOp::Shl => Opcode::Sll,
                    _ if signed => Opcode::Sra,
                    _ => Opcode::Srl,
                };
                self.emit(opcode, vec![r(d), r(ls), imm(v)]);
            }
            BinOp::MulAdd => return Err(self.err("Operator '+*' is only supported for vector types")),
        }
        Ok(())
    }

    /// `d = l CMP r` as 0 or 1.
    fn scalar_compare(&mut self, dst: &Dst, cmp: &Compare) -> Result<(), CompileError> {
        let d = dst.var.reg;
        let mut l = self.resolve(&cmp.left)?;
        let mut rr = self.resolve(&cmp.right)?;
        let mut op = cmp.op;
        if !matches!(l, Src::Var(_)) && matches!(rr, Src::Var(_)) {
            std::mem::swap(&mut l, &mut rr);
            op = op.swap();
        }
        let signed = match &l {
            Src::Var(v) => v.ty.is_signed(),
            _ => dst.var.ty.is_signed(),
        };
        let ls = self.scalar_operand(l, Reg::AT)?;
        let right_imm = match &rr {
            Src::Num(n) => Some(self.int_const(*n)?),
            _ => None,
        };
        let (slt, slti) = if signed { (Opcode::Slt, Opcode::Slti) } else { (Opcode::Sltu, Opcode::Sltiu) };

        match op {
            CmpOp::Eq | CmpOp::Ne => {
                let diff = match right_imm {
                    Some(0) => ls,
                    Some(v) if fits_u16(v) => {
                        self.emit(Opcode::Xori, vec![r(d), r(ls), hex(v as u32)]);
                        d
                    }
                    _ => {
                        let scratch = if ls == Reg::AT { d } else { Reg::AT };
                        let rs = self.scalar_operand(rr, scratch)?;
                        self.emit(Opcode::Xor, vec![r(d), r(ls), r(rs)]);
                        d
                    }
                };
                if op == CmpOp::Eq {
                    self.emit(Opcode::Sltiu, vec![r(d), r(diff), imm(1)]);
                } else {
                    self.emit(Opcode::Sltu, vec![r(d), r(Reg::ZERO), r(diff)]);
                }
            }
            CmpOp::Lt | CmpOp::Ge => {
                match right_imm {
                    Some(v) if fits_i16(v) => self.emit(slti, vec![r(d), r(ls), imm(v)]),
                    _ => {
                        let scratch = if ls == Reg::AT { d } else { Reg::AT };
                        let rs = self.scalar_operand(rr, scratch)?;
                        self.emit(slt, vec![r(d), r(ls), r(rs)]);
                    }
                }
                if op == CmpOp::Ge {
                    self.emit(Opcode::Xori, vec![r(d), r(d), imm(1)]);
                }
            }
            CmpOp::Gt | CmpOp::Le => {
                let scratch = if ls == Reg::AT { d } else { Reg::AT };
                let rs = self.scalar_operand(rr, scratch)?;
                self.emit(slt, vec![r(d), r(rs), r(ls)]);
                if op == CmpOp::Le {
                    self.emit(Opcode::Xori, vec![r(d), r(d), imm(1)]);
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::compiler::context::CompilerContext;
    use crate::compiler::lexer::Lexer;
    use crate::compiler::normalize::normalize;
    use crate::compiler::parser::parse;
    use crate::CompileConfig;

    fn body(stmts: &str) -> Result<Vec<String>, String> {
        let src = format!("function f() {{ u32<$t0> a; u32<$t1> b; s32<$t2> s; s32<$t3> t; {} }}", stmts);
        let tokens = Lexer::new(&src).tokenize().map_err(|e| e.to_string())?;
        let mut program = parse(tokens).map_err(|e| e.to_string())?;
        let mut ctx = CompilerContext::new(CompileConfig::default());
        normalize(&mut program, &mut ctx).map_err(|e| e.to_string())?;
        let funcs = super::super::lower_program(&program, &mut ctx).map_err(|e| e.to_string())?;
        let mut lines: Vec<String> = funcs[0].lines.iter().map(|l| l.to_string().trim().to_string()).collect();
        lines.truncate(lines.len() - 2);
        Ok(lines)
    }

    #[test]
    fn test_add_sub_immediates() {
        assert_eq!(body("a = b + 4;").unwrap(), vec!["addiu $t0, $t1, 4"]);
        assert_eq!(body("a = b - 4;").unwrap(), vec!["addiu $t0, $t1, -4"]);
        assert_eq!(
            body("a = b + 0x12345;").unwrap(),
            vec!["lui $at, 0x0001", "ori $at, $at, 0x2345", "addu $t0, $t1, $at"]
        );
    }

    #[test]
    fn test_power_of_two_ops() {
        assert_eq!(body("a = b * 8;").unwrap(), vec!["sll $t0, $t1, 3"]);
        assert_eq!(body("a = b / 4;").unwrap(), vec!["srl $t0, $t1, 2"]);
        assert_eq!(body("s = t / 4;").unwrap(), vec!["sra $t2, $t3, 2"]);
        assert_eq!(body("a = b % 16;").unwrap(), vec!["andi $t0, $t1, 0x000F"]);
        assert!(body("a = b * 3;").unwrap_err().contains("powers of two"));
        assert!(body("a = b * a;").unwrap_err().contains("powers of two"));
    }

    #[test]
    fn test_logic_and_shifts() {
        assert_eq!(body("a = b & 0xFF;").unwrap(), vec!["andi $t0, $t1, 0x00FF"]);
        assert_eq!(body("a = b ^ a;").unwrap(), vec!["xor $t0, $t1, $t0"]);
        assert_eq!(body("a = b << a;").unwrap(), vec!["sllv $t0, $t1, $t0"]);
        assert_eq!(body("s = t >> 3;").unwrap(), vec!["sra $t2, $t3, 3"]);
        assert!(body("a = b << 32;").unwrap_err().contains("out of range"));
    }

    #[test]
    fn test_unary_ops() {
        assert_eq!(body("a = ~b;").unwrap(), vec!["nor $t0, $t1, $zero"]);
        assert_eq!(body("s = -t;").unwrap(), vec!["subu $t2, $zero, $t3"]);
        assert_eq!(body("a = !b;").unwrap(), vec!["sltiu $t0, $t1, 1"]);
    }

    #[test]
    fn test_type_mismatch_is_fatal() {
        assert!(body("a = b + s;").unwrap_err().contains("Type mismatch"));
    }

    #[test]
    fn test_compare_to_bool() {
        assert_eq!(body("a = b < 10;").unwrap(), vec!["sltiu $t0, $t1, 10"]);
        assert_eq!(body("a = b == 0;").unwrap(), vec!["sltiu $t0, $t1, 1"]);
        assert_eq!(body("s = t > s;").unwrap(), vec!["slt $t2, $t2, $t3"]);
    }
}
