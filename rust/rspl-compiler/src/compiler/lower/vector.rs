//! Vector instruction selection. `vec32` operations run the same sequence on
//! both halves: fraction first so carries propagate into the integer part.

use super::{Dst, FuncGen, Src, VarRef};
use crate::compiler::asm::build::*;
use crate::compiler::asm::Opcode;
use crate::compiler::ast::{BinOp, Calc, CmpOp, Compare, Num, Operand, UnaryOp};
use crate::compiler::types::{DataType, Reg, Swizzle, VElem};
use crate::CompileError;

/// Split a constant into the (integer, fraction) register patterns of `ty`.
pub(crate) fn vector_const_parts(n: Num, ty: DataType) -> Result<(u16, u16), String> {
    match (ty, n) {
        (DataType::Vec16, Num::Int(v)) if (-0x8000..=0xFFFF).contains(&v) => Ok((v as u16, 0)),
        (DataType::Vec16, Num::Int(v)) => Err(format!("Constant {} does not fit into 16 bits", v)),
        (DataType::Vec16, Num::Float(f)) if (-1.0..1.0).contains(&f) => {
            Ok(((f * 32768.0).round() as i32 as u16, 0))
        }
        (DataType::Vec16, Num::Float(f)) => {
            Err(format!("Float constant {} is out of range for vec16 (-1.0 to 1.0)", f))
        }
        (_, n) => {
            let fixed = match n {
                Num::Int(v) => v << 16,
                Num::Float(f) => (f * 65536.0).round() as i64,
            };
            if !(-(1i64 << 31)..(1i64 << 32)).contains(&fixed) {
                return Err(format!("Constant {} does not fit into vec32", n));
            }
            Ok(((fixed >> 16) as u16, fixed as u16))
        }
    }
}

fn lane_of(swizzle: Option<Swizzle>) -> Option<u8> {
    match swizzle {
        Some(Swizzle::Lane(n)) => Some(n),
        _ => None,
    }
}

impl FuncGen<'_> {
    /// Fill one register (or one lane of it) with a 16-bit pattern.
    pub(crate) fn vector_fill(&mut self, reg: Reg, value: u16, lane: Option<u8>) {
        match (value, lane) {
            (0, None) => self.emit(Opcode::Vxor, vec![v(reg), v(Reg::VZERO), v(Reg::VZERO)]),
            (0, Some(l)) => self.emit(Opcode::Vmov, vec![e(reg, l), e(Reg::VZERO, l)]),
            (value, Some(l)) => {
                self.load_imm(Reg::AT, value as u32);
                self.emit(Opcode::Mtc2, vec![r(Reg::AT), e(reg, l)]);
            }
            (value, None) => {
                self.load_imm(Reg::AT, value as u32);
                self.emit(Opcode::Mtc2, vec![r(Reg::AT), e(reg, 0)]);
                self.emit(Opcode::Vor, vec![v(reg), v(Reg::VZERO), e(reg, 0)]);
            }
        }
    }

    fn vector_const(&mut self, dst: &VarRef, n: Num, lane: Option<u8>) -> Result<(), CompileError> {
        let (int, frac) = vector_const_parts(n, dst.ty).map_err(|m| self.err(m))?;
        self.vector_fill(dst.int(), int, lane);
        if dst.is_vec32() {
            self.vector_fill(dst.frac(), frac, lane);
        }
        Ok(())
    }

    /// Constant as a broadcast operand in `$v27.e0`.
    pub(crate) fn vector_const_operand(&mut self, n: Num, ty: DataType) -> Result<VarRef, CompileError> {
        let (int, frac) = vector_const_parts(n, ty).map_err(|m| self.err(m))?;
        if frac != 0 {
            return Err(self.err("Operations with a fractional vec32 constant need a variable operand"));
        }
        if int == 0 {
            return Ok(VarRef { reg: Reg::VZERO, ty: DataType::Vec16, swizzle: None });
        }
        self.load_imm(Reg::AT, int as u32);
        self.emit(Opcode::Mtc2, vec![r(Reg::AT), e(Reg::VTEMP, 0)]);
        Ok(VarRef { reg: Reg::VTEMP, ty: DataType::Vec16, swizzle: Some(Swizzle::Broadcast(0)) })
    }

    /// Resolve a vector operand; numbers become broadcast constants.
    fn vector_operand(&mut self, op: &Operand, ty: DataType) -> Result<VarRef, CompileError> {
        match self.resolve(op)? {
            Src::Var(var) if var.ty.is_vector() => Ok(var),
            Src::Var(_) => Err(self.err(format!(
                "Scalar variable '{}' cannot be used in a vector operation",
                op
            ))),
            Src::Num(n) => self.vector_const_operand(n, ty),
            Src::Label(l) => Err(self.err(format!("State variable '{}' must be read with load()", l))),
        }
    }

    fn unswizzled_left(&self, var: &VarRef) -> Result<(), CompileError> {
        if var.swizzle.is_some() {
            return Err(self.err("Left operand of a vector operation cannot be swizzled"));
        }
        Ok(())
    }

    /// Fractional half of a right operand (zero for `vec16`).
    fn frac_of(var: &VarRef) -> (Reg, Option<VElem>) {
        if var.is_vec32() {
            (var.frac(), var.elem())
        } else {
            (Reg::VZERO, None)
        }
    }

    pub(crate) fn vector_assign(&mut self, dst: &Dst, calc: &Calc) -> Result<(), CompileError> {
        let d = dst.var;
        if d.swizzle.is_some() && !matches!(calc, Calc::Num(_) | Calc::Var { op: None, .. }) {
            return Err(self.err("Swizzle on the destination is only supported for lane moves and constants"));
        }
        match calc {
            Calc::Num(n) => self.vector_assign_const(&d, *n),
            Calc::Var { op: None, operand } => self.vector_move(&d, operand),
            Calc::Var { op: Some(op), operand } => {
                let s = self.vector_operand(operand, d.ty)?;
                if s.ty != d.ty && s.reg != Reg::VTEMP && s.reg != Reg::VZERO {
                    return Err(self.err(format!("Type mismatch in '{}': {} into {}", dst.name, s.ty, d.ty)));
                }
                let (sf, sfe) = Self::frac_of(&s);
                match op {
                    UnaryOp::Neg if d.is_vec32() => {
                        self.emit(Opcode::Vsubc, vec![v(d.frac()), v(Reg::VZERO), ve(sf, sfe)]);
                        self.emit(Opcode::Vsub, vec![v(d.int()), v(Reg::VZERO), ve(s.int(), s.elem())]);
                    }
                    UnaryOp::Neg => self.emit(Opcode::Vsub, vec![v(d.int()), v(Reg::VZERO), ve(s.int(), s.elem())]),
                    UnaryOp::Not => {
                        if d.is_vec32() {
                            self.emit(Opcode::Vnor, vec![v(d.frac()), v(Reg::VZERO), ve(sf, sfe)]);
                        }
                        self.emit(Opcode::Vnor, vec![v(d.int()), v(Reg::VZERO), ve(s.int(), s.elem())]);
                    }
                    UnaryOp::LogicalNot => {
                        return Err(self.err("Operator '!' is not supported for vector types"));
                    }
                }
                Ok(())
            }
            Calc::VarVar { op, left, right } => {
                let l = self.vector_operand(left, d.ty)?;
                self.unswizzled_left(&l)?;
                let rr = self.vector_operand(right, d.ty)?;
                self.check_vector_types(dst, *op, &l, &rr)?;
                self.vector_binop(&d, *op, &l, &rr)
            }
            Calc::VarNum { op, left, right } => {
                let l = self.vector_operand(left, d.ty)?;
                self.unswizzled_left(&l)?;
                self.check_vector_types(dst, *op, &l, &l)?;
                let rr = self.vector_const_operand(*right, d.ty)?;
                self.vector_binop(&d, *op, &l, &rr)
            }
            Calc::Compare { cmp, ternary } => self.vector_compare(&d, cmp, ternary.as_ref()),
            Calc::Func { .. } | Calc::Multi(_) => {
                Err(self.err("Unexpected expression kind for a vector assignment"))
            }
        }
    }

    fn check_vector_types(&self, dst: &Dst, op: BinOp, l: &VarRef, rr: &VarRef) -> Result<(), CompileError> {
        let const_operand = rr.reg == Reg::VTEMP || rr.reg == Reg::VZERO;
        let widening_mul = matches!(op, BinOp::Mul | BinOp::MulAdd) && dst.var.is_vec32() && rr.ty == DataType::Vec16;
        if l.ty != dst.var.ty || (rr.ty != dst.var.ty && !const_operand && !widening_mul) {
            return Err(self.err(format!(
                "Type mismatch in '{}': operator '{}' on {} and {} with {} result",
                dst.name, op, l.ty, rr.ty, dst.var.ty
            )));
        }
        Ok(())
    }

    fn vector_assign_const(&mut self, d: &VarRef, n: Num) -> Result<(), CompileError> {
        match d.swizzle {
            None => self.vector_const(d, n, None),
            Some(Swizzle::Lane(l)) => self.vector_const(d, n, Some(l)),
            Some(_) => Err(self.err("Constants can only be written to a single lane or the whole vector")),
        }
    }

    fn vector_move(&mut self, d: &VarRef, operand: &Operand) -> Result<(), CompileError> {
        let src = self.resolve(operand)?;
        let s = match src {
            Src::Num(n) => return self.vector_assign_const(d, n),
            Src::Label(l) => return Err(self.err(format!("State variable '{}' must be read with load()", l))),
            Src::Var(s) => s,
        };

        if !s.ty.is_vector() {
            let Some(lane) = lane_of(d.swizzle) else {
                return Err(self.err("Assigning a scalar to a vector needs a single-lane swizzle on the target"));
            };
            self.emit(Opcode::Mtc2, vec![r(s.reg), e(d.int(), lane)]);
            if d.is_vec32() {
                self.emit(Opcode::Mtc2, vec![r(Reg::ZERO), e(d.frac(), lane)]);
            }
            return Ok(());
        }

        if let Some(dst_swizzle) = d.swizzle {
            let (Some(dl), Some(sl)) = (lane_of(Some(dst_swizzle)), lane_of(s.swizzle)) else {
                return Err(self.err("Vector lane moves need a single-lane swizzle on both operands"));
            };
            self.emit(Opcode::Vmov, vec![e(d.int(), dl), e(s.int(), sl)]);
            if d.is_vec32() {
                let (sf, _) = Self::frac_of(&s);
                let sl = if sf == Reg::VZERO { dl } else { sl };
                self.emit(Opcode::Vmov, vec![e(d.frac(), dl), e(sf, sl)]);
            }
            return Ok(());
        }

        if s.swizzle.is_none() && s.reg == d.reg && s.ty == d.ty {
            return Ok(());
        }
        self.emit(Opcode::Vor, vec![v(d.int()), v(Reg::VZERO), ve(s.int(), s.elem())]);
        if d.is_vec32() {
            if s.is_vec32() {
                self.emit(Opcode::Vor, vec![v(d.frac()), v(Reg::VZERO), ve(s.frac(), s.elem())]);
            } else {
                self.emit(Opcode::Vxor, vec![v(d.frac()), v(Reg::VZERO), v(Reg::VZERO)]);
            }
        }
        Ok(())
    }

    pub(crate) fn vector_binop(&mut self, d: &VarRef, op: BinOp, l: &VarRef, rr: &VarRef) -> Result<(), CompileError> {
        let re = rr.elem();
        let (rf, rfe) = Self::frac_of(rr);
        let vec32 = d.is_vec32();
        match op {
            BinOp::Add | BinOp::Sub => {
                let (carry, plain) = if op == BinOp::Add {
                    (Opcode::Vaddc, Opcode::Vadd)
                } else {
                    (Opcode::Vsubc, Opcode::Vsub)
                };
                if vec32 {
                    self.emit(carry, vec![v(d.frac()), v(l.frac()), ve(rf, rfe)]);
                }
                self.emit(plain, vec![v(d.int()), v(l.int()), ve(rr.int(), re)]);
            }
            BinOp::Mul | BinOp::MulAdd => {
                let acc = op == BinOp::MulAdd;
                match (vec32, rr.is_vec32()) {
                    (false, _) => {
                        let opcode = if acc { Opcode::Vmadh } else { Opcode::Vmudh };
                        self.emit(opcode, vec![v(d.int()), v(l.int()), ve(rr.int(), re)]);
                    }
                    (true, true) => {
                        let first = if acc { Opcode::Vmadl } else { Opcode::Vmudl };
                        self.emit(first, vec![v(Reg::VTEMP), v(l.frac()), ve(rr.frac(), re)]);
                        self.emit(Opcode::Vmadm, vec![v(Reg::VTEMP), v(l.int()), ve(rr.frac(), re)]);
                        self.emit(Opcode::Vmadn, vec![v(d.frac()), v(l.frac()), ve(rr.int(), re)]);
                        self.emit(Opcode::Vmadh, vec![v(d.int()), v(l.int()), ve(rr.int(), re)]);
                    }
                    (true, false) => {
                        let first = if acc { Opcode::Vmadn } else { Opcode::Vmudn };
                        self.emit(first, vec![v(d.frac()), v(l.frac()), ve(rr.int(), re)]);
                        self.emit(Opcode::Vmadh, vec![v(d.int()), v(l.int()), ve(rr.int(), re)]);
                    }
                }
            }
            BinOp::And | BinOp::Or | BinOp::Xor | BinOp::Nor => {
                let opcode = match op {
                    BinOp::And => Opcode::Vand,
                    BinOp::Or => Opcode::Vor,
                    BinOp::Xor => Opcode::Vxor,
                    _ => Opcode::Vnor,
                };
                if vec32 {
                    self.emit(opcode, vec![v(d.frac()), v(l.frac()), ve(rf, rfe)]);
                }
                self.emit(opcode, vec![v(d.int()), v(l.int()), ve(rr.int(), re)]);
            }
            BinOp::Div | BinOp::Mod | BinOp::Shl | BinOp::Shr => {
                return Err(self.err(format!("Operator '{}' is not supported for vector types", op)));
            }
        }
        Ok(())
    }

    /// Per-lane merge of `x` and `y` using the VCC flags of the last compare.
    pub(crate) fn vector_merge(&mut self, d: &VarRef, x: &VarRef, y: &VarRef) -> Result<(), CompileError> {
        if x.swizzle.is_some() {
            return Err(self.err("First operand of a vector select cannot be swizzled"));
        }
        let (xf, _) = Self::frac_of(x);
        let (yf, yfe) = Self::frac_of(y);
        self.emit(Opcode::Vmrg, vec![v(d.int()), v(x.int()), ve(y.int(), y.elem())]);
        if d.is_vec32() {
            self.emit(Opcode::Vmrg, vec![v(d.frac()), v(xf), ve(yf, yfe)]);
        }
        Ok(())
    }

    fn vector_compare(
        &mut self,
        d: &VarRef,
        cmp: &Compare,
        ternary: Option<&(Operand, Operand)>,
    ) -> Result<(), CompileError> {
        let l = self.vector_operand(&cmp.left, d.ty)?;
        self.unswizzled_left(&l)?;
        let rr = self.vector_operand(&cmp.right, d.ty)?;
        let (opcode, a, b) = match cmp.op {
            CmpOp::Lt => (Opcode::Vlt, l, rr),
            CmpOp::Ge => (Opcode::Vge, l, rr),
            CmpOp::Eq => (Opcode::Veq, l, rr),
            CmpOp::Ne => (Opcode::Vne, l, rr),
            CmpOp::Gt | CmpOp::Le => {
                if rr.swizzle.is_some() {
                    return Err(self.err(format!(
                        "Comparison '{}' needs an unswizzled right operand, rewrite it with '{}'",
                        cmp.op,
                        cmp.op.swap()
                    )));
                }
                let opcode = if cmp.op == CmpOp::Gt { Opcode::Vlt } else { Opcode::Vge };
                (opcode, rr, l)
            }
        };

        match ternary {
            None => {
                self.emit(opcode, vec![v(d.int()), v(a.int()), ve(b.int(), b.elem())]);
                if d.is_vec32() {
                    let (af, _) = Self::frac_of(&a);
                    let (bf, bfe) = Self::frac_of(&b);
                    self.emit(Opcode::Vmrg, vec![v(d.frac()), v(af), ve(bf, bfe)]);
                }
            }
            Some((x, y)) => {
                self.emit(opcode, vec![v(Reg::VTEMP), v(a.int()), ve(b.int(), b.elem())]);
                let x = self.vector_operand(x, d.ty)?;
                let y = self.vector_operand(y, d.ty)?;
                self.vector_merge(d, &x, &y)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::vector_const_parts;
    use crate::compiler::ast::Num;
    use crate::compiler::context::CompilerContext;
    use crate::compiler::lexer::Lexer;
    use crate::compiler::normalize::normalize;
    use crate::compiler::parser::parse;
    use crate::compiler::types::DataType;
    use crate::CompileConfig;

    fn body(stmts: &str) -> Result<Vec<String>, String> {
        let src = format!(
            "function f() {{ vec16<$v01> a; vec16<$v02> b; vec32<$v04> p; vec32<$v06> q; u32<$t0> s; {} }}",
            stmts
        );
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
    fn test_const_parts() {
        assert_eq!(vector_const_parts(Num::Float(0.5), DataType::Vec16), Ok((0x4000, 0)));
        assert_eq!(vector_const_parts(Num::Float(1.5), DataType::Vec32), Ok((1, 0x8000)));
        assert_eq!(vector_const_parts(Num::Int(-1), DataType::Vec32), Ok((0xFFFF, 0)));
        assert!(vector_const_parts(Num::Int(70000), DataType::Vec16).is_err());
    }

    #[test]
    fn test_moves_and_constants() {
        assert_eq!(body("a = b;").unwrap(), vec!["vor $v01, $v00, $v02"]);
        assert_eq!(body("a = 0;").unwrap(), vec!["vxor $v01, $v00, $v00"]);
        assert_eq!(body("a.x = b.Y;").unwrap(), vec!["vmov $v01.e0, $v02.e5"]);
        assert_eq!(body("a.y = s;").unwrap(), vec!["mtc2 $t0, $v01.e1"]);
        assert_eq!(body("s = a.z;").unwrap(), vec!["mfc2 $t0, $v01.e2"]);
        assert!(body("a.x = b;").unwrap_err().contains("single-lane swizzle on both"));
        assert!(body("a = s;").unwrap_err().contains("single-lane swizzle on the target"));
    }

    #[test]
    fn test_vec32_multiply_chain() {
        assert_eq!(
            body("p = p * q;").unwrap(),
            vec![
                "vmudl $v27, $v05, $v07",
                "vmadm $v27, $v04, $v07",
                "vmadn $v05, $v05, $v06",
                "vmadh $v04, $v04, $v06",
            ]
        );
        assert_eq!(body("a = a * b.x;").unwrap(), vec!["vmudh $v01, $v01, $v02.e0"]);
    }

    #[test]
    fn test_vec32_add_carries() {
        assert_eq!(body("p = p + q;").unwrap(), vec!["vaddc $v05, $v05, $v07", "vadd $v04, $v04, $v06"]);
    }

    #[test]
    fn test_vector_errors() {
        assert!(body("a = b / a;").unwrap_err().contains("not supported for vector types"));
        assert!(body("a = b.x + a;").unwrap_err().contains("cannot be swizzled"));
        assert!(body("a = p + b;").unwrap_err().contains("Type mismatch"));
    }

    #[test]
    fn test_ternary_uses_merge() {
        assert_eq!(body("a = a < b ? a : b;").unwrap(), vec!["vlt $v27, $v01, $v02", "vmrg $v01, $v01, $v02"]);
    }
}
