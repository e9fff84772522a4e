//! Builtin functions: memory access, lane selection, reciprocals, `swap`
//! and `assert`.

use super::{Dst, FuncGen, Src, VarRef};
use crate::compiler::asm::build::*;
use crate::compiler::asm::{Arg, Opcode, ASSERT_HANDLER};
use crate::compiler::ast::{CallArg, Operand};
use crate::compiler::types::{DataType, Reg, Swizzle};
use crate::CompileError;

const STATEMENT_BUILTINS: &[&str] =
    &["store", "store_vec_u8", "store_vec_s8", "store_transposed", "swap", "assert"];

const VALUE_BUILTINS: &[&str] = &[
    "load",
    "load_vec_u8",
    "load_vec_s8",
    "load_transposed",
    "select",
    "invert",
    "invert_half",
    "invert_half_sqrt",
];

/// Registers a transposed load/store can address.
const TRANSPOSE_REGS: [u8; 4] = [0, 8, 16, 24];

pub(crate) fn is_statement_builtin(name: &str) -> bool {
    STATEMENT_BUILTINS.contains(&name)
}

pub(crate) fn is_value_builtin(name: &str) -> bool {
    VALUE_BUILTINS.contains(&name)
}

pub fn is_builtin(name: &str) -> bool {
    is_statement_builtin(name) || is_value_builtin(name)
}

/// Every builtin name, statement builtins first.
pub fn builtin_names() -> impl Iterator<Item = &'static str> {
    STATEMENT_BUILTINS.iter().chain(VALUE_BUILTINS).copied()
}

/// Base address of a memory access.
enum Base {
    Reg(Reg),
    Label(String),
}

impl FuncGen<'_> {
    fn arity(&self, name: &str, args: &[CallArg], min: usize, max: usize) -> Result<(), CompileError> {
        if args.len() < min || args.len() > max {
            let expected = if min == max { min.to_string() } else { format!("{}-{}", min, max) };
            return Err(self.err(format!("{}() expects {} arguments, got {}", name, expected, args.len())));
        }
        Ok(())
    }

    fn operand_arg<'a>(&self, name: &str, args: &'a [CallArg], idx: usize) -> Result<&'a Operand, CompileError> {
        match args.get(idx) {
            Some(CallArg::Operand(op)) => Ok(op),
            Some(CallArg::Str(_)) => Err(self.err(format!("Argument {} of {}() cannot be a string", idx + 1, name))),
            None => Err(self.err(format!("{}() is missing argument {}", name, idx + 1))),
        }
    }

    /// Optional constant argument (offsets, rows, codes).
    fn const_arg(&self, name: &str, args: &[CallArg], idx: usize, default: i64) -> Result<i64, CompileError> {
        if idx >= args.len() {
            return Ok(default);
        }
        self.operand_arg(name, args, idx)?
            .as_num()
            .and_then(|n| n.as_int())
            .ok_or_else(|| self.err(format!("Argument {} of {}() must be an integer constant", idx + 1, name)))
    }

    fn variable_arg(&self, name: &str, args: &[CallArg], idx: usize) -> Result<VarRef, CompileError> {
        match self.resolve(self.operand_arg(name, args, idx)?)? {
            Src::Var(var) => Ok(var),
            _ => Err(self.err(format!("Argument {} of {}() must be a variable", idx + 1, name))),
        }
    }

    fn vector_arg(&self, name: &str, args: &[CallArg], idx: usize) -> Result<VarRef, CompileError> {
        let var = self.variable_arg(name, args, idx)?;
        if !var.ty.is_vector() {
            return Err(self.err(format!("Argument {} of {}() must be a vector", idx + 1, name)));
        }
        Ok(var)
    }

    fn address_arg(&self, name: &str, args: &[CallArg], idx: usize) -> Result<Base, CompileError> {
        match self.resolve(self.operand_arg(name, args, idx)?)? {
            Src::Var(var) if !var.ty.is_vector() => Ok(Base::Reg(var.reg)),
            Src::Label(l) => Ok(Base::Label(l)),
            _ => Err(self.err(format!(
                "{}() needs a scalar register or state variable as address",
                name
            ))),
        }
    }

    fn scalar_mem(base: &Base, offset: i64) -> Arg {
        match base {
            Base::Reg(reg) => mem(offset, *reg),
            Base::Label(l) => Arg::Mem { offset, label: Some(l.clone()), base: Reg::ZERO },
        }
    }

    /// Base register of a vector memory access; state variables go through `$at`.
    fn vector_base(&mut self, base: &Base) -> Reg {
        match base {
            Base::Reg(reg) => *reg,
            Base::Label(l) => {
                self.emit(Opcode::Ori, vec![r(Reg::AT), r(Reg::ZERO), Arg::LabelLo(l.clone(), 0)]);
                Reg::AT
            }
        }
    }

    fn check_offset(&self, name: &str, offset: i64, align: i64) -> Result<(), CompileError> {
        if offset % align != 0 {
            return Err(self.err(format!("{}() offset {} must be a multiple of {}", name, offset, align)));
        }
        if !(-64 * align..64 * align).contains(&offset) {
            return Err(self.err(format!("{}() offset {} is out of range", name, offset)));
        }
        Ok(())
    }

    fn no_result_swizzle(&self, name: &str, swizzle: Option<Swizzle>) -> Result<(), CompileError> {
        if swizzle.is_some() {
            return Err(self.err(format!("{}() does not support a swizzle on its result", name)));
        }
        Ok(())
    }

    fn vector_dst(&self, name: &str, dst: &Dst) -> Result<(), CompileError> {
        if !dst.var.ty.is_vector() {
            return Err(self.err(format!("{}() needs a vector destination, '{}' is {}", name, dst.name, dst.var.ty)));
        }
        Ok(())
    }

    // ── Value builtins ──

    pub(crate) fn builtin_calc(
        &mut self,
        dst: &Dst,
        name: &str,
        args: &[CallArg],
        swizzle: Option<Swizzle>,
    ) -> Result<(), CompileError> {
        if dst.var.swizzle.is_some() && name != "load" {
            return Err(self.err(format!("{}() cannot write to a swizzled destination", name)));
        }
        match name {
            "load" => self.builtin_load(dst, args, swizzle),
            "load_vec_u8" | "load_vec_s8" => {
                self.arity(name, args, 1, 2)?;
                self.no_result_swizzle(name, swizzle)?;
                if dst.var.ty != DataType::Vec16 {
                    return Err(self.err(format!("{}() needs a vec16 destination", name)));
                }
                let base = self.address_arg(name, args, 0)?;
                let offset = self.const_arg(name, args, 1, 0)?;
                self.check_offset(name, offset, 8)?;
                let opcode = if name == "load_vec_u8" { Opcode::Luv } else { Opcode::Lpv };
                let base = self.vector_base(&base);
                self.emit(opcode, vec![v(dst.var.int()), imm(offset), r(base)]);
                Ok(())
            }
            "load_transposed" => {
                self.arity(name, args, 2, 3)?;
                self.no_result_swizzle(name, swizzle)?;
                self.transpose_reg(name, &dst.var)?;
                let row = self.transpose_row(name, args, 0)?;
                let base = self.address_arg(name, args, 1)?;
                let offset = self.const_arg(name, args, 2, 0)?;
                self.check_offset(name, offset, 16)?;
                let base = self.vector_base(&base);
                self.emit(Opcode::Ltv, vec![e(dst.var.int(), row), imm(offset), r(base)]);
                Ok(())
            }
            "select" => {
                self.arity(name, args, 2, 2)?;
                self.no_result_swizzle(name, swizzle)?;
                self.vector_dst(name, dst)?;
                let x = self.vector_arg(name, args, 0)?;
                let y = match self.resolve(self.operand_arg(name, args, 1)?)? {
                    Src::Var(var) if var.ty.is_vector() => var,
                    Src::Num(n) => self.vector_const_operand(n, dst.var.ty)?,
                    _ => return Err(self.err("Argument 2 of select() must be a vector or a constant")),
                };
                self.vector_merge(&dst.var, &x, &y)
            }
            "invert" | "invert_half" | "invert_half_sqrt" => self.builtin_reciprocal(dst, name, args, swizzle),
            other if is_statement_builtin(other) => {
                Err(self.err(format!("Builtin '{}' does not return a value", other)))
            }
            other if self.ctx.functions.contains_key(other) => {
                Err(self.err(format!("Function '{}' does not return a value", other)))
            }
            other => Err(self.err(format!("Function '{}' not known!", other))),
        }
    }

    fn builtin_load(&mut self, dst: &Dst, args: &[CallArg], swizzle: Option<Swizzle>) -> Result<(), CompileError> {
        let name = "load";
        self.arity(name, args, 1, 2)?;
        self.no_result_swizzle(name, swizzle)?;
        let base = self.address_arg(name, args, 0)?;
        let offset = self.const_arg(name, args, 1, 0)?;
        let d = dst.var;

        if !d.ty.is_vector() {
            let opcode = match d.ty {
                DataType::U8 => Opcode::Lbu,
                DataType::S8 => Opcode::Lb,
                DataType::U16 => Opcode::Lhu,
                DataType::S16 => Opcode::Lh,
                _ => Opcode::Lw,
            };
            self.emit(opcode, vec![r(d.reg), Self::scalar_mem(&base, offset)]);
            return Ok(());
        }

        match d.swizzle {
            None => {
                self.check_offset(name, offset, 16)?;
                if d.is_vec32() {
                    self.check_offset(name, offset + 16, 16)?;
                }
                let base = self.vector_base(&base);
                self.emit(Opcode::Lqv, vec![v(d.int()), imm(offset), r(base)]);
                if d.is_vec32() {
                    self.emit(Opcode::Lqv, vec![v(d.frac()), imm(offset + 16), r(base)]);
                }
            }
            Some(Swizzle::Lane(lane)) => {
                if d.is_vec32() {
                    return Err(self.err("Single-lane load() is only supported for vec16"));
                }
                self.check_offset(name, offset, 2)?;
                let base = self.vector_base(&base);
                self.emit(Opcode::Lsv, vec![e(d.int(), lane), imm(offset), r(base)]);
            }
            Some(_) => return Err(self.err("load() can only write a single lane or the whole vector")),
        }
        Ok(())
    }

    fn transpose_reg(&self, name: &str, var: &VarRef) -> Result<(), CompileError> {
        if var.ty != DataType::Vec16 || var.swizzle.is_some() || !TRANSPOSE_REGS.contains(&var.reg.index()) {
            return Err(self.err(format!(
                "{}() needs an unswizzled vec16 in $v00, $v08, $v16 or $v24",
                name
            )));
        }
        Ok(())
    }

    fn transpose_row(&self, name: &str, args: &[CallArg], idx: usize) -> Result<u8, CompileError> {
        match self.const_arg(name, args, idx, -1) {
            Ok(row) if (0..8).contains(&row) => Ok(row as u8),
            _ => Err(self.err(format!("{}() row must be a constant between 0 and 7", name))),
        }
    }

    /// Three instructions per lane: high input, low input, high output.
    fn builtin_reciprocal(
        &mut self,
        dst: &Dst,
        name: &str,
        args: &[CallArg],
        swizzle: Option<Swizzle>,
    ) -> Result<(), CompileError> {
        self.arity(name, args, 1, 1)?;
        if dst.var.ty != DataType::Vec32 {
            return Err(self.err(format!("{}() needs a vec32 destination, '{}' is {}", name, dst.name, dst.var.ty)));
        }
        let src = self.vector_arg(name, args, 0)?;
        let lane = match (swizzle, src.swizzle) {
            (Some(Swizzle::Lane(n)), None) | (None, Some(Swizzle::Lane(n))) => Some(n),
            (None, None) => None,
            _ => {
                return Err(self.err(format!(
                    "{}() works on a single lane (.x to .W) or on the whole vector",
                    name
                )));
            }
        };
        let (high, low) = if name == "invert_half_sqrt" {
            (Opcode::Vrsqh, Opcode::Vrsql)
        } else {
            (Opcode::Vrcph, Opcode::Vrcpl)
        };
        let (src_int, src_frac) = if src.is_vec32() { (src.int(), src.frac()) } else { (Reg::VZERO, src.int()) };
        let d = dst.var;
        let lanes: Vec<u8> = lane.map_or_else(|| (0..8).collect(), |l| vec![l]);
        for l in lanes {
            self.emit(high, vec![e(d.int(), l), e(src_int, l)]);
            self.emit(low, vec![e(d.frac(), l), e(src_frac, l)]);
            self.emit(high, vec![e(d.int(), l), e(Reg::VZERO, l)]);
        }
        if name == "invert" {
            self.emit(Opcode::Vaddc, vec![v(d.frac()), v(d.frac()), v(d.frac())]);
            self.emit(Opcode::Vadd, vec![v(d.int()), v(d.int()), v(d.int())]);
        }
        Ok(())
    }

    // ── Statement builtins ──

    pub(crate) fn builtin_stmt(&mut self, name: &str, args: &[CallArg]) -> Result<(), CompileError> {
        match name {
            "store" => self.builtin_store(args),
            "store_vec_u8" | "store_vec_s8" => {
                self.arity(name, args, 2, 3)?;
                let src = self.vector_arg(name, args, 0)?;
                if src.ty != DataType::Vec16 || src.swizzle.is_some() {
                    return Err(self.err(format!("{}() needs an unswizzled vec16 source", name)));
                }
                let base = self.address_arg(name, args, 1)?;
                let offset = self.const_arg(name, args, 2, 0)?;
                self.check_offset(name, offset, 8)?;
                let opcode = if name == "store_vec_u8" { Opcode::Suv } else { Opcode::Spv };
                let base = self.vector_base(&base);
                self.emit(opcode, vec![v(src.int()), imm(offset), r(base)]);
                Ok(())
            }
            "store_transposed" => {
                self.arity(name, args, 3, 4)?;
                let src = self.vector_arg(name, args, 0)?;
                self.transpose_reg(name, &src)?;
                let row = self.transpose_row(name, args, 1)?;
                let base = self.address_arg(name, args, 2)?;
                let offset = self.const_arg(name, args, 3, 0)?;
                self.check_offset(name, offset, 16)?;
                let base = self.vector_base(&base);
                self.emit(Opcode::Stv, vec![e(src.int(), row), imm(offset), r(base)]);
                Ok(())
            }
            "swap" => {
                self.arity(name, args, 2, 2)?;
                let a = self.variable_arg(name, args, 0)?;
                let b = self.variable_arg(name, args, 1)?;
                if a.ty != b.ty || a.swizzle.is_some() || b.swizzle.is_some() {
                    return Err(self.err("swap() needs two unswizzled variables of the same type"));
                }
                if a.reg == b.reg {
                    return Ok(());
                }
                let pairs = if a.is_vec32() {
                    vec![(a.int(), b.int()), (a.frac(), b.frac())]
                } else {
                    vec![(a.reg, b.reg)]
                };
                let opcode = if a.ty.is_vector() { Opcode::Vxor } else { Opcode::Xor };
                let arg: fn(Reg) -> Arg = if a.ty.is_vector() { v } else { r };
                for (x, y) in pairs {
                    self.emit(opcode, vec![arg(x), arg(x), arg(y)]);
                    self.emit(opcode, vec![arg(y), arg(x), arg(y)]);
                    self.emit(opcode, vec![arg(x), arg(x), arg(y)]);
                }
                Ok(())
            }
            "assert" => {
                self.arity(name, args, 1, 1)?;
                let code = self.const_arg(name, args, 0, 0)?;
                if !(0..=0xFFFF).contains(&code) {
                    return Err(self.err(format!("assert() code {} must be between 0 and 0xFFFF", code)));
                }
                self.emit(Opcode::Lui, vec![r(Reg::AT), hex(code as u32)]);
                self.emit_branch(Opcode::J, vec![label(ASSERT_HANDLER)]);
                Ok(())
            }
            other => Err(self.err(format!("Builtin '{}' returns a value and must be assigned", other))),
        }
    }

    fn builtin_store(&mut self, args: &[CallArg]) -> Result<(), CompileError> {
        let name = "store";
        self.arity(name, args, 2, 3)?;
        let src = match self.resolve(self.operand_arg(name, args, 0)?)? {
            Src::Var(var) => var,
            _ => return Err(self.err("store() needs a variable as source, not a constant or state variable")),
        };
        let base = self.address_arg(name, args, 1)?;
        let offset = self.const_arg(name, args, 2, 0)?;

        if !src.ty.is_vector() {
            let opcode = match src.ty {
                DataType::U8 | DataType::S8 => Opcode::Sb,
                DataType::U16 | DataType::S16 => Opcode::Sh,
                _ => Opcode::Sw,
            };
            self.emit(opcode, vec![r(src.reg), Self::scalar_mem(&base, offset)]);
            return Ok(());
        }

        match src.swizzle {
            None => {
                self.check_offset(name, offset, 16)?;
                if src.is_vec32() {
                    self.check_offset(name, offset + 16, 16)?;
                }
                let base = self.vector_base(&base);
                self.emit(Opcode::Sqv, vec![v(src.int()), imm(offset), r(base)]);
                if src.is_vec32() {
                    self.emit(Opcode::Sqv, vec![v(src.frac()), imm(offset + 16), r(base)]);
                }
            }
            Some(Swizzle::Lane(lane)) if !src.is_vec32() => {
                self.check_offset(name, offset, 2)?;
                let base = self.vector_base(&base);
                self.emit(Opcode::Ssv, vec![e(src.int(), lane), imm(offset), r(base)]);
            }
            Some(_) => {
                return Err(self.err("store() can only write a whole vector or a single vec16 lane"));
            }
        }
        Ok(())
    }
}
