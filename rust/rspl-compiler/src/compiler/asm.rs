//! Abstract assembly: the instruction list the code generator produces and
//! the optimizer rewrites.

use crate::compiler::ast::FuncKind;
use crate::compiler::types::{Reg, VElem};
use serde::{Deserialize, Serialize};
use std::fmt;
use strum_macros::{Display, EnumIter, EnumString, IntoStaticStr};

/// Symbol of the command dispatch loop.
pub const DISPATCH_LOOP: &str = "RSPQ_Loop";
/// Symbol of the assertion handler.
pub const ASSERT_HANDLER: &str = "assertion_failed";

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize,
    EnumString, Display, EnumIter, IntoStaticStr,
)]
#[strum(serialize_all = "lowercase")]
pub enum Opcode {
    // Scalar ALU
    Addu, Addiu, Subu, And, Andi, Or, Ori, Xor, Xori, Nor,
    Sll, Srl, Sra, Sllv, Srlv, Srav, Slt, Sltu, Slti, Sltiu, Lui,
    // Scalar memory
    Lb, Lbu, Lh, Lhu, Lw, Sb, Sh, Sw,
    // Control flow
    Beq, Bne, Blez, Bgtz, Bltz, Bgez, J, Jal, Jr,
    Nop,
    // Coprocessor moves
    Mtc2, Mfc2, Ctc2, Cfc2,
    // Vector memory
    Lbv, Lsv, Llv, Ldv, Lqv, Lrv, Lpv, Luv, Ltv,
    Sbv, Ssv, Slv, Sdv, Sqv, Srv, Spv, Suv, Stv,
    // Vector compute
    Vmulf, Vmulu, Vmudl, Vmudm, Vmudn, Vmudh,
    Vmacf, Vmacu, Vmadl, Vmadm, Vmadn, Vmadh,
    Vadd, Vsub, Vaddc, Vsubc, Vabs, Vsar,
    Vlt, Veq, Vne, Vge, Vcl, Vch, Vcr, Vmrg,
    Vand, Vnand, Vor, Vnor, Vxor, Vnxor,
    Vrcp, Vrcpl, Vrcph, Vmov, Vrsq, Vrsql, Vrsqh, Vnop,
}

impl Opcode {
    /// Instructions followed by a delay slot.
    pub fn is_branch(self) -> bool {
        matches!(
            self,
            Opcode::Beq | Opcode::Bne | Opcode::Blez | Opcode::Bgtz | Opcode::Bltz
                | Opcode::Bgez | Opcode::J | Opcode::Jal | Opcode::Jr
        )
    }

    pub fn is_cond_branch(self) -> bool {
        self.is_branch() && !matches!(self, Opcode::J | Opcode::Jal | Opcode::Jr)
    }

    /// Branch with the opposite condition.
    pub fn negated(self) -> Option<Opcode> {
        Some(match self {
            Opcode::Beq => Opcode::Bne,
            Opcode::Bne => Opcode::Beq,
            Opcode::Blez => Opcode::Bgtz,
            Opcode::Bgtz => Opcode::Blez,
            Opcode::Bltz => Opcode::Bgez,
            Opcode::Bgez => Opcode::Bltz,
            _ => return None,
        })
    }

    pub fn is_scalar_load(self) -> bool {
        matches!(self, Opcode::Lb | Opcode::Lbu | Opcode::Lh | Opcode::Lhu | Opcode::Lw)
    }

    pub fn is_scalar_store(self) -> bool {
        matches!(self, Opcode::Sb | Opcode::Sh | Opcode::Sw)
    }

    pub fn is_vector_load(self) -> bool {
        matches!(
            self,
            Opcode::Lbv | Opcode::Lsv | Opcode::Llv | Opcode::Ldv | Opcode::Lqv | Opcode::Lrv
                | Opcode::Lpv | Opcode::Luv | Opcode::Ltv
        )
    }

    pub fn is_vector_store(self) -> bool {
        matches!(
            self,
            Opcode::Sbv | Opcode::Ssv | Opcode::Slv | Opcode::Sdv | Opcode::Sqv | Opcode::Srv
                | Opcode::Spv | Opcode::Suv | Opcode::Stv
        )
    }

    pub fn is_load(self) -> bool {
        self.is_scalar_load() || self.is_vector_load()
    }

    pub fn is_store(self) -> bool {
        self.is_scalar_store() || self.is_vector_store()
    }

    /// Executed by the vector unit.
    pub fn is_vector_unit(self) -> bool {
        let name: &'static str = self.into();
        name.starts_with('v')
    }

    /// Vector multiply/accumulate family (writes the accumulator).
    pub fn is_vector_multiply(self) -> bool {
        matches!(
            self,
            Opcode::Vmulf | Opcode::Vmulu | Opcode::Vmudl | Opcode::Vmudm | Opcode::Vmudn
                | Opcode::Vmudh | Opcode::Vmacf | Opcode::Vmacu | Opcode::Vmadl | Opcode::Vmadm
                | Opcode::Vmadn | Opcode::Vmadh
        )
    }

    /// Reads the accumulator as well as writing it.
    pub fn accumulates(self) -> bool {
        matches!(
            self,
            Opcode::Vmacf | Opcode::Vmacu | Opcode::Vmadl | Opcode::Vmadm | Opcode::Vmadn
                | Opcode::Vmadh | Opcode::Vsar
        )
    }

    pub fn is_reciprocal(self) -> bool {
        matches!(
            self,
            Opcode::Vrcp | Opcode::Vrcpl | Opcode::Vrcph | Opcode::Vrsq | Opcode::Vrsql | Opcode::Vrsqh
        )
    }

    pub fn is_cross_unit_move(self) -> bool {
        matches!(self, Opcode::Mtc2 | Opcode::Mfc2 | Opcode::Ctc2 | Opcode::Cfc2)
    }

    /// Cycles until the result of this instruction is available.
    pub fn latency(self) -> u32 {
        if self.is_cross_unit_move() || (self.is_vector_unit() && self != Opcode::Vnop) {
            4
        } else if self.is_vector_load() || self.is_vector_store() {
            3
        } else if self.is_scalar_load() || self.is_scalar_store() {
            2
        } else {
            1
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Arg {
    Reg(Reg),
    /// Vector register with an optional element selector.
    VReg(Reg, Option<VElem>),
    Imm(i64),
    Hex(u32),
    Label(String),
    /// `%lo(label + offset)`
    LabelLo(String, i64),
    /// `offset($base)` / `%lo(label)($base)`
    Mem { offset: i64, label: Option<String>, base: Reg },
}

impl Arg {
    pub fn reg(&self) -> Option<Reg> {
        match self {
            Arg::Reg(r) | Arg::VReg(r, _) => Some(*r),
            _ => None,
        }
    }

    pub fn label(&self) -> Option<&str> {
        match self {
            Arg::Label(l) => Some(l),
            _ => None,
        }
    }
}

fn fmt_lo(f: &mut fmt::Formatter<'_>, label: &str, offset: i64) -> fmt::Result {
    match offset {
        0 => write!(f, "%lo({})", label),
        o if o > 0 => write!(f, "%lo({} + {})", label, o),
        o => write!(f, "%lo({} - {})", label, -o),
    }
}

impl fmt::Display for Arg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Arg::Reg(r) => write!(f, "{}", r),
            Arg::VReg(r, None) => write!(f, "{}", r),
            Arg::VReg(r, Some(e)) => write!(f, "{}{}", r, e),
            Arg::Imm(v) => write!(f, "{}", v),
            Arg::Hex(v) => write!(f, "0x{:04X}", v),
            Arg::Label(l) => f.write_str(l),
            Arg::LabelLo(l, o) => fmt_lo(f, l, *o),
            Arg::Mem { offset, label: Some(l), base } => {
                fmt_lo(f, l, *offset)?;
                write!(f, "({})", base)
            }
            Arg::Mem { offset, label: None, base } => write!(f, "{}({})", offset, base),
        }
    }
}

/// Source information attached to an instruction.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DebugInfo {
    pub line: usize,
    /// Set for code inside an `@Barrier` statement; never reordered.
    pub barrier: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AsmOp {
    pub opcode: Opcode,
    pub args: Vec<Arg>,
    pub debug: DebugInfo,
}

impl AsmOp {
    pub fn new(opcode: Opcode, args: Vec<Arg>) -> Self {
        Self { opcode, args, debug: DebugInfo::default() }
    }

    pub fn is_nop(&self) -> bool {
        self.opcode == Opcode::Nop
    }

    /// Label operand of a branch or jump.
    pub fn target(&self) -> Option<&str> {
        if !self.opcode.is_branch() {
            return None;
        }
        self.args.last().and_then(Arg::label)
    }

    pub fn set_target(&mut self, label: &str) {
        if let Some(last) = self.args.last_mut() {
            if matches!(last, Arg::Label(_)) {
                *last = Arg::Label(label.to_string());
            }
        }
    }
}

impl fmt::Display for AsmOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.opcode)?;
        for (i, arg) in self.args.iter().enumerate() {
            f.write_str(if i == 0 { " " } else { ", " })?;
            write!(f, "{}", arg)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum AsmLine {
    Op(AsmOp),
    Label(String),
    Comment(String),
    /// Verbatim text from an `asm("...")` statement.
    Raw(String),
}

impl AsmLine {
    pub fn op(opcode: Opcode, args: Vec<Arg>) -> Self {
        AsmLine::Op(AsmOp::new(opcode, args))
    }

    pub fn nop() -> Self {
        AsmLine::op(Opcode::Nop, Vec::new())
    }

    pub fn as_op(&self) -> Option<&AsmOp> {
        match self {
            AsmLine::Op(op) => Some(op),
            _ => None,
        }
    }

    pub fn as_op_mut(&mut self) -> Option<&mut AsmOp> {
        match self {
            AsmLine::Op(op) => Some(op),
            _ => None,
        }
    }

    pub fn opcode(&self) -> Option<Opcode> {
        self.as_op().map(|op| op.opcode)
    }

    pub fn is_nop(&self) -> bool {
        self.as_op().is_some_and(AsmOp::is_nop)
    }

    pub fn is_branch(&self) -> bool {
        self.opcode().is_some_and(Opcode::is_branch)
    }

    pub fn is_label(&self, name: &str) -> bool {
        matches!(self, AsmLine::Label(l) if l == name)
    }
}

impl fmt::Display for AsmLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AsmLine::Op(op) => write!(f, "    {}", op),
            AsmLine::Label(l) => write!(f, "  {}:", l),
            AsmLine::Comment(c) => write!(f, "    ## {}", c),
            AsmLine::Raw(r) => write!(f, "    {}", r),
        }
    }
}

/// Generated code of one function or command.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AsmFunction {
    pub name: String,
    pub kind: FuncKind,
    /// Argument bytes in the dispatch table (commands only).
    pub arg_size: u32,
    pub align: Option<u32>,
    pub lines: Vec<AsmLine>,
    /// Dispatch-table entry redirected to another symbol; body elided.
    pub alias_of: Option<String>,
}

impl AsmFunction {
    pub fn is_command(&self) -> bool {
        matches!(self.kind, FuncKind::Command(_))
    }
}

/// Shorthand constructors used by the code generator.
pub mod build {
    use super::*;

    pub fn r(reg: Reg) -> Arg {
        Arg::Reg(reg)
    }

    pub fn v(reg: Reg) -> Arg {
        Arg::VReg(reg, None)
    }

    pub fn ve(reg: Reg, elem: Option<VElem>) -> Arg {
        Arg::VReg(reg, elem)
    }

    pub fn e(reg: Reg, lane: u8) -> Arg {
        Arg::VReg(reg, Some(VElem::E(lane)))
    }

    pub fn imm(v: i64) -> Arg {
        Arg::Imm(v)
    }

    pub fn hex(v: u32) -> Arg {
        Arg::Hex(v)
    }

    pub fn label(l: &str) -> Arg {
        Arg::Label(l.to_string())
    }

    pub fn mem(offset: i64, base: Reg) -> Arg {
        Arg::Mem { offset, label: None, base }
    }
}

#[cfg(test)]
mod tests {
    use super::build::*;
    use super::*;
    use std::str::FromStr;
    use strum::IntoEnumIterator;

    #[test]
    fn test_opcode_mnemonics_parse_back() {
        for opcode in Opcode::iter() {
            let name: &'static str = opcode.into();
            assert_eq!(Opcode::from_str(name).unwrap(), opcode);
            assert_eq!(opcode.to_string(), name);
            if opcode.is_cond_branch() {
                let inverse = opcode.negated().unwrap();
                assert_eq!(inverse.negated(), Some(opcode), "{} does not invert back", name);
            }
        }
    }

    #[test]
    fn test_render_ops() {
        let op = AsmOp::new(Opcode::Addiu, vec![r(Reg::Scalar(8)), r(Reg::ZERO), imm(-4)]);
        assert_eq!(op.to_string(), "addiu $t0, $zero, -4");
        let op = AsmOp::new(Opcode::Vaddc, vec![v(Reg::Vector(1)), v(Reg::Vector(2)), e(Reg::Vector(3), 5)]);
        assert_eq!(op.to_string(), "vaddc $v01, $v02, $v03.e5");
        let op = AsmOp::new(Opcode::Lw, vec![r(Reg::Scalar(8)), Arg::Mem { offset: 4, label: Some("POS".into()), base: Reg::ZERO }]);
        assert_eq!(op.to_string(), "lw $t0, %lo(POS + 4)($zero)");
        assert_eq!(AsmLine::nop().to_string(), "    nop");
    }

    #[test]
    fn test_opcode_classes() {
        assert_eq!(Opcode::from_str("vmadh").unwrap(), Opcode::Vmadh);
        assert!(Opcode::Jal.is_branch());
        assert!(!Opcode::Jal.is_cond_branch());
        assert_eq!(Opcode::Bgtz.negated(), Some(Opcode::Blez));
        assert!(Opcode::Sqv.is_store() && !Opcode::Sqv.is_vector_unit());
        assert_eq!(Opcode::Vmudh.latency(), 4);
        assert_eq!(Opcode::Mfc2.latency(), 4);
        assert_eq!(Opcode::Lqv.latency(), 3);
        assert_eq!(Opcode::Lw.latency(), 2);
        assert_eq!(Opcode::Addu.latency(), 1);
    }

    #[test]
    fn test_branch_target_rewrite() {
        let mut op = AsmOp::new(Opcode::Beq, vec![r(Reg::Scalar(8)), r(Reg::ZERO), label("L1")]);
        assert_eq!(op.target(), Some("L1"));
        op.set_target("L2");
        assert_eq!(op.to_string(), "beq $t0, $zero, L2");
    }
}
