//! Code generation from the normalized AST to abstract assembly.

mod builtins;
mod imm;
mod scalar;
mod vector;

use crate::compiler::asm::build::*;
use crate::compiler::asm::{AsmFunction, AsmLine, AsmOp, Arg, DebugInfo, Opcode, DISPATCH_LOOP};
use crate::compiler::ast::*;
use crate::compiler::context::{CompilerContext, FuncSig};
use crate::compiler::emit;
use crate::compiler::scope::{ScopeStack, VarInfo};
use crate::compiler::types::{DataType, Reg, Swizzle, VElem};
use crate::CompileError;
use std::collections::{HashMap, HashSet};

pub use builtins::{builtin_names, is_builtin};
pub use imm::imm_load_sequence;

/// Resolved operand of an instruction.
#[derive(Debug, Clone)]
pub(crate) enum Src {
    Var(VarRef),
    Num(Num),
    /// Address of a state variable.
    Label(String),
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct VarRef {
    pub reg: Reg,
    pub ty: DataType,
    pub swizzle: Option<Swizzle>,
}

impl VarRef {
    fn from_info(info: VarInfo, swizzle: Option<Swizzle>) -> Self {
        Self { reg: info.reg, ty: info.ty, swizzle }
    }

    /// Integer half of a vector (the whole register for `vec16`).
    pub fn int(&self) -> Reg {
        self.reg
    }

    /// Fractional half of a `vec32`.
    pub fn frac(&self) -> Reg {
        self.reg.next().unwrap_or(self.reg)
    }

    pub fn elem(&self) -> Option<VElem> {
        self.swizzle.map(Swizzle::elem)
    }

    pub fn is_vec32(&self) -> bool {
        self.ty == DataType::Vec32
    }
}

/// Assignment destination.
#[derive(Debug, Clone)]
pub(crate) struct Dst {
    pub name: String,
    pub var: VarRef,
}

struct LoopLabels {
    cont: String,
    end: String,
}

pub struct FuncGen<'c> {
    ctx: &'c mut CompilerContext,
    scopes: ScopeStack,
    lines: Vec<AsmLine>,
    loops: Vec<LoopLabels>,
    labels: HashSet<String>,
    barrier: Option<String>,
    func_name: String,
    is_command: bool,
}

/// Lower every function and command of a normalized program.
pub fn lower_program(program: &Program, ctx: &mut CompilerContext) -> Result<Vec<AsmFunction>, CompileError> {
    for var in &program.state {
        ctx.enter_function("state", var.line);
        if ctx.state.insert(var.name.clone(), var.clone()).is_some() {
            return Err(ctx.error(format!("State variable '{}' is declared twice", var.name)));
        }
        if let Some(align) = var.align.filter(|a| !a.is_power_of_two()) {
            return Err(ctx.error(format!("alignas({}) of '{}' is not a power of two", align, var.name)));
        }
        let (_, unit) = emit::data_unit(var.ty);
        if var.init.len() as u32 > var.byte_size() / unit {
            return Err(ctx.error(format!("Too many initialisers for state variable '{}'", var.name)));
        }
        if var.init.iter().any(|n| n.as_int().is_none()) {
            return Err(ctx.error(format!("Initialisers of '{}' must be integers", var.name)));
        }
    }

    let mut commands: HashMap<u32, &str> = HashMap::new();
    let mut defined = HashSet::new();
    for func in &program.items {
        ctx.enter_function(&func.name, func.line);
        if func.body.is_some() && !defined.insert(func.name.as_str()) {
            return Err(ctx.error(format!("Function '{}' is defined twice", func.name)));
        }
        ctx.functions.insert(func.name.clone(), FuncSig { kind: func.kind, args: func.args.clone() });
        if let (FuncKind::Command(idx), Some(_)) = (func.kind, &func.body) {
            if let Some(other) = commands.insert(idx, &func.name) {
                return Err(ctx.error(format!(
                    "Command index {} is used by both '{}' and '{}'",
                    idx, other, func.name
                )));
            }
        }
    }

    if let Some(&last) = commands.keys().max() {
        ctx.enter_function("commands", 0);
        for idx in (0..last).filter(|i| !commands.contains_key(i)) {
            ctx.warn(format!("Command index {} is unused and dispatches to {}", idx, DISPATCH_LOOP));
        }
    }

    let mut out = Vec::new();
    for func in program.items.iter().filter(|f| f.body.is_some()) {
        let asm = FuncGen::new(ctx, func).lower_function(func)?;
        tracing::debug!(func = %asm.name, lines = asm.lines.len(), "generated function");
        out.push(asm);
    }
    Ok(out)
}

fn collect_labels(block: &Block, out: &mut Vec<String>) {
    for stmt in &block.stmts {
        match &stmt.kind {
            StmtKind::Label(l) => out.push(l.clone()),
            StmtKind::Block(b) | StmtKind::While { body: b, .. } | StmtKind::Loop { body: b, .. } => {
                collect_labels(b, out)
            }
            StmtKind::If { then_block, else_block, .. } => {
                collect_labels(then_block, out);
                if let Some(b) = else_block {
                    collect_labels(b, out);
                }
            }
            _ => {}
        }
    }
}

impl<'c> FuncGen<'c> {
    pub fn new(ctx: &'c mut CompilerContext, func: &FuncDef) -> Self {
        Self {
            ctx,
            scopes: ScopeStack::new(),
            lines: Vec::new(),
            loops: Vec::new(),
            labels: HashSet::new(),
            barrier: None,
            func_name: func.name.clone(),
            is_command: matches!(func.kind, FuncKind::Command(_)),
        }
    }

    pub(crate) fn err(&self, message: impl Into<String>) -> CompileError {
        self.ctx.error(message)
    }

    fn internal(&self, message: impl Into<String>) -> CompileError {
        CompileError::Internal { pass: "codegen".into(), message: message.into() }
    }

    // ── Emission ──

    pub(crate) fn emit(&mut self, opcode: Opcode, args: Vec<Arg>) {
        let debug = DebugInfo { line: self.ctx.line(), barrier: self.barrier.clone() };
        self.lines.push(AsmLine::Op(AsmOp { opcode, args, debug }));
    }

    /// Branch or jump followed by its delay slot.
    pub(crate) fn emit_branch(&mut self, opcode: Opcode, args: Vec<Arg>) {
        self.emit(opcode, args);
        self.emit(Opcode::Nop, Vec::new());
    }

    pub(crate) fn emit_label(&mut self, label: &str) {
        self.lines.push(AsmLine::Label(label.to_string()));
    }

    fn emit_return(&mut self) {
        if self.is_command {
            self.emit_branch(Opcode::J, vec![label(DISPATCH_LOOP)]);
        } else {
            self.emit_branch(Opcode::Jr, vec![r(Reg::RA)]);
        }
    }

    // ── Symbols ──

    pub(crate) fn lookup(&self, name: &str) -> Result<VarInfo, CompileError> {
        self.scopes.lookup(name).map_err(|e| self.err(e.to_string()))
    }

    pub(crate) fn resolve(&self, op: &Operand) -> Result<Src, CompileError> {
        match &op.kind {
            OperandKind::Var(name) => {
                let info = self.lookup(name)?;
                if op.swizzle.is_some() && !info.ty.is_vector() {
                    return Err(self.err(format!(
                        "Swizzle is only allowed on vector variables, '{}' is {}",
                        name, info.ty
                    )));
                }
                Ok(Src::Var(VarRef::from_info(info, op.swizzle)))
            }
            OperandKind::Num(n) => {
                if op.swizzle.is_some() {
                    return Err(self.err("Swizzle is not allowed on numbers"));
                }
                Ok(Src::Num(*n))
            }
            OperandKind::Label(l) => Ok(Src::Label(l.clone())),
        }
    }

    /// Register for a declaration: explicit binding or next free register.
    fn decl_reg(&self, name: &str, ty: DataType, reg: Option<&RegRef>) -> Result<Reg, CompileError> {
        let reg = match reg {
            None => return self.scopes.alloc_free(name, ty).map_err(|e| self.err(e.to_string())),
            Some(RegRef::Named(n)) => Reg::parse(n).ok_or_else(|| self.err(format!("Unknown register {}", n)))?,
            Some(RegRef::Index(i)) => Reg::from_index(*i, ty.is_vector())
                .ok_or_else(|| self.err(format!("Register index ${} is out of range", i)))?,
        };
        if reg.is_vector() != ty.is_vector() {
            return Err(self.err(format!("Register {} cannot hold a value of type {}", reg, ty)));
        }
        if ty == DataType::Vec32 && reg.next().is_none() {
            return Err(self.err(format!("Register {} cannot be the base of a vec32", reg)));
        }
        Ok(reg)
    }

    fn check_reserved(&mut self, info: &VarInfo) -> Result<(), CompileError> {
        for reg in info.regs() {
            match reg {
                Reg::Scalar(0) | Reg::Scalar(1) | Reg::Vector(0) | Reg::Vector(30) | Reg::Vector(31) => {
                    return Err(self.err(format!("Register {} is reserved for internal use", reg)));
                }
                Reg::Vector(27) => self.ctx.warn(format!(
                    "Register {} is used as a temporary by vector operations and may be clobbered",
                    reg
                )),
                Reg::Scalar(31) => self.ctx.warn(format!("Register {} is overwritten by function calls", reg)),
                _ => {}
            }
        }
        Ok(())
    }

    fn declare(&mut self, name: &str, ty: DataType, reg: Option<&RegRef>, is_const: bool) -> Result<(), CompileError> {
        let reg = self.decl_reg(name, ty, reg)?;
        let info = VarInfo { reg, ty, is_const };
        self.check_reserved(&info)?;
        self.scopes.declare(name, info, false).map_err(|e| self.err(e.to_string()))
    }

    fn alias_info(&self, alias_of: &str, ty: Option<DataType>) -> Result<VarInfo, CompileError> {
        let target = self.lookup(alias_of)?;
        let ty = ty.unwrap_or(target.ty);
        if ty.is_vector() != target.ty.is_vector() || ty.reg_count() != target.ty.reg_count() {
            return Err(self.err(format!(
                "Cannot alias '{}' of type {} as {}",
                alias_of, target.ty, ty
            )));
        }
        Ok(VarInfo { reg: target.reg, ty, is_const: target.is_const })
    }

    // ── Functions ──

    pub fn lower_function(mut self, func: &FuncDef) -> Result<AsmFunction, CompileError> {
        self.ctx.enter_function(&func.name, func.line);
        let mut align = None;
        let mut no_return = false;
        for ann in &func.annotations {
            match (ann.kind, &ann.value) {
                (AnnotationKind::Align, Some(AnnotationValue::Int(n))) if *n > 0 && (*n as u64).is_power_of_two() => {
                    align = Some(*n as u32)
                }
                (AnnotationKind::Align, _) => {
                    return Err(self.err("@Align needs a power-of-two integer argument"));
                }
                (AnnotationKind::NoReturn, None) => no_return = true,
                (kind, _) => {
                    return Err(self.err(format!("Annotation @{} is not allowed on functions", kind)));
                }
            }
        }

        if self.is_command && func.args.len() > 4 {
            return Err(self.err(format!(
                "Command '{}' has {} arguments, at most 4 are supported",
                func.name,
                func.args.len()
            )));
        }
        for (i, arg) in func.args.iter().enumerate() {
            let reg = arg_register(arg, i).ok_or_else(|| {
                self.err(format!("Argument '{}' needs an explicit register", arg.name))
            })?;
            self.declare(&arg.name, arg.ty, Some(&reg), false)?;
        }

        let body = func.body.as_ref().ok_or_else(|| self.internal("function without body"))?;
        let mut labels = Vec::new();
        collect_labels(body, &mut labels);
        for l in labels {
            if !self.labels.insert(l.clone()) {
                return Err(self.err(format!("Label '{}' is defined twice", l)));
            }
        }

        self.block(body)?;
        let ends_with_exit = matches!(body.stmts.last().map(|s| &s.kind), Some(StmtKind::Exit));
        if !ends_with_exit && !no_return {
            self.emit_return();
        }

        let arg_size = if self.is_command { (4 * func.args.len() as u32).max(4) } else { 0 };
        Ok(AsmFunction {
            name: func.name.clone(),
            kind: func.kind,
            arg_size,
            align,
            lines: self.lines,
            alias_of: None,
        })
    }

    // ── Statements ──

    fn block(&mut self, block: &Block) -> Result<(), CompileError> {
        self.scopes.push();
        // Leading aliases bind simultaneously so `m(b, a)` can swap names.
        let aliases = block
            .stmts
            .iter()
            .take_while(|s| matches!(s.kind, StmtKind::VarDeclAlias { .. }))
            .count();
        let mut bound = Vec::with_capacity(aliases);
        for stmt in &block.stmts[..aliases] {
            self.ctx.set_stmt(stmt);
            if let StmtKind::VarDeclAlias { name, alias_of, ty } = &stmt.kind {
                bound.push((stmt, name, self.alias_info(alias_of, *ty)?));
            }
        }
        for (stmt, name, info) in bound {
            self.ctx.set_stmt(stmt);
            self.scopes.declare(name, info, true).map_err(|e| self.err(e.to_string()))?;
        }
        for stmt in &block.stmts[aliases..] {
            self.stmt(stmt)?;
        }
        self.scopes.pop();
        Ok(())
    }

    fn stmt(&mut self, stmt: &Stmt) -> Result<(), CompileError> {
        self.ctx.set_stmt(stmt);
        let outer_barrier = self.barrier.clone();
        for ann in &stmt.annotations {
            match (ann.kind, &ann.value) {
                (AnnotationKind::Barrier, Some(AnnotationValue::Str(name))) => {
                    self.barrier = Some(name.clone())
                }
                (AnnotationKind::Barrier, _) => {
                    return Err(self.err("@Barrier needs a name, e.g. @Barrier(\"dma\")"));
                }
                (AnnotationKind::Unlikely, None) if matches!(stmt.kind, StmtKind::If { .. }) => {}
                (kind, _) => {
                    return Err(self.err(format!("Annotation @{} is not allowed here", kind)));
                }
            }
        }
        if self.ctx.config.source_comments && !matches!(stmt.kind, StmtKind::Block(_)) {
            self.lines.push(AsmLine::Comment(format!("L{}", stmt.line)));
        }
        let res = self.stmt_kind(&stmt.kind);
        self.barrier = outer_barrier;
        res
    }

    fn stmt_kind(&mut self, kind: &StmtKind) -> Result<(), CompileError> {
        match kind {
            StmtKind::Block(b) => self.block(b)?,
            StmtKind::If { cond, then_block, else_block } => {
                let else_label = else_block.as_ref().map(|_| self.ctx.next_label());
                let end_label = self.ctx.next_label();
                self.branch_if(&negated(cond), else_label.as_deref().unwrap_or(&end_label))?;
                self.block(then_block)?;
                if let (Some(else_block), Some(else_label)) = (else_block, else_label) {
                    self.emit_branch(Opcode::J, vec![label(&end_label)]);
                    self.emit_label(&else_label);
                    self.block(else_block)?;
                }
                self.emit_label(&end_label);
            }
            StmtKind::While { cond, body } => {
                let cond_label = self.ctx.next_label();
                let end_label = self.ctx.next_label();
                self.emit_label(&cond_label);
                self.branch_if(&negated(cond), &end_label)?;
                self.loops.push(LoopLabels { cont: cond_label.clone(), end: end_label.clone() });
                let res = self.block(body);
                self.loops.pop();
                res?;
                self.emit_branch(Opcode::J, vec![label(&cond_label)]);
                self.emit_label(&end_label);
            }
            StmtKind::Loop { body, cond } => {
                let start_label = self.ctx.next_label();
                let cont_label = cond.as_ref().map(|_| self.ctx.next_label());
                let end_label = self.ctx.next_label();
                self.emit_label(&start_label);
                self.loops.push(LoopLabels {
                    cont: cont_label.clone().unwrap_or_else(|| start_label.clone()),
                    end: end_label.clone(),
                });
                let res = self.block(body);
                self.loops.pop();
                res?;
                match (cond, cont_label) {
                    (Some(cond), Some(cont_label)) => {
                        self.emit_label(&cont_label);
                        self.branch_if(cond, &start_label)?;
                    }
                    _ => self.emit_branch(Opcode::J, vec![label(&start_label)]),
                }
                self.emit_label(&end_label);
            }
            StmtKind::VarDecl(decl) => self.declare(&decl.name, decl.ty, decl.reg.as_ref(), decl.is_const)?,
            StmtKind::VarDeclAlias { name, alias_of, ty } => {
                let info = self.alias_info(alias_of, *ty)?;
                self.scopes.declare(name, info, true).map_err(|e| self.err(e.to_string()))?;
            }
            StmtKind::VarUndef(name) => self.scopes.undef(name).map_err(|e| self.err(e.to_string()))?,
            StmtKind::VarAssign(assign) => self.assign(assign)?,
            StmtKind::FuncCall { name, args } => self.call(name, args)?,
            StmtKind::Goto(target) => {
                let dest = if self.labels.contains(target) {
                    format!("{}_{}", self.func_name, target)
                } else if self.ctx.functions.contains_key(target) {
                    target.clone()
                } else {
                    return Err(self.err(format!("Label or function '{}' not known!", target)));
                };
                self.emit_branch(Opcode::J, vec![label(&dest)]);
            }
            StmtKind::Label(name) => {
                let l = format!("{}_{}", self.func_name, name);
                self.emit_label(&l);
            }
            StmtKind::Break | StmtKind::Continue => {
                let is_break = matches!(kind, StmtKind::Break);
                let target = match self.loops.last() {
                    Some(l) if is_break => l.end.clone(),
                    Some(l) => l.cont.clone(),
                    None => {
                        let what = if is_break { "break" } else { "continue" };
                        return Err(self.err(format!("'{}' used outside of a loop", what)));
                    }
                };
                self.emit_branch(Opcode::J, vec![label(&target)]);
            }
            StmtKind::Exit => self.emit_return(),
            StmtKind::Asm(text) => self.lines.push(AsmLine::Raw(text.clone())),
            StmtKind::VarDeclAssign { .. } | StmtKind::VarDeclMulti { .. } => {
                return Err(self.internal("declaration reached code generation without normalization"));
            }
        }
        Ok(())
    }

    fn assign(&mut self, assign: &VarAssign) -> Result<(), CompileError> {
        if assign.op != AssignOp::Set {
            return Err(self.internal("compound assignment reached code generation"));
        }
        let info = self.lookup(&assign.target)?;
        if info.is_const && !assign.init {
            return Err(self.err(format!("Cannot assign to constant '{}'", assign.target)));
        }
        if assign.swizzle.is_some() && !info.ty.is_vector() {
            return Err(self.err(format!(
                "Swizzle is only allowed on vector variables, '{}' is {}",
                assign.target, info.ty
            )));
        }
        let dst = Dst { name: assign.target.clone(), var: VarRef::from_info(info, assign.swizzle) };
        match &assign.calc {
            Calc::Func { name, args, swizzle } => self.builtin_calc(&dst, name, args, *swizzle),
            Calc::Multi(_) => Err(self.internal("expression reached code generation without normalization")),
            calc if info.ty.is_vector() => self.vector_assign(&dst, calc),
            calc => self.scalar_assign(&dst, calc),
        }
    }

    // ── Calls ──

    fn call(&mut self, name: &str, args: &[CallArg]) -> Result<(), CompileError> {
        if builtins::is_statement_builtin(name) {
            return self.builtin_stmt(name, args);
        }
        if builtins::is_value_builtin(name) {
            return Err(self.err(format!("Builtin '{}' returns a value and must be assigned", name)));
        }
        let sig = self
            .ctx
            .functions
            .get(name)
            .cloned()
            .ok_or_else(|| self.err(format!("Function '{}' not known!", name)))?;
        match sig.kind {
            FuncKind::Function => {}
            FuncKind::Command(_) => {
                return Err(self.err(format!("Command '{}' cannot be called, use goto instead", name)));
            }
            FuncKind::Macro => return Err(self.internal("macro call reached code generation")),
        }
        if sig.args.len() != args.len() {
            return Err(self.err(format!(
                "Function '{}' expects {} arguments, got {}",
                name,
                sig.args.len(),
                args.len()
            )));
        }
        for (i, (param, arg)) in sig.args.iter().zip(args).enumerate() {
            let dst_reg = match arg_register(param, i) {
                Some(r) => self.decl_reg(&param.name, param.ty, Some(&r))?,
                None => return Err(self.err(format!("Argument '{}' of '{}' has no register", param.name, name))),
            };
            let src = match arg {
                CallArg::Operand(op) => self.resolve(op)?,
                CallArg::Str(_) => {
                    return Err(self.err(format!("Function '{}' does not take string arguments", name)));
                }
            };
            self.move_to_arg(dst_reg, param.ty, src)?;
        }
        self.emit_branch(Opcode::Jal, vec![label(name)]);
        Ok(())
    }

    fn move_to_arg(&mut self, dst: Reg, ty: DataType, src: Src) -> Result<(), CompileError> {
        match src {
            Src::Var(var) => {
                if var.ty.is_vector() != ty.is_vector() || var.ty.reg_count() != ty.reg_count() {
                    return Err(self.err(format!("Argument type mismatch: expected {}, got {}", ty, var.ty)));
                }
                if var.reg == dst {
                    return Ok(());
                }
                if ty.is_vector() {
                    let dst_var = VarRef { reg: dst, ty, swizzle: None };
                    self.emit(Opcode::Vor, vec![v(dst_var.int()), v(Reg::VZERO), ve(var.int(), var.elem())]);
                    if ty == DataType::Vec32 {
                        self.emit(Opcode::Vor, vec![v(dst_var.frac()), v(Reg::VZERO), ve(var.frac(), var.elem())]);
                    }
                } else {
                    self.emit(Opcode::Or, vec![r(dst), r(var.reg), r(Reg::ZERO)]);
                }
            }
            Src::Num(n) if !ty.is_vector() => {
                let value = n.as_int().ok_or_else(|| self.err("Float arguments need a vector type"))?;
                self.load_imm(dst, value as u32);
            }
            Src::Label(l) if !ty.is_vector() => self.emit(Opcode::Ori, vec![r(dst), r(Reg::ZERO), Arg::LabelLo(l, 0)]),
            _ => return Err(self.err("Vector arguments must be variables")),
        }
        Ok(())
    }
}

/// Register bound to the i-th argument: explicit binding or `$a0..$a3`.
fn arg_register(arg: &FuncArg, index: usize) -> Option<RegRef> {
    match &arg.reg {
        Some(reg) => Some(reg.clone()),
        None if !arg.ty.is_vector() && index < 4 => Some(RegRef::Index(Reg::A0.index() as u32 + index as u32)),
        None => None,
    }
}

fn negated(cmp: &Compare) -> Compare {
    Compare { left: cmp.left.clone(), op: cmp.op.negate(), right: cmp.right.clone() }
}
