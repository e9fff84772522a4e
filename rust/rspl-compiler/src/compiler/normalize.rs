//! AST normalisation: macro inlining, declaration splitting, compound
//! assignment expansion, state-variable rewriting and expression lowering.
//!
//! After this pass the tree contains no macros, no `VarDeclAssign` or
//! `VarDeclMulti`, no compound assignments and no `Calc::Multi`. Running it
//! a second time leaves the tree unchanged.

use crate::compiler::ast::*;
use crate::compiler::context::CompilerContext;
use crate::compiler::fold;
use crate::compiler::types::{DataType, Reg};
use crate::CompileError;
use std::collections::{HashMap, HashSet};

/// Nested macro expansions allowed before giving up on a recursive macro.
pub const MAX_MACRO_DEPTH: usize = 64;

struct Normalizer<'a> {
    macros: &'a HashMap<String, FuncDef>,
    state: &'a HashSet<String>,
    ctx: &'a mut CompilerContext,
}

pub fn normalize(program: &mut Program, ctx: &mut CompilerContext) -> Result<(), CompileError> {
    let macros: HashMap<String, FuncDef> = program
        .items
        .iter()
        .filter(|f| f.kind == FuncKind::Macro)
        .map(|f| (f.name.clone(), f.clone()))
        .collect();
    let state: HashSet<String> = program.state.iter().map(|s| s.name.clone()).collect();
    program.items.retain(|f| f.kind != FuncKind::Macro);

    let mut norm = Normalizer { macros: &macros, state: &state, ctx };
    for func in &mut program.items {
        if let Some(body) = func.body.take() {
            norm.ctx.enter_function(&func.name, func.line);
            func.body = Some(norm.block(body, 0)?);
        }
    }
    tracing::debug!(macros = macros.len(), functions = program.items.len(), "normalized program");
    Ok(())
}

impl Normalizer<'_> {
    fn block(&mut self, block: Block, depth: usize) -> Result<Block, CompileError> {
        let mut stmts = Vec::with_capacity(block.stmts.len());
        for stmt in block.stmts {
            stmts.extend(self.stmt(stmt, depth)?);
        }
        Ok(Block { stmts })
    }

    fn operand(&self, op: Operand) -> Operand {
        match op.kind {
            OperandKind::Var(name) if self.state.contains(&name) => {
                Operand { kind: OperandKind::Label(name), swizzle: op.swizzle }
            }
            _ => op,
        }
    }

    fn compare(&self, cmp: Compare) -> Compare {
        Compare { left: self.operand(cmp.left), op: cmp.op, right: self.operand(cmp.right) }
    }

    fn call_args(&self, args: Vec<CallArg>) -> Vec<CallArg> {
        args.into_iter()
            .map(|a| match a {
                CallArg::Operand(op) => CallArg::Operand(self.operand(op)),
                s => s,
            })
            .collect()
    }

    fn parts(&self, parts: Vec<ExprPart>) -> Vec<ExprPart> {
        parts
            .into_iter()
            .map(|p| match p {
                ExprPart::Operand(op) => ExprPart::Operand(self.operand(op)),
                ExprPart::Group(inner) => ExprPart::Group(self.parts(inner)),
                op => op,
            })
            .collect()
    }

    fn calc(&self, calc: Calc) -> Calc {
        match calc {
            Calc::Num(n) => Calc::Num(n),
            Calc::Var { op, operand } => Calc::Var { op, operand: self.operand(operand) },
            Calc::VarVar { op, left, right } => {
                Calc::VarVar { op, left: self.operand(left), right: self.operand(right) }
            }
            Calc::VarNum { op, left, right } => Calc::VarNum { op, left: self.operand(left), right },
            Calc::Func { name, args, swizzle } => Calc::Func { name, args: self.call_args(args), swizzle },
            Calc::Compare { cmp, ternary } => Calc::Compare {
                cmp: self.compare(cmp),
                ternary: ternary.map(|(a, b)| (self.operand(a), self.operand(b))),
            },
            Calc::Multi(parts) => Calc::Multi(self.parts(parts)),
        }
    }

    fn stmt(&mut self, stmt: Stmt, depth: usize) -> Result<Vec<Stmt>, CompileError> {
        self.ctx.set_stmt(&stmt);
        let Stmt { kind, line, annotations } = stmt;
        let with = |kind: StmtKind| Stmt { kind, line, annotations: annotations.clone() };
        let macros = self.macros;

        let out = match kind {
            StmtKind::Block(b) => vec![with(StmtKind::Block(self.block(b, depth)?))],
            StmtKind::If { cond, then_block, else_block } => {
                let then_block = self.block(then_block, depth)?;
                let else_block = else_block.map(|b| self.block(b, depth)).transpose()?;
                vec![with(StmtKind::If { cond: self.compare(cond), then_block, else_block })]
            }
            StmtKind::While { cond, body } => {
                let body = self.block(body, depth)?;
                vec![with(StmtKind::While { cond: self.compare(cond), body })]
            }
            StmtKind::Loop { body, cond } => {
                let body = self.block(body, depth)?;
                vec![with(StmtKind::Loop { body, cond: cond.map(|c| self.compare(c)) })]
            }
            StmtKind::VarDeclAssign { decl, calc } => {
                let assign = VarAssign {
                    target: decl.name.clone(),
                    swizzle: None,
                    op: AssignOp::Set,
                    calc,
                    init: true,
                };
                let mut out = vec![with(StmtKind::VarDecl(decl))];
                out.extend(self.assign(assign)?.into_iter().map(|a| with(StmtKind::VarAssign(a))));
                out
            }
            StmtKind::VarDeclMulti { names, ty, reg, is_const } => {
                let base = match &reg {
                    None => None,
                    Some(r) => Some(self.multi_base(r, ty)?),
                };
                names
                    .into_iter()
                    .enumerate()
                    .map(|(i, name)| {
                        let reg = base.map(|b| RegRef::Index(b + i as u32 * ty.reg_count() as u32));
                        with(StmtKind::VarDecl(VarDecl { name, ty, reg, is_const }))
                    })
                    .collect()
            }
            StmtKind::VarAssign(assign) => {
                self.assign(assign)?.into_iter().map(|a| with(StmtKind::VarAssign(a))).collect()
            }
            StmtKind::FuncCall { name, args } => match macros.get(&name) {
                Some(mac) => vec![self.expand_macro(mac, args, line, depth)?],
                None => vec![with(StmtKind::FuncCall { name, args: self.call_args(args) })],
            },
            other @ (StmtKind::VarDecl(_)
            | StmtKind::VarDeclAlias { .. }
            | StmtKind::VarUndef(_)
            | StmtKind::Goto(_)
            | StmtKind::Label(_)
            | StmtKind::Break
            | StmtKind::Continue
            | StmtKind::Exit
            | StmtKind::Asm(_)) => vec![with(other)],
        };
        Ok(out)
    }

    /// First register number of a `T<$reg> a, b, c;` declaration.
    fn multi_base(&self, reg: &RegRef, ty: DataType) -> Result<u32, CompileError> {
        match reg {
            RegRef::Index(i) => Ok(*i),
            RegRef::Named(name) => match Reg::parse(name) {
                Some(r) if r.is_vector() == ty.is_vector() => Ok(r.index() as u32),
                _ => Err(self.ctx.error(format!("Invalid register {} for type {}", name, ty))),
            },
        }
    }

    fn assign(&mut self, assign: VarAssign) -> Result<Vec<VarAssign>, CompileError> {
        if self.state.contains(&assign.target) {
            return Err(self.ctx.error(format!(
                "State variable '{}' lives in memory, use store() to write it",
                assign.target
            )));
        }
        let calc = match assign.op {
            AssignOp::Set => assign.calc,
            AssignOp::Compound(op) => self.expand_compound(&assign.target, op, assign.calc)?,
        };
        let calc = self.calc(calc);
        match calc {
            Calc::Multi(parts) => fold::lower_expression(&assign.target, assign.swizzle, &parts)
                .map(|steps| {
                    steps.into_iter().map(|s| VarAssign { init: assign.init, ..s }).collect()
                })
                .map_err(|e| self.ctx.error(e.to_string())),
            calc => Ok(vec![VarAssign { op: AssignOp::Set, calc, ..assign }]),
        }
    }

    /// `x OP= rhs` becomes `x = x OP rhs`.
    fn expand_compound(&self, target: &str, op: BinOp, calc: Calc) -> Result<Calc, CompileError> {
        let target_part = ExprPart::Operand(Operand::var(target));
        Ok(match calc {
            Calc::Num(n) => Calc::VarNum { op, left: Operand::var(target), right: n },
            Calc::Var { op: None, operand } => Calc::VarVar { op, left: Operand::var(target), right: operand },
            Calc::VarVar { op: inner, left, right } => Calc::Multi(vec![
                target_part,
                ExprPart::Op(op),
                ExprPart::Group(vec![ExprPart::Operand(left), ExprPart::Op(inner), ExprPart::Operand(right)]),
            ]),
            Calc::VarNum { op: inner, left, right } => Calc::Multi(vec![
                target_part,
                ExprPart::Op(op),
                ExprPart::Group(vec![
                    ExprPart::Operand(left),
                    ExprPart::Op(inner),
                    ExprPart::Operand(Operand::num(right)),
                ]),
            ]),
            Calc::Multi(parts) => Calc::Multi(vec![target_part, ExprPart::Op(op), ExprPart::Group(parts)]),
            _ => {
                return Err(self.ctx.error(format!(
                    "Operator '{}=' needs an arithmetic right-hand side",
                    op
                )))
            }
        })
    }

    fn expand_macro(
        &mut self,
        mac: &FuncDef,
        args: Vec<CallArg>,
        line: usize,
        depth: usize,
    ) -> Result<Stmt, CompileError> {
        if depth >= MAX_MACRO_DEPTH {
            return Err(self.ctx.error(format!("Macro expansion too deep while expanding '{}'", mac.name)));
        }
        if args.len() != mac.args.len() {
            return Err(self.ctx.error(format!(
                "Macro '{}' expects {} arguments, got {}",
                mac.name,
                mac.args.len(),
                args.len()
            )));
        }
        let mut stmts = Vec::new();
        for (param, arg) in mac.args.iter().zip(args) {
            let alias_of = match arg {
                CallArg::Operand(Operand { kind: OperandKind::Var(name), swizzle: None })
                    if !self.state.contains(&name) =>
                {
                    name
                }
                _ => {
                    return Err(self.ctx.error(format!(
                        "Arguments of macro '{}' must be variables",
                        mac.name
                    )))
                }
            };
            stmts.push(Stmt::new(
                StmtKind::VarDeclAlias { name: param.name.clone(), alias_of, ty: Some(param.ty) },
                line,
            ));
        }
        let body = mac
            .body
            .clone()
            .ok_or_else(|| self.ctx.error(format!("Macro '{}' has no body", mac.name)))?;
        stmts.extend(body.stmts);
        let block = self.block(Block { stmts }, depth + 1)?;
        Ok(Stmt::new(StmtKind::Block(block), line))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::lexer::Lexer;
    use crate::compiler::parser::parse;
    use crate::CompileConfig;

    fn normalized(src: &str) -> Result<Program, CompileError> {
        let mut prog = parse(Lexer::new(src).tokenize().unwrap()).unwrap();
        let mut ctx = CompilerContext::new(CompileConfig::default());
        normalize(&mut prog, &mut ctx)?;
        Ok(prog)
    }

    fn body(prog: &Program) -> &[Stmt] {
        &prog.items[0].body.as_ref().unwrap().stmts
    }

    #[test]
    fn test_decl_assign_split() {
        let prog = normalized("function f() { const u32<$t0> a = 4; }").unwrap();
        let stmts = body(&prog);
        assert_eq!(stmts.len(), 2);
        assert!(matches!(&stmts[0].kind, StmtKind::VarDecl(d) if d.is_const));
        assert!(matches!(&stmts[1].kind, StmtKind::VarAssign(a) if a.init));
    }

    #[test]
    fn test_multi_decl_registers() {
        let prog = normalized("function f() { vec32<$v02> a, b; u32 c, d; }").unwrap();
        let stmts = body(&prog);
        assert!(matches!(&stmts[0].kind, StmtKind::VarDecl(d) if d.reg == Some(RegRef::Index(2))));
        assert!(matches!(&stmts[1].kind, StmtKind::VarDecl(d) if d.reg == Some(RegRef::Index(4))));
        assert!(matches!(&stmts[3].kind, StmtKind::VarDecl(d) if d.reg.is_none()));
    }

    #[test]
    fn test_compound_and_state_rewrite() {
        let prog = normalized("state { u32 COUNT; } function f() { u32<$t0> a; a += 3; a = a + COUNT; }").unwrap();
        let stmts = body(&prog);
        assert!(matches!(&stmts[1].kind, StmtKind::VarAssign(VarAssign { calc: Calc::VarNum { op: BinOp::Add, .. }, .. })));
        match &stmts[2].kind {
            StmtKind::VarAssign(VarAssign { calc: Calc::VarVar { right, .. }, .. }) => {
                assert_eq!(right.kind, OperandKind::Label("COUNT".into()))
            }
            other => panic!("{:?}", other),
        }
    }

    #[test]
    fn test_macro_expansion() {
        let prog = normalized(
            "macro inc(u32 x) { x += 1; } function f() { u32<$t0> a; u32<$t1> b; inc(a); inc(b); }",
        )
        .unwrap();
        assert_eq!(prog.items.len(), 1);
        let stmts = body(&prog);
        for (stmt, arg) in stmts[2..].iter().zip(["a", "b"]) {
            match &stmt.kind {
                StmtKind::Block(b) => {
                    assert!(matches!(&b.stmts[0].kind, StmtKind::VarDeclAlias { alias_of, .. } if alias_of == arg));
                    assert!(matches!(&b.stmts[1].kind, StmtKind::VarAssign(_)));
                }
                other => panic!("{:?}", other),
            }
        }
    }

    #[test]
    fn test_macro_errors() {
        let err = normalized("macro m(u32 x) { } function f() { m(); }").unwrap_err();
        assert!(err.to_string().contains("expects 1 arguments"));
        let err = normalized("macro m(u32 x) { } function f() { m(4); }").unwrap_err();
        assert!(err.to_string().contains("must be variables"));
        let err = normalized("macro m(u32 x) { m(x); } function f() { u32<$t0> a; m(a); }").unwrap_err();
        assert!(err.to_string().contains("too deep"));
    }

    #[test]
    fn test_normalize_is_idempotent() {
        let src = "state { u32 S; } macro m(u32 x) { x = x + 4 + 4; }
            function f() { u32<$t0> a = S; u32<$t1> b, c; b += a - 2; if (a == S) { m(a); } }";
        let mut prog = normalized(src).unwrap();
        let once = serde_json::to_string(&prog).unwrap();
        let mut ctx = CompilerContext::new(CompileConfig::default());
        normalize(&mut prog, &mut ctx).unwrap();
        assert_eq!(once, serde_json::to_string(&prog).unwrap());
    }
}
