//! Properties of the AST normaliser and macro expansion.

use rspl_compiler::compiler::ast::{Block, Calc, Program, StmtKind, VarAssign};
use rspl_compiler::compiler::context::CompilerContext;
use rspl_compiler::compiler::lexer::Lexer;
use rspl_compiler::compiler::normalize::normalize;
use rspl_compiler::compiler::parser::parse;
use rspl_compiler::{compile, CompileConfig};

fn parse_src(src: &str) -> Program {
    parse(Lexer::new(src).tokenize().expect("lex failed")).expect("parse failed")
}

fn normalized(src: &str) -> Program {
    let mut program = parse_src(src);
    let mut ctx = CompilerContext::new(CompileConfig::default());
    normalize(&mut program, &mut ctx).expect("normalize failed");
    program
}

fn function_lines(src: &str) -> Vec<String> {
    let config = CompileConfig { optimize: false, dispatch_wrapper: false, ..CompileConfig::default() };
    compile(src, &config)
        .expect("compile failed")
        .asm
        .lines()
        .map(|l| l.trim().to_string())
        .filter(|l| !l.is_empty() && !l.ends_with(':'))
        .collect()
}

const PROGRAMS: &[&str] = &[
    "function f() { u32<$t0> a = 4; a += 2; }",
    "state { u32 S; vec16 V[2]; } function f() { u32<$t0> a = S; u32<$t1> b, c; b += a - 2; if (a == S) { c = b; } }",
    "macro m(u32 x) { x = x + 4 + 4; } function f() { u32<$t0> a; while (a != 0) { m(a); } }",
    "macro inner(u32 x) { x -= 1; } macro outer(u32 y) { inner(y); inner(y); } function f() { u32<$t0> a; outer(a); }",
    "function f() { vec32<$v02> p, q; p = p + q; loop { p *= q; } while (1 < 2); }",
    "function f() { u32<$t0> a; u32<$t1> b; u32<$t2> c; a = (b + c) * 2; a = b - (c + 4); }",
];

#[test]
fn normalisation_is_idempotent() {
    for src in PROGRAMS {
        let mut program = normalized(src);
        let once = serde_json::to_string(&program).unwrap();
        let mut ctx = CompilerContext::new(CompileConfig::default());
        normalize(&mut program, &mut ctx).unwrap();
        assert_eq!(once, serde_json::to_string(&program).unwrap(), "not idempotent: {}", src);
    }
}

fn assert_normal_block(block: &Block, src: &str) {
    for stmt in &block.stmts {
        match &stmt.kind {
            StmtKind::VarDeclAssign { .. } | StmtKind::VarDeclMulti { .. } => {
                panic!("declaration left unsplit in {}", src)
            }
            StmtKind::VarAssign(VarAssign { calc: Calc::Multi(_), .. }) => {
                panic!("expression left unlowered in {}", src)
            }
            StmtKind::VarAssign(assign) => {
                assert_eq!(assign.op, rspl_compiler::compiler::ast::AssignOp::Set, "compound assignment in {}", src)
            }
            StmtKind::Block(b) | StmtKind::While { body: b, .. } | StmtKind::Loop { body: b, .. } => {
                assert_normal_block(b, src)
            }
            StmtKind::If { then_block, else_block, .. } => {
                assert_normal_block(then_block, src);
                if let Some(b) = else_block {
                    assert_normal_block(b, src);
                }
            }
            _ => {}
        }
    }
}

#[test]
fn normal_form_has_no_sugar_left() {
    for src in PROGRAMS {
        let program = normalized(src);
        assert!(program.items.iter().all(|f| f.kind != rspl_compiler::compiler::ast::FuncKind::Macro));
        for func in &program.items {
            if let Some(body) = &func.body {
                assert_normal_block(body, src);
            }
        }
    }
}

#[test]
fn macro_calls_bind_independently() {
    let src = "macro bump(u32 x, u32 y) { x += y; }
        function f() { u32<$t0> a; u32<$t1> b; bump(a, b); bump(b, a); }";
    assert_eq!(
        function_lines(src),
        vec!["addu $t0, $t0, $t1", "addu $t1, $t1, $t0", "jr $ra", "nop"]
    );
}

#[test]
fn caller_variable_shadowing_a_parameter_is_untouched() {
    let src = "macro inc(u32 x) { x += 1; }
        function f() { u32<$t0> x; u32<$t1> y; inc(y); x += 2; inc(x); }";
    assert_eq!(
        function_lines(src),
        vec!["addiu $t1, $t1, 1", "addiu $t0, $t0, 2", "addiu $t0, $t0, 1", "jr $ra", "nop"]
    );
}

#[test]
fn swapped_macro_arguments_bind_simultaneously() {
    let src = "macro sub(u32 a, u32 b) { a -= b; }
        function f() { u32<$t0> a; u32<$t1> b; sub(b, a); }";
    assert_eq!(function_lines(src), vec!["subu $t1, $t1, $t0", "jr $ra", "nop"]);
}

#[test]
fn macro_locals_do_not_leak() {
    let src = "macro tmp(u32 x) { u32<$t5> t; t = x; } function f() { u32<$t0> a; tmp(a); t = 1; }";
    let config = CompileConfig::default();
    let err = compile(src, &config).unwrap_err();
    assert!(err.to_string().contains("'t' not known"));
}

#[test]
fn macro_template_is_not_mutated() {
    let src = "macro twice(u32 x) { x += x; } function f() { u32<$t0> a; u32<$t1> b; twice(a); twice(b); twice(a); }";
    assert_eq!(
        function_lines(src),
        vec!["addu $t0, $t0, $t0", "addu $t1, $t1, $t1", "addu $t0, $t0, $t0", "jr $ra", "nop"]
    );
}
