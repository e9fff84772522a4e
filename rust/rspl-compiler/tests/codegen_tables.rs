//! Decision tables of immediate loads and compare-and-branch lowering.

use rspl_compiler::compiler::lower::imm_load_sequence;
use rspl_compiler::compiler::types::Reg;
use rspl_compiler::{compile, CompileConfig};

fn unoptimized() -> CompileConfig {
    CompileConfig { optimize: false, dispatch_wrapper: false, ..CompileConfig::default() }
}

fn function_lines(src: &str) -> Vec<String> {
    compile(src, &unoptimized())
        .unwrap_or_else(|e| panic!("compile failed for {:?}: {}", src, e))
        .asm
        .lines()
        .map(|l| l.trim().to_string())
        .filter(|l| !l.is_empty())
        .collect()
}

// ── Immediate loads ─────────────────────────────────────────────────

fn load(value: u32) -> Vec<String> {
    imm_load_sequence(Reg::AT, value).iter().map(|op| op.to_string()).collect()
}

#[test]
fn immediate_table() {
    let cases: &[(u32, &[&str])] = &[
        (0, &["or $at, $zero, $zero"]),
        (1, &["addiu $at, $zero, 1"]),
        (0x7FFF, &["addiu $at, $zero, 32767"]),
        (0x8000, &["ori $at, $zero, 0x8000"]),
        (0xFFFF, &["ori $at, $zero, 0xFFFF"]),
        (0xFFFF_FFFF, &["addiu $at, $zero, -1"]),
        (0xFFFF_8000, &["addiu $at, $zero, -32768"]),
        (0xFFFF_7FFF, &["lui $at, 0xFFFF", "ori $at, $at, 0x7FFF"]),
        (0x0001_0000, &["lui $at, 0x0001"]),
        (0x0012_0000, &["lui $at, 0x0012"]),
        (0x0012_3456, &["lui $at, 0x0012", "ori $at, $at, 0x3456"]),
        (0x8000_0000, &["lui $at, 0x8000"]),
    ];
    for (value, expected) in cases {
        assert_eq!(load(*value), *expected, "value {:#010X}", value);
    }
}

#[test]
fn immediate_loads_never_exceed_two_instructions() {
    let mut value: u32 = 1;
    for _ in 0..2000 {
        value = value.wrapping_mul(1_664_525).wrapping_add(1_013_904_223);
        let ops = load(value);
        assert!(!ops.is_empty() && ops.len() <= 2, "{:#X} -> {:?}", value, ops);
        if ops.len() == 2 {
            let signed = value as i32;
            assert!(!(-0x8000..=0x7FFF).contains(&signed), "{:#X} fits addiu", value);
            assert!(value > 0xFFFF && value & 0xFFFF != 0, "{:#X} fits one instruction", value);
        }
    }
}

#[test]
fn assignment_uses_the_table() {
    let lines = function_lines("function f() { u32<$t0> a; a = 0x123456; s32<$t1> s; s = -1; }");
    assert_eq!(
        &lines[1..5],
        &["lui $t0, 0x0012", "ori $t0, $t0, 0x3456", "addiu $t1, $zero, -1", "jr $ra"]
    );
}

// ── Compare and branch ──────────────────────────────────────────────

/// Code of `cond` as the back edge of a do-while loop, which branches when
/// the condition holds.
fn branch_when(ty: &str, cond: &str) -> Vec<String> {
    let src = format!("function f() {{ {ty}<$t0> a; {ty}<$t1> b; loop {{ }} while({cond}); }}");
    let lines = function_lines(&src);
    let start = lines.iter().position(|l| l == "LABEL_0002:").map_or(0, |p| p + 1);
    let end = lines.iter().position(|l| l == "LABEL_0003:").unwrap_or(lines.len());
    lines[start..end].to_vec()
}

#[test]
fn equality_table() {
    let cases: &[(&str, &[&str])] = &[
        ("a == b", &["beq $t0, $t1, LABEL_0001", "nop"]),
        ("a != b", &["bne $t0, $t1, LABEL_0001", "nop"]),
        ("a == 0", &["beq $t0, $zero, LABEL_0001", "nop"]),
        ("a != 0", &["bne $t0, $zero, LABEL_0001", "nop"]),
        ("a == 100", &["addiu $at, $zero, 100", "beq $t0, $at, LABEL_0001", "nop"]),
        (
            "a != 0x12345",
            &["lui $at, 0x0001", "ori $at, $at, 0x2345", "bne $t0, $at, LABEL_0001", "nop"],
        ),
        ("7 == a", &["addiu $at, $zero, 7", "beq $t0, $at, LABEL_0001", "nop"]),
    ];
    for (cond, expected) in cases {
        assert_eq!(branch_when("u32", cond), *expected, "{}", cond);
    }
}

#[test]
fn unsigned_ordering_table() {
    let cases: &[(&str, &[&str])] = &[
        ("a < b", &["sltu $at, $t0, $t1", "bne $at, $zero, LABEL_0001", "nop"]),
        ("a >= b", &["sltu $at, $t0, $t1", "beq $at, $zero, LABEL_0001", "nop"]),
        ("a > b", &["sltu $at, $t1, $t0", "bne $at, $zero, LABEL_0001", "nop"]),
        ("a <= b", &["sltu $at, $t1, $t0", "beq $at, $zero, LABEL_0001", "nop"]),
        ("a < 10", &["sltiu $at, $t0, 10", "bne $at, $zero, LABEL_0001", "nop"]),
        ("a >= 10", &["sltiu $at, $t0, 10", "beq $at, $zero, LABEL_0001", "nop"]),
        ("a > 10", &["sltiu $at, $t0, 11", "beq $at, $zero, LABEL_0001", "nop"]),
        ("a <= 10", &["sltiu $at, $t0, 11", "bne $at, $zero, LABEL_0001", "nop"]),
        ("10 < a", &["sltiu $at, $t0, 11", "beq $at, $zero, LABEL_0001", "nop"]),
        (
            "a >= 0x10000",
            &["lui $at, 0x0001", "sltu $at, $t0, $at", "beq $at, $zero, LABEL_0001", "nop"],
        ),
        (
            "a > 0xFFFEFFFF",
            &["lui $at, 0xFFFF", "sltu $at, $t0, $at", "beq $at, $zero, LABEL_0001", "nop"],
        ),
    ];
    for (cond, expected) in cases {
        assert_eq!(branch_when("u32", cond), *expected, "{}", cond);
    }
}

#[test]
fn signed_ordering_table() {
    let cases: &[(&str, &[&str])] = &[
        ("a < b", &["slt $at, $t0, $t1", "bne $at, $zero, LABEL_0001", "nop"]),
        ("a > b", &["slt $at, $t1, $t0", "bne $at, $zero, LABEL_0001", "nop"]),
        ("a < 0", &["slti $at, $t0, 0", "bne $at, $zero, LABEL_0001", "nop"]),
        ("a > -5", &["slti $at, $t0, -4", "beq $at, $zero, LABEL_0001", "nop"]),
        ("a <= -5", &["slti $at, $t0, -4", "bne $at, $zero, LABEL_0001", "nop"]),
        (
            "a < -40000",
            &[
                "lui $at, 0xFFFF",
                "ori $at, $at, 0x63C0",
                "slt $at, $t0, $at",
                "bne $at, $zero, LABEL_0001",
                "nop",
            ],
        ),
    ];
    for (cond, expected) in cases {
        assert_eq!(branch_when("s32", cond), *expected, "{}", cond);
    }
}

#[test]
fn if_inverts_large_unsigned_greater_than() {
    let lines = function_lines("function f() { u32<$t0> a; if (a > 0xFFFEFFFF) { exit; } }");
    assert_eq!(
        &lines[1..4],
        &["lui $at, 0xFFFF", "sltu $at, $t0, $at", "bne $at, $zero, LABEL_0001"]
    );
}

#[test]
fn constant_conditions_fold() {
    assert_eq!(branch_when("u32", "1 < 2"), vec!["j LABEL_0001", "nop"]);
    assert!(branch_when("u32", "2 < 1").is_empty());
}
