//! Assembly-level optimizer.
//!
//! Peephole passes run first on each function, then cost-guided scheduling,
//! then delay-slot filling. Every pass preserves the delay-slot invariant;
//! it is checked once more at the end.

pub mod cost;
pub mod deps;
pub mod patterns;
pub mod schedule;

use crate::compiler::asm::{AsmFunction, AsmLine};
use crate::{CompileConfig, CompileError};

fn internal(pass: &str, message: String) -> CompileError {
    CompileError::Internal { pass: pass.to_string(), message }
}

fn log_pass(func: &str, pass: &str, rewrites: usize) {
    if rewrites > 0 {
        tracing::debug!(func, pass, rewrites, "optimizer pass");
    }
}

fn optimize_function(func: &mut AsmFunction, config: &CompileConfig) -> Result<(), CompileError> {
    let is_command = func.is_command();
    let name = func.name.clone();
    let lines: &mut Vec<AsmLine> = &mut func.lines;

    log_pass(&name, "strip-comments", patterns::strip_comments(lines));
    let merged = patterns::merge_branch_jump(lines, is_command).map_err(|m| internal("branch-merge", m))?;
    log_pass(&name, "branch-merge", merged);
    let merged = patterns::merge_assert(lines).map_err(|m| internal("assert-merge", m))?;
    log_pass(&name, "assert-merge", merged);
    log_pass(&name, "jump-chain", patterns::collapse_jump_chains(lines));
    log_pass(&name, "label-dedupe", patterns::dedupe_labels(lines));
    log_pass(&name, "imm-dedupe", patterns::dedupe_immediates(lines));
    log_pass(&name, "reciprocal-fold", patterns::fold_reciprocals(lines));
    if is_command {
        log_pass(&name, "tail-call", patterns::tail_calls(lines));
    }
    log_pass(&name, "dead-tail", patterns::truncate_dead_tail(lines));
    log_pass(&name, "schedule", schedule::schedule(lines, config.schedule_rounds));
    log_pass(&name, "delay-slot", schedule::fill_delay_slots(lines));

    schedule::check_delay_slots(lines).map_err(|m| internal("delay-slot", m))
}

/// Optimize all functions in place. A no-op unless `config.optimize` is set.
pub fn optimize(funcs: &mut [AsmFunction], config: &CompileConfig) -> Result<(), CompileError> {
    if !config.optimize {
        return Ok(());
    }
    for func in funcs.iter_mut() {
        let before = schedule_cost(func);
        optimize_function(func, config)?;
        tracing::debug!(func = %func.name, before, after = schedule_cost(func), "optimized function");
    }
    let aliased = patterns::alias_commands(funcs);
    log_pass("<module>", "command-alias", aliased);
    Ok(())
}

fn schedule_cost(func: &AsmFunction) -> u32 {
    cost::estimate_cycles(&func.lines)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::asm::build::*;
    use crate::compiler::asm::{Opcode, DISPATCH_LOOP};
    use crate::compiler::ast::FuncKind;
    use crate::compiler::types::Reg;

    fn command(lines: Vec<AsmLine>) -> AsmFunction {
        AsmFunction { name: "CmdTest".into(), kind: FuncKind::Command(0), arg_size: 4, align: None, lines, alias_of: None }
    }

    #[test]
    fn test_disabled_optimizer_keeps_lines() {
        let lines = vec![AsmLine::Comment("x".into()), AsmLine::op(Opcode::J, vec![label(DISPATCH_LOOP)]), AsmLine::nop()];
        let mut funcs = vec![command(lines.clone())];
        let config = CompileConfig { optimize: false, ..CompileConfig::default() };
        optimize(&mut funcs, &config).unwrap();
        assert_eq!(funcs[0].lines, lines);
    }

    #[test]
    fn test_full_pipeline_keeps_delay_slots() {
        let lines = vec![
            AsmLine::op(Opcode::Addiu, vec![r(Reg::Scalar(8)), r(Reg::ZERO), imm(3)]),
            AsmLine::op(Opcode::Beq, vec![r(Reg::Scalar(9)), r(Reg::ZERO), label("LABEL_0001")]),
            AsmLine::nop(),
            AsmLine::op(Opcode::J, vec![label(DISPATCH_LOOP)]),
            AsmLine::nop(),
            AsmLine::Label("LABEL_0001".into()),
            AsmLine::op(Opcode::Sw, vec![r(Reg::Scalar(8)), mem(0, Reg::Scalar(10))]),
            AsmLine::op(Opcode::J, vec![label(DISPATCH_LOOP)]),
            AsmLine::nop(),
        ];
        let mut funcs = vec![command(lines)];
        optimize(&mut funcs, &CompileConfig::default()).unwrap();
        let text: Vec<String> = funcs[0].lines.iter().map(|l| l.to_string().trim().to_string()).collect();
        assert_eq!(
            text,
            vec![
                "bne $t1, $zero, RSPQ_Loop",
                "addiu $t0, $zero, 3",
                "j RSPQ_Loop",
                "sw $t0, 0($t2)",
            ]
        );
        assert!(schedule::check_delay_slots(&funcs[0].lines).is_ok());
    }
}
