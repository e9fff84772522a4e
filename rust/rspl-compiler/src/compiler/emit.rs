//! Serialization of generated code and the state layout to assembly text.

use crate::compiler::asm::{AsmFunction, DISPATCH_LOOP};
use crate::compiler::ast::{FuncKind, Program, StateVar};
use crate::compiler::types::DataType;
use std::collections::BTreeMap;
use std::fmt::{self, Write};

pub const HEADER: &str = "## Auto-generated file, only edit the .rspl source instead.";

/// Data directive and its unit size used for initialised state of a type.
pub fn data_unit(ty: DataType) -> (&'static str, u32) {
    match ty {
        DataType::U8 | DataType::S8 => (".byte", 1),
        DataType::U16 | DataType::S16 | DataType::Vec16 | DataType::Vec32 => (".half", 2),
        DataType::U32 | DataType::S32 => (".word", 4),
    }
}

/// Dispatch-table entry of one command index.
struct Entry<'a> {
    target: &'a str,
    arg_size: u32,
}

fn command_table<'a>(program: &'a Program, funcs: &'a [AsmFunction]) -> BTreeMap<u32, Entry<'a>> {
    let mut table = BTreeMap::new();
    for func in funcs {
        if let FuncKind::Command(idx) = func.kind {
            let target = func.alias_of.as_deref().unwrap_or(&func.name);
            table.insert(idx, Entry { target, arg_size: func.arg_size });
        }
    }
    // Commands declared without a body live in hand-written code.
    for item in program.items.iter().filter(|f| f.body.is_none()) {
        if let FuncKind::Command(idx) = item.kind {
            let arg_size = (item.args.len() as u32 * 4).max(4);
            table.entry(idx).or_insert(Entry { target: &item.name, arg_size });
        }
    }
    table
}

fn write_state_var(out: &mut String, var: &StateVar) -> fmt::Result {
    let align = var.align.unwrap_or_else(|| var.ty.alignment());
    writeln!(out, "    .align {}", align.trailing_zeros())?;
    if var.init.is_empty() {
        return writeln!(out, "    {}: .ds.b {}", var.name, var.byte_size());
    }
    let (directive, unit) = data_unit(var.ty);
    let values: Vec<String> = var.init.iter().map(|n| n.as_int().unwrap_or(0).to_string()).collect();
    writeln!(out, "    {}: {} {}", var.name, directive, values.join(", "))?;
    let rest = var.byte_size().saturating_sub(var.init.len() as u32 * unit);
    if rest > 0 {
        writeln!(out, "    .ds.b {}", rest)?;
    }
    Ok(())
}

fn write_function(out: &mut String, func: &AsmFunction) -> fmt::Result {
    if func.alias_of.is_some() {
        return Ok(());
    }
    if let Some(align) = func.align {
        writeln!(out, ".align {}", align.trailing_zeros())?;
    }
    writeln!(out, "{}:", func.name)?;
    for line in &func.lines {
        writeln!(out, "{}", line)?;
    }
    writeln!(out)
}

/// Function text only, without the overlay framing.
pub fn write_functions(funcs: &[AsmFunction]) -> Result<String, fmt::Error> {
    let mut out = String::new();
    for func in funcs {
        write_function(&mut out, func)?;
    }
    Ok(out)
}

/// Complete overlay source: includes, dispatch table, saved state and code.
pub fn write_module(program: &Program, funcs: &[AsmFunction]) -> Result<String, fmt::Error> {
    let mut out = String::new();
    writeln!(out, "{}", HEADER)?;
    for inc in &program.includes {
        writeln!(out, "#include <{}>", inc)?;
    }
    writeln!(out, ".set noreorder")?;
    writeln!(out, ".set noat")?;
    writeln!(out, ".set nomacro")?;
    writeln!(out)?;

    writeln!(out, ".data")?;
    writeln!(out, "  RSPQ_BeginOverlayHeader")?;
    let table = command_table(program, funcs);
    let last = table.keys().next_back().copied();
    for idx in last.map_or(0..0, |l| 0..l + 1) {
        match table.get(&idx) {
            Some(entry) => writeln!(out, "    RSPQ_DefineCommand {}, {}", entry.target, entry.arg_size)?,
            None => writeln!(
                out,
                "    RSPQ_DefineCommand {}, 4  ## Warning: unused command index {}",
                DISPATCH_LOOP, idx
            )?,
        }
    }
    writeln!(out, "  RSPQ_EndOverlayHeader")?;
    writeln!(out)?;

    writeln!(out, "  RSPQ_BeginSavedState")?;
    writeln!(out, "    STATE_MEM_START:")?;
    for var in program.state.iter().filter(|v| !v.is_extern) {
        write_state_var(&mut out, var)?;
    }
    writeln!(out, "    STATE_MEM_END:")?;
    writeln!(out, "  RSPQ_EndSavedState")?;
    writeln!(out)?;

    writeln!(out, ".text")?;
    writeln!(out, "OVERLAY_CODE_START:")?;
    writeln!(out)?;
    for func in funcs {
        write_function(&mut out, func)?;
    }
    writeln!(out, "OVERLAY_CODE_END:")?;
    for inc in &program.post_includes {
        writeln!(out, "#include <{}>", inc)?;
    }
    Ok(out)
}
