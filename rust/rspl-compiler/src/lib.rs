//! RSPL Compiler
//!
//! Translates RSPL, a C-like language for the RSP vector coprocessor, into
//! assembly for the RSPQ overlay toolchain.

pub mod compiler;
pub mod diagnostics;

use compiler::context::CompilerContext;
use compiler::preprocess::{Loader, PreprocessError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

pub use compiler::context::Warning;

// ── Compile options ─────────────────────────────────────────────────

/// Options of one compilation. Deserialisable from the `[compile]` table of
/// `rspl.toml`; missing keys take their defaults.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompileConfig {
    /// Run the optimizer. Default: `true`.
    pub optimize: bool,
    /// Emit the overlay header, dispatch table and saved state around the
    /// code. Default: `true`.
    pub dispatch_wrapper: bool,
    /// Emit a `## L<n>` comment before the code of each source statement.
    /// The optimizer strips them. Default: `false`.
    pub source_comments: bool,
    /// Rounds of cost-guided scheduling; 0 disables it. Default: 4.
    pub schedule_rounds: usize,
}

impl Default for CompileConfig {
    fn default() -> Self {
        Self { optimize: true, dispatch_wrapper: true, source_comments: false, schedule_rounds: 4 }
    }
}

#[derive(Debug, Error)]
pub enum CompileError {
    #[error("preprocessor error: {0}")]
    Preprocess(#[from] PreprocessError),
    #[error("syntax error: {0}")]
    Lex(#[from] compiler::lexer::LexError),
    #[error("syntax error: {0}")]
    Parse(#[from] compiler::parser::ParseError),
    #[error("{message} (function '{func}', line {line})")]
    Semantic {
        func: String,
        line: usize,
        message: String,
        /// JSON dump of the offending statement, nested blocks elided.
        ast: String,
    },
    #[error("internal compiler error in {pass}: {message}")]
    Internal { pass: String, message: String },
}

impl CompileError {
    /// Source line the error points at, when known.
    pub fn line(&self) -> Option<usize> {
        match self {
            CompileError::Preprocess(e) => e.line(),
            CompileError::Lex(e) => Some(e.line()),
            CompileError::Parse(e) => e.line(),
            CompileError::Semantic { line, .. } => Some(*line),
            CompileError::Internal { .. } => None,
        }
    }
}

/// Result of a successful compilation.
#[derive(Debug, Clone)]
pub struct CompileOutput {
    pub asm: String,
    pub warnings: Vec<Warning>,
}

/// Compile a self-contained source. `#include` directives are rejected.
pub fn compile(source: &str, config: &CompileConfig) -> Result<CompileOutput, CompileError> {
    compile_with_loader(source, config, &BTreeMap::new(), &compiler::preprocess::no_includes)
}

/// Compile with preprocessor `defines` and a loader resolving `#include` paths.
pub fn compile_with_loader(
    source: &str,
    config: &CompileConfig,
    defines: &BTreeMap<String, String>,
    loader: &Loader<'_>,
) -> Result<CompileOutput, CompileError> {
    let text = compiler::preprocess::preprocess(source, defines, loader)?;

    let tokens = compiler::lexer::Lexer::new(&text).tokenize()?;
    tracing::debug!(tokens = tokens.len(), "lexed source");

    let mut program = compiler::parser::parse(tokens)?;
    tracing::debug!(items = program.items.len(), state = program.state.len(), "parsed program");

    let mut ctx = CompilerContext::new(config.clone());
    compiler::normalize::normalize(&mut program, &mut ctx)?;
    let mut funcs = compiler::lower::lower_program(&program, &mut ctx)?;
    compiler::opt::optimize(&mut funcs, config)?;

    let written = if config.dispatch_wrapper {
        compiler::emit::write_module(&program, &funcs)
    } else {
        compiler::emit::write_functions(&funcs)
    };
    let asm = written.map_err(|e| CompileError::Internal { pass: "emit".into(), message: e.to_string() })?;
    tracing::debug!(bytes = asm.len(), functions = funcs.len(), "wrote assembly");

    Ok(CompileOutput { asm, warnings: ctx.take_warnings() })
}
