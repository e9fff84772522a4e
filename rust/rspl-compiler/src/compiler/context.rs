//! Per-compilation state: label counter, warnings, global symbols and the
//! current source position used for diagnostics.

use crate::compiler::ast::{FuncArg, FuncKind, StateVar, Stmt};
use crate::{CompileConfig, CompileError};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Non-fatal diagnostic collected during compilation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Warning {
    pub func: String,
    pub line: usize,
    pub message: String,
}

impl fmt::Display for Warning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (function '{}', line {})", self.message, self.func, self.line)
    }
}

/// Call signature of a function or command, used to validate call sites.
#[derive(Debug, Clone)]
pub struct FuncSig {
    pub kind: FuncKind,
    pub args: Vec<FuncArg>,
}

#[derive(Debug)]
pub struct CompilerContext {
    pub config: CompileConfig,
    label_counter: u32,
    warnings: Vec<Warning>,
    func_name: String,
    line: usize,
    stmt: Option<Stmt>,
    /// Memory-resident state variables, by name.
    pub state: HashMap<String, StateVar>,
    pub functions: HashMap<String, FuncSig>,
}

impl CompilerContext {
    pub fn new(config: CompileConfig) -> Self {
        Self {
            config,
            label_counter: 0,
            warnings: Vec::new(),
            func_name: String::new(),
            line: 0,
            stmt: None,
            state: HashMap::new(),
            functions: HashMap::new(),
        }
    }

    /// Fresh compiler-generated label, unique within one compilation.
    pub fn next_label(&mut self) -> String {
        self.label_counter += 1;
        format!("LABEL_{:04}", self.label_counter)
    }

    pub fn enter_function(&mut self, name: &str, line: usize) {
        self.func_name = name.to_string();
        self.line = line;
        self.stmt = None;
    }

    pub fn func_name(&self) -> &str {
        &self.func_name
    }

    pub fn set_stmt(&mut self, stmt: &Stmt) {
        self.line = stmt.line;
        self.stmt = Some(stmt.header());
    }

    pub fn line(&self) -> usize {
        self.line
    }

    pub fn warn(&mut self, message: impl Into<String>) {
        let warning = Warning { func: self.func_name.clone(), line: self.line, message: message.into() };
        tracing::warn!(func = %warning.func, line = warning.line, "{}", warning.message);
        self.warnings.push(warning);
    }

    pub fn warnings(&self) -> &[Warning] {
        &self.warnings
    }

    pub fn take_warnings(&mut self) -> Vec<Warning> {
        std::mem::take(&mut self.warnings)
    }

    /// Fatal semantic error at the current position.
    pub fn error(&self, message: impl Into<String>) -> CompileError {
        let ast = self
            .stmt
            .as_ref()
            .and_then(|s| serde_json::to_string(s).ok())
            .unwrap_or_default();
        CompileError::Semantic {
            func: self.func_name.clone(),
            line: self.line,
            message: message.into(),
            ast,
        }
    }

    pub fn is_state_var(&self, name: &str) -> bool {
        self.state.contains_key(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::ast::StmtKind;

    #[test]
    fn test_labels_are_unique_and_padded() {
        let mut ctx = CompilerContext::new(CompileConfig::default());
        assert_eq!(ctx.next_label(), "LABEL_0001");
        assert_eq!(ctx.next_label(), "LABEL_0002");
    }

    #[test]
    fn test_error_carries_position_and_ast() {
        let mut ctx = CompilerContext::new(CompileConfig::default());
        ctx.enter_function("main", 1);
        ctx.set_stmt(&Stmt::new(StmtKind::Goto("nowhere".into()), 7));
        match ctx.error("bad goto") {
            CompileError::Semantic { func, line, message, ast } => {
                assert_eq!(func, "main");
                assert_eq!(line, 7);
                assert_eq!(message, "bad goto");
                assert!(ast.contains("nowhere"));
            }
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[test]
    fn test_warnings_accumulate() {
        let mut ctx = CompilerContext::new(CompileConfig::default());
        ctx.enter_function("f", 3);
        ctx.warn("first");
        ctx.warn("second");
        assert_eq!(ctx.warnings().len(), 2);
        assert_eq!(ctx.take_warnings()[1].message, "second");
        assert!(ctx.warnings().is_empty());
    }
}
