//! Error and warning diagnostics with source snippets, colors and suggestions.

use crate::compiler::lexer::LexError;
use crate::compiler::lower::{builtin_names, is_builtin};
use crate::compiler::parser::ParseError;
use crate::{CompileError, Warning};

/// Error code of syntax errors (lexer, parser, preprocessor).
pub const E_SYNTAX: &str = "E0001";
/// Error code of semantic errors.
pub const E_SEMANTIC: &str = "E0100";
/// Error code of internal compiler errors.
pub const E_INTERNAL: &str = "E0900";
/// Code of every warning.
pub const W_GENERIC: &str = "W0001";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Error,
    Warning,
}

/// A rendered diagnostic with source context
#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub severity: Severity,
    pub code: &'static str,
    pub message: String,
    pub file: String,
    pub line: Option<usize>,
    pub col: Option<usize>,
    pub source_line: Option<String>,
    pub underline: Option<String>,
    pub suggestions: Vec<String>,
}

impl Diagnostic {
    fn new(severity: Severity, code: &'static str, message: String, file: &str) -> Self {
        Self {
            severity,
            code,
            message,
            file: file.to_string(),
            line: None,
            col: None,
            source_line: None,
            underline: None,
            suggestions: Vec::new(),
        }
    }

    /// Attach the source line, underlining `len` characters from `col` or the
    /// trimmed line when the column is unknown.
    fn at(mut self, source: &str, line: usize, col: Option<usize>, len: usize) -> Self {
        self.line = Some(line);
        self.col = col;
        if let Some(text) = source.lines().nth(line.saturating_sub(1)) {
            let (start, width) = match col {
                Some(c) => (c, len),
                None => {
                    let indent = text.len() - text.trim_start().len();
                    (indent + 1, text.trim().len())
                }
            };
            self.underline = Some(format!("{}{}", " ".repeat(start.saturating_sub(1)), "^".repeat(width.max(1))));
            self.source_line = Some(text.to_string());
        }
        self
    }

    fn label(&self) -> &'static str {
        match self.severity {
            Severity::Error => "error",
            Severity::Warning => "warning",
        }
    }

    fn location(&self) -> Option<String> {
        match (self.line, self.col) {
            (Some(line), Some(col)) => Some(format!("{}:{}:{}", self.file, line, col)),
            (Some(line), None) => Some(format!("{}:{}", self.file, line)),
            _ => None,
        }
    }

    /// Render with ANSI colors for terminal
    pub fn render_ansi(&self) -> String {
        let label = match self.severity {
            Severity::Error => red(self.label()),
            Severity::Warning => yellow(self.label()),
        };
        let mut out = format!("{}[{}]: {}\n", label, bold(self.code), bold(&self.message));
        if let Some(loc) = self.location() {
            out.push_str(&format!("  {} {}\n", cyan("-->"), loc));
        }
        if let (Some(n), Some(text), Some(underline)) = (self.line, &self.source_line, &self.underline) {
            out.push_str(&format!("   {}\n", cyan("|")));
            out.push_str(&format!("{:>3} {} {}\n", cyan(&n.to_string()), cyan("|"), text));
            out.push_str(&format!("   {} {}\n", cyan("|"), red(underline)));
        }
        for suggestion in &self.suggestions {
            out.push_str(&format!("   {} {}: {}\n", cyan("="), cyan("help"), suggestion));
        }
        out
    }

    /// Render without colors (for tests and redirected output)
    pub fn render_plain(&self) -> String {
        let mut out = format!("{}[{}]: {}\n", self.label(), self.code, self.message);
        if let Some(loc) = self.location() {
            out.push_str(&format!("  --> {}\n", loc));
        }
        if let (Some(n), Some(text), Some(underline)) = (self.line, &self.source_line, &self.underline) {
            out.push_str("   |\n");
            out.push_str(&format!("{:>3} | {}\n", n, text));
            out.push_str(&format!("   | {}\n", underline));
        }
        for suggestion in &self.suggestions {
            out.push_str(&format!("   = help: {}\n", suggestion));
        }
        out
    }
}

fn red(s: &str) -> String {
    format!("\x1b[31m{}\x1b[0m", s)
}

fn yellow(s: &str) -> String {
    format!("\x1b[33m{}\x1b[0m", s)
}

fn cyan(s: &str) -> String {
    format!("\x1b[36m{}\x1b[0m", s)
}

fn bold(s: &str) -> String {
    format!("\x1b[1m{}\x1b[0m", s)
}

/// Levenshtein distance, single-row formulation.
fn edit_distance(a: &str, b: &str) -> usize {
    let b: Vec<char> = b.chars().collect();
    let mut row: Vec<usize> = (0..=b.len()).collect();
    for (i, ca) in a.chars().enumerate() {
        let mut diag = row[0];
        row[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            let above = row[j + 1];
            row[j + 1] = (above + 1).min(row[j] + 1).min(diag + usize::from(ca != *cb));
            diag = above;
        }
    }
    row[b.len()]
}

fn suggest_similar(name: &str, candidates: &[&str]) -> Vec<String> {
    let limit = (name.len() / 3).max(1);
    let mut found: Vec<(usize, &str)> = candidates
        .iter()
        .map(|c| (edit_distance(name, c), *c))
        .filter(|(d, _)| *d > 0 && *d <= limit)
        .collect();
    found.sort();
    found.into_iter().take(3).map(|(_, c)| c.to_string()).collect()
}

const TYPE_NAMES: &[&str] = &["u8", "s8", "u16", "s16", "u32", "s32", "vec16", "vec32"];

/// Name inside the first pair of single quotes of a message.
fn quoted_name(message: &str) -> Option<&str> {
    let start = message.find('\'')? + 1;
    let len = message[start..].find('\'')?;
    Some(&message[start..start + len])
}

fn lex_diagnostic(error: &LexError, source: &str, file: &str) -> Diagnostic {
    let diag = Diagnostic::new(Severity::Error, E_SYNTAX, error.to_string(), file);
    let col = match error {
        LexError::UnexpectedChar { col, .. }
        | LexError::UnterminatedString { col, .. }
        | LexError::InvalidNumber { col, .. }
        | LexError::InvalidSwizzle { col, .. } => Some(*col),
        LexError::UnterminatedComment { .. } => None,
    };
    diag.at(source, error.line(), col, 1)
}

fn parse_diagnostic(error: &ParseError, source: &str, file: &str) -> Diagnostic {
    let mut diag = Diagnostic::new(Severity::Error, E_SYNTAX, error.to_string(), file);
    match error {
        ParseError::Unexpected { found, line, col, .. } => {
            diag = diag.at(source, *line, Some(*col), found.chars().count());
            diag.suggestions = suggest_similar(found, TYPE_NAMES)
                .into_iter()
                .map(|s| format!("did you mean the type '{}'?", s))
                .collect();
        }
        ParseError::UnknownAnnotation { line, .. } => {
            diag = diag.at(source, *line, None, 0);
            diag.suggestions.push("known annotations: @Barrier, @Align, @NoReturn, @Unlikely".into());
        }
        ParseError::InvalidRegister { line, .. } => diag = diag.at(source, *line, None, 0),
        ParseError::UnexpectedEof => {}
    }
    diag
}

/// Convert a `CompileError` into a diagnostic pointing into `source`.
pub fn format_compile_error(error: &CompileError, source: &str, file: &str) -> Diagnostic {
    match error {
        CompileError::Lex(e) => lex_diagnostic(e, source, file),
        CompileError::Parse(e) => parse_diagnostic(e, source, file),
        CompileError::Preprocess(e) => {
            let diag = Diagnostic::new(Severity::Error, E_SYNTAX, e.to_string(), file);
            match e.line() {
                Some(line) => diag.at(source, line, None, 0),
                None => diag,
            }
        }
        CompileError::Semantic { func, line, message, .. } => {
            let mut diag = Diagnostic::new(Severity::Error, E_SEMANTIC, message.clone(), file).at(source, *line, None, 0);
            if message.contains("not known") {
                if let Some(name) = quoted_name(message).filter(|n| !is_builtin(n)) {
                    let names: Vec<&str> = builtin_names().collect();
                    diag.suggestions = suggest_similar(name, &names)
                        .into_iter()
                        .map(|s| format!("did you mean the builtin '{}'?", s))
                        .collect();
                }
            }
            diag.suggestions.push(format!("in function '{}'", func));
            diag
        }
        CompileError::Internal { pass, message } => {
            let mut diag = Diagnostic::new(
                Severity::Error,
                E_INTERNAL,
                format!("internal compiler error in {}: {}", pass, message),
                file,
            );
            diag.suggestions.push("compile with optimizations disabled to work around it".into());
            diag
        }
    }
}

pub fn format_warning(warning: &Warning, source: &str, file: &str) -> Diagnostic {
    let mut diag = Diagnostic::new(Severity::Warning, W_GENERIC, warning.message.clone(), file);
    if warning.line > 0 {
        diag = diag.at(source, warning.line, None, 0);
    }
    diag
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{compile, CompileConfig};

    #[test]
    fn test_edit_distance() {
        assert_eq!(edit_distance("load", "load"), 0);
        assert_eq!(edit_distance("lod", "load"), 1);
        assert_eq!(edit_distance("", "abc"), 3);
        assert_eq!(edit_distance("invert", "invret"), 2);
    }

    #[test]
    fn test_semantic_error_rendering() {
        let src = "function f() {\n  u32<$t0> a;\n  a = b;\n}";
        let err = compile(src, &CompileConfig::default()).unwrap_err();
        let text = format_compile_error(&err, src, "demo.rspl").render_plain();
        assert!(text.starts_with("error[E0100]: "));
        assert!(text.contains("  --> demo.rspl:3\n"));
        assert!(text.contains("  3 |   a = b;\n"));
        assert!(text.contains("   |   ^^^^^^\n"));
    }

    #[test]
    fn test_unknown_function_suggests_builtin() {
        let src = "function f() {\n  u32<$t0> a;\n  a = lod(a);\n}";
        let err = compile(src, &CompileConfig::default()).unwrap_err();
        let diag = format_compile_error(&err, src, "demo.rspl");
        assert!(diag.suggestions.iter().any(|s| s.contains("'load'")));
    }

    #[test]
    fn test_syntax_error_code_and_colors() {
        let src = "function f( {";
        let err = compile(src, &CompileConfig::default()).unwrap_err();
        let diag = format_compile_error(&err, src, "demo.rspl");
        assert_eq!(diag.code, E_SYNTAX);
        assert!(diag.render_ansi().contains("\x1b[31merror\x1b[0m"));
    }

    #[test]
    fn test_warning_rendering() {
        let warning = Warning { func: "f".into(), line: 1, message: "register $v27 is used as scratch".into() };
        let text = format_warning(&warning, "  vec16<$v27> t;", "demo.rspl").render_plain();
        assert!(text.starts_with("warning[W0001]: register $v27"));
        assert!(text.contains("   |   ^^^^^^^^^^^^^^\n"));
    }
}
