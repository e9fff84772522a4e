//! Text preprocessor run before lexing.
//!
//! Supports `#define`, `#undef`, `#ifdef`, `#ifndef`, `#else`, `#endif` and
//! `#include "path"`. Directive lines and disabled lines become empty lines
//! so line numbers of the remaining code do not move.

use std::collections::{BTreeMap, HashMap};
use thiserror::Error;

pub const MAX_INCLUDE_DEPTH: usize = 32;
const MAX_EXPANSION_DEPTH: usize = 16;

#[derive(Debug, Error)]
pub enum PreprocessError {
    #[error("unknown directive '#{name}' at line {line}")]
    UnknownDirective { name: String, line: usize },
    #[error("malformed #{directive} at line {line}")]
    Malformed { directive: String, line: usize },
    #[error("nested #ifdef/#ifndef at line {line} is not supported")]
    NestedConditional { line: usize },
    #[error("#{directive} without matching #ifdef at line {line}")]
    Unmatched { directive: String, line: usize },
    #[error("missing #endif for the conditional opened at line {line}")]
    Unterminated { line: usize },
    #[error("cannot include '{path}': {reason}")]
    Include { path: String, reason: String },
    #[error("includes nested deeper than {MAX_INCLUDE_DEPTH} levels at '{path}'")]
    IncludeDepth { path: String },
}

impl PreprocessError {
    pub fn line(&self) -> Option<usize> {
        match self {
            PreprocessError::UnknownDirective { line, .. }
            | PreprocessError::Malformed { line, .. }
            | PreprocessError::NestedConditional { line }
            | PreprocessError::Unmatched { line, .. }
            | PreprocessError::Unterminated { line } => Some(*line),
            PreprocessError::Include { .. } | PreprocessError::IncludeDepth { .. } => None,
        }
    }
}

/// Resolves an include path to its text.
pub type Loader<'a> = dyn Fn(&str) -> Result<String, String> + 'a;

struct Conditional {
    line: usize,
    active: bool,
    seen_else: bool,
}

struct Preprocessor<'a> {
    defines: HashMap<String, String>,
    loader: &'a Loader<'a>,
}

fn is_ident_start(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_'
}

fn is_ident_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

impl Preprocessor<'_> {
    /// Replace whole-word occurrences of defined names outside string literals.
    fn substitute(&self, text: &str, depth: usize) -> String {
        let mut out = String::with_capacity(text.len());
        let mut chars = text.char_indices().peekable();
        let mut in_string = false;
        while let Some((start, c)) = chars.next() {
            if c == '"' {
                in_string = !in_string;
                out.push(c);
                continue;
            }
            if in_string || !is_ident_start(c) {
                out.push(c);
                // Digits glue onto identifiers such as `1e5`; keep them whole.
                if c.is_ascii_digit() {
                    while let Some((_, d)) = chars.peek().copied().filter(|(_, d)| is_ident_char(*d)) {
                        out.push(d);
                        chars.next();
                    }
                }
                continue;
            }
            let mut end = start + c.len_utf8();
            while let Some((i, d)) = chars.peek().copied() {
                if !is_ident_char(d) {
                    break;
                }
                end = i + d.len_utf8();
                chars.next();
            }
            let word = &text[start..end];
            match self.defines.get(word) {
                Some(value) if depth < MAX_EXPANSION_DEPTH => out.push_str(&self.substitute(value, depth + 1)),
                Some(value) => out.push_str(value),
                None => out.push_str(word),
            }
        }
        out
    }

    fn run(&mut self, source: &str, depth: usize) -> Result<String, PreprocessError> {
        let mut out: Vec<String> = Vec::new();
        let mut cond: Option<Conditional> = None;

        for (idx, raw) in source.lines().enumerate() {
            let line = idx + 1;
            let active = cond.as_ref().is_none_or(|c| c.active);
            let trimmed = raw.trim_start();
            let Some(directive) = trimmed.strip_prefix('#') else {
                out.push(if active { self.substitute(raw, 0) } else { String::new() });
                continue;
            };

            let directive = directive.trim_start();
            let (name, rest) = directive.split_once(char::is_whitespace).unwrap_or((directive, ""));
            let rest = rest.trim();
            let malformed = || PreprocessError::Malformed { directive: name.to_string(), line };

            match name {
                "ifdef" | "ifndef" => {
                    if let Some(open) = &cond {
                        tracing::debug!(outer = open.line, line, "nested conditional");
                        return Err(PreprocessError::NestedConditional { line });
                    }
                    if rest.is_empty() {
                        return Err(malformed());
                    }
                    let defined = self.defines.contains_key(rest);
                    cond = Some(Conditional { line, active: defined == (name == "ifdef"), seen_else: false });
                }
                "else" => {
                    let Some(c) = cond.as_mut() else {
                        return Err(PreprocessError::Unmatched { directive: name.into(), line });
                    };
                    if c.seen_else {
                        return Err(malformed());
                    }
                    c.seen_else = true;
                    c.active = !c.active;
                }
                "endif" => {
                    if cond.take().is_none() {
                        return Err(PreprocessError::Unmatched { directive: name.into(), line });
                    }
                }
                _ if !active => {}
                "define" => {
                    let (key, value) = rest.split_once(char::is_whitespace).unwrap_or((rest, ""));
                    if key.is_empty() || !key.chars().next().is_some_and(is_ident_start) {
                        return Err(malformed());
                    }
                    self.defines.insert(key.to_string(), value.trim().to_string());
                }
                "undef" => {
                    if rest.is_empty() {
                        return Err(malformed());
                    }
                    self.defines.remove(rest);
                }
                "include" => {
                    let path = rest
                        .strip_prefix('"')
                        .and_then(|p| p.strip_suffix('"'))
                        .ok_or_else(malformed)?;
                    if depth >= MAX_INCLUDE_DEPTH {
                        return Err(PreprocessError::IncludeDepth { path: path.to_string() });
                    }
                    let text = (self.loader)(path)
                        .map_err(|reason| PreprocessError::Include { path: path.to_string(), reason })?;
                    tracing::debug!(path, depth, "including file");
                    out.push(self.run(&text, depth + 1)?);
                    continue;
                }
                other => {
                    return Err(PreprocessError::UnknownDirective { name: other.to_string(), line });
                }
            }
            out.push(String::new());
        }

        if let Some(open) = cond {
            return Err(PreprocessError::Unterminated { line: open.line });
        }
        Ok(out.join("\n"))
    }
}

/// Expand `source` with the initial `defines`, resolving includes via `loader`.
pub fn preprocess(
    source: &str,
    defines: &BTreeMap<String, String>,
    loader: &Loader<'_>,
) -> Result<String, PreprocessError> {
    let mut pp = Preprocessor {
        defines: defines.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
        loader,
    };
    pp.run(source, 0)
}

/// Loader for sources that may not include other files.
pub fn no_includes(path: &str) -> Result<String, String> {
    Err(format!("includes are not available here (requested '{}')", path))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(source: &str) -> Result<String, PreprocessError> {
        preprocess(source, &BTreeMap::new(), &no_includes)
    }

    #[test]
    fn test_define_whole_word() {
        let out = run("#define SIZE 16\nu32 x = SIZE + SIZE_2;\nasm(\"SIZE\");").unwrap();
        assert_eq!(out, "\nu32 x = 16 + SIZE_2;\nasm(\"SIZE\");");
    }

    #[test]
    fn test_chained_defines_and_undef() {
        let out = run("#define A B\n#define B 5\nA\n#undef B\nA").unwrap();
        assert_eq!(out.lines().collect::<Vec<_>>(), vec!["", "", "5", "", "B"]);
    }

    #[test]
    fn test_conditionals_keep_line_numbers() {
        let mut defines = BTreeMap::new();
        defines.insert("FAST".to_string(), String::new());
        let src = "#ifdef FAST\nfast();\n#else\nslow();\n#endif\ndone();";
        let out = preprocess(src, &defines, &no_includes).unwrap();
        assert_eq!(out.lines().collect::<Vec<_>>(), vec!["", "fast();", "", "", "", "done();"]);
        let out = run(src).unwrap();
        assert_eq!(out.lines().nth(3), Some("slow();"));
    }

    #[test]
    fn test_conditional_errors() {
        assert!(matches!(
            run("#ifdef A\n#ifdef B\n#endif\n#endif"),
            Err(PreprocessError::NestedConditional { line: 2 })
        ));
        assert!(matches!(run("#endif"), Err(PreprocessError::Unmatched { line: 1, .. })));
        assert!(matches!(run("#ifndef A\nx"), Err(PreprocessError::Unterminated { line: 1 })));
        assert!(matches!(run("#pragma once"), Err(PreprocessError::UnknownDirective { .. })));
    }

    #[test]
    fn test_includes() {
        let loader = |path: &str| match path {
            "consts.h" => Ok("#define N 4".to_string()),
            "self.h" => Ok("#include \"self.h\"".to_string()),
            _ => Err("not found".to_string()),
        };
        let out = preprocess("#include \"consts.h\"\nN", &BTreeMap::new(), &loader).unwrap();
        assert_eq!(out, "\n4");
        assert!(matches!(
            preprocess("#include \"self.h\"", &BTreeMap::new(), &loader),
            Err(PreprocessError::IncludeDepth { .. })
        ));
        assert!(matches!(run("#include \"x.h\""), Err(PreprocessError::Include { .. })));
    }
}
