use crate::compiler::ast::BinOp;
use crate::compiler::types::{DataType, Swizzle};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Source location in the preprocessed source text
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    /// Byte offset of the start in the source
    pub start: usize,
    /// Byte offset of the end (exclusive) in the source
    pub end: usize,
    /// 1-based line number
    pub line: usize,
    /// 1-based column number
    pub col: usize,
}

impl Span {
    pub fn new(start: usize, end: usize, line: usize, col: usize) -> Self {
        Self { start, end, line, col }
    }

    pub fn dummy() -> Self {
        Self { start: 0, end: 0, line: 0, col: 0 }
    }
}

/// Token types for RSPL
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TokenKind {
    // Literals
    IntLit(i64),
    FloatLit(f64),
    StringLit(String),

    Ident(String),
    /// `$t0`, `$v04`, `$8`
    Register(String),
    TypeName(DataType),
    /// `.x`, `.xxxxXXXX`, ...
    Swizzle(Swizzle),

    // Keywords
    Include,
    State,
    Extern,
    Alignas,
    Function,
    Command,
    Macro,
    If,
    Else,
    While,
    Loop,
    Break,
    Continue,
    Exit,
    Goto,
    Undef,
    Const,
    Asm,

    // Operators
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    Amp,
    Pipe,
    Caret,
    Tilde,
    Bang,
    Shl,      // <<
    Shr,      // >>
    MulAdd,   // +*
    Nor,      // ~|
    EqEq,     // ==
    NotEq,    // !=
    Lt,       // <
    LtEq,     // <=
    Gt,       // >
    GtEq,     // >=
    Assign,   // =
    CompoundAssign(BinOp), // +=, <<=, ...
    Question,
    Colon,
    Semicolon,
    Comma,
    At,

    // Delimiters
    LParen,
    RParen,
    LBracket,
    RBracket,
    LBrace,
    RBrace,

    Eof,
}

impl TokenKind {
    /// Binary arithmetic operator denoted by this token, if any.
    pub fn bin_op(&self) -> Option<BinOp> {
        Some(match self {
            TokenKind::Plus => BinOp::Add,
            TokenKind::Minus => BinOp::Sub,
            TokenKind::Star => BinOp::Mul,
            TokenKind::Slash => BinOp::Div,
            TokenKind::Percent => BinOp::Mod,
            TokenKind::Amp => BinOp::And,
            TokenKind::Pipe => BinOp::Or,
            TokenKind::Caret => BinOp::Xor,
            TokenKind::Nor => BinOp::Nor,
            TokenKind::Shl => BinOp::Shl,
            TokenKind::Shr => BinOp::Shr,
            TokenKind::MulAdd => BinOp::MulAdd,
            _ => return None,
        })
    }
}

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TokenKind::IntLit(n) => write!(f, "{}", n),
            TokenKind::FloatLit(n) => write!(f, "{}", n),
            TokenKind::StringLit(s) => write!(f, "\"{}\"", s),
            TokenKind::Ident(s) => write!(f, "{}", s),
            TokenKind::Register(s) => write!(f, "{}", s),
            TokenKind::TypeName(t) => write!(f, "{}", t),
            TokenKind::Swizzle(s) => write!(f, "{}", s),
            TokenKind::Include => write!(f, "include"),
            TokenKind::State => write!(f, "state"),
            TokenKind::Extern => write!(f, "extern"),
            TokenKind::Alignas => write!(f, "alignas"),
            TokenKind::Function => write!(f, "function"),
            TokenKind::Command => write!(f, "command"),
            TokenKind::Macro => write!(f, "macro"),
            TokenKind::If => write!(f, "if"),
            TokenKind::Else => write!(f, "else"),
            TokenKind::While => write!(f, "while"),
            TokenKind::Loop => write!(f, "loop"),
            TokenKind::Break => write!(f, "break"),
            TokenKind::Continue => write!(f, "continue"),
            TokenKind::Exit => write!(f, "exit"),
            TokenKind::Goto => write!(f, "goto"),
            TokenKind::Undef => write!(f, "undef"),
            TokenKind::Const => write!(f, "const"),
            TokenKind::Asm => write!(f, "asm"),
            TokenKind::Plus => write!(f, "+"),
            TokenKind::Minus => write!(f, "-"),
            TokenKind::Star => write!(f, "*"),
            TokenKind::Slash => write!(f, "/"),
            TokenKind::Percent => write!(f, "%"),
            TokenKind::Amp => write!(f, "&"),
            TokenKind::Pipe => write!(f, "|"),
            TokenKind::Caret => write!(f, "^"),
            TokenKind::Tilde => write!(f, "~"),
            TokenKind::Bang => write!(f, "!"),
            TokenKind::Shl => write!(f, "<<"),
            TokenKind::Shr => write!(f, ">>"),
            TokenKind::MulAdd => write!(f, "+*"),
            TokenKind::Nor => write!(f, "~|"),
            TokenKind::EqEq => write!(f, "=="),
            TokenKind::NotEq => write!(f, "!="),
            TokenKind::Lt => write!(f, "<"),
            TokenKind::LtEq => write!(f, "<="),
            TokenKind::Gt => write!(f, ">"),
            TokenKind::GtEq => write!(f, ">="),
            TokenKind::Assign => write!(f, "="),
            TokenKind::CompoundAssign(op) => write!(f, "{}=", op),
            TokenKind::Question => write!(f, "?"),
            TokenKind::Colon => write!(f, ":"),
            TokenKind::Semicolon => write!(f, ";"),
            TokenKind::Comma => write!(f, ","),
            TokenKind::At => write!(f, "@"),
            TokenKind::LParen => write!(f, "("),
            TokenKind::RParen => write!(f, ")"),
            TokenKind::LBracket => write!(f, "["),
            TokenKind::RBracket => write!(f, "]"),
            TokenKind::LBrace => write!(f, "{{"),
            TokenKind::RBrace => write!(f, "}}"),
            TokenKind::Eof => write!(f, "EOF"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Token {
    pub kind: TokenKind,
    pub span: Span,
}

impl Token {
    pub fn new(kind: TokenKind, span: Span) -> Self {
        Self { kind, span }
    }
}
