//! Lexer for preprocessed RSPL source code.
//!
//! Register names, data-type keywords and swizzle patterns are lexed into
//! their own token classes so the parser never has to disambiguate them.

use crate::compiler::ast::BinOp;
use crate::compiler::tokens::{Span, Token, TokenKind};
use crate::compiler::types::{DataType, Swizzle};
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LexError {
    #[error("unexpected character '{ch}' at line {line}, col {col}")]
    UnexpectedChar { ch: char, line: usize, col: usize },
    #[error("unterminated string at line {line}, col {col}")]
    UnterminatedString { line: usize, col: usize },
    #[error("unterminated block comment starting at line {line}")]
    UnterminatedComment { line: usize },
    #[error("invalid number at line {line}, col {col}")]
    InvalidNumber { line: usize, col: usize },
    #[error("invalid swizzle '.{text}' at line {line}, col {col}")]
    InvalidSwizzle { text: String, line: usize, col: usize },
}

impl LexError {
    pub fn line(&self) -> usize {
        match self {
            LexError::UnexpectedChar { line, .. }
            | LexError::UnterminatedString { line, .. }
            | LexError::UnterminatedComment { line }
            | LexError::InvalidNumber { line, .. }
            | LexError::InvalidSwizzle { line, .. } => *line,
        }
    }
}

pub struct Lexer {
    source: Vec<char>,
    pos: usize,
    line: usize,
    col: usize,
    byte_offset: usize,
}

impl Lexer {
    pub fn new(source: &str) -> Self {
        Self { source: source.chars().collect(), pos: 0, line: 1, col: 1, byte_offset: 0 }
    }

    fn current(&self) -> Option<char> { self.source.get(self.pos).copied() }
    fn peek(&self) -> Option<char> { self.source.get(self.pos + 1).copied() }

    fn advance(&mut self) -> Option<char> {
        let ch = self.source.get(self.pos).copied()?;
        self.pos += 1;
        self.byte_offset += ch.len_utf8();
        if ch == '\n' { self.line += 1; self.col = 1; }
        else { self.col += 1; }
        Some(ch)
    }

    fn span_from(&self, so: usize, sl: usize, sc: usize) -> Span {
        Span::new(so, self.byte_offset, sl, sc)
    }

    fn skip_block_comment(&mut self) -> Result<(), LexError> {
        let start_line = self.line;
        self.advance();
        self.advance();
        loop {
            match self.current() {
                None => return Err(LexError::UnterminatedComment { line: start_line }),
                Some('*') if self.peek() == Some('/') => {
                    self.advance();
                    self.advance();
                    return Ok(());
                }
                Some(_) => { self.advance(); }
            }
        }
    }

    fn read_string(&mut self) -> Result<Token, LexError> {
        let (so, sl, sc) = (self.byte_offset, self.line, self.col);
        self.advance(); // opening quote
        let mut s = String::new();
        loop {
            match self.current() {
                None | Some('\n') => return Err(LexError::UnterminatedString { line: sl, col: sc }),
                Some('\\') => {
                    self.advance();
                    match self.current() {
                        Some('n') => { s.push('\n'); self.advance(); }
                        Some('t') => { s.push('\t'); self.advance(); }
                        Some('\\') => { s.push('\\'); self.advance(); }
                        Some('"') => { s.push('"'); self.advance(); }
                        Some(c) => { s.push('\\'); s.push(c); self.advance(); }
                        None => return Err(LexError::UnterminatedString { line: sl, col: sc }),
                    }
                }
                Some('"') => { self.advance(); break; }
                Some(c) => { s.push(c); self.advance(); }
            }
        }
        Ok(Token::new(TokenKind::StringLit(s), self.span_from(so, sl, sc)))
    }

    /// Collect digits valid for `radix`, skipping `'` group separators.
    fn read_digits(&mut self, radix: u32) -> String {
        let mut digits = String::new();
        while let Some(ch) = self.current() {
            if ch.is_digit(radix) { digits.push(ch); self.advance(); }
            else if ch == '\'' && !digits.is_empty() { self.advance(); }
            else { break; }
        }
        digits
    }

    fn read_number(&mut self) -> Result<Token, LexError> {
        let (so, sl, sc) = (self.byte_offset, self.line, self.col);
        let invalid = || LexError::InvalidNumber { line: sl, col: sc };

        let radix = match (self.current(), self.peek()) {
            (Some('0'), Some('x' | 'X')) => 16,
            (Some('0'), Some('b' | 'B')) => 2,
            _ => 10,
        };
        let kind = if radix != 10 {
            self.advance();
            self.advance();
            let digits = self.read_digits(radix);
            if digits.is_empty() { return Err(invalid()); }
            let value = u64::from_str_radix(&digits, radix).map_err(|_| invalid())?;
            TokenKind::IntLit(value as i64)
        } else {
            let mut text = self.read_digits(10);
            if self.current() == Some('.') && matches!(self.peek(), Some(d) if d.is_ascii_digit()) {
                self.advance();
                text.push('.');
                text.push_str(&self.read_digits(10));
                TokenKind::FloatLit(text.parse::<f64>().map_err(|_| invalid())?)
            } else {
                TokenKind::IntLit(text.parse::<i64>().map_err(|_| invalid())?)
            }
        };
        if matches!(self.current(), Some(c) if c.is_alphanumeric() || c == '_') {
            return Err(invalid());
        }
        Ok(Token::new(kind, self.span_from(so, sl, sc)))
    }

    fn read_word(&mut self) -> String {
        let mut id = String::new();
        while let Some(ch) = self.current() {
            if ch.is_alphanumeric() || ch == '_' { id.push(ch); self.advance(); } else { break; }
        }
        id
    }

    fn read_ident(&mut self) -> Token {
        let (so, sl, sc) = (self.byte_offset, self.line, self.col);
        let id = self.read_word();
        let span = self.span_from(so, sl, sc);
        let kind = match id.as_str() {
            "include" => TokenKind::Include, "state" => TokenKind::State,
            "extern" => TokenKind::Extern, "alignas" => TokenKind::Alignas,
            "function" => TokenKind::Function, "command" => TokenKind::Command,
            "macro" => TokenKind::Macro, "if" => TokenKind::If, "else" => TokenKind::Else,
            "while" => TokenKind::While, "loop" => TokenKind::Loop, "break" => TokenKind::Break,
            "continue" => TokenKind::Continue, "exit" => TokenKind::Exit,
            "goto" => TokenKind::Goto, "undef" => TokenKind::Undef,
            "const" => TokenKind::Const, "asm" => TokenKind::Asm,
            _ => match DataType::from_str(&id) {
                Ok(ty) => TokenKind::TypeName(ty),
                Err(_) => TokenKind::Ident(id),
            },
        };
        Token::new(kind, span)
    }

    fn read_register(&mut self) -> Result<Token, LexError> {
        let (so, sl, sc) = (self.byte_offset, self.line, self.col);
        self.advance(); // '$'
        let name = self.read_word();
        if name.is_empty() {
            return Err(LexError::UnexpectedChar { ch: '$', line: sl, col: sc });
        }
        Ok(Token::new(TokenKind::Register(format!("${}", name)), self.span_from(so, sl, sc)))
    }

    fn read_swizzle(&mut self) -> Result<Token, LexError> {
        let (so, sl, sc) = (self.byte_offset, self.line, self.col);
        self.advance(); // '.'
        let text = self.read_word();
        match Swizzle::parse(&text) {
            Some(sw) => Ok(Token::new(TokenKind::Swizzle(sw), self.span_from(so, sl, sc))),
            None => Err(LexError::InvalidSwizzle { text, line: sl, col: sc }),
        }
    }

    /// Lex an operator; `options` maps follow-up characters to longer tokens.
    fn operator(&mut self, options: &[(char, TokenKind)], single: TokenKind) -> Token {
        let (so, sl, sc) = (self.byte_offset, self.line, self.col);
        self.advance();
        for (next, kind) in options {
            if self.current() == Some(*next) {
                self.advance();
                return Token::new(kind.clone(), self.span_from(so, sl, sc));
            }
        }
        Token::new(single, self.span_from(so, sl, sc))
    }

    /// `<`, `<<`, `<=`, `<<=` and their `>` counterparts.
    fn shift_or_compare(&mut self, ch: char) -> Token {
        let (so, sl, sc) = (self.byte_offset, self.line, self.col);
        let (shift, op, cmp, cmp_eq) = if ch == '<' {
            (TokenKind::Shl, BinOp::Shl, TokenKind::Lt, TokenKind::LtEq)
        } else {
            (TokenKind::Shr, BinOp::Shr, TokenKind::Gt, TokenKind::GtEq)
        };
        self.advance();
        let kind = if self.current() == Some(ch) {
            self.advance();
            if self.current() == Some('=') { self.advance(); TokenKind::CompoundAssign(op) } else { shift }
        } else if self.current() == Some('=') {
            self.advance();
            cmp_eq
        } else {
            cmp
        };
        Token::new(kind, self.span_from(so, sl, sc))
    }

    fn single(&mut self, kind: TokenKind) -> Token {
        let (so, sl, sc) = (self.byte_offset, self.line, self.col);
        self.advance();
        Token::new(kind, self.span_from(so, sl, sc))
    }

    pub fn tokenize(&mut self) -> Result<Vec<Token>, LexError> {
        use TokenKind as T;
        let mut tokens = Vec::new();
        while let Some(ch) = self.current() {
            match ch {
                ' ' | '\t' | '\r' | '\n' => { self.advance(); }
                '/' if self.peek() == Some('/') => {
                    while matches!(self.current(), Some(c) if c != '\n') { self.advance(); }
                }
                '/' if self.peek() == Some('*') => self.skip_block_comment()?,
                '"' => tokens.push(self.read_string()?),
                '0'..='9' => tokens.push(self.read_number()?),
                'a'..='z' | 'A'..='Z' | '_' => tokens.push(self.read_ident()),
                '$' => tokens.push(self.read_register()?),
                '.' => tokens.push(self.read_swizzle()?),
                '+' => tokens.push(self.operator(
                    &[('=', T::CompoundAssign(BinOp::Add)), ('*', T::MulAdd)], T::Plus)),
                '-' => tokens.push(self.operator(&[('=', T::CompoundAssign(BinOp::Sub))], T::Minus)),
                '*' => tokens.push(self.operator(&[('=', T::CompoundAssign(BinOp::Mul))], T::Star)),
                '/' => tokens.push(self.operator(&[('=', T::CompoundAssign(BinOp::Div))], T::Slash)),
                '%' => tokens.push(self.operator(&[('=', T::CompoundAssign(BinOp::Mod))], T::Percent)),
                '&' => tokens.push(self.operator(&[('=', T::CompoundAssign(BinOp::And))], T::Amp)),
                '|' => tokens.push(self.operator(&[('=', T::CompoundAssign(BinOp::Or))], T::Pipe)),
                '^' => tokens.push(self.operator(&[('=', T::CompoundAssign(BinOp::Xor))], T::Caret)),
                '~' => tokens.push(self.operator(&[('|', T::Nor)], T::Tilde)),
                '!' => tokens.push(self.operator(&[('=', T::NotEq)], T::Bang)),
                '=' => tokens.push(self.operator(&[('=', T::EqEq)], T::Assign)),
                '<' | '>' => tokens.push(self.shift_or_compare(ch)),
                '?' => tokens.push(self.single(T::Question)),
                ':' => tokens.push(self.single(T::Colon)),
                ';' => tokens.push(self.single(T::Semicolon)),
                ',' => tokens.push(self.single(T::Comma)),
                '@' => tokens.push(self.single(T::At)),
                '(' => tokens.push(self.single(T::LParen)),
                ')' => tokens.push(self.single(T::RParen)),
                '[' => tokens.push(self.single(T::LBracket)),
                ']' => tokens.push(self.single(T::RBracket)),
                '{' => tokens.push(self.single(T::LBrace)),
                '}' => tokens.push(self.single(T::RBrace)),
                _ => return Err(LexError::UnexpectedChar { ch, line: self.line, col: self.col }),
            }
        }
        tokens.push(Token::new(TokenKind::Eof, Span::new(self.byte_offset, self.byte_offset, self.line, self.col)));
        Ok(tokens)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(src: &str) -> Vec<TokenKind> {
        Lexer::new(src).tokenize().unwrap().into_iter().map(|t| t.kind).collect()
    }

    #[test]
    fn test_lex_declaration() {
        let toks = kinds("vec32<$v04> pos;");
        assert_eq!(toks[0], TokenKind::TypeName(DataType::Vec32));
        assert_eq!(toks[1], TokenKind::Lt);
        assert_eq!(toks[2], TokenKind::Register("$v04".into()));
        assert_eq!(toks[3], TokenKind::Gt);
        assert!(matches!(&toks[4], TokenKind::Ident(s) if s == "pos"));
    }

    #[test]
    fn test_lex_numbers() {
        let toks = kinds("0x12'34 0b1010 1'000 1.25");
        assert_eq!(toks[0], TokenKind::IntLit(0x1234));
        assert_eq!(toks[1], TokenKind::IntLit(10));
        assert_eq!(toks[2], TokenKind::IntLit(1000));
        assert_eq!(toks[3], TokenKind::FloatLit(1.25));
    }

    #[test]
    fn test_lex_vector_operators() {
        let toks = kinds("a +* b ~| c <<= 2");
        assert_eq!(toks[1], TokenKind::MulAdd);
        assert_eq!(toks[3], TokenKind::Nor);
        assert_eq!(toks[5], TokenKind::CompoundAssign(BinOp::Shl));
    }

    #[test]
    fn test_lex_swizzle() {
        let toks = kinds("v.xxzzXXZZ w.Y u.W t.x");
        assert_eq!(toks[1], TokenKind::Swizzle(Swizzle::Quarter(0)));
        assert_eq!(toks[3], TokenKind::Swizzle(Swizzle::Lane(5)));
        assert_eq!(toks[5], TokenKind::Swizzle(Swizzle::Lane(7)));
        assert_eq!(toks[7], TokenKind::Swizzle(Swizzle::Lane(0)));
        assert!(matches!(Lexer::new("v.xyz").tokenize(), Err(LexError::InvalidSwizzle { .. })));
    }

    #[test]
    fn test_lex_comments_and_lines() {
        let toks = Lexer::new("// one\n/* two\n */ exit;").tokenize().unwrap();
        assert_eq!(toks[0].kind, TokenKind::Exit);
        assert_eq!(toks[0].span.line, 3);
    }
}
