//! Recursive descent parser for RSPL.
//!
//! The grammar is LL(2): a statement starting with an identifier is a label,
//! a call or an assignment depending on the token that follows it.

use crate::compiler::ast::*;
use crate::compiler::tokens::{Token, TokenKind};
use crate::compiler::types::DataType;
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("unexpected token {found} at line {line}, col {col}; expected {expected}")]
    Unexpected { found: String, expected: String, line: usize, col: usize },
    #[error("unknown annotation '@{name}' at line {line}")]
    UnknownAnnotation { name: String, line: usize },
    #[error("invalid register '{name}' at line {line}")]
    InvalidRegister { name: String, line: usize },
    #[error("unexpected end of input")]
    UnexpectedEof,
}

impl ParseError {
    pub fn line(&self) -> Option<usize> {
        match self {
            ParseError::Unexpected { line, .. }
            | ParseError::UnknownAnnotation { line, .. }
            | ParseError::InvalidRegister { line, .. } => Some(*line),
            ParseError::UnexpectedEof => None,
        }
    }
}

pub struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    pub fn new(mut tokens: Vec<Token>) -> Self {
        if !matches!(tokens.last(), Some(Token { kind: TokenKind::Eof, .. })) {
            let span = tokens.last().map(|t| t.span).unwrap_or_else(crate::compiler::tokens::Span::dummy);
            tokens.push(Token::new(TokenKind::Eof, span));
        }
        Self { tokens, pos: 0 }
    }

    fn current(&self) -> &Token {
        &self.tokens[self.pos.min(self.tokens.len() - 1)]
    }

    fn peek_kind(&self) -> &TokenKind { &self.current().kind }

    fn peek_nth(&self, n: usize) -> &TokenKind {
        &self.tokens[(self.pos + n).min(self.tokens.len() - 1)].kind
    }

    fn line(&self) -> usize { self.current().span.line }

    fn advance(&mut self) -> Token {
        let tok = self.current().clone();
        if self.pos < self.tokens.len() { self.pos += 1; }
        tok
    }

    fn unexpected(&self, expected: &str) -> ParseError {
        let tok = self.current();
        if tok.kind == TokenKind::Eof {
            return ParseError::UnexpectedEof;
        }
        ParseError::Unexpected {
            found: format!("{}", tok.kind), expected: expected.into(),
            line: tok.span.line, col: tok.span.col,
        }
    }

    fn expect(&mut self, kind: &TokenKind) -> Result<Token, ParseError> {
        if std::mem::discriminant(self.peek_kind()) == std::mem::discriminant(kind) {
            Ok(self.advance())
        } else {
            Err(self.unexpected(&format!("{}", kind)))
        }
    }

    fn eat(&mut self, kind: &TokenKind) -> bool {
        if self.peek_kind() == kind { self.advance(); true } else { false }
    }

    fn at_end(&self) -> bool { matches!(self.peek_kind(), TokenKind::Eof) }

    fn expect_ident(&mut self) -> Result<String, ParseError> {
        match self.peek_kind().clone() {
            TokenKind::Ident(s) => { self.advance(); Ok(s) }
            _ => Err(self.unexpected("identifier")),
        }
    }

    fn expect_string(&mut self) -> Result<String, ParseError> {
        match self.peek_kind().clone() {
            TokenKind::StringLit(s) => { self.advance(); Ok(s) }
            _ => Err(self.unexpected("string literal")),
        }
    }

    fn expect_int(&mut self) -> Result<i64, ParseError> {
        match self.peek_kind().clone() {
            TokenKind::IntLit(v) => { self.advance(); Ok(v) }
            _ => Err(self.unexpected("integer")),
        }
    }

    fn expect_type(&mut self) -> Result<DataType, ParseError> {
        match self.peek_kind().clone() {
            TokenKind::TypeName(ty) => { self.advance(); Ok(ty) }
            _ => Err(self.unexpected("data type")),
        }
    }

    // ── Top level ──

    pub fn parse_program(&mut self) -> Result<Program, ParseError> {
        let mut program = Program::default();
        while matches!(self.peek_kind(), TokenKind::Include) {
            program.includes.push(self.parse_include()?);
        }
        if matches!(self.peek_kind(), TokenKind::State) {
            program.state = self.parse_state()?;
        }
        while !self.at_end() {
            if matches!(self.peek_kind(), TokenKind::Include) {
                break;
            }
            program.items.push(self.parse_item()?);
        }
        while matches!(self.peek_kind(), TokenKind::Include) {
            program.post_includes.push(self.parse_include()?);
        }
        if !self.at_end() {
            return Err(self.unexpected("end of file after trailing includes"));
        }
        Ok(program)
    }

    fn parse_include(&mut self) -> Result<String, ParseError> {
        self.expect(&TokenKind::Include)?;
        let path = self.expect_string()?;
        self.expect(&TokenKind::Semicolon)?;
        Ok(path)
    }

    fn parse_state(&mut self) -> Result<Vec<StateVar>, ParseError> {
        self.expect(&TokenKind::State)?;
        self.expect(&TokenKind::LBrace)?;
        let mut vars = Vec::new();
        while !self.eat(&TokenKind::RBrace) {
            vars.push(self.parse_state_var()?);
        }
        Ok(vars)
    }

    fn parse_state_var(&mut self) -> Result<StateVar, ParseError> {
        let line = self.line();
        let is_extern = self.eat(&TokenKind::Extern);
        let align = if self.eat(&TokenKind::Alignas) {
            self.expect(&TokenKind::LParen)?;
            let a = self.expect_int()?;
            self.expect(&TokenKind::RParen)?;
            Some(a as u32)
        } else {
            None
        };
        let ty = self.expect_type()?;
        let name = self.expect_ident()?;
        let mut dims = Vec::new();
        while self.eat(&TokenKind::LBracket) {
            dims.push(self.expect_int()? as u32);
            self.expect(&TokenKind::RBracket)?;
        }
        let mut init = Vec::new();
        if self.eat(&TokenKind::Assign) {
            self.expect(&TokenKind::LBrace)?;
            if !self.eat(&TokenKind::RBrace) {
                loop {
                    init.push(self.parse_number()?);
                    if self.eat(&TokenKind::RBrace) { break; }
                    self.expect(&TokenKind::Comma)?;
                }
            }
        }
        self.expect(&TokenKind::Semicolon)?;
        Ok(StateVar { name, ty, is_extern, align, dims, init, line })
    }

    fn parse_annotations(&mut self) -> Result<Vec<Annotation>, ParseError> {
        let mut annotations = Vec::new();
        while matches!(self.peek_kind(), TokenKind::At) {
            let line = self.line();
            self.advance();
            let name = self.expect_ident()?;
            let kind = AnnotationKind::from_str(&name)
                .map_err(|_| ParseError::UnknownAnnotation { name: name.clone(), line })?;
            let value = if self.eat(&TokenKind::LParen) {
                let v = match self.peek_kind().clone() {
                    TokenKind::IntLit(v) => { self.advance(); AnnotationValue::Int(v) }
                    TokenKind::StringLit(s) => { self.advance(); AnnotationValue::Str(s) }
                    _ => return Err(self.unexpected("annotation value")),
                };
                self.expect(&TokenKind::RParen)?;
                Some(v)
            } else {
                None
            };
            annotations.push(Annotation { kind, value });
        }
        Ok(annotations)
    }

    fn parse_item(&mut self) -> Result<FuncDef, ParseError> {
        let annotations = self.parse_annotations()?;
        let line = self.line();
        let kind = match self.peek_kind() {
            TokenKind::Function => { self.advance(); FuncKind::Function }
            TokenKind::Macro => { self.advance(); FuncKind::Macro }
            TokenKind::Command => {
                self.advance();
                self.expect(&TokenKind::Lt)?;
                let idx = self.expect_int()?;
                self.expect(&TokenKind::Gt)?;
                FuncKind::Command(idx as u32)
            }
            _ => return Err(self.unexpected("function, command or macro")),
        };
        let name = self.expect_ident()?;
        self.expect(&TokenKind::LParen)?;
        let mut args = Vec::new();
        if !self.eat(&TokenKind::RParen) {
            loop {
                let ty = self.expect_type()?;
                let reg = self.parse_reg_binding()?;
                let arg_name = self.expect_ident()?;
                args.push(FuncArg { name: arg_name, ty, reg });
                if self.eat(&TokenKind::RParen) { break; }
                self.expect(&TokenKind::Comma)?;
            }
        }
        let body = if self.eat(&TokenKind::Semicolon) { None } else { Some(self.parse_block()?) };
        Ok(FuncDef { kind, name, args, body, annotations, line })
    }

    /// Optional `<$reg>` binding after a type.
    fn parse_reg_binding(&mut self) -> Result<Option<RegRef>, ParseError> {
        if !matches!(self.peek_kind(), TokenKind::Lt) {
            return Ok(None);
        }
        self.advance();
        let line = self.line();
        let reg = match self.peek_kind().clone() {
            TokenKind::Register(name) => {
                self.advance();
                let digits = &name[1..];
                if digits.bytes().all(|b| b.is_ascii_digit()) {
                    let idx = digits.parse::<u32>()
                        .map_err(|_| ParseError::InvalidRegister { name: name.clone(), line })?;
                    RegRef::Index(idx)
                } else {
                    RegRef::Named(name)
                }
            }
            _ => return Err(self.unexpected("register")),
        };
        self.expect(&TokenKind::Gt)?;
        Ok(Some(reg))
    }

    // ── Statements ──

    fn parse_block(&mut self) -> Result<Block, ParseError> {
        self.expect(&TokenKind::LBrace)?;
        let mut stmts = Vec::new();
        while !self.eat(&TokenKind::RBrace) {
            if self.at_end() {
                return Err(ParseError::UnexpectedEof);
            }
            stmts.push(self.parse_stmt()?);
        }
        Ok(Block { stmts })
    }

    /// Body of `if`/`while`/`loop`: a block or a single statement.
    fn parse_body(&mut self) -> Result<Block, ParseError> {
        if matches!(self.peek_kind(), TokenKind::LBrace) {
            self.parse_block()
        } else {
            Ok(Block { stmts: vec![self.parse_stmt()?] })
        }
    }

    fn parse_stmt(&mut self) -> Result<Stmt, ParseError> {
        let annotations = self.parse_annotations()?;
        let line = self.line();
        let kind = match self.peek_kind().clone() {
            TokenKind::LBrace => StmtKind::Block(self.parse_block()?),
            TokenKind::If => self.parse_if()?,
            TokenKind::While => {
                self.advance();
                let cond = self.parse_paren_compare()?;
                let body = self.parse_body()?;
                StmtKind::While { cond, body }
            }
            TokenKind::Loop => {
                self.advance();
                let body = self.parse_body()?;
                let cond = if self.eat(&TokenKind::While) {
                    let c = self.parse_paren_compare()?;
                    self.expect(&TokenKind::Semicolon)?;
                    Some(c)
                } else {
                    None
                };
                StmtKind::Loop { body, cond }
            }
            TokenKind::Const | TokenKind::TypeName(_) => self.parse_decl()?,
            TokenKind::Goto => {
                self.advance();
                let target = self.expect_ident()?;
                self.expect(&TokenKind::Semicolon)?;
                StmtKind::Goto(target)
            }
            TokenKind::Break => self.keyword_stmt(StmtKind::Break)?,
            TokenKind::Continue => self.keyword_stmt(StmtKind::Continue)?,
            TokenKind::Exit => self.keyword_stmt(StmtKind::Exit)?,
            TokenKind::Undef => {
                self.advance();
                let name = self.expect_ident()?;
                self.expect(&TokenKind::Semicolon)?;
                StmtKind::VarUndef(name)
            }
            TokenKind::Asm => {
                self.advance();
                self.expect(&TokenKind::LParen)?;
                let text = self.expect_string()?;
                self.expect(&TokenKind::RParen)?;
                self.expect(&TokenKind::Semicolon)?;
                StmtKind::Asm(text)
            }
            TokenKind::Ident(name) => match self.peek_nth(1) {
                TokenKind::Colon => {
                    self.advance();
                    self.advance();
                    StmtKind::Label(name)
                }
                TokenKind::LParen => {
                    self.advance();
                    let args = self.parse_call_args()?;
                    self.expect(&TokenKind::Semicolon)?;
                    StmtKind::FuncCall { name, args }
                }
                _ => self.parse_assign()?,
            },
            _ => return Err(self.unexpected("statement")),
        };
        Ok(Stmt { kind, line, annotations })
    }

    fn keyword_stmt(&mut self, kind: StmtKind) -> Result<StmtKind, ParseError> {
        self.advance();
        self.expect(&TokenKind::Semicolon)?;
        Ok(kind)
    }

    fn parse_if(&mut self) -> Result<StmtKind, ParseError> {
        self.expect(&TokenKind::If)?;
        let cond = self.parse_paren_compare()?;
        let then_block = self.parse_body()?;
        let else_block = if self.eat(&TokenKind::Else) { Some(self.parse_body()?) } else { None };
        Ok(StmtKind::If { cond, then_block, else_block })
    }

    fn parse_decl(&mut self) -> Result<StmtKind, ParseError> {
        let is_const = self.eat(&TokenKind::Const);
        let ty = self.expect_type()?;
        let reg = self.parse_reg_binding()?;
        let mut names = vec![self.expect_ident()?];
        while self.eat(&TokenKind::Comma) {
            names.push(self.expect_ident()?);
        }
        if names.len() > 1 {
            self.expect(&TokenKind::Semicolon)?;
            return Ok(StmtKind::VarDeclMulti { names, ty, reg, is_const });
        }
        let decl = VarDecl { name: names.remove(0), ty, reg, is_const };
        if self.eat(&TokenKind::Assign) {
            let calc = self.parse_calc()?;
            self.expect(&TokenKind::Semicolon)?;
            Ok(StmtKind::VarDeclAssign { decl, calc })
        } else {
            self.expect(&TokenKind::Semicolon)?;
            Ok(StmtKind::VarDecl(decl))
        }
    }

    fn parse_assign(&mut self) -> Result<StmtKind, ParseError> {
        let target = self.expect_ident()?;
        let swizzle = match self.peek_kind() {
            TokenKind::Swizzle(s) => { let s = *s; self.advance(); Some(s) }
            _ => None,
        };
        let op = match self.peek_kind() {
            TokenKind::Assign => AssignOp::Set,
            TokenKind::CompoundAssign(op) => AssignOp::Compound(*op),
            _ => return Err(self.unexpected("assignment operator")),
        };
        self.advance();
        let calc = self.parse_calc()?;
        self.expect(&TokenKind::Semicolon)?;
        Ok(StmtKind::VarAssign(VarAssign { target, swizzle, op, calc, init: false }))
    }

    fn parse_call_args(&mut self) -> Result<Vec<CallArg>, ParseError> {
        self.expect(&TokenKind::LParen)?;
        let mut args = Vec::new();
        if self.eat(&TokenKind::RParen) {
            return Ok(args);
        }
        loop {
            let arg = match self.peek_kind().clone() {
                TokenKind::StringLit(s) => { self.advance(); CallArg::Str(s) }
                _ => CallArg::Operand(self.parse_operand()?),
            };
            args.push(arg);
            if self.eat(&TokenKind::RParen) { break; }
            self.expect(&TokenKind::Comma)?;
        }
        Ok(args)
    }

    // ── Expressions ──

    fn parse_number(&mut self) -> Result<Num, ParseError> {
        let negative = self.eat(&TokenKind::Minus);
        let num = match self.peek_kind() {
            TokenKind::IntLit(v) => Num::Int(*v),
            TokenKind::FloatLit(f) => Num::Float(*f),
            _ => return Err(self.unexpected("number")),
        };
        self.advance();
        Ok(match (negative, num) {
            (true, Num::Int(v)) => Num::Int(v.wrapping_neg()),
            (true, Num::Float(f)) => Num::Float(-f),
            (false, n) => n,
        })
    }

    fn parse_operand(&mut self) -> Result<Operand, ParseError> {
        match self.peek_kind().clone() {
            TokenKind::Ident(name) => {
                self.advance();
                let swizzle = match self.peek_kind() {
                    TokenKind::Swizzle(s) => { let s = *s; self.advance(); Some(s) }
                    _ => None,
                };
                Ok(Operand { kind: OperandKind::Var(name), swizzle })
            }
            TokenKind::IntLit(_) | TokenKind::FloatLit(_) | TokenKind::Minus => {
                Ok(Operand::num(self.parse_number()?))
            }
            _ => Err(self.unexpected("variable or number")),
        }
    }

    fn cmp_op(&self) -> Option<CmpOp> {
        Some(match self.peek_kind() {
            TokenKind::EqEq => CmpOp::Eq,
            TokenKind::NotEq => CmpOp::Ne,
            TokenKind::Lt => CmpOp::Lt,
            TokenKind::LtEq => CmpOp::Le,
            TokenKind::Gt => CmpOp::Gt,
            TokenKind::GtEq => CmpOp::Ge,
            _ => return None,
        })
    }

    fn parse_compare(&mut self) -> Result<Compare, ParseError> {
        let left = self.parse_operand()?;
        let op = self.cmp_op().ok_or_else(|| self.unexpected("comparison operator"))?;
        self.advance();
        let right = self.parse_operand()?;
        Ok(Compare { left, op, right })
    }

    fn parse_paren_compare(&mut self) -> Result<Compare, ParseError> {
        self.expect(&TokenKind::LParen)?;
        let cmp = self.parse_compare()?;
        self.expect(&TokenKind::RParen)?;
        Ok(cmp)
    }

    /// Right-hand side of an assignment or initialised declaration.
    fn parse_calc(&mut self) -> Result<Calc, ParseError> {
        if let (TokenKind::Ident(name), TokenKind::LParen) = (self.peek_kind().clone(), self.peek_nth(1)) {
            self.advance();
            let args = self.parse_call_args()?;
            let swizzle = match self.peek_kind() {
                TokenKind::Swizzle(s) => { let s = *s; self.advance(); Some(s) }
                _ => None,
            };
            return Ok(Calc::Func { name, args, swizzle });
        }

        let unary = match self.peek_kind() {
            TokenKind::Minus if matches!(self.peek_nth(1), TokenKind::Ident(_)) => Some(UnaryOp::Neg),
            TokenKind::Tilde => Some(UnaryOp::Not),
            TokenKind::Bang => Some(UnaryOp::LogicalNot),
            _ => None,
        };
        if let Some(op) = unary {
            self.advance();
            let operand = self.parse_operand()?;
            return Ok(Calc::Var { op: Some(op), operand });
        }

        let parts = self.parse_arith()?;
        if let [ExprPart::Operand(left)] = parts.as_slice() {
            if let Some(op) = self.cmp_op() {
                self.advance();
                let right = self.parse_operand()?;
                let cmp = Compare { left: left.clone(), op, right };
                let ternary = if self.eat(&TokenKind::Question) {
                    let a = self.parse_operand()?;
                    self.expect(&TokenKind::Colon)?;
                    let b = self.parse_operand()?;
                    Some((a, b))
                } else {
                    None
                };
                return Ok(Calc::Compare { cmp, ternary });
            }
        }
        Ok(calc_from_parts(parts))
    }

    /// Flat operand/operator list, with parentheses as nested groups.
    fn parse_arith(&mut self) -> Result<Vec<ExprPart>, ParseError> {
        let mut parts = vec![self.parse_term()?];
        while let Some(op) = self.peek_kind().bin_op() {
            self.advance();
            parts.push(ExprPart::Op(op));
            parts.push(self.parse_term()?);
        }
        Ok(parts)
    }

    fn parse_term(&mut self) -> Result<ExprPart, ParseError> {
        if self.eat(&TokenKind::LParen) {
            let inner = self.parse_arith()?;
            self.expect(&TokenKind::RParen)?;
            return Ok(ExprPart::Group(inner));
        }
        Ok(ExprPart::Operand(self.parse_operand()?))
    }
}

/// Pick the direct calc form for simple expressions; everything else stays flat.
fn calc_from_parts(mut parts: Vec<ExprPart>) -> Calc {
    match parts.as_slice() {
        [ExprPart::Operand(op)] => match op.as_num() {
            Some(n) => Calc::Num(n),
            None => Calc::Var { op: None, operand: op.clone() },
        },
        [ExprPart::Operand(left), ExprPart::Op(op), ExprPart::Operand(right)]
            if left.var_name().is_some() =>
        {
            match right.as_num() {
                Some(n) => Calc::VarNum { op: *op, left: left.clone(), right: n },
                None => Calc::VarVar { op: *op, left: left.clone(), right: right.clone() },
            }
        }
        [ExprPart::Group(_)] => match parts.pop() {
            Some(ExprPart::Group(inner)) => calc_from_parts(inner),
            _ => Calc::Multi(parts),
        },
        _ => Calc::Multi(parts),
    }
}

pub fn parse(tokens: Vec<Token>) -> Result<Program, ParseError> {
    Parser::new(tokens).parse_program()
}
