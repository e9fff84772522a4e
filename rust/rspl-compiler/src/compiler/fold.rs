//! Arithmetic expression trees: precedence grouping, constant folding and
//! lowering to a chain of two-operand assignments on the target variable.

use crate::compiler::ast::{AssignOp, BinOp, Calc, ExprPart, Num, Operand, VarAssign};
use crate::compiler::types::Swizzle;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum FoldError {
    #[error("nested brackets are not supported")]
    NestedBrackets,
    #[error("malformed expression")]
    Malformed,
    #[error("division by zero in constant expression")]
    DivisionByZero,
    #[error("operator '{0}' cannot be applied to float constants")]
    FloatOperator(BinOp),
    #[error("variable '{0}' is overwritten before it is read in this expression")]
    TargetClobbered(String),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Term {
    Leaf(Operand),
    Group(Level),
}

/// Operands joined by operators; `first` is implicitly preceded by nothing.
#[derive(Debug, Clone, PartialEq)]
pub struct Level {
    pub first: Box<Term>,
    pub rest: Vec<(BinOp, Term)>,
}

impl Term {
    fn as_num(&self) -> Option<Num> {
        match self {
            Term::Leaf(op) => op.as_num(),
            Term::Group(_) => None,
        }
    }

    fn is_leaf(&self) -> bool {
        matches!(self, Term::Leaf(_))
    }
}

impl Level {
    fn ops(&self) -> impl Iterator<Item = BinOp> + '_ {
        self.rest.iter().map(|(op, _)| *op)
    }

    fn from_terms(mut terms: Vec<Term>, ops: Vec<BinOp>) -> Result<Level, FoldError> {
        if terms.is_empty() || terms.len() != ops.len() + 1 {
            return Err(FoldError::Malformed);
        }
        let first = terms.remove(0);
        Ok(Level { first: Box::new(first), rest: ops.into_iter().zip(terms).collect() })
    }

    /// A level consisting of a single term collapses into that term.
    fn into_term(self) -> Term {
        if self.rest.is_empty() { *self.first } else { Term::Group(self) }
    }
}

/// Build the tree from a parsed flat expression, honouring brackets and precedence.
pub fn build_tree(parts: &[ExprPart]) -> Result<Level, FoldError> {
    let mut terms = Vec::new();
    let mut ops = Vec::new();
    for (i, part) in parts.iter().enumerate() {
        match (i % 2, part) {
            (0, ExprPart::Operand(op)) => terms.push(Term::Leaf(op.clone())),
            (0, ExprPart::Group(inner)) => terms.push(build_tree(inner)?.into_term()),
            (1, ExprPart::Op(op)) => ops.push(*op),
            _ => return Err(FoldError::Malformed),
        }
    }
    group_by_precedence(terms, ops)
}

/// Split a flat run at its weakest operators, grouping tighter-binding runs.
fn group_by_precedence(terms: Vec<Term>, ops: Vec<BinOp>) -> Result<Level, FoldError> {
    let Some(weakest) = ops.iter().map(|op| op.precedence()).min() else {
        return Level::from_terms(terms, ops);
    };
    if ops.iter().all(|op| op.precedence() == weakest) {
        return Level::from_terms(terms, ops);
    }
    let mut out_terms = Vec::new();
    let mut out_ops = Vec::new();
    let mut run_terms = Vec::new();
    let mut run_ops = Vec::new();
    let mut terms = terms.into_iter();
    run_terms.extend(terms.next());
    for (op, term) in ops.into_iter().zip(terms) {
        if op.precedence() == weakest {
            let run = group_by_precedence(std::mem::take(&mut run_terms), std::mem::take(&mut run_ops))?;
            out_terms.push(run.into_term());
            out_ops.push(op);
        } else {
            run_ops.push(op);
        }
        run_terms.push(term);
    }
    let run = group_by_precedence(run_terms, run_ops)?;
    out_terms.push(run.into_term());
    Level::from_terms(out_terms, out_ops)
}

fn is_additive(op: BinOp) -> bool {
    matches!(op, BinOp::Add | BinOp::Sub)
}

fn invert_additive(op: BinOp) -> BinOp {
    if op == BinOp::Add { BinOp::Sub } else { BinOp::Add }
}

/// Merge bracketed sub-expressions into their parent where evaluation order allows.
pub fn splice_groups(level: Level) -> Level {
    let Level { first, rest: level_rest } = level;
    let first = match *first {
        Term::Group(g) => {
            let g = splice_groups(g);
            let class = g.rest.first().map(|(op, _)| op.precedence());
            let same_class = class.is_some_and(|c| {
                g.ops().chain(level_rest.iter().map(|(op, _)| *op)).all(|op| op.precedence() == c)
            });
            if same_class && !level_rest.is_empty() {
                // Left-to-right evaluation makes a leading group a prefix of the parent.
                let mut merged = g;
                merged.rest.extend(level_rest);
                return splice_groups(merged);
            }
            Term::Group(g)
        }
        leaf => leaf,
    };
    let mut rest = Vec::new();
    for (op, term) in level_rest {
        let Term::Group(g) = term else {
            rest.push((op, term));
            continue;
        };
        let g = splice_groups(g);
        let additive = is_additive(op) && g.ops().all(is_additive);
        let same_assoc = matches!(op, BinOp::Mul | BinOp::And | BinOp::Or | BinOp::Xor)
            && g.ops().all(|inner| inner == op);
        if additive {
            let flip = op == BinOp::Sub;
            rest.push((op, *g.first));
            for (inner, t) in g.rest {
                rest.push((if flip { invert_additive(inner) } else { inner }, t));
            }
        } else if same_assoc {
            rest.push((op, *g.first));
            rest.extend(g.rest);
        } else {
            rest.push((op, Term::Group(g)));
        }
    }
    Level { first: Box::new(first), rest }
}

fn wrap32(v: i64) -> i64 {
    v as i32 as i64
}

/// Evaluate `a OP b` on two constants.
pub fn eval(op: BinOp, a: Num, b: Num) -> Result<Num, FoldError> {
    if let (Num::Int(a), Num::Int(b)) = (a, b) {
        let v = match op {
            BinOp::Add => a.wrapping_add(b),
            BinOp::Sub => a.wrapping_sub(b),
            BinOp::Mul | BinOp::MulAdd => a.wrapping_mul(b),
            BinOp::Div => {
                if b == 0 { return Err(FoldError::DivisionByZero); }
                a.wrapping_div(b)
            }
            BinOp::Mod => {
                if b == 0 { return Err(FoldError::DivisionByZero); }
                a.wrapping_rem(b)
            }
            BinOp::And => a & b,
            BinOp::Or => a | b,
            BinOp::Xor => a ^ b,
            BinOp::Nor => !(a | b),
            BinOp::Shl => ((a as u32).wrapping_shl(b as u32)) as i64,
            BinOp::Shr => ((a as u32).wrapping_shr(b as u32)) as i64,
        };
        return Ok(Num::Int(wrap32(v)));
    }
    let (fa, fb) = (to_f64(a), to_f64(b));
    Ok(Num::Float(match op {
        BinOp::Add => fa + fb,
        BinOp::Sub => fa - fb,
        BinOp::Mul => fa * fb,
        BinOp::Div => {
            if fb == 0.0 { return Err(FoldError::DivisionByZero); }
            fa / fb
        }
        other => return Err(FoldError::FloatOperator(other)),
    }))
}

fn to_f64(n: Num) -> f64 {
    match n {
        Num::Int(v) => v as f64,
        Num::Float(f) => f,
    }
}

fn leaf(n: Num) -> Term {
    Term::Leaf(Operand::num(n))
}

/// Fold constant sub-expressions bottom-up.
pub fn fold_level(level: Level) -> Result<Level, FoldError> {
    let fold_term = |t: Term| -> Result<Term, FoldError> {
        match t {
            Term::Group(g) => Ok(fold_level(g)?.into_term()),
            leaf => Ok(leaf),
        }
    };
    let first = fold_term(*level.first)?;
    let rest = level
        .rest
        .into_iter()
        .map(|(op, t)| fold_term(t).map(|t| (op, t)))
        .collect::<Result<Vec<_>, _>>()?;
    let level = Level { first: Box::new(first), rest };
    if level.rest.is_empty() {
        return Ok(level);
    }

    let ops: Vec<BinOp> = level.ops().collect();
    if ops.iter().all(|op| is_additive(*op)) {
        return fold_additive(level);
    }
    let uniform = ops.iter().all(|op| *op == ops[0]);
    if uniform && matches!(ops[0], BinOp::Mul | BinOp::And | BinOp::Or | BinOp::Xor) {
        return fold_associative(level, ops[0]);
    }
    fold_prefix(level)
}

/// Sum every constant of a `+`/`-` run into one trailing (or leading) term.
fn fold_additive(level: Level) -> Result<Level, FoldError> {
    let mut constant: Option<Num> = None;
    let mut vars: Vec<(BinOp, Term)> = Vec::new();
    let signed = std::iter::once((BinOp::Add, *level.first)).chain(level.rest);
    for (op, term) in signed {
        match term.as_num() {
            Some(n) => {
                let acc = constant.unwrap_or(Num::Int(0));
                constant = Some(eval(op, acc, n)?);
            }
            None => vars.push((op, term)),
        }
    }
    let constant = constant.filter(|c| !c.is_zero());
    if vars.is_empty() {
        return Ok(Level { first: Box::new(leaf(constant.unwrap_or(Num::Int(0)))), rest: Vec::new() });
    }
    let mut terms: Vec<(BinOp, Term)> = Vec::new();
    if vars[0].0 == BinOp::Sub {
        // No leading negation exists; keep the constant first.
        terms.push((BinOp::Add, leaf(constant.unwrap_or(Num::Int(0)))));
        terms.extend(vars);
    } else {
        terms.extend(vars);
        if let Some(c) = constant {
            terms.push(match c {
                Num::Int(v) if v < 0 => (BinOp::Sub, leaf(Num::Int(wrap32(v.wrapping_neg())))),
                Num::Float(f) if f < 0.0 => (BinOp::Sub, leaf(Num::Float(-f))),
                c => (BinOp::Add, leaf(c)),
            });
        }
    }
    let first = terms.remove(0).1;
    Ok(Level { first: Box::new(first), rest: terms })
}

fn fold_associative(level: Level, op: BinOp) -> Result<Level, FoldError> {
    let mut constant: Option<Num> = None;
    let mut vars = Vec::new();
    for term in std::iter::once(*level.first).chain(level.rest.into_iter().map(|(_, t)| t)) {
        match term.as_num() {
            Some(n) => constant = Some(match constant { Some(c) => eval(op, c, n)?, None => n }),
            None => vars.push(term),
        }
    }
    let identity = match (op, constant) {
        (BinOp::Mul, Some(Num::Int(1))) => true,
        (BinOp::Or | BinOp::Xor, Some(Num::Int(0))) => true,
        (BinOp::And, Some(Num::Int(-1))) => true,
        _ => false,
    };
    if !identity || vars.is_empty() {
        vars.extend(constant.map(leaf));
    }
    let ops = vec![op; vars.len().saturating_sub(1)];
    Level::from_terms(vars, ops)
}

/// Mixed or non-associative run: only a leading constant prefix folds.
fn fold_prefix(level: Level) -> Result<Level, FoldError> {
    let mut first = *level.first;
    let mut rest = level.rest.into_iter().peekable();
    while let (Some(a), Some((op, t))) = (first.as_num(), rest.peek()) {
        let Some(b) = t.as_num() else { break };
        first = leaf(eval(*op, a, b)?);
        rest.next();
    }
    Ok(Level { first: Box::new(first), rest: rest.collect() })
}

/// Whether `term` may be moved to the front of `level` from position `idx`.
fn can_rotate(level: &Level, idx: usize) -> bool {
    let op = level.rest[idx].0;
    if !op.is_commutative() {
        return false;
    }
    level.ops().all(|o| o == op) || (op == BinOp::Add && level.ops().all(is_additive))
}

/// Move the term at `rest[idx]` to the front, keeping the level's value.
fn rotate_to_front(level: Level, idx: usize) -> Level {
    let mut rest = level.rest;
    let (op, term) = rest.remove(idx);
    rest.insert(0, (op, *level.first));
    Level { first: Box::new(term), rest }
}

fn single_calc(op: &Operand) -> Calc {
    match op.as_num() {
        Some(n) => Calc::Num(n),
        None => Calc::Var { op: None, operand: op.clone() },
    }
}

fn step_calc(op: BinOp, left: Operand, right: &Operand) -> Calc {
    match right.as_num() {
        Some(n) => Calc::VarNum { op, left, right: n },
        None => Calc::VarVar { op, left, right: right.clone() },
    }
}

/// Lower a folded tree into assignments chained through `target`.
pub fn lower_chain(
    target: &str,
    swizzle: Option<Swizzle>,
    mut level: Level,
) -> Result<Vec<VarAssign>, FoldError> {
    let assign = |calc: Calc| VarAssign {
        target: target.to_string(),
        swizzle,
        op: AssignOp::Set,
        calc,
        init: false,
    };

    let groups: Vec<usize> = level.rest.iter().enumerate()
        .filter(|(_, (_, t))| !t.is_leaf())
        .map(|(i, _)| i)
        .collect();
    match (level.first.is_leaf(), groups.as_slice()) {
        (true, []) | (false, []) => {}
        (true, [idx]) if can_rotate(&level, *idx) => level = rotate_to_front(level, *idx),
        _ => return Err(FoldError::NestedBrackets),
    }
    // A constant first operand trades places with a commutative neighbour.
    if level.first.as_num().is_some() && !level.rest.is_empty() && level.rest[0].1.is_leaf()
        && level.rest[0].1.as_num().is_none() && can_rotate(&level, 0)
    {
        level = rotate_to_front(level, 0);
    }

    let mut steps: Vec<(BinOp, Operand)> = Vec::new();
    let head = match *level.first {
        Term::Leaf(op) => op,
        Term::Group(g) => {
            if !g.first.is_leaf() || g.rest.iter().any(|(_, t)| !t.is_leaf()) {
                return Err(FoldError::NestedBrackets);
            }
            let Term::Leaf(head) = *g.first else { return Err(FoldError::Malformed) };
            for (op, t) in g.rest {
                if let Term::Leaf(o) = t { steps.push((op, o)); }
            }
            head
        }
    };
    for (op, t) in level.rest {
        match t {
            Term::Leaf(o) => steps.push((op, o)),
            Term::Group(_) => return Err(FoldError::NestedBrackets),
        }
    }

    let mut out = Vec::new();
    let mut steps = steps.into_iter();
    match (head.as_num(), steps.next()) {
        (_, None) => out.push(assign(single_calc(&head))),
        (Some(_), Some((op, right))) => {
            if right.var_name() == Some(target) {
                return Err(FoldError::TargetClobbered(target.to_string()));
            }
            out.push(assign(single_calc(&head)));
            out.push(assign(step_calc(op, Operand::var(target), &right)));
        }
        (None, Some((op, right))) => out.push(assign(step_calc(op, head, &right))),
    }
    for (op, right) in steps {
        if right.var_name() == Some(target) {
            return Err(FoldError::TargetClobbered(target.to_string()));
        }
        out.push(assign(step_calc(op, Operand::var(target), &right)));
    }
    Ok(out)
}

/// Full pipeline for a multi-operator right-hand side.
pub fn lower_expression(
    target: &str,
    swizzle: Option<Swizzle>,
    parts: &[ExprPart],
) -> Result<Vec<VarAssign>, FoldError> {
    let tree = build_tree(parts)?;
    let tree = fold_level(splice_groups(tree))?;
    lower_chain(target, swizzle, tree)
}
