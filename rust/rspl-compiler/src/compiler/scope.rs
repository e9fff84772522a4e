//! Lexical scope stack binding variable names to hardware registers.
//! Entering a block copies the parent's bindings; leaving it drops them.

use crate::compiler::types::{DataType, Reg};
use std::collections::{HashMap, HashSet};
use thiserror::Error;

/// Scalar registers handed out to declarations without an explicit register.
const SCALAR_POOL: [u8; 18] = [8, 9, 10, 11, 12, 13, 14, 15, 16, 17, 18, 19, 20, 21, 22, 23, 24, 25];
/// Vector registers handed out to declarations without an explicit register.
const VECTOR_POOL: std::ops::RangeInclusive<u8> = 1..=26;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ScopeError {
    #[error("Variable '{0}' not known!")]
    NotKnown(String),
    #[error("Variable '{0}' is already declared in this scope")]
    Redeclared(String),
    #[error("Register {reg} of '{name}' is already used by variable '{owner}'")]
    RegisterInUse { name: String, reg: Reg, owner: String },
    #[error("No free register left for '{0}'")]
    Exhausted(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VarInfo {
    pub reg: Reg,
    pub ty: DataType,
    pub is_const: bool,
}

impl VarInfo {
    /// Every register occupied by the variable (two for `vec32`).
    pub fn regs(&self) -> Vec<Reg> {
        let mut regs = vec![self.reg];
        if self.ty.reg_count() == 2 {
            regs.extend(self.reg.next());
        }
        regs
    }
}

#[derive(Debug, Clone, Default)]
struct Scope {
    vars: HashMap<String, VarInfo>,
    regs: HashMap<Reg, String>,
    /// Names declared in this scope, as opposed to inherited from the parent.
    local: HashSet<String>,
}

impl Scope {
    fn unbind(&mut self, name: &str) -> Option<VarInfo> {
        let info = self.vars.remove(name)?;
        for reg in info.regs() {
            if self.regs.get(&reg).map(String::as_str) == Some(name) {
                self.regs.remove(&reg);
            }
        }
        Some(info)
    }
}

#[derive(Debug)]
pub struct ScopeStack {
    scopes: Vec<Scope>,
}

impl Default for ScopeStack {
    fn default() -> Self {
        Self::new()
    }
}

impl ScopeStack {
    pub fn new() -> Self {
        Self { scopes: vec![Scope::default()] }
    }

    fn top(&self) -> &Scope {
        &self.scopes[self.scopes.len() - 1]
    }

    fn top_mut(&mut self) -> &mut Scope {
        let idx = self.scopes.len() - 1;
        &mut self.scopes[idx]
    }

    pub fn push(&mut self) {
        let mut scope = self.top().clone();
        scope.local.clear();
        self.scopes.push(scope);
    }

    pub fn pop(&mut self) {
        if self.scopes.len() > 1 {
            self.scopes.pop();
        }
    }

    pub fn depth(&self) -> usize {
        self.scopes.len()
    }

    pub fn lookup(&self, name: &str) -> Result<VarInfo, ScopeError> {
        self.top().vars.get(name).copied().ok_or_else(|| ScopeError::NotKnown(name.to_string()))
    }

    pub fn owner_of(&self, reg: Reg) -> Option<&str> {
        self.top().regs.get(&reg).map(String::as_str)
    }

    /// Bind `name` in the innermost scope. Aliases may share registers.
    pub fn declare(&mut self, name: &str, info: VarInfo, alias: bool) -> Result<(), ScopeError> {
        let scope = self.top_mut();
        if scope.local.contains(name) {
            return Err(ScopeError::Redeclared(name.to_string()));
        }
        scope.unbind(name);
        if !alias {
            for reg in info.regs() {
                if let Some(owner) = scope.regs.get(&reg) {
                    return Err(ScopeError::RegisterInUse {
                        name: name.to_string(),
                        reg,
                        owner: owner.clone(),
                    });
                }
            }
        }
        for reg in info.regs() {
            scope.regs.entry(reg).or_insert_with(|| name.to_string());
        }
        scope.vars.insert(name.to_string(), info);
        scope.local.insert(name.to_string());
        Ok(())
    }

    /// Drop a binding before the end of its block (`undef x;`).
    pub fn undef(&mut self, name: &str) -> Result<(), ScopeError> {
        let scope = self.top_mut();
        scope.local.remove(name);
        scope.unbind(name).map(|_| ()).ok_or_else(|| ScopeError::NotKnown(name.to_string()))
    }

    /// First register of the allocation pool not held by a visible variable.
    pub fn alloc_free(&self, name: &str, ty: DataType) -> Result<Reg, ScopeError> {
        let regs = &self.top().regs;
        let found = if ty.is_vector() {
            VECTOR_POOL
                .map(Reg::Vector)
                .find(|r| {
                    let pair_free = ty.reg_count() == 1
                        || r.next().is_some_and(|n| n.index() <= 26 && !regs.contains_key(&n));
                    !regs.contains_key(r) && pair_free
                })
        } else {
            SCALAR_POOL.iter().map(|i| Reg::Scalar(*i)).find(|r| !regs.contains_key(r))
        };
        found.ok_or_else(|| ScopeError::Exhausted(name.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn var(reg: Reg, ty: DataType) -> VarInfo {
        VarInfo { reg, ty, is_const: false }
    }

    #[test]
    fn test_block_scoped_lifetime() {
        let mut scopes = ScopeStack::new();
        scopes.declare("a", var(Reg::Scalar(8), DataType::U32), false).unwrap();
        scopes.push();
        scopes.declare("b", var(Reg::Scalar(9), DataType::U32), false).unwrap();
        assert!(scopes.lookup("a").is_ok());
        scopes.pop();
        assert_eq!(scopes.lookup("b"), Err(ScopeError::NotKnown("b".into())));
        scopes.push();
        scopes.declare("c", var(Reg::Scalar(9), DataType::U32), false).unwrap();
    }

    #[test]
    fn test_register_conflicts() {
        let mut scopes = ScopeStack::new();
        scopes.declare("pos", var(Reg::Vector(4), DataType::Vec32), false).unwrap();
        let err = scopes.declare("x", var(Reg::Vector(5), DataType::Vec16), false).unwrap_err();
        assert!(matches!(err, ScopeError::RegisterInUse { ref owner, .. } if owner == "pos"));
        scopes.declare("alias", var(Reg::Vector(4), DataType::Vec32), true).unwrap();
        assert_eq!(scopes.owner_of(Reg::Vector(5)), Some("pos"));
    }

    #[test]
    fn test_shadowing_and_redeclaration() {
        let mut scopes = ScopeStack::new();
        scopes.declare("x", var(Reg::Scalar(8), DataType::U32), false).unwrap();
        assert!(matches!(
            scopes.declare("x", var(Reg::Scalar(10), DataType::U32), false),
            Err(ScopeError::Redeclared(_))
        ));
        scopes.push();
        scopes.declare("x", var(Reg::Scalar(9), DataType::U32), true).unwrap();
        assert_eq!(scopes.lookup("x").unwrap().reg, Reg::Scalar(9));
        scopes.pop();
        assert_eq!(scopes.lookup("x").unwrap().reg, Reg::Scalar(8));
    }

    #[test]
    fn test_undef_frees_register() {
        let mut scopes = ScopeStack::new();
        scopes.declare("x", var(Reg::Scalar(8), DataType::U32), false).unwrap();
        scopes.undef("x").unwrap();
        scopes.declare("y", var(Reg::Scalar(8), DataType::U32), false).unwrap();
        assert!(scopes.undef("nope").is_err());
    }

    #[test]
    fn test_auto_allocation_skips_used() {
        let mut scopes = ScopeStack::new();
        scopes.declare("a", var(Reg::Scalar(8), DataType::U32), false).unwrap();
        assert_eq!(scopes.alloc_free("b", DataType::U32).unwrap(), Reg::Scalar(9));
        scopes.declare("v", var(Reg::Vector(2), DataType::Vec16), false).unwrap();
        assert_eq!(scopes.alloc_free("w", DataType::Vec32).unwrap(), Reg::Vector(3));
        assert_eq!(scopes.alloc_free("u", DataType::Vec16).unwrap(), Reg::Vector(1));
    }
}
