use crate::compiler::types::{DataType, Swizzle};
use serde::{Deserialize, Serialize};
use std::fmt;
use strum_macros::{Display, EnumString};

/// A complete source file after parsing.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Program {
    pub includes: Vec<String>,
    pub state: Vec<StateVar>,
    pub items: Vec<FuncDef>,
    pub post_includes: Vec<String>,
}

/// Memory-resident variable declared in the `state { }` block.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateVar {
    pub name: String,
    pub ty: DataType,
    pub is_extern: bool,
    pub align: Option<u32>,
    pub dims: Vec<u32>,
    pub init: Vec<Num>,
    pub line: usize,
}

impl StateVar {
    pub fn element_count(&self) -> u32 {
        self.dims.iter().product::<u32>().max(1)
    }

    pub fn byte_size(&self) -> u32 {
        self.ty.byte_size() * self.element_count()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FuncKind {
    Function,
    /// Command with its dispatch-table index.
    Command(u32),
    Macro,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FuncDef {
    pub kind: FuncKind,
    pub name: String,
    pub args: Vec<FuncArg>,
    /// `None` for forward declarations (`function foo(u32<$a0> x);`).
    pub body: Option<Block>,
    pub annotations: Vec<Annotation>,
    pub line: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FuncArg {
    pub name: String,
    pub ty: DataType,
    pub reg: Option<RegRef>,
}

/// Register binding written as `<$t0>` or `<$8>`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RegRef {
    Named(String),
    Index(u32),
}

impl fmt::Display for RegRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RegRef::Named(n) => f.write_str(n),
            RegRef::Index(i) => write!(f, "${}", i),
        }
    }
}

/// Closed vocabulary of `@Name` annotations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, EnumString, Display)]
pub enum AnnotationKind {
    Barrier,
    Align,
    NoReturn,
    Unlikely,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Annotation {
    pub kind: AnnotationKind,
    pub value: Option<AnnotationValue>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum AnnotationValue {
    Int(i64),
    Str(String),
}

/// Lexical scope boundary.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Block {
    pub stmts: Vec<Stmt>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Stmt {
    pub kind: StmtKind,
    pub line: usize,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub annotations: Vec<Annotation>,
}

impl Stmt {
    pub fn new(kind: StmtKind, line: usize) -> Self {
        Self { kind, line, annotations: Vec::new() }
    }

    /// Copy of the statement with nested blocks emptied, for diagnostics.
    pub fn header(&self) -> Stmt {
        let kind = match &self.kind {
            StmtKind::Block(_) => StmtKind::Block(Block::default()),
            StmtKind::If { cond, else_block, .. } => StmtKind::If {
                cond: cond.clone(),
                then_block: Block::default(),
                else_block: else_block.as_ref().map(|_| Block::default()),
            },
            StmtKind::While { cond, .. } => {
                StmtKind::While { cond: cond.clone(), body: Block::default() }
            }
            StmtKind::Loop { cond, .. } => {
                StmtKind::Loop { body: Block::default(), cond: cond.clone() }
            }
            other => other.clone(),
        };
        Stmt { kind, line: self.line, annotations: self.annotations.clone() }
    }

    pub fn has_annotation(&self, kind: AnnotationKind) -> bool {
        self.annotations.iter().any(|a| a.kind == kind)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum StmtKind {
    Block(Block),
    If { cond: Compare, then_block: Block, else_block: Option<Block> },
    While { cond: Compare, body: Block },
    /// Endless loop, or do-while when `cond` is present.
    Loop { body: Block, cond: Option<Compare> },
    VarDecl(VarDecl),
    VarDeclAssign { decl: VarDecl, calc: Calc },
    VarDeclMulti { names: Vec<String>, ty: DataType, reg: Option<RegRef>, is_const: bool },
    /// Binds `name` to the register of the existing variable `alias_of`.
    VarDeclAlias { name: String, alias_of: String, ty: Option<DataType> },
    VarUndef(String),
    VarAssign(VarAssign),
    FuncCall { name: String, args: Vec<CallArg> },
    Goto(String),
    Label(String),
    Break,
    Continue,
    Exit,
    Asm(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VarDecl {
    pub name: String,
    pub ty: DataType,
    pub reg: Option<RegRef>,
    pub is_const: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VarAssign {
    pub target: String,
    pub swizzle: Option<Swizzle>,
    pub op: AssignOp,
    pub calc: Calc,
    /// Initialising assignment split off a declaration.
    #[serde(skip_serializing_if = "std::ops::Not::not", default)]
    pub init: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AssignOp {
    Set,
    Compound(BinOp),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, EnumString, Display)]
pub enum BinOp {
    #[strum(serialize = "+")]
    Add,
    #[strum(serialize = "-")]
    Sub,
    #[strum(serialize = "*")]
    Mul,
    #[strum(serialize = "/")]
    Div,
    #[strum(serialize = "%")]
    Mod,
    #[strum(serialize = "&")]
    And,
    #[strum(serialize = "|")]
    Or,
    #[strum(serialize = "^")]
    Xor,
    #[strum(serialize = "~|")]
    Nor,
    #[strum(serialize = "<<")]
    Shl,
    #[strum(serialize = ">>")]
    Shr,
    /// Vector multiply-accumulate (`+*`).
    #[strum(serialize = "+*")]
    MulAdd,
}

impl BinOp {
    /// Binding strength used when grouping flat expressions; higher binds tighter.
    pub fn precedence(self) -> u8 {
        match self {
            BinOp::Mul | BinOp::Div | BinOp::Mod | BinOp::MulAdd => 5,
            BinOp::Add | BinOp::Sub => 4,
            BinOp::Shl | BinOp::Shr => 3,
            BinOp::And => 2,
            BinOp::Xor => 1,
            BinOp::Or | BinOp::Nor => 0,
        }
    }

    pub fn is_commutative(self) -> bool {
        matches!(self, BinOp::Add | BinOp::Mul | BinOp::And | BinOp::Or | BinOp::Xor | BinOp::Nor)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, EnumString, Display)]
pub enum UnaryOp {
    #[strum(serialize = "-")]
    Neg,
    #[strum(serialize = "~")]
    Not,
    #[strum(serialize = "!")]
    LogicalNot,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, EnumString, Display)]
pub enum CmpOp {
    #[strum(serialize = "==")]
    Eq,
    #[strum(serialize = "!=")]
    Ne,
    #[strum(serialize = "<")]
    Lt,
    #[strum(serialize = "<=")]
    Le,
    #[strum(serialize = ">")]
    Gt,
    #[strum(serialize = ">=")]
    Ge,
}

impl CmpOp {
    pub fn negate(self) -> CmpOp {
        match self {
            CmpOp::Eq => CmpOp::Ne,
            CmpOp::Ne => CmpOp::Eq,
            CmpOp::Lt => CmpOp::Ge,
            CmpOp::Ge => CmpOp::Lt,
            CmpOp::Gt => CmpOp::Le,
            CmpOp::Le => CmpOp::Gt,
        }
    }

    /// Same comparison with the operands exchanged.
    pub fn swap(self) -> CmpOp {
        match self {
            CmpOp::Lt => CmpOp::Gt,
            CmpOp::Gt => CmpOp::Lt,
            CmpOp::Le => CmpOp::Ge,
            CmpOp::Ge => CmpOp::Le,
            other => other,
        }
    }
}

/// Numeric literal.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Num {
    Int(i64),
    Float(f64),
}

impl Num {
    pub fn as_int(self) -> Option<i64> {
        match self {
            Num::Int(v) => Some(v),
            Num::Float(f) if f.fract() == 0.0 => Some(f as i64),
            Num::Float(_) => None,
        }
    }

    pub fn is_zero(self) -> bool {
        match self {
            Num::Int(v) => v == 0,
            Num::Float(f) => f == 0.0,
        }
    }
}

impl fmt::Display for Num {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Num::Int(v) => write!(f, "{}", v),
            Num::Float(v) => write!(f, "{}", v),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum OperandKind {
    Var(String),
    /// Address of a state variable, rendered as `%lo(name)`.
    Label(String),
    Num(Num),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Operand {
    pub kind: OperandKind,
    pub swizzle: Option<Swizzle>,
}

impl Operand {
    pub fn var(name: &str) -> Self {
        Self { kind: OperandKind::Var(name.to_string()), swizzle: None }
    }

    pub fn num(n: Num) -> Self {
        Self { kind: OperandKind::Num(n), swizzle: None }
    }

    pub fn as_num(&self) -> Option<Num> {
        match (&self.kind, self.swizzle) {
            (OperandKind::Num(n), None) => Some(*n),
            _ => None,
        }
    }

    pub fn var_name(&self) -> Option<&str> {
        match &self.kind {
            OperandKind::Var(n) => Some(n),
            _ => None,
        }
    }
}

impl fmt::Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            OperandKind::Var(n) => f.write_str(n)?,
            OperandKind::Label(n) => write!(f, "%lo({})", n)?,
            OperandKind::Num(n) => write!(f, "{}", n)?,
        }
        if let Some(s) = self.swizzle {
            write!(f, "{}", s)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Compare {
    pub left: Operand,
    pub op: CmpOp,
    pub right: Operand,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum CallArg {
    Operand(Operand),
    Str(String),
}

/// Right-hand side of an assignment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Calc {
    Num(Num),
    Var { op: Option<UnaryOp>, operand: Operand },
    VarVar { op: BinOp, left: Operand, right: Operand },
    VarNum { op: BinOp, left: Operand, right: Num },
    Func { name: String, args: Vec<CallArg>, swizzle: Option<Swizzle> },
    Compare { cmp: Compare, ternary: Option<(Operand, Operand)> },
    /// Unlowered expression with more than one operator; removed by the normalizer.
    Multi(Vec<ExprPart>),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ExprPart {
    Operand(Operand),
    Op(BinOp),
    Group(Vec<ExprPart>),
}
