//! Compiler pipeline stages, in the order they run.

pub mod preprocess;
pub mod tokens;
pub mod lexer;
pub mod parser;
pub mod ast;
pub mod types;
pub mod context;
pub mod normalize;
pub mod fold;
pub mod scope;
pub mod asm;
pub mod lower;
pub mod opt;
pub mod emit;
