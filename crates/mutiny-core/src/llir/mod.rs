//! Low-level intermediate representation
//!
//! This module provides:
//! - `Instr` / `Terminator`: the register-based instruction set
//! - `Function` / `Block`: bodies and declarations
//! - `Module`: a translation unit with globals and constructor lists
//! - `ModuleBuilder` / `FunctionBuilder`: fluent construction
//!
//! Modules are plain owned data: `Clone` is the deep copy that mutation
//! operates on, and instruction addresses are `(function, block, instr)`
//! index triples that stay valid across clones.

pub mod builder;
mod function;
mod instr;
mod module;

pub use builder::{FunctionBuilder, ModuleBuilder};
pub use function::{Block, Function};
pub use instr::{BinOp, CmpOp, Const, Instr, Operand, Terminator};
pub use module::{Global, Module, ModuleId};
