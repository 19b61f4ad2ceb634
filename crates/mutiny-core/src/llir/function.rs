//! Functions and basic blocks

use serde::{Deserialize, Serialize};

use super::instr::{Instr, Terminator};

/// A basic block: a straight-line instruction sequence ending in a terminator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Block {
    /// Instructions in execution order
    pub instrs: Vec<Instr>,

    /// The block terminator
    pub terminator: Terminator,
}

impl Block {
    /// Create a block with the given terminator and no instructions
    #[must_use]
    pub fn new(terminator: Terminator) -> Self {
        Self {
            instrs: Vec::new(),
            terminator,
        }
    }
}

/// A function: either a definition (with blocks) or a declaration (without)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Function {
    /// Unmangled symbol name
    pub name: String,

    /// Number of parameters
    pub params: u16,

    /// Number of virtual registers used by the body
    pub regs: u16,

    /// Number of local memory slots
    pub slots: u16,

    /// Basic blocks; block 0 is the entry. Empty for declarations.
    pub blocks: Vec<Block>,
}

impl Function {
    /// Create an external declaration
    #[must_use]
    pub fn declaration(name: impl Into<String>, params: u16) -> Self {
        Self {
            name: name.into(),
            params,
            regs: 0,
            slots: 0,
            blocks: Vec::new(),
        }
    }

    /// True if this function has no body
    #[must_use]
    pub fn is_declaration(&self) -> bool {
        self.blocks.is_empty()
    }

    /// The entry block, if the function is defined
    #[must_use]
    pub fn entry_block(&self) -> Option<&Block> {
        self.blocks.first()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn declaration_has_no_body() {
        let decl = Function::declaration("puts", 1);
        assert!(decl.is_declaration());
        assert!(decl.entry_block().is_none());
    }

    #[test]
    fn definition_has_entry() {
        let func = Function {
            name: "f".to_string(),
            params: 0,
            regs: 0,
            slots: 0,
            blocks: vec![Block::new(Terminator::Ret(None))],
        };
        assert!(!func.is_declaration());
        assert!(func.entry_block().is_some());
    }
}
