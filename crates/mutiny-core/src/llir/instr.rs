//! Instruction set of the low-level IR

use serde::{Deserialize, Serialize};

/// A compile-time constant operand
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Const {
    /// The unit (void) value
    Unit,

    /// 64-bit signed integer
    I64(i64),

    /// 64-bit float
    F64(f64),

    /// Raw pointer materialised as an integer
    ///
    /// Instrumentation uses this to inline the call-tree probe address into
    /// generated code.
    Ptr(u64),

    /// String literal
    Str(String),

    /// Aggregate list initializer
    List(Vec<Const>),

    /// Reference to a function by (unmangled) symbol name
    ///
    /// The currency of indirect calls and destructor registration.
    Func(String),
}

impl Const {
    /// Short type name for diagnostics
    #[must_use]
    pub fn type_name(&self) -> &'static str {
        match self {
            Const::Unit => "unit",
            Const::I64(_) => "i64",
            Const::F64(_) => "f64",
            Const::Ptr(_) => "ptr",
            Const::Str(_) => "str",
            Const::List(_) => "list",
            Const::Func(_) => "func",
        }
    }
}

/// An instruction operand: a virtual register, a function argument, or a
/// constant
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Operand {
    /// Virtual register, written by a previous instruction
    Reg(u16),

    /// Function argument by position
    Arg(u16),

    /// Inline constant
    Const(Const),
}

/// Binary arithmetic operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
}

impl BinOp {
    /// Lower-case mnemonic
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            BinOp::Add => "add",
            BinOp::Sub => "sub",
            BinOp::Mul => "mul",
            BinOp::Div => "div",
            BinOp::Rem => "rem",
        }
    }
}

/// Comparison predicate
///
/// Comparisons produce `I64(1)` or `I64(0)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CmpOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl CmpOp {
    /// The logically opposite predicate
    #[must_use]
    pub fn negated(self) -> Self {
        match self {
            CmpOp::Eq => CmpOp::Ne,
            CmpOp::Ne => CmpOp::Eq,
            CmpOp::Lt => CmpOp::Ge,
            CmpOp::Le => CmpOp::Gt,
            CmpOp::Gt => CmpOp::Le,
            CmpOp::Ge => CmpOp::Lt,
        }
    }

    /// Lower-case mnemonic
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            CmpOp::Eq => "eq",
            CmpOp::Ne => "ne",
            CmpOp::Lt => "lt",
            CmpOp::Le => "le",
            CmpOp::Gt => "gt",
            CmpOp::Ge => "ge",
        }
    }
}

/// A non-terminator instruction
///
/// Instructions write at most one virtual register. Side effects go through
/// slots, globals, and calls.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Instr {
    /// No operation
    ///
    /// Mutation operators that delete an instruction replace it with `Nop`
    /// so that instruction addresses stay stable.
    Nop,

    /// Copy an operand into a register
    Move { dst: u16, src: Operand },

    /// Binary arithmetic on two operands
    Bin {
        dst: u16,
        op: BinOp,
        lhs: Operand,
        rhs: Operand,
    },

    /// Compare two operands, producing 0 or 1
    Cmp {
        dst: u16,
        op: CmpOp,
        lhs: Operand,
        rhs: Operand,
    },

    /// Load a local slot into a register
    Load { dst: u16, slot: u16 },

    /// Store an operand into a local slot
    Store { slot: u16, value: Operand },

    /// Load a module global by name
    LoadGlobal { dst: u16, name: String },

    /// Store an operand into a module global by name
    StoreGlobal { name: String, value: Operand },

    /// Direct call by symbol name
    ///
    /// The callee is resolved at execution time: first against the linked
    /// image, then through the image's symbol resolver.
    Call {
        dst: Option<u16>,
        callee: String,
        args: Vec<Operand>,
    },

    /// Indirect call through a `Func` value
    CallIndirect {
        dst: Option<u16>,
        callee: Operand,
        args: Vec<Operand>,
    },
}

impl Instr {
    /// True for direct calls to the given symbol
    #[must_use]
    pub fn is_call_to(&self, symbol: &str) -> bool {
        matches!(self, Instr::Call { callee, .. } if callee == symbol)
    }
}

/// A block terminator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Terminator {
    /// Return from the function, optionally with a value
    Ret(Option<Operand>),

    /// Unconditional branch to a block index
    Br(usize),

    /// Two-way branch on a truthy condition
    CondBr {
        cond: Operand,
        then_block: usize,
        else_block: usize,
    },

    /// Trap: reaching this terminator aborts execution
    Unreachable,
}

impl Terminator {
    /// True if this terminator leaves the function
    #[must_use]
    pub fn is_ret(&self) -> bool {
        matches!(self, Terminator::Ret(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cmp_negation_is_involutive() {
        for op in [CmpOp::Eq, CmpOp::Ne, CmpOp::Lt, CmpOp::Le, CmpOp::Gt, CmpOp::Ge] {
            assert_ne!(op, op.negated());
            assert_eq!(op, op.negated().negated());
        }
    }

    #[test]
    fn call_matching() {
        let call = Instr::Call {
            dst: None,
            callee: "helper".to_string(),
            args: Vec::new(),
        };
        assert!(call.is_call_to("helper"));
        assert!(!call.is_call_to("other"));
        assert!(!Instr::Nop.is_call_to("helper"));
    }

    #[test]
    fn const_type_names() {
        assert_eq!(Const::I64(1).type_name(), "i64");
        assert_eq!(Const::Func("f".to_string()).type_name(), "func");
    }
}
