//! Fluent construction of LLIR modules
//!
//! Builders keep fixture and loader code readable: registers are allocated
//! implicitly, blocks start with an `Unreachable` placeholder terminator that
//! the caller replaces with `ret`/`br`/`cond_br`.

use super::function::{Block, Function};
use super::instr::{BinOp, CmpOp, Const, Instr, Operand, Terminator};
use super::module::{Global, Module, ModuleId};

/// Integer constant operand
#[must_use]
pub fn imm(value: i64) -> Operand {
    Operand::Const(Const::I64(value))
}

/// Register operand
#[must_use]
pub fn reg(index: u16) -> Operand {
    Operand::Reg(index)
}

/// Argument operand
#[must_use]
pub fn arg(index: u16) -> Operand {
    Operand::Arg(index)
}

/// String constant operand
#[must_use]
pub fn text(value: impl Into<String>) -> Operand {
    Operand::Const(Const::Str(value.into()))
}

/// Function-reference constant operand
#[must_use]
pub fn func_ref(name: impl Into<String>) -> Operand {
    Operand::Const(Const::Func(name.into()))
}

/// Builds a module function by function
pub struct ModuleBuilder {
    module: Module,
}

impl ModuleBuilder {
    /// Start a module with the given id
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            module: Module::new(ModuleId::new(id)),
        }
    }

    /// Add a global with an initial value
    #[must_use]
    pub fn global(mut self, name: impl Into<String>, init: Const) -> Self {
        self.module.globals.push(Global {
            name: name.into(),
            init,
        });
        self
    }

    /// Register a constructor by function name
    #[must_use]
    pub fn ctor(mut self, name: impl Into<String>) -> Self {
        self.module.ctors.push(name.into());
        self
    }

    /// Add an external declaration
    #[must_use]
    pub fn declare(mut self, name: impl Into<String>, params: u16) -> Self {
        self.module.functions.push(Function::declaration(name, params));
        self
    }

    /// Define a function; the closure fills in its body
    #[must_use]
    pub fn define(
        mut self,
        name: impl Into<String>,
        params: u16,
        body: impl FnOnce(&mut FunctionBuilder),
    ) -> Self {
        let mut builder = FunctionBuilder::new(params);
        body(&mut builder);
        self.module.functions.push(builder.finish(name.into()));
        self
    }

    /// Finish the module
    #[must_use]
    pub fn build(self) -> Module {
        self.module
    }
}

/// Builds a single function body
pub struct FunctionBuilder {
    params: u16,
    next_reg: u16,
    next_slot: u16,
    blocks: Vec<Block>,
    current: usize,
}

impl FunctionBuilder {
    fn new(params: u16) -> Self {
        Self {
            params,
            next_reg: 0,
            next_slot: 0,
            blocks: vec![Block::new(Terminator::Unreachable)],
            current: 0,
        }
    }

    fn fresh_reg(&mut self) -> u16 {
        let reg = self.next_reg;
        self.next_reg += 1;
        reg
    }

    fn push(&mut self, instr: Instr) {
        self.blocks[self.current].instrs.push(instr);
    }

    /// Allocate a local slot
    pub fn slot(&mut self) -> u16 {
        let slot = self.next_slot;
        self.next_slot += 1;
        slot
    }

    /// Create a new block and return its index; emission continues in the
    /// current block until `switch_to`
    pub fn new_block(&mut self) -> usize {
        self.blocks.push(Block::new(Terminator::Unreachable));
        self.blocks.len() - 1
    }

    /// Continue emission in the given block
    pub fn switch_to(&mut self, block: usize) {
        self.current = block;
    }

    /// Copy an operand into a fresh register
    pub fn mov(&mut self, src: Operand) -> u16 {
        let dst = self.fresh_reg();
        self.push(Instr::Move { dst, src });
        dst
    }

    /// Emit a binary operation
    pub fn bin(&mut self, op: BinOp, lhs: Operand, rhs: Operand) -> u16 {
        let dst = self.fresh_reg();
        self.push(Instr::Bin { dst, op, lhs, rhs });
        dst
    }

    /// Emit a comparison
    pub fn cmp(&mut self, op: CmpOp, lhs: Operand, rhs: Operand) -> u16 {
        let dst = self.fresh_reg();
        self.push(Instr::Cmp { dst, op, lhs, rhs });
        dst
    }

    /// Load a local slot
    pub fn load(&mut self, slot: u16) -> u16 {
        let dst = self.fresh_reg();
        self.push(Instr::Load { dst, slot });
        dst
    }

    /// Store into a local slot
    pub fn store(&mut self, slot: u16, value: Operand) {
        self.push(Instr::Store { slot, value });
    }

    /// Load a global by name
    pub fn load_global(&mut self, name: impl Into<String>) -> u16 {
        let dst = self.fresh_reg();
        self.push(Instr::LoadGlobal {
            dst,
            name: name.into(),
        });
        dst
    }

    /// Store into a global by name
    pub fn store_global(&mut self, name: impl Into<String>, value: Operand) {
        self.push(Instr::StoreGlobal {
            name: name.into(),
            value,
        });
    }

    /// Emit a direct call whose result lands in a fresh register
    pub fn call(&mut self, callee: impl Into<String>, args: Vec<Operand>) -> u16 {
        let dst = self.fresh_reg();
        self.push(Instr::Call {
            dst: Some(dst),
            callee: callee.into(),
            args,
        });
        dst
    }

    /// Emit a direct call discarding the result
    pub fn call_void(&mut self, callee: impl Into<String>, args: Vec<Operand>) {
        self.push(Instr::Call {
            dst: None,
            callee: callee.into(),
            args,
        });
    }

    /// Emit an indirect call through a `Func` value
    pub fn call_indirect(&mut self, callee: Operand, args: Vec<Operand>) -> u16 {
        let dst = self.fresh_reg();
        self.push(Instr::CallIndirect {
            dst: Some(dst),
            callee,
            args,
        });
        dst
    }

    /// Terminate the current block with a return
    pub fn ret(&mut self, value: Option<Operand>) {
        self.blocks[self.current].terminator = Terminator::Ret(value);
    }

    /// Terminate the current block with an unconditional branch
    pub fn br(&mut self, target: usize) {
        self.blocks[self.current].terminator = Terminator::Br(target);
    }

    /// Terminate the current block with a conditional branch
    pub fn cond_br(&mut self, cond: Operand, then_block: usize, else_block: usize) {
        self.blocks[self.current].terminator = Terminator::CondBr {
            cond,
            then_block,
            else_block,
        };
    }

    fn finish(self, name: String) -> Function {
        Function {
            name,
            params: self.params,
            regs: self.next_reg,
            slots: self.next_slot,
            blocks: self.blocks,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_straight_line_function() {
        let module = ModuleBuilder::new("m")
            .define("add3", 1, |f| {
                let sum = f.bin(BinOp::Add, arg(0), imm(3));
                f.ret(Some(reg(sum)));
            })
            .build();

        let (_, func) = module.function_named("add3").unwrap();
        assert_eq!(func.params, 1);
        assert_eq!(func.regs, 1);
        assert_eq!(func.blocks.len(), 1);
        assert!(func.blocks[0].terminator.is_ret());
    }

    #[test]
    fn builds_branching_function() {
        let module = ModuleBuilder::new("m")
            .define("max0", 1, |f| {
                let pos = f.new_block();
                let neg = f.new_block();
                let cond = f.cmp(CmpOp::Gt, arg(0), imm(0));
                f.cond_br(reg(cond), pos, neg);
                f.switch_to(pos);
                f.ret(Some(arg(0)));
                f.switch_to(neg);
                f.ret(Some(imm(0)));
            })
            .build();

        let (_, func) = module.function_named("max0").unwrap();
        assert_eq!(func.blocks.len(), 3);
        assert!(func.blocks[1].terminator.is_ret());
        assert!(func.blocks[2].terminator.is_ret());
    }

    #[test]
    fn records_globals_and_ctors() {
        let module = ModuleBuilder::new("m")
            .global("flag", Const::I64(0))
            .ctor("init")
            .define("init", 0, |f| {
                f.store_global("flag", imm(1));
                f.ret(None);
            })
            .build();

        assert_eq!(module.globals.len(), 1);
        assert_eq!(module.ctors, ["init"]);
    }
}
