//! Call-tree instrumentation pass
//!
//! Rewrites every defined function so that it reports entry and exit to the
//! call-tree probe: an `enter` call becomes the first instruction of the
//! entry block, and a `leave` call is appended to every block that returns.
//! The probe address travels as a pointer constant baked into the rewritten
//! code. Insertions only; nothing else about the module changes, and
//! re-running the pass over an instrumented module is a no-op.

use crate::calltree::{FunctionId, ENTER_FUNCTION_SYMBOL, LEAVE_FUNCTION_SYMBOL};
use crate::llir::{Const, Function, Instr, Module, Operand};

/// True if the function already carries the entry probe
#[must_use]
pub fn is_instrumented(function: &Function) -> bool {
    function
        .entry_block()
        .and_then(|block| block.instrs.first())
        .is_some_and(|instr| instr.is_call_to(ENTER_FUNCTION_SYMBOL))
}

/// Instrument the listed functions of a module
///
/// `functions` pairs each function index with its driver-assigned id.
/// Declarations for the probe callbacks are added once if absent.
pub fn instrument_module(module: &mut Module, functions: &[(usize, FunctionId)], probe_addr: u64) {
    for &(index, id) in functions {
        instrument_function(&mut module.functions[index], id, probe_addr);
    }

    if !module.has_symbol(ENTER_FUNCTION_SYMBOL) {
        module
            .functions
            .push(Function::declaration(ENTER_FUNCTION_SYMBOL, 2));
    }
    if !module.has_symbol(LEAVE_FUNCTION_SYMBOL) {
        module
            .functions
            .push(Function::declaration(LEAVE_FUNCTION_SYMBOL, 2));
    }
}

fn probe_call(symbol: &str, id: FunctionId, probe_addr: u64) -> Instr {
    Instr::Call {
        dst: None,
        callee: symbol.to_string(),
        args: vec![
            Operand::Const(Const::Ptr(probe_addr)),
            Operand::Const(Const::I64(id as i64)),
        ],
    }
}

fn instrument_function(function: &mut Function, id: FunctionId, probe_addr: u64) {
    if function.is_declaration() || is_instrumented(function) {
        return;
    }

    function.blocks[0]
        .instrs
        .insert(0, probe_call(ENTER_FUNCTION_SYMBOL, id, probe_addr));

    for block in &mut function.blocks {
        if block.terminator.is_ret() {
            block
                .instrs
                .push(probe_call(LEAVE_FUNCTION_SYMBOL, id, probe_addr));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llir::builder::{arg, imm, reg};
    use crate::llir::{BinOp, CmpOp, ModuleBuilder};

    fn sample_module() -> Module {
        ModuleBuilder::new("m")
            .define("leaf", 1, |f| {
                let r = f.bin(BinOp::Add, arg(0), imm(1));
                f.ret(Some(reg(r)));
            })
            .define("branchy", 1, |f| {
                let pos = f.new_block();
                let neg = f.new_block();
                let cond = f.cmp(CmpOp::Gt, arg(0), imm(0));
                f.cond_br(reg(cond), pos, neg);
                f.switch_to(pos);
                f.ret(Some(imm(1)));
                f.switch_to(neg);
                f.ret(Some(imm(0)));
            })
            .declare("external", 0)
            .build()
    }

    fn instrument_all(module: &mut Module) {
        let targets: Vec<(usize, FunctionId)> = module
            .defined_functions()
            .map(|(index, _)| index)
            .zip(1..)
            .collect();
        instrument_module(module, &targets, 0xDEAD);
    }

    #[test]
    fn inserts_enter_first_and_leave_before_every_return() {
        let mut module = sample_module();
        instrument_all(&mut module);

        let (_, leaf) = module.function_named("leaf").unwrap();
        assert!(leaf.blocks[0].instrs[0].is_call_to(ENTER_FUNCTION_SYMBOL));
        assert!(leaf.blocks[0]
            .instrs
            .last()
            .unwrap()
            .is_call_to(LEAVE_FUNCTION_SYMBOL));

        let (_, branchy) = module.function_named("branchy").unwrap();
        // The entry block does not return; only the two arms get a leave.
        assert!(branchy.blocks[0].instrs[0].is_call_to(ENTER_FUNCTION_SYMBOL));
        assert!(!branchy.blocks[0]
            .instrs
            .last()
            .unwrap()
            .is_call_to(LEAVE_FUNCTION_SYMBOL));
        for block in &branchy.blocks[1..] {
            assert!(block.instrs.last().unwrap().is_call_to(LEAVE_FUNCTION_SYMBOL));
        }
    }

    #[test]
    fn declares_probe_stubs_once() {
        let mut module = sample_module();
        instrument_all(&mut module);

        let enter = module.function_named(ENTER_FUNCTION_SYMBOL).unwrap().1;
        assert!(enter.is_declaration());
        assert_eq!(enter.params, 2);
        assert!(module.has_symbol(LEAVE_FUNCTION_SYMBOL));
    }

    #[test]
    fn pass_is_idempotent() {
        let mut once = sample_module();
        instrument_all(&mut once);

        let mut twice = once.clone();
        instrument_all(&mut twice);

        assert_eq!(once, twice);
    }

    #[test]
    fn original_instructions_are_preserved() {
        let original = sample_module();
        let mut instrumented = original.clone();
        instrument_all(&mut instrumented);

        let (_, before) = original.function_named("leaf").unwrap();
        let (_, after) = instrumented.function_named("leaf").unwrap();

        // Strip the probe calls; what remains must be the original body.
        let stripped: Vec<_> = after.blocks[0]
            .instrs
            .iter()
            .filter(|i| {
                !i.is_call_to(ENTER_FUNCTION_SYMBOL) && !i.is_call_to(LEAVE_FUNCTION_SYMBOL)
            })
            .cloned()
            .collect();
        assert_eq!(stripped, before.blocks[0].instrs);
    }

    #[test]
    fn declarations_are_not_instrumented() {
        let mut module = sample_module();
        let external_index = module.function_named("external").unwrap().0;
        instrument_module(&mut module, &[(external_index, 9)], 0xDEAD);

        assert!(module.function_named("external").unwrap().1.is_declaration());
    }
}
