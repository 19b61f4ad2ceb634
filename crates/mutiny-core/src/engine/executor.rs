//! Register interpreter over linked images

use super::image::{FuncAddr, LinkedImage};
use super::value::Value;
use super::{Engine, ExternalTarget, Trap};
use crate::llir::{BinOp, CmpOp, Instr, Operand, Terminator};

/// Maximum call depth before execution traps
pub(crate) const MAX_CALL_DEPTH: usize = 256;

/// Executes functions of a linked image
///
/// Stateless apart from the call-depth counter; each `call` allocates the
/// frame's registers and slots on the Rust stack side.
pub(crate) struct Executor<'e> {
    engine: &'e Engine,
    depth: usize,
}

impl<'e> Executor<'e> {
    pub(crate) fn new(engine: &'e Engine) -> Self {
        Self { engine, depth: 0 }
    }

    /// Invoke a function by symbol name, resolving through the image
    pub(crate) fn invoke_symbol(
        &mut self,
        image: &LinkedImage,
        name: &str,
        args: Vec<Value>,
    ) -> Result<Value, Trap> {
        let mangled = self.engine.mangler().mangle(name);

        if let Some(addr) = image.lookup(&mangled) {
            return self.call(image, addr, &args);
        }

        match self.engine.resolve_external(image, &mangled) {
            Some(ExternalTarget::AtExit) => register_destructor(image, &args),
            Some(ExternalTarget::DsoHandle) => Ok(Value::Ptr(image.dso_handle())),
            Some(ExternalTarget::Host(host)) => host(&args),
            Some(ExternalTarget::Permanent(library, addr)) => self.call(library, addr, &args),
            None => {
                log::error!("can't find symbol: {mangled}");
                Err(Trap::UnresolvedSymbol(mangled))
            }
        }
    }

    /// Invoke a function by address
    pub(crate) fn call(
        &mut self,
        image: &LinkedImage,
        addr: FuncAddr,
        args: &[Value],
    ) -> Result<Value, Trap> {
        if self.depth >= MAX_CALL_DEPTH {
            return Err(Trap::CallDepthExceeded);
        }
        self.depth += 1;
        let result = self.run_frame(image, addr, args);
        self.depth -= 1;
        result
    }

    fn run_frame(
        &mut self,
        image: &LinkedImage,
        addr: FuncAddr,
        args: &[Value],
    ) -> Result<Value, Trap> {
        let function = image.function(addr);

        if args.len() != function.params as usize {
            return Err(Trap::ArityMismatch {
                function: function.name.clone(),
                expected: function.params,
                got: args.len(),
            });
        }

        let mut regs = vec![Value::Unit; function.regs as usize];
        let mut slots = vec![Value::Unit; function.slots as usize];
        let mut block_index = 0usize;

        loop {
            let block = &function.blocks[block_index];

            for instr in &block.instrs {
                self.step(image, instr, args, &mut regs, &mut slots)?;
            }

            match &block.terminator {
                Terminator::Ret(value) => {
                    return Ok(match value {
                        Some(operand) => eval(operand, args, &regs),
                        None => Value::Unit,
                    });
                }
                Terminator::Br(target) => block_index = *target,
                Terminator::CondBr {
                    cond,
                    then_block,
                    else_block,
                } => {
                    let cond = eval(cond, args, &regs);
                    let taken = cond.as_i64().ok_or(Trap::InvalidCondition {
                        got: cond.type_name(),
                    })? != 0;
                    block_index = if taken { *then_block } else { *else_block };
                }
                Terminator::Unreachable => {
                    return Err(Trap::UnreachableExecuted {
                        function: function.name.clone(),
                    });
                }
            }
        }
    }

    fn step(
        &mut self,
        image: &LinkedImage,
        instr: &Instr,
        args: &[Value],
        regs: &mut [Value],
        slots: &mut [Value],
    ) -> Result<(), Trap> {
        match instr {
            Instr::Nop => {}
            Instr::Move { dst, src } => {
                regs[*dst as usize] = eval(src, args, regs);
            }
            Instr::Bin { dst, op, lhs, rhs } => {
                let lhs = eval(lhs, args, regs);
                let rhs = eval(rhs, args, regs);
                regs[*dst as usize] = binary(*op, &lhs, &rhs)?;
            }
            Instr::Cmp { dst, op, lhs, rhs } => {
                let lhs = eval(lhs, args, regs);
                let rhs = eval(rhs, args, regs);
                regs[*dst as usize] = compare(*op, &lhs, &rhs)?;
            }
            Instr::Load { dst, slot } => {
                regs[*dst as usize] = slots[*slot as usize].clone();
            }
            Instr::Store { slot, value } => {
                slots[*slot as usize] = eval(value, args, regs);
            }
            Instr::LoadGlobal { dst, name } => {
                regs[*dst as usize] = image
                    .load_global(name)
                    .ok_or_else(|| Trap::UnknownGlobal(name.clone()))?;
            }
            Instr::StoreGlobal { name, value } => {
                let value = eval(value, args, regs);
                if !image.store_global(name, value) {
                    return Err(Trap::UnknownGlobal(name.clone()));
                }
            }
            Instr::Call { dst, callee, args: call_args } => {
                let call_args: Vec<Value> =
                    call_args.iter().map(|a| eval(a, args, regs)).collect();
                let result = self.invoke_symbol(image, callee, call_args)?;
                if let Some(dst) = dst {
                    regs[*dst as usize] = result;
                }
            }
            Instr::CallIndirect { dst, callee, args: call_args } => {
                let callee = eval(callee, args, regs);
                let Value::Func(name) = callee else {
                    return Err(Trap::NotCallable {
                        got: callee.type_name(),
                    });
                };
                let call_args: Vec<Value> =
                    call_args.iter().map(|a| eval(a, args, regs)).collect();
                let result = self.invoke_symbol(image, &name, call_args)?;
                if let Some(dst) = dst {
                    regs[*dst as usize] = result;
                }
            }
        }
        Ok(())
    }
}

/// The `__cxa_atexit` override: record `(destructor, argument)` into the
/// image's table and report success
fn register_destructor(image: &LinkedImage, args: &[Value]) -> Result<Value, Trap> {
    let func = args.first().cloned().unwrap_or(Value::Unit);
    if !matches!(func, Value::Func(_)) {
        return Err(Trap::HostFault {
            symbol: "__cxa_atexit",
            message: format!("destructor must be a function reference, got {}", func.type_name()),
        });
    }
    let arg = args.get(1).cloned().unwrap_or(Value::Unit);
    image.register_atexit(func, arg);
    Ok(Value::I64(0))
}

fn eval(operand: &Operand, args: &[Value], regs: &[Value]) -> Value {
    match operand {
        Operand::Reg(index) => regs[*index as usize].clone(),
        Operand::Arg(index) => args[*index as usize].clone(),
        Operand::Const(constant) => Value::from_const(constant),
    }
}

fn binary(op: BinOp, lhs: &Value, rhs: &Value) -> Result<Value, Trap> {
    match (lhs, rhs) {
        (Value::I64(a), Value::I64(b)) => {
            let result = match op {
                BinOp::Add => a.wrapping_add(*b),
                BinOp::Sub => a.wrapping_sub(*b),
                BinOp::Mul => a.wrapping_mul(*b),
                BinOp::Div => {
                    if *b == 0 {
                        return Err(Trap::DivideByZero);
                    }
                    a.wrapping_div(*b)
                }
                BinOp::Rem => {
                    if *b == 0 {
                        return Err(Trap::DivideByZero);
                    }
                    a.wrapping_rem(*b)
                }
            };
            Ok(Value::I64(result))
        }
        (Value::F64(a), Value::F64(b)) => {
            let result = match op {
                BinOp::Add => a + b,
                BinOp::Sub => a - b,
                BinOp::Mul => a * b,
                BinOp::Div => a / b,
                BinOp::Rem => a % b,
            };
            Ok(Value::F64(result))
        }
        _ => Err(Trap::TypeError {
            operation: op.name(),
            lhs: lhs.type_name(),
            rhs: rhs.type_name(),
        }),
    }
}

fn compare(op: CmpOp, lhs: &Value, rhs: &Value) -> Result<Value, Trap> {
    let result = match (lhs, rhs) {
        (Value::I64(a), Value::I64(b)) => match op {
            CmpOp::Eq => a == b,
            CmpOp::Ne => a != b,
            CmpOp::Lt => a < b,
            CmpOp::Le => a <= b,
            CmpOp::Gt => a > b,
            CmpOp::Ge => a >= b,
        },
        (Value::F64(a), Value::F64(b)) => match op {
            CmpOp::Eq => a == b,
            CmpOp::Ne => a != b,
            CmpOp::Lt => a < b,
            CmpOp::Le => a <= b,
            CmpOp::Gt => a > b,
            CmpOp::Ge => a >= b,
        },
        (Value::Str(a), Value::Str(b)) => match op {
            CmpOp::Eq => a == b,
            CmpOp::Ne => a != b,
            CmpOp::Lt => a < b,
            CmpOp::Le => a <= b,
            CmpOp::Gt => a > b,
            CmpOp::Ge => a >= b,
        },
        _ => {
            return Err(Trap::TypeError {
                operation: op.name(),
                lhs: lhs.type_name(),
                rhs: rhs.type_name(),
            });
        }
    };
    Ok(Value::I64(i64::from(result)))
}
