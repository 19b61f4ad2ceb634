//! Compilation and object caching
//!
//! The `Compiler` turns an LLIR module into an `ObjectFile`: a verified,
//! frozen artifact with an extracted symbol table, ready for the engine to
//! link. `ObjectCache` is the collaborator seam for reuse between runs; the
//! bundled implementations are in-memory.

use std::collections::HashMap;
use std::sync::Arc;

use thiserror::Error;

use crate::llir::{Function, Instr, Module, ModuleId, Operand, Terminator};

/// Errors produced by module verification
#[derive(Debug, Error)]
pub enum CompileError {
    /// Two functions share a symbol name
    #[error("module {module}: duplicate symbol {name}")]
    DuplicateSymbol { module: ModuleId, name: String },

    /// Two globals share a name
    #[error("module {module}: duplicate global {name}")]
    DuplicateGlobal { module: ModuleId, name: String },

    /// An instruction references a register beyond the declared count
    #[error("function {function}: register r{register} out of bounds ({count} declared)")]
    InvalidRegister {
        function: String,
        register: u16,
        count: u16,
    },

    /// An instruction references a slot beyond the declared count
    #[error("function {function}: slot {slot} out of bounds ({count} declared)")]
    InvalidSlot {
        function: String,
        slot: u16,
        count: u16,
    },

    /// An operand references an argument beyond the parameter count
    #[error("function {function}: argument {argument} out of bounds ({params} parameters)")]
    InvalidArgument {
        function: String,
        argument: u16,
        params: u16,
    },

    /// A terminator branches to a block that does not exist
    #[error("function {function}: branch to missing block {block}")]
    InvalidBlockTarget { function: String, block: usize },

    /// A registered constructor is missing or unusable
    #[error("module {module}: constructor {name} must be a defined zero-argument function")]
    InvalidCtor { module: ModuleId, name: String },
}

/// Result type for compilation
pub type CompileResult<T> = Result<T, CompileError>;

/// A loadable compilation artifact
///
/// Owns a verified module plus its symbol table. Object files are shared via
/// `Arc` between the driver's baseline set and linked images.
#[derive(Debug)]
pub struct ObjectFile {
    module: Module,
    symbols: HashMap<String, usize>,
}

impl ObjectFile {
    /// The embedded module
    #[must_use]
    pub fn module(&self) -> &Module {
        &self.module
    }

    /// Identity of the originating module
    #[must_use]
    pub fn module_id(&self) -> &ModuleId {
        self.module.id()
    }

    /// Index of a defined function by unmangled name
    #[must_use]
    pub fn symbol(&self, name: &str) -> Option<usize> {
        self.symbols.get(name).copied()
    }

    /// Iterate defined symbols
    pub fn symbols(&self) -> impl Iterator<Item = (&str, usize)> {
        self.symbols.iter().map(|(name, idx)| (name.as_str(), *idx))
    }

    /// Constructor names in registration order
    #[must_use]
    pub fn ctors(&self) -> &[String] {
        &self.module.ctors
    }

    /// Function by index
    #[must_use]
    pub fn function(&self, index: usize) -> &Function {
        &self.module.functions[index]
    }
}

/// Verifies and freezes modules into object files
#[derive(Debug, Default)]
pub struct Compiler;

impl Compiler {
    /// Create a compiler
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Verify the module and produce a loadable object file
    pub fn compile(&self, module: &Module) -> CompileResult<Arc<ObjectFile>> {
        let mut symbols = HashMap::new();

        for (index, function) in module.functions.iter().enumerate() {
            if !function.is_declaration() {
                verify_function(function)?;
                if symbols.insert(function.name.clone(), index).is_some() {
                    return Err(CompileError::DuplicateSymbol {
                        module: module.id().clone(),
                        name: function.name.clone(),
                    });
                }
            }
        }

        let mut global_names = std::collections::HashSet::new();
        for global in &module.globals {
            if !global_names.insert(global.name.as_str()) {
                return Err(CompileError::DuplicateGlobal {
                    module: module.id().clone(),
                    name: global.name.clone(),
                });
            }
        }

        for ctor in &module.ctors {
            match module.function_named(ctor) {
                Some((_, f)) if !f.is_declaration() && f.params == 0 => {}
                _ => {
                    return Err(CompileError::InvalidCtor {
                        module: module.id().clone(),
                        name: ctor.clone(),
                    });
                }
            }
        }

        Ok(Arc::new(ObjectFile {
            module: module.clone(),
            symbols,
        }))
    }
}

fn verify_function(function: &Function) -> CompileResult<()> {
    let check_reg = |register: u16| -> CompileResult<()> {
        if register >= function.regs {
            return Err(CompileError::InvalidRegister {
                function: function.name.clone(),
                register,
                count: function.regs,
            });
        }
        Ok(())
    };

    let check_operand = |operand: &Operand| -> CompileResult<()> {
        match operand {
            Operand::Reg(register) => check_reg(*register),
            Operand::Arg(argument) => {
                if *argument >= function.params {
                    return Err(CompileError::InvalidArgument {
                        function: function.name.clone(),
                        argument: *argument,
                        params: function.params,
                    });
                }
                Ok(())
            }
            Operand::Const(_) => Ok(()),
        }
    };

    let check_slot = |slot: u16| -> CompileResult<()> {
        if slot >= function.slots {
            return Err(CompileError::InvalidSlot {
                function: function.name.clone(),
                slot,
                count: function.slots,
            });
        }
        Ok(())
    };

    let check_block = |block: usize| -> CompileResult<()> {
        if block >= function.blocks.len() {
            return Err(CompileError::InvalidBlockTarget {
                function: function.name.clone(),
                block,
            });
        }
        Ok(())
    };

    for block in &function.blocks {
        for instr in &block.instrs {
            match instr {
                Instr::Nop => {}
                Instr::Move { dst, src } => {
                    check_reg(*dst)?;
                    check_operand(src)?;
                }
                Instr::Bin { dst, lhs, rhs, .. } | Instr::Cmp { dst, lhs, rhs, .. } => {
                    check_reg(*dst)?;
                    check_operand(lhs)?;
                    check_operand(rhs)?;
                }
                Instr::Load { dst, slot } => {
                    check_reg(*dst)?;
                    check_slot(*slot)?;
                }
                Instr::Store { slot, value } => {
                    check_slot(*slot)?;
                    check_operand(value)?;
                }
                Instr::LoadGlobal { dst, .. } => check_reg(*dst)?,
                Instr::StoreGlobal { value, .. } => check_operand(value)?,
                Instr::Call { dst, args, .. } => {
                    if let Some(dst) = dst {
                        check_reg(*dst)?;
                    }
                    for operand in args {
                        check_operand(operand)?;
                    }
                }
                Instr::CallIndirect { dst, callee, args } => {
                    if let Some(dst) = dst {
                        check_reg(*dst)?;
                    }
                    check_operand(callee)?;
                    for operand in args {
                        check_operand(operand)?;
                    }
                }
            }
        }

        match &block.terminator {
            Terminator::Ret(value) => {
                if let Some(operand) = value {
                    check_operand(operand)?;
                }
            }
            Terminator::Br(target) => check_block(*target)?,
            Terminator::CondBr {
                cond,
                then_block,
                else_block,
            } => {
                check_operand(cond)?;
                check_block(*then_block)?;
                check_block(*else_block)?;
            }
            Terminator::Unreachable => {}
        }
    }

    Ok(())
}

/// Object reuse between pipeline stages
///
/// Instrumented objects embed the call-tree probe address of the driver that
/// produced them, so a cache is only meaningful within the lifetime of that
/// driver instance. Implementations persisting across processes must key on
/// something that captures this.
pub trait ObjectCache {
    /// Look up the compiled object for a module
    fn get(&self, module: &Module) -> Option<Arc<ObjectFile>>;

    /// Store the compiled object for a module
    fn put(&mut self, object: Arc<ObjectFile>, module: &Module);
}

/// In-memory cache keyed by module identity
#[derive(Debug, Default)]
pub struct MemoryCache {
    objects: HashMap<ModuleId, Arc<ObjectFile>>,
}

impl MemoryCache {
    /// Create an empty cache
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl ObjectCache for MemoryCache {
    fn get(&self, module: &Module) -> Option<Arc<ObjectFile>> {
        self.objects.get(module.id()).cloned()
    }

    fn put(&mut self, object: Arc<ObjectFile>, module: &Module) {
        self.objects.insert(module.id().clone(), object);
    }
}

/// A cache that stores nothing
#[derive(Debug, Default)]
pub struct NullCache;

impl ObjectCache for NullCache {
    fn get(&self, _module: &Module) -> Option<Arc<ObjectFile>> {
        None
    }

    fn put(&mut self, _object: Arc<ObjectFile>, _module: &Module) {}
}

/// The compiler plus its cache
pub struct Toolchain {
    compiler: Compiler,
    cache: Box<dyn ObjectCache>,
}

impl Toolchain {
    /// Create a toolchain with the given cache
    #[must_use]
    pub fn new(cache: Box<dyn ObjectCache>) -> Self {
        Self {
            compiler: Compiler::new(),
            cache,
        }
    }

    /// Compile a module
    pub fn compile(&self, module: &Module) -> CompileResult<Arc<ObjectFile>> {
        self.compiler.compile(module)
    }

    /// The object cache
    #[must_use]
    pub fn cache(&self) -> &dyn ObjectCache {
        self.cache.as_ref()
    }

    /// The object cache, mutably
    pub fn cache_mut(&mut self) -> &mut dyn ObjectCache {
        self.cache.as_mut()
    }
}

impl Default for Toolchain {
    fn default() -> Self {
        Self::new(Box::new(MemoryCache::new()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llir::builder::{arg, imm, reg};
    use crate::llir::{BinOp, Const, ModuleBuilder};

    #[test]
    fn compile_extracts_defined_symbols() {
        let module = ModuleBuilder::new("m")
            .declare("external", 1)
            .define("double", 1, |f| {
                let r = f.bin(BinOp::Add, arg(0), arg(0));
                f.ret(Some(reg(r)));
            })
            .build();

        let object = Compiler::new().compile(&module).unwrap();
        assert_eq!(object.symbol("double"), Some(1));
        assert_eq!(object.symbol("external"), None);
    }

    #[test]
    fn verification_rejects_bad_register() {
        let mut module = ModuleBuilder::new("m")
            .define("f", 0, |f| {
                f.ret(Some(imm(0)));
            })
            .build();
        module.functions[0].blocks[0]
            .instrs
            .push(crate::llir::Instr::Move {
                dst: 9,
                src: imm(1),
            });

        let err = Compiler::new().compile(&module).unwrap_err();
        assert!(matches!(err, CompileError::InvalidRegister { .. }));
    }

    #[test]
    fn verification_rejects_bad_branch_target() {
        let mut module = ModuleBuilder::new("m")
            .define("f", 0, |f| {
                f.ret(None);
            })
            .build();
        module.functions[0].blocks[0].terminator = crate::llir::Terminator::Br(7);

        let err = Compiler::new().compile(&module).unwrap_err();
        assert!(matches!(err, CompileError::InvalidBlockTarget { .. }));
    }

    #[test]
    fn verification_rejects_declared_ctor() {
        let module = ModuleBuilder::new("m")
            .ctor("init")
            .declare("init", 0)
            .build();

        let err = Compiler::new().compile(&module).unwrap_err();
        assert!(matches!(err, CompileError::InvalidCtor { .. }));
    }

    #[test]
    fn memory_cache_round_trips_by_identity() {
        let module = ModuleBuilder::new("m")
            .define("f", 0, |f| f.ret(None))
            .build();
        let object = Compiler::new().compile(&module).unwrap();

        let mut cache = MemoryCache::new();
        assert!(cache.get(&module).is_none());
        cache.put(Arc::clone(&object), &module);
        assert!(Arc::ptr_eq(&cache.get(&module).unwrap(), &object));
    }

    #[test]
    fn null_cache_stores_nothing() {
        let module = ModuleBuilder::new("m")
            .global("g", Const::I64(0))
            .build();
        let object = Compiler::new().compile(&module).unwrap();

        let mut cache = NullCache;
        cache.put(object, &module);
        assert!(cache.get(&module).is_none());
    }
}
