//! Linked images
//!
//! An image is an object set loaded into the engine: a mangled symbol
//! table over the set's defined functions, the globals of every member
//! object, and an instance-local destructor table filled through the
//! `__cxa_atexit` override and drained LIFO when the image is removed.

use std::cell::RefCell;
use std::collections::HashMap;
use std::sync::Arc;

use super::value::Value;
use super::SymbolResolver;
use crate::llir::Function;
use crate::toolchain::ObjectFile;

/// Handle to a loaded object set
///
/// Handles are scoped: every `add_object_set` must be paired with a
/// `remove`, including on failure paths.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageHandle(pub(crate) usize);

/// Address of a function within an image
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FuncAddr {
    pub(crate) object: usize,
    pub(crate) function: usize,
}

/// One registered destructor
#[derive(Debug, Clone)]
pub struct AtExitEntry {
    /// The destructor, a `Func` value
    pub func: Value,

    /// Its argument
    pub arg: Value,
}

/// A loaded, symbol-resolved object set
pub struct LinkedImage {
    objects: Vec<Arc<ObjectFile>>,
    functions: HashMap<String, FuncAddr>,
    globals: RefCell<HashMap<String, Value>>,
    atexit: RefCell<Vec<AtExitEntry>>,
    resolver: Option<Box<dyn SymbolResolver>>,
}

impl LinkedImage {
    /// Link an object set
    ///
    /// On duplicate definitions across objects the first one wins, matching
    /// archive link order. `resolver` is `None` for permanently loaded
    /// libraries, which resolve against the host table only.
    pub(crate) fn link(
        objects: Vec<Arc<ObjectFile>>,
        resolver: Option<Box<dyn SymbolResolver>>,
        mangle: impl Fn(&str) -> String,
    ) -> Self {
        let mut functions = HashMap::new();
        let mut globals = HashMap::new();

        for (object_index, object) in objects.iter().enumerate() {
            for (name, function_index) in object.symbols() {
                functions.entry(mangle(name)).or_insert(FuncAddr {
                    object: object_index,
                    function: function_index,
                });
            }
            for global in &object.module().globals {
                globals
                    .entry(global.name.clone())
                    .or_insert_with(|| Value::from_const(&global.init));
            }
        }

        Self {
            objects,
            functions,
            globals: RefCell::new(globals),
            atexit: RefCell::new(Vec::new()),
            resolver,
        }
    }

    /// Look up a defined function by mangled name
    pub(crate) fn lookup(&self, mangled: &str) -> Option<FuncAddr> {
        self.functions.get(mangled).copied()
    }

    /// The function behind an address
    pub(crate) fn function(&self, addr: FuncAddr) -> &Function {
        self.objects[addr.object].function(addr.function)
    }

    /// The adapter-supplied resolver, if any
    pub(crate) fn resolver(&self) -> Option<&dyn SymbolResolver> {
        self.resolver.as_deref()
    }

    /// Read a global
    pub(crate) fn load_global(&self, name: &str) -> Option<Value> {
        self.globals.borrow().get(name).cloned()
    }

    /// Write a global; fails if it was never defined
    pub(crate) fn store_global(&self, name: &str, value: Value) -> bool {
        match self.globals.borrow_mut().get_mut(name) {
            Some(slot) => {
                *slot = value;
                true
            }
            None => false,
        }
    }

    /// Register a destructor through the `__cxa_atexit` override
    pub(crate) fn register_atexit(&self, func: Value, arg: Value) {
        self.atexit.borrow_mut().push(AtExitEntry { func, arg });
    }

    /// Pop the most recently registered destructor
    pub(crate) fn pop_atexit(&self) -> Option<AtExitEntry> {
        self.atexit.borrow_mut().pop()
    }

    /// The image's `__dso_handle` token
    pub(crate) fn dso_handle(&self) -> u64 {
        self.globals.as_ptr() as u64
    }
}
