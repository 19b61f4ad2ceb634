//! In-process linking and execution of object files
//!
//! The engine stands where an in-process JIT linker would: it loads object
//! sets into scoped images, resolves symbols by mangled name, runs static
//! constructors, invokes functions, and drains registered destructors when
//! an image is removed.
//!
//! # Symbol resolution
//!
//! A symbol referenced by executing code resolves in this order:
//!
//! 1. the linked image itself
//! 2. the C++ runtime overrides: `__cxa_atexit` lands in the image's own
//!    destructor table instead of the host's atexit chain, `__dso_handle`
//!    yields an image-local token, and the personality routine is a no-op
//! 3. the adapter-supplied [`SymbolResolver`]
//! 4. the host symbol table (call-tree probes and builtins)
//! 5. permanently loaded library images
//!
//! An unresolved symbol aborts the lookup; inside a sandboxed child that
//! surfaces as a crashed run, which is the intended containment.

mod executor;
mod host;
mod image;
mod mangler;
mod value;

pub use image::{AtExitEntry, FuncAddr, ImageHandle};
pub use mangler::{DataLayout, Mangler, ManglingScheme};
pub use value::Value;

use std::rc::Rc;
use std::sync::Arc;

use thiserror::Error;

use executor::Executor;
use host::HostRegistry;
use image::LinkedImage;

use crate::toolchain::ObjectFile;

/// A hard fault raised by executing code
#[derive(Debug, Error)]
pub enum Trap {
    /// A referenced symbol resolved nowhere
    #[error("unresolved symbol: {0}")]
    UnresolvedSymbol(String),

    /// Call with the wrong number of arguments
    #[error("function {function}: expected {expected} arguments, got {got}")]
    ArityMismatch {
        function: String,
        expected: u16,
        got: usize,
    },

    /// Operand types do not fit the operation
    #[error("type error: {operation} on {lhs} and {rhs}")]
    TypeError {
        operation: &'static str,
        lhs: &'static str,
        rhs: &'static str,
    },

    /// Branch condition was not an integer
    #[error("branch condition must be an i64, got {got}")]
    InvalidCondition { got: &'static str },

    /// Integer division or remainder by zero
    #[error("division by zero")]
    DivideByZero,

    /// Call stack exceeded its depth bound
    #[error("call depth exceeded")]
    CallDepthExceeded,

    /// Access to a global no linked object defines
    #[error("unknown global: {0}")]
    UnknownGlobal(String),

    /// Indirect call through a non-function value
    #[error("value of type {got} is not callable")]
    NotCallable { got: &'static str },

    /// An `unreachable` terminator was executed
    #[error("unreachable executed in {function}")]
    UnreachableExecuted { function: String },

    /// A host builtin rejected its arguments
    #[error("host symbol {symbol}: {message}")]
    HostFault {
        symbol: &'static str,
        message: String,
    },

    /// Executed code called `abort`
    #[error("abort called")]
    Aborted,
}

/// Errors from engine operations
#[derive(Debug, Error)]
pub enum EngineError {
    /// `find` failed; fatal by contract
    #[error("can't find symbol: {0}")]
    SymbolNotFound(String),

    /// A handle that was never issued or already removed
    #[error("invalid image handle")]
    InvalidHandle,

    /// Executed code trapped
    #[error(transparent)]
    Trap(#[from] Trap),
}

/// Result type for engine operations
pub type EngineResult<T> = Result<T, EngineError>;

/// A host-side symbol implementation
pub type HostFn = Rc<dyn Fn(&[Value]) -> Result<Value, Trap>>;

/// Answers external symbol lookups for one image
///
/// Adapters pass a resolver per object set; it is consulted after the C++
/// runtime overrides and before the host symbol table.
pub trait SymbolResolver {
    /// Resolve a mangled symbol name
    fn resolve(&self, mangled: &str) -> Option<HostFn>;
}

/// A resolver contributing nothing beyond the built-in chain
#[derive(Debug, Default)]
pub struct NullResolver;

impl SymbolResolver for NullResolver {
    fn resolve(&self, _mangled: &str) -> Option<HostFn> {
        None
    }
}

/// Resolution target for a symbol external to an image
pub(crate) enum ExternalTarget<'a> {
    /// The `__cxa_atexit` override
    AtExit,

    /// The `__dso_handle` override
    DsoHandle,

    /// A host-side implementation
    Host(HostFn),

    /// A function inside a permanently loaded library
    Permanent(&'a LinkedImage, FuncAddr),
}

/// The in-process linker and executor
pub struct Engine {
    mangler: Mangler,
    host: HostRegistry,
    permanent: Vec<LinkedImage>,
    images: Vec<Option<LinkedImage>>,
    atexit_symbol: String,
    dso_symbol: String,
    personality_symbol: String,
    personality_noop: HostFn,
}

impl Engine {
    /// Create an engine for the given target layout
    #[must_use]
    pub fn new(layout: DataLayout) -> Self {
        let mangler = Mangler::new(layout);
        let host = HostRegistry::new(|name| mangler.mangle(name));
        let atexit_symbol = mangler.mangle("__cxa_atexit");
        let dso_symbol = mangler.mangle("__dso_handle");
        let personality_symbol = mangler.mangle("__gxx_personality_v0");

        Self {
            mangler,
            host,
            permanent: Vec::new(),
            images: Vec::new(),
            atexit_symbol,
            dso_symbol,
            personality_symbol,
            personality_noop: Rc::new(|_| Ok(Value::Unit)),
        }
    }

    /// The engine's mangler
    #[must_use]
    pub fn mangler(&self) -> &Mangler {
        &self.mangler
    }

    /// Add a host symbol visible to all images
    pub fn register_host_symbol(&mut self, name: &str, symbol: HostFn) {
        self.host.register(self.mangler.mangle(name), symbol);
    }

    /// Link a library whose symbols stay visible for the engine's lifetime
    ///
    /// The analogue of loading a dynamic library with global visibility:
    /// later images resolve against it, but it is never unloaded.
    pub fn load_library_permanently(&mut self, objects: Vec<Arc<ObjectFile>>) {
        let image = LinkedImage::link(objects, None, |name| self.mangler.mangle(name));
        self.permanent.push(image);
    }

    /// Load an object set and return its scoped handle
    pub fn add_object_set(
        &mut self,
        objects: Vec<Arc<ObjectFile>>,
        resolver: Box<dyn SymbolResolver>,
    ) -> ImageHandle {
        let image = LinkedImage::link(objects, Some(resolver), |name| self.mangler.mangle(name));
        self.images.push(Some(image));
        ImageHandle(self.images.len() - 1)
    }

    /// Look up a function by unmangled name; absence is fatal
    pub fn find(&self, handle: ImageHandle, name: &str) -> EngineResult<FuncAddr> {
        let image = self.image(handle)?;
        let mangled = self.mangler.mangle(name);
        image
            .lookup(&mangled)
            .ok_or(EngineError::SymbolNotFound(mangled))
    }

    /// Run static constructors in registration order
    ///
    /// Each constructor is invoked with no arguments; its conventional
    /// integer return is discarded.
    pub fn run_static_ctors(&self, handle: ImageHandle, ctors: &[FuncAddr]) -> EngineResult<()> {
        let image = self.image(handle)?;
        for &ctor in ctors {
            Executor::new(self).call(image, ctor, &[])?;
        }
        Ok(())
    }

    /// Invoke a function by address
    pub fn call(
        &self,
        handle: ImageHandle,
        addr: FuncAddr,
        args: &[Value],
    ) -> EngineResult<Value> {
        let image = self.image(handle)?;
        Ok(Executor::new(self).call(image, addr, args)?)
    }

    /// Invoke a function by unmangled name
    pub fn call_by_name(
        &self,
        handle: ImageHandle,
        name: &str,
        args: &[Value],
    ) -> EngineResult<Value> {
        let addr = self.find(handle, name)?;
        self.call(handle, addr, args)
    }

    /// Drain the image's destructors (LIFO) and unload it
    pub fn remove(&mut self, handle: ImageHandle) -> EngineResult<()> {
        let image = self
            .images
            .get_mut(handle.0)
            .and_then(Option::take)
            .ok_or(EngineError::InvalidHandle)?;
        self.drain_atexit(&image);
        Ok(())
    }

    fn drain_atexit(&self, image: &LinkedImage) {
        while let Some(entry) = image.pop_atexit() {
            let Value::Func(name) = entry.func else {
                continue;
            };
            let outcome = Executor::new(self).invoke_symbol(image, &name, vec![entry.arg]);
            if let Err(trap) = outcome {
                log::warn!("destructor {name} failed: {trap}");
            }
        }
    }

    fn image(&self, handle: ImageHandle) -> EngineResult<&LinkedImage> {
        self.images
            .get(handle.0)
            .and_then(Option::as_ref)
            .ok_or(EngineError::InvalidHandle)
    }

    /// Resolve a symbol external to the image
    pub(crate) fn resolve_external<'a>(
        &'a self,
        image: &LinkedImage,
        mangled: &str,
    ) -> Option<ExternalTarget<'a>> {
        if mangled == self.atexit_symbol {
            return Some(ExternalTarget::AtExit);
        }
        if mangled == self.dso_symbol {
            return Some(ExternalTarget::DsoHandle);
        }
        if mangled == self.personality_symbol {
            return Some(ExternalTarget::Host(Rc::clone(&self.personality_noop)));
        }

        if let Some(symbol) = image.resolver().and_then(|r| r.resolve(mangled)) {
            return Some(ExternalTarget::Host(symbol));
        }

        if let Some(symbol) = self.host.lookup(mangled) {
            return Some(ExternalTarget::Host(symbol));
        }

        for library in &self.permanent {
            if let Some(addr) = library.lookup(mangled) {
                return Some(ExternalTarget::Permanent(library, addr));
            }
        }

        None
    }
}
