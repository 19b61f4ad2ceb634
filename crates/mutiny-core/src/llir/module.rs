//! LLIR modules: translation units with functions, globals, and constructors

use serde::{Deserialize, Serialize};

use super::function::Function;
use super::instr::Const;

/// Stable identity of a module
///
/// Loaders conventionally use the source path. Identity survives cloning:
/// a mutated clone reports the same id as its original, which is what lets
/// the driver swap the matching object file out of the baseline set.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ModuleId(String);

impl ModuleId {
    /// Create a module id
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The id as a string
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ModuleId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A module-level global variable
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Global {
    /// Symbol name, unique within the module
    pub name: String,

    /// Initial value
    pub init: Const,
}

/// A translation unit of LLIR
///
/// All data is owned, so `Clone` produces the independent deep copy that
/// mutation needs; there is no shared compilation context to detach from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Module {
    id: ModuleId,

    /// Functions in declaration order
    pub functions: Vec<Function>,

    /// Module globals
    pub globals: Vec<Global>,

    /// Constructor function names, in registration order
    ///
    /// The analogue of `llvm.global_ctors`: each name must refer to a
    /// defined zero-argument function in this module.
    pub ctors: Vec<String>,
}

impl Module {
    /// Create an empty module
    #[must_use]
    pub fn new(id: ModuleId) -> Self {
        Self {
            id,
            functions: Vec::new(),
            globals: Vec::new(),
            ctors: Vec::new(),
        }
    }

    /// The module's stable identity
    #[must_use]
    pub fn id(&self) -> &ModuleId {
        &self.id
    }

    /// Look up a function by name
    #[must_use]
    pub fn function_named(&self, name: &str) -> Option<(usize, &Function)> {
        self.functions
            .iter()
            .enumerate()
            .find(|(_, f)| f.name == name)
    }

    /// Iterate defined (non-declaration) functions with their indices
    pub fn defined_functions(&self) -> impl Iterator<Item = (usize, &Function)> {
        self.functions
            .iter()
            .enumerate()
            .filter(|(_, f)| !f.is_declaration())
    }

    /// True if the module declares or defines the given symbol
    #[must_use]
    pub fn has_symbol(&self, name: &str) -> bool {
        self.function_named(name).is_some()
    }
}
