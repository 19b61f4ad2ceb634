//! Module loading seam
//!
//! Producing LLIR from disk is a collaborator concern; the driver only
//! depends on the `Loader` trait. `StaticLoader` serves prebuilt modules by
//! path so that pipelines can be driven entirely from tests.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::llir::Module;

/// Errors produced while loading modules
#[derive(Debug, Error)]
pub enum LoadError {
    /// No module is available for a requested path
    #[error("no module available for path: {0}")]
    NotFound(PathBuf),

    /// The underlying loader failed
    #[error("loader failure for {path}: {message}")]
    Backend { path: PathBuf, message: String },
}

/// Result type for loading operations
pub type LoadResult<T> = Result<T, LoadError>;

/// Produces LLIR modules for a set of paths
pub trait Loader {
    /// Load every listed module, in list order
    fn load_modules(&mut self, paths: &[PathBuf]) -> LoadResult<Vec<Module>>;
}

/// A loader backed by an in-memory path → module map
#[derive(Debug, Default)]
pub struct StaticLoader {
    modules: HashMap<PathBuf, Module>,
}

impl StaticLoader {
    /// Create an empty loader
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a module under a path
    pub fn insert(&mut self, path: impl Into<PathBuf>, module: Module) {
        self.modules.insert(path.into(), module);
    }

    /// Register a module under its own id, used as the path
    pub fn insert_by_id(&mut self, module: Module) {
        self.modules
            .insert(PathBuf::from(module.id().as_str()), module);
    }

    fn get(&self, path: &Path) -> LoadResult<Module> {
        self.modules
            .get(path)
            .cloned()
            .ok_or_else(|| LoadError::NotFound(path.to_path_buf()))
    }
}

impl Loader for StaticLoader {
    fn load_modules(&mut self, paths: &[PathBuf]) -> LoadResult<Vec<Module>> {
        paths.iter().map(|path| self.get(path)).collect()
    }
}
