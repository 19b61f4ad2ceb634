//! Driver configuration
//!
//! `Config` is a plain value object: parsing it out of YAML or flags is the
//! front end's business. The helpers here only read the newline-delimited
//! list files the configuration points at and validate the whole object,
//! collecting every mistake instead of stopping at the first.

use std::io;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

/// Default per-test wall-clock timeout in milliseconds
pub const DEFAULT_TIMEOUT_MS: u64 = 3000;

/// Default cap on testee call-graph distance
pub const DEFAULT_MAX_DISTANCE: u32 = 128;

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The bitcode file list was not specified
    #[error("bitcode_file_list parameter is not specified")]
    MissingBitcodeList,

    /// A list file does not exist
    #[error("{field} parameter points to a non-existing file: {path}")]
    ListFileNotFound {
        field: &'static str,
        path: PathBuf,
    },

    /// A list file could not be read
    #[error("cannot read {field} file {path}: {source}")]
    ListFileUnreadable {
        field: &'static str,
        path: PathBuf,
        source: io::Error,
    },

    /// The timeout is zero
    #[error("timeout must be greater than zero")]
    ZeroTimeout,

    /// The custom framework is selected but no custom tests are given
    #[error("test_framework is CustomTest but custom_tests is empty")]
    NoCustomTests,
}

/// Result type for configuration operations
pub type ConfigResult<T> = Result<T, ConfigError>;

/// The test framework the driver adapts to
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
pub enum TestFramework {
    /// Free functions with a `test_` name prefix
    SimpleTest,

    /// xUnit-style framework with constructor-registered tests
    #[default]
    GoogleTest,

    /// Explicitly configured entry points
    CustomTest,
}

/// An explicitly configured test entry point
#[derive(Debug, Clone, Deserialize)]
pub struct CustomTestDef {
    /// Display name of the test
    pub name: String,

    /// Entry function symbol; defaults to `main`
    #[serde(default = "default_custom_method")]
    pub method: String,

    /// Arguments appended after the program name
    #[serde(default)]
    pub arguments: Vec<String>,
}

fn default_custom_method() -> String {
    "main".to_string()
}

/// Driver configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Path to a newline-delimited list of module paths
    pub bitcode_file_list: PathBuf,

    /// Path to a newline-delimited list of side-library module paths
    pub dynamic_library_file_list: Option<PathBuf>,

    /// Project name, passed through to the reporter
    pub project_name: String,

    /// Selected test framework
    pub test_framework: TestFramework,

    /// Enabled mutation operator ids, in registry order
    pub mutation_operators: Vec<String>,

    /// Test-name allowlist patterns; empty means all tests
    pub tests: Vec<String>,

    /// Substrings excluding functions from testee selection
    pub exclude_locations: Vec<String>,

    /// Entry points for the custom framework
    pub custom_tests: Vec<CustomTestDef>,

    /// Run tests in forked children; inline when false
    pub fork: bool,

    /// Skip mutant execution, recording `DryRun` results
    pub dry_run: bool,

    /// Permit reading the object cache
    pub use_cache: bool,

    /// Passed through to the reporter
    pub emit_debug_info: bool,

    /// Per-test wall-clock timeout in milliseconds
    pub timeout: u64,

    /// Testee call-graph distance cap
    pub max_distance: u32,

    /// Object cache location
    pub cache_directory: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bitcode_file_list: PathBuf::new(),
            dynamic_library_file_list: None,
            project_name: String::new(),
            test_framework: TestFramework::default(),
            mutation_operators: Vec::new(),
            tests: Vec::new(),
            exclude_locations: Vec::new(),
            custom_tests: Vec::new(),
            fork: true,
            dry_run: false,
            use_cache: true,
            emit_debug_info: false,
            timeout: DEFAULT_TIMEOUT_MS,
            max_distance: DEFAULT_MAX_DISTANCE,
            cache_directory: PathBuf::from("/tmp/mutiny_cache"),
        }
    }
}

impl Config {
    /// Module paths from the bitcode list file
    pub fn bitcode_paths(&self) -> ConfigResult<Vec<PathBuf>> {
        read_path_list(&self.bitcode_file_list, "bitcode_file_list")
    }

    /// Side-library paths from the dynamic library list file, if configured
    pub fn dynamic_library_paths(&self) -> ConfigResult<Vec<PathBuf>> {
        match &self.dynamic_library_file_list {
            Some(path) => read_path_list(path, "dynamic_library_file_list"),
            None => Ok(Vec::new()),
        }
    }

    /// Check the configuration, returning every problem found
    pub fn validate(&self) -> Vec<ConfigError> {
        let mut errors = Vec::new();

        if self.bitcode_file_list.as_os_str().is_empty() {
            errors.push(ConfigError::MissingBitcodeList);
        } else if !self.bitcode_file_list.exists() {
            errors.push(ConfigError::ListFileNotFound {
                field: "bitcode_file_list",
                path: self.bitcode_file_list.clone(),
            });
        }

        if let Some(path) = &self.dynamic_library_file_list {
            if !path.exists() {
                errors.push(ConfigError::ListFileNotFound {
                    field: "dynamic_library_file_list",
                    path: path.clone(),
                });
            }
        }

        if self.timeout == 0 {
            errors.push(ConfigError::ZeroTimeout);
        }

        if self.test_framework == TestFramework::CustomTest && self.custom_tests.is_empty() {
            errors.push(ConfigError::NoCustomTests);
        }

        errors
    }
}

/// Read a newline-delimited path list, skipping blanks and `#` comments
fn read_path_list(path: &Path, field: &'static str) -> ConfigResult<Vec<PathBuf>> {
    let contents =
        std::fs::read_to_string(path).map_err(|source| ConfigError::ListFileUnreadable {
            field,
            path: path.to_path_buf(),
            source,
        })?;

    Ok(contents
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(PathBuf::from)
        .collect())
}
