//! Test representation and per-framework adapters
//!
//! A `TestRunner` is a tagged variant, one per supported framework, and the
//! dispatch is a pattern match: the framework-specific knowledge (entry
//! symbols, argv shape, constructor policy) is data plus one function per
//! variant. Every adapter follows the same contract: load the object set,
//! run the relevant static constructors, invoke the framework's entry
//! points, interpret a zero return as `Passed`, and always drain
//! destructors and unload the image, pass or fail.

mod custom;
mod finder;
mod simple;
mod xunit;

pub use finder::{discover_tests, SIMPLE_TEST_PREFIX, XUNIT_REGISTER_SYMBOL};

use std::sync::Arc;

use crate::config::{Config, TestFramework};
use crate::engine::{Engine, EngineResult, FuncAddr, ImageHandle, NullResolver};
use crate::llir::ModuleId;
use crate::sandbox::{ExecutionResult, ExecutionStatus};
use crate::toolchain::ObjectFile;

/// Default xUnit entry-symbol triple
const XUNIT_INIT_SYMBOL: &str = "xunit_init";
const XUNIT_RUN_SYMBOL: &str = "xunit_run_all";
const XUNIT_INSTANCE_SYMBOL: &str = "xunit_instance";

/// A function a test needs, located by module and index
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FunctionRef {
    /// Owning module
    pub module: ModuleId,

    /// Function index within the module
    pub function: usize,

    /// Unmangled symbol name
    pub name: String,
}

/// Which framework a test belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TestKind {
    Simple,
    XUnit,
    Custom,
}

/// A discovered test
#[derive(Debug, Clone)]
pub struct Test {
    /// Framework-level test name (also the xUnit filter value)
    pub name: String,

    /// Human-readable name
    pub display_name: String,

    /// Stable identifier, unique across the run
    pub unique_id: String,

    /// Owning framework
    pub kind: TestKind,

    /// The test body first, then the constructors the runner must execute
    pub entry_points: Vec<FunctionRef>,

    /// Extra argv entries (custom framework only)
    pub arguments: Vec<String>,

    /// Result of the unmutated run, once recorded
    pub execution_result: Option<ExecutionResult>,
}

impl Test {
    /// The test body entry point
    #[must_use]
    pub fn body(&self) -> &FunctionRef {
        &self.entry_points[0]
    }

    /// Constructors the runner executes before the body
    #[must_use]
    pub fn ctors(&self) -> &[FunctionRef] {
        &self.entry_points[1..]
    }
}

/// The per-framework adapter, selected once per run by configuration
#[derive(Debug, Clone)]
pub enum TestRunner {
    /// Free `test_`-prefixed functions invoked directly
    Simple,

    /// xUnit-style framework driven through its init/instance/run triple
    XUnit {
        init_sym: String,
        run_sym: String,
        instance_sym: String,
    },

    /// Configured entry points invoked as `main(argc, argv)`
    Custom { program_name: String },
}

impl TestRunner {
    /// Select the adapter for the configured framework
    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        match config.test_framework {
            TestFramework::SimpleTest => TestRunner::Simple,
            TestFramework::GoogleTest => TestRunner::XUnit {
                init_sym: XUNIT_INIT_SYMBOL.to_string(),
                run_sym: XUNIT_RUN_SYMBOL.to_string(),
                instance_sym: XUNIT_INSTANCE_SYMBOL.to_string(),
            },
            TestFramework::CustomTest => TestRunner::Custom {
                program_name: if config.project_name.is_empty() {
                    "mutiny".to_string()
                } else {
                    config.project_name.clone()
                },
            },
        }
    }

    /// Run one test against an object set
    ///
    /// Errors are infrastructure faults (missing entry symbol, trap outside
    /// the test's control); test verdicts travel in the returned status.
    pub fn run(
        &self,
        engine: &mut Engine,
        test: &Test,
        objects: &[Arc<ObjectFile>],
    ) -> EngineResult<ExecutionStatus> {
        let handle = engine.add_object_set(objects.to_vec(), Box::new(NullResolver));

        let outcome = match self {
            TestRunner::Simple => simple::run(engine, handle, test),
            TestRunner::XUnit {
                init_sym,
                run_sym,
                instance_sym,
            } => xunit::run(engine, handle, test, init_sym, run_sym, instance_sym),
            TestRunner::Custom { program_name } => {
                custom::run(engine, handle, test, program_name)
            }
        };

        // The image comes down whatever happened above.
        let removed = engine.remove(handle);
        let status = outcome?;
        removed?;
        Ok(status)
    }
}

/// Locate and execute the test's static constructors, in registration order
fn run_ctors(engine: &Engine, handle: ImageHandle, test: &Test) -> EngineResult<()> {
    let addrs: Vec<FuncAddr> = test
        .ctors()
        .iter()
        .map(|ctor| engine.find(handle, &ctor.name))
        .collect::<EngineResult<_>>()?;
    engine.run_static_ctors(handle, &addrs)
}

/// Zero is a pass, anything else is a failure
fn status_from_return(value: &crate::engine::Value) -> ExecutionStatus {
    match value.as_i64() {
        Some(0) => ExecutionStatus::Passed,
        _ => ExecutionStatus::Failed,
    }
}
