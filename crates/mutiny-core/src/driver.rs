//! Pipeline orchestration
//!
//! The driver owns the full lifecycle: load modules and assign function
//! ids, allocate the shared call-tree buffer, instrument and compile (or
//! reuse cached objects), permanently load side libraries, discover tests,
//! run each test unmutated to record its verdict and its call tree, derive
//! testees and collect mutation points, execute every mutant against its
//! reachable tests, and hand the result table to the reporter.
//!
//! Everything is serialised: test N+1 starts only after test N's child has
//! been reaped and the buffer reset. Parallelism exists only across the
//! fork boundary.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use thiserror::Error;

use crate::calltree::{BufferError, CallTree, CallTreeProbe, FunctionId, SharedMapping};
use crate::config::{Config, ConfigError};
use crate::engine::{DataLayout, Engine, EngineError};
use crate::filter::Filter;
use crate::instrument::instrument_module;
use crate::loader::{LoadError, Loader};
use crate::mutation::{MutationError, MutationPoint, OperatorRegistry, ReachableTest};
use crate::reporter::{MutationResult, ReportError, Reporter, RunResult, RunTimings};
use crate::runner::{discover_tests, TestRunner};
use crate::sandbox::{ExecutionStatus, Sandbox, SandboxError};
use crate::toolchain::{CompileError, ObjectFile, Toolchain};
use crate::{calltree, llir::ModuleId};

/// Floor for the per-mutant timeout in milliseconds
const MIN_MUTANT_TIMEOUT_MS: i64 = 30;

/// Mutant timeout as a multiple of the original running time
const MUTANT_TIMEOUT_FACTOR: i64 = 10;

/// Errors that abort the pipeline
#[derive(Debug, Error)]
pub enum DriverError {
    /// Configuration failed validation at construction
    #[error("invalid configuration: {}", format_config_errors(.0))]
    InvalidConfig(Vec<ConfigError>),

    /// A configured list file could not be read
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Module loading failed
    #[error(transparent)]
    Load(#[from] LoadError),

    /// Verification or compilation failed
    #[error(transparent)]
    Compile(#[from] CompileError),

    /// The shared call-tree buffer could not be mapped
    #[error(transparent)]
    Buffer(#[from] BufferError),

    /// The module set changed between runs of the same driver
    #[error("module set changed between runs: {was} instrumented functions, now {now}")]
    FunctionCountChanged { was: usize, now: usize },

    /// The sandbox infrastructure failed
    #[error(transparent)]
    Sandbox(#[from] SandboxError),

    /// Mutation selection or application failed
    #[error(transparent)]
    Mutation(#[from] MutationError),

    /// The engine failed outside a sandboxed child
    #[error(transparent)]
    Engine(#[from] EngineError),

    /// The reporter failed; passed through verbatim
    #[error(transparent)]
    Report(#[from] ReportError),
}

fn format_config_errors(errors: &[ConfigError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Result type for driver operations
pub type DriverResult<T> = Result<T, DriverError>;

/// One instrumented function, indexed by `FunctionId - 1`
#[derive(Debug, Clone)]
struct RegisteredFunction {
    module: ModuleId,
    index: usize,
    name: String,
}

impl std::fmt::Debug for Driver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Driver").finish_non_exhaustive()
    }
}

/// The mutation-testing pipeline
pub struct Driver {
    config: Config,
    loader: Box<dyn Loader>,
    toolchain: Toolchain,
    registry: Box<dyn OperatorRegistry>,
    reporter: Box<dyn Reporter>,
    filter: Filter,
    runner: TestRunner,
    sandbox: Sandbox,
    engine: Engine,
    precompiled: Vec<Arc<ObjectFile>>,

    // Allocated on first run and pinned for the driver's life: instrumented
    // objects embed the probe address.
    mapping: Option<SharedMapping>,
    probe: Option<Box<CallTreeProbe>>,
}

impl Driver {
    /// Validate the configuration and assemble the pipeline
    pub fn new(
        config: Config,
        loader: Box<dyn Loader>,
        toolchain: Toolchain,
        registry: Box<dyn OperatorRegistry>,
        reporter: Box<dyn Reporter>,
    ) -> DriverResult<Self> {
        let errors = config.validate();
        if !errors.is_empty() {
            return Err(DriverError::InvalidConfig(errors));
        }

        let filter = Filter::from_config(&config);
        let runner = TestRunner::from_config(&config);
        let sandbox = if config.fork {
            Sandbox::forking()
        } else {
            Sandbox::inline()
        };

        Ok(Self {
            config,
            loader,
            toolchain,
            registry,
            reporter,
            filter,
            runner,
            sandbox,
            engine: Engine::new(DataLayout::host()),
            precompiled: Vec::new(),
            mapping: None,
            probe: None,
        })
    }

    /// Append precompiled objects to every object set
    #[must_use]
    pub fn with_precompiled_objects(mut self, objects: Vec<Arc<ObjectFile>>) -> Self {
        self.precompiled = objects;
        self
    }

    /// Execute the whole pipeline and report the results
    pub fn run(&mut self) -> DriverResult<RunResult> {
        let total_start = Instant::now();

        // Load modules and assign function ids, 1-based and stable for the
        // driver's life.
        let bitcode_paths = self.config.bitcode_paths()?;
        let modules = self.loader.load_modules(&bitcode_paths)?;

        let mut functions: Vec<RegisteredFunction> = Vec::new();
        let mut module_targets: Vec<Vec<(usize, FunctionId)>> = Vec::new();
        let mut id_of: HashMap<(ModuleId, usize), FunctionId> = HashMap::new();
        let mut module_index: HashMap<ModuleId, usize> = HashMap::new();

        for (mi, module) in modules.iter().enumerate() {
            module_index.insert(module.id().clone(), mi);
            let mut targets = Vec::new();
            for (index, function) in module.defined_functions() {
                let id = functions.len() as FunctionId + 1;
                functions.push(RegisteredFunction {
                    module: module.id().clone(),
                    index,
                    name: function.name.clone(),
                });
                id_of.insert((module.id().clone(), index), id);
                targets.push((index, id));
            }
            module_targets.push(targets);
        }

        self.prepare(functions.len())?;
        let probe_addr = self.probe.as_ref().expect("prepared").addr();

        // Instrument and compile each module, reusing cached objects.
        let mut objects: Vec<Arc<ObjectFile>> = Vec::with_capacity(modules.len());
        for (mi, module) in modules.iter().enumerate() {
            let cached = if self.config.use_cache {
                self.toolchain.cache().get(module)
            } else {
                None
            };

            let object = match cached {
                Some(object) => object,
                None => {
                    let mut instrumented = module.clone();
                    instrument_module(&mut instrumented, &module_targets[mi], probe_addr);
                    let object = self.toolchain.compile(&instrumented)?;
                    self.toolchain.cache_mut().put(Arc::clone(&object), module);
                    object
                }
            };
            objects.push(object);
        }

        // Side libraries stay loaded for the whole run, uninstrumented.
        let dylib_paths = self.config.dynamic_library_paths()?;
        if !dylib_paths.is_empty() {
            let dylib_modules = self.loader.load_modules(&dylib_paths)?;
            let dylib_objects = dylib_modules
                .iter()
                .map(|m| self.toolchain.compile(m))
                .collect::<Result<Vec<_>, _>>()?;
            self.engine.load_library_permanently(dylib_objects);
        }

        let mut tests = discover_tests(&self.config, &modules, &self.filter);
        log::debug!("driver: found {} tests", tests.len());

        let mut baseline = objects.clone();
        baseline.extend(self.precompiled.iter().cloned());

        // Original runs: record verdicts, derive testees, collect points.
        let originals_start = Instant::now();
        let mut points: Vec<MutationPoint> = Vec::new();
        let mut point_of_key = HashMap::new();

        let mapping = self.mapping.as_ref().expect("prepared");
        let probe = self.probe.as_ref().expect("prepared");
        let sandbox = &self.sandbox;
        let runner = &self.runner;
        let engine = &mut self.engine;
        let timeout = self.config.timeout;

        for (test_index, test) in tests.iter_mut().enumerate() {
            mapping.reset();
            probe.reset();

            let result = sandbox.run(timeout, || {
                match runner.run(&mut *engine, test, &baseline) {
                    Ok(status) => status,
                    Err(error) => {
                        log::error!("test {}: {error}", test.unique_id);
                        std::process::abort()
                    }
                }
            })?;

            log::debug!("test {}: {}", test.unique_id, result.status);
            let passed = result.status == ExecutionStatus::Passed;
            test.execution_result = Some(result);
            if !passed {
                continue;
            }

            let tree = CallTree::reconstruct(mapping);
            let entry = test.body();
            let Some(&entry_id) = id_of.get(&(entry.module.clone(), entry.function)) else {
                continue;
            };

            let filter = &self.filter;
            let testees = calltree::testees(&tree, entry_id, self.config.max_distance, |id| {
                !filter.excludes_function(&functions[(id - 1) as usize].name)
            });

            // The first testee is the test itself; mutations start past it.
            for testee in testees.iter().skip(1) {
                let registered = &functions[(testee.function - 1) as usize];
                let mi = module_index[&registered.module];
                let candidates = self.registry.mutation_points(
                    &modules[mi],
                    registered.index,
                    testee.function,
                );

                for candidate in candidates {
                    let key = candidate.dedup_key();
                    let index = match point_of_key.get(&key) {
                        Some(&index) => index,
                        None => {
                            points.push(candidate);
                            point_of_key.insert(key, points.len() - 1);
                            points.len() - 1
                        }
                    };
                    points[index].reachable_tests.push(ReachableTest {
                        test: test_index,
                        distance: testee.distance,
                    });
                }
            }
        }
        let original_runs_ms = originals_start.elapsed().as_millis() as i64;
        log::debug!("driver: found {} mutation points", points.len());

        // Mutant runs: swap one object per point, run every reachable test.
        let mutants_start = Instant::now();
        let mut mutation_results = Vec::new();
        let dry_run = self.config.dry_run;

        for (point_index, point) in points.iter().enumerate() {
            let mi = module_index[point.module()];
            let mut mutant_module = modules[mi].clone();
            point.apply(&mut mutant_module)?;
            let mutant_object = self.toolchain.compile(&mutant_module)?;

            // The swap is local to this point: the baseline is rebuilt
            // from scratch for the next one.
            let mut object_set: Vec<Arc<ObjectFile>> = baseline
                .iter()
                .filter(|object| object.module_id() != point.module())
                .cloned()
                .collect();
            object_set.push(mutant_object);

            for reachable in &point.reachable_tests {
                let test = &tests[reachable.test];
                let original_ms = test
                    .execution_result
                    .as_ref()
                    .map_or(0, |r| r.running_time_ms);
                let mutant_timeout =
                    (original_ms * MUTANT_TIMEOUT_FACTOR).max(MIN_MUTANT_TIMEOUT_MS) as u64;

                let result = if dry_run {
                    sandbox.dry_run(mutant_timeout)
                } else {
                    sandbox.run(mutant_timeout, || {
                        match runner.run(&mut *engine, test, &object_set) {
                            Ok(status) => status,
                            Err(error) => {
                                log::error!(
                                    "mutant {} vs {}: {error}",
                                    point.operator_id(),
                                    test.unique_id
                                );
                                std::process::abort()
                            }
                        }
                    })?
                };

                mutation_results.push(MutationResult {
                    result,
                    point: point_index,
                    distance: reachable.distance,
                    test: reachable.test,
                });
            }
        }
        let mutant_runs_ms = mutants_start.elapsed().as_millis() as i64;

        let result = RunResult {
            tests,
            mutation_points: points,
            mutation_results,
        };
        let timings = RunTimings {
            total_ms: total_start.elapsed().as_millis() as i64,
            original_runs_ms,
            mutant_runs_ms,
        };
        self.reporter.report(&result, &self.config, &timings)?;

        Ok(result)
    }

    /// Allocate the shared buffer and probe on first use
    ///
    /// Both stay alive for the driver's life so that cached instrumented
    /// objects keep pointing at a valid probe.
    fn prepare(&mut self, function_count: usize) -> DriverResult<()> {
        if let Some(mapping) = &self.mapping {
            let was = mapping.slots() - 1;
            if was != function_count {
                return Err(DriverError::FunctionCountChanged {
                    was,
                    now: function_count,
                });
            }
            return Ok(());
        }

        let mapping = SharedMapping::new(function_count)?;
        self.probe = Some(CallTreeProbe::new(&mapping));
        self.mapping = Some(mapping);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loader::StaticLoader;
    use crate::mutation::StandardRegistry;
    use crate::reporter::LogReporter;

    fn build_driver(config: Config) -> DriverResult<Driver> {
        Driver::new(
            config,
            Box::new(StaticLoader::new()),
            Toolchain::default(),
            Box::new(StandardRegistry::all()),
            Box::new(LogReporter),
        )
    }

    #[test]
    fn construction_rejects_invalid_configuration() {
        let err = build_driver(Config::default()).unwrap_err();
        assert!(matches!(err, DriverError::InvalidConfig(errors) if !errors.is_empty()));
    }

    #[test]
    fn construction_accepts_a_valid_configuration() {
        use std::io::Write;
        let mut list = tempfile::NamedTempFile::new().unwrap();
        writeln!(list, "# no modules").unwrap();

        let config = Config {
            bitcode_file_list: list.path().to_path_buf(),
            ..Config::default()
        };
        assert!(build_driver(config).is_ok());
    }
}
