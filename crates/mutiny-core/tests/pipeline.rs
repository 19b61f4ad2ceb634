//! End-to-end pipeline scenarios
//!
//! Each test assembles a driver over fixture modules, runs the whole
//! pipeline (fork sandbox included), and checks the produced result table.

use std::cell::RefCell;
use std::io::Write;
use std::rc::Rc;

use tempfile::NamedTempFile;

use mutiny_core::config::{Config, CustomTestDef, TestFramework};
use mutiny_core::driver::Driver;
use mutiny_core::llir::Module;
use mutiny_core::loader::StaticLoader;
use mutiny_core::mutation::StandardRegistry;
use mutiny_core::reporter::{
    LogReporter, MutationResult, ReportError, Reporter, RunResult, RunTimings,
};
use mutiny_core::sandbox::ExecutionStatus;
use mutiny_core::testutil;
use mutiny_core::toolchain::{MemoryCache, Toolchain};

struct Pipeline {
    driver: Driver,
    _bitcode_list: NamedTempFile,
    _dylib_list: Option<NamedTempFile>,
}

fn write_list(ids: &[String]) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    writeln!(file, "# module list").unwrap();
    for id in ids {
        writeln!(file, "{id}").unwrap();
    }
    file.flush().unwrap();
    file
}

fn pipeline_with(
    modules: Vec<Module>,
    dylibs: Vec<Module>,
    reporter: Box<dyn Reporter>,
    configure: impl FnOnce(&mut Config),
) -> Pipeline {
    let module_ids: Vec<String> = modules.iter().map(|m| m.id().as_str().to_string()).collect();
    let dylib_ids: Vec<String> = dylibs.iter().map(|m| m.id().as_str().to_string()).collect();

    let bitcode_list = write_list(&module_ids);
    let dylib_list = (!dylib_ids.is_empty()).then(|| write_list(&dylib_ids));

    let mut loader = StaticLoader::new();
    for module in modules.into_iter().chain(dylibs) {
        loader.insert_by_id(module);
    }

    let mut config = Config {
        bitcode_file_list: bitcode_list.path().to_path_buf(),
        dynamic_library_file_list: dylib_list.as_ref().map(|f| f.path().to_path_buf()),
        test_framework: TestFramework::SimpleTest,
        ..Config::default()
    };
    configure(&mut config);

    let registry = StandardRegistry::from_operator_ids(&config.mutation_operators).unwrap();
    let driver = Driver::new(
        config,
        Box::new(loader),
        Toolchain::new(Box::new(MemoryCache::new())),
        Box::new(registry),
        reporter,
    )
    .unwrap();

    Pipeline {
        driver,
        _bitcode_list: bitcode_list,
        _dylib_list: dylib_list,
    }
}

fn pipeline(
    modules: Vec<Module>,
    dylibs: Vec<Module>,
    configure: impl FnOnce(&mut Config),
) -> Pipeline {
    pipeline_with(modules, dylibs, Box::new(LogReporter), configure)
}

fn arithmetic_fixtures() -> Vec<Module> {
    vec![testutil::arithmetic_module(), testutil::simple_test_module()]
}

fn test_status(result: &RunResult, name: &str) -> ExecutionStatus {
    let test = result
        .tests
        .iter()
        .find(|t| t.name == name)
        .unwrap_or_else(|| panic!("test {name} not found"));
    test.execution_result.as_ref().expect("test was run").status
}

fn results_for_test<'a>(result: &'a RunResult, name: &str) -> Vec<&'a MutationResult> {
    result
        .mutation_results
        .iter()
        .filter(|r| result.tests[r.test].name == name)
        .collect()
}

#[test]
fn caught_mutation_fails_at_distance_one() {
    let mut p = pipeline(arithmetic_fixtures(), vec![], |c| {
        c.tests = vec!["test_addition".to_string()];
        c.mutation_operators = vec!["math_add_mutation_operator".to_string()];
    });

    let result = p.driver.run().unwrap();

    assert_eq!(result.tests.len(), 1);
    let original = result.tests[0].execution_result.as_ref().unwrap();
    assert_eq!(original.status, ExecutionStatus::Passed);
    assert!(String::from_utf8_lossy(&original.stdout).contains("checking addition"));

    assert_eq!(result.mutation_points.len(), 1);
    assert_eq!(result.mutation_results.len(), 1);

    let mutant = &result.mutation_results[0];
    assert_eq!(mutant.distance, 1);
    assert_eq!(mutant.result.status, ExecutionStatus::Failed);
    assert_eq!(
        result.mutation_points[mutant.point].operator_id(),
        "math_add_mutation_operator"
    );
}

#[test]
fn looping_mutant_times_out() {
    let mut p = pipeline(arithmetic_fixtures(), vec![], |c| {
        c.tests = vec!["test_countdown".to_string()];
        c.mutation_operators = vec!["math_sub_mutation_operator".to_string()];
    });

    let result = p.driver.run().unwrap();

    assert_eq!(test_status(&result, "test_countdown"), ExecutionStatus::Passed);
    assert_eq!(result.mutation_results.len(), 1);

    let mutant = &result.mutation_results[0];
    assert_eq!(mutant.result.status, ExecutionStatus::Timedout);
    // The mutant budget floor is 30 ms.
    assert!(mutant.result.running_time_ms >= 30);
}

#[test]
fn crashing_mutant_is_isolated_and_shared_testees_run_per_test() {
    // The allowlist pattern matches both division tests, which share the
    // checked_div testee: one mutation point, two independent runs.
    let mut p = pipeline(arithmetic_fixtures(), vec![], |c| {
        c.tests = vec!["test_division".to_string()];
        c.mutation_operators = vec!["negate_condition_mutation_operator".to_string()];
    });

    let result = p.driver.run().unwrap();

    assert_eq!(result.tests.len(), 2);
    assert_eq!(test_status(&result, "test_division"), ExecutionStatus::Passed);
    assert_eq!(
        test_status(&result, "test_division_by_zero"),
        ExecutionStatus::Passed
    );

    assert_eq!(result.mutation_points.len(), 1);
    assert_eq!(result.mutation_results.len(), 2);

    // Negating the guard steers the in-range test away from dividing and
    // steers the zero test straight into the division.
    let guarded = results_for_test(&result, "test_division");
    assert_eq!(guarded[0].result.status, ExecutionStatus::Failed);

    let crashed = results_for_test(&result, "test_division_by_zero");
    assert_eq!(crashed[0].result.status, ExecutionStatus::Crashed);
}

#[test]
fn dry_run_skips_mutants_but_runs_originals() {
    let mut p = pipeline(arithmetic_fixtures(), vec![], |c| {
        c.tests = vec!["test_addition".to_string()];
        c.mutation_operators = vec!["math_add_mutation_operator".to_string()];
        c.dry_run = true;
    });

    let result = p.driver.run().unwrap();

    assert_eq!(test_status(&result, "test_addition"), ExecutionStatus::Passed);
    assert!(!result.mutation_results.is_empty());
    assert!(result
        .mutation_results
        .iter()
        .all(|r| r.result.status == ExecutionStatus::DryRun));
    assert_eq!(result.killed_count(), 0);
}

#[test]
fn distance_cap_drops_transitive_mutations() {
    let capped = pipeline(arithmetic_fixtures(), vec![], |c| {
        c.tests = vec!["test_nested".to_string()];
        c.mutation_operators = vec!["math_add_mutation_operator".to_string()];
        c.max_distance = 1;
    })
    .driver
    .run()
    .unwrap();

    // Only twice_add (distance 1) hosts a point; add (distance 2) is
    // pruned by the cap.
    assert_eq!(capped.mutation_points.len(), 1);

    let uncapped = pipeline(arithmetic_fixtures(), vec![], |c| {
        c.tests = vec!["test_nested".to_string()];
        c.mutation_operators = vec!["math_add_mutation_operator".to_string()];
    })
    .driver
    .run()
    .unwrap();

    assert_eq!(uncapped.mutation_points.len(), 2);
}

#[test]
fn failed_original_produces_no_mutations() {
    let mut p = pipeline(arithmetic_fixtures(), vec![], |c| {
        c.tests = vec!["test_failing".to_string()];
        c.mutation_operators = vec!["math_add_mutation_operator".to_string()];
    });

    let result = p.driver.run().unwrap();

    assert_eq!(test_status(&result, "test_failing"), ExecutionStatus::Failed);
    assert!(result.mutation_points.is_empty());
    assert!(result.mutation_results.is_empty());
}

#[test]
fn excluded_functions_host_no_mutations() {
    let mut p = pipeline(arithmetic_fixtures(), vec![], |c| {
        c.tests = vec!["test_addition".to_string()];
        c.mutation_operators = vec!["math_add_mutation_operator".to_string()];
        c.exclude_locations = vec!["add".to_string()];
    });

    let result = p.driver.run().unwrap();

    assert_eq!(test_status(&result, "test_addition"), ExecutionStatus::Passed);
    assert!(result.mutation_points.is_empty());
}

#[test]
fn xunit_framework_filters_and_kills() {
    let mut p = pipeline(
        vec![
            testutil::arithmetic_module(),
            testutil::xunit_framework_module(),
            testutil::xunit_suite_module(),
        ],
        vec![],
        |c| {
            c.test_framework = TestFramework::GoogleTest;
            c.mutation_operators = vec!["math_add_mutation_operator".to_string()];
        },
    );

    let result = p.driver.run().unwrap();

    assert_eq!(result.tests.len(), 2);
    assert_eq!(test_status(&result, "Math.addition"), ExecutionStatus::Passed);
    assert_eq!(
        test_status(&result, "Math.subtraction"),
        ExecutionStatus::Passed
    );

    // Only Math.addition reaches add, so the point runs exactly once.
    assert_eq!(result.mutation_points.len(), 1);
    assert_eq!(result.mutation_results.len(), 1);

    let mutant = &result.mutation_results[0];
    assert_eq!(result.tests[mutant.test].name, "Math.addition");
    assert_eq!(mutant.result.status, ExecutionStatus::Failed);
}

#[test]
fn custom_framework_runs_configured_entry_points() {
    let mut p = pipeline(vec![testutil::custom_main_module()], vec![], |c| {
        c.test_framework = TestFramework::CustomTest;
        c.custom_tests = vec![CustomTestDef {
            name: "smoke".to_string(),
            method: "main".to_string(),
            arguments: vec!["--fast".to_string()],
        }];
        c.mutation_operators = vec!["negate_condition_mutation_operator".to_string()];
    });

    let result = p.driver.run().unwrap();

    assert_eq!(result.tests.len(), 1);
    assert_eq!(test_status(&result, "smoke"), ExecutionStatus::Passed);

    // validate() is the only testee past the entry point.
    assert_eq!(result.mutation_points.len(), 1);
    assert_eq!(result.mutation_results.len(), 1);
    assert_eq!(
        result.mutation_results[0].result.status,
        ExecutionStatus::Failed
    );
}

#[test]
fn permanent_libraries_resolve_for_tests() {
    let mut p = pipeline(
        vec![testutil::simple_test_module()],
        vec![testutil::mathlib_module()],
        |c| {
            c.tests = vec!["test_lib".to_string()];
        },
    );

    let result = p.driver.run().unwrap();

    assert_eq!(test_status(&result, "test_lib"), ExecutionStatus::Passed);
    // The side library is not instrumented, so nothing in it is a testee.
    assert!(result.mutation_points.is_empty());
}

#[test]
fn precompiled_objects_join_every_object_set() {
    use mutiny_core::toolchain::Compiler;

    let library_object = Compiler::new().compile(&testutil::mathlib_module()).unwrap();

    let mut p = pipeline(vec![testutil::simple_test_module()], vec![], |c| {
        c.tests = vec!["test_lib".to_string()];
    });
    p.driver = p.driver.with_precompiled_objects(vec![library_object]);

    let result = p.driver.run().unwrap();
    assert_eq!(test_status(&result, "test_lib"), ExecutionStatus::Passed);
}

#[test]
fn surviving_mutant_keeps_passing() {
    // Removing the guard-path log call changes nothing observable.
    let mut p = pipeline(arithmetic_fixtures(), vec![], |c| {
        c.tests = vec!["test_division_by_zero".to_string()];
        c.mutation_operators = vec!["remove_void_function_mutation_operator".to_string()];
    });

    let result = p.driver.run().unwrap();

    assert_eq!(result.mutation_points.len(), 1);
    assert_eq!(result.mutation_results.len(), 1);
    assert_eq!(
        result.mutation_results[0].result.status,
        ExecutionStatus::Passed
    );
    assert_eq!(result.killed_count(), 0);
}

#[test]
fn second_run_reuses_the_object_cache() {
    let mut p = pipeline(arithmetic_fixtures(), vec![], |c| {
        c.tests = vec!["test_addition".to_string()];
        c.mutation_operators = vec!["math_add_mutation_operator".to_string()];
    });

    let first = p.driver.run().unwrap();
    let second = p.driver.run().unwrap();

    assert_eq!(first.tests.len(), second.tests.len());
    assert_eq!(first.mutation_points.len(), second.mutation_points.len());
    assert_eq!(
        test_status(&second, "test_addition"),
        ExecutionStatus::Passed
    );
    assert_eq!(
        second.mutation_results[0].result.status,
        ExecutionStatus::Failed
    );
}

#[test]
fn inline_mode_produces_the_same_verdicts() {
    let mut p = pipeline(arithmetic_fixtures(), vec![], |c| {
        c.tests = vec!["test_addition".to_string()];
        c.mutation_operators = vec!["math_add_mutation_operator".to_string()];
        c.fork = false;
    });

    let result = p.driver.run().unwrap();

    assert_eq!(test_status(&result, "test_addition"), ExecutionStatus::Passed);
    assert_eq!(result.mutation_results.len(), 1);
    assert_eq!(
        result.mutation_results[0].result.status,
        ExecutionStatus::Failed
    );
}

#[test]
fn reporter_receives_the_result_table() {
    #[derive(Default)]
    struct Recording {
        calls: Rc<RefCell<Vec<(usize, usize, i64)>>>,
    }

    impl Reporter for Recording {
        fn report(
            &mut self,
            result: &RunResult,
            _config: &Config,
            timings: &RunTimings,
        ) -> Result<(), ReportError> {
            self.calls.borrow_mut().push((
                result.tests.len(),
                result.mutation_results.len(),
                timings.total_ms,
            ));
            Ok(())
        }
    }

    let calls = Rc::new(RefCell::new(Vec::new()));
    let reporter = Recording {
        calls: Rc::clone(&calls),
    };

    let mut p = pipeline_with(
        arithmetic_fixtures(),
        vec![],
        Box::new(reporter),
        |c| {
            c.tests = vec!["test_addition".to_string()];
            c.mutation_operators = vec!["math_add_mutation_operator".to_string()];
        },
    );
    p.driver.run().unwrap();

    let calls = calls.borrow();
    assert_eq!(calls.len(), 1);
    let (tests, results, total_ms) = calls[0];
    assert_eq!(tests, 1);
    assert_eq!(results, 1);
    assert!(total_ms >= 0);
}
