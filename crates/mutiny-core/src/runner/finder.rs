//! Test discovery
//!
//! Discovery is static: it scans loaded modules, never executes anything.
//! Simple tests are `test_`-prefixed defined functions. xUnit tests are
//! found by scanning each module's constructors for registration calls
//! (`xunit_register("name", fn)`) and attributing the constructor to its
//! module. Custom tests come straight from configuration.

use crate::config::{Config, TestFramework};
use crate::filter::Filter;
use crate::llir::{Const, Instr, Module, Operand};

use super::{FunctionRef, Test, TestKind};

/// The registration call xUnit constructors make, scanned at discovery time
pub const XUNIT_REGISTER_SYMBOL: &str = "xunit_register";

/// Name prefix marking simple tests
pub const SIMPLE_TEST_PREFIX: &str = "test_";

/// Enumerate the tests of the loaded modules for the configured framework
#[must_use]
pub fn discover_tests(config: &Config, modules: &[Module], filter: &Filter) -> Vec<Test> {
    let tests = match config.test_framework {
        TestFramework::SimpleTest => discover_simple(modules),
        TestFramework::GoogleTest => discover_xunit(modules),
        TestFramework::CustomTest => discover_custom(config, modules),
    };

    tests
        .into_iter()
        .filter(|test| filter.allows_test(&test.name))
        .collect()
}

fn function_ref(module: &Module, name: &str) -> Option<FunctionRef> {
    module.function_named(name).map(|(index, _)| FunctionRef {
        module: module.id().clone(),
        function: index,
        name: name.to_string(),
    })
}

fn ctor_refs(module: &Module) -> Vec<FunctionRef> {
    module
        .ctors
        .iter()
        .filter_map(|ctor| function_ref(module, ctor))
        .collect()
}

fn discover_simple(modules: &[Module]) -> Vec<Test> {
    let mut tests = Vec::new();

    for module in modules {
        for (index, function) in module.defined_functions() {
            if !function.name.starts_with(SIMPLE_TEST_PREFIX) || function.params != 0 {
                continue;
            }
            tests.push(Test {
                name: function.name.clone(),
                display_name: function.name.clone(),
                unique_id: format!("{}:{}", module.id(), function.name),
                kind: TestKind::Simple,
                entry_points: vec![FunctionRef {
                    module: module.id().clone(),
                    function: index,
                    name: function.name.clone(),
                }],
                arguments: Vec::new(),
                execution_result: None,
            });
        }
    }

    tests
}

fn discover_xunit(modules: &[Module]) -> Vec<Test> {
    let mut tests = Vec::new();

    for module in modules {
        let ctors = ctor_refs(module);

        for ctor in &module.ctors {
            let Some((_, ctor_fn)) = module.function_named(ctor) else {
                continue;
            };

            for block in &ctor_fn.blocks {
                for instr in &block.instrs {
                    let Some((name, body)) = registration(instr) else {
                        continue;
                    };
                    let Some(body_ref) = function_ref(module, body) else {
                        log::warn!("registered test body {body} is not defined in {}", module.id());
                        continue;
                    };

                    let mut entry_points = vec![body_ref];
                    entry_points.extend(ctors.iter().cloned());

                    tests.push(Test {
                        name: name.to_string(),
                        display_name: name.to_string(),
                        unique_id: name.to_string(),
                        kind: TestKind::XUnit,
                        entry_points,
                        arguments: Vec::new(),
                        execution_result: None,
                    });
                }
            }
        }
    }

    tests
}

/// Match `xunit_register(Const::Str(name), Const::Func(body))`
fn registration(instr: &Instr) -> Option<(&str, &str)> {
    let Instr::Call { callee, args, .. } = instr else {
        return None;
    };
    if callee != XUNIT_REGISTER_SYMBOL {
        return None;
    }
    match (args.first(), args.get(1)) {
        (
            Some(Operand::Const(Const::Str(name))),
            Some(Operand::Const(Const::Func(body))),
        ) => Some((name, body)),
        _ => None,
    }
}

fn discover_custom(config: &Config, modules: &[Module]) -> Vec<Test> {
    // Custom tests execute whole programs, so every module's constructors
    // run, not just the defining module's.
    let all_ctors: Vec<FunctionRef> = modules.iter().flat_map(ctor_refs).collect();

    let mut tests = Vec::new();
    for def in &config.custom_tests {
        let Some(body_ref) = modules.iter().find_map(|m| function_ref(m, &def.method)) else {
            log::warn!("custom test {}: method {} is not defined", def.name, def.method);
            continue;
        };

        let mut entry_points = vec![body_ref];
        entry_points.extend(all_ctors.iter().cloned());

        tests.push(Test {
            name: def.name.clone(),
            display_name: def.name.clone(),
            unique_id: def.name.clone(),
            kind: TestKind::Custom,
            entry_points,
            arguments: def.arguments.clone(),
            execution_result: None,
        });
    }

    tests
}
