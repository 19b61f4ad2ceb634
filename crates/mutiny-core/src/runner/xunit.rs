//! xUnit-style adapter
//!
//! The framework under test ships its own driver loop; invoking `main`
//! would be ambiguous when several linked modules define one. The adapter
//! therefore drives the framework through its entry triple directly:
//! initialise with a name filter so only the selected test executes, fetch
//! the framework instance, and run it.

use super::{run_ctors, status_from_return, Test};
use crate::engine::{Engine, EngineResult, ImageHandle, Value};
use crate::sandbox::ExecutionStatus;

pub(super) fn run(
    engine: &Engine,
    handle: ImageHandle,
    test: &Test,
    init_sym: &str,
    run_sym: &str,
    instance_sym: &str,
) -> EngineResult<ExecutionStatus> {
    // Constructors register the module's tests with the framework.
    run_ctors(engine, handle, test)?;

    let argv = Value::list(vec![
        Value::str("mutiny"),
        Value::str(format!("--filter={}", test.name)),
    ]);

    let init = engine.find(handle, init_sym)?;
    engine.call(handle, init, &[Value::I64(2), argv])?;

    let instance = engine.find(handle, instance_sym)?;
    let framework = engine.call(handle, instance, &[])?;

    let run_all = engine.find(handle, run_sym)?;
    let result = engine.call(handle, run_all, &[framework])?;

    Ok(status_from_return(&result))
}
