//! Custom-entry adapter: configured methods invoked as `main(argc, argv)`

use super::{run_ctors, status_from_return, Test};
use crate::engine::{Engine, EngineResult, ImageHandle, Value};
use crate::sandbox::ExecutionStatus;

pub(super) fn run(
    engine: &Engine,
    handle: ImageHandle,
    test: &Test,
    program_name: &str,
) -> EngineResult<ExecutionStatus> {
    run_ctors(engine, handle, test)?;

    let mut argv = vec![Value::str(program_name)];
    argv.extend(test.arguments.iter().map(Value::str));
    let argc = Value::I64(argv.len() as i64);

    let main = engine.find(handle, &test.body().name)?;
    let result = engine.call(handle, main, &[argc, Value::list(argv)])?;
    Ok(status_from_return(&result))
}
