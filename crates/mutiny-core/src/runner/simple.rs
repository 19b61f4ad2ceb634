//! Simple-test adapter: free functions invoked directly

use super::{run_ctors, status_from_return, Test};
use crate::engine::{Engine, EngineResult, ImageHandle};
use crate::sandbox::ExecutionStatus;

pub(super) fn run(
    engine: &Engine,
    handle: ImageHandle,
    test: &Test,
) -> EngineResult<ExecutionStatus> {
    run_ctors(engine, handle, test)?;

    let body = engine.find(handle, &test.body().name)?;
    let result = engine.call(handle, body, &[])?;
    Ok(status_from_return(&result))
}
