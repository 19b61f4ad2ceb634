//! Run results and the reporter seam
//!
//! The driver hands the assembled `RunResult` to a `Reporter`; persisting it
//! (SQLite, JSON, anything else) is the collaborator's business. Reporter
//! errors are returned to the caller verbatim.

use thiserror::Error;

use crate::config::Config;
use crate::mutation::MutationPoint;
use crate::runner::Test;
use crate::sandbox::{ExecutionResult, ExecutionStatus};

/// Outcome of running one reachable test against one mutant
#[derive(Debug, Clone)]
pub struct MutationResult {
    /// What the sandboxed run observed
    pub result: ExecutionResult,

    /// Index into [`RunResult::mutation_points`]
    pub point: usize,

    /// Call-graph distance between the test and the mutated function
    pub distance: u32,

    /// Index into [`RunResult::tests`]
    pub test: usize,
}

/// Everything one driver run produced
#[derive(Debug)]
pub struct RunResult {
    /// Discovered tests with their unmutated execution results
    pub tests: Vec<Test>,

    /// Deduplicated mutation points, in discovery order
    pub mutation_points: Vec<MutationPoint>,

    /// One entry per (mutation point, reachable test) pair
    pub mutation_results: Vec<MutationResult>,
}

impl RunResult {
    /// Mutants whose test run did not pass: caught mutations
    #[must_use]
    pub fn killed_count(&self) -> usize {
        self.mutation_results
            .iter()
            .filter(|r| {
                !matches!(
                    r.result.status,
                    ExecutionStatus::Passed | ExecutionStatus::DryRun
                )
            })
            .count()
    }
}

/// Wall-clock totals of the pipeline phases, in milliseconds
#[derive(Debug, Clone, Copy, Default)]
pub struct RunTimings {
    /// Whole pipeline
    pub total_ms: i64,

    /// Unmutated test runs
    pub original_runs_ms: i64,

    /// Mutant runs
    pub mutant_runs_ms: i64,
}

/// A reporter failure, passed through to the driver's caller
#[derive(Debug, Error)]
#[error("reporter failure: {message}")]
pub struct ReportError {
    /// What went wrong
    pub message: String,
}

impl ReportError {
    /// Create a report error
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Consumes the result table at the end of a run
pub trait Reporter {
    /// Persist or present the run's results
    fn report(
        &mut self,
        result: &RunResult,
        config: &Config,
        timings: &RunTimings,
    ) -> Result<(), ReportError>;
}

/// A reporter that writes a summary to the log
#[derive(Debug, Default)]
pub struct LogReporter;

impl Reporter for LogReporter {
    fn report(
        &mut self,
        result: &RunResult,
        config: &Config,
        timings: &RunTimings,
    ) -> Result<(), ReportError> {
        let project = if config.project_name.is_empty() {
            "<unnamed>"
        } else {
            config.project_name.as_str()
        };

        log::info!(
            "{project}: {} tests, {} mutation points, {}/{} mutants killed in {} ms",
            result.tests.len(),
            result.mutation_points.len(),
            result.killed_count(),
            result.mutation_results.len(),
            timings.total_ms,
        );

        for test in &result.tests {
            let status = test
                .execution_result
                .as_ref()
                .map_or("not run", |r| r.status.as_str());
            log::debug!("test {}: {status}", test.unique_id);
        }

        Ok(())
    }
}
