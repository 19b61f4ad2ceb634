//! Fork-based test isolation
//!
//! `Sandbox::run` executes a closure in a forked child so that crashes,
//! infinite loops, and memory corruption in mutated code cannot damage the
//! driver. The child encodes its `ExecutionStatus` in the exit-code low
//! byte; stdout and stderr are captured through pipes that the parent
//! drains while polling `waitpid`, and a wall-clock timeout is enforced
//! with SIGKILL. Mutated code is untrusted, so there is no cooperative
//! cancellation.

use std::fs::File;
use std::io::{Read, Write};
use std::os::fd::{AsRawFd, OwnedFd};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::time::{Duration, Instant};

use nix::sys::signal::{kill, Signal};
use nix::sys::wait::{waitpid, WaitPidFlag, WaitStatus};
use nix::unistd::{fork, pipe, ForkResult, Pid};
use thiserror::Error;

/// Outcome category of one sandboxed execution
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ExecutionStatus {
    /// Never surfaced; the zero value exists only as the decode sentinel
    Invalid = 0,
    /// The test ran and reported failure
    Failed = 1,
    /// The test ran and reported success
    Passed = 2,
    /// The child exceeded its wall-clock budget and was killed
    Timedout = 3,
    /// The child died from a signal
    Crashed = 4,
    /// The child exited in a way that does not decode to a status
    AbnormalExit = 5,
    /// Execution was skipped by dry-run configuration
    DryRun = 6,
}

impl ExecutionStatus {
    /// Stable display name
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            ExecutionStatus::Invalid => "Invalid",
            ExecutionStatus::Failed => "Failed",
            ExecutionStatus::Passed => "Passed",
            ExecutionStatus::Timedout => "Timedout",
            ExecutionStatus::Crashed => "Crashed",
            ExecutionStatus::AbnormalExit => "AbnormalExit",
            ExecutionStatus::DryRun => "DryRun",
        }
    }
}

impl std::fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Decode a child exit code; anything unencodable is `AbnormalExit`
fn decode_exit_code(code: i32) -> ExecutionStatus {
    match code {
        1 => ExecutionStatus::Failed,
        2 => ExecutionStatus::Passed,
        3 => ExecutionStatus::Timedout,
        4 => ExecutionStatus::Crashed,
        6 => ExecutionStatus::DryRun,
        _ => ExecutionStatus::AbnormalExit,
    }
}

/// Everything observed about one sandboxed execution
#[derive(Debug, Clone)]
pub struct ExecutionResult {
    /// Outcome category
    pub status: ExecutionStatus,

    /// Raw exit code, or the signal number for signal deaths
    pub exit_status: i32,

    /// Wall-clock running time in milliseconds
    pub running_time_ms: i64,

    /// Captured stdout, bounded by the capture limit
    pub stdout: Vec<u8>,

    /// Captured stderr, bounded by the capture limit
    pub stderr: Vec<u8>,
}

impl ExecutionResult {
    /// The synthetic result recorded when dry-run skips execution
    #[must_use]
    pub fn dry_run(timeout_ms: u64) -> Self {
        Self {
            status: ExecutionStatus::DryRun,
            exit_status: 0,
            running_time_ms: timeout_ms as i64,
            stdout: Vec::new(),
            stderr: Vec::new(),
        }
    }
}

/// Sandbox infrastructure failures; test-level outcomes are never errors
#[derive(Debug, Error)]
pub enum SandboxError {
    /// `pipe(2)` failed
    #[error("cannot create capture pipe: {0}")]
    Pipe(nix::Error),

    /// `fork(2)` failed
    #[error("cannot fork sandbox child: {0}")]
    Fork(nix::Error),

    /// `waitpid(2)` failed
    #[error("cannot wait for sandbox child: {0}")]
    Wait(nix::Error),
}

/// Result type for sandbox operations
pub type SandboxResult<T> = Result<T, SandboxError>;

/// Default bound on captured output per stream
pub const DEFAULT_CAPTURE_LIMIT: usize = 64 * 1024;

/// Grace added on top of the configured timeout before SIGKILL
const TIMEOUT_SLACK_MS: u64 = 100;

/// Appended to captured output that hit the capture limit
const TRUNCATION_MARKER: &[u8] = b"\n...[output truncated]";

const POLL_INTERVAL: Duration = Duration::from_millis(1);

/// Bounded accumulation of one captured stream
struct CaptureBuffer {
    data: Vec<u8>,
    limit: usize,
    truncated: bool,
}

impl CaptureBuffer {
    fn new(limit: usize) -> Self {
        Self {
            data: Vec::new(),
            limit,
            truncated: false,
        }
    }

    fn extend(&mut self, chunk: &[u8]) {
        if self.truncated {
            return;
        }
        let room = self.limit.saturating_sub(self.data.len());
        if chunk.len() > room {
            self.data.extend_from_slice(&chunk[..room]);
            self.data.extend_from_slice(TRUNCATION_MARKER);
            self.truncated = true;
        } else {
            self.data.extend_from_slice(chunk);
        }
    }

    fn into_inner(self) -> Vec<u8> {
        self.data
    }
}

/// Runs closures with fork isolation and a wall-clock timeout
#[derive(Debug, Clone)]
pub struct Sandbox {
    forking: bool,
    capture_limit: usize,
}

impl Sandbox {
    /// A sandbox that forks a child per run
    #[must_use]
    pub fn forking() -> Self {
        Self {
            forking: true,
            capture_limit: DEFAULT_CAPTURE_LIMIT,
        }
    }

    /// A sandbox that runs work on the calling thread
    ///
    /// Inline execution trades isolation for debuggability: a crash or hang
    /// in the work takes the driver down with it.
    #[must_use]
    pub fn inline() -> Self {
        Self {
            forking: false,
            capture_limit: DEFAULT_CAPTURE_LIMIT,
        }
    }

    /// Override the per-stream capture bound
    #[must_use]
    pub fn with_capture_limit(mut self, limit: usize) -> Self {
        self.capture_limit = limit;
        self
    }

    /// The synthetic result for executions skipped by dry-run
    #[must_use]
    pub fn dry_run(&self, timeout_ms: u64) -> ExecutionResult {
        ExecutionResult::dry_run(timeout_ms)
    }

    /// Execute `work` under the timeout and report what happened
    pub fn run(
        &self,
        timeout_ms: u64,
        work: impl FnOnce() -> ExecutionStatus,
    ) -> SandboxResult<ExecutionResult> {
        if self.forking {
            self.run_forked(timeout_ms, work)
        } else {
            Ok(run_inline(work))
        }
    }

    fn run_forked(
        &self,
        timeout_ms: u64,
        work: impl FnOnce() -> ExecutionStatus,
    ) -> SandboxResult<ExecutionResult> {
        let (out_read, out_write) = pipe().map_err(SandboxError::Pipe)?;
        let (err_read, err_write) = pipe().map_err(SandboxError::Pipe)?;

        let started = Instant::now();

        match unsafe { fork() }.map_err(SandboxError::Fork)? {
            ForkResult::Child => {
                drop(out_read);
                drop(err_read);
                run_child(&out_write, &err_write, work)
            }
            ForkResult::Parent { child } => {
                drop(out_write);
                drop(err_write);
                self.supervise(child, started, timeout_ms, out_read, err_read)
            }
        }
    }

    fn supervise(
        &self,
        child: Pid,
        started: Instant,
        timeout_ms: u64,
        out_read: OwnedFd,
        err_read: OwnedFd,
    ) -> SandboxResult<ExecutionResult> {
        set_nonblocking(&out_read);
        set_nonblocking(&err_read);
        let mut out_file = File::from(out_read);
        let mut err_file = File::from(err_read);
        let mut stdout = CaptureBuffer::new(self.capture_limit);
        let mut stderr = CaptureBuffer::new(self.capture_limit);

        let deadline = started + Duration::from_millis(timeout_ms + TIMEOUT_SLACK_MS);
        let mut timed_out = false;

        let (status, exit_status) = loop {
            // Drain before waiting so a chatty child never blocks on a
            // full pipe.
            drain(&mut out_file, &mut stdout);
            drain(&mut err_file, &mut stderr);

            let flag = if timed_out {
                None
            } else {
                Some(WaitPidFlag::WNOHANG)
            };

            match waitpid(child, flag).map_err(SandboxError::Wait)? {
                WaitStatus::StillAlive => {
                    if Instant::now() >= deadline {
                        let _ = kill(child, Signal::SIGKILL);
                        timed_out = true;
                    } else {
                        std::thread::sleep(POLL_INTERVAL);
                    }
                }
                WaitStatus::Exited(_, code) => {
                    if timed_out {
                        break (ExecutionStatus::Timedout, code);
                    }
                    break (decode_exit_code(code), code);
                }
                WaitStatus::Signaled(_, signal, _) => {
                    if timed_out {
                        break (ExecutionStatus::Timedout, signal as i32);
                    }
                    break (ExecutionStatus::Crashed, signal as i32);
                }
                _ => std::thread::sleep(POLL_INTERVAL),
            }
        };

        drain(&mut out_file, &mut stdout);
        drain(&mut err_file, &mut stderr);

        Ok(ExecutionResult {
            status,
            exit_status,
            running_time_ms: started.elapsed().as_millis() as i64,
            stdout: stdout.into_inner(),
            stderr: stderr.into_inner(),
        })
    }
}

/// Child side: redirect stdio, run the work, exit with the encoded status
///
/// Never returns. A panic escaping the work aborts the child so the parent
/// observes `Crashed`, matching what a hard fault in executed code does.
fn run_child(
    out_write: &OwnedFd,
    err_write: &OwnedFd,
    work: impl FnOnce() -> ExecutionStatus,
) -> ! {
    unsafe {
        libc::dup2(out_write.as_raw_fd(), libc::STDOUT_FILENO);
        libc::dup2(err_write.as_raw_fd(), libc::STDERR_FILENO);
    }

    let outcome = catch_unwind(AssertUnwindSafe(work));

    let _ = std::io::stdout().flush();
    let _ = std::io::stderr().flush();

    match outcome {
        Ok(status) => unsafe { libc::_exit(status as i32) },
        Err(_) => unsafe { libc::abort() },
    }
}

fn run_inline(work: impl FnOnce() -> ExecutionStatus) -> ExecutionResult {
    let started = Instant::now();
    let status = work();
    ExecutionResult {
        status,
        exit_status: status as i32,
        running_time_ms: started.elapsed().as_millis() as i64,
        stdout: Vec::new(),
        stderr: Vec::new(),
    }
}

fn set_nonblocking(fd: &OwnedFd) {
    unsafe {
        let flags = libc::fcntl(fd.as_raw_fd(), libc::F_GETFL);
        libc::fcntl(fd.as_raw_fd(), libc::F_SETFL, flags | libc::O_NONBLOCK);
    }
}

fn drain(file: &mut File, buffer: &mut CaptureBuffer) {
    let mut chunk = [0u8; 4096];
    loop {
        match file.read(&mut chunk) {
            Ok(0) => break,
            Ok(n) => buffer.extend(&chunk[..n]),
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => break,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(_) => break,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_round_trips_through_exit_code() {
        for status in [
            ExecutionStatus::Failed,
            ExecutionStatus::Passed,
            ExecutionStatus::Timedout,
            ExecutionStatus::Crashed,
            ExecutionStatus::DryRun,
        ] {
            let result = Sandbox::forking().run(5000, move || status).unwrap();
            assert_eq!(result.status, status);
            assert_eq!(result.exit_status, status as i32);
        }
    }

    #[test]
    fn undecodable_exit_is_abnormal() {
        let result = Sandbox::forking()
            .run(5000, || unsafe { libc::_exit(77) })
            .unwrap();
        assert_eq!(result.status, ExecutionStatus::AbnormalExit);
        assert_eq!(result.exit_status, 77);
    }

    #[test]
    fn timeout_kills_the_child() {
        let timeout = 50;
        let result = Sandbox::forking()
            .run(timeout, || {
                std::thread::sleep(Duration::from_secs(10));
                ExecutionStatus::Passed
            })
            .unwrap();
        assert_eq!(result.status, ExecutionStatus::Timedout);
        assert!(result.running_time_ms >= timeout as i64);
    }

    #[test]
    fn aborting_child_is_crashed() {
        let result = Sandbox::forking()
            .run(5000, || std::process::abort())
            .unwrap();
        assert_eq!(result.status, ExecutionStatus::Crashed);
    }

    #[test]
    fn panicking_work_is_crashed() {
        let result = Sandbox::forking()
            .run(5000, || panic!("mutant misbehaved"))
            .unwrap();
        assert_eq!(result.status, ExecutionStatus::Crashed);
    }

    #[test]
    fn stdio_is_captured() {
        let result = Sandbox::forking()
            .run(5000, || {
                println!("to stdout");
                eprintln!("to stderr");
                ExecutionStatus::Passed
            })
            .unwrap();
        assert!(String::from_utf8_lossy(&result.stdout).contains("to stdout"));
        assert!(String::from_utf8_lossy(&result.stderr).contains("to stderr"));
    }

    #[test]
    fn capture_is_bounded_with_marker() {
        let result = Sandbox::forking()
            .with_capture_limit(16)
            .run(5000, || {
                print!("{}", "x".repeat(4096));
                ExecutionStatus::Passed
            })
            .unwrap();
        assert!(result.stdout.len() <= 16 + TRUNCATION_MARKER.len());
        assert!(result.stdout.ends_with(TRUNCATION_MARKER));
    }

    #[test]
    fn inline_mode_runs_on_the_caller() {
        let before = std::process::id();
        let result = Sandbox::inline()
            .run(5000, || {
                assert_eq!(std::process::id(), before);
                ExecutionStatus::Failed
            })
            .unwrap();
        assert_eq!(result.status, ExecutionStatus::Failed);
    }

    #[test]
    fn dry_run_synthesizes_a_result() {
        let result = Sandbox::forking().dry_run(1234);
        assert_eq!(result.status, ExecutionStatus::DryRun);
        assert_eq!(result.running_time_ms, 1234);
        assert!(result.stdout.is_empty());
    }
}
