//! Apply context and provider traits
//!
//! These traits keep the engine free of process spawning and terminal
//! output: the binary supplies a shell runner and a progress display, tests
//! supply fakes.

use crate::cancel::CancelToken;
use crate::error::ExecutionError;
use crate::planner::ExecutionPlan;
use crate::types::{CommandOutput, ExecutionResult, Invocation};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Provider for external command execution
///
/// Implementations must stop the child process when `cancel` fires or the
/// `deadline` passes, returning a timeout error in both cases.
pub trait CommandRunner: Send + Sync {
    /// Run a command to completion and capture its output
    ///
    /// A non-zero exit is *not* an error at this level; only failing to
    /// start, wait for, or finish the process in time is.
    fn run(
        &self,
        invocation: &Invocation,
        cancel: &CancelToken,
        deadline: Option<Instant>,
    ) -> Result<CommandOutput, ExecutionError>;
}

/// Runner for modules that never shell out
pub struct NoRunner;

impl CommandRunner for NoRunner {
    fn run(
        &self,
        invocation: &Invocation,
        _cancel: &CancelToken,
        _deadline: Option<Instant>,
    ) -> Result<CommandOutput, ExecutionError> {
        Err(ExecutionError::fatal(format!(
            "no command runner configured for `{invocation}`"
        )))
    }
}

/// Progress callback for execution operations
///
/// Implement this trait to receive progress updates during a run.
pub trait ExecutionObserver {
    /// Called once with the resolved plan before execution starts
    fn on_plan(&mut self, plan: &ExecutionPlan);

    /// Called when a module starts (skipped modules included)
    fn on_module_start(&mut self, module: &str, index: usize, total: usize);

    /// Called when an attempt failed and another one is scheduled
    fn on_retry(
        &mut self,
        module: &str,
        attempt: u32,
        max_attempts: u32,
        error: &ExecutionError,
        delay: Duration,
    );

    /// Called after each unsuccessful readiness poll
    fn on_health_wait(&mut self, module: &str, polls: u32, elapsed: Duration);

    /// Called when a module reaches its final status
    fn on_module_complete(&mut self, result: &ExecutionResult);
}

/// No-op progress callback
pub struct NoProgress;

impl ExecutionObserver for NoProgress {
    fn on_plan(&mut self, _plan: &ExecutionPlan) {}
    fn on_module_start(&mut self, _module: &str, _index: usize, _total: usize) {}
    fn on_retry(&mut self, _: &str, _: u32, _: u32, _: &ExecutionError, _: Duration) {}
    fn on_health_wait(&mut self, _module: &str, _polls: u32, _elapsed: Duration) {}
    fn on_module_complete(&mut self, _result: &ExecutionResult) {}
}

/// Context passed to module apply and health operations
#[derive(Clone)]
pub struct ApplyContext {
    runner: Arc<dyn CommandRunner>,
    cancel: CancelToken,
    deadline: Option<Instant>,
}

impl ApplyContext {
    /// Create a context with no deadline
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            runner,
            cancel: CancelToken::new(),
            deadline: None,
        }
    }

    /// Create a context bound to one attempt's cancel token and deadline
    pub fn for_attempt(
        runner: Arc<dyn CommandRunner>,
        cancel: CancelToken,
        deadline: Option<Instant>,
    ) -> Self {
        Self {
            runner,
            cancel,
            deadline,
        }
    }

    /// Run a command, returning its output regardless of exit status
    pub fn run(&self, invocation: &Invocation) -> Result<CommandOutput, ExecutionError> {
        self.runner.run(invocation, &self.cancel, self.deadline)
    }

    /// Run a command and turn a non-zero exit into a transient error
    ///
    /// Whether that error is actually retried is up to the module's
    /// [`retryable`](crate::Module::retryable) predicate.
    pub fn run_checked(&self, invocation: &Invocation) -> Result<CommandOutput, ExecutionError> {
        let output = self.run(invocation)?;
        if output.success() {
            return Ok(output);
        }

        let stderr = output.stderr_str();
        let detail = stderr.trim().lines().last().unwrap_or("no output");
        let status = output
            .code
            .map_or_else(|| "signal".to_string(), |c| c.to_string());
        Err(ExecutionError::transient(format!(
            "`{invocation}` exited with {status}: {detail}"
        )))
    }

    /// Whether this attempt has been cancelled
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Deadline of the current attempt, if any
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }
}
