//! Core types for module execution

use crate::error::ModuleError;
use crate::retry::RetryPolicy;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::process::Output;
use std::time::Duration;

/// Final outcome of one module in a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExecutionStatus {
    /// Fingerprint matched the ledger, nothing was done
    Skipped,
    /// Applied and health-checked, ledger updated
    Applied,
    /// Apply failed (fatal, or retries exhausted)
    Failed,
    /// Apply or health check ran out of time
    TimedOut,
}

impl ExecutionStatus {
    /// Check if the status represents success
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Skipped | Self::Applied)
    }

    /// Label used in outcome tables
    pub fn label(&self) -> &'static str {
        match self {
            Self::Skipped => "Skipped",
            Self::Applied => "Applied",
            Self::Failed => "Failed",
            Self::TimedOut => "TimedOut",
        }
    }
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Per-module record of what happened during a run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionResult {
    pub module: String,
    pub status: ExecutionStatus,
    /// Number of apply attempts made (0 when skipped)
    pub attempts: u32,
    pub duration: Duration,
    pub error: Option<ModuleError>,
    pub warnings: Vec<String>,
}

impl ExecutionResult {
    /// A result for a module whose fingerprint already matched
    pub fn skipped(module: impl Into<String>) -> Self {
        Self {
            module: module.into(),
            status: ExecutionStatus::Skipped,
            attempts: 0,
            duration: Duration::ZERO,
            error: None,
            warnings: Vec::new(),
        }
    }
}

/// Outcome of a whole run
#[derive(Debug, Clone, Default)]
pub struct RunReport {
    /// Results in plan order, one per module that was started or skipped
    pub results: Vec<ExecutionResult>,
    /// Plan entries that were never started
    pub not_attempted: Vec<String>,
    /// Optional-module failures and blocked dependents
    pub warnings: Vec<String>,
    /// Stopped early because of an interrupt
    pub interrupted: bool,
    /// The non-optional module whose failure aborted the run
    pub aborted_by: Option<String>,
}

impl RunReport {
    /// Check if the run fully succeeded
    ///
    /// Optional-module failures are warnings and do not count.
    pub fn is_success(&self) -> bool {
        !self.interrupted && self.aborted_by.is_none()
    }

    /// Look up the result for a module
    pub fn result(&self, module: &str) -> Option<&ExecutionResult> {
        self.results.iter().find(|r| r.module == module)
    }

    /// Count results per status
    pub fn summary(&self) -> RunSummary {
        let mut summary = RunSummary {
            not_attempted: self.not_attempted.len(),
            ..Default::default()
        };
        for result in &self.results {
            summary.add_result(result.status);
        }
        summary
    }
}

/// Counts of module outcomes
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    pub skipped: usize,
    pub applied: usize,
    pub failed: usize,
    pub timed_out: usize,
    pub not_attempted: usize,
}

impl RunSummary {
    /// Total number of modules in the plan
    pub fn total(&self) -> usize {
        self.skipped + self.applied + self.failed + self.timed_out + self.not_attempted
    }

    /// Add a status to the summary
    pub fn add_result(&mut self, status: ExecutionStatus) {
        match status {
            ExecutionStatus::Skipped => self.skipped += 1,
            ExecutionStatus::Applied => self.applied += 1,
            ExecutionStatus::Failed => self.failed += 1,
            ExecutionStatus::TimedOut => self.timed_out += 1,
        }
    }
}

/// Options for execution
#[derive(Debug, Clone)]
pub struct ExecuteOptions {
    /// Attempt budget and backoff between attempts
    pub retry: RetryPolicy,
    /// Hard per-attempt timeout, unless the module overrides it
    pub attempt_timeout: Duration,
    /// How long to wait for a timed-out attempt to acknowledge cancellation
    pub cancel_grace: Duration,
}

impl Default for ExecuteOptions {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            attempt_timeout: Duration::from_secs(300),
            cancel_grace: Duration::from_secs(5),
        }
    }
}

/// An external command to run on behalf of a module
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Invocation {
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: Vec<(String, String)>,
}

impl Invocation {
    /// Create an invocation with no arguments
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env: Vec::new(),
        }
    }

    /// Append an argument
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Append several arguments
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Set an environment variable for the child
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }
}

impl fmt::Display for Invocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            write!(f, " {arg}")?;
        }
        Ok(())
    }
}

/// Output from an external command
#[derive(Debug, Clone, Default)]
pub struct CommandOutput {
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    /// Exit code, `None` when killed by a signal
    pub code: Option<i32>,
}

impl From<Output> for CommandOutput {
    fn from(output: Output) -> Self {
        Self {
            stdout: output.stdout,
            stderr: output.stderr,
            code: output.status.code(),
        }
    }
}

impl CommandOutput {
    /// Whether the command exited with status 0
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }

    /// Get stdout as a string
    pub fn stdout_str(&self) -> String {
        String::from_utf8_lossy(&self.stdout).to_string()
    }

    /// Get stderr as a string
    pub fn stderr_str(&self) -> String {
        String::from_utf8_lossy(&self.stderr).to_string()
    }
}
