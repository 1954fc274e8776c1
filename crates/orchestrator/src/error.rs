//! Error types for the orchestration engine.
//!
//! Errors fall into two groups:
//!
//! - [`Error`]: run-level failures. Pre-execution errors (pre-flight,
//!   resolution, state load) abort the run before any side effect.
//! - [`ModuleError`]: module-scoped failures recorded in an
//!   [`ExecutionResult`](crate::ExecutionResult). They are resolved by the
//!   executor's retry policy first and only then surface in the run report.

use crate::validator::CheckResult;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Run-level errors.
#[derive(Debug, Error)]
pub enum Error {
    /// One or more required pre-flight checks failed
    #[error("pre-flight checks failed: {}", summarize_checks(.failures))]
    Preflight {
        /// Every failed required check, in check order
        failures: Vec<CheckResult>,
    },

    /// A module name is not present in the registry
    #[error(
        "unknown module '{name}'{}",
        .required_by.as_ref().map(|r| format!(" (required by '{r}')")).unwrap_or_default()
    )]
    UnknownModule {
        /// The missing module name
        name: String,
        /// The module that declared the dependency, if any
        required_by: Option<String>,
    },

    /// The dependency graph contains a cycle
    #[error("cyclic dependency: {}", .cycle.join(" -> "))]
    CyclicDependency {
        /// The cycle path, starting and ending with the same module
        cycle: Vec<String>,
    },

    /// A module with the same name is already registered
    #[error("module '{name}' is already registered")]
    DuplicateModule {
        /// The duplicated module name
        name: String,
    },

    /// The persisted state file exists but cannot be trusted
    #[error("state file {} is corrupt: {message}", .path.display())]
    StateCorruption {
        /// Path of the state file
        path: PathBuf,
        /// What was wrong with it
        message: String,
    },

    /// Another executor holds the state lock
    #[error("another run holds the state lock at {}", .path.display())]
    ConcurrentExecution {
        /// Path of the lock file
        path: PathBuf,
    },

    /// Reading or writing the state directory failed
    #[error("state I/O error at {}: {source}", .path.display())]
    StateIo {
        /// Path being accessed
        path: PathBuf,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },
}

impl Error {
    /// Whether this error stems from the module catalog or the request
    /// (unknown names, cycles, duplicates) rather than from the host.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            Self::UnknownModule { .. } | Self::CyclicDependency { .. } | Self::DuplicateModule { .. }
        )
    }
}

fn summarize_checks(failures: &[CheckResult]) -> String {
    failures
        .iter()
        .map(|f| format!("{} ({})", f.name, f.message))
        .collect::<Vec<_>>()
        .join("; ")
}

/// Result type for orchestration operations
pub type Result<T> = std::result::Result<T, Error>;

/// Classification of an apply failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionErrorKind {
    /// Network-class failure, worth retrying
    Transient,
    /// Invalid configuration or similar, retrying cannot help
    Fatal,
    /// The attempt exceeded its hard timeout
    Timeout,
    /// The run was interrupted while waiting to retry
    Interrupted,
}

impl ExecutionErrorKind {
    /// Whether errors of this kind are retryable by default.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient | Self::Timeout)
    }

    /// Short label used in messages and tables.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Transient => "transient",
            Self::Fatal => "fatal",
            Self::Timeout => "timeout",
            Self::Interrupted => "interrupted",
        }
    }
}

impl fmt::Display for ExecutionErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Error returned by a module's apply step or health predicate.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind}: {message}")]
pub struct ExecutionError {
    kind: ExecutionErrorKind,
    message: String,
}

impl ExecutionError {
    /// Create an error of the given kind.
    pub fn new(kind: ExecutionErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// A retryable failure (network hiccup, API server not ready yet).
    pub fn transient(message: impl Into<String>) -> Self {
        Self::new(ExecutionErrorKind::Transient, message)
    }

    /// A non-retryable failure.
    pub fn fatal(message: impl Into<String>) -> Self {
        Self::new(ExecutionErrorKind::Fatal, message)
    }

    /// An attempt that exceeded its hard timeout.
    pub fn timeout(after: Duration) -> Self {
        Self::new(
            ExecutionErrorKind::Timeout,
            format!("attempt exceeded {}s", after.as_secs()),
        )
    }

    /// The run was interrupted before the module could finish.
    pub fn interrupted() -> Self {
        Self::new(ExecutionErrorKind::Interrupted, "run interrupted")
    }

    /// The error classification.
    pub fn kind(&self) -> ExecutionErrorKind {
        self.kind
    }

    /// The error message without the kind prefix.
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Whether the default policy would retry this error.
    pub fn is_retryable(&self) -> bool {
        self.kind.is_retryable()
    }
}

/// Failure of a module's post-apply readiness check.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HealthCheckError {
    /// The predicate never returned true before the deadline
    #[error("health check timed out after {}s ({polls} polls)", .waited.as_secs())]
    TimedOut {
        /// Time spent polling
        waited: Duration,
        /// Number of predicate invocations
        polls: u32,
    },

    /// The predicate itself failed (e.g. the API server is unreachable)
    #[error("health probe error: {message}")]
    Probe {
        /// The predicate's error message
        message: String,
    },

    /// The run was interrupted while polling
    #[error("health check interrupted")]
    Interrupted,
}

/// Module-scoped failure recorded in an execution result.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ModuleError {
    /// Apply failed (fatal, or transient with attempts exhausted)
    #[error("apply failed: {0}")]
    Apply(#[from] ExecutionError),

    /// Apply succeeded but the module never became healthy
    #[error(transparent)]
    HealthCheck(#[from] HealthCheckError),
}

impl ModuleError {
    /// Whether this failure should be reported as a timeout.
    pub fn is_timeout(&self) -> bool {
        match self {
            Self::Apply(e) => e.kind() == ExecutionErrorKind::Timeout,
            Self::HealthCheck(HealthCheckError::TimedOut { .. } | HealthCheckError::Probe { .. }) => {
                true
            }
            Self::HealthCheck(HealthCheckError::Interrupted) => false,
        }
    }

    /// Whether the failure was caused by an interrupt.
    pub fn is_interrupted(&self) -> bool {
        match self {
            Self::Apply(e) => e.kind() == ExecutionErrorKind::Interrupted,
            Self::HealthCheck(e) => matches!(e, HealthCheckError::Interrupted),
        }
    }
}
