//! # Orchestrator
//!
//! Module orchestration engine for provisioning a host stack.
//!
//! The crate resolves dependencies between provisioning modules, applies
//! them idempotently with retry and timeout, verifies them with health
//! checks, and records what was applied in a crash-safe ledger.
//!
//! ## Core Concepts
//!
//! - **Module**: one idempotent provisioning unit ("install containerd")
//! - **Registry**: the catalog of modules, keyed by name
//! - **ExecutionPlan**: the dependency-ordered list of modules to run
//! - **Validator**: pre-flight checks of host preconditions
//! - **Executor**: walks a plan, skipping modules whose fingerprint matches
//!   the ledger
//! - **StateStore**: the persisted ledger of applied fingerprints
//!
//! ## Example
//!
//! ```ignore
//! use orchestrator::{NoProgress, Provisioner, Registry};
//! use std::sync::Arc;
//!
//! let mut registry = Registry::new();
//! registry.register(Containerd::default())?;
//! registry.register(Cni::default())?;
//!
//! let outcome = Provisioner::new(&registry, Arc::new(runner), "/var/lib/kubestrap")
//!     .with_preflight(validator, &probe)
//!     .run(&["cni"], &mut NoProgress)?;
//!
//! assert!(outcome.report.is_success());
//! ```
//!
//! ## Provider Traits
//!
//! The engine never spawns processes or inspects the host itself:
//!
//! - [`CommandRunner`]: runs external commands for module steps
//! - [`SystemProbe`]: answers pre-flight questions about the host
//! - [`ExecutionObserver`]: receives progress updates
//!
//! Tests substitute fakes for all three.

pub mod cancel;
pub mod context;
pub mod drift;
pub mod error;
pub mod executor;
pub mod health;
pub mod module;
pub mod pipeline;
pub mod planner;
pub mod registry;
pub mod retry;
pub mod state;
pub mod types;
pub mod validator;

// Re-export main types at crate root
pub use cancel::CancelToken;
pub use context::{ApplyContext, CommandRunner, ExecutionObserver, NoProgress, NoRunner};
pub use drift::{DriftStatus, DriftSummary, ModuleDrift, compute_drift};
pub use error::{
    Error, ExecutionError, ExecutionErrorKind, HealthCheckError, ModuleError, Result,
};
pub use executor::Executor;
pub use health::{HealthChecker, HealthOutcome, HealthPhase};
pub use module::{Fingerprint, HealthCheck, Module};
pub use pipeline::{PipelineOutcome, Provisioner};
pub use planner::{ExecutionPlan, resolve, resolve_all};
pub use registry::{ModuleRef, Registry};
pub use retry::{Attempt, RetryPolicy};
pub use state::{ModuleRecord, StateStore, SystemState, read_state};
pub use types::{
    CommandOutput, ExecuteOptions, ExecutionResult, ExecutionStatus, Invocation, RunReport,
    RunSummary,
};
pub use validator::{
    CheckResult, OsInfo, OsRequirement, PreflightConfig, Severity, SystemProbe, ValidationReport,
    Validator,
};
