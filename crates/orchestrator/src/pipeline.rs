//! End-to-end provisioning pipeline
//!
//! Validate the host, resolve the plan, load the ledger, execute. Each stage
//! can fail the run before the next one starts, so nothing touches the host
//! unless every earlier stage succeeded.

use crate::cancel::CancelToken;
use crate::context::{CommandRunner, ExecutionObserver};
use crate::error::Result;
use crate::executor::Executor;
use crate::planner::{ExecutionPlan, resolve};
use crate::registry::Registry;
use crate::state::StateStore;
use crate::types::{ExecuteOptions, RunReport};
use crate::validator::{SystemProbe, ValidationReport, Validator};
use std::path::PathBuf;
use std::sync::Arc;

/// Everything a completed pipeline produced
#[derive(Debug)]
pub struct PipelineOutcome {
    /// Pre-flight results, `None` when validation was skipped
    pub validation: Option<ValidationReport>,
    pub plan: ExecutionPlan,
    pub report: RunReport,
}

/// Builder and driver for a provisioning run
pub struct Provisioner<'a> {
    registry: &'a Registry,
    runner: Arc<dyn CommandRunner>,
    state_dir: PathBuf,
    options: ExecuteOptions,
    cancel: CancelToken,
    preflight: Option<(Validator, &'a dyn SystemProbe)>,
}

impl<'a> Provisioner<'a> {
    pub fn new(
        registry: &'a Registry,
        runner: Arc<dyn CommandRunner>,
        state_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            registry,
            runner,
            state_dir: state_dir.into(),
            options: ExecuteOptions::default(),
            cancel: CancelToken::new(),
            preflight: None,
        }
    }

    /// Run pre-flight checks against `probe` before anything else
    #[must_use]
    pub fn with_preflight(mut self, validator: Validator, probe: &'a dyn SystemProbe) -> Self {
        self.preflight = Some((validator, probe));
        self
    }

    #[must_use]
    pub fn with_options(mut self, options: ExecuteOptions) -> Self {
        self.options = options;
        self
    }

    #[must_use]
    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Provision `targets` and their dependencies
    pub fn run<S: AsRef<str>>(
        &self,
        targets: &[S],
        observer: &mut dyn ExecutionObserver,
    ) -> Result<PipelineOutcome> {
        let validation = match &self.preflight {
            Some((validator, probe)) => Some(validator.validate(*probe).into_result()?),
            None => {
                log::warn!("Pre-flight checks skipped");
                None
            }
        };

        let plan = resolve(self.registry, targets)?;

        let mut store = StateStore::open(&self.state_dir)?;
        store.load()?;

        let report = Executor::new(self.registry, Arc::clone(&self.runner))
            .with_options(self.options.clone())
            .with_cancel(self.cancel.clone())
            .execute(&plan, &mut store, observer)?;

        Ok(PipelineOutcome {
            validation,
            plan,
            report,
        })
    }
}
