//! Execution engine - walks a plan and converges each module
//!
//! Modules run strictly in plan order on the calling thread. For each one
//! the executor:
//!
//! 1. skips it when the ledger already holds its current fingerprint,
//! 2. applies it under the retry policy, each attempt on a worker thread
//!    bounded by a hard timeout,
//! 3. waits for its health check, and only then
//! 4. records it in the ledger (flushed before moving on).
//!
//! A failed non-optional module stops the run. An interrupt is honoured
//! between modules and while sleeping, never in the middle of an apply.

use crate::cancel::CancelToken;
use crate::context::{ApplyContext, CommandRunner, ExecutionObserver};
use crate::error::{ExecutionError, ModuleError, Result};
use crate::health::HealthChecker;
use crate::planner::ExecutionPlan;
use crate::registry::{ModuleRef, Registry};
use crate::retry::{Attempt, RetryCallback, with_retry};
use crate::state::StateStore;
use crate::types::{ExecuteOptions, ExecutionResult, ExecutionStatus, RunReport};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread;
use std::time::{Duration, Instant};

/// Runs execution plans against a registry
pub struct Executor<'a> {
    registry: &'a Registry,
    runner: Arc<dyn CommandRunner>,
    options: ExecuteOptions,
    cancel: CancelToken,
}

impl<'a> Executor<'a> {
    /// Create an executor with default options
    pub fn new(registry: &'a Registry, runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            registry,
            runner,
            options: ExecuteOptions::default(),
            cancel: CancelToken::new(),
        }
    }

    /// Override retry and timeout options
    #[must_use]
    pub fn with_options(mut self, options: ExecuteOptions) -> Self {
        self.options = options;
        self
    }

    /// Use a shared token so a signal handler can interrupt the run
    #[must_use]
    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// The run's cancel token
    pub fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }

    /// Execute a plan
    ///
    /// Module failures are reported in the returned [`RunReport`]; `Err` is
    /// reserved for failures of the engine itself (ledger I/O, a plan that
    /// names unregistered modules).
    pub fn execute(
        &self,
        plan: &ExecutionPlan,
        store: &mut StateStore,
        observer: &mut dyn ExecutionObserver,
    ) -> Result<RunReport> {
        let modules: Vec<ModuleRef> = plan
            .iter()
            .map(|name| self.registry.get(name).cloned())
            .collect::<Result<_>>()?;

        observer.on_plan(plan);
        log::info!("Executing plan of {} module(s)", modules.len());

        let total = modules.len();
        let mut report = RunReport::default();
        let mut failed: BTreeSet<String> = BTreeSet::new();

        for (index, module) in modules.iter().enumerate() {
            let name = module.name();

            if self.cancel.is_cancelled() {
                log::warn!("Run interrupted before {name}");
                report.interrupted = true;
                report.not_attempted.extend(names_from(&modules, index));
                break;
            }

            if let Some(dep) = module.depends_on().iter().find(|d| failed.contains(*d)) {
                report
                    .warnings
                    .push(format!("{name} not attempted: dependency '{dep}' failed"));
                report.not_attempted.push(name.to_string());
                failed.insert(name.to_string());
                if !module.optional() {
                    // A required module can no longer be satisfied
                    report.aborted_by = Some(name.to_string());
                    report.not_attempted.extend(names_from(&modules, index + 1));
                    break;
                }
                continue;
            }

            observer.on_module_start(name, index, total);

            let fingerprint = module.fingerprint();
            if store.is_applied(name, &fingerprint) {
                log::info!("Skipping {name}: fingerprint {} unchanged", fingerprint.short());
                let result = ExecutionResult::skipped(name);
                observer.on_module_complete(&result);
                report.results.push(result);
                continue;
            }

            let result = self.run_module(module, store, observer)?;
            observer.on_module_complete(&result);

            let interrupted = result.error.as_ref().is_some_and(ModuleError::is_interrupted);
            let success = result.status.is_success();
            report.results.push(result);

            if success {
                continue;
            }

            store.record_failure(name);
            failed.insert(name.to_string());

            if interrupted {
                report.interrupted = true;
                report.not_attempted.extend(names_from(&modules, index + 1));
                break;
            }

            if module.optional() {
                log::warn!("Optional module {name} failed, continuing");
                report.warnings.push(format!("optional module '{name}' failed"));
                continue;
            }

            log::error!("Module {name} failed, aborting run");
            report.aborted_by = Some(name.to_string());
            report.not_attempted.extend(names_from(&modules, index + 1));
            break;
        }

        let summary = report.summary();
        log::info!(
            "Run finished: {} applied, {} skipped, {} failed, {} timed out, {} not attempted",
            summary.applied,
            summary.skipped,
            summary.failed,
            summary.timed_out,
            summary.not_attempted
        );
        Ok(report)
    }

    /// Apply, health-check and record a module whose fingerprint changed
    fn run_module(
        &self,
        module: &ModuleRef,
        store: &mut StateStore,
        observer: &mut dyn ExecutionObserver,
    ) -> Result<ExecutionResult> {
        let name = module.name();
        let started = Instant::now();
        let timeout = module
            .attempt_timeout()
            .unwrap_or(self.options.attempt_timeout);

        let retry = {
            let mut relay = RetryRelay {
                module: name,
                observer: &mut *observer,
            };
            with_retry(&self.options.retry, &self.cancel, &mut relay, |number| {
                match self.attempt(module, number, timeout) {
                    Ok(()) => Attempt::Success(()),
                    Err(e) if module.retryable(&e) => Attempt::TransientFailure(e),
                    Err(e) => Attempt::FatalFailure(e),
                }
            })
        };

        let mut result = ExecutionResult {
            module: name.to_string(),
            status: ExecutionStatus::Applied,
            attempts: retry.attempts,
            duration: Duration::ZERO,
            error: None,
            warnings: Vec::new(),
        };

        if let Err(e) = retry.outcome {
            let error = ModuleError::from(e);
            result.status = failure_status(&error);
            result.error = Some(error);
            result.duration = started.elapsed();
            return Ok(result);
        }

        // Transient failures that were eventually overcome
        result.warnings = retry
            .history
            .iter()
            .enumerate()
            .map(|(i, e)| format!("attempt {} failed: {e}", i + 1))
            .collect();

        if let Some(spec) = module.health_check() {
            let ctx = ApplyContext::for_attempt(
                Arc::clone(&self.runner),
                self.cancel.clone(),
                Instant::now().checked_add(spec.timeout),
            );
            let outcome =
                HealthChecker::new(&self.cancel).wait(module.as_ref(), &ctx, spec, observer);
            if let Err(e) = outcome.into_result() {
                let error = ModuleError::from(e);
                result.status = failure_status(&error);
                result.error = Some(error);
                result.duration = started.elapsed();
                return Ok(result);
            }
        }

        store.record_success(name, module.fingerprint(), module.version())?;
        result.duration = started.elapsed();
        Ok(result)
    }

    /// One apply attempt on a worker thread, bounded by `timeout`
    ///
    /// On timeout the attempt's own token is cancelled and the worker gets
    /// `cancel_grace` to return. A worker that ignores cancellation is
    /// detached.
    fn attempt(
        &self,
        module: &ModuleRef,
        number: u32,
        timeout: Duration,
    ) -> std::result::Result<(), ExecutionError> {
        let name = module.name();
        let cancel = CancelToken::new();
        let ctx = ApplyContext::for_attempt(
            Arc::clone(&self.runner),
            cancel.clone(),
            Instant::now().checked_add(timeout),
        );

        log::debug!("Applying {name} (attempt {number})");

        let (tx, rx) = mpsc::channel();
        let worker = Arc::clone(module);
        let handle = thread::Builder::new()
            .name(format!("apply-{name}"))
            .spawn(move || {
                let _ = tx.send(worker.apply(&ctx));
            })
            .map_err(|e| ExecutionError::fatal(format!("cannot start apply worker: {e}")))?;

        match rx.recv_timeout(timeout) {
            Ok(result) => {
                let _ = handle.join();
                if let Err(e) = &result {
                    log::warn!("Attempt {number} of {name} failed: {e}");
                }
                result
            }
            Err(RecvTimeoutError::Timeout) => {
                log::warn!(
                    "Attempt {number} of {name} exceeded {}s, cancelling",
                    timeout.as_secs()
                );
                cancel.cancel();
                if rx.recv_timeout(self.options.cancel_grace).is_ok() {
                    let _ = handle.join();
                } else {
                    log::warn!("Apply worker for {name} did not stop, detaching it");
                }
                Err(ExecutionError::timeout(timeout))
            }
            Err(RecvTimeoutError::Disconnected) => {
                let _ = handle.join();
                Err(ExecutionError::fatal(format!("apply of {name} panicked")))
            }
        }
    }
}

fn failure_status(error: &ModuleError) -> ExecutionStatus {
    if error.is_timeout() {
        ExecutionStatus::TimedOut
    } else {
        ExecutionStatus::Failed
    }
}

fn names_from(modules: &[ModuleRef], start: usize) -> Vec<String> {
    modules
        .iter()
        .skip(start)
        .map(|m| m.name().to_string())
        .collect()
}

/// Forwards retry notifications to the run observer
struct RetryRelay<'a, 'o> {
    module: &'a str,
    observer: &'a mut (dyn ExecutionObserver + 'o),
}

impl RetryCallback for RetryRelay<'_, '_> {
    fn on_retry(&mut self, attempt: u32, max_attempts: u32, error: &ExecutionError, delay: Duration) {
        log::info!(
            "Retrying {} in {:.1}s (attempt {attempt}/{max_attempts} failed)",
            self.module,
            delay.as_secs_f64()
        );
        self.observer
            .on_retry(self.module, attempt, max_attempts, error, delay);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{NoProgress, NoRunner};
    use crate::error::{Error, ExecutionErrorKind, HealthCheckError};
    use crate::module::{Fingerprint, HealthCheck, Module};
    use crate::planner::resolve;
    use crate::retry::RetryPolicy;
    use crate::state::read_state;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tempfile::TempDir;

    #[derive(Debug, Clone, Copy)]
    enum Behavior {
        Succeed,
        /// Transient failures before succeeding
        FlakyFor(u32),
        Fatal,
        /// Keep applying until the attempt is cancelled
        Hang,
    }

    #[derive(Debug)]
    struct Fake {
        name: String,
        deps: Vec<String>,
        version: String,
        behavior: Behavior,
        optional: bool,
        health: Option<(HealthCheck, bool)>,
        timeout: Option<Duration>,
        trip: Option<CancelToken>,
        applies: Arc<AtomicU32>,
    }

    impl Fake {
        fn new(name: &str, deps: &[&str]) -> Self {
            Self {
                name: name.to_string(),
                deps: deps.iter().map(|d| (*d).to_string()).collect(),
                version: "1".to_string(),
                behavior: Behavior::Succeed,
                optional: false,
                health: None,
                timeout: None,
                trip: None,
                applies: Arc::new(AtomicU32::new(0)),
            }
        }

        fn behavior(mut self, behavior: Behavior) -> Self {
            self.behavior = behavior;
            self
        }

        fn version(mut self, version: &str) -> Self {
            self.version = version.to_string();
            self
        }

        fn optional(mut self) -> Self {
            self.optional = true;
            self
        }

        fn health(mut self, timeout_ms: u64, ready: bool) -> Self {
            let spec = HealthCheck {
                timeout: Duration::from_millis(timeout_ms),
                interval: Duration::from_millis(5),
            };
            self.health = Some((spec, ready));
            self
        }

        fn timeout(mut self, timeout: Duration) -> Self {
            self.timeout = Some(timeout);
            self
        }

        /// Cancel the run token while applying
        fn interrupts(mut self, cancel: &CancelToken) -> Self {
            self.trip = Some(cancel.clone());
            self
        }

        fn counter(&self) -> Arc<AtomicU32> {
            Arc::clone(&self.applies)
        }
    }

    impl Module for Fake {
        fn name(&self) -> &str {
            &self.name
        }

        fn depends_on(&self) -> &[String] {
            &self.deps
        }

        fn version(&self) -> Option<String> {
            Some(self.version.clone())
        }

        fn fingerprint(&self) -> Fingerprint {
            Fingerprint::of([self.name.as_str(), self.version.as_str()])
        }

        fn apply(&self, ctx: &ApplyContext) -> std::result::Result<(), ExecutionError> {
            let n = self.applies.fetch_add(1, Ordering::SeqCst) + 1;
            if let Some(cancel) = &self.trip {
                cancel.cancel();
            }
            match self.behavior {
                Behavior::Succeed => Ok(()),
                Behavior::FlakyFor(failures) if n <= failures => {
                    Err(ExecutionError::transient("connection reset by peer"))
                }
                Behavior::FlakyFor(_) => Ok(()),
                Behavior::Fatal => Err(ExecutionError::fatal("invalid manifest")),
                Behavior::Hang => {
                    while !ctx.is_cancelled() {
                        thread::sleep(Duration::from_millis(5));
                    }
                    Err(ExecutionError::transient("cancelled"))
                }
            }
        }

        fn health_check(&self) -> Option<HealthCheck> {
            self.health.map(|(spec, _)| spec)
        }

        fn check_health(&self, _ctx: &ApplyContext) -> std::result::Result<bool, ExecutionError> {
            Ok(self.health.is_none_or(|(_, ready)| ready))
        }

        fn optional(&self) -> bool {
            self.optional
        }

        fn attempt_timeout(&self) -> Option<Duration> {
            self.timeout
        }
    }

    fn options() -> ExecuteOptions {
        ExecuteOptions {
            retry: RetryPolicy {
                max_attempts: 3,
                base_delay: Duration::from_millis(1),
                backoff_factor: 1.0,
                max_delay: Duration::from_millis(5),
            },
            attempt_timeout: Duration::from_secs(10),
            cancel_grace: Duration::from_secs(1),
        }
    }

    fn registry(modules: Vec<Fake>) -> Registry {
        let mut registry = Registry::new();
        for module in modules {
            registry.register(module).unwrap();
        }
        registry
    }

    fn run(registry: &Registry, targets: &[&str], dir: &TempDir) -> Result<RunReport> {
        let plan = resolve(registry, targets)?;
        let mut store = StateStore::open(dir.path())?;
        store.load()?;
        Executor::new(registry, Arc::new(NoRunner))
            .with_options(options())
            .execute(&plan, &mut store, &mut NoProgress)
    }

    fn statuses(report: &RunReport) -> Vec<(&str, ExecutionStatus)> {
        report
            .results
            .iter()
            .map(|r| (r.module.as_str(), r.status))
            .collect()
    }

    fn chain() -> Vec<Fake> {
        vec![
            Fake::new("base", &[]),
            Fake::new("net", &["base"]),
            Fake::new("ingress", &["net"]),
        ]
    }

    #[test]
    fn test_applies_in_plan_order_and_records() {
        let dir = TempDir::new().unwrap();
        let registry = registry(chain());
        let report = run(&registry, &["ingress"], &dir).unwrap();

        assert!(report.is_success());
        assert_eq!(
            statuses(&report),
            [
                ("base", ExecutionStatus::Applied),
                ("net", ExecutionStatus::Applied),
                ("ingress", ExecutionStatus::Applied),
            ]
        );
        let state = read_state(&dir.path().join("state.json")).unwrap();
        assert_eq!(state.modules.len(), 3);
        assert_eq!(state.modules["net"].version.as_deref(), Some("1"));
    }

    #[test]
    fn test_second_run_skips_everything() {
        let dir = TempDir::new().unwrap();
        let modules = chain();
        let counters: Vec<_> = modules.iter().map(Fake::counter).collect();
        let registry = registry(modules);

        run(&registry, &["ingress"], &dir).unwrap();
        let report = run(&registry, &["ingress"], &dir).unwrap();

        assert!(report.is_success());
        assert!(report.results.iter().all(|r| r.status == ExecutionStatus::Skipped));
        assert!(report.results.iter().all(|r| r.attempts == 0));
        for counter in counters {
            assert_eq!(counter.load(Ordering::SeqCst), 1);
        }
    }

    #[test]
    fn test_drift_reapplies_only_changed_module() {
        let dir = TempDir::new().unwrap();
        run(&registry(chain()), &["ingress"], &dir).unwrap();

        let net = Fake::new("net", &["base"]).version("2");
        let net_applies = net.counter();
        let changed = registry(vec![Fake::new("base", &[]), net, Fake::new("ingress", &["net"])]);
        let report = run(&changed, &["ingress"], &dir).unwrap();

        assert_eq!(
            statuses(&report),
            [
                ("base", ExecutionStatus::Skipped),
                ("net", ExecutionStatus::Applied),
                ("ingress", ExecutionStatus::Skipped),
            ]
        );
        assert_eq!(net_applies.load(Ordering::SeqCst), 1);
        let state = read_state(&dir.path().join("state.json")).unwrap();
        assert_eq!(state.modules["net"].version.as_deref(), Some("2"));
    }

    #[test]
    fn test_transient_failures_then_success() {
        let dir = TempDir::new().unwrap();
        let flaky = Fake::new("cni", &[]).behavior(Behavior::FlakyFor(2));
        let applies = flaky.counter();
        let registry = registry(vec![flaky]);

        let report = run(&registry, &["cni"], &dir).unwrap();
        let result = report.result("cni").unwrap();

        assert_eq!(result.status, ExecutionStatus::Applied);
        assert_eq!(result.attempts, 3);
        assert_eq!(result.warnings.len(), 2);
        assert_eq!(applies.load(Ordering::SeqCst), 3);
        assert!(read_state(&dir.path().join("state.json")).unwrap().modules.contains_key("cni"));
    }

    #[test]
    fn test_ledger_written_once_after_retries() {
        /// Reads the ledger after every failed attempt and at completion
        struct LedgerWatch {
            path: std::path::PathBuf,
            recorded: Vec<bool>,
        }

        impl LedgerWatch {
            fn look(&mut self, module: &str) {
                let state = read_state(&self.path).unwrap();
                self.recorded.push(state.modules.contains_key(module));
            }
        }

        impl ExecutionObserver for LedgerWatch {
            fn on_plan(&mut self, _plan: &ExecutionPlan) {}
            fn on_module_start(&mut self, _: &str, _: usize, _: usize) {}
            fn on_retry(&mut self, module: &str, _: u32, _: u32, _: &ExecutionError, _: Duration) {
                self.look(module);
            }
            fn on_health_wait(&mut self, _: &str, _: u32, _: Duration) {}
            fn on_module_complete(&mut self, result: &ExecutionResult) {
                self.look(&result.module);
            }
        }

        let dir = TempDir::new().unwrap();
        let path = dir.path().join("state.json");
        let registry = registry(vec![Fake::new("cni", &[]).behavior(Behavior::FlakyFor(2))]);
        let plan = resolve(&registry, &["cni"]).unwrap();
        let mut watch = LedgerWatch {
            path: path.clone(),
            recorded: Vec::new(),
        };

        {
            let mut store = StateStore::open(dir.path()).unwrap();
            store.load().unwrap();
            Executor::new(&registry, Arc::new(NoRunner))
                .with_options(options())
                .execute(&plan, &mut store, &mut watch)
                .unwrap();
        }

        // Nothing written while retrying, one entry once the module converged
        assert_eq!(watch.recorded, [false, false, true]);
        let applied_at = read_state(&path).unwrap().modules["cni"].applied_at;

        // A skipped re-run leaves the entry as it was
        let report = run(&registry, &["cni"], &dir).unwrap();
        assert_eq!(report.result("cni").unwrap().status, ExecutionStatus::Skipped);
        assert_eq!(read_state(&path).unwrap().modules["cni"].applied_at, applied_at);
    }

    #[test]
    fn test_huge_timeouts_do_not_overflow() {
        let dir = TempDir::new().unwrap();
        let registry = registry(vec![Fake::new("ingress", &[]).health(0, true)]);
        let plan = resolve(&registry, &["ingress"]).unwrap();
        let mut store = StateStore::open(dir.path()).unwrap();
        store.load().unwrap();

        let mut options = options();
        options.attempt_timeout = Duration::from_secs(u64::MAX / 2);
        let report = Executor::new(&registry, Arc::new(NoRunner))
            .with_options(options)
            .execute(&plan, &mut store, &mut NoProgress)
            .unwrap();

        assert!(report.is_success());
    }

    #[test]
    fn test_retries_exhausted_fails() {
        let dir = TempDir::new().unwrap();
        let flaky = Fake::new("cni", &[]).behavior(Behavior::FlakyFor(10));
        let applies = flaky.counter();
        let registry = registry(vec![flaky]);

        let report = run(&registry, &["cni"], &dir).unwrap();
        let result = report.result("cni").unwrap();

        assert_eq!(result.status, ExecutionStatus::Failed);
        assert_eq!(result.attempts, 3);
        assert_eq!(applies.load(Ordering::SeqCst), 3);
        assert_eq!(report.aborted_by.as_deref(), Some("cni"));
    }

    #[test]
    fn test_health_timeout_is_not_recorded() {
        let dir = TempDir::new().unwrap();
        let registry = registry(vec![Fake::new("ingress", &[]).health(30, false)]);

        let report = run(&registry, &["ingress"], &dir).unwrap();
        let result = report.result("ingress").unwrap();

        assert_eq!(result.status, ExecutionStatus::TimedOut);
        assert!(matches!(
            result.error,
            Some(ModuleError::HealthCheck(HealthCheckError::TimedOut { .. }))
        ));
        assert!(!report.is_success());
        let state = read_state(&dir.path().join("state.json")).unwrap();
        assert!(!state.modules.contains_key("ingress"));
    }

    #[test]
    fn test_healthy_module_is_recorded() {
        let dir = TempDir::new().unwrap();
        let registry = registry(vec![Fake::new("ingress", &[]).health(1000, true)]);
        let report = run(&registry, &["ingress"], &dir).unwrap();
        assert_eq!(report.result("ingress").unwrap().status, ExecutionStatus::Applied);
    }

    #[test]
    fn test_fatal_failure_aborts_dependents() {
        let dir = TempDir::new().unwrap();
        let net = Fake::new("net", &["base"]);
        let ingress = Fake::new("ingress", &["net"]);
        let (net_applies, ingress_applies) = (net.counter(), ingress.counter());
        let base = Fake::new("base", &[]).behavior(Behavior::Fatal);
        let base_applies = base.counter();
        let registry = registry(vec![base, net, ingress]);

        let report = run(&registry, &["ingress"], &dir).unwrap();

        assert_eq!(statuses(&report), [("base", ExecutionStatus::Failed)]);
        assert_eq!(report.result("base").unwrap().attempts, 1);
        assert_eq!(base_applies.load(Ordering::SeqCst), 1);
        assert_eq!(report.not_attempted, ["net", "ingress"]);
        assert_eq!(report.aborted_by.as_deref(), Some("base"));
        assert_eq!(net_applies.load(Ordering::SeqCst), 0);
        assert_eq!(ingress_applies.load(Ordering::SeqCst), 0);
        assert!(read_state(&dir.path().join("state.json")).unwrap().modules.is_empty());
    }

    #[test]
    fn test_optional_failure_continues() {
        let dir = TempDir::new().unwrap();
        let registry = registry(vec![
            Fake::new("base", &[]),
            Fake::new("backup", &["base"])
                .behavior(Behavior::Fatal)
                .optional(),
            Fake::new("restore-drill", &["backup"]).optional(),
            Fake::new("vpn", &["base"]),
        ]);

        let report = run(&registry, &["restore-drill", "vpn"], &dir).unwrap();

        assert!(report.is_success());
        assert_eq!(report.result("backup").unwrap().status, ExecutionStatus::Failed);
        assert_eq!(report.result("vpn").unwrap().status, ExecutionStatus::Applied);
        assert!(report.result("restore-drill").is_none());
        assert_eq!(report.not_attempted, ["restore-drill"]);
        assert_eq!(report.warnings.len(), 2);
    }

    #[test]
    fn test_required_dependent_of_failed_optional_aborts() {
        let dir = TempDir::new().unwrap();
        let registry = registry(vec![
            Fake::new("backup", &[]).behavior(Behavior::Fatal).optional(),
            Fake::new("archive", &["backup"]),
            Fake::new("zz-last", &["archive"]),
        ]);

        let report = run(&registry, &["zz-last"], &dir).unwrap();

        assert!(!report.is_success());
        assert_eq!(report.aborted_by.as_deref(), Some("archive"));
        assert_eq!(report.not_attempted, ["archive", "zz-last"]);
    }

    #[test]
    fn test_abort_keeps_earlier_blocked_modules() {
        let dir = TempDir::new().unwrap();
        let registry = registry(vec![
            Fake::new("backup", &[]).behavior(Behavior::Fatal).optional(),
            Fake::new("drill", &["backup"]).optional(),
            Fake::new("zcore", &[]).behavior(Behavior::Fatal),
            Fake::new("zzend", &["zcore"]),
        ]);

        let report = run(&registry, &["drill", "zzend"], &dir).unwrap();

        assert_eq!(
            statuses(&report),
            [("backup", ExecutionStatus::Failed), ("zcore", ExecutionStatus::Failed)]
        );
        assert_eq!(report.aborted_by.as_deref(), Some("zcore"));
        assert_eq!(report.not_attempted, ["drill", "zzend"]);
        assert_eq!(report.results.len() + report.not_attempted.len(), 4);
    }

    #[test]
    fn test_apply_timeout() {
        let dir = TempDir::new().unwrap();
        let hang = Fake::new("registry", &[])
            .behavior(Behavior::Hang)
            .timeout(Duration::from_millis(50));
        let applies = hang.counter();
        let registry = registry(vec![hang]);

        let report = run(&registry, &["registry"], &dir).unwrap();
        let result = report.result("registry").unwrap();

        assert_eq!(result.status, ExecutionStatus::TimedOut);
        // Timeouts are retryable, so every attempt ran
        assert_eq!(result.attempts, 3);
        assert_eq!(applies.load(Ordering::SeqCst), 3);
        match &result.error {
            Some(ModuleError::Apply(e)) => assert_eq!(e.kind(), ExecutionErrorKind::Timeout),
            other => panic!("expected apply timeout, got {other:?}"),
        }
    }

    #[test]
    fn test_interrupt_stops_before_next_module() {
        let dir = TempDir::new().unwrap();
        let cancel = CancelToken::new();
        let net = Fake::new("net", &["base"]);
        let net_applies = net.counter();
        let registry = registry(vec![Fake::new("base", &[]).interrupts(&cancel), net]);

        let plan = resolve(&registry, &["net"]).unwrap();
        let mut store = StateStore::open(dir.path()).unwrap();
        store.load().unwrap();
        let report = Executor::new(&registry, Arc::new(NoRunner))
            .with_options(options())
            .with_cancel(cancel)
            .execute(&plan, &mut store, &mut NoProgress)
            .unwrap();

        // The in-flight module completes and is recorded
        assert_eq!(statuses(&report), [("base", ExecutionStatus::Applied)]);
        assert!(report.interrupted);
        assert!(!report.is_success());
        assert_eq!(report.not_attempted, ["net"]);
        assert_eq!(net_applies.load(Ordering::SeqCst), 0);
        assert!(store.state().modules.contains_key("base"));
    }

    #[test]
    fn test_corrupt_state_applies_nothing() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("state.json"), "{\"schema\":1,\"mod").unwrap();
        let base = Fake::new("base", &[]);
        let applies = base.counter();
        let registry = registry(vec![base]);

        let err = run(&registry, &["base"], &dir).unwrap_err();
        assert!(matches!(err, Error::StateCorruption { .. }));
        assert_eq!(applies.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_observer_sees_every_module() {
        #[derive(Default)]
        struct Recorder {
            started: Vec<String>,
            completed: Vec<(String, ExecutionStatus)>,
            retries: u32,
        }

        impl ExecutionObserver for Recorder {
            fn on_plan(&mut self, _plan: &ExecutionPlan) {}
            fn on_module_start(&mut self, module: &str, _index: usize, _total: usize) {
                self.started.push(module.to_string());
            }
            fn on_retry(&mut self, _: &str, _: u32, _: u32, _: &ExecutionError, _: Duration) {
                self.retries += 1;
            }
            fn on_health_wait(&mut self, _: &str, _: u32, _: Duration) {}
            fn on_module_complete(&mut self, result: &ExecutionResult) {
                self.completed.push((result.module.clone(), result.status));
            }
        }

        let dir = TempDir::new().unwrap();
        let registry = registry(vec![
            Fake::new("base", &[]),
            Fake::new("net", &["base"]).behavior(Behavior::FlakyFor(1)),
        ]);
        let plan = resolve(&registry, &["net"]).unwrap();
        let mut store = StateStore::open(dir.path()).unwrap();
        store.load().unwrap();

        let mut recorder = Recorder::default();
        Executor::new(&registry, Arc::new(NoRunner))
            .with_options(options())
            .execute(&plan, &mut store, &mut recorder)
            .unwrap();

        assert_eq!(recorder.started, ["base", "net"]);
        assert_eq!(recorder.retries, 1);
        assert_eq!(recorder.completed[1], ("net".to_string(), ExecutionStatus::Applied));
    }
}
