//! Drift between a plan and the ledger
//!
//! Read-only: answers "what would `install` do" without touching the host.

use crate::error::Result;
use crate::module::Fingerprint;
use crate::planner::ExecutionPlan;
use crate::registry::Registry;
use crate::state::SystemState;
use serde::Serialize;
use std::fmt;

/// How a module's current fingerprint relates to the ledger
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DriftStatus {
    /// Ledger matches; install would skip it
    UpToDate,
    /// Ledger holds a different fingerprint; install would re-apply
    Drifted,
    /// No ledger entry
    NeverApplied,
}

impl DriftStatus {
    /// Whether install would run the module's apply step
    pub fn needs_apply(&self) -> bool {
        !matches!(self, Self::UpToDate)
    }
}

impl fmt::Display for DriftStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UpToDate => write!(f, "up to date"),
            Self::Drifted => write!(f, "drifted"),
            Self::NeverApplied => write!(f, "not applied"),
        }
    }
}

/// Drift of one planned module
#[derive(Debug, Clone, Serialize)]
pub struct ModuleDrift {
    pub module: String,
    pub status: DriftStatus,
    pub current: Fingerprint,
    pub recorded: Option<Fingerprint>,
    pub optional: bool,
}

/// Compare every planned module against the ledger, in plan order
pub fn compute_drift(
    registry: &Registry,
    plan: &ExecutionPlan,
    state: &SystemState,
) -> Result<Vec<ModuleDrift>> {
    plan.iter()
        .map(|name| {
            let module = registry.get(name)?;
            let current = module.fingerprint();
            let recorded = state.fingerprint(name).cloned();
            let status = match &recorded {
                None => DriftStatus::NeverApplied,
                Some(fp) if *fp == current => DriftStatus::UpToDate,
                Some(_) => DriftStatus::Drifted,
            };
            Ok(ModuleDrift {
                module: name.to_string(),
                status,
                current,
                recorded,
                optional: module.optional(),
            })
        })
        .collect()
}

/// Counts per drift status
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DriftSummary {
    pub up_to_date: usize,
    pub drifted: usize,
    pub never_applied: usize,
}

impl DriftSummary {
    pub fn from_drift(drift: &[ModuleDrift]) -> Self {
        let mut summary = Self::default();
        for entry in drift {
            match entry.status {
                DriftStatus::UpToDate => summary.up_to_date += 1,
                DriftStatus::Drifted => summary.drifted += 1,
                DriftStatus::NeverApplied => summary.never_applied += 1,
            }
        }
        summary
    }

    /// Modules install would apply
    pub fn pending(&self) -> usize {
        self.drifted + self.never_applied
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::planner::resolve;
    use crate::registry::tests::Stub;
    use crate::state::ModuleRecord;
    use chrono::Utc;

    fn record(fingerprint: Fingerprint) -> ModuleRecord {
        ModuleRecord {
            applied_at: Utc::now(),
            fingerprint,
            version: None,
        }
    }

    #[test]
    fn test_drift_statuses() {
        let mut registry = Registry::new();
        registry.register(Stub::new("base", &[])).unwrap();
        registry.register(Stub::new("net", &["base"])).unwrap();
        registry.register(Stub::new("ingress", &["net"])).unwrap();

        let mut state = SystemState::default();
        state
            .modules
            .insert("base".into(), record(registry.get("base").unwrap().fingerprint()));
        state
            .modules
            .insert("net".into(), record(Fingerprint::new("stale")));

        let plan = resolve(&registry, &["ingress"]).unwrap();
        let drift = compute_drift(&registry, &plan, &state).unwrap();

        let statuses: Vec<DriftStatus> = drift.iter().map(|d| d.status).collect();
        assert_eq!(
            statuses,
            [
                DriftStatus::UpToDate,
                DriftStatus::Drifted,
                DriftStatus::NeverApplied
            ]
        );
        assert_eq!(drift[1].recorded, Some(Fingerprint::new("stale")));

        let summary = DriftSummary::from_drift(&drift);
        assert_eq!(summary.pending(), 2);
        assert_eq!(summary.up_to_date, 1);
    }

    #[test]
    fn test_needs_apply() {
        assert!(!DriftStatus::UpToDate.needs_apply());
        assert!(DriftStatus::Drifted.needs_apply());
        assert!(DriftStatus::NeverApplied.needs_apply());
    }
}
