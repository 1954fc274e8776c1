//! Module catalog
//!
//! Modules are declared in TOML. The built-in catalog ships inside the
//! binary; `catalog.path` in the settings file replaces it wholesale.
//!
//! ```toml
//! transient_patterns = ["connection refused"]
//!
//! [[module]]
//! name = "cni"
//! version = "1.15.6"
//! depends_on = ["kubernetes"]
//! retry = "network"      # network | always | never
//! timeout_secs = 600     # per attempt
//!
//! [[module.step]]
//! run = ["helm", "upgrade", "--install", "cilium", "cilium/cilium"]
//! env = { KUBECONFIG = "/etc/kubernetes/admin.conf" }
//!
//! [module.health]
//! run = ["kubectl", "rollout", "status", "ds/cilium"]
//! ```

mod command;

pub use command::{CommandModule, RetryClass};

use crate::config::{ConfigError, MAX_DURATION_SECS, Settings};
use orchestrator::{HealthCheck, Invocation, Registry};
use regex::{Regex, RegexSet};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

/// Catalog compiled into the binary
pub const BUILTIN: &str = include_str!("builtin.toml");

/// Module names are used in file names and on the command line
const NAME_PATTERN: &str = "^[a-z0-9][a-z0-9-]*$";

/// Top-level catalog document
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct CatalogFile {
    /// Output patterns marking a failed command as worth retrying
    #[serde(default)]
    pub transient_patterns: Vec<String>,
    #[serde(default, rename = "module")]
    pub modules: Vec<ModuleSpec>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ModuleSpec {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub version: String,
    #[serde(default)]
    pub depends_on: Vec<String>,
    #[serde(default)]
    pub optional: bool,
    #[serde(default)]
    pub retry: RetryClass,
    pub timeout_secs: Option<u64>,
    #[serde(default, rename = "step")]
    pub steps: Vec<StepSpec>,
    pub health: Option<HealthSpec>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StepSpec {
    /// Program followed by its arguments
    pub run: Vec<String>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HealthSpec {
    pub run: Vec<String>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    pub timeout_secs: Option<u64>,
    pub interval_secs: Option<u64>,
}

impl CatalogFile {
    /// Parse catalog TOML
    pub fn parse(content: &str, origin: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(|e| {
            ConfigError::Catalog(format!("{origin}: {}", e.message()))
        })
    }

    /// Read the catalog chosen by the settings
    pub fn load(settings: &Settings) -> Result<Self, ConfigError> {
        match &settings.catalog.path {
            Some(raw) => {
                let path = crate::paths::expand(raw);
                let content = fs::read_to_string(&path).map_err(|source| ConfigError::Read {
                    path: path.clone(),
                    source,
                })?;
                log::debug!("Using module catalog {}", path.display());
                Self::parse(&content, &path.display().to_string())
            }
            None => Self::parse(BUILTIN, "built-in catalog"),
        }
    }

    /// Check the catalog and build a registry from it
    ///
    /// Dependencies on unknown modules and cycles are left to the planner so
    /// they are reported against the targets that actually hit them.
    pub fn into_registry(self, health_defaults: HealthCheck) -> Result<Registry, ConfigError> {
        let transient = RegexSet::new(self.transient_patterns.iter().map(|p| format!("(?i){p}")))
            .map_err(|e| ConfigError::Catalog(format!("bad transient pattern: {e}")))?;
        let transient = Arc::new(transient);
        let name_re =
            Regex::new(NAME_PATTERN).map_err(|e| ConfigError::Catalog(e.to_string()))?;

        let mut registry = Registry::new();
        for spec in self.modules {
            let module = build_module(spec, &name_re, health_defaults, &transient)?;
            registry.register(module)?;
        }
        log::debug!("Catalog holds {} modules", registry.len());
        Ok(registry)
    }
}

/// Load the configured catalog into a registry
pub fn load_registry(settings: &Settings) -> Result<Registry, ConfigError> {
    CatalogFile::load(settings)?.into_registry(settings.health_defaults())
}

fn build_module(
    spec: ModuleSpec,
    name_re: &Regex,
    health_defaults: HealthCheck,
    transient: &Arc<RegexSet>,
) -> Result<CommandModule, ConfigError> {
    let name = spec.name;
    if !name_re.is_match(&name) {
        return Err(ConfigError::Catalog(format!(
            "module name '{name}' must be lowercase letters, digits and dashes"
        )));
    }
    if spec.version.trim().is_empty() {
        return Err(ConfigError::Catalog(format!("module '{name}' has an empty version")));
    }
    if spec.steps.is_empty() {
        return Err(ConfigError::Catalog(format!("module '{name}' has no steps")));
    }
    if let Some(secs) = spec.timeout_secs {
        check_secs(&name, "timeout_secs", secs, 1)?;
    }
    if spec.depends_on.iter().any(|dep| *dep == name) {
        return Err(ConfigError::Catalog(format!("module '{name}' depends on itself")));
    }

    let steps = spec
        .steps
        .into_iter()
        .map(|step| invocation(&name, step.run, step.env))
        .collect::<Result<Vec<_>, _>>()?;

    let health = match spec.health {
        Some(h) => {
            if let Some(secs) = h.timeout_secs {
                check_secs(&name, "health timeout_secs", secs, 0)?;
            }
            if let Some(secs) = h.interval_secs {
                check_secs(&name, "health interval_secs", secs, 1)?;
            }
            let check = HealthCheck {
                timeout: h
                    .timeout_secs
                    .map_or(health_defaults.timeout, Duration::from_secs),
                interval: h
                    .interval_secs
                    .map_or(health_defaults.interval, Duration::from_secs),
            };
            Some((invocation(&name, h.run, h.env)?, check))
        }
        None => None,
    };

    let description = if spec.description.is_empty() {
        name.clone()
    } else {
        spec.description
    };

    Ok(CommandModule {
        name,
        description,
        version: spec.version,
        depends_on: spec.depends_on,
        optional: spec.optional,
        retry: spec.retry,
        timeout: spec.timeout_secs.map(Duration::from_secs),
        steps,
        health,
        transient: Arc::clone(transient),
    })
}

fn check_secs(module: &str, key: &str, value: u64, min: u64) -> Result<(), ConfigError> {
    if (min..=MAX_DURATION_SECS).contains(&value) {
        return Ok(());
    }
    Err(ConfigError::Catalog(format!(
        "module '{module}': {key} must be between {min} and {MAX_DURATION_SECS}"
    )))
}

fn invocation(
    module: &str,
    argv: Vec<String>,
    env: BTreeMap<String, String>,
) -> Result<Invocation, ConfigError> {
    let mut argv = argv.into_iter();
    let program = argv
        .next()
        .filter(|p| !p.trim().is_empty())
        .ok_or_else(|| ConfigError::Catalog(format!("module '{module}' has an empty command")))?;

    let mut inv = Invocation::new(program).args(argv);
    for (key, value) in env {
        inv = inv.env(key, value);
    }
    Ok(inv)
}
