//! Settings file for kubestrap
//!
//! A TOML file at `<config_dir>/config.toml` (or `--config PATH`). Every key
//! is optional; a missing default file means all defaults.

use orchestrator::{ExecuteOptions, HealthCheck, OsRequirement, PreflightConfig, RetryPolicy};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

const GIB: u64 = 1024 * 1024 * 1024;

/// Upper bound for every timeout, delay and interval (one week)
pub const MAX_DURATION_SECS: u64 = 7 * 24 * 60 * 60;

/// Problems with the settings file or module catalog
///
/// These map to exit code 2.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid TOML in {}: {message}", .path.display())]
    Parse { path: PathBuf, message: String },

    #[error("invalid setting {key}: {message}")]
    Invalid { key: &'static str, message: String },

    #[error("invalid module catalog: {0}")]
    Catalog(String),

    #[error(transparent)]
    Engine(#[from] orchestrator::Error),
}

/// Top-level settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    /// Ledger directory; see [`crate::paths::state_dir`] for the fallback
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state_dir: Option<String>,
    pub preflight: PreflightSettings,
    pub execution: ExecutionSettings,
    pub health: HealthSettings,
    pub catalog: CatalogSettings,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PreflightSettings {
    pub disk_path: String,
    pub min_disk_gib: u64,
    pub min_memory_gib: u64,
    pub endpoint: String,
    pub network_timeout_secs: u64,
    /// Treat an unreachable endpoint as a warning when false
    pub network_required: bool,
    pub require_root: bool,
    pub required_binaries: Vec<String>,
    pub optional_binaries: Vec<String>,
    /// Empty list accepts any distribution
    pub supported_os: Vec<OsRequirement>,
}

impl Default for PreflightSettings {
    fn default() -> Self {
        let defaults = PreflightConfig::default();
        Self {
            disk_path: defaults.disk_path.display().to_string(),
            min_disk_gib: defaults.min_disk_bytes / GIB,
            min_memory_gib: defaults.min_memory_bytes / GIB,
            endpoint: defaults.endpoint,
            network_timeout_secs: defaults.network_timeout.as_secs(),
            network_required: defaults.network_required,
            require_root: defaults.require_root,
            required_binaries: defaults.required_binaries,
            optional_binaries: defaults.optional_binaries,
            supported_os: defaults.supported_os,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ExecutionSettings {
    pub max_attempts: u32,
    pub base_delay_secs: f64,
    pub backoff_factor: f64,
    pub max_delay_secs: f64,
    pub attempt_timeout_secs: u64,
    pub cancel_grace_secs: u64,
}

impl Default for ExecutionSettings {
    fn default() -> Self {
        let defaults = ExecuteOptions::default();
        Self {
            max_attempts: defaults.retry.max_attempts,
            base_delay_secs: defaults.retry.base_delay.as_secs_f64(),
            backoff_factor: defaults.retry.backoff_factor,
            max_delay_secs: defaults.retry.max_delay.as_secs_f64(),
            attempt_timeout_secs: defaults.attempt_timeout.as_secs(),
            cancel_grace_secs: defaults.cancel_grace.as_secs(),
        }
    }
}

/// Defaults for catalog modules that declare a health command without
/// their own timings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct HealthSettings {
    pub timeout_secs: u64,
    pub interval_secs: u64,
}

impl Default for HealthSettings {
    fn default() -> Self {
        let defaults = HealthCheck::default();
        Self {
            timeout_secs: defaults.timeout.as_secs(),
            interval_secs: defaults.interval.as_secs(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default, deny_unknown_fields)]
pub struct CatalogSettings {
    /// External module catalog replacing the built-in one
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

impl Settings {
    /// Load settings
    ///
    /// An explicit path must exist; the default location may be absent.
    pub fn load(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        let path = match explicit {
            Some(path) => path.to_path_buf(),
            None => match crate::paths::config_file() {
                Ok(path) if path.exists() => path,
                _ => {
                    log::debug!("No settings file, using defaults");
                    return Ok(Self::default());
                }
            },
        };

        let content = fs::read_to_string(&path).map_err(|source| ConfigError::Read {
            path: path.clone(),
            source,
        })?;
        let settings = Self::parse(&content).map_err(|e| match e {
            ConfigError::Parse { message, .. } => ConfigError::Parse {
                path: path.clone(),
                message,
            },
            other => other,
        })?;
        log::debug!("Loaded settings from {}", path.display());
        Ok(settings)
    }

    /// Parse and validate settings from TOML text
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let settings: Self = toml::from_str(content).map_err(|e| ConfigError::Parse {
            path: PathBuf::from("<settings>"),
            message: e.message().to_string(),
        })?;
        settings.validate()?;
        Ok(settings)
    }

    /// Reject values the engine cannot work with
    pub fn validate(&self) -> Result<(), ConfigError> {
        let exec = &self.execution;
        if exec.max_attempts == 0 {
            return Err(invalid("execution.max_attempts", "must be at least 1"));
        }
        if !(exec.backoff_factor >= 1.0 && exec.backoff_factor.is_finite()) {
            return Err(invalid("execution.backoff_factor", "must be a finite number of at least 1.0"));
        }
        check_delay("execution.base_delay_secs", exec.base_delay_secs)?;
        check_delay("execution.max_delay_secs", exec.max_delay_secs)?;
        check_secs("execution.attempt_timeout_secs", exec.attempt_timeout_secs, 1)?;
        check_secs("execution.cancel_grace_secs", exec.cancel_grace_secs, 0)?;
        check_secs("health.timeout_secs", self.health.timeout_secs, 0)?;
        check_secs("health.interval_secs", self.health.interval_secs, 1)?;
        check_secs("preflight.network_timeout_secs", self.preflight.network_timeout_secs, 1)?;
        if self.preflight.endpoint.trim().is_empty() {
            return Err(invalid("preflight.endpoint", "cannot be empty"));
        }
        Ok(())
    }

    /// Pre-flight thresholds for the validator
    pub fn preflight_config(&self) -> PreflightConfig {
        let p = &self.preflight;
        PreflightConfig {
            supported_os: p.supported_os.clone(),
            disk_path: crate::paths::expand(&p.disk_path),
            min_disk_bytes: p.min_disk_gib * GIB,
            min_memory_bytes: p.min_memory_gib * GIB,
            endpoint: p.endpoint.clone(),
            network_timeout: Duration::from_secs(p.network_timeout_secs),
            network_required: p.network_required,
            required_binaries: p.required_binaries.clone(),
            optional_binaries: p.optional_binaries.clone(),
            require_root: p.require_root,
        }
    }

    /// Retry and timeout options for the executor
    pub fn execute_options(&self) -> ExecuteOptions {
        let e = &self.execution;
        ExecuteOptions {
            retry: RetryPolicy {
                max_attempts: e.max_attempts,
                base_delay: Duration::from_secs_f64(e.base_delay_secs),
                backoff_factor: e.backoff_factor,
                max_delay: Duration::from_secs_f64(e.max_delay_secs),
            },
            attempt_timeout: Duration::from_secs(e.attempt_timeout_secs),
            cancel_grace: Duration::from_secs(e.cancel_grace_secs),
        }
    }

    /// Health polling defaults for catalog modules
    pub fn health_defaults(&self) -> HealthCheck {
        HealthCheck {
            timeout: Duration::from_secs(self.health.timeout_secs),
            interval: Duration::from_secs(self.health.interval_secs),
        }
    }

    /// Default settings as a commented TOML document
    pub fn default_toml() -> Result<String, ConfigError> {
        let body = toml::to_string_pretty(&Self::default()).map_err(|e| ConfigError::Parse {
            path: PathBuf::from("<defaults>"),
            message: e.to_string(),
        })?;
        Ok(format!(
            "# kubestrap settings\n\
             #\n\
             # Every key is optional. Uncomment `state_dir` to move the ledger.\n\
             # state_dir = \"/var/lib/kubestrap\"\n\n{body}"
        ))
    }
}

/// Whole seconds within `min..=MAX_DURATION_SECS`
fn check_secs(key: &'static str, value: u64, min: u64) -> Result<(), ConfigError> {
    if (min..=MAX_DURATION_SECS).contains(&value) {
        Ok(())
    } else {
        Err(invalid(
            key,
            &format!("must be between {min} and {MAX_DURATION_SECS}"),
        ))
    }
}

/// Fractional seconds within `0..=MAX_DURATION_SECS`; rejects NaN and infinity
fn check_delay(key: &'static str, value: f64) -> Result<(), ConfigError> {
    if (0.0..=MAX_DURATION_SECS as f64).contains(&value) {
        Ok(())
    } else {
        Err(invalid(
            key,
            &format!("must be between 0 and {MAX_DURATION_SECS} seconds"),
        ))
    }
}

fn invalid(key: &'static str, message: &str) -> ConfigError {
    ConfigError::Invalid {
        key,
        message: message.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults_match_engine_defaults() {
        let settings = Settings::default();
        assert_eq!(settings.preflight_config(), PreflightConfig::default());
        assert_eq!(settings.execute_options().retry, RetryPolicy::default());
        assert_eq!(settings.health_defaults(), HealthCheck::default());
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let settings = Settings::parse(
            r#"
state_dir = "/srv/kubestrap"

[execution]
max_attempts = 5

[preflight]
network_required = false
"#,
        )
        .unwrap();

        assert_eq!(settings.state_dir.as_deref(), Some("/srv/kubestrap"));
        assert_eq!(settings.execution.max_attempts, 5);
        assert_eq!(settings.execution.attempt_timeout_secs, 300);
        assert!(!settings.preflight.network_required);
        assert_eq!(settings.preflight.min_disk_gib, 20);
    }

    #[test]
    fn test_os_allow_list() {
        let settings = Settings::parse(
            r#"
[[preflight.supported_os]]
id = "ubuntu"
min_version = "24.04"

[[preflight.supported_os]]
id = "fedora"
"#,
        )
        .unwrap();

        let os = &settings.preflight_config().supported_os;
        assert_eq!(os.len(), 2);
        assert_eq!(os[0].min_version.as_deref(), Some("24.04"));
        assert_eq!(os[1].min_version, None);
    }

    #[test]
    fn test_unknown_key_rejected() {
        let err = Settings::parse("[execution]\nretries = 3\n").unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    fn test_zero_attempts_rejected() {
        let err = Settings::parse("[execution]\nmax_attempts = 0\n").unwrap_err();
        assert!(err.to_string().contains("execution.max_attempts"));
    }

    #[test]
    fn test_out_of_range_durations_rejected() {
        for (text, key) in [
            ("[execution]\nmax_delay_secs = 1e30\n", "execution.max_delay_secs"),
            ("[execution]\nbase_delay_secs = inf\n", "execution.base_delay_secs"),
            ("[execution]\nbase_delay_secs = nan\n", "execution.base_delay_secs"),
            ("[execution]\nbackoff_factor = inf\n", "execution.backoff_factor"),
            (
                "[execution]\nattempt_timeout_secs = 9999999999\n",
                "execution.attempt_timeout_secs",
            ),
            ("[health]\ntimeout_secs = 9999999999\n", "health.timeout_secs"),
        ] {
            let err = Settings::parse(text).unwrap_err();
            assert!(err.to_string().contains(key), "{text}: {err}");
        }
    }

    #[test]
    fn test_longest_allowed_durations_convert() {
        let settings = Settings::parse(&format!(
            "[execution]\nmax_delay_secs = {MAX_DURATION_SECS}\nattempt_timeout_secs = {MAX_DURATION_SECS}\n"
        ))
        .unwrap();
        let options = settings.execute_options();
        assert_eq!(options.retry.max_delay, Duration::from_secs(MAX_DURATION_SECS));
        assert_eq!(options.attempt_timeout, Duration::from_secs(MAX_DURATION_SECS));
    }

    #[test]
    fn test_generated_defaults_parse_back() {
        let text = Settings::default_toml().unwrap();
        assert!(text.starts_with("# kubestrap settings"));
        assert_eq!(Settings::parse(&text).unwrap(), Settings::default());
    }

    #[test]
    fn test_load_explicit_missing_file_fails() {
        let temp = TempDir::new().unwrap();
        let err = Settings::load(Some(temp.path().join("nope.toml").as_path())).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }

    #[test]
    fn test_load_reports_path_on_parse_error() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("config.toml");
        fs::write(&path, "[execution\n").unwrap();

        let err = Settings::load(Some(path.as_path())).unwrap_err();
        match err {
            ConfigError::Parse { path: reported, .. } => assert_eq!(reported, path),
            other => panic!("expected parse error, got {other:?}"),
        }
    }
}
