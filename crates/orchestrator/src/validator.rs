//! Pre-flight validation of host preconditions
//!
//! Checks run against an injected [`SystemProbe`] so tests never touch the
//! real host. The validator knows nothing about modules; it only answers
//! "is this machine fit to be provisioned".

use crate::error::{Error, Result};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

const GIB: u64 = 1024 * 1024 * 1024;

/// How a failed check affects the run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Failure blocks execution
    Required,
    /// Failure is reported as a warning
    Optional,
}

/// Outcome of a single pre-flight check
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckResult {
    pub name: String,
    pub ok: bool,
    pub message: String,
    pub severity: Severity,
}

impl CheckResult {
    /// A passing check
    pub fn pass(name: impl Into<String>, message: impl Into<String>, severity: Severity) -> Self {
        Self {
            name: name.into(),
            ok: true,
            message: message.into(),
            severity,
        }
    }

    /// A failing check
    pub fn fail(name: impl Into<String>, message: impl Into<String>, severity: Severity) -> Self {
        Self {
            name: name.into(),
            ok: false,
            message: message.into(),
            severity,
        }
    }

    /// Failed and blocks execution
    pub fn is_blocking(&self) -> bool {
        !self.ok && self.severity == Severity::Required
    }
}

/// Operating system identity as read from os-release
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OsInfo {
    /// Distribution id (`ubuntu`, `debian`, `rocky`, ...)
    pub id: String,
    /// `VERSION_ID`, if present
    pub version: Option<String>,
    /// `PRETTY_NAME`, for messages
    pub pretty_name: Option<String>,
}

/// An entry of the supported OS allow-list
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OsRequirement {
    pub id: String,
    /// Lowest supported `VERSION_ID`, compared numerically per component
    #[serde(default)]
    pub min_version: Option<String>,
}

impl OsRequirement {
    pub fn new(id: impl Into<String>, min_version: Option<&str>) -> Self {
        Self {
            id: id.into(),
            min_version: min_version.map(str::to_string),
        }
    }
}

/// Thresholds and lists the checks are evaluated against
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreflightConfig {
    /// Empty list accepts any Linux distribution
    pub supported_os: Vec<OsRequirement>,
    pub disk_path: PathBuf,
    pub min_disk_bytes: u64,
    pub min_memory_bytes: u64,
    pub endpoint: String,
    pub network_timeout: Duration,
    pub network_required: bool,
    pub required_binaries: Vec<String>,
    pub optional_binaries: Vec<String>,
    pub require_root: bool,
}

impl Default for PreflightConfig {
    fn default() -> Self {
        Self {
            supported_os: vec![
                OsRequirement::new("ubuntu", Some("22.04")),
                OsRequirement::new("debian", Some("12")),
                OsRequirement::new("rocky", Some("9")),
                OsRequirement::new("almalinux", Some("9")),
            ],
            disk_path: PathBuf::from("/var/lib"),
            min_disk_bytes: 20 * GIB,
            min_memory_bytes: 4 * GIB,
            endpoint: "https://registry.k8s.io".to_string(),
            network_timeout: Duration::from_secs(5),
            network_required: true,
            required_binaries: ["systemctl", "curl", "tar"].map(String::from).to_vec(),
            optional_binaries: ["helm", "wg"].map(String::from).to_vec(),
            require_root: true,
        }
    }
}

/// Read-only view of the host the checks inspect
///
/// Implementations must be side-effect free.
pub trait SystemProbe: Sync {
    /// Parsed os-release, or why it could not be read
    fn os_release(&self) -> std::result::Result<OsInfo, String>;

    /// Free bytes available to unprivileged users at `path`
    fn free_disk_bytes(&self, path: &Path) -> std::result::Result<u64, String>;

    /// Total physical memory
    fn total_memory_bytes(&self) -> std::result::Result<u64, String>;

    /// Whether `endpoint` answers at all within `timeout`
    fn reachable(&self, endpoint: &str, timeout: Duration) -> std::result::Result<(), String>;

    /// Resolved path of an executable on `PATH`
    fn find_executable(&self, name: &str) -> Option<PathBuf>;

    /// Whether the process runs with root privileges
    fn is_privileged(&self) -> bool;
}

/// All check results of one validation pass, in check order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationReport {
    pub checks: Vec<CheckResult>,
}

impl ValidationReport {
    /// Checks that block execution
    pub fn failures(&self) -> Vec<&CheckResult> {
        self.checks.iter().filter(|c| c.is_blocking()).collect()
    }

    /// Optional checks that failed
    pub fn warnings(&self) -> Vec<&CheckResult> {
        self.checks
            .iter()
            .filter(|c| !c.ok && c.severity == Severity::Optional)
            .collect()
    }

    /// No required check failed
    pub fn is_ok(&self) -> bool {
        !self.checks.iter().any(CheckResult::is_blocking)
    }

    /// Turn blocking failures into [`Error::Preflight`]
    pub fn into_result(self) -> Result<Self> {
        if self.is_ok() {
            return Ok(self);
        }
        let failures = self.checks.into_iter().filter(CheckResult::is_blocking).collect();
        Err(Error::Preflight { failures })
    }
}

#[derive(Debug, Clone)]
enum Check {
    Os,
    Disk,
    Memory,
    Network,
    Binary { name: String, severity: Severity },
    Privileges,
}

/// Runs the pre-flight checks
pub struct Validator {
    config: PreflightConfig,
}

impl Validator {
    pub fn new(config: PreflightConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &PreflightConfig {
        &self.config
    }

    /// Evaluate every check
    ///
    /// Checks are independent, so they run in parallel; results keep the
    /// fixed check order.
    pub fn validate(&self, probe: &dyn SystemProbe) -> ValidationReport {
        let checks: Vec<CheckResult> = self
            .checks()
            .par_iter()
            .map(|check| self.run(check, probe))
            .collect();

        for check in &checks {
            if check.ok {
                log::debug!("Pre-flight {}: {}", check.name, check.message);
            } else {
                log::warn!(
                    "Pre-flight {} failed ({:?}): {}",
                    check.name,
                    check.severity,
                    check.message
                );
            }
        }

        ValidationReport { checks }
    }

    fn checks(&self) -> Vec<Check> {
        let mut checks = vec![Check::Os, Check::Disk, Check::Memory, Check::Network];
        checks.extend(self.config.required_binaries.iter().map(|name| Check::Binary {
            name: name.clone(),
            severity: Severity::Required,
        }));
        checks.extend(self.config.optional_binaries.iter().map(|name| Check::Binary {
            name: name.clone(),
            severity: Severity::Optional,
        }));
        if self.config.require_root {
            checks.push(Check::Privileges);
        }
        checks
    }

    fn run(&self, check: &Check, probe: &dyn SystemProbe) -> CheckResult {
        match check {
            Check::Os => self.check_os(probe),
            Check::Disk => self.check_disk(probe),
            Check::Memory => self.check_memory(probe),
            Check::Network => self.check_network(probe),
            Check::Binary { name, severity } => check_binary(probe, name, *severity),
            Check::Privileges => check_privileges(probe),
        }
    }

    fn check_os(&self, probe: &dyn SystemProbe) -> CheckResult {
        const NAME: &str = "os";
        let sev = Severity::Required;

        let info = match probe.os_release() {
            Ok(info) => info,
            Err(e) => return CheckResult::fail(NAME, format!("cannot identify OS: {e}"), sev),
        };
        let label = info.pretty_name.clone().unwrap_or_else(|| {
            format!("{} {}", info.id, info.version.as_deref().unwrap_or("?"))
        });

        if self.config.supported_os.is_empty() {
            return CheckResult::pass(NAME, label, sev);
        }

        let Some(req) = self.config.supported_os.iter().find(|r| r.id == info.id) else {
            let ids: Vec<&str> = self.config.supported_os.iter().map(|r| r.id.as_str()).collect();
            return CheckResult::fail(
                NAME,
                format!("{label} is not supported (supported: {})", ids.join(", ")),
                sev,
            );
        };

        match (&req.min_version, &info.version) {
            (None, _) => CheckResult::pass(NAME, label, sev),
            (Some(min), Some(version)) if compare_versions(version, min) != Ordering::Less => {
                CheckResult::pass(NAME, label, sev)
            }
            (Some(min), Some(_)) => CheckResult::fail(
                NAME,
                format!("{label} is older than the minimum {} {min}", req.id),
                sev,
            ),
            (Some(min), None) => CheckResult::fail(
                NAME,
                format!("{label} has no VERSION_ID (need {} {min})", req.id),
                sev,
            ),
        }
    }

    fn check_disk(&self, probe: &dyn SystemProbe) -> CheckResult {
        const NAME: &str = "disk";
        let sev = Severity::Required;
        let path = &self.config.disk_path;

        match probe.free_disk_bytes(path) {
            Ok(free) if free >= self.config.min_disk_bytes => CheckResult::pass(
                NAME,
                format!("{} free at {}", format_gib(free), path.display()),
                sev,
            ),
            Ok(free) => CheckResult::fail(
                NAME,
                format!(
                    "{} free at {}, need {}",
                    format_gib(free),
                    path.display(),
                    format_gib(self.config.min_disk_bytes)
                ),
                sev,
            ),
            Err(e) => CheckResult::fail(NAME, format!("cannot stat {}: {e}", path.display()), sev),
        }
    }

    fn check_memory(&self, probe: &dyn SystemProbe) -> CheckResult {
        const NAME: &str = "memory";
        let sev = Severity::Required;

        match probe.total_memory_bytes() {
            Ok(total) if total >= self.config.min_memory_bytes => {
                CheckResult::pass(NAME, format!("{} total", format_gib(total)), sev)
            }
            Ok(total) => CheckResult::fail(
                NAME,
                format!(
                    "{} total, need {}",
                    format_gib(total),
                    format_gib(self.config.min_memory_bytes)
                ),
                sev,
            ),
            Err(e) => CheckResult::fail(NAME, format!("cannot read memory size: {e}"), sev),
        }
    }

    fn check_network(&self, probe: &dyn SystemProbe) -> CheckResult {
        const NAME: &str = "network";
        let sev = if self.config.network_required {
            Severity::Required
        } else {
            Severity::Optional
        };
        let endpoint = &self.config.endpoint;

        match probe.reachable(endpoint, self.config.network_timeout) {
            Ok(()) => CheckResult::pass(NAME, format!("{endpoint} reachable"), sev),
            Err(e) => CheckResult::fail(NAME, format!("{endpoint} unreachable: {e}"), sev),
        }
    }
}

fn check_binary(probe: &dyn SystemProbe, name: &str, severity: Severity) -> CheckResult {
    let check = format!("binary:{name}");
    match probe.find_executable(name) {
        Some(path) => CheckResult::pass(check, path.display().to_string(), severity),
        None => CheckResult::fail(check, format!("{name} not found in PATH"), severity),
    }
}

fn check_privileges(probe: &dyn SystemProbe) -> CheckResult {
    if probe.is_privileged() {
        CheckResult::pass("privileges", "running as root", Severity::Required)
    } else {
        CheckResult::fail(
            "privileges",
            "must run as root (try sudo)",
            Severity::Required,
        )
    }
}

/// Compare dotted version strings numerically (`22.10` > `22.04`, `9` = `9.0`)
///
/// Non-numeric components compare as 0.
pub fn compare_versions(a: &str, b: &str) -> Ordering {
    let parse = |v: &str| -> Vec<u64> {
        v.split(['.', '-'])
            .map(|part| part.parse().unwrap_or(0))
            .collect()
    };
    let (a, b) = (parse(a), parse(b));
    let len = a.len().max(b.len());
    for i in 0..len {
        let x = a.get(i).copied().unwrap_or(0);
        let y = b.get(i).copied().unwrap_or(0);
        match x.cmp(&y) {
            Ordering::Equal => {}
            other => return other,
        }
    }
    Ordering::Equal
}

/// Format bytes as GiB with one decimal
pub fn format_gib(bytes: u64) -> String {
    format!("{:.1} GiB", bytes as f64 / GIB as f64)
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Required => write!(f, "required"),
            Self::Optional => write!(f, "optional"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    struct FakeProbe {
        os: std::result::Result<OsInfo, String>,
        free_disk: u64,
        memory: u64,
        online: bool,
        binaries: BTreeSet<&'static str>,
        root: bool,
    }

    impl FakeProbe {
        fn healthy() -> Self {
            Self {
                os: Ok(OsInfo {
                    id: "ubuntu".into(),
                    version: Some("24.04".into()),
                    pretty_name: Some("Ubuntu 24.04 LTS".into()),
                }),
                free_disk: 100 * GIB,
                memory: 16 * GIB,
                online: true,
                binaries: ["systemctl", "curl", "tar", "helm", "wg"].into(),
                root: true,
            }
        }
    }

    impl SystemProbe for FakeProbe {
        fn os_release(&self) -> std::result::Result<OsInfo, String> {
            self.os.clone()
        }

        fn free_disk_bytes(&self, _path: &Path) -> std::result::Result<u64, String> {
            Ok(self.free_disk)
        }

        fn total_memory_bytes(&self) -> std::result::Result<u64, String> {
            Ok(self.memory)
        }

        fn reachable(&self, _endpoint: &str, _timeout: Duration) -> std::result::Result<(), String> {
            if self.online {
                Ok(())
            } else {
                Err("connection timed out".into())
            }
        }

        fn find_executable(&self, name: &str) -> Option<PathBuf> {
            self.binaries
                .contains(name)
                .then(|| PathBuf::from("/usr/bin").join(name))
        }

        fn is_privileged(&self) -> bool {
            self.root
        }
    }

    fn validate(probe: &FakeProbe) -> ValidationReport {
        Validator::new(PreflightConfig::default()).validate(probe)
    }

    #[test]
    fn test_healthy_host_passes() {
        let report = validate(&FakeProbe::healthy());
        assert!(report.is_ok());
        assert!(report.warnings().is_empty());
        assert!(report.into_result().is_ok());
    }

    #[test]
    fn test_checks_keep_fixed_order() {
        let report = validate(&FakeProbe::healthy());
        let names: Vec<&str> = report.checks.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(
            names,
            [
                "os",
                "disk",
                "memory",
                "network",
                "binary:systemctl",
                "binary:curl",
                "binary:tar",
                "binary:helm",
                "binary:wg",
                "privileges",
            ]
        );
    }

    #[test]
    fn test_all_failures_are_aggregated() {
        let probe = FakeProbe {
            free_disk: 5 * GIB,
            root: false,
            ..FakeProbe::healthy()
        };
        let err = validate(&probe).into_result().unwrap_err();
        match err {
            Error::Preflight { failures } => {
                let names: Vec<&str> = failures.iter().map(|f| f.name.as_str()).collect();
                assert_eq!(names, ["disk", "privileges"]);
                assert!(failures[0].message.contains("5.0 GiB"));
            }
            other => panic!("expected preflight error, got {other:?}"),
        }
    }

    #[test]
    fn test_optional_binary_is_a_warning() {
        let mut probe = FakeProbe::healthy();
        probe.binaries.remove("wg");
        let report = validate(&probe);
        assert!(report.is_ok());
        let warnings = report.warnings();
        assert_eq!(warnings.len(), 1);
        assert_eq!(warnings[0].name, "binary:wg");
    }

    #[test]
    fn test_missing_required_binary_fails() {
        let mut probe = FakeProbe::healthy();
        probe.binaries.remove("curl");
        let report = validate(&probe);
        assert!(!report.is_ok());
        assert_eq!(report.failures()[0].name, "binary:curl");
    }

    #[test]
    fn test_network_severity_is_configurable() {
        let probe = FakeProbe {
            online: false,
            ..FakeProbe::healthy()
        };
        assert!(!validate(&probe).is_ok());

        let config = PreflightConfig {
            network_required: false,
            ..Default::default()
        };
        let report = Validator::new(config).validate(&probe);
        assert!(report.is_ok());
        assert_eq!(report.warnings()[0].name, "network");
    }

    #[test]
    fn test_unsupported_os() {
        let probe = FakeProbe {
            os: Ok(OsInfo {
                id: "arch".into(),
                version: None,
                pretty_name: Some("Arch Linux".into()),
            }),
            ..FakeProbe::healthy()
        };
        let report = validate(&probe);
        let failure = report.failures()[0].clone();
        assert_eq!(failure.name, "os");
        assert!(failure.message.contains("Arch Linux is not supported"));
    }

    #[test]
    fn test_os_too_old() {
        let probe = FakeProbe {
            os: Ok(OsInfo {
                id: "ubuntu".into(),
                version: Some("20.04".into()),
                pretty_name: None,
            }),
            ..FakeProbe::healthy()
        };
        let report = validate(&probe);
        assert!(report.failures()[0].message.contains("older than the minimum ubuntu 22.04"));
    }

    #[test]
    fn test_unreadable_os_release() {
        let probe = FakeProbe {
            os: Err("No such file or directory".into()),
            ..FakeProbe::healthy()
        };
        assert_eq!(validate(&probe).failures()[0].name, "os");
    }

    #[test]
    fn test_empty_allow_list_accepts_any_os() {
        let probe = FakeProbe {
            os: Ok(OsInfo {
                id: "gentoo".into(),
                version: None,
                pretty_name: None,
            }),
            ..FakeProbe::healthy()
        };
        let config = PreflightConfig {
            supported_os: Vec::new(),
            ..Default::default()
        };
        assert!(Validator::new(config).validate(&probe).is_ok());
    }

    #[test]
    fn test_privilege_check_can_be_disabled() {
        let probe = FakeProbe {
            root: false,
            ..FakeProbe::healthy()
        };
        let config = PreflightConfig {
            require_root: false,
            ..Default::default()
        };
        let report = Validator::new(config).validate(&probe);
        assert!(report.is_ok());
        assert!(report.checks.iter().all(|c| c.name != "privileges"));
    }

    #[test]
    fn test_compare_versions() {
        assert_eq!(compare_versions("22.04", "22.04"), Ordering::Equal);
        assert_eq!(compare_versions("22.10", "22.04"), Ordering::Greater);
        assert_eq!(compare_versions("9", "9.0"), Ordering::Equal);
        assert_eq!(compare_versions("12", "9"), Ordering::Greater);
        assert_eq!(compare_versions("8.10", "9"), Ordering::Less);
    }

    #[test]
    fn test_format_gib() {
        assert_eq!(format_gib(20 * GIB), "20.0 GiB");
        assert_eq!(format_gib(GIB / 2), "0.5 GiB");
    }
}
