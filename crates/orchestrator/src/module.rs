//! Module trait for idempotent provisioning units
//!
//! A Module is one step of bringing up the stack ("install containerd",
//! "deploy the CNI"). The executor is written once against this trait;
//! individual installers only describe themselves and how to apply.

use crate::context::ApplyContext;
use crate::error::ExecutionError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Comparable value representing a module's applied configuration
///
/// Stored in the state ledger after a successful apply. A different
/// fingerprint on a later run means the module drifted and must be
/// re-applied.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Wrap an already computed fingerprint value
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Hash an ordered list of parts with BLAKE3
    ///
    /// Each part is length-prefixed so that `["ab", "c"]` and `["a", "bc"]`
    /// hash differently.
    pub fn of<I, S>(parts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<[u8]>,
    {
        let mut hasher = blake3::Hasher::new();
        for part in parts {
            let bytes = part.as_ref();
            hasher.update(&(bytes.len() as u64).to_le_bytes());
            hasher.update(bytes);
        }
        Self(hasher.finalize().to_hex().to_string())
    }

    /// The fingerprint value
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First 12 characters, for display
    pub fn short(&self) -> &str {
        self.0.get(..12).unwrap_or(&self.0)
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Readiness polling parameters declared by a module
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HealthCheck {
    /// Give up after this long
    pub timeout: Duration,
    /// Wait between predicate invocations
    pub interval: Duration,
}

impl Default for HealthCheck {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(120),
            interval: Duration::from_secs(5),
        }
    }
}

/// Core trait for provisioning modules
///
/// # Example
///
/// ```ignore
/// use orchestrator::{ApplyContext, ExecutionError, Fingerprint, Invocation, Module};
///
/// #[derive(Debug)]
/// struct Containerd { deps: Vec<String> }
///
/// impl Module for Containerd {
///     fn name(&self) -> &str { "containerd" }
///     fn depends_on(&self) -> &[String] { &self.deps }
///     fn fingerprint(&self) -> Fingerprint { Fingerprint::of(["containerd", "1.7"]) }
///
///     fn apply(&self, ctx: &ApplyContext) -> Result<(), ExecutionError> {
///         ctx.run_checked(&Invocation::new("apt-get").args(["install", "-y", "containerd"]))?;
///         Ok(())
///     }
/// }
/// ```
pub trait Module: Send + Sync + fmt::Debug {
    /// Unique module name
    fn name(&self) -> &str;

    /// Names of modules that must be applied first
    fn depends_on(&self) -> &[String];

    /// Human-readable description
    fn description(&self) -> String {
        self.name().to_string()
    }

    /// Version recorded in the ledger next to the fingerprint
    fn version(&self) -> Option<String> {
        None
    }

    /// Value representing the configuration this module would apply
    fn fingerprint(&self) -> Fingerprint;

    /// Converge the host towards this module's desired state
    ///
    /// Must be safe to run again after a partial failure. Long-running
    /// implementations should pass their work through `ctx` so the hard
    /// timeout can cancel it.
    fn apply(&self, ctx: &ApplyContext) -> Result<(), ExecutionError>;

    /// Polling parameters, or `None` if the module has no readiness check
    fn health_check(&self) -> Option<HealthCheck> {
        None
    }

    /// Readiness predicate polled after a successful apply
    ///
    /// `Ok(false)` means "not ready yet"; `Err` means the check itself could
    /// not run and ends polling.
    fn check_health(&self, _ctx: &ApplyContext) -> Result<bool, ExecutionError> {
        Ok(true)
    }

    /// Whether a failed attempt should be retried
    fn retryable(&self, error: &ExecutionError) -> bool {
        error.is_retryable()
    }

    /// Whether a failure of this module should let the run continue
    fn optional(&self) -> bool {
        false
    }

    /// Per-attempt timeout overriding the executor default
    fn attempt_timeout(&self) -> Option<Duration> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fingerprint_is_deterministic() {
        let a = Fingerprint::of(["cni", "1.15.0"]);
        let b = Fingerprint::of(["cni", "1.15.0"]);
        assert_eq!(a, b);
        assert_eq!(a.as_str().len(), 64);
    }

    #[test]
    fn test_fingerprint_parts_are_delimited() {
        assert_ne!(Fingerprint::of(["ab", "c"]), Fingerprint::of(["a", "bc"]));
    }

    #[test]
    fn test_fingerprint_changes_with_content() {
        assert_ne!(
            Fingerprint::of(["cni", "1.15.0"]),
            Fingerprint::of(["cni", "1.16.0"])
        );
    }

    #[test]
    fn test_fingerprint_short() {
        let fp = Fingerprint::new("0123456789abcdef");
        assert_eq!(fp.short(), "0123456789ab");
        assert_eq!(Fingerprint::new("abc").short(), "abc");
    }

    #[test]
    fn test_fingerprint_serializes_as_string() {
        let fp = Fingerprint::new("abc");
        assert_eq!(serde_json::to_string(&fp).unwrap(), "\"abc\"");
    }
}
