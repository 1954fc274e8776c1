//! Read-only host inspection backing the pre-flight checks

use orchestrator::{OsInfo, SystemProbe};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

const OS_RELEASE_PATHS: [&str; 2] = ["/etc/os-release", "/usr/lib/os-release"];

/// Probe for the machine kubestrap runs on
#[derive(Debug, Default)]
pub struct HostProbe;

impl HostProbe {
    pub fn new() -> Self {
        Self
    }
}

impl SystemProbe for HostProbe {
    fn os_release(&self) -> Result<OsInfo, String> {
        for path in OS_RELEASE_PATHS {
            if let Ok(content) = fs::read_to_string(path) {
                log::debug!("Reading OS identity from {path}");
                return parse_os_release(&content)
                    .ok_or_else(|| format!("{path} has no ID field"));
            }
        }
        Err("no os-release file found".to_string())
    }

    fn free_disk_bytes(&self, path: &Path) -> Result<u64, String> {
        free_disk_bytes(path)
    }

    fn total_memory_bytes(&self) -> Result<u64, String> {
        let meminfo = fs::read_to_string("/proc/meminfo")
            .map_err(|e| format!("cannot read /proc/meminfo: {e}"))?;
        parse_mem_total(&meminfo).ok_or_else(|| "MemTotal missing from /proc/meminfo".to_string())
    }

    fn reachable(&self, endpoint: &str, timeout: Duration) -> Result<(), String> {
        let agent: ureq::Agent = ureq::Agent::config_builder()
            .timeout_global(Some(timeout))
            .build()
            .into();

        match agent
            .head(endpoint)
            .header("User-Agent", concat!("kubestrap/", env!("CARGO_PKG_VERSION")))
            .call()
        {
            Ok(_) => Ok(()),
            // Any HTTP answer means the network path works
            Err(ureq::Error::StatusCode(code)) => {
                log::debug!("{endpoint} answered with HTTP {code}");
                Ok(())
            }
            Err(e) => Err(e.to_string()),
        }
    }

    fn find_executable(&self, name: &str) -> Option<PathBuf> {
        which::which(name).ok()
    }

    fn is_privileged(&self) -> bool {
        // SAFETY: geteuid has no preconditions and cannot fail
        unsafe { libc::geteuid() == 0 }
    }
}

/// Parse the `KEY=value` lines of an os-release file
///
/// Returns `None` when there is no `ID`.
pub fn parse_os_release(content: &str) -> Option<OsInfo> {
    let mut id = None;
    let mut version = None;
    let mut pretty_name = None;

    for line in content.lines() {
        let line = line.trim();
        if line.starts_with('#') {
            continue;
        }
        let Some((key, value)) = line.split_once('=') else {
            continue;
        };
        let value = unquote(value.trim());
        match key.trim() {
            "ID" => id = Some(value.to_lowercase()),
            "VERSION_ID" => version = Some(value.to_string()),
            "PRETTY_NAME" => pretty_name = Some(value.to_string()),
            _ => {}
        }
    }

    id.filter(|id| !id.is_empty()).map(|id| OsInfo {
        id,
        version,
        pretty_name,
    })
}

fn unquote(value: &str) -> &str {
    for quote in ['"', '\''] {
        if let Some(inner) = value
            .strip_prefix(quote)
            .and_then(|v| v.strip_suffix(quote))
        {
            return inner;
        }
    }
    value
}

/// `MemTotal` from /proc/meminfo, in bytes
pub fn parse_mem_total(meminfo: &str) -> Option<u64> {
    meminfo.lines().find_map(|line| {
        let rest = line.strip_prefix("MemTotal:")?;
        let kib: u64 = rest.split_whitespace().next()?.parse().ok()?;
        Some(kib * 1024)
    })
}

fn free_disk_bytes(path: &Path) -> Result<u64, String> {
    use std::ffi::CString;
    use std::mem::MaybeUninit;
    use std::os::unix::ffi::OsStrExt;

    // Walk up until something exists; /var/lib/containerd may not yet
    let mut target = path;
    while !target.exists() {
        target = target
            .parent()
            .ok_or_else(|| format!("{} does not exist", path.display()))?;
    }

    let c_path = CString::new(target.as_os_str().as_bytes())
        .map_err(|_| format!("invalid path {}", path.display()))?;

    // SAFETY: c_path is a valid NUL-terminated string and stat is only read
    // after statvfs reports success
    unsafe {
        let mut stat: MaybeUninit<libc::statvfs> = MaybeUninit::uninit();
        if libc::statvfs(c_path.as_ptr(), stat.as_mut_ptr()) != 0 {
            return Err(format!(
                "statvfs failed for {}: {}",
                target.display(),
                std::io::Error::last_os_error()
            ));
        }
        let stat = stat.assume_init();
        Ok(u64::from(stat.f_bavail) * stat.f_frsize)
    }
}
