//! Path resolution for kubestrap
//!
//! # Environment Variables
//!
//! - `KUBESTRAP_CONFIG_DIR` - Override config directory
//! - `KUBESTRAP_STATE_DIR` - Override state directory
//!
//! # Path Resolution Priority
//!
//! For config_dir():
//! 1. `KUBESTRAP_CONFIG_DIR` environment variable
//! 2. `/etc/kubestrap` when running as root
//! 3. `XDG_CONFIG_HOME/kubestrap` (if set)
//! 4. `~/.config/kubestrap`
//!
//! For state_dir():
//! 1. `--state-dir` flag or `state_dir` in the settings file
//! 2. `KUBESTRAP_STATE_DIR` environment variable
//! 3. `/var/lib/kubestrap` when running as root
//! 4. `XDG_STATE_HOME/kubestrap` (if set)
//! 5. `~/.local/state/kubestrap`

use anyhow::{Context, Result};
use std::path::PathBuf;

/// Environment variable for config directory override
pub const ENV_CONFIG_DIR: &str = "KUBESTRAP_CONFIG_DIR";

/// Environment variable for state directory override
pub const ENV_STATE_DIR: &str = "KUBESTRAP_STATE_DIR";

const APP: &str = "kubestrap";

/// Get the kubestrap config directory path
pub fn config_dir() -> Result<PathBuf> {
    if let Ok(dir) = std::env::var(ENV_CONFIG_DIR) {
        let path = expand(&dir);
        log::debug!(
            "Using config dir from {}: {}",
            ENV_CONFIG_DIR,
            path.display()
        );
        return Ok(path);
    }

    if is_root() {
        return Ok(PathBuf::from("/etc").join(APP));
    }

    if let Ok(xdg_config) = std::env::var("XDG_CONFIG_HOME") {
        let path = PathBuf::from(xdg_config).join(APP);
        log::debug!("Using XDG_CONFIG_HOME: {}", path.display());
        return Ok(path);
    }

    let home = dirs::home_dir().context("Could not determine home directory")?;
    let path = home.join(".config").join(APP);
    log::debug!("Using default config dir: {}", path.display());
    Ok(path)
}

/// Default settings file location
pub fn config_file() -> Result<PathBuf> {
    Ok(config_dir()?.join("config.toml"))
}

/// Get the kubestrap state directory path
///
/// `configured` is the `--state-dir` flag or the settings file value.
pub fn state_dir(configured: Option<&str>) -> Result<PathBuf> {
    if let Some(dir) = configured {
        return Ok(expand(dir));
    }

    if let Ok(dir) = std::env::var(ENV_STATE_DIR) {
        let path = expand(&dir);
        log::debug!("Using state dir from {}: {}", ENV_STATE_DIR, path.display());
        return Ok(path);
    }

    if is_root() {
        return Ok(PathBuf::from("/var/lib").join(APP));
    }

    if let Ok(xdg_state) = std::env::var("XDG_STATE_HOME") {
        let path = PathBuf::from(xdg_state).join(APP);
        log::debug!("Using XDG_STATE_HOME: {}", path.display());
        return Ok(path);
    }

    let home = dirs::home_dir().context("Could not determine home directory")?;
    let path = home.join(".local").join("state").join(APP);
    log::debug!("Using default state dir: {}", path.display());
    Ok(path)
}

/// Expand ~ and environment variables in a path string
pub fn expand(path: &str) -> PathBuf {
    let expanded = shellexpand::full(path).unwrap_or(std::borrow::Cow::Borrowed(path));
    PathBuf::from(expanded.as_ref())
}

fn is_root() -> bool {
    // SAFETY: geteuid has no preconditions and cannot fail
    unsafe { libc::geteuid() == 0 }
}
