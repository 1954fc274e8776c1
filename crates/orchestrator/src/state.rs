//! State Store - persisted ledger of applied modules
//!
//! The ledger lives in `<dir>/state.json`. Writes go to a temporary file
//! that is synced and renamed over the old one, so a crash leaves either
//! the previous or the new ledger, never a torn one. An exclusive advisory
//! lock on `<dir>/kubestrap.lock` keeps a second executor out for as long
//! as the store is open.

use crate::error::{Error, Result};
use crate::module::Fingerprint;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions, TryLockError};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

/// Current ledger schema version
pub const SCHEMA_VERSION: u32 = 1;

/// Ledger file name inside the state directory
pub const STATE_FILE: &str = "state.json";
const LOCK_FILE: &str = "kubestrap.lock";

/// Ledger entry for one applied module
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleRecord {
    pub applied_at: DateTime<Utc>,
    pub fingerprint: Fingerprint,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

/// The persisted ledger
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SystemState {
    pub schema: u32,
    #[serde(default)]
    pub modules: BTreeMap<String, ModuleRecord>,
}

impl Default for SystemState {
    fn default() -> Self {
        Self {
            schema: SCHEMA_VERSION,
            modules: BTreeMap::new(),
        }
    }
}

impl SystemState {
    /// Stored fingerprint of a module
    pub fn fingerprint(&self, module: &str) -> Option<&Fingerprint> {
        self.modules.get(module).map(|r| &r.fingerprint)
    }

    /// Check if the module was applied with exactly this fingerprint
    pub fn is_applied(&self, module: &str, fingerprint: &Fingerprint) -> bool {
        self.fingerprint(module) == Some(fingerprint)
    }
}

/// Exclusive owner of the ledger for the duration of a run
#[derive(Debug)]
pub struct StateStore {
    dir: PathBuf,
    state: SystemState,
    // Held for the advisory lock; released on drop
    _lock: File,
}

impl StateStore {
    /// Open the store in `dir`, creating the directory and taking the lock
    ///
    /// The ledger is not read until [`load`](Self::load) is called.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(|source| Error::StateIo {
            path: dir.clone(),
            source,
        })?;

        let lock_path = dir.join(LOCK_FILE);
        let lock = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&lock_path)
            .map_err(|source| Error::StateIo {
                path: lock_path.clone(),
                source,
            })?;

        match lock.try_lock() {
            Ok(()) => {}
            Err(TryLockError::WouldBlock) => {
                return Err(Error::ConcurrentExecution { path: lock_path });
            }
            Err(TryLockError::Error(source)) => {
                return Err(Error::StateIo {
                    path: lock_path,
                    source,
                });
            }
        }

        log::debug!("Opened state store at {}", dir.display());
        Ok(Self {
            dir,
            state: SystemState::default(),
            _lock: lock,
        })
    }

    /// Directory holding the ledger
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the ledger file
    pub fn path(&self) -> PathBuf {
        self.dir.join(STATE_FILE)
    }

    /// Read the ledger from disk
    ///
    /// A missing file is an empty ledger. Anything that cannot be parsed is
    /// [`Error::StateCorruption`]; it is never silently replaced.
    pub fn load(&mut self) -> Result<&SystemState> {
        self.state = read_state(&self.path())?;
        log::debug!("Loaded {} ledger entries", self.state.modules.len());
        Ok(&self.state)
    }

    /// The in-memory ledger
    pub fn state(&self) -> &SystemState {
        &self.state
    }

    /// Check if the module was applied with this fingerprint
    pub fn is_applied(&self, module: &str, fingerprint: &Fingerprint) -> bool {
        self.state.is_applied(module, fingerprint)
    }

    /// Record a successful apply and flush before returning
    pub fn record_success(
        &mut self,
        module: &str,
        fingerprint: Fingerprint,
        version: Option<String>,
    ) -> Result<()> {
        self.state.modules.insert(
            module.to_string(),
            ModuleRecord {
                applied_at: Utc::now(),
                fingerprint,
                version,
            },
        );
        self.flush()?;
        log::info!("Recorded {module} as applied");
        Ok(())
    }

    /// Note a failure; the ledger is left untouched
    pub fn record_failure(&mut self, module: &str) {
        log::debug!("Not recording {module}: apply did not complete");
    }

    /// Drop a module from the ledger so the next run re-applies it
    ///
    /// Returns whether an entry existed.
    pub fn forget(&mut self, module: &str) -> Result<bool> {
        if self.state.modules.remove(module).is_none() {
            return Ok(false);
        }
        self.flush()?;
        log::info!("Forgot {module}");
        Ok(true)
    }

    fn flush(&self) -> Result<()> {
        let path = self.path();
        let tmp = self.dir.join(format!("{STATE_FILE}.tmp"));
        let io_err = |source: io::Error| Error::StateIo {
            path: path.clone(),
            source,
        };

        let mut json = serde_json::to_string_pretty(&self.state)
            .map_err(|e| io_err(io::Error::other(e)))?;
        json.push('\n');

        let mut file = File::create(&tmp).map_err(io_err)?;
        file.write_all(json.as_bytes()).map_err(io_err)?;
        file.sync_all().map_err(io_err)?;
        drop(file);
        fs::rename(&tmp, &path).map_err(io_err)?;

        // Persist the rename itself
        if let Ok(dir) = File::open(&self.dir) {
            let _ = dir.sync_all();
        }
        Ok(())
    }
}

/// Read a ledger file without taking the lock
///
/// Used by read-only commands (`status`, `plan`) that must not block on a
/// running install.
pub fn read_state(path: &Path) -> Result<SystemState> {
    let content = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(SystemState::default()),
        Err(e) if e.kind() == io::ErrorKind::InvalidData => {
            return Err(corrupt(path, "file is not valid UTF-8"));
        }
        Err(source) => {
            return Err(Error::StateIo {
                path: path.to_path_buf(),
                source,
            });
        }
    };

    if content.trim().is_empty() {
        return Err(corrupt(path, "file is empty"));
    }

    let state: SystemState =
        serde_json::from_str(&content).map_err(|e| corrupt(path, e.to_string()))?;

    if state.schema != SCHEMA_VERSION {
        return Err(corrupt(
            path,
            format!(
                "unsupported schema {} (expected {SCHEMA_VERSION})",
                state.schema
            ),
        ));
    }

    Ok(state)
}

fn corrupt(path: &Path, message: impl Into<String>) -> Error {
    Error::StateCorruption {
        path: path.to_path_buf(),
        message: message.into(),
    }
}
