pub mod generate_config;
pub mod install;
pub mod modules;
pub mod plan;
pub mod state;
pub mod status;
pub mod validate;

use crate::Context;
use crate::catalog;
use crate::config::Settings;
use crate::paths;
use anyhow::Result;
use orchestrator::Registry;
use std::path::PathBuf;

/// Settings, catalog and ledger location shared by most commands
pub struct Session {
    pub settings: Settings,
    pub registry: Registry,
    pub state_dir: PathBuf,
}

impl Session {
    pub fn load(ctx: &Context) -> Result<Self> {
        let settings = Settings::load(ctx.config.as_deref())?;
        let registry = catalog::load_registry(&settings)?;
        let configured = ctx.state_dir.as_deref().or(settings.state_dir.as_deref());
        let state_dir = paths::state_dir(configured)?;
        log::debug!("State directory: {}", state_dir.display());

        Ok(Self {
            settings,
            registry,
            state_dir,
        })
    }

    /// Path of the ledger file
    pub fn state_file(&self) -> PathBuf {
        self.state_dir.join(orchestrator::state::STATE_FILE)
    }
}
