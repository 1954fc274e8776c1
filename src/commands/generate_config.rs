use anyhow::{Context as _, Result, bail};
use std::fs;
use std::path::{Path, PathBuf};

use crate::config::Settings;
use crate::paths;
use crate::ui;

pub fn run(output: Option<PathBuf>, force: bool) -> Result<()> {
    let path = match output {
        Some(path) => path,
        None => paths::config_file()?,
    };
    write(&path, force)?;
    ui::success(&format!("Wrote {}", path.display()));
    ui::dim("Every key is optional; delete the ones you keep at their default");
    Ok(())
}

fn write(path: &Path, force: bool) -> Result<()> {
    if path.exists() && !force {
        bail!("{} already exists (use --force to overwrite)", path.display());
    }
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    let content = Settings::default_toml()?;
    fs::write(path, content).with_context(|| format!("Failed to write {}", path.display()))?;
    Ok(())
}
