use anyhow::{Context as _, Result, bail};
use colored::Colorize;
use dialoguer::Confirm;
use orchestrator::{StateStore, SystemState, read_state};
use std::path::Path;

use crate::Context;
use crate::cli::StateCommand;
use crate::commands::Session;
use crate::ui;

pub fn run(ctx: &Context, cmd: StateCommand) -> Result<()> {
    let session = Session::load(ctx)?;
    match cmd {
        StateCommand::Show { json } => show(&session.state_file(), json),
        StateCommand::Forget { module, yes } => forget(&session.state_dir, &module, yes),
    }
}

fn show(path: &Path, json: bool) -> Result<()> {
    let state = read_state(path)?;
    if json {
        println!("{}", render_json(&state)?);
        return Ok(());
    }

    ui::header("State Ledger");
    ui::kv("File", &path.display().to_string());
    ui::kv("Schema", &state.schema.to_string());
    if state.modules.is_empty() {
        println!();
        ui::dim("No entries");
        return Ok(());
    }

    for (name, record) in &state.modules {
        ui::section(name);
        ui::kv("applied_at", &record.applied_at.to_rfc3339());
        ui::kv("fingerprint", record.fingerprint.as_str());
        if let Some(version) = &record.version {
            ui::kv("version", version);
        }
    }
    Ok(())
}

fn render_json(state: &SystemState) -> Result<String> {
    serde_json::to_string_pretty(state).context("Failed to serialize state")
}

fn forget(state_dir: &Path, module: &str, yes: bool) -> Result<()> {
    // Takes the lock: refuses to edit the ledger under a running install
    let mut store = StateStore::open(state_dir)?;
    store.load()?;

    if !store.state().modules.contains_key(module) {
        bail!("'{module}' has no ledger entry");
    }

    if !yes {
        let confirmed = Confirm::new()
            .with_prompt(format!(
                "Forget '{module}'? The next install will re-apply it"
            ))
            .default(false)
            .interact()
            .context("Failed to read confirmation")?;
        if !confirmed {
            println!("  {} Aborted", "✗".red());
            return Ok(());
        }
    }

    store.forget(module)?;
    ui::success(&format!("Forgot {module}"));
    Ok(())
}
