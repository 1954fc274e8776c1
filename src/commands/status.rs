use anyhow::Result;
use chrono::Local;
use colored::Colorize;
use orchestrator::{Module, SystemState, read_state};

use crate::Context;
use crate::commands::Session;
use crate::ui;

pub fn run(ctx: &Context) -> Result<()> {
    let session = Session::load(ctx)?;
    let path = session.state_file();
    let state = read_state(&path)?;

    ui::header("kubestrap Status");
    ui::kv("State file", &path.display().to_string());
    ui::kv(
        "Applied",
        &format!("{} of {}", state.modules.len(), ui::plural(session.registry.len(), "module")),
    );

    print_applied(&session, &state);
    print_pending(&session, &state);
    Ok(())
}

fn print_applied(session: &Session, state: &SystemState) {
    ui::section("Applied Modules");
    if state.modules.is_empty() {
        ui::dim("Nothing applied yet");
        return;
    }

    let width = state.modules.keys().map(String::len).max().unwrap_or(0);
    for (name, record) in &state.modules {
        let drift = match session.registry.get(name) {
            Ok(module) if module.fingerprint() == record.fingerprint => "up to date".green(),
            Ok(_) => "drifted".yellow(),
            Err(_) => "not in catalog".dimmed(),
        };
        let applied = record.applied_at.with_timezone(&Local);
        println!(
            "  {name:<width$}  {:<10}  {}  {drift}",
            record.version.as_deref().unwrap_or("-"),
            applied.format("%Y-%m-%d %H:%M").to_string().dimmed()
        );
    }
}

fn print_pending(session: &Session, state: &SystemState) {
    let pending: Vec<_> = session
        .registry
        .all()
        .into_iter()
        .filter(|m| !state.modules.contains_key(m.name()))
        .collect();
    if pending.is_empty() {
        return;
    }

    ui::section("Not Applied");
    for module in pending {
        let tag = if module.optional() { " (optional)" } else { "" };
        println!("  {} {}{}", "○".dimmed(), module.name(), tag.dimmed());
    }
}
