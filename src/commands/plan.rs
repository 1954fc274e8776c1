use anyhow::Result;
use colored::Colorize;
use orchestrator::{DriftSummary, ExecutionPlan, compute_drift, read_state, resolve, resolve_all};

use crate::Context;
use crate::commands::Session;
use crate::ui;

pub fn run(ctx: &Context, modules: &[String]) -> Result<()> {
    let session = Session::load(ctx)?;
    let plan = build_plan(&session, modules)?;
    // No lock: a plan must not wait on a running install
    let state = read_state(&session.state_file())?;
    let drift = compute_drift(&session.registry, &plan, &state)?;

    ui::header("Execution Plan");
    if plan.is_empty() {
        ui::info("Nothing to plan: the catalog is empty");
        return Ok(());
    }

    let width = plan.modules.iter().map(String::len).max().unwrap_or(0);
    for (i, entry) in drift.iter().enumerate() {
        let optional = if entry.optional {
            " (optional)".dimmed().to_string()
        } else {
            String::new()
        };
        let requested = if plan.targets.contains(&entry.module) {
            "*".cyan().bold().to_string()
        } else {
            " ".to_string()
        };
        println!(
            "  {:>2}. {requested}{:<width$}  {}  {}{optional}",
            i + 1,
            entry.module,
            ui::drift_label(entry.status),
            entry.current.short().dimmed()
        );
    }

    let summary = DriftSummary::from_drift(&drift);
    println!();
    if summary.pending() == 0 {
        ui::success("Everything is up to date; install would skip every module");
    } else {
        ui::info(&format!(
            "install would apply {} ({} drifted, {} new), skip {}",
            ui::plural(summary.pending(), "module"),
            summary.drifted,
            summary.never_applied,
            summary.up_to_date
        ));
    }
    Ok(())
}

fn build_plan(session: &Session, modules: &[String]) -> Result<ExecutionPlan> {
    let plan = if modules.is_empty() {
        resolve_all(&session.registry)?
    } else {
        resolve(&session.registry, modules)?
    };
    Ok(plan)
}
