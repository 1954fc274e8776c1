use anyhow::{Result, bail};
use colored::Colorize;
use orchestrator::{
    CancelToken, Error as EngineError, ExecuteOptions, Provisioner, RunReport, Validator,
};
use std::sync::Arc;
use std::time::Duration;

use crate::Context;
use crate::cli::InstallArgs;
use crate::commands::Session;
use crate::probe::HostProbe;
use crate::progress::ProgressReporter;
use crate::runner::ShellRunner;
use crate::signals;
use crate::ui;

pub fn run(ctx: &Context, args: InstallArgs) -> Result<()> {
    let session = Session::load(ctx)?;
    let options = options(&session, &args);

    let cancel = CancelToken::new();
    if let Err(e) = signals::install(cancel.clone()) {
        log::warn!("Could not install signal handler: {e}");
    }

    let probe = HostProbe::new();
    let runner = Arc::new(ShellRunner::new().echo(args.echo));
    let mut provisioner = Provisioner::new(&session.registry, runner, &session.state_dir)
        .with_options(options)
        .with_cancel(cancel);
    if args.skip_preflight {
        ui::warn("Skipping pre-flight checks");
    } else {
        provisioner =
            provisioner.with_preflight(Validator::new(session.settings.preflight_config()), &probe);
    }

    let mut reporter = ProgressReporter::new(ctx.quiet);
    let outcome = match provisioner.run(&args.modules, &mut reporter) {
        Ok(outcome) => outcome,
        Err(EngineError::Preflight { failures }) => {
            ui::header("Pre-flight Checks Failed");
            for check in &failures {
                ui::check_line(check);
            }
            println!();
            ui::dim("Fix the checks above or re-run with --skip-preflight");
            return Err(EngineError::Preflight { failures }.into());
        }
        Err(e) => return Err(e.into()),
    };
    drop(reporter);

    if let Some(validation) = &outcome.validation {
        for check in validation.warnings() {
            ui::warn(&format!("{}: {}", check.name, check.message));
        }
    }

    print_report(&outcome.report);

    if outcome.report.interrupted {
        bail!("Installation interrupted; re-run to continue where it stopped");
    }
    if let Some(module) = &outcome.report.aborted_by {
        bail!("Installation aborted at module '{module}'");
    }
    Ok(())
}

/// Settings-file options with command-line overrides applied
fn options(session: &Session, args: &InstallArgs) -> ExecuteOptions {
    let mut options = session.settings.execute_options();
    if let Some(attempts) = args.attempts {
        options.retry.max_attempts = attempts;
    }
    if let Some(secs) = args.timeout {
        options.attempt_timeout = Duration::from_secs(secs);
    }
    options
}

/// Outcome table: one row per planned module, in plan order
pub fn print_report(report: &RunReport) {
    ui::header("Summary");

    let width = report
        .results
        .iter()
        .map(|r| r.module.len())
        .chain(report.not_attempted.iter().map(String::len))
        .max()
        .unwrap_or(0);

    for result in &report.results {
        let detail = if result.attempts == 0 {
            String::new()
        } else {
            format!(
                "{} in {}",
                ui::plural(result.attempts as usize, "attempt"),
                ui::format_duration(result.duration)
            )
        };
        println!(
            "  {:<width$}  {} {}",
            result.module,
            ui::status_label(result.status),
            detail.dimmed()
        );
        if let Some(error) = &result.error {
            println!("  {:<width$}  {}", "", error.to_string().red());
        }
    }
    for module in &report.not_attempted {
        println!("  {module:<width$}  {}", "NotRun".dimmed());
    }

    for warning in &report.warnings {
        ui::warn(warning);
    }

    let summary = report.summary();
    println!();
    println!(
        "  {} applied, {} skipped, {} failed, {} timed out, {} not run",
        summary.applied.to_string().green(),
        summary.skipped,
        summary.failed.to_string().red(),
        summary.timed_out.to_string().yellow(),
        summary.not_attempted
    );
    if report.is_success() {
        ui::success("Stack is converged");
    }
}
