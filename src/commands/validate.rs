use anyhow::Result;
use colored::Colorize;
use orchestrator::{ValidationReport, Validator};

use crate::Context;
use crate::config::Settings;
use crate::probe::HostProbe;
use crate::ui;

pub fn run(ctx: &Context) -> Result<()> {
    let settings = Settings::load(ctx.config.as_deref())?;
    let validator = Validator::new(settings.preflight_config());

    ui::header("Pre-flight Checks");
    let report = validator.validate(&HostProbe::new());
    print_report(&report);

    report.into_result()?;
    Ok(())
}

/// Print every check and a one-line verdict
pub fn print_report(report: &ValidationReport) {
    for check in &report.checks {
        ui::check_line(check);
    }

    println!();
    let failures = report.failures().len();
    let warnings = report.warnings().len();
    if failures > 0 {
        println!(
            "  {} {}",
            ui::plural(failures, "required check").red().bold(),
            "failed".red().bold()
        );
    } else if warnings > 0 {
        ui::success(&format!(
            "Host is ready ({})",
            ui::plural(warnings, "warning")
        ));
    } else {
        ui::success("Host is ready");
    }
}
