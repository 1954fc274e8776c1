use colored::{ColoredString, Colorize};
use orchestrator::{CheckResult, DriftStatus, ExecutionStatus, Severity};
use std::time::Duration;

/// Print an info message
pub fn info(msg: &str) {
    println!("{} {}", "ℹ".blue(), msg);
}

/// Print a success message
pub fn success(msg: &str) {
    println!("{} {}", "✓".green(), msg);
}

/// Print a warning message
pub fn warn(msg: &str) {
    println!("{} {}", "⚠".yellow(), msg);
}

/// Print an error message
pub fn error(msg: &str) {
    eprintln!("{} {}", "✗".red(), msg);
}

/// Print a dim/muted message
pub fn dim(msg: &str) {
    println!("  {}", msg.dimmed());
}

/// Print a header/title
pub fn header(title: &str) {
    println!();
    println!("{}", title.bold());
    println!("{}", "─".repeat(title.chars().count()).dimmed());
}

/// Print a section header
pub fn section(title: &str) {
    println!();
    println!("{}", title.cyan().bold());
}

/// Print a key-value pair
pub fn kv(key: &str, value: &str) {
    println!("  {}: {}", key.dimmed(), value);
}

/// Print a step indicator
pub fn step(num: usize, total: usize, msg: &str) {
    println!("{} {}", format!("[{num}/{total}]").blue().bold(), msg);
}

// ============================================================================
// Engine values
// ============================================================================

/// One pre-flight check as a status line
pub fn check_line(check: &CheckResult) {
    let mark = match (check.ok, check.severity) {
        (true, _) => "✓".green(),
        (false, Severity::Required) => "✗".red(),
        (false, Severity::Optional) => "⚠".yellow(),
    };
    let message = if check.ok {
        check.message.dimmed()
    } else {
        check.message.normal()
    };
    println!("  {mark} {:<18} {message}", check.name);
}

/// Colored, fixed-width label for a module outcome
pub fn status_label(status: ExecutionStatus) -> ColoredString {
    let text = format!("{:<9}", status.label());
    match status {
        ExecutionStatus::Applied => text.green(),
        ExecutionStatus::Skipped => text.dimmed(),
        ExecutionStatus::Failed => text.red().bold(),
        ExecutionStatus::TimedOut => text.yellow().bold(),
    }
}

/// Colored label for a ledger comparison
pub fn drift_label(status: DriftStatus) -> ColoredString {
    let text = format!("{:<11}", status.to_string());
    match status {
        DriftStatus::UpToDate => text.green(),
        DriftStatus::Drifted => text.yellow(),
        DriftStatus::NeverApplied => text.dimmed(),
    }
}

/// Format a duration as `850ms`, `12.3s` or `4m 05s`
pub fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs();
    if secs >= 60 {
        format!("{}m {:02}s", secs / 60, secs % 60)
    } else if duration.as_millis() >= 1000 {
        format!("{:.1}s", duration.as_secs_f64())
    } else {
        format!("{}ms", duration.as_millis())
    }
}

/// Pluralize a count: `1 module`, `3 modules`
pub fn plural(count: usize, noun: &str) -> String {
    if count == 1 {
        format!("{count} {noun}")
    } else {
        format!("{count} {noun}s")
    }
}
