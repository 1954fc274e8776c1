//! Live progress for `install`
//!
//! A spinner per module on an interactive terminal, plain step lines
//! otherwise.

use crate::ui;
use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};
use orchestrator::{
    ExecutionError, ExecutionObserver, ExecutionPlan, ExecutionResult, ExecutionStatus,
};
use std::time::Duration;

const TICK: Duration = Duration::from_millis(100);

/// Observer that renders engine events for humans
pub struct ProgressReporter {
    spinner: Option<ProgressBar>,
    interactive: bool,
    quiet: bool,
    index: usize,
    total: usize,
}

impl ProgressReporter {
    pub fn new(quiet: bool) -> Self {
        Self {
            spinner: None,
            interactive: !quiet && console::Term::stdout().is_term(),
            quiet,
            index: 0,
            total: 0,
        }
    }

    fn prefix(&self) -> String {
        format!("[{}/{}]", self.index, self.total)
    }

    fn start_spinner(&mut self, module: &str) {
        let style = ProgressStyle::with_template(
            "{spinner:.green} {prefix:.blue.bold} {msg} {elapsed:.dim}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_spinner());
        let pb = ProgressBar::new_spinner();
        pb.set_style(style);
        pb.set_prefix(self.prefix());
        pb.set_message(module.to_string());
        pb.enable_steady_tick(TICK);
        self.spinner = Some(pb);
    }

    /// Print a line without tearing the spinner
    fn line(&self, text: &str) {
        match &self.spinner {
            Some(pb) => pb.suspend(|| println!("{text}")),
            None => println!("{text}"),
        }
    }
}

impl ExecutionObserver for ProgressReporter {
    fn on_plan(&mut self, plan: &ExecutionPlan) {
        self.total = plan.len();
        if !self.quiet {
            ui::info(&format!("Plan: {}", plan.modules.join(" → ")));
        }
    }

    fn on_module_start(&mut self, module: &str, index: usize, total: usize) {
        self.index = index + 1;
        self.total = total;
        if self.quiet {
            return;
        }
        if self.interactive {
            self.start_spinner(module);
        } else {
            ui::step(self.index, total, module);
        }
    }

    fn on_retry(
        &mut self,
        module: &str,
        attempt: u32,
        max_attempts: u32,
        error: &ExecutionError,
        delay: Duration,
    ) {
        if self.quiet {
            return;
        }
        let text = format!(
            "  {} {module}: attempt {attempt}/{max_attempts} failed ({}), retrying in {}",
            "↻".yellow(),
            error.message(),
            ui::format_duration(delay)
        );
        self.line(&text);
    }

    fn on_health_wait(&mut self, module: &str, polls: u32, elapsed: Duration) {
        if let Some(pb) = &self.spinner {
            pb.set_message(format!(
                "{module} {}",
                format!("waiting for health ({polls} polls, {})", ui::format_duration(elapsed))
                    .dimmed()
            ));
        } else if !self.quiet {
            log::info!("{module}: not healthy yet after {polls} poll(s)");
        }
    }

    fn on_module_complete(&mut self, result: &ExecutionResult) {
        if let Some(pb) = self.spinner.take() {
            pb.finish_and_clear();
        }
        if self.quiet && result.status.is_success() {
            return;
        }

        let mark = match result.status {
            ExecutionStatus::Applied => "✓".green(),
            ExecutionStatus::Skipped => "–".dimmed(),
            ExecutionStatus::Failed => "✗".red(),
            ExecutionStatus::TimedOut => "⏱".yellow(),
        };
        let mut text = format!(
            "{mark} {} {} {}",
            self.prefix().blue().bold(),
            result.module,
            ui::status_label(result.status)
        );
        if result.attempts > 0 {
            text.push_str(
                &format!(
                    " {} ({})",
                    ui::format_duration(result.duration),
                    ui::plural(result.attempts as usize, "attempt")
                )
                .dimmed()
                .to_string(),
            );
        }
        println!("{text}");
    }
}

impl Drop for ProgressReporter {
    fn drop(&mut self) {
        if let Some(pb) = self.spinner.take() {
            pb.finish_and_clear();
        }
    }
}
