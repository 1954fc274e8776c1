//! Modules declared as data: a list of commands plus an optional health
//! command

use orchestrator::{
    ApplyContext, CommandOutput, ExecutionError, Fingerprint, HealthCheck, Invocation, Module,
};
use regex::RegexSet;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

/// Which failed commands are worth another attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RetryClass {
    /// Output matching a network-class pattern, plus timeouts
    #[default]
    Network,
    /// Any non-zero exit
    Always,
    /// Never retry
    Never,
}

/// A catalog module backed by external commands
#[derive(Debug)]
pub struct CommandModule {
    pub(super) name: String,
    pub(super) description: String,
    pub(super) version: String,
    pub(super) depends_on: Vec<String>,
    pub(super) optional: bool,
    pub(super) retry: RetryClass,
    pub(super) timeout: Option<Duration>,
    pub(super) steps: Vec<Invocation>,
    pub(super) health: Option<(Invocation, HealthCheck)>,
    pub(super) transient: Arc<RegexSet>,
}

impl CommandModule {
    /// Turn a non-zero exit into an error of the right kind
    fn classify(&self, invocation: &Invocation, output: &CommandOutput) -> ExecutionError {
        let stderr = output.stderr_str();
        let stdout = output.stdout_str();
        let detail = last_line(&stderr)
            .or_else(|| last_line(&stdout))
            .unwrap_or("no output");
        let status = output
            .code
            .map_or_else(|| "signal".to_string(), |c| c.to_string());
        let message = format!("`{invocation}` exited with {status}: {detail}");

        let transient = match self.retry {
            RetryClass::Always => true,
            RetryClass::Never => false,
            RetryClass::Network => {
                self.transient.is_match(&stderr) || self.transient.is_match(&stdout)
            }
        };

        if transient {
            ExecutionError::transient(message)
        } else {
            ExecutionError::fatal(message)
        }
    }
}

fn last_line(text: &str) -> Option<&str> {
    text.trim().lines().last().filter(|line| !line.is_empty())
}

impl Module for CommandModule {
    fn name(&self) -> &str {
        &self.name
    }

    fn depends_on(&self) -> &[String] {
        &self.depends_on
    }

    fn description(&self) -> String {
        self.description.clone()
    }

    fn version(&self) -> Option<String> {
        Some(self.version.clone())
    }

    fn fingerprint(&self) -> Fingerprint {
        // Role-tagged parts: an argument never hashes like an env entry or a step boundary
        let mut parts = vec![format!("name:{}", self.name), format!("version:{}", self.version)];
        for step in &self.steps {
            parts.push(format!("program:{}", step.program));
            parts.extend(step.args.iter().map(|arg| format!("arg:{arg}")));
            for (key, value) in &step.env {
                parts.push(format!("env-key:{key}"));
                parts.push(format!("env-value:{value}"));
            }
        }
        Fingerprint::of(parts)
    }

    fn apply(&self, ctx: &ApplyContext) -> Result<(), ExecutionError> {
        for (i, step) in self.steps.iter().enumerate() {
            if ctx.is_cancelled() {
                return Err(ExecutionError::transient(format!(
                    "cancelled before step {} of {}",
                    i + 1,
                    self.name
                )));
            }
            log::debug!("{} step {}/{}: {step}", self.name, i + 1, self.steps.len());

            if self.retry == RetryClass::Always {
                ctx.run_checked(step)?;
                continue;
            }

            let output = ctx.run(step)?;
            if !output.success() {
                return Err(self.classify(step, &output));
            }
        }
        Ok(())
    }

    fn health_check(&self) -> Option<HealthCheck> {
        self.health.as_ref().map(|(_, spec)| *spec)
    }

    fn check_health(&self, ctx: &ApplyContext) -> Result<bool, ExecutionError> {
        match &self.health {
            Some((invocation, _)) => Ok(ctx.run(invocation)?.success()),
            None => Ok(true),
        }
    }

    fn retryable(&self, error: &ExecutionError) -> bool {
        self.retry != RetryClass::Never && error.is_retryable()
    }

    fn optional(&self) -> bool {
        self.optional
    }

    fn attempt_timeout(&self) -> Option<Duration> {
        self.timeout
    }
}
