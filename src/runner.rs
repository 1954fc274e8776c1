//! Runs module commands on the host
//!
//! Each command gets its own process group so a timeout or Ctrl-C takes down
//! everything it spawned (helm plugins, apt's dpkg children, ...).

use orchestrator::{CancelToken, CommandOutput, CommandRunner, ExecutionError, Invocation};
use std::io::{self, Read};
use std::os::unix::process::CommandExt;
use std::process::{Child, Command, Stdio};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Time between SIGTERM and SIGKILL for a process group
const KILL_GRACE: Duration = Duration::from_secs(2);

/// Executes invocations as child processes with captured output
#[derive(Debug, Clone, Default)]
pub struct ShellRunner {
    /// Print each command before running it
    echo: bool,
}

impl ShellRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn echo(mut self, echo: bool) -> Self {
        self.echo = echo;
        self
    }
}

impl CommandRunner for ShellRunner {
    fn run(
        &self,
        invocation: &Invocation,
        cancel: &CancelToken,
        deadline: Option<Instant>,
    ) -> Result<CommandOutput, ExecutionError> {
        if cancel.is_cancelled() {
            return Err(ExecutionError::interrupted());
        }
        if self.echo {
            log::info!("$ {invocation}");
        } else {
            log::debug!("$ {invocation}");
        }

        let mut command = Command::new(&invocation.program);
        command
            .args(&invocation.args)
            .envs(invocation.env.iter().map(|(k, v)| (k, v)))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .process_group(0);

        let started = Instant::now();
        let mut child = command.spawn().map_err(|e| spawn_error(invocation, &e))?;
        let stdout = drain(child.stdout.take());
        let stderr = drain(child.stderr.take());

        let status = loop {
            match child.try_wait() {
                Ok(Some(status)) => break status,
                Ok(None) => {}
                Err(e) => {
                    terminate(&mut child);
                    return Err(ExecutionError::fatal(format!(
                        "waiting for `{invocation}` failed: {e}"
                    )));
                }
            }

            if cancel.is_cancelled() {
                log::debug!("Cancelling `{invocation}`");
                terminate(&mut child);
                return Err(ExecutionError::interrupted());
            }
            if deadline.is_some_and(|d| Instant::now() >= d) {
                log::debug!("`{invocation}` hit its deadline");
                terminate(&mut child);
                return Err(ExecutionError::timeout(started.elapsed()));
            }
            thread::sleep(POLL_INTERVAL);
        };

        let output = CommandOutput {
            stdout: collect(stdout),
            stderr: collect(stderr),
            code: status.code(),
        };
        log::trace!(
            "`{invocation}` finished with {:?} in {:.1}s",
            output.code,
            started.elapsed().as_secs_f64()
        );
        Ok(output)
    }
}

fn spawn_error(invocation: &Invocation, error: &io::Error) -> ExecutionError {
    if error.kind() == io::ErrorKind::NotFound {
        ExecutionError::fatal(format!("executable not found: {}", invocation.program))
    } else {
        ExecutionError::fatal(format!("failed to start `{invocation}`: {error}"))
    }
}

/// Read a pipe to the end on its own thread so a chatty child never blocks
fn drain<R: Read + Send + 'static>(pipe: Option<R>) -> Option<JoinHandle<Vec<u8>>> {
    pipe.map(|mut pipe| {
        thread::spawn(move || {
            let mut buf = Vec::new();
            let _ = pipe.read_to_end(&mut buf);
            buf
        })
    })
}

fn collect(handle: Option<JoinHandle<Vec<u8>>>) -> Vec<u8> {
    handle.and_then(|h| h.join().ok()).unwrap_or_default()
}

/// SIGTERM the child's process group, then SIGKILL after a grace period
fn terminate(child: &mut Child) {
    let Ok(pgid) = i32::try_from(child.id()) else {
        let _ = child.kill();
        let _ = child.wait();
        return;
    };

    signal_group(pgid, libc::SIGTERM);
    let start = Instant::now();
    while start.elapsed() < KILL_GRACE {
        if matches!(child.try_wait(), Ok(Some(_))) {
            // Leader is gone; sweep any stragglers in its group
            signal_group(pgid, libc::SIGKILL);
            return;
        }
        thread::sleep(POLL_INTERVAL);
    }

    log::warn!("Process group {pgid} ignored SIGTERM, sending SIGKILL");
    signal_group(pgid, libc::SIGKILL);
    let _ = child.wait();
}

fn signal_group(pgid: i32, signal: libc::c_int) {
    // SAFETY: kill has no memory preconditions; a negative pid targets the
    // group created by process_group(0) at spawn
    let rc = unsafe { libc::kill(-pgid, signal) };
    if rc != 0 {
        log::trace!(
            "kill(-{pgid}, {signal}) failed: {}",
            io::Error::last_os_error()
        );
    }
}
