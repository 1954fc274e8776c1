//! Interrupt handling
//!
//! The first SIGINT/SIGTERM/SIGHUP asks the run to stop after the module in
//! flight; the state file stays consistent. A second one exits immediately.

use orchestrator::CancelToken;
use signal_hook::consts::signal::{SIGHUP, SIGINT, SIGTERM};
use signal_hook::iterator::Signals;
use std::io;
use std::thread;

/// Route termination signals into `cancel`
pub fn install(cancel: CancelToken) -> io::Result<()> {
    let mut signals = Signals::new([SIGINT, SIGTERM, SIGHUP])?;

    thread::Builder::new()
        .name("signals".into())
        .spawn(move || {
            for sig in signals.forever() {
                if cancel.is_cancelled() {
                    log::warn!("Received {} again, exiting now", signal_name(sig));
                    std::process::exit(128 + sig);
                }
                log::debug!("Received {}", signal_name(sig));
                crate::ui::warn(
                    "Interrupted: finishing the current module, press Ctrl-C again to abort",
                );
                cancel.cancel();
            }
        })?;
    Ok(())
}

fn signal_name(sig: i32) -> &'static str {
    match sig {
        SIGINT => "SIGINT",
        SIGTERM => "SIGTERM",
        SIGHUP => "SIGHUP",
        _ => "signal",
    }
}
