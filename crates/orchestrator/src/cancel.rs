//! Cooperative cancellation shared between the signal handler and the run.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

/// Granularity of interruptible sleeps.
const SLEEP_SLICE: Duration = Duration::from_millis(50);

/// A cloneable cancellation flag.
///
/// The executor checks it between modules and while sleeping (retry backoff,
/// health polling). Apply steps receive their own per-attempt token so an
/// interrupt never tears down a module mid-apply.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    /// Create a token that is not cancelled.
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation. Idempotent.
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    /// Whether cancellation has been requested.
    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// Sleep for `duration`, waking early on cancellation.
    ///
    /// Returns `true` if the full duration elapsed, `false` if cancelled.
    pub fn sleep(&self, duration: Duration) -> bool {
        // No deadline when the duration cannot be represented
        let deadline = Instant::now().checked_add(duration);
        loop {
            if self.is_cancelled() {
                return false;
            }
            let now = Instant::now();
            let slice = match deadline {
                Some(deadline) if now >= deadline => return true,
                Some(deadline) => SLEEP_SLICE.min(deadline - now),
                None => SLEEP_SLICE,
            };
            thread::sleep(slice);
        }
    }
}
