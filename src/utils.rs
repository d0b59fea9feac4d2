//! Small shared helpers.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

/// Granularity at which sleeps check the shutdown flag.
const SHUTDOWN_CHECK_INTERVAL: Duration = Duration::from_millis(250);

/// Sleep for `duration`, waking early if `shutdown` is set.
///
/// Returns `true` if the full duration elapsed, `false` if interrupted by
/// shutdown. All loop sleeps in the watcher go through this so Ctrl+C is
/// honored promptly even during long cooldowns.
pub fn sleep_with_shutdown(duration: Duration, shutdown: &AtomicBool) -> bool {
    let deadline = Instant::now() + duration;
    loop {
        if shutdown.load(Ordering::SeqCst) {
            return false;
        }
        let now = Instant::now();
        if now >= deadline {
            return true;
        }
        std::thread::sleep((deadline - now).min(SHUTDOWN_CHECK_INTERVAL));
    }
}
