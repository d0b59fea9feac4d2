//! Fault classification and backoff for controller communication.
//!
//! The classifier is the single source of truth for which driver failures
//! count as transient connectivity problems. Everything not in the
//! vocabulary is fatal and aborts the current session.

use std::time::Duration;

use crate::driver::DriverError;

/// How a driver failure should be handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultKind {
    /// Connectivity, licensing, or timeout symptom. Absorbed locally with
    /// retries and, if persistent, a full session reset.
    Transient,

    /// Anything else, including programming errors. Tears down the session.
    Fatal,
}

/// Known connectivity/licensing symptoms, matched case-insensitively against
/// the driver's error text. Includes the gateway driver's own phrasing for a
/// dead link ("cannot communicate with linx").
const TRANSIENT_SYMPTOMS: &[&str] = &[
    "connection",
    "communications",
    "comms",
    "lost connection",
    "license",
    "licensing",
    "activation",
    "checkout failed",
    "timeout",
    "failed to connect",
    "unable to establish",
    "rslinx",
    "linx",
    "cannotsenddata",
    "cannot communicate with linx",
];

/// Classify a driver failure by its message text.
pub fn classify_fault(error: &DriverError) -> FaultKind {
    let msg = error.message.to_lowercase();
    if TRANSIENT_SYMPTOMS.iter().any(|s| msg.contains(s)) {
        FaultKind::Transient
    } else {
        FaultKind::Fatal
    }
}

/// Delay before reconnect attempt `attempt` (1-based) during session
/// recovery: linear in the attempt index.
///
/// With base=10s: attempt 1 waits 10s, attempt 2 waits 20s, and so on.
pub fn reconnect_backoff(attempt: u32, base: Duration) -> Duration {
    base.saturating_mul(attempt.max(1))
}
