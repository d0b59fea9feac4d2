//! Full session reset.
//!
//! When polling has failed persistently, the only reliable way back is to
//! drop the session entirely: reopen the project against the same backing
//! file and bring it online again with bounded, escalating retries. A failed
//! recovery never leaks a half-opened session.

use std::path::Path;
use std::sync::atomic::AtomicBool;
use std::time::Duration;

use tracing::{info, warn};

use crate::driver::{ControllerDriver, ControllerSession, DriverError};
use crate::fault::{classify_fault, reconnect_backoff, FaultKind};
use crate::utils::sleep_with_shutdown;

/// Retry bounds for the bring-online phase of a reset.
#[derive(Debug, Clone)]
pub struct RecoveryConfig {
    pub online_attempts: u32,
    pub backoff_base: Duration,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            online_attempts: 5,
            backoff_base: Duration::from_secs(10),
        }
    }
}

/// Close + reopen + bring online against the same backing source.
///
/// Returns a fresh online session, or the error that ended the attempt. Any
/// partially-opened session is closed before returning failure.
pub fn full_reset(
    driver: &dyn ControllerDriver,
    source: &Path,
    config: &RecoveryConfig,
    shutdown: &AtomicBool,
) -> Result<Box<dyn ControllerSession>, DriverError> {
    info!(source = %source.display(), "performing full session reset");

    let mut session = driver.open(source)?;
    info!("project re-opened");

    for attempt in 1..=config.online_attempts {
        match session.go_online() {
            Ok(()) => {
                info!(attempt, "back online after full reset");
                return Ok(session);
            }
            Err(e) if classify_fault(&e) == FaultKind::Transient => {
                warn!(
                    attempt,
                    max = config.online_attempts,
                    error = %e,
                    "online attempt failed during reset"
                );
                if attempt < config.online_attempts {
                    let delay = reconnect_backoff(attempt, config.backoff_base);
                    if !sleep_with_shutdown(delay, shutdown) {
                        break;
                    }
                }
            }
            Err(e) => {
                if let Err(close_err) = session.close() {
                    warn!("failed to close session after fatal online error: {close_err}");
                }
                return Err(e);
            }
        }
    }

    if let Err(close_err) = session.close() {
        warn!("failed to close session after exhausted reset: {close_err}");
    }
    Err(DriverError::new(
        "failed to go online after full session reset",
    ))
}
