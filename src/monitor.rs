//! Stability-detection state machine.
//!
//! Polls the audit tag online, times how long its value has been unchanged,
//! and reports a trigger once the value has held for the configured window.
//! Transient communication faults are absorbed with bounded retries and,
//! past a threshold, a full session reset; fatal faults are handed back to
//! the orchestrator.
//!
//! Every exit from a monitoring run is an explicit [`MonitorOutcome`]
//! variant consumed by the orchestrator; no sentinel errors.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use tracing::{error, info, warn};

use crate::driver::{ControllerDriver, ControllerSession, DriverError, TagMode, TagValue};
use crate::fault::{classify_fault, FaultKind};
use crate::recovery::{full_reset, RecoveryConfig};
use crate::utils::sleep_with_shutdown;

#[derive(Debug, Clone)]
pub struct MonitorConfig {
    /// Tag watched for quiescence.
    pub tag: String,
    pub poll_interval: Duration,
    pub stability_window: Duration,
    /// Consecutive transient read failures tolerated before a full reset.
    pub error_threshold: u32,
    /// Cooldown after a failed reset before polling resumes.
    pub recovery_cooldown: Duration,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            tag: "ControllerAuditValue".to_string(),
            poll_interval: Duration::from_secs(2),
            stability_window: Duration::from_secs(1800),
            error_threshold: 5,
            recovery_cooldown: Duration::from_secs(60),
        }
    }
}

/// Produced exactly once per stability cycle, at the moment of transition
/// into `Triggered`. Provenance for logging only.
#[derive(Debug, Clone, PartialEq)]
pub struct TriggerEvent {
    pub value: TagValue,
    pub at: DateTime<Utc>,
}

/// How one monitoring run ended.
pub enum MonitorOutcome {
    /// The tag held one value for the full stability window.
    Triggered(TriggerEvent),

    /// Persistent comm loss forced a full session reset, which succeeded.
    /// The caller must swap in this fresh session and re-enter the run;
    /// observed value and window state are preserved across the swap.
    ResetApplied(Box<dyn ControllerSession>),

    /// Shutdown was requested mid-run.
    Stopped,

    /// Unclassified driver failure; the caller tears the session down.
    Fatal(DriverError),
}

/// Mutable state of one monitoring run.
#[derive(Debug, Default)]
struct MonitorState {
    last_value: Option<TagValue>,
    stable_since: Option<Instant>,
    wait_for_change: bool,
    consecutive_errors: u32,
}

pub struct StabilityMonitor {
    config: MonitorConfig,
    recovery: RecoveryConfig,
    state: MonitorState,
}

impl StabilityMonitor {
    pub fn new(config: MonitorConfig, recovery: RecoveryConfig) -> Self {
        Self {
            config,
            recovery,
            state: MonitorState::default(),
        }
    }

    /// Reset state for a new session.
    ///
    /// With `wait_for_change` set, `baseline` is the previously triggered
    /// value and no window runs until a different value is observed.
    /// Without it, the first successful read starts the window immediately.
    pub fn begin(&mut self, baseline: Option<TagValue>, wait_for_change: bool) {
        self.state = MonitorState {
            last_value: baseline,
            stable_since: None,
            wait_for_change,
            consecutive_errors: 0,
        };
    }

    /// Poll until the run ends. Re-entrant: after `ResetApplied`, calling
    /// `run` again with the fresh session continues the same cycle.
    pub fn run(
        &mut self,
        session: &mut dyn ControllerSession,
        driver: &dyn ControllerDriver,
        shutdown: &AtomicBool,
    ) -> MonitorOutcome {
        if self.state.wait_for_change {
            info!(tag = %self.config.tag, "monitoring for changes");
        } else {
            info!(tag = %self.config.tag, "monitoring for stability");
        }

        loop {
            if shutdown.load(Ordering::SeqCst) {
                return MonitorOutcome::Stopped;
            }

            match session.read_tag(&self.config.tag, TagMode::Online) {
                Ok(value) => {
                    self.state.consecutive_errors = 0;
                    if let Some(event) = self.observe(value) {
                        return MonitorOutcome::Triggered(event);
                    }
                }
                Err(e) => match classify_fault(&e) {
                    FaultKind::Fatal => {
                        error!(tag = %self.config.tag, "failed to read tag: {e}");
                        return MonitorOutcome::Fatal(e);
                    }
                    FaultKind::Transient => {
                        self.state.consecutive_errors += 1;
                        warn!(
                            count = self.state.consecutive_errors,
                            threshold = self.config.error_threshold,
                            "transient communication error: {e}"
                        );
                        if self.state.consecutive_errors >= self.config.error_threshold {
                            match full_reset(driver, session.source(), &self.recovery, shutdown) {
                                Ok(fresh) => {
                                    self.state.consecutive_errors = 0;
                                    return MonitorOutcome::ResetApplied(fresh);
                                }
                                Err(reset_err) => {
                                    error!(
                                        cooldown_secs = self.config.recovery_cooldown.as_secs(),
                                        "full reset failed: {reset_err}; cooling down before retrying"
                                    );
                                    if !sleep_with_shutdown(self.config.recovery_cooldown, shutdown)
                                    {
                                        return MonitorOutcome::Stopped;
                                    }
                                    self.state.consecutive_errors = 0;
                                    continue;
                                }
                            }
                        }
                    }
                },
            }

            if !sleep_with_shutdown(self.config.poll_interval, shutdown) {
                return MonitorOutcome::Stopped;
            }
        }
    }

    /// Feed one successfully read value through the state machine. Returns
    /// the trigger event when the stability window is satisfied.
    fn observe(&mut self, value: TagValue) -> Option<TriggerEvent> {
        let now = Instant::now();

        match &self.state.last_value {
            None => {
                info!(value = %value, "connected, first value observed");
                if !self.state.wait_for_change {
                    // Window starts on the first read, not the first change.
                    self.state.stable_since = Some(now);
                }
                self.state.last_value = Some(value);
                None
            }
            Some(last) if *last != value => {
                info!(previous = %last, current = %value, "change detected");
                if self.state.wait_for_change {
                    info!("change after previous cycle, starting stability countdown");
                    self.state.wait_for_change = false;
                }
                self.state.stable_since = Some(now);
                self.state.last_value = Some(value);
                None
            }
            Some(_) => {
                if self.state.wait_for_change {
                    return None;
                }
                match self.state.stable_since {
                    None => {
                        info!(
                            value = %value,
                            window_secs = self.config.stability_window.as_secs(),
                            "tag stable, starting countdown"
                        );
                        self.state.stable_since = Some(now);
                        None
                    }
                    Some(since) if now.duration_since(since) >= self.config.stability_window => {
                        info!(value = %value, "tag stable for the full window, triggering");
                        self.state.stable_since = None;
                        Some(TriggerEvent {
                            value,
                            at: Utc::now(),
                        })
                    }
                    Some(_) => None,
                }
            }
        }
    }
}
