//! Outer watch cycle.
//!
//! Detects the newest backup project file, owns the controller session,
//! decides between "wait for change" and "time stability" from the last
//! triggered value, drives the stability monitor, and runs the external
//! backup job on trigger. Fatal failures tear the session down and restart
//! the cycle after a cooldown; the watcher process itself never exits on
//! them.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::{anyhow, Result};
use tracing::{debug, error, info, warn};

use crate::config::WatchConfig;
use crate::driver::{ControllerDriver, ControllerSession, TagMode, TagValue};
use crate::exec::run_external;
use crate::fault::{classify_fault, FaultKind};
use crate::locate::find_latest_acd;
use crate::monitor::{MonitorConfig, MonitorOutcome, StabilityMonitor, TriggerEvent};
use crate::recovery::RecoveryConfig;
use crate::utils::sleep_with_shutdown;

/// Should the next monitoring run wait for a change before timing stability?
///
/// Armed exactly when the project's offline tag value equals the value that
/// triggered the previous cycle: the backup already reflects that state, so
/// re-triggering on it would upload nothing new. A failed offline read
/// (`None`) assumes a change rather than dead-waiting forever.
pub fn arm_policy(offline_value: Option<&TagValue>, last_triggered: Option<&TagValue>) -> bool {
    matches!((offline_value, last_triggered), (Some(o), Some(t)) if o == t)
}

enum OnlineOutcome {
    Online,
    Exhausted,
    Stopped,
}

pub struct CycleOrchestrator {
    config: WatchConfig,
    driver: Box<dyn ControllerDriver + Send>,
    monitor: StabilityMonitor,
    /// Value that triggered the previous successful cycle.
    last_triggered: Option<TagValue>,
    wait_for_change: bool,
    first_run: bool,
}

impl CycleOrchestrator {
    pub fn new(config: WatchConfig, driver: Box<dyn ControllerDriver + Send>) -> Self {
        let monitor = StabilityMonitor::new(
            MonitorConfig {
                tag: config.tag.clone(),
                poll_interval: config.poll_interval(),
                stability_window: config.stability_window(),
                error_threshold: config.error_threshold,
                recovery_cooldown: config.recovery_cooldown(),
            },
            RecoveryConfig {
                online_attempts: config.recovery_online_attempts,
                backoff_base: config.recovery_backoff_base(),
            },
        );
        Self {
            config,
            driver,
            monitor,
            last_triggered: None,
            wait_for_change: false,
            first_run: true,
        }
    }

    /// Run the watch loop until shutdown.
    pub fn run(&mut self, shutdown: &AtomicBool) -> Result<()> {
        info!(
            project_dir = %self.config.project_dir.display(),
            tag = %self.config.tag,
            "watcher started"
        );

        let mut session: Option<Box<dyn ControllerSession>> = None;
        let mut current_source: Option<PathBuf> = None;

        while !shutdown.load(Ordering::SeqCst) {
            if let Err(e) = self.cycle(&mut session, &mut current_source, shutdown) {
                error!("unrecovered failure in watch cycle: {e:#}");
                close_session(&mut session);
                current_source = None;
                // Session identity is lost, so the arm state derived from it
                // is too; fall back to safe defaults.
                self.wait_for_change = false;
                self.last_triggered = None;
                sleep_with_shutdown(self.config.fatal_cooldown(), shutdown);
            }
        }

        close_session(&mut session);
        info!("watcher stopped");
        Ok(())
    }

    /// One iteration of the outer loop.
    fn cycle(
        &mut self,
        session: &mut Option<Box<dyn ControllerSession>>,
        current_source: &mut Option<PathBuf>,
        shutdown: &AtomicBool,
    ) -> Result<()> {
        let latest = find_latest_acd(
            &self.config.project_dir,
            self.config.file_prefix.as_deref(),
        )?;
        let Some(latest) = latest else {
            info!(
                rescan_secs = self.config.rescan_secs,
                "no matching project file, waiting"
            );
            sleep_with_shutdown(self.config.rescan_delay(), shutdown);
            return Ok(());
        };

        if current_source.as_deref() != Some(latest.as_path()) {
            self.load_new_source(session, current_source, latest)?;
        } else if self.wait_for_change {
            debug!(
                recheck_secs = self.config.armed_recheck_secs,
                "parked until the next backup appears"
            );
            sleep_with_shutdown(self.config.armed_recheck(), shutdown);
            return Ok(());
        }

        let Some(active) = session.as_mut() else {
            return Ok(());
        };

        if !active.is_online() {
            match self.bring_online(active.as_mut(), shutdown)? {
                OnlineOutcome::Online => {}
                OnlineOutcome::Exhausted => {
                    warn!(
                        cooldown_secs = self.config.rescan_secs,
                        "could not go online, re-scanning after cooldown"
                    );
                    sleep_with_shutdown(self.config.rescan_delay(), shutdown);
                    return Ok(());
                }
                OnlineOutcome::Stopped => return Ok(()),
            }
        }

        loop {
            match self
                .monitor
                .run(active.as_mut(), self.driver.as_ref(), shutdown)
            {
                MonitorOutcome::Triggered(event) => {
                    self.handle_trigger(event, active.as_mut(), shutdown);
                    return Ok(());
                }
                MonitorOutcome::ResetApplied(fresh) => {
                    info!("session replaced after full reset, resuming monitoring");
                    *active = fresh;
                }
                MonitorOutcome::Stopped => return Ok(()),
                MonitorOutcome::Fatal(e) => {
                    return Err(anyhow!(e).context("monitoring aborted on unclassified error"))
                }
            }
        }
    }

    /// Swap the session over to a newly detected backup project and decide
    /// the arm state from its offline tag value.
    fn load_new_source(
        &mut self,
        session: &mut Option<Box<dyn ControllerSession>>,
        current_source: &mut Option<PathBuf>,
        latest: PathBuf,
    ) -> Result<()> {
        info!(path = %latest.display(), "new backup project detected");
        close_session(session);

        let mut fresh = self
            .driver
            .open(&latest)
            .map_err(|e| anyhow!(e).context("failed to open backup project"))?;
        *current_source = Some(latest);

        let offline_value = match fresh.read_tag(&self.config.tag, TagMode::Offline) {
            Ok(v) => {
                info!(tag = %self.config.tag, value = %v, "offline tag value");
                Some(v)
            }
            Err(e) => {
                warn!("offline tag read failed, assuming a change: {e}");
                None
            }
        };

        if self.first_run {
            // Seed the arm state so an unchanged backup does not re-trigger
            // right after a watcher restart.
            self.last_triggered = offline_value.clone();
            self.first_run = false;
        }

        self.wait_for_change = arm_policy(offline_value.as_ref(), self.last_triggered.as_ref());
        if self.wait_for_change {
            info!("offline value equals last triggered value, waiting for a change");
        } else {
            info!("tag value changed since the last cycle, monitoring stability");
            self.last_triggered = None;
        }
        self.monitor
            .begin(self.last_triggered.clone(), self.wait_for_change);

        *session = Some(fresh);
        Ok(())
    }

    /// Bring-online with the generous new-source retry budget. Fatal errors
    /// propagate; exhausting the budget is a wait state.
    fn bring_online(
        &self,
        session: &mut dyn ControllerSession,
        shutdown: &AtomicBool,
    ) -> Result<OnlineOutcome> {
        for attempt in 1..=self.config.online_attempts {
            match session.go_online() {
                Ok(()) => return Ok(OnlineOutcome::Online),
                Err(e) if classify_fault(&e) == FaultKind::Transient => {
                    warn!(
                        attempt,
                        max = self.config.online_attempts,
                        "go online failed: {e}"
                    );
                    if attempt < self.config.online_attempts
                        && !sleep_with_shutdown(self.config.online_retry_delay(), shutdown)
                    {
                        return Ok(OnlineOutcome::Stopped);
                    }
                }
                Err(e) => return Err(anyhow!(e).context("failed to bring session online")),
            }
        }
        Ok(OnlineOutcome::Exhausted)
    }

    /// Run the external backup job and re-arm according to its outcome.
    fn handle_trigger(
        &mut self,
        event: TriggerEvent,
        session: &mut dyn ControllerSession,
        shutdown: &AtomicBool,
    ) {
        info!(value = %event.value, at = %event.at, "stability trigger");

        let result = run_external(
            &self.config.external_command,
            self.config.external_workdir.as_deref(),
            self.config.job_timeout(),
        );

        if result.success {
            info!("backup job completed, parking offline until the next change");
            self.last_triggered = Some(event.value);
            self.wait_for_change = true;
            self.monitor.begin(self.last_triggered.clone(), true);
            if let Err(e) = session.go_offline() {
                warn!("failed to go offline after trigger: {e}");
            }
            sleep_with_shutdown(self.config.post_trigger_pause(), shutdown);
        } else {
            // No re-arm: the stability window re-runs on the same value so a
            // transiently failed job never loses a backup.
            warn!("backup job failed, staying online for the next stable period");
            self.wait_for_change = false;
        }
    }
}

/// Offline-then-close, logging rather than propagating cleanup failures.
fn close_session(session: &mut Option<Box<dyn ControllerSession>>) {
    if let Some(mut s) = session.take() {
        if s.is_online() {
            if let Err(e) = s.go_offline() {
                warn!("error going offline during cleanup: {e}");
            }
        }
        if let Err(e) = s.close() {
            warn!("error closing session during cleanup: {e}");
        }
    }
}
