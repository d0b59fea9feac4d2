//! Watcher and lock configuration.
//!
//! All tunables live in one explicit struct constructed at startup, loaded
//! from a TOML file with CLI overrides applied on top. Nothing here is
//! process-global.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

/// Configuration for one watcher process (one controller/tag).
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WatchConfig {
    /// Directory scanned for the most recent backup project file.
    pub project_dir: PathBuf,

    /// Only project files whose name starts with this prefix are considered.
    pub file_prefix: Option<String>,

    /// Tag watched for quiescence.
    pub tag: String,

    /// Vendor SDK helper invocation (executable plus fixed arguments).
    pub helper_command: Vec<String>,

    /// External backup/upload job launched on trigger.
    pub external_command: Vec<String>,

    /// Working directory for the external job.
    pub external_workdir: Option<PathBuf>,

    /// How long the tag must stay unchanged before triggering.
    pub stability_secs: u64,

    /// Delay between online tag reads.
    pub poll_interval_secs: f64,

    /// Consecutive transient read failures tolerated before a full session
    /// reset is attempted.
    pub error_threshold: u32,

    /// Bring-online attempts inside a full reset.
    pub recovery_online_attempts: u32,

    /// Base delay for the linearly escalating reconnect backoff.
    pub recovery_backoff_base_secs: u64,

    /// Cooldown after a failed full reset before polling resumes.
    pub recovery_cooldown_secs: u64,

    /// Bring-online attempts when a new backup source is loaded.
    pub online_attempts: u32,

    /// Fixed delay between those bring-online attempts.
    pub online_retry_secs: u64,

    /// Sleep when no matching project file exists, or when bring-online
    /// attempts are exhausted, before re-scanning.
    pub rescan_secs: u64,

    /// Re-check interval while parked waiting for the next tag change.
    pub armed_recheck_secs: u64,

    /// Pause after a successful trigger before the next scan.
    pub post_trigger_pause_secs: u64,

    /// Cooldown after an unclassified outer-loop failure.
    pub fatal_cooldown_secs: u64,

    /// Kill the external job after this many seconds; 0 means no limit.
    pub job_timeout_secs: u64,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            project_dir: PathBuf::from("."),
            file_prefix: None,
            tag: "ControllerAuditValue".to_string(),
            helper_command: Vec::new(),
            external_command: Vec::new(),
            external_workdir: None,
            stability_secs: 1800,
            poll_interval_secs: 2.0,
            error_threshold: 5,
            recovery_online_attempts: 5,
            recovery_backoff_base_secs: 10,
            recovery_cooldown_secs: 60,
            online_attempts: 10,
            online_retry_secs: 10,
            rescan_secs: 60,
            armed_recheck_secs: 30,
            post_trigger_pause_secs: 10,
            fatal_cooldown_secs: 30,
            job_timeout_secs: 0,
        }
    }
}

impl WatchConfig {
    /// Load from a TOML file. Missing keys fall back to defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    pub fn stability_window(&self) -> Duration {
        Duration::from_secs(self.stability_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs_f64(self.poll_interval_secs)
    }

    pub fn recovery_backoff_base(&self) -> Duration {
        Duration::from_secs(self.recovery_backoff_base_secs)
    }

    pub fn recovery_cooldown(&self) -> Duration {
        Duration::from_secs(self.recovery_cooldown_secs)
    }

    pub fn online_retry_delay(&self) -> Duration {
        Duration::from_secs(self.online_retry_secs)
    }

    pub fn rescan_delay(&self) -> Duration {
        Duration::from_secs(self.rescan_secs)
    }

    pub fn armed_recheck(&self) -> Duration {
        Duration::from_secs(self.armed_recheck_secs)
    }

    pub fn post_trigger_pause(&self) -> Duration {
        Duration::from_secs(self.post_trigger_pause_secs)
    }

    pub fn fatal_cooldown(&self) -> Duration {
        Duration::from_secs(self.fatal_cooldown_secs)
    }

    pub fn job_timeout(&self) -> Option<Duration> {
        (self.job_timeout_secs > 0).then(|| Duration::from_secs(self.job_timeout_secs))
    }
}

/// Configuration for the cross-process upload lock.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LockConfig {
    /// Durable lock path shared by all cooperating processes on the host.
    pub path: PathBuf,

    /// Give up after waiting this long for the lock.
    pub max_wait_secs: u64,

    /// Re-check interval while the lock is held elsewhere.
    pub poll_secs: u64,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            path: default_lock_path(),
            max_wait_secs: 3600,
            poll_secs: 10,
        }
    }
}

impl LockConfig {
    pub fn max_wait(&self) -> Duration {
        Duration::from_secs(self.max_wait_secs)
    }

    pub fn poll(&self) -> Duration {
        Duration::from_secs(self.poll_secs)
    }
}

/// Well-known lock location in the user's home directory.
pub fn default_lock_path() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".logix_backup_upload.lock")
}

/// Configuration for the `upload` entry point, parsed from the same file as
/// [`WatchConfig`] so both subcommands share one deployment config.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct UploadConfig {
    pub helper_command: Vec<String>,
    pub lock: LockConfig,
}

impl UploadConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }
}
