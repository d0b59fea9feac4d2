//! External job execution.
//!
//! Launches the configured backup/upload command and captures its output for
//! logging. A non-zero exit (or a timeout, or a failure to launch) is a
//! failure *value*, never an error: the caller decides what a failed job
//! means for the monitoring cycle.

use std::io::Read;
use std::path::Path;
use std::process::{Command, Stdio};
use std::sync::mpsc;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use tracing::{error, info, warn};
use wait_timeout::ChildExt;

/// How long to wait for the pipe drain threads after the process exits.
const OUTPUT_COLLECTION_TIMEOUT: Duration = Duration::from_secs(10);

/// Outcome of one external job run.
#[derive(Debug, Clone)]
pub struct JobResult {
    pub success: bool,
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub timed_out: bool,
    pub duration: Duration,
}

impl JobResult {
    fn failed_to_launch(message: String) -> Self {
        Self {
            success: false,
            exit_code: None,
            stdout: String::new(),
            stderr: message,
            timed_out: false,
            duration: Duration::ZERO,
        }
    }
}

/// Check at startup that `command` names a resolvable executable. A
/// mistyped path should fail here, not as a recurring runtime teardown deep
/// inside the watch loop.
pub fn preflight_command(command: &[String], what: &str) -> Result<()> {
    let Some(exe) = command.first() else {
        bail!("{what} command is not configured");
    };
    which::which(exe).with_context(|| format!("{what} executable not found: {exe}"))?;
    Ok(())
}

/// Run `command` (executable plus arguments) in `workdir`, waiting at most
/// `timeout` if one is given.
pub fn run_external(
    command: &[String],
    workdir: Option<&Path>,
    timeout: Option<Duration>,
) -> JobResult {
    if command.is_empty() {
        return JobResult::failed_to_launch("external command is not configured".to_string());
    }

    info!(command = %command.join(" "), "running external job");
    let start = Instant::now();

    let mut cmd = Command::new(&command[0]);
    cmd.args(&command[1..])
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    if let Some(dir) = workdir {
        cmd.current_dir(dir);
    }

    let mut child = match cmd.spawn() {
        Ok(child) => child,
        Err(e) => {
            error!("failed to launch external job: {e}");
            return JobResult::failed_to_launch(format!("failed to launch: {e}"));
        }
    };

    // Drain stdout/stderr concurrently with waiting. Waiting first can
    // deadlock once the child fills the pipe buffer.
    let stdout_rx = spawn_drain(child.stdout.take());
    let stderr_rx = spawn_drain(child.stderr.take());

    let (status, timed_out) = match timeout {
        Some(limit) => match child.wait_timeout(limit) {
            Ok(Some(status)) => (Some(status), false),
            Ok(None) => {
                warn!(limit_secs = limit.as_secs(), "external job timed out, killing it");
                drop(child.kill());
                drop(child.wait());
                (None, true)
            }
            Err(e) => {
                error!("failed to wait for external job: {e}");
                (None, false)
            }
        },
        None => match child.wait() {
            Ok(status) => (Some(status), false),
            Err(e) => {
                error!("failed to wait for external job: {e}");
                (None, false)
            }
        },
    };

    let stdout = collect(stdout_rx);
    let stderr = collect(stderr_rx);
    let exit_code = status.and_then(|s| s.code());
    let success = status.is_some_and(|s| s.success());
    let duration = start.elapsed();

    if success {
        info!(elapsed_secs = duration.as_secs(), "external job finished successfully");
        if !stdout.trim().is_empty() {
            info!("job output:\n{}", stdout.trim_end());
        }
    } else if timed_out {
        error!("external job killed after timeout");
    } else {
        error!(code = ?exit_code, "external job failed");
        if !stdout.trim().is_empty() {
            warn!("job stdout:\n{}", stdout.trim_end());
        }
        if !stderr.trim().is_empty() {
            warn!("job stderr:\n{}", stderr.trim_end());
        }
    }

    JobResult {
        success,
        exit_code,
        stdout,
        stderr,
        timed_out,
        duration,
    }
}

fn spawn_drain<R: Read + Send + 'static>(stream: Option<R>) -> mpsc::Receiver<String> {
    let (tx, rx) = mpsc::channel();
    match stream {
        Some(mut stream) => {
            thread::spawn(move || {
                let mut buf = String::new();
                drop(stream.read_to_string(&mut buf));
                drop(tx.send(buf));
            });
        }
        None => drop(tx.send(String::new())),
    }
    rx
}

fn collect(rx: mpsc::Receiver<String>) -> String {
    rx.recv_timeout(OUTPUT_COLLECTION_TIMEOUT)
        .unwrap_or_else(|_| "[output collection timed out]".to_string())
}
