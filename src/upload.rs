//! Single-flight upload entry point.
//!
//! Holds the cross-process upload lock for the whole run: upload out of the
//! controller into a temporary project file, read the controller name from
//! it, and save the final timestamped backup. The lock and the temp file
//! are both released on every exit path.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::{info, warn};

use crate::config::LockConfig;
use crate::driver::ControllerDriver;
use crate::lock::UploadLock;

#[derive(Debug, Clone)]
pub struct UploadOptions {
    /// Communication path to the controller.
    pub comm_path: String,
    /// Directory for the final backup file; created if absent.
    pub save_dir: PathBuf,
    /// Optional prefix for the saved filename.
    pub prefix: String,
    pub lock: LockConfig,
}

/// Run one locked upload. Returns the path of the saved backup.
pub fn run_upload(driver: &dyn ControllerDriver, options: &UploadOptions) -> Result<PathBuf> {
    // Lock timeout must propagate untouched so the caller can exit non-zero
    // without having touched the controller.
    let lock = UploadLock::acquire(
        &options.lock.path,
        options.lock.max_wait(),
        options.lock.poll(),
    )?;

    let result = locked_upload(driver, options);
    lock.release();
    result
}

fn locked_upload(driver: &dyn ControllerDriver, options: &UploadOptions) -> Result<PathBuf> {
    std::fs::create_dir_all(&options.save_dir).with_context(|| {
        format!(
            "Failed to create save directory: {}",
            options.save_dir.display()
        )
    })?;

    // Removed automatically on drop, so failures below leave nothing behind.
    let temp = tempfile::Builder::new()
        .prefix("logixwatch-upload-")
        .suffix(".ACD")
        .tempfile()
        .context("Failed to create temporary project file")?;

    info!(comm_path = %options.comm_path, "uploading project from controller");
    driver
        .upload(&options.comm_path, temp.path())
        .context("Upload from controller failed")?;
    info!("upload complete");

    let final_path = save_backup(driver, temp.path(), &options.save_dir, &options.prefix)?;
    info!(path = %final_path.display(), "backup saved");
    Ok(final_path)
}

/// Open the uploaded project, name the backup after its controller, and
/// save it into `save_dir`.
fn save_backup(
    driver: &dyn ControllerDriver,
    uploaded: &Path,
    save_dir: &Path,
    prefix: &str,
) -> Result<PathBuf> {
    let mut session = driver
        .open(uploaded)
        .context("Failed to open uploaded project")?;

    let result = (|| -> Result<PathBuf> {
        let controller = session
            .controller_name()
            .context("Failed to read controller name")?;
        let final_path = save_dir.join(backup_filename(prefix, &controller, chrono::Local::now()));
        session
            .save_as(&final_path)
            .with_context(|| format!("Failed to save project as {}", final_path.display()))?;
        Ok(final_path)
    })();

    if let Err(e) = session.close() {
        warn!("failed to close uploaded project: {e}");
    }
    result
}

/// `{prefix}{controllerName}_{YYYYMMDD_HHMM}.ACD`
fn backup_filename(prefix: &str, controller: &str, now: chrono::DateTime<chrono::Local>) -> String {
    format!("{prefix}{controller}_{}.ACD", now.format("%Y%m%d_%H%M"))
}
