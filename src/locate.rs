//! Backup source location.
//!
//! Finds the most recently modified `.ACD` project file in the backup
//! directory, optionally filtered by filename prefix. Modification time is
//! the only ordering that matters; the watcher re-scans continuously so a
//! missing directory or an empty scan is a wait state, not an error.

use std::path::{Path, PathBuf};
use std::time::SystemTime;

use anyhow::{Context, Result};
use tracing::{debug, warn};

/// Most recently modified matching project file, or `None` when no
/// candidate exists.
pub fn find_latest_acd(directory: &Path, prefix: Option<&str>) -> Result<Option<PathBuf>> {
    if !directory.is_dir() {
        warn!(directory = %directory.display(), "project directory not found");
        return Ok(None);
    }

    let entries = std::fs::read_dir(directory)
        .with_context(|| format!("Failed to read project directory: {}", directory.display()))?;

    let mut latest: Option<(PathBuf, SystemTime)> = None;
    for entry in entries {
        let entry = entry?;
        let path = entry.path();
        if !is_candidate(&path, prefix) {
            continue;
        }
        let modified = entry
            .metadata()
            .and_then(|m| m.modified())
            .with_context(|| format!("Failed to stat project file: {}", path.display()))?;
        if latest.as_ref().is_none_or(|(_, best)| modified > *best) {
            latest = Some((path, modified));
        }
    }

    match latest {
        Some((path, _)) => {
            debug!(path = %path.display(), "latest project file");
            Ok(Some(path))
        }
        None => {
            debug!(
                directory = %directory.display(),
                prefix = prefix.unwrap_or(""),
                "no matching project files"
            );
            Ok(None)
        }
    }
}

fn is_candidate(path: &Path, prefix: Option<&str>) -> bool {
    let has_extension = path
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("acd"));
    if !has_extension || !path.is_file() {
        return false;
    }
    match prefix {
        Some(p) => path
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| n.starts_with(p)),
        None => true,
    }
}
