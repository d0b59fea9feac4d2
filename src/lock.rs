//! Cross-process single-flight lock for controller uploads.
//!
//! A named file at a well-known path, held with an exclusive `fs2` advisory
//! lock. Ownership is the OS-level lock, not the file's existence: a file
//! left behind by a killed holder is still acquirable because the kernel
//! released its lock with the process. The pid and timestamp written into
//! the file are diagnostics for whoever is stuck waiting.
//!
//! Advisory locks are cooperative; every upload entry point on the host must
//! go through this type for the exclusion to hold.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use fs2::FileExt;
use nix::errno::Errno;
use nix::sys::signal::kill;
use nix::unistd::Pid;
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum LockError {
    #[error("timed out after {waited:?} waiting for upload lock at {path}")]
    Timeout { path: String, waited: Duration },

    #[error("upload lock I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Exclusive holder of the upload lock.
///
/// Released (unlocked and removed) when dropped, so the critical section can
/// never exit without releasing, including on panic.
pub struct UploadLock {
    file: File,
    path: PathBuf,
    held: bool,
}

impl UploadLock {
    /// Acquire the lock at `path`, retrying every `poll` until `max_wait`
    /// elapses. With `max_wait` of zero a held lock fails immediately,
    /// without sleeping.
    pub fn acquire(path: &Path, max_wait: Duration, poll: Duration) -> Result<Self, LockError> {
        let start = Instant::now();
        let mut announced = false;

        loop {
            match Self::try_acquire(path) {
                Ok(lock) => {
                    info!(path = %path.display(), "upload lock acquired");
                    return Ok(lock);
                }
                Err(TryAcquireError::Contended(file)) => {
                    let waited = start.elapsed();
                    if waited >= max_wait {
                        return Err(LockError::Timeout {
                            path: path.display().to_string(),
                            waited,
                        });
                    }
                    if !announced {
                        info!("another backup is in progress, queuing for the upload lock");
                        announced = true;
                    }
                    log_holder(&file, waited);
                    std::thread::sleep(poll.min(max_wait - waited));
                }
                Err(TryAcquireError::Io(e)) => return Err(LockError::Io(e)),
            }
        }
    }

    /// Single non-blocking attempt.
    fn try_acquire(path: &Path) -> Result<Self, TryAcquireError> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;

        match file.try_lock_exclusive() {
            Ok(()) => {
                if !path_matches_inode(&file, path) {
                    // Lost a race with a releasing holder: we locked an
                    // inode already unlinked from the path. Start over on
                    // whatever file the path names now.
                    return Self::try_acquire(path);
                }
                let mut lock = Self {
                    file,
                    path: path.to_path_buf(),
                    held: true,
                };
                lock.write_holder_info()?;
                Ok(lock)
            }
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                Err(TryAcquireError::Contended(file))
            }
            Err(e) => Err(TryAcquireError::Io(e)),
        }
    }

    /// Record who holds the lock. Truncate after locking, not before, so a
    /// contending process never reads an empty file mid-write.
    fn write_holder_info(&mut self) -> std::io::Result<()> {
        self.file.set_len(0)?;
        self.file.seek(SeekFrom::Start(0))?;
        writeln!(self.file, "pid={}", std::process::id())?;
        writeln!(self.file, "acquired={}", chrono::Utc::now().to_rfc3339())?;
        self.file.sync_all()
    }

    /// Release explicitly. Equivalent to dropping, but lets callers place
    /// the release precisely.
    pub fn release(mut self) {
        self.release_inner();
    }

    fn release_inner(&mut self) {
        if self.held {
            self.held = false;
            // Remove first: a waiter that grabs the lock right after unlock
            // recreates the file, and removing afterwards would delete the
            // new holder's record.
            if let Err(e) = std::fs::remove_file(&self.path) {
                debug!("could not remove lock file: {e}");
            }
            if let Err(e) = fs2::FileExt::unlock(&self.file) {
                warn!("failed to unlock upload lock: {e}");
            }
            info!(path = %self.path.display(), "upload lock released");
        }
    }
}

impl Drop for UploadLock {
    fn drop(&mut self) {
        self.release_inner();
    }
}

enum TryAcquireError {
    /// Lock is held elsewhere. Carries the opened file so the waiter can
    /// read the holder's record.
    Contended(File),
    Io(std::io::Error),
}

impl From<std::io::Error> for TryAcquireError {
    fn from(e: std::io::Error) -> Self {
        TryAcquireError::Io(e)
    }
}

/// Log the recorded holder pid and whether that process still exists.
fn log_holder(mut file: &File, waited: Duration) {
    let mut content = String::new();
    if file.seek(SeekFrom::Start(0)).is_err() || file.read_to_string(&mut content).is_err() {
        debug!(waited_secs = waited.as_secs(), "waiting for upload lock");
        return;
    }
    let pid = content
        .lines()
        .find_map(|l| l.strip_prefix("pid="))
        .and_then(|p| p.trim().parse::<u32>().ok());
    match pid {
        Some(pid) => info!(
            waited_secs = waited.as_secs(),
            holder_pid = pid,
            holder_alive = pid_alive(pid),
            "waiting for upload lock"
        ),
        None => info!(waited_secs = waited.as_secs(), "waiting for upload lock"),
    }
}

/// True when the locked file is still what `path` names.
fn path_matches_inode(file: &File, path: &Path) -> bool {
    use std::os::unix::fs::MetadataExt;
    match (file.metadata(), std::fs::metadata(path)) {
        (Ok(a), Ok(b)) => a.ino() == b.ino() && a.dev() == b.dev(),
        _ => false,
    }
}

/// Null-signal probe: EPERM still means the process exists.
fn pid_alive(pid: u32) -> bool {
    let Ok(pid) = i32::try_from(pid) else {
        return false;
    };
    match kill(Pid::from_raw(pid), None) {
        Ok(()) | Err(Errno::EPERM) => true,
        Err(_) => false,
    }
}
