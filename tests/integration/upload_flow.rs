use std::thread;
use std::time::Duration;

use serial_test::serial;
use tempfile::TempDir;

use logixwatch::config::LockConfig;
use logixwatch::driver::HelperDriver;
use logixwatch::lock::UploadLock;
use logixwatch::upload::{run_upload, UploadOptions};

use crate::helpers::{sh_command, upload_helper_script};

fn options(dir: &TempDir) -> UploadOptions {
    UploadOptions {
        comm_path: "AB_ETH-1\\10.0.0.5".to_string(),
        save_dir: dir.path().join("backups"),
        prefix: "AUTO_".to_string(),
        lock: LockConfig {
            path: dir.path().join("upload.lock"),
            max_wait_secs: 10,
            poll_secs: 1,
        },
    }
}

#[test]
#[serial]
fn upload_through_scripted_helper_saves_named_backup() {
    let dir = TempDir::new().unwrap();
    let script = upload_helper_script(dir.path());
    let driver = HelperDriver::new(sh_command(&script)).unwrap();

    let saved = run_upload(&driver, &options(&dir)).unwrap();

    assert!(saved.exists());
    let name = saved.file_name().unwrap().to_string_lossy().into_owned();
    assert!(name.starts_with("AUTO_TESTPLC_"), "unexpected name: {name}");
    assert!(name.ends_with(".ACD"), "unexpected name: {name}");

    // Lock must be gone once the run is over.
    assert!(!dir.path().join("upload.lock").exists());
}

#[test]
#[serial]
fn upload_queues_behind_a_held_lock() {
    let dir = TempDir::new().unwrap();
    let script = upload_helper_script(dir.path());
    let driver = HelperDriver::new(sh_command(&script)).unwrap();
    let opts = options(&dir);

    // Take the lock before the upload starts so it is guaranteed to queue,
    // then release from another thread while it waits.
    let lock_path = opts.lock.path.clone();
    let lock =
        UploadLock::acquire(&lock_path, Duration::ZERO, Duration::from_millis(10)).unwrap();
    let holder = thread::spawn(move || {
        thread::sleep(Duration::from_millis(300));
        lock.release();
    });

    let saved = run_upload(&driver, &opts).unwrap();
    holder.join().unwrap();

    assert!(saved.exists());
    assert!(!lock_path.exists());
}
