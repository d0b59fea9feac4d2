use std::fs;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use serial_test::serial;
use tempfile::TempDir;

use logixwatch::config::WatchConfig;
use logixwatch::driver::HelperDriver;
use logixwatch::orchestrator::CycleOrchestrator;

use crate::helpers::{sh_command, watch_helper_script};

/// Full watch cycle against a scripted helper process: the audit tag
/// holds at its seeded value, changes to 5, settles, and the external
/// job fires exactly once.
#[test]
#[serial]
fn watch_cycle_triggers_external_job_once() {
    let dir = TempDir::new().unwrap();
    let project_dir = dir.path().join("projects");
    fs::create_dir(&project_dir).unwrap();
    fs::write(project_dir.join("PRESS_1.ACD"), b"acd").unwrap();

    let marker = dir.path().join("marker");
    let script = watch_helper_script(dir.path());
    let driver = HelperDriver::new(sh_command(&script)).unwrap();

    let config = WatchConfig {
        project_dir,
        file_prefix: Some("PRESS".to_string()),
        tag: "ControllerAuditValue".to_string(),
        external_command: vec![
            "sh".to_string(),
            "-c".to_string(),
            format!("echo run >> {}", marker.display()),
        ],
        stability_secs: 0,
        poll_interval_secs: 0.01,
        post_trigger_pause_secs: 0,
        armed_recheck_secs: 1,
        ..WatchConfig::default()
    };

    let mut orchestrator = CycleOrchestrator::new(config, Box::new(driver));
    let shutdown = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&shutdown);
    let handle = thread::spawn(move || {
        orchestrator.run(&flag).unwrap();
    });

    // Poll for the job marker rather than sleeping a fixed budget, so a
    // loaded machine only slows the test down instead of failing it. Once
    // armed after the trigger, no further run can occur.
    let deadline = std::time::Instant::now() + Duration::from_secs(15);
    while !marker.exists() && std::time::Instant::now() < deadline {
        thread::sleep(Duration::from_millis(10));
    }
    shutdown.store(true, Ordering::SeqCst);
    handle.join().unwrap();

    let runs = fs::read_to_string(&marker).expect("external job never ran");
    assert_eq!(runs, "run\n", "expected exactly one trigger");
}
