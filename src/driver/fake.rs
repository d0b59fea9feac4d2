//! Scripted in-memory driver for state-machine tests.
//!
//! Each `open` call consumes the next [`Script`]; each session replays its
//! script's per-operation step lists in order. Call counters are shared
//! between the driver and every session it produced, so tests can assert on
//! totals after the session is gone.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use super::{ControllerDriver, ControllerSession, DriverError, TagMode, TagValue};

/// One scripted operation result.
#[derive(Debug, Clone)]
pub struct Step {
    result: Result<TagValue, String>,
}

impl Step {
    pub fn ok() -> Self {
        Self {
            result: Ok(TagValue::Null),
        }
    }

    pub fn value(v: impl Into<TagValue>) -> Self {
        Self {
            result: Ok(v.into()),
        }
    }

    /// Error whose text classifies as a transient connectivity fault.
    pub fn transient_err() -> Self {
        Self {
            result: Err("lost connection to controller".to_string()),
        }
    }

    pub fn fatal_err(message: &str) -> Self {
        Self {
            result: Err(message.to_string()),
        }
    }

    fn into_unit(self) -> Result<(), DriverError> {
        self.result.map(|_| ()).map_err(DriverError::new)
    }

    fn into_value(self) -> Result<TagValue, DriverError> {
        self.result.map_err(DriverError::new)
    }
}

/// Per-session behavior script.
#[derive(Debug, Clone, Default)]
pub struct Script {
    /// Results for successive `go_online` calls; exhausted means success.
    pub online: Vec<Step>,
    /// Results for successive `go_offline` calls; exhausted means success.
    pub offline: Vec<Step>,
    /// Results for successive online `read_tag` calls; exhausting this list
    /// yields a fatal error so a runaway poll loop fails the test loudly.
    pub reads: Vec<Step>,
    /// Results for successive offline `read_tag` calls; same exhaustion rule.
    pub offline_reads: Vec<Step>,
    /// Controller name reported by the session.
    pub name: Option<String>,
}

#[derive(Debug, Default)]
pub struct Counters {
    pub open: AtomicU32,
    pub online: AtomicU32,
    pub offline: AtomicU32,
    pub reads: AtomicU32,
    pub close: AtomicU32,
    pub upload: AtomicU32,
}

/// What the next `open` call does.
#[derive(Debug, Clone)]
enum OpenOutcome {
    Session(Script),
    Fail(String),
}

pub struct FakeDriver {
    opens: Mutex<VecDeque<OpenOutcome>>,
    default_open_error: Option<String>,
    upload_error: Option<String>,
    counters: Arc<Counters>,
}

impl FakeDriver {
    pub fn new(scripts: Vec<Script>) -> Self {
        Self {
            opens: Mutex::new(scripts.into_iter().map(OpenOutcome::Session).collect()),
            default_open_error: None,
            upload_error: None,
            counters: Arc::default(),
        }
    }

    /// Every `open` call fails with `message`.
    pub fn failing_open(message: &str) -> Self {
        Self {
            opens: Mutex::new(VecDeque::new()),
            default_open_error: Some(message.to_string()),
            upload_error: None,
            counters: Arc::default(),
        }
    }

    /// Make the next queued `open` call fail with `message`.
    pub fn queue_open_failure(&self, message: &str) {
        self.opens
            .lock()
            .expect("fake driver mutex poisoned")
            .push_back(OpenOutcome::Fail(message.to_string()));
    }

    pub fn with_upload_error(mut self, message: &str) -> Self {
        self.upload_error = Some(message.to_string());
        self
    }

    /// Shared counter handle, for asserting after the driver has been moved
    /// into an orchestrator.
    pub fn counters(&self) -> Arc<Counters> {
        Arc::clone(&self.counters)
    }

    pub fn open_calls(&self) -> u32 {
        self.counters.open.load(Ordering::SeqCst)
    }

    pub fn online_calls(&self) -> u32 {
        self.counters.online.load(Ordering::SeqCst)
    }

    pub fn offline_calls(&self) -> u32 {
        self.counters.offline.load(Ordering::SeqCst)
    }

    pub fn read_calls(&self) -> u32 {
        self.counters.reads.load(Ordering::SeqCst)
    }

    pub fn close_calls(&self) -> u32 {
        self.counters.close.load(Ordering::SeqCst)
    }

    pub fn upload_calls(&self) -> u32 {
        self.counters.upload.load(Ordering::SeqCst)
    }
}

impl ControllerDriver for FakeDriver {
    fn open(&self, source: &Path) -> Result<Box<dyn ControllerSession>, DriverError> {
        self.counters.open.fetch_add(1, Ordering::SeqCst);
        let next = self
            .opens
            .lock()
            .expect("fake driver mutex poisoned")
            .pop_front();
        let script = match next {
            Some(OpenOutcome::Session(script)) => script,
            Some(OpenOutcome::Fail(msg)) => return Err(DriverError::new(msg)),
            None => match &self.default_open_error {
                Some(msg) => return Err(DriverError::new(msg.clone())),
                None => Script::default(),
            },
        };
        Ok(Box::new(FakeSession {
            source: source.to_path_buf(),
            online: false,
            script: ScriptState::new(script),
            counters: Arc::clone(&self.counters),
        }))
    }

    fn upload(&self, _comm_path: &str, dest: &Path) -> Result<(), DriverError> {
        self.counters.upload.fetch_add(1, Ordering::SeqCst);
        if let Some(msg) = &self.upload_error {
            return Err(DriverError::new(msg.clone()));
        }
        std::fs::write(dest, b"acd").map_err(|e| DriverError::new(e.to_string()))
    }
}

#[derive(Debug)]
struct ScriptState {
    online: VecDeque<Step>,
    offline: VecDeque<Step>,
    reads: VecDeque<Step>,
    offline_reads: VecDeque<Step>,
    name: Option<String>,
}

impl ScriptState {
    fn new(script: Script) -> Self {
        Self {
            online: script.online.into(),
            offline: script.offline.into(),
            reads: script.reads.into(),
            offline_reads: script.offline_reads.into(),
            name: script.name,
        }
    }
}

#[derive(Debug)]
struct FakeSession {
    source: PathBuf,
    online: bool,
    script: ScriptState,
    counters: Arc<Counters>,
}

impl ControllerSession for FakeSession {
    fn source(&self) -> &Path {
        &self.source
    }

    fn is_online(&self) -> bool {
        self.online
    }

    fn go_online(&mut self) -> Result<(), DriverError> {
        self.counters.online.fetch_add(1, Ordering::SeqCst);
        let result = self
            .script
            .online
            .pop_front()
            .unwrap_or_else(Step::ok)
            .into_unit();
        if result.is_ok() {
            self.online = true;
        }
        result
    }

    fn go_offline(&mut self) -> Result<(), DriverError> {
        self.counters.offline.fetch_add(1, Ordering::SeqCst);
        let result = self
            .script
            .offline
            .pop_front()
            .unwrap_or_else(Step::ok)
            .into_unit();
        if result.is_ok() {
            self.online = false;
        }
        result
    }

    fn read_tag(&mut self, _tag: &str, mode: TagMode) -> Result<TagValue, DriverError> {
        self.counters.reads.fetch_add(1, Ordering::SeqCst);
        let queue = match mode {
            TagMode::Online => &mut self.script.reads,
            TagMode::Offline => &mut self.script.offline_reads,
        };
        queue
            .pop_front()
            .unwrap_or_else(|| Step::fatal_err("fake read script exhausted"))
            .into_value()
    }

    fn controller_name(&mut self) -> Result<String, DriverError> {
        Ok(self
            .script
            .name
            .clone()
            .unwrap_or_else(|| "FAKE_PLC".to_string()))
    }

    fn save_as(&mut self, dest: &Path) -> Result<(), DriverError> {
        std::fs::write(dest, b"acd").map_err(|e| DriverError::new(e.to_string()))
    }

    fn close(&mut self) -> Result<(), DriverError> {
        self.counters.close.fetch_add(1, Ordering::SeqCst);
        self.online = false;
        Ok(())
    }
}
