//! Helper-process driver backend.
//!
//! Spawns the configured vendor SDK helper and speaks the line-delimited
//! JSON protocol from [`super::protocol`]. One helper child per session; a
//! separate short-lived helper handles the session-less upload operation.

use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};

use tracing::{debug, warn};

use super::protocol::{Request, Response};
use super::{ControllerDriver, ControllerSession, DriverError, TagMode, TagValue};

/// Driver that delegates every SDK operation to a helper executable.
pub struct HelperDriver {
    command: Vec<String>,
}

impl HelperDriver {
    /// `command` is the helper invocation: executable followed by any fixed
    /// arguments.
    pub fn new(command: Vec<String>) -> Result<Self, DriverError> {
        if command.is_empty() {
            return Err(DriverError::new("SDK helper command is not configured"));
        }
        Ok(Self { command })
    }
}

impl ControllerDriver for HelperDriver {
    fn open(&self, source: &Path) -> Result<Box<dyn ControllerSession>, DriverError> {
        let mut process = HelperProcess::spawn(&self.command)?;
        let resp = process.call(&Request::Open {
            path: source.to_path_buf(),
        })?;
        expect_ok(resp)?;
        debug!(source = %source.display(), "opened controller project");
        Ok(Box::new(HelperSession {
            process,
            source: source.to_path_buf(),
            online: false,
            closed: false,
        }))
    }

    fn upload(&self, comm_path: &str, dest: &Path) -> Result<(), DriverError> {
        let mut process = HelperProcess::spawn(&self.command)?;
        let resp = process.call(&Request::Upload {
            comm_path: comm_path.to_string(),
            dest: dest.to_path_buf(),
        })?;
        expect_ok(resp)?;
        process.shutdown();
        Ok(())
    }
}

/// A spawned helper child with its stdio pipes.
#[derive(Debug)]
struct HelperProcess {
    child: Child,
    stdin: ChildStdin,
    stdout: BufReader<ChildStdout>,
}

impl HelperProcess {
    fn spawn(command: &[String]) -> Result<Self, DriverError> {
        let mut child = Command::new(&command[0])
            .args(&command[1..])
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()
            .map_err(|e| DriverError::new(format!("failed to spawn SDK helper: {e}")))?;

        // Both pipes exist because we requested them above.
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| DriverError::new("SDK helper stdin unavailable"))?;
        let stdout = child
            .stdout
            .take()
            .map(BufReader::new)
            .ok_or_else(|| DriverError::new("SDK helper stdout unavailable"))?;

        Ok(Self {
            child,
            stdin,
            stdout,
        })
    }

    /// One request/response round trip.
    fn call(&mut self, request: &Request) -> Result<Response, DriverError> {
        let mut line = serde_json::to_string(request)
            .map_err(|e| DriverError::new(format!("failed to encode helper request: {e}")))?;
        line.push('\n');
        self.stdin
            .write_all(line.as_bytes())
            .and_then(|()| self.stdin.flush())
            .map_err(|e| DriverError::new(format!("lost connection to SDK helper: {e}")))?;

        let mut reply = String::new();
        let n = self
            .stdout
            .read_line(&mut reply)
            .map_err(|e| DriverError::new(format!("lost connection to SDK helper: {e}")))?;
        if n == 0 {
            return Err(DriverError::new("SDK helper closed its connection"));
        }
        serde_json::from_str(reply.trim_end())
            .map_err(|e| DriverError::new(format!("invalid response from SDK helper: {e}")))
    }

    /// Best-effort termination, used once the session is closed.
    fn shutdown(&mut self) {
        drop(self.stdin.flush());
        if let Err(e) = self.child.kill() {
            debug!("helper already exited: {e}");
        }
        drop(self.child.wait());
    }
}

impl Drop for HelperProcess {
    fn drop(&mut self) {
        // Reap the child on error paths where no session was constructed.
        self.shutdown();
    }
}

/// Session backed by one helper child.
#[derive(Debug)]
struct HelperSession {
    process: HelperProcess,
    source: PathBuf,
    online: bool,
    closed: bool,
}

impl HelperSession {
    fn call(&mut self, request: &Request) -> Result<Response, DriverError> {
        self.process.call(request)
    }
}

impl ControllerSession for HelperSession {
    fn source(&self) -> &Path {
        &self.source
    }

    fn is_online(&self) -> bool {
        self.online
    }

    fn go_online(&mut self) -> Result<(), DriverError> {
        expect_ok(self.call(&Request::GoOnline)?)?;
        self.online = true;
        Ok(())
    }

    fn go_offline(&mut self) -> Result<(), DriverError> {
        expect_ok(self.call(&Request::GoOffline)?)?;
        self.online = false;
        Ok(())
    }

    fn read_tag(&mut self, tag: &str, mode: TagMode) -> Result<TagValue, DriverError> {
        let resp = self.call(&Request::ReadTag {
            name: tag.to_string(),
            mode,
        })?;
        match resp {
            Response::Value { value } => Ok(value),
            Response::Error { message } => Err(DriverError::new(message)),
            other => Err(DriverError::new(format!(
                "unexpected helper response to read_tag: {other:?}"
            ))),
        }
    }

    fn controller_name(&mut self) -> Result<String, DriverError> {
        let resp = self.call(&Request::ControllerName)?;
        match resp {
            Response::Name { name } => Ok(name),
            Response::Error { message } => Err(DriverError::new(message)),
            other => Err(DriverError::new(format!(
                "unexpected helper response to controller_name: {other:?}"
            ))),
        }
    }

    fn save_as(&mut self, dest: &Path) -> Result<(), DriverError> {
        expect_ok(self.call(&Request::SaveAs {
            path: dest.to_path_buf(),
        })?)
    }

    fn close(&mut self) -> Result<(), DriverError> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.online = false;
        // The helper child is reaped even if the close request itself fails,
        // so a broken session never leaks a process.
        let result = self.call(&Request::Close).and_then(expect_ok);
        self.process.shutdown();
        result
    }
}

impl Drop for HelperSession {
    fn drop(&mut self) {
        if !self.closed {
            if let Err(e) = self.close() {
                warn!("failed to close session during drop: {e}");
            }
        }
    }
}

fn expect_ok(response: Response) -> Result<(), DriverError> {
    match response {
        Response::Ok => Ok(()),
        Response::Error { message } => Err(DriverError::new(message)),
        other => Err(DriverError::new(format!(
            "unexpected helper response: {other:?}"
        ))),
    }
}
