//! Controller driver boundary
//!
//! The vendor SDK that actually talks to the controller lives outside this
//! crate. Everything the watcher needs from it is expressed through the two
//! object-safe traits here; the `helper` backend drives the SDK through a
//! long-running helper process.

use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[cfg(test)]
pub mod fake;
pub mod helper;
pub mod protocol;

pub use helper::HelperDriver;

/// Value of a controller tag.
///
/// Tags carry arbitrary scalar or structured data; the watcher only ever
/// compares values for equality and displays them in logs.
pub type TagValue = serde_json::Value;

/// Whether a tag read goes against the project file or the live controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TagMode {
    Offline,
    Online,
}

/// Error raised by a driver operation.
///
/// The message text is what the fault classifier inspects, so backends must
/// pass vendor error messages through unmodified.
#[derive(Debug, Error)]
#[error("{message}")]
pub struct DriverError {
    pub message: String,
}

impl DriverError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// An open project/controller connection.
///
/// At most one live session exists per watcher process. Implementations must
/// make `close` idempotent; `Drop` impls should close best-effort so a
/// session never leaks a controller connection on an error path.
pub trait ControllerSession: std::fmt::Debug {
    /// Identity of the backing project file this session was opened against.
    fn source(&self) -> &Path;

    fn is_online(&self) -> bool;

    fn go_online(&mut self) -> Result<(), DriverError>;

    fn go_offline(&mut self) -> Result<(), DriverError>;

    fn read_tag(&mut self, tag: &str, mode: TagMode) -> Result<TagValue, DriverError>;

    /// Controller name recorded in the project.
    fn controller_name(&mut self) -> Result<String, DriverError>;

    /// Save the project to a new file.
    fn save_as(&mut self, dest: &Path) -> Result<(), DriverError>;

    fn close(&mut self) -> Result<(), DriverError>;
}

/// Factory for controller sessions plus the session-less SDK operations.
pub trait ControllerDriver {
    fn open(&self, source: &Path) -> Result<Box<dyn ControllerSession>, DriverError>;

    /// Upload the project out of the controller at `comm_path` into a fresh
    /// project file at `dest`.
    fn upload(&self, comm_path: &str, dest: &Path) -> Result<(), DriverError>;
}
