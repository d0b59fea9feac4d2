//! Wire types for the vendor SDK helper.
//!
//! The helper is a long-running child process that owns the real SDK handle.
//! Each request is one line of JSON on its stdin; each response is one line
//! of JSON on its stdout. Requests are strictly serial per helper process.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use super::TagMode;

/// Request to the SDK helper.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Request {
    /// Open the project file. Must be the first request of a session helper.
    Open { path: PathBuf },
    GoOnline,
    GoOffline,
    ReadTag { name: String, mode: TagMode },
    /// Controller name recorded in the open project.
    ControllerName,
    SaveAs { path: PathBuf },
    Close,
    /// One-shot: upload the project out of the controller at `comm_path`
    /// into a fresh project file at `dest`.
    Upload { comm_path: String, dest: PathBuf },
}

/// Response from the SDK helper.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Response {
    Ok,
    Value { value: serde_json::Value },
    Name { name: String },
    /// SDK error. `message` is the vendor's own text, passed through
    /// verbatim so fault classification sees the original wording.
    Error { message: String },
}
