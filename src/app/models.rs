use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::app::capture::stream::StreamKind;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CommandResponse<T> {
    pub trace_id: String,
    pub data: T,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AdbInfo {
    pub available: bool,
    pub version_output: String,
    pub command_path: String,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AboutInfo {
    pub name: String,
    pub version: String,
    pub description: String,
}

impl AboutInfo {
    pub fn current() -> Self {
        Self {
            name: "ADB Log Capture".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            description: "Captures dmesg, xlog and logcat from an Android device. \
                          Ensure the device is connected and adb is available in PATH."
                .to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    #[default]
    Idle,
    Preparing,
    Running,
    Stopping,
    Stopped,
}

impl SessionStatus {
    pub fn can_start(self) -> bool {
        matches!(self, SessionStatus::Idle | SessionStatus::Stopped)
    }

    pub fn can_stop(self) -> bool {
        matches!(self, SessionStatus::Running)
    }
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CaptureEventKind {
    Status,
    StreamFailed,
    StreamEnded,
}

/// Pushed to the status readout. `message` is the user-facing line.
#[derive(Debug, Clone, Serialize)]
pub struct CaptureEvent {
    pub kind: CaptureEventKind,
    pub status: SessionStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stream: Option<StreamKind>,
    pub message: String,
    pub trace_id: String,
}

/// What one stream worker did over the life of a run.
#[derive(Debug, Clone, Serialize, Default, PartialEq, Eq)]
pub struct WorkerReport {
    pub lines_written: u64,
    pub terminated: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_stderr: Option<String>,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct StreamOutcome {
    pub stream: StreamKind,
    pub path: PathBuf,
    /// `None` when the worker was still busy when the join timeout elapsed.
    pub report: Option<WorkerReport>,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct RunHandle {
    pub run_dir: PathBuf,
    pub streams: Vec<StreamKind>,
    pub trace_id: String,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct StoppedRun {
    pub run_dir: PathBuf,
    pub streams: Vec<StreamOutcome>,
    pub trace_id: String,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct SessionSnapshot {
    pub status: SessionStatus,
    pub run_dir: Option<PathBuf>,
    pub streams: Vec<StreamKind>,
}
