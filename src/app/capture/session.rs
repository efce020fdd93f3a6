use chrono::Local;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::{info, warn};
use uuid::Uuid;

use crate::app::adb::bridge::DeviceBridge;
use crate::app::capture::prepare::prepare_device;
use crate::app::capture::run_dir::{create_run_dir, resolve_run_dir, validate_label};
use crate::app::capture::stream::StreamKind;
use crate::app::capture::worker::{spawn_worker, WorkerHandle, WorkerSpec};
use crate::app::capture::CaptureEmitter;
use crate::app::config::SessionSettings;
use crate::app::error::AppError;
use crate::app::models::{
    CaptureEvent, CaptureEventKind, RunHandle, SessionSnapshot, SessionStatus, StoppedRun,
    StreamOutcome,
};

#[cfg(test)]
mod tests;

/// What the form hands over when Start is pressed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SessionConfig {
    pub output_root: PathBuf,
    #[serde(default)]
    pub label: String,
    pub streams: Vec<StreamKind>,
}

impl SessionConfig {
    /// All three streams enabled and no label, matching the form's defaults.
    pub fn new(output_root: impl Into<PathBuf>) -> Self {
        Self {
            output_root: output_root.into(),
            label: String::new(),
            streams: StreamKind::ALL.to_vec(),
        }
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    pub fn with_streams(mut self, streams: impl IntoIterator<Item = StreamKind>) -> Self {
        self.streams = streams.into_iter().collect();
        self
    }

    /// Returns the enabled streams, deduplicated and in table order.
    pub fn validate(&self, trace_id: &str) -> Result<Vec<StreamKind>, AppError> {
        let mut streams = self.streams.clone();
        streams.sort();
        streams.dedup();
        if streams.is_empty() {
            return Err(AppError::validation(
                "Please select at least one log type to capture.",
                trace_id,
            ));
        }
        if !self.output_root.is_dir() {
            return Err(AppError::validation(
                "The selected output directory does not exist.",
                trace_id,
            ));
        }
        validate_label(&self.label).map_err(|message| AppError::validation(message, trace_id))?;
        Ok(streams)
    }
}

struct ActiveRun {
    run_dir: PathBuf,
    trace_id: String,
    stop_flag: Arc<AtomicBool>,
    workers: BTreeMap<StreamKind, WorkerHandle>,
}

/// Owns one logging run at a time: Idle → Preparing → Running → Stopping →
/// Stopped, and back to Preparing on the next start.
pub struct CaptureSession {
    bridge: Arc<dyn DeviceBridge>,
    settings: SessionSettings,
    emitter: CaptureEmitter,
    status: SessionStatus,
    active: Option<ActiveRun>,
    last_run_dir: Option<PathBuf>,
}

impl CaptureSession {
    pub fn new(bridge: Arc<dyn DeviceBridge>, settings: SessionSettings, emitter: CaptureEmitter) -> Self {
        Self {
            bridge,
            settings,
            emitter,
            status: SessionStatus::Idle,
            active: None,
            last_run_dir: None,
        }
    }

    pub fn status(&self) -> SessionStatus {
        self.status
    }

    pub fn is_running(&self) -> bool {
        self.active.is_some()
    }

    /// The directory of the current run, or of the last finished one.
    pub fn run_dir(&self) -> Option<&Path> {
        self.active
            .as_ref()
            .map(|run| run.run_dir.as_path())
            .or(self.last_run_dir.as_deref())
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            status: self.status,
            run_dir: self.run_dir().map(Path::to_path_buf),
            streams: self
                .active
                .as_ref()
                .map(|run| run.workers.keys().copied().collect())
                .unwrap_or_default(),
        }
    }

    fn set_status(&mut self, status: SessionStatus, message: String, trace_id: &str) {
        self.status = status;
        info!(trace_id = %trace_id, status = ?status, "{message}");
        (self.emitter)(CaptureEvent {
            kind: CaptureEventKind::Status,
            status,
            stream: None,
            message,
            trace_id: trace_id.to_string(),
        });
    }

    pub fn start(&mut self, config: &SessionConfig, trace_id: &str) -> Result<RunHandle, AppError> {
        if self.is_running() || !self.status.can_start() {
            return Err(AppError::validation("Logging already running", trace_id));
        }
        let streams = config.validate(trace_id)?;
        let previous = self.status;

        self.set_status(SessionStatus::Preparing, "Preparing device...".to_string(), trace_id);
        let steps = prepare_device(
            self.bridge.as_ref(),
            &self.settings.logcat_buffer_size,
            self.settings.prepare_timeout(),
            trace_id,
        );
        if steps.iter().all(|step| step.error.is_some()) {
            warn!(trace_id = %trace_id, "no preparation command could be run; is adb on PATH?");
        }

        let run_dir = resolve_run_dir(&config.output_root, &config.label, Local::now());
        if let Err(err) = create_run_dir(&run_dir, trace_id) {
            self.set_status(previous, format!("Failed to start logging: {}", err.error), trace_id);
            return Err(err);
        }

        self.set_status(SessionStatus::Preparing, "Starting logging...".to_string(), trace_id);
        let stop_flag = Arc::new(AtomicBool::new(false));
        let workers = streams
            .iter()
            .map(|&stream| {
                let handle = spawn_worker(
                    WorkerSpec {
                        stream,
                        path: run_dir.join(stream.file_name()),
                        trace_id: trace_id.to_string(),
                    },
                    Arc::clone(&self.bridge),
                    Arc::clone(&stop_flag),
                    Arc::clone(&self.emitter),
                );
                (stream, handle)
            })
            .collect::<BTreeMap<_, _>>();

        self.active = Some(ActiveRun {
            run_dir: run_dir.clone(),
            trace_id: trace_id.to_string(),
            stop_flag,
            workers,
        });
        self.set_status(
            SessionStatus::Running,
            format!("Logging started. Logs are being saved to: {}", run_dir.display()),
            trace_id,
        );

        Ok(RunHandle {
            run_dir,
            streams,
            trace_id: trace_id.to_string(),
        })
    }

    /// Raises the stop flag, asks every live process to terminate, then waits
    /// for each worker up to the join timeout. Returns `None` when no run is
    /// active.
    pub fn stop(&mut self, trace_id: &str) -> Option<StoppedRun> {
        if !self.status.can_stop() {
            return None;
        }
        let run = self.active.take()?;
        self.set_status(SessionStatus::Stopping, "Stopping logging...".to_string(), trace_id);

        run.stop_flag.store(true, Ordering::SeqCst);
        for worker in run.workers.values() {
            worker.request_termination();
        }

        let timeout = self.settings.join_timeout();
        let streams = run
            .workers
            .into_values()
            .map(|worker| {
                let stream = worker.stream;
                let path = worker.path.clone();
                let report = worker.wait(timeout);
                StreamOutcome { stream, path, report }
            })
            .collect::<Vec<_>>();

        self.last_run_dir = Some(run.run_dir.clone());
        self.set_status(SessionStatus::Stopped, "Logging stopped.".to_string(), trace_id);
        info!(
            trace_id = %trace_id,
            run_trace_id = %run.trace_id,
            run_dir = %run.run_dir.display(),
            "capture run stopped"
        );

        Some(StoppedRun {
            run_dir: run.run_dir,
            streams,
            trace_id: run.trace_id,
        })
    }
}

impl Drop for CaptureSession {
    fn drop(&mut self) {
        if self.is_running() {
            let trace_id = Uuid::new_v4().to_string();
            warn!(trace_id = %trace_id, "capture session dropped while running; stopping");
            let _ = self.stop(&trace_id);
        }
    }
}
