use std::fs::File;
use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::app::adb::bridge::{DeviceBridge, ProcessControl};
use crate::app::capture::stream::StreamKind;
use crate::app::capture::CaptureEmitter;
use crate::app::models::{CaptureEvent, CaptureEventKind, SessionStatus, WorkerReport};

#[derive(Default)]
struct SlotState {
    control: Option<Box<dyn ProcessControl>>,
    terminated: bool,
}

/// A stream's process handle, shared between its worker and the session.
/// Whoever gets there first issues the single termination request.
#[derive(Clone, Default)]
pub struct ProcessSlot {
    inner: Arc<Mutex<SlotState>>,
}

impl ProcessSlot {
    pub fn install(&self, control: Box<dyn ProcessControl>) {
        if let Ok(mut guard) = self.inner.lock() {
            guard.control = Some(control);
        }
    }

    /// Returns true when this call issued the termination.
    pub fn terminate_if_running(&self) -> bool {
        let mut guard = match self.inner.lock() {
            Ok(guard) => guard,
            Err(_) => return false,
        };
        if guard.terminated {
            return false;
        }
        let Some(control) = guard.control.as_mut() else {
            return false;
        };
        if !control.is_running() {
            return false;
        }
        if let Err(err) = control.terminate() {
            warn!(error = %err, "failed to terminate capture process");
        }
        guard.terminated = true;
        true
    }

    pub fn was_terminated(&self) -> bool {
        self.inner.lock().map(|guard| guard.terminated).unwrap_or(false)
    }

    /// Reaps the process if it is gone or was told to go. A live process that
    /// merely closed its stdout is left alone rather than waited on.
    fn release(&self) {
        if let Ok(mut guard) = self.inner.lock() {
            let terminated = guard.terminated;
            if let Some(control) = guard.control.as_mut() {
                if terminated || !control.is_running() {
                    control.reap();
                }
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CopyOutcome {
    pub lines: u64,
    pub stopped: bool,
}

/// Appends lines from `reader` to `sink` byte for byte until end of input or
/// until `stop_flag` is seen. The flag is checked once per line, after the
/// line has been read; a line read after the flag is set is discarded.
pub fn copy_lines<R, W>(reader: &mut R, sink: &mut W, stop_flag: &AtomicBool) -> io::Result<CopyOutcome>
where
    R: BufRead + ?Sized,
    W: Write + ?Sized,
{
    let mut line = Vec::with_capacity(512);
    let mut lines = 0u64;
    loop {
        line.clear();
        if reader.read_until(b'\n', &mut line)? == 0 {
            return Ok(CopyOutcome { lines, stopped: false });
        }
        if stop_flag.load(Ordering::SeqCst) {
            return Ok(CopyOutcome { lines, stopped: true });
        }
        sink.write_all(&line)?;
        sink.flush()?;
        lines += 1;
    }
}

pub struct WorkerSpec {
    pub stream: StreamKind,
    pub path: PathBuf,
    pub trace_id: String,
}

pub struct WorkerHandle {
    pub stream: StreamKind,
    pub path: PathBuf,
    slot: ProcessSlot,
    abandoned: Arc<AtomicBool>,
    done: Receiver<WorkerReport>,
    thread: Option<JoinHandle<()>>,
}

impl WorkerHandle {
    pub fn request_termination(&self) -> bool {
        self.slot.terminate_if_running()
    }

    /// Waits up to `timeout` for the worker to report. On timeout the thread
    /// is left to finish on its own and anything it reports later carries the
    /// `Stopped` status.
    pub fn wait(mut self, timeout: Duration) -> Option<WorkerReport> {
        match self.done.recv_timeout(timeout) {
            Ok(report) => {
                if let Some(thread) = self.thread.take() {
                    let _ = thread.join();
                }
                Some(report)
            }
            Err(RecvTimeoutError::Timeout) => {
                self.abandoned.store(true, Ordering::SeqCst);
                warn!(stream = %self.stream, "capture worker did not finish before the join timeout");
                None
            }
            Err(RecvTimeoutError::Disconnected) => {
                if let Some(thread) = self.thread.take() {
                    let _ = thread.join();
                }
                None
            }
        }
    }
}

/// Starts one stream worker. The destination file is opened before this
/// returns so it exists as soon as the session is running; an open failure is
/// reported by the worker like any other stream failure.
pub fn spawn_worker(
    spec: WorkerSpec,
    bridge: Arc<dyn DeviceBridge>,
    stop_flag: Arc<AtomicBool>,
    emitter: CaptureEmitter,
) -> WorkerHandle {
    let file = File::create(&spec.path);
    let slot = ProcessSlot::default();
    let (tx, rx) = mpsc::channel();

    let stream = spec.stream;
    let path = spec.path.clone();
    let worker_slot = slot.clone();
    let abandoned = Arc::new(AtomicBool::new(false));
    let signals = RunSignals {
        stop: stop_flag,
        abandoned: Arc::clone(&abandoned),
    };
    let thread = std::thread::spawn(move || {
        let report = run_worker(&spec, file, bridge.as_ref(), &signals, &worker_slot, &emitter);
        let _ = tx.send(report);
    });

    WorkerHandle {
        stream,
        path,
        slot,
        abandoned,
        done: rx,
        thread: Some(thread),
    }
}

struct RunSignals {
    stop: Arc<AtomicBool>,
    // Set once the session stopped waiting for this worker.
    abandoned: Arc<AtomicBool>,
}

impl RunSignals {
    fn stop_requested(&self) -> bool {
        self.stop.load(Ordering::SeqCst)
    }

    fn status(&self) -> SessionStatus {
        if self.abandoned.load(Ordering::SeqCst) {
            SessionStatus::Stopped
        } else if self.stop_requested() {
            SessionStatus::Stopping
        } else {
            SessionStatus::Running
        }
    }
}

fn emit_stream_event(
    emitter: &CaptureEmitter,
    kind: CaptureEventKind,
    signals: &RunSignals,
    stream: StreamKind,
    message: String,
    trace_id: &str,
) {
    (emitter)(CaptureEvent {
        kind,
        status: signals.status(),
        stream: Some(stream),
        message,
        trace_id: trace_id.to_string(),
    });
}

fn fail(
    spec: &WorkerSpec,
    emitter: &CaptureEmitter,
    signals: &RunSignals,
    mut report: WorkerReport,
    message: String,
) -> WorkerReport {
    warn!(trace_id = %spec.trace_id, stream = %spec.stream, error = %message, "capture stream failed");
    emit_stream_event(
        emitter,
        CaptureEventKind::StreamFailed,
        signals,
        spec.stream,
        format!("{} failed: {message}", spec.stream.short_name()),
        &spec.trace_id,
    );
    report.error = Some(message);
    report
}

fn spawn_stderr_reader(
    mut stderr: Box<dyn BufRead + Send>,
    stream: StreamKind,
    trace_id: String,
) -> Arc<Mutex<Option<String>>> {
    let last = Arc::new(Mutex::new(None));
    let last_writer = Arc::clone(&last);
    std::thread::spawn(move || {
        let mut line = Vec::new();
        loop {
            line.clear();
            match stderr.read_until(b'\n', &mut line) {
                Ok(0) | Err(_) => break,
                Ok(_) => {
                    let text = String::from_utf8_lossy(&line);
                    let trimmed = text.trim();
                    if trimmed.is_empty() {
                        continue;
                    }
                    debug!(trace_id = %trace_id, stream = %stream, stderr = %trimmed, "capture stderr");
                    if let Ok(mut guard) = last_writer.lock() {
                        *guard = Some(trimmed.to_string());
                    }
                }
            }
        }
    });
    last
}

fn run_worker(
    spec: &WorkerSpec,
    file: io::Result<File>,
    bridge: &dyn DeviceBridge,
    signals: &RunSignals,
    slot: &ProcessSlot,
    emitter: &CaptureEmitter,
) -> WorkerReport {
    let report = WorkerReport::default();
    let mut file = match file {
        Ok(file) => file,
        Err(err) => {
            let message = format!("cannot open {}: {err}", display_name(&spec.path));
            return fail(spec, emitter, signals, report, message);
        }
    };

    let process = match bridge.spawn_stream(&spec.stream.adb_args(), &spec.trace_id) {
        Ok(process) => process,
        Err(err) => return fail(spec, emitter, signals, report, err.error),
    };
    let mut stdout = process.stdout;
    slot.install(process.control);
    // stop() may have run between spawn and install and found the slot empty.
    if signals.stop_requested() {
        slot.terminate_if_running();
    }
    let last_stderr = process
        .stderr
        .map(|stderr| spawn_stderr_reader(stderr, spec.stream, spec.trace_id.clone()));

    info!(trace_id = %spec.trace_id, stream = %spec.stream, path = %spec.path.display(), "capture stream started");
    let outcome = copy_lines(stdout.as_mut(), &mut file, &signals.stop);

    if signals.stop_requested() {
        slot.terminate_if_running();
    }
    slot.release();

    let mut report = WorkerReport {
        terminated: slot.was_terminated(),
        last_stderr: last_stderr.and_then(|last| {
            let guard = last.lock().ok()?;
            guard.clone()
        }),
        ..report
    };

    match outcome {
        Ok(outcome) => {
            report.lines_written = outcome.lines;
            info!(
                trace_id = %spec.trace_id,
                stream = %spec.stream,
                lines = outcome.lines,
                stopped = outcome.stopped,
                "capture stream finished"
            );
            if !signals.stop_requested() {
                let mut message = format!(
                    "{} ended after {} lines",
                    spec.stream.short_name(),
                    outcome.lines
                );
                if let Some(stderr) = &report.last_stderr {
                    message.push_str(&format!(": {stderr}"));
                }
                emit_stream_event(
                    emitter,
                    CaptureEventKind::StreamEnded,
                    signals,
                    spec.stream,
                    message,
                    &spec.trace_id,
                );
            }
            report
        }
        Err(err) => {
            let message = format!("copy into {} failed: {err}", display_name(&spec.path));
            fail(spec, emitter, signals, report, message)
        }
    }
}

fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().to_string())
        .unwrap_or_else(|| path.display().to_string())
}
