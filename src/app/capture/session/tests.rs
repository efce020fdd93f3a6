use super::*;

use std::io::{self, BufRead, Read};
use std::sync::atomic::AtomicUsize;
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use tempfile::TempDir;

use crate::app::adb::bridge::{ProcessControl, StreamProcess};
use crate::app::adb::runner::CommandOutput;

/// Blocks like a pipe until its sender side goes away.
struct PipeReader {
    rx: Receiver<Vec<u8>>,
    buf: Vec<u8>,
    pos: usize,
}

impl Read for PipeReader {
    fn read(&mut self, out: &mut [u8]) -> io::Result<usize> {
        let available = self.fill_buf()?;
        let count = available.len().min(out.len());
        out[..count].copy_from_slice(&available[..count]);
        self.consume(count);
        Ok(count)
    }
}

impl BufRead for PipeReader {
    fn fill_buf(&mut self) -> io::Result<&[u8]> {
        if self.pos >= self.buf.len() {
            match self.rx.recv() {
                Ok(chunk) => {
                    self.buf = chunk;
                    self.pos = 0;
                }
                Err(_) => return Ok(&[]),
            }
        }
        Ok(&self.buf[self.pos..])
    }

    fn consume(&mut self, amount: usize) {
        self.pos += amount;
    }
}

struct PipeControl {
    tx: Option<Sender<Vec<u8>>>,
    terminations: Arc<AtomicUsize>,
}

impl ProcessControl for PipeControl {
    fn is_running(&mut self) -> bool {
        self.tx.is_some()
    }

    fn terminate(&mut self) -> io::Result<()> {
        self.terminations.fetch_add(1, Ordering::SeqCst);
        self.tx = None;
        Ok(())
    }

    fn reap(&mut self) {}
}

/// Pretends to be a device: preparation commands are recorded, every stream
/// prints one line and then stays silent until terminated.
#[derive(Default)]
struct FakeDevice {
    runs: Mutex<Vec<String>>,
    spawns: Mutex<Vec<String>>,
    terminations: Arc<AtomicUsize>,
    fail_prepare: bool,
}

impl DeviceBridge for FakeDevice {
    fn run(&self, args: &[String], _timeout: Duration, trace_id: &str) -> Result<CommandOutput, AppError> {
        self.runs.lock().expect("runs").push(args.join(" "));
        if self.fail_prepare {
            return Err(AppError::dependency("Failed to spawn adb: not found", trace_id));
        }
        Ok(CommandOutput {
            stdout: String::new(),
            stderr: String::new(),
            exit_code: Some(0),
        })
    }

    fn spawn_stream(&self, args: &[String], _trace_id: &str) -> Result<StreamProcess, AppError> {
        let line = args.join(" ");
        self.spawns.lock().expect("spawns").push(line.clone());
        let (tx, rx) = mpsc::channel();
        let _ = tx.send(format!("{line}: first line\n").into_bytes());
        Ok(StreamProcess {
            stdout: Box::new(PipeReader {
                rx,
                buf: Vec::new(),
                pos: 0,
            }),
            stderr: None,
            control: Box::new(PipeControl {
                tx: Some(tx),
                terminations: Arc::clone(&self.terminations),
            }),
        })
    }
}

fn session_with(device: Arc<FakeDevice>) -> (CaptureSession, Arc<Mutex<Vec<CaptureEvent>>>) {
    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&events);
    let emitter: CaptureEmitter = Arc::new(move |event: CaptureEvent| {
        sink.lock().expect("events").push(event);
    });
    (CaptureSession::new(device, SessionSettings::default(), emitter), events)
}

fn dir_entries(path: &Path) -> Vec<String> {
    let mut names = std::fs::read_dir(path)
        .expect("read dir")
        .map(|entry| entry.expect("entry").file_name().to_string_lossy().to_string())
        .collect::<Vec<_>>();
    names.sort();
    names
}

fn wait_until(timeout: Duration, mut check: impl FnMut() -> bool) -> bool {
    let start = Instant::now();
    while start.elapsed() < timeout {
        if check() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(20));
    }
    check()
}

#[test]
fn start_without_streams_is_a_config_error() {
    let root = TempDir::new().expect("tmp");
    let device = Arc::new(FakeDevice::default());
    let (mut session, _events) = session_with(Arc::clone(&device));

    let config = SessionConfig::new(root.path()).with_streams(Vec::new());
    let err = session.start(&config, "trace-empty").expect_err("expected config error");

    assert!(err.is_validation());
    assert_eq!(err.trace_id, "trace-empty");
    assert_eq!(session.status(), SessionStatus::Idle);
    assert!(dir_entries(root.path()).is_empty());
    assert!(device.runs.lock().expect("runs").is_empty());
}

#[test]
fn start_with_missing_root_is_a_config_error() {
    let root = TempDir::new().expect("tmp");
    let missing = root.path().join("does-not-exist");
    let (mut session, events) = session_with(Arc::new(FakeDevice::default()));

    let err = session
        .start(&SessionConfig::new(&missing), "trace-missing")
        .expect_err("expected config error");

    assert!(err.error.contains("does not exist"));
    assert!(!missing.exists());
    assert_eq!(session.status(), SessionStatus::Idle);
    assert!(events.lock().expect("events").is_empty());
}

#[test]
fn label_names_the_run_directory() {
    let root = TempDir::new().expect("tmp");
    let (mut session, _events) = session_with(Arc::new(FakeDevice::default()));

    let handle = session
        .start(&SessionConfig::new(root.path()).with_label("iter1"), "trace-label")
        .expect("start");
    assert_eq!(handle.run_dir, root.path().join("logs_iter1"));
    session.stop("trace-label");
}

#[test]
fn empty_label_uses_timestamp() {
    let root = TempDir::new().expect("tmp");
    let (mut session, _events) = session_with(Arc::new(FakeDevice::default()));

    let handle = session
        .start(&SessionConfig::new(root.path()), "trace-ts")
        .expect("start");
    let name = handle
        .run_dir
        .file_name()
        .expect("basename")
        .to_string_lossy()
        .to_string();
    session.stop("trace-ts");

    let stamp = name.strip_prefix("logs_").expect("prefix");
    let digits = stamp.chars().filter(|c| c.is_ascii_digit()).count();
    assert_eq!(digits, 14, "unexpected run dir name {name}");
    assert_eq!(stamp.len(), 15);
}

#[test]
fn only_enabled_streams_get_files() {
    let root = TempDir::new().expect("tmp");
    let device = Arc::new(FakeDevice::default());
    let (mut session, _events) = session_with(Arc::clone(&device));

    let config = SessionConfig::new(root.path())
        .with_label("subset")
        .with_streams([StreamKind::SystemLog, StreamKind::KernelLog]);
    let handle = session.start(&config, "trace-subset").expect("start");

    assert_eq!(handle.streams, [StreamKind::KernelLog, StreamKind::SystemLog]);
    assert_eq!(dir_entries(&handle.run_dir), ["dmesg.txt", "logcat.txt"]);
    session.stop("trace-subset");
    assert_eq!(dir_entries(&handle.run_dir), ["dmesg.txt", "logcat.txt"]);

    let spawns = device.spawns.lock().expect("spawns").clone();
    assert_eq!(spawns.len(), 2);
    assert!(spawns.contains(&"shell dmesg -w".to_string()));
    assert!(spawns.contains(&"logcat".to_string()));
}

#[test]
fn stop_without_start_and_twice_is_a_noop() {
    let root = TempDir::new().expect("tmp");
    let (mut session, _events) = session_with(Arc::new(FakeDevice::default()));

    let start = Instant::now();
    assert!(session.stop("trace-noop").is_none());
    assert_eq!(session.status(), SessionStatus::Idle);
    assert!(!session.is_running());

    session
        .start(&SessionConfig::new(root.path()).with_label("twice"), "trace-twice")
        .expect("start");
    assert!(session.is_running());
    assert!(session.stop("trace-twice").is_some());
    assert!(!session.is_running());
    assert!(session.stop("trace-twice").is_none());
    assert_eq!(session.status(), SessionStatus::Stopped);
    assert!(start.elapsed() < Duration::from_secs(5));
}

#[test]
fn start_while_running_is_rejected() {
    let root = TempDir::new().expect("tmp");
    let (mut session, _events) = session_with(Arc::new(FakeDevice::default()));
    let config = SessionConfig::new(root.path()).with_label("busy");

    session.start(&config, "trace-busy").expect("start");
    let err = session.start(&config, "trace-busy").expect_err("already running");
    assert!(err.error.contains("already running"));
    assert_eq!(session.status(), SessionStatus::Running);
    session.stop("trace-busy");
}

#[test]
fn preparation_failures_do_not_block_capture() {
    let root = TempDir::new().expect("tmp");
    let device = Arc::new(FakeDevice {
        fail_prepare: true,
        ..FakeDevice::default()
    });
    let (mut session, _events) = session_with(Arc::clone(&device));

    let handle = session
        .start(&SessionConfig::new(root.path()).with_label("unrooted"), "trace-prep")
        .expect("start");
    assert_eq!(device.runs.lock().expect("runs").len(), 5);
    assert_eq!(session.status(), SessionStatus::Running);
    assert_eq!(handle.streams.len(), 3);
    session.stop("trace-prep");
}

#[test]
fn full_session_round_trip() {
    let root = TempDir::new().expect("tmp");
    let device = Arc::new(FakeDevice::default());
    let (mut session, events) = session_with(Arc::clone(&device));

    let handle = session
        .start(&SessionConfig::new(root.path()).with_label("iter1"), "trace-e2e")
        .expect("start");
    let run_dir = root.path().join("logs_iter1");
    assert_eq!(handle.run_dir, run_dir);
    assert!(run_dir.is_dir());
    assert_eq!(session.snapshot().streams.len(), 3);

    let files = StreamKind::ALL.map(|stream| run_dir.join(stream.file_name()));
    assert!(wait_until(Duration::from_secs(5), || {
        files
            .iter()
            .all(|path| std::fs::metadata(path).map(|m| m.len() > 0).unwrap_or(false))
    }));

    let stopped = session.stop("trace-e2e").expect("stopped run");
    assert_eq!(stopped.run_dir, run_dir);
    assert_eq!(stopped.trace_id, "trace-e2e");
    assert_eq!(session.run_dir(), Some(run_dir.as_path()));
    assert_eq!(device.terminations.load(Ordering::SeqCst), 3);
    for outcome in &stopped.streams {
        let report = outcome.report.as_ref().expect("worker finished in time");
        assert_eq!(report.lines_written, 1);
        assert!(report.terminated);
        assert!(report.error.is_none());
    }

    let logcat = std::fs::read_to_string(run_dir.join("logcat.txt")).expect("logcat");
    assert_eq!(logcat, "logcat: first line\n");

    let statuses = events
        .lock()
        .expect("events")
        .iter()
        .filter(|event| event.kind == CaptureEventKind::Status)
        .map(|event| event.status)
        .collect::<Vec<_>>();
    assert_eq!(
        statuses,
        [
            SessionStatus::Preparing,
            SessionStatus::Preparing,
            SessionStatus::Running,
            SessionStatus::Stopping,
            SessionStatus::Stopped,
        ]
    );

    session
        .start(&SessionConfig::new(root.path()).with_label("iter2"), "trace-e2e-2")
        .expect("restart after stop");
    assert_eq!(session.status(), SessionStatus::Running);
    session.stop("trace-e2e-2");
}

#[test]
fn dropping_a_running_session_terminates_processes() {
    let root = TempDir::new().expect("tmp");
    let device = Arc::new(FakeDevice::default());
    let (mut session, _events) = session_with(Arc::clone(&device));

    session
        .start(
            &SessionConfig::new(root.path())
                .with_label("dropped")
                .with_streams([StreamKind::SystemLog]),
            "trace-drop",
        )
        .expect("start");
    drop(session);
    assert_eq!(device.terminations.load(Ordering::SeqCst), 1);
}

/// Streams that ignore termination: stdout stays open until the test lets go
/// of the held senders.
#[derive(Default)]
struct StubbornDevice {
    held: Mutex<Vec<Sender<Vec<u8>>>>,
    terminations: Arc<AtomicUsize>,
}

struct StubbornControl {
    terminations: Arc<AtomicUsize>,
}

impl ProcessControl for StubbornControl {
    fn is_running(&mut self) -> bool {
        true
    }

    fn terminate(&mut self) -> io::Result<()> {
        self.terminations.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn reap(&mut self) {}
}

impl DeviceBridge for StubbornDevice {
    fn run(&self, _args: &[String], _timeout: Duration, _trace_id: &str) -> Result<CommandOutput, AppError> {
        Ok(CommandOutput {
            stdout: String::new(),
            stderr: String::new(),
            exit_code: Some(0),
        })
    }

    fn spawn_stream(&self, _args: &[String], _trace_id: &str) -> Result<StreamProcess, AppError> {
        let (tx, rx) = mpsc::channel();
        self.held.lock().expect("held").push(tx);
        Ok(StreamProcess {
            stdout: Box::new(PipeReader {
                rx,
                buf: Vec::new(),
                pos: 0,
            }),
            stderr: None,
            control: Box::new(StubbornControl {
                terminations: Arc::clone(&self.terminations),
            }),
        })
    }
}

#[test]
fn stop_gives_up_on_workers_after_join_timeout() {
    let root = TempDir::new().expect("tmp");
    let device = Arc::new(StubbornDevice::default());
    let settings = SessionSettings {
        join_timeout_ms: 300,
        ..SessionSettings::default()
    };
    let emitter: CaptureEmitter = Arc::new(|_event: CaptureEvent| {});
    let mut session = CaptureSession::new(device.clone(), settings, emitter);

    session
        .start(&SessionConfig::new(root.path()).with_label("stuck"), "trace-stuck")
        .expect("start");
    assert!(wait_until(Duration::from_secs(5), || {
        device.held.lock().expect("held").len() == 3
    }));

    let start = Instant::now();
    let stopped = session.stop("trace-stuck").expect("stopped run");
    let elapsed = start.elapsed();

    assert!(elapsed >= Duration::from_millis(900), "stop returned after {elapsed:?}");
    assert!(elapsed < Duration::from_secs(3), "stop returned after {elapsed:?}");
    assert_eq!(stopped.streams.len(), 3);
    assert!(stopped.streams.iter().all(|outcome| outcome.report.is_none()));
    assert_eq!(device.terminations.load(Ordering::SeqCst), 3);
    assert_eq!(session.status(), SessionStatus::Stopped);
    assert_eq!(stopped.run_dir, root.path().join("logs_stuck"));

    device.held.lock().expect("held").clear();
}

#[cfg(unix)]
mod with_fake_adb {
    use super::*;
    use crate::app::adb::bridge::AdbBridge;
    use std::os::unix::fs::PermissionsExt;

    const FAKE_ADB: &str = r#"#!/bin/sh
if [ "$1" = "-s" ]; then shift 2; fi
case "$1" in
  root|remount) exit 0 ;;
  logcat) if [ $# -gt 1 ]; then exit 0; fi ;;
  shell) if [ "$2" = "mount" ]; then echo "mount: permission denied" >&2; exit 1; fi ;;
esac
echo "fake $1 $2"
exec sleep 30
"#;

    fn install_fake_adb(dir: &Path) -> PathBuf {
        let path = dir.join("adb");
        std::fs::write(&path, FAKE_ADB).expect("write fake adb");
        let mut perms = std::fs::metadata(&path).expect("meta").permissions();
        perms.set_mode(0o755);
        std::fs::set_permissions(&path, perms).expect("chmod");
        // A fork in a parallel test can briefly hold the write handle open.
        for _ in 0..20 {
            if std::process::Command::new(&path).arg("root").status().is_ok() {
                break;
            }
            std::thread::sleep(Duration::from_millis(50));
        }
        path
    }

    #[test]
    fn captures_from_real_processes_and_stops_them() {
        let tools = TempDir::new().expect("tools");
        let root = TempDir::new().expect("root");
        let adb = install_fake_adb(tools.path());
        let bridge = Arc::new(AdbBridge::new(
            adb.to_string_lossy().to_string(),
            Some("emulator-5554".to_string()),
        ));
        let emitter: CaptureEmitter = Arc::new(|_event: CaptureEvent| {});
        let mut session = CaptureSession::new(bridge, SessionSettings::default(), emitter);

        let handle = session
            .start(&SessionConfig::new(root.path()).with_label("iter1"), "trace-fake-adb")
            .expect("start");

        let dmesg = handle.run_dir.join("dmesg.txt");
        let logcat = handle.run_dir.join("logcat.txt");
        let xlog = handle.run_dir.join("xlog_out.txt");
        assert!(wait_until(Duration::from_secs(5), || {
            [&dmesg, &logcat, &xlog]
                .iter()
                .all(|path| std::fs::metadata(path).map(|m| m.len() > 0).unwrap_or(false))
        }));

        let start = Instant::now();
        let stopped = session.stop("trace-fake-adb").expect("stopped");
        assert!(start.elapsed() < Duration::from_secs(7));
        assert_eq!(stopped.run_dir, root.path().join("logs_iter1"));
        assert_eq!(std::fs::read_to_string(&dmesg).expect("dmesg"), "fake shell dmesg\n");
        assert_eq!(std::fs::read_to_string(&logcat).expect("logcat"), "fake logcat \n");
        assert!(stopped
            .streams
            .iter()
            .all(|outcome| outcome.report.as_ref().map(|r| r.terminated).unwrap_or(false)));
    }
}
