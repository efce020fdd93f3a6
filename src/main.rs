use std::io::BufRead;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use adb_log_capture_lib::app::adb::locator::normalize_command_path;
use adb_log_capture_lib::app::adb::runner::check_adb;
use adb_log_capture_lib::app::capture::session::SessionConfig;
use adb_log_capture_lib::app::capture::stream::{parse_stream_list, StreamKind};
use adb_log_capture_lib::app::capture::CaptureEmitter;
use adb_log_capture_lib::app::config::CaptureSettings;
use adb_log_capture_lib::app::logging::init_logging;
use adb_log_capture_lib::app::models::{AboutInfo, CaptureEvent, StoppedRun};
use adb_log_capture_lib::app::reveal::{RevealInFileBrowser, SystemFileBrowser};
use adb_log_capture_lib::app::state::AppState;
use serde::Serialize;
use uuid::Uuid;

const USAGE: &str = "\
usage: adb-log-capture [options]

  --out DIR          output root (default: current directory)
  --label NAME       iteration name; the run goes to DIR/logs_NAME
  --streams LIST     comma separated: dmesg,xlog,logcat (default: all)
  --adb PATH         adb executable (default: adb on PATH)
  --serial SERIAL    target device (default: ANDROID_SERIAL)
  --duration SECS    stop after SECS instead of waiting for Enter
  --no-reveal        do not open the run directory after stopping
  --json             print a JSON summary on stdout
  --check            only check that adb is usable
  --about            print version information
";

#[derive(Debug, Clone, PartialEq)]
struct Args {
    out_dir: Option<PathBuf>,
    label: String,
    streams: Vec<StreamKind>,
    adb: Option<String>,
    serial: Option<String>,
    duration: Option<Duration>,
    reveal: bool,
    json: bool,
    check: bool,
    about: bool,
}

impl Default for Args {
    fn default() -> Self {
        Self {
            out_dir: None,
            label: String::new(),
            streams: StreamKind::ALL.to_vec(),
            adb: None,
            serial: None,
            duration: None,
            reveal: true,
            json: false,
            check: false,
            about: false,
        }
    }
}

#[derive(Serialize)]
struct RunSummary<'a> {
    tool: &'static str,
    status: &'static str,
    trace_id: &'a str,
    adb_program: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    run: Option<&'a StoppedRun>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

fn parse_args(raw: impl IntoIterator<Item = String>) -> Result<Args, String> {
    let mut args = Args::default();
    let mut it = raw.into_iter();
    while let Some(arg) = it.next() {
        let mut value = |flag: &str| {
            it.next()
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
                .ok_or_else(|| format!("{flag} requires a value"))
        };
        match arg.as_str() {
            "--out" => args.out_dir = Some(PathBuf::from(value("--out")?)),
            "--label" => args.label = value("--label")?,
            "--streams" => args.streams = parse_stream_list(&value("--streams")?)?,
            "--adb" => args.adb = Some(normalize_command_path(&value("--adb")?)),
            "--serial" => args.serial = Some(value("--serial")?),
            "--duration" => {
                let raw = value("--duration")?;
                let secs = raw
                    .parse::<u64>()
                    .map_err(|_| format!("--duration expects whole seconds, got '{raw}'"))?;
                args.duration = Some(Duration::from_secs(secs));
            }
            "--no-reveal" => args.reveal = false,
            "--json" => args.json = true,
            "--check" => args.check = true,
            "--about" => args.about = true,
            "-h" | "--help" => return Err(USAGE.to_string()),
            other => return Err(format!("unknown argument: {other}\n\n{USAGE}")),
        }
    }
    Ok(args)
}

/// Blocks until `duration` elapses or a line arrives on `input`. Without a
/// duration, input that is already closed is an error rather than an
/// immediate stop.
fn wait_for_stop(duration: Option<Duration>, input: &mut impl BufRead) -> Result<(), String> {
    if let Some(duration) = duration {
        std::thread::sleep(duration);
        return Ok(());
    }
    eprintln!("Press Enter to stop logging.");
    let mut line = String::new();
    match input.read_line(&mut line) {
        Ok(0) => Err("stdin is closed; pass --duration SECS to capture without a terminal".to_string()),
        Ok(_) => Ok(()),
        Err(err) => Err(format!(
            "cannot read stdin ({err}); pass --duration SECS to capture without a terminal"
        )),
    }
}

fn print_summary(summary: &RunSummary<'_>, json: bool) {
    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(summary).unwrap_or_else(|_| "{}".to_string())
        );
        return;
    }
    if let Some(error) = &summary.error {
        eprintln!("error: {error}");
    }
    if let Some(run) = summary.run {
        println!("run: {}", run.run_dir.display());
        for outcome in &run.streams {
            match &outcome.report {
                Some(report) => println!(
                    "  {:<7} {:>8} lines{}",
                    outcome.stream.short_name(),
                    report.lines_written,
                    report
                        .error
                        .as_ref()
                        .map(|e| format!("  ({e})"))
                        .unwrap_or_default()
                ),
                None => println!("  {:<7} still running at stop", outcome.stream.short_name()),
            }
        }
    }
}

fn main() {
    let args = match parse_args(std::env::args().skip(1)) {
        Ok(v) => v,
        Err(msg) => {
            eprintln!("{msg}");
            std::process::exit(2);
        }
    };

    if args.about {
        let about = AboutInfo::current();
        println!("{} {}\n{}", about.name, about.version, about.description);
        return;
    }

    init_logging();
    let trace_id = Uuid::new_v4().to_string();

    let mut settings = CaptureSettings::from_env();
    if let Some(adb) = &args.adb {
        settings.adb.command_path = adb.clone();
    }
    if let Some(serial) = &args.serial {
        settings.adb.serial = Some(serial.clone());
    }

    let emitter: CaptureEmitter = Arc::new(|event: CaptureEvent| {
        eprintln!("Status: {}", event.message);
    });
    let state = AppState::new(settings, emitter);
    let adb_program = state.bridge.program().to_string();

    if args.check {
        let info = check_adb(&adb_program, &trace_id);
        if args.json {
            println!(
                "{}",
                serde_json::to_string_pretty(&info).unwrap_or_else(|_| "{}".to_string())
            );
        } else if info.available {
            println!("{}", info.version_output);
        } else {
            eprintln!("adb unavailable: {}", info.error.clone().unwrap_or_default());
        }
        std::process::exit(if info.available { 0 } else { 1 });
    }

    let output_root = match args.out_dir.clone().map(Ok).unwrap_or_else(std::env::current_dir) {
        Ok(dir) => dir,
        Err(err) => {
            eprintln!("Failed to read working directory: {err}");
            std::process::exit(1);
        }
    };
    let config = SessionConfig::new(output_root)
        .with_label(args.label.clone())
        .with_streams(args.streams.clone());

    let mut session = match state.session(&trace_id) {
        Ok(session) => session,
        Err(err) => {
            eprintln!("{err}");
            std::process::exit(1);
        }
    };

    if let Err(err) = session.start(&config, &trace_id) {
        let summary = RunSummary {
            tool: "adb_log_capture",
            status: "fail",
            trace_id: &trace_id,
            adb_program: &adb_program,
            run: None,
            error: Some(err.to_string()),
        };
        print_summary(&summary, args.json);
        std::process::exit(if err.is_validation() { 2 } else { 1 });
    }

    let waited = wait_for_stop(args.duration, &mut std::io::stdin().lock());

    let stopped = session.stop(&trace_id);
    drop(session);
    if let Err(msg) = waited {
        let summary = RunSummary {
            tool: "adb_log_capture",
            status: "fail",
            trace_id: &trace_id,
            adb_program: &adb_program,
            run: stopped.as_ref(),
            error: Some(msg),
        };
        print_summary(&summary, args.json);
        std::process::exit(2);
    }
    if let (Some(run), true) = (stopped.as_ref(), args.reveal) {
        if let Err(err) = SystemFileBrowser.reveal(&run.run_dir, &trace_id) {
            eprintln!("Could not open {}: {}", run.run_dir.display(), err.error);
        }
    }

    let summary = RunSummary {
        tool: "adb_log_capture",
        status: "pass",
        trace_id: &trace_id,
        adb_program: &adb_program,
        run: stopped.as_ref(),
        error: None,
    };
    print_summary(&summary, args.json);
}
