use std::path::{Path, PathBuf};

use tauri::{AppHandle, State};
use tauri_plugin_opener::OpenerExt;
use tracing::{info, warn};
use uuid::Uuid;

use crate::app::adb::locator::normalize_command_path;
use crate::app::adb::runner;
use crate::app::capture::session::SessionConfig;
use crate::app::config::CaptureSettings;
use crate::app::error::AppError;
use crate::app::models::{
    AboutInfo, AdbInfo, CommandResponse, RunHandle, SessionSnapshot, StoppedRun,
};
use crate::app::reveal::RevealInFileBrowser;
use crate::app::state::AppState;

pub const CAPTURE_EVENT_NAME: &str = "capture-event";

fn resolve_trace_id(input: Option<String>) -> String {
    input
        .filter(|value| !value.trim().is_empty())
        .unwrap_or_else(|| Uuid::new_v4().to_string())
}

/// Opens folders through the opener plugin so the desktop shell honours the
/// user's default file manager.
pub struct OpenerFileBrowser {
    app: AppHandle,
}

impl OpenerFileBrowser {
    pub fn new(app: AppHandle) -> Self {
        Self { app }
    }
}

impl RevealInFileBrowser for OpenerFileBrowser {
    fn reveal(&self, path: &Path, trace_id: &str) -> Result<(), AppError> {
        if !path.is_dir() {
            return Err(AppError::validation(
                format!("Run directory not found: {}", path.display()),
                trace_id,
            ));
        }
        self.app
            .opener()
            .open_path(path.to_string_lossy().to_string(), None::<&str>)
            .map_err(|err| AppError::dependency(format!("Failed to open folder: {err}"), trace_id))
    }
}

#[tauri::command(async)]
pub fn get_settings(
    state: State<'_, AppState>,
    trace_id: Option<String>,
) -> Result<CommandResponse<CaptureSettings>, AppError> {
    let trace_id = resolve_trace_id(trace_id);
    Ok(CommandResponse {
        trace_id,
        data: state.settings.clone(),
    })
}

#[tauri::command(async)]
pub fn default_output_dir(trace_id: Option<String>) -> Result<CommandResponse<String>, AppError> {
    let trace_id = resolve_trace_id(trace_id);
    let dir = std::env::current_dir()
        .map_err(|err| AppError::system(format!("Failed to read working directory: {err}"), &trace_id))?;
    Ok(CommandResponse {
        trace_id,
        data: dir.to_string_lossy().to_string(),
    })
}

#[tauri::command(async)]
pub fn check_adb(
    command_path: Option<String>,
    state: State<'_, AppState>,
    trace_id: Option<String>,
) -> Result<CommandResponse<AdbInfo>, AppError> {
    let trace_id = resolve_trace_id(trace_id);
    info!(trace_id = %trace_id, "check_adb");
    let program = command_path
        .as_deref()
        .map(normalize_command_path)
        .filter(|value| !value.is_empty())
        .unwrap_or_else(|| state.bridge.program().to_string());
    Ok(CommandResponse {
        data: runner::check_adb(&program, &trace_id),
        trace_id,
    })
}

#[tauri::command(async)]
pub fn start_capture(
    config: SessionConfig,
    state: State<'_, AppState>,
    trace_id: Option<String>,
) -> Result<CommandResponse<RunHandle>, AppError> {
    let trace_id = resolve_trace_id(trace_id);
    info!(trace_id = %trace_id, output_root = %config.output_root.display(), "start_capture");
    let handle = state.session(&trace_id)?.start(&config, &trace_id)?;
    Ok(CommandResponse {
        trace_id,
        data: handle,
    })
}

#[tauri::command(async)]
pub fn stop_capture(
    reveal: Option<bool>,
    app: AppHandle,
    state: State<'_, AppState>,
    trace_id: Option<String>,
) -> Result<CommandResponse<Option<StoppedRun>>, AppError> {
    let trace_id = resolve_trace_id(trace_id);
    info!(trace_id = %trace_id, "stop_capture");
    let stopped = state.session(&trace_id)?.stop(&trace_id);
    if let Some(run) = stopped.as_ref().filter(|_| reveal.unwrap_or(true)) {
        if let Err(err) = OpenerFileBrowser::new(app).reveal(&run.run_dir, &trace_id) {
            warn!(trace_id = %trace_id, error = %err, "failed to reveal run directory");
        }
    }
    Ok(CommandResponse {
        trace_id,
        data: stopped,
    })
}

#[tauri::command(async)]
pub fn capture_status(
    state: State<'_, AppState>,
    trace_id: Option<String>,
) -> Result<CommandResponse<SessionSnapshot>, AppError> {
    let trace_id = resolve_trace_id(trace_id);
    let snapshot = state.session(&trace_id)?.snapshot();
    Ok(CommandResponse {
        trace_id,
        data: snapshot,
    })
}

#[tauri::command(async)]
pub fn reveal_run_directory(
    app: AppHandle,
    state: State<'_, AppState>,
    trace_id: Option<String>,
) -> Result<CommandResponse<String>, AppError> {
    let trace_id = resolve_trace_id(trace_id);
    let run_dir: PathBuf = state
        .session(&trace_id)?
        .run_dir()
        .map(Path::to_path_buf)
        .ok_or_else(|| AppError::validation("No run directory yet", &trace_id))?;
    OpenerFileBrowser::new(app).reveal(&run_dir, &trace_id)?;
    Ok(CommandResponse {
        trace_id,
        data: run_dir.to_string_lossy().to_string(),
    })
}

#[tauri::command(async)]
pub fn about(trace_id: Option<String>) -> Result<CommandResponse<AboutInfo>, AppError> {
    Ok(CommandResponse {
        trace_id: resolve_trace_id(trace_id),
        data: AboutInfo::current(),
    })
}
