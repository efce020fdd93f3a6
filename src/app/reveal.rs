use std::path::Path;
use std::process::{Command, Stdio};

use tracing::info;

use crate::app::error::AppError;

/// Shows a finished run directory to the user.
pub trait RevealInFileBrowser: Send + Sync {
    fn reveal(&self, path: &Path, trace_id: &str) -> Result<(), AppError>;
}

/// Hands the directory to the platform's file manager.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemFileBrowser;

impl SystemFileBrowser {
    pub fn opener_program() -> &'static str {
        if cfg!(target_os = "windows") {
            "explorer"
        } else if cfg!(target_os = "macos") {
            "open"
        } else {
            "xdg-open"
        }
    }
}

impl RevealInFileBrowser for SystemFileBrowser {
    fn reveal(&self, path: &Path, trace_id: &str) -> Result<(), AppError> {
        if !path.is_dir() {
            return Err(AppError::validation(
                format!("Run directory not found: {}", path.display()),
                trace_id,
            ));
        }
        let program = Self::opener_program();
        let mut child = Command::new(program)
            .arg(path)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|err| {
                AppError::dependency(format!("Failed to launch {program}: {err}"), trace_id)
            })?;
        // explorer.exe exits non-zero even on success, so the status is only reaped.
        std::thread::spawn(move || {
            let _ = child.wait();
        });
        info!(trace_id = %trace_id, path = %path.display(), "revealed run directory");
        Ok(())
    }
}
