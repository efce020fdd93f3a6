use std::io::{self, BufRead, BufReader};
use std::process::{Child, Command, Stdio};
use std::time::Duration;

use crate::app::adb::locator::resolve_adb_program;
use crate::app::adb::runner::{hide_console_window, run_command_with_timeout, CommandOutput};
use crate::app::config::AdbSettings;
use crate::app::error::AppError;

/// Control side of a streaming process. The output pipes are handed out
/// separately so a reader can block on them without holding this handle.
pub trait ProcessControl: Send {
    fn is_running(&mut self) -> bool;
    fn terminate(&mut self) -> io::Result<()>;
    /// Collects the exit status so no zombie is left behind.
    fn reap(&mut self);
}

impl ProcessControl for Child {
    fn is_running(&mut self) -> bool {
        matches!(self.try_wait(), Ok(None))
    }

    fn terminate(&mut self) -> io::Result<()> {
        self.kill()
    }

    fn reap(&mut self) {
        let _ = self.wait();
    }
}

pub struct StreamProcess {
    pub stdout: Box<dyn BufRead + Send>,
    pub stderr: Option<Box<dyn BufRead + Send>>,
    pub control: Box<dyn ProcessControl>,
}

/// The external device tool as seen by a capture session.
pub trait DeviceBridge: Send + Sync {
    /// Runs a short command to completion.
    fn run(&self, args: &[String], timeout: Duration, trace_id: &str)
        -> Result<CommandOutput, AppError>;

    /// Launches a long-running command with its output piped back.
    fn spawn_stream(&self, args: &[String], trace_id: &str) -> Result<StreamProcess, AppError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdbBridge {
    program: String,
    serial: Option<String>,
}

impl AdbBridge {
    pub fn new(program: impl Into<String>, serial: Option<String>) -> Self {
        Self {
            program: program.into(),
            serial: serial.filter(|value| !value.trim().is_empty()),
        }
    }

    pub fn from_settings(settings: &AdbSettings) -> Self {
        Self::new(resolve_adb_program(&settings.command_path), settings.serial.clone())
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    fn full_args(&self, args: &[String]) -> Vec<String> {
        let mut full = Vec::with_capacity(args.len() + 2);
        if let Some(serial) = &self.serial {
            full.push("-s".to_string());
            full.push(serial.clone());
        }
        full.extend(args.iter().cloned());
        full
    }
}

impl DeviceBridge for AdbBridge {
    fn run(
        &self,
        args: &[String],
        timeout: Duration,
        trace_id: &str,
    ) -> Result<CommandOutput, AppError> {
        run_command_with_timeout(&self.program, &self.full_args(args), timeout, trace_id)
    }

    fn spawn_stream(&self, args: &[String], trace_id: &str) -> Result<StreamProcess, AppError> {
        let mut cmd = Command::new(&self.program);
        cmd.args(self.full_args(args))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        let mut child = hide_console_window(&mut cmd).spawn().map_err(|err| {
            AppError::dependency(format!("Failed to start {}: {err}", self.program), trace_id)
        })?;

        let stdout = match child.stdout.take() {
            Some(stdout) => stdout,
            None => {
                let _ = child.kill();
                let _ = child.wait();
                return Err(AppError::system("Failed to capture stdout", trace_id));
            }
        };
        let stderr = child.stderr.take();

        Ok(StreamProcess {
            stdout: Box::new(BufReader::new(stdout)),
            stderr: stderr.map(|pipe| Box::new(BufReader::new(pipe)) as Box<dyn BufRead + Send>),
            control: Box::new(child),
        })
    }
}
