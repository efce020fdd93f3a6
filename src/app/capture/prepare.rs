use serde::Serialize;
use std::time::Duration;

use tracing::{debug, info};

use crate::app::adb::bridge::DeviceBridge;

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct PrepareStep {
    pub args: Vec<String>,
    pub exit_code: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl PrepareStep {
    pub fn succeeded(&self) -> bool {
        self.error.is_none() && self.exit_code == Some(0)
    }
}

pub fn preparation_commands(logcat_buffer_size: &str) -> Vec<Vec<String>> {
    let split = |line: &str| line.split_whitespace().map(str::to_string).collect::<Vec<_>>();
    vec![
        split("root"),
        split("remount"),
        split("shell mount -t debugfs none /sys/kernel/debug"),
        split("logcat -c"),
        split(&format!("logcat -G {logcat_buffer_size}")),
    ]
}

/// Runs every preparation command in order. Unrooted devices reject `root`
/// and `remount`; capture still proceeds, so failures are only recorded.
pub fn prepare_device(
    bridge: &dyn DeviceBridge,
    logcat_buffer_size: &str,
    timeout: Duration,
    trace_id: &str,
) -> Vec<PrepareStep> {
    let steps = preparation_commands(logcat_buffer_size)
        .into_iter()
        .map(|args| match bridge.run(&args, timeout, trace_id) {
            Ok(output) => {
                if !output.success() {
                    debug!(
                        trace_id = %trace_id,
                        command = %args.join(" "),
                        exit_code = ?output.exit_code,
                        stderr = %output.stderr.trim(),
                        "preparation command failed; continuing"
                    );
                }
                PrepareStep {
                    args,
                    exit_code: output.exit_code,
                    error: None,
                }
            }
            Err(err) => {
                debug!(
                    trace_id = %trace_id,
                    command = %args.join(" "),
                    error = %err.error,
                    "preparation command did not run; continuing"
                );
                PrepareStep {
                    args,
                    exit_code: None,
                    error: Some(err.error),
                }
            }
        })
        .collect::<Vec<_>>();

    let failed = steps.iter().filter(|step| !step.succeeded()).count();
    info!(trace_id = %trace_id, total = steps.len(), failed, "device preparation finished");
    steps
}
