use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::app::adb::locator::normalize_command_path;

pub const ENV_ADB_PATH: &str = "ADB_LOG_CAPTURE_ADB";
pub const ENV_SERIAL: &str = "ANDROID_SERIAL";
pub const ENV_JOIN_TIMEOUT_MS: &str = "ADB_LOG_CAPTURE_JOIN_TIMEOUT_MS";
pub const ENV_PREPARE_TIMEOUT_MS: &str = "ADB_LOG_CAPTURE_PREPARE_TIMEOUT_MS";

const DEFAULT_JOIN_TIMEOUT_MS: u64 = 2_000;
const DEFAULT_PREPARE_TIMEOUT_MS: u64 = 10_000;
const DEFAULT_LOGCAT_BUFFER_SIZE: &str = "256M";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct AdbSettings {
    pub command_path: String,
    #[serde(default)]
    pub serial: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SessionSettings {
    pub join_timeout_ms: u64,
    pub prepare_timeout_ms: u64,
    pub logcat_buffer_size: String,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            join_timeout_ms: DEFAULT_JOIN_TIMEOUT_MS,
            prepare_timeout_ms: DEFAULT_PREPARE_TIMEOUT_MS,
            logcat_buffer_size: DEFAULT_LOGCAT_BUFFER_SIZE.to_string(),
        }
    }
}

impl SessionSettings {
    pub fn join_timeout(&self) -> Duration {
        Duration::from_millis(self.join_timeout_ms)
    }

    pub fn prepare_timeout(&self) -> Duration {
        Duration::from_millis(self.prepare_timeout_ms)
    }
}

/// Process-wide settings. Nothing here is written back to disk; each run
/// starts from defaults plus the environment.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct CaptureSettings {
    #[serde(default)]
    pub adb: AdbSettings,
    #[serde(default)]
    pub session: SessionSettings,
}

impl CaptureSettings {
    pub fn from_env() -> Self {
        let vars = |key: &str| std::env::var(key).ok();
        validate_settings(apply_env_overrides(Self::default(), vars))
    }
}

fn apply_env_overrides(
    mut settings: CaptureSettings,
    lookup: impl Fn(&str) -> Option<String>,
) -> CaptureSettings {
    if let Some(path) = lookup(ENV_ADB_PATH) {
        settings.adb.command_path = normalize_command_path(&path);
    }
    if let Some(serial) = lookup(ENV_SERIAL).map(|v| v.trim().to_string()) {
        settings.adb.serial = Some(serial).filter(|v| !v.is_empty());
    }
    if let Some(value) = lookup(ENV_JOIN_TIMEOUT_MS).and_then(|v| v.trim().parse().ok()) {
        settings.session.join_timeout_ms = value;
    }
    if let Some(value) = lookup(ENV_PREPARE_TIMEOUT_MS).and_then(|v| v.trim().parse().ok()) {
        settings.session.prepare_timeout_ms = value;
    }
    settings
}

pub fn validate_settings(mut settings: CaptureSettings) -> CaptureSettings {
    if !(100..=60_000).contains(&settings.session.join_timeout_ms) {
        settings.session.join_timeout_ms = DEFAULT_JOIN_TIMEOUT_MS;
    }
    if !(500..=120_000).contains(&settings.session.prepare_timeout_ms) {
        settings.session.prepare_timeout_ms = DEFAULT_PREPARE_TIMEOUT_MS;
    }
    let buffer = settings.session.logcat_buffer_size.trim().to_string();
    settings.session.logcat_buffer_size =
        if buffer.is_empty() || !buffer.chars().all(|c| c.is_ascii_alphanumeric()) {
            DEFAULT_LOGCAT_BUFFER_SIZE.to_string()
        } else {
            buffer
        };
    settings.adb.serial = settings
        .adb
        .serial
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty());
    settings
}
