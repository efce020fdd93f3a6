use std::sync::{Arc, Mutex, MutexGuard};

use crate::app::adb::bridge::AdbBridge;
use crate::app::capture::session::CaptureSession;
use crate::app::capture::CaptureEmitter;
use crate::app::config::CaptureSettings;
use crate::app::error::AppError;

pub struct AppState {
    pub settings: CaptureSettings,
    pub bridge: Arc<AdbBridge>,
    session: Mutex<CaptureSession>,
}

impl AppState {
    pub fn new(settings: CaptureSettings, emitter: CaptureEmitter) -> Self {
        let bridge = Arc::new(AdbBridge::from_settings(&settings.adb));
        let session = CaptureSession::new(bridge.clone(), settings.session.clone(), emitter);
        Self {
            settings,
            bridge,
            session: Mutex::new(session),
        }
    }

    pub fn session(&self, trace_id: &str) -> Result<MutexGuard<'_, CaptureSession>, AppError> {
        self.session
            .lock()
            .map_err(|_| AppError::system("Capture session locked", trace_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::config::AdbSettings;
    use crate::app::models::{CaptureEvent, SessionStatus};

    #[test]
    fn builds_idle_session_from_settings() {
        let settings = CaptureSettings {
            adb: AdbSettings {
                command_path: "'/opt/platform-tools/adb'".to_string(),
                serial: None,
            },
            ..CaptureSettings::default()
        };
        let state = AppState::new(settings, Arc::new(|_event: CaptureEvent| {}));
        assert_eq!(state.bridge.program(), "/opt/platform-tools/adb");
        let session = state.session("trace-state").expect("lock");
        assert_eq!(session.status(), SessionStatus::Idle);
        assert!(session.run_dir().is_none());
    }
}
