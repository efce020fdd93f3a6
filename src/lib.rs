pub mod app;

#[cfg(feature = "desktop")]
pub use desktop::run;

#[cfg(feature = "desktop")]
mod desktop {
    use std::sync::Arc;

    use tauri::{Emitter, Manager};
    use tracing::warn;

    use crate::app::capture::CaptureEmitter;
    use crate::app::commands::{
        about, capture_status, check_adb, default_output_dir, get_settings, reveal_run_directory,
        start_capture, stop_capture, CAPTURE_EVENT_NAME,
    };
    use crate::app::config::CaptureSettings;
    use crate::app::logging::init_logging;
    use crate::app::models::CaptureEvent;
    use crate::app::state::AppState;

    #[cfg_attr(mobile, tauri::mobile_entry_point)]
    pub fn run() {
        init_logging();
        tauri::Builder::default()
            .plugin(tauri_plugin_dialog::init())
            .plugin(tauri_plugin_opener::init())
            .setup(|app| {
                let handle = app.handle().clone();
                let emitter: CaptureEmitter = Arc::new(move |event: CaptureEvent| {
                    if let Err(err) = handle.emit(CAPTURE_EVENT_NAME, event) {
                        warn!(error = %err, "failed to emit capture event");
                    }
                });
                app.manage(AppState::new(CaptureSettings::from_env(), emitter));
                Ok(())
            })
            .invoke_handler(tauri::generate_handler![
                get_settings,
                default_output_dir,
                check_adb,
                start_capture,
                stop_capture,
                capture_status,
                reveal_run_directory,
                about
            ])
            .run(tauri::generate_context!())
            .expect("error while running tauri application");
    }
}
