use std::sync::Arc;

use crate::app::models::CaptureEvent;

pub mod prepare;
pub mod run_dir;
pub mod session;
pub mod stream;
pub mod worker;

pub type CaptureEmitter = Arc<dyn Fn(CaptureEvent) + Send + Sync>;
