pub mod adb;
pub mod capture;
#[cfg(feature = "desktop")]
pub mod commands;
pub mod config;
pub mod error;
pub mod logging;
pub mod models;
pub mod reveal;
pub mod state;
