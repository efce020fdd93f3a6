use chrono::{DateTime, Local};
use std::fs;
use std::path::{Path, PathBuf};

use crate::app::error::AppError;

pub const RUN_DIR_PREFIX: &str = "logs_";
const TIMESTAMP_FORMAT: &str = "%Y%m%d_%H%M%S";

/// Labels become a single directory component, so separators and dot
/// segments are refused.
pub fn validate_label(label: &str) -> Result<(), String> {
    let trimmed = label.trim();
    if trimmed.is_empty() {
        return Ok(());
    }
    if trimmed == "." || trimmed == ".." {
        return Err("Iteration name must not be '.' or '..'".to_string());
    }
    if trimmed.contains(['/', '\\', '\0']) {
        return Err("Iteration name must not contain path separators".to_string());
    }
    Ok(())
}

pub fn run_dir_name(label: &str, now: DateTime<Local>) -> String {
    let trimmed = label.trim();
    if trimmed.is_empty() {
        format!("{RUN_DIR_PREFIX}{}", now.format(TIMESTAMP_FORMAT))
    } else {
        format!("{RUN_DIR_PREFIX}{trimmed}")
    }
}

pub fn resolve_run_dir(output_root: &Path, label: &str, now: DateTime<Local>) -> PathBuf {
    output_root.join(run_dir_name(label, now))
}

/// Reusing an existing directory is allowed; a rerun with the same label
/// truncates the stream files inside it.
pub fn create_run_dir(path: &Path, trace_id: &str) -> Result<(), AppError> {
    fs::create_dir_all(path).map_err(|err| {
        AppError::system(
            format!("Failed to create run directory {}: {err}", path.display()),
            trace_id,
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn fixed_now() -> DateTime<Local> {
        Local
            .with_ymd_and_hms(2024, 3, 9, 7, 5, 1)
            .single()
            .expect("unambiguous local time")
    }

    #[test]
    fn label_names_the_directory() {
        assert_eq!(run_dir_name("iter1", fixed_now()), "logs_iter1");
        assert_eq!(run_dir_name("  iter 2 ", fixed_now()), "logs_iter 2");
    }

    #[test]
    fn empty_label_uses_second_resolution_timestamp() {
        let name = run_dir_name("   ", fixed_now());
        assert_eq!(name, "logs_20240309_070501");

        let digits: String = name
            .trim_start_matches(RUN_DIR_PREFIX)
            .chars()
            .filter(|c| c.is_ascii_digit())
            .collect();
        assert_eq!(digits.len(), 14);
    }

    #[test]
    fn resolves_under_output_root() {
        let path = resolve_run_dir(Path::new("/tmp/out"), "iter1", fixed_now());
        assert_eq!(path, Path::new("/tmp/out").join("logs_iter1"));
    }

    #[test]
    fn rejects_path_like_labels() {
        assert!(validate_label("").is_ok());
        assert!(validate_label("iter1").is_ok());
        assert!(validate_label("..").is_err());
        assert!(validate_label("a/b").is_err());
        assert!(validate_label("a\\b").is_err());
    }

    #[test]
    fn create_is_idempotent() {
        let dir = tempfile::TempDir::new().expect("tmp");
        let run_dir = dir.path().join("nested").join("logs_x");
        create_run_dir(&run_dir, "trace").expect("first");
        create_run_dir(&run_dir, "trace").expect("second");
        assert!(run_dir.is_dir());
    }
}
