use std::path::Path;

pub const DEFAULT_ADB_PROGRAM: &str = "adb";

/// Trims the value and strips one layer of matching quotes, as pasted paths
/// often carry them.
pub fn normalize_command_path(value: &str) -> String {
    let trimmed = value.trim();
    for quote in ['"', '\''] {
        if let Some(inner) = trimmed
            .strip_prefix(quote)
            .and_then(|candidate| candidate.strip_suffix(quote))
        {
            return inner.trim().to_string();
        }
    }
    trimmed.to_string()
}

pub fn resolve_adb_program(configured: &str) -> String {
    let normalized = normalize_command_path(configured);
    if normalized.is_empty() {
        DEFAULT_ADB_PROGRAM.to_string()
    } else {
        normalized
    }
}

/// Bare names are left to PATH lookup at spawn time; anything containing a
/// separator must point at an existing file.
pub fn validate_adb_program(program: &str) -> Result<(), String> {
    if program.trim().is_empty() {
        return Err("ADB command is empty".to_string());
    }
    if !program.contains(['/', '\\']) {
        return Ok(());
    }
    let path = Path::new(program);
    if path.is_dir() {
        return Err("ADB path must point to an executable file".to_string());
    }
    if !path.exists() {
        return Err("ADB executable not found at the configured path".to_string());
    }
    Ok(())
}
