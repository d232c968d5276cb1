use std::path::{Path, PathBuf};

#[cfg(windows)]
pub const ADB_EXECUTABLE: &str = "adb.exe";
#[cfg(not(windows))]
pub const ADB_EXECUTABLE: &str = "adb";

pub fn normalize_command_path(value: &str) -> String {
    let trimmed = value.trim();
    if let Some(inner) = trimmed
        .strip_prefix('"')
        .and_then(|candidate| candidate.strip_suffix('"'))
    {
        return inner.trim().to_string();
    }
    if let Some(inner) = trimmed
        .strip_prefix('\'')
        .and_then(|candidate| candidate.strip_suffix('\''))
    {
        return inner.trim().to_string();
    }
    trimmed.to_string()
}

/// Directory of the running executable, where a bundled bridge tool may sit.
pub fn application_dir() -> Option<PathBuf> {
    std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(Path::to_path_buf))
}

/// Resolution order: configured path, bundled copy next to the app, then `adb` on PATH.
pub fn resolve_adb_program(config_command_path: &str) -> String {
    resolve_adb_program_from(config_command_path, application_dir().as_deref())
}

pub fn resolve_adb_program_from(config_command_path: &str, app_dir: Option<&Path>) -> String {
    let normalized = normalize_command_path(config_command_path);
    if !normalized.is_empty() {
        return normalized;
    }
    if let Some(dir) = app_dir {
        let bundled = dir.join(ADB_EXECUTABLE);
        if bundled.is_file() {
            return bundled.to_string_lossy().to_string();
        }
    }
    "adb".to_string()
}

pub fn validate_adb_program(program: &str) -> Result<(), String> {
    if program.trim().is_empty() {
        return Err("ADB command is empty".to_string());
    }
    if program == "adb" {
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
