use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::app::error::AppError;

pub const CONFIG_PATH_ENV: &str = "ADB_DEVPANEL_CONFIG_PATH";
const CONFIG_FILE_NAME: &str = ".adb_devpanel_config.json";
const BACKUP_FILE_NAME: &str = ".adb_devpanel_config.backup.json";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct AdbSettings {
    pub command_path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DeviceSettings {
    pub poll_interval_ms: u64,
    pub query_timeout_ms: u64,
    pub image_dir: String,
    pub placeholder_image: String,
}

impl Default for DeviceSettings {
    fn default() -> Self {
        Self {
            poll_interval_ms: 3000,
            query_timeout_ms: 3000,
            image_dir: "images".to_string(),
            placeholder_image: "device.png".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CaptureSettings {
    pub output_dir: String,
    pub stop_wait_ms: u64,
    pub clear_before_start: bool,
}

impl Default for CaptureSettings {
    fn default() -> Self {
        Self {
            output_dir: "device_logs".to_string(),
            stop_wait_ms: 3000,
            clear_before_start: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ScreenshotSettings {
    pub output_dir: String,
    pub remote_dir: String,
    pub stream_timeout_ms: u64,
    pub transfer_timeout_ms: u64,
}

impl Default for ScreenshotSettings {
    fn default() -> Self {
        Self {
            output_dir: "screenshots".to_string(),
            remote_dir: "/sdcard".to_string(),
            stream_timeout_ms: 3000,
            transfer_timeout_ms: 5000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ViewerSettings {
    pub drain_interval_ms: u64,
    pub min_level: String,
    pub keyword: String,
}

impl Default for ViewerSettings {
    fn default() -> Self {
        Self {
            drain_interval_ms: 100,
            min_level: "ALL".to_string(),
            keyword: String::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct WorkerSettings {
    pub pool_size: usize,
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self { pool_size: 4 }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Auto,
    Text,
    Json,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LoggingSettings {
    pub level: String,
    pub format: LogFormat,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Auto,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub adb: AdbSettings,
    #[serde(default)]
    pub device: DeviceSettings,
    #[serde(default)]
    pub capture: CaptureSettings,
    #[serde(default)]
    pub screenshot: ScreenshotSettings,
    #[serde(default)]
    pub viewer: ViewerSettings,
    #[serde(default)]
    pub workers: WorkerSettings,
    #[serde(default)]
    pub logging: LoggingSettings,
}

pub fn config_path() -> PathBuf {
    if let Ok(path) = std::env::var(CONFIG_PATH_ENV) {
        if !path.trim().is_empty() {
            return PathBuf::from(path);
        }
    }
    home_dir().join(CONFIG_FILE_NAME)
}

pub fn backup_config_path() -> PathBuf {
    match std::env::var(CONFIG_PATH_ENV) {
        Ok(path) if !path.trim().is_empty() => PathBuf::from(path).with_extension("backup.json"),
        _ => home_dir().join(BACKUP_FILE_NAME),
    }
}

fn home_dir() -> PathBuf {
    dirs::home_dir().unwrap_or_else(|| PathBuf::from("."))
}

pub fn load_config() -> Result<AppConfig, AppError> {
    load_config_from_path(&config_path())
}

pub fn save_config(config: &AppConfig) -> Result<(), AppError> {
    save_config_to_path(config, &config_path(), &backup_config_path())
}

pub fn load_config_from_path(path: &Path) -> Result<AppConfig, AppError> {
    if !path.exists() {
        return Ok(AppConfig::default());
    }
    let raw = fs::read_to_string(path)
        .map_err(|err| AppError::resource(format!("Failed to read config: {err}"), ""))?;
    let config: AppConfig = serde_json::from_str(&raw)
        .map_err(|err| AppError::validation(format!("Failed to parse config: {err}"), ""))?;
    Ok(validate_config(config))
}

pub fn save_config_to_path(
    config: &AppConfig,
    path: &Path,
    backup_path: &Path,
) -> Result<(), AppError> {
    if let Some(parent) = path.parent() {
        let _ = fs::create_dir_all(parent);
    }
    if path.exists() {
        let _ = fs::copy(path, backup_path);
    }
    let payload = serde_json::to_string_pretty(config)
        .map_err(|err| AppError::system(format!("Failed to serialize config: {err}"), ""))?;
    fs::write(path, payload)
        .map_err(|err| AppError::resource(format!("Failed to write config: {err}"), ""))?;
    Ok(())
}

fn non_empty_or(value: &mut String, fallback: &str) {
    if value.trim().is_empty() {
        *value = fallback.to_string();
    }
}

pub fn validate_config(mut config: AppConfig) -> AppConfig {
    let defaults = AppConfig::default();

    if !(500..=60_000).contains(&config.device.poll_interval_ms) {
        config.device.poll_interval_ms = defaults.device.poll_interval_ms;
    }
    if !(100..=60_000).contains(&config.device.query_timeout_ms) {
        config.device.query_timeout_ms = defaults.device.query_timeout_ms;
    }
    non_empty_or(&mut config.device.image_dir, &defaults.device.image_dir);
    non_empty_or(
        &mut config.device.placeholder_image,
        &defaults.device.placeholder_image,
    );

    non_empty_or(&mut config.capture.output_dir, &defaults.capture.output_dir);
    if !(100..=30_000).contains(&config.capture.stop_wait_ms) {
        config.capture.stop_wait_ms = defaults.capture.stop_wait_ms;
    }

    non_empty_or(
        &mut config.screenshot.output_dir,
        &defaults.screenshot.output_dir,
    );
    non_empty_or(
        &mut config.screenshot.remote_dir,
        &defaults.screenshot.remote_dir,
    );
    let remote = config.screenshot.remote_dir.trim_end_matches('/');
    config.screenshot.remote_dir = if remote.is_empty() {
        "/".to_string()
    } else {
        remote.to_string()
    };
    if !(100..=60_000).contains(&config.screenshot.stream_timeout_ms) {
        config.screenshot.stream_timeout_ms = defaults.screenshot.stream_timeout_ms;
    }
    if !(100..=120_000).contains(&config.screenshot.transfer_timeout_ms) {
        config.screenshot.transfer_timeout_ms = defaults.screenshot.transfer_timeout_ms;
    }

    if !(16..=5_000).contains(&config.viewer.drain_interval_ms) {
        config.viewer.drain_interval_ms = defaults.viewer.drain_interval_ms;
    }
    non_empty_or(&mut config.viewer.min_level, &defaults.viewer.min_level);

    if !(1..=32).contains(&config.workers.pool_size) {
        config.workers.pool_size = defaults.workers.pool_size;
    }
    non_empty_or(&mut config.logging.level, &defaults.logging.level);
    config
}
