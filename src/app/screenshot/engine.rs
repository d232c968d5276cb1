use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use chrono::Local;
use serde::Serialize;
use tracing::{info, warn};

use super::validate::{confirm_png_file, decode_base64_png, validate_png_bytes};
use crate::app::adb::commands;
use crate::app::adb::runner::{AdbBridge, CommandOutput};
use crate::app::config::ScreenshotSettings;
use crate::app::error::AppError;

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ScreenshotStrategy {
    DirectStream,
    DeviceFilePull,
    Base64Transport,
}

impl ScreenshotStrategy {
    pub const ORDER: [ScreenshotStrategy; 3] = [
        ScreenshotStrategy::DirectStream,
        ScreenshotStrategy::DeviceFilePull,
        ScreenshotStrategy::Base64Transport,
    ];
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct CapturedScreenshot {
    pub path: PathBuf,
    pub strategy: ScreenshotStrategy,
}

#[derive(Debug, Clone)]
pub struct ScreenshotOptions {
    pub output_dir: PathBuf,
    pub remote_dir: String,
    pub stream_timeout: Duration,
    pub transfer_timeout: Duration,
}

impl From<&ScreenshotSettings> for ScreenshotOptions {
    fn from(settings: &ScreenshotSettings) -> Self {
        Self {
            output_dir: PathBuf::from(&settings.output_dir),
            remote_dir: settings.remote_dir.clone(),
            stream_timeout: Duration::from_millis(settings.stream_timeout_ms),
            transfer_timeout: Duration::from_millis(settings.transfer_timeout_ms),
        }
    }
}

enum Attempt {
    Saved,
    Rejected(String),
}

pub fn screenshot_file_name(now: chrono::DateTime<Local>) -> String {
    format!("screenshot_{}.png", now.format("%Y%m%d_%H%M%S"))
}

fn remove_quietly(path: &Path) {
    if path.exists() {
        if let Err(err) = fs::remove_file(path) {
            warn!(path = %path.display(), error = %err, "failed to remove rejected screenshot");
        }
    }
}

pub struct ScreenshotEngine {
    bridge: Arc<dyn AdbBridge>,
    options: ScreenshotOptions,
}

impl ScreenshotEngine {
    pub fn new(bridge: Arc<dyn AdbBridge>, options: ScreenshotOptions) -> Self {
        Self { bridge, options }
    }

    /// Grabs the screen of `serial` into `screenshots/screenshot_<ts>.png`, trying each
    /// strategy in turn until one yields a valid PNG.
    pub fn capture(
        &self,
        serial: Option<&str>,
        trace_id: &str,
    ) -> Result<CapturedScreenshot, AppError> {
        let Some(serial) = serial else {
            return Err(AppError::validation("No ADB device connected", trace_id));
        };
        fs::create_dir_all(&self.options.output_dir).map_err(|err| {
            AppError::resource(
                format!(
                    "Failed to create screenshot directory {}: {err}",
                    self.options.output_dir.display()
                ),
                trace_id,
            )
        })?;
        let path = self
            .options
            .output_dir
            .join(screenshot_file_name(Local::now()));

        for strategy in ScreenshotStrategy::ORDER {
            match self.attempt(strategy, serial, &path, trace_id)? {
                Attempt::Saved => {
                    // Only the final decode decides success; a file that passed its
                    // strategy's check but does not decode is never reported.
                    if let Err(reason) = confirm_png_file(&path) {
                        remove_quietly(&path);
                        warn!(trace_id = %trace_id, strategy = ?strategy, reason = %reason, "screenshot failed final check");
                        return Err(AppError::dependency(
                            format!("Screenshot is not a valid image: {reason}"),
                            trace_id,
                        ));
                    }
                    info!(trace_id = %trace_id, strategy = ?strategy, path = %path.display(), "screenshot saved");
                    return Ok(CapturedScreenshot { path, strategy });
                }
                Attempt::Rejected(reason) => {
                    remove_quietly(&path);
                    warn!(trace_id = %trace_id, strategy = ?strategy, reason = %reason, "screenshot strategy failed");
                }
            }
        }
        Err(AppError::dependency(
            "Failed to capture screenshot with every strategy",
            trace_id,
        ))
    }

    fn attempt(
        &self,
        strategy: ScreenshotStrategy,
        serial: &str,
        path: &Path,
        trace_id: &str,
    ) -> Result<Attempt, AppError> {
        match strategy {
            ScreenshotStrategy::DirectStream => self.direct_stream(serial, path, trace_id),
            ScreenshotStrategy::DeviceFilePull => Ok(self.device_file_pull(serial, path, trace_id)),
            ScreenshotStrategy::Base64Transport => self.base64_transport(serial, path, trace_id),
        }
    }

    fn run(&self, args: &[String], timeout: Duration, trace_id: &str) -> Result<CommandOutput, String> {
        let output = self
            .bridge
            .run(args, timeout, trace_id)
            .map_err(|err| err.error)?;
        if output.timed_out {
            return Err(format!("timed out after {}ms", timeout.as_millis()));
        }
        Ok(output)
    }

    fn direct_stream(&self, serial: &str, path: &Path, trace_id: &str) -> Result<Attempt, AppError> {
        let output = match self.run(
            &commands::screencap_to_stdout(serial),
            self.options.stream_timeout,
            trace_id,
        ) {
            Ok(output) => output,
            Err(reason) => return Ok(Attempt::Rejected(reason)),
        };
        if let Err(reason) = validate_png_bytes(&output.stdout) {
            return Ok(Attempt::Rejected(reason));
        }
        write_screenshot(path, &output.stdout, trace_id)?;
        Ok(Attempt::Saved)
    }

    fn device_file_pull(&self, serial: &str, path: &Path, trace_id: &str) -> Attempt {
        let remote = temp_remote_path(&self.options.remote_dir);
        let timeout = self.options.transfer_timeout;

        if let Err(reason) = self.run(
            &commands::screencap_to_device_file(serial, &remote),
            timeout,
            trace_id,
        ) {
            self.remove_remote(serial, &remote, trace_id);
            return Attempt::Rejected(reason);
        }
        let local = path.to_string_lossy();
        let pulled = self.run(&commands::pull_file(serial, &remote, &local), timeout, trace_id);
        self.remove_remote(serial, &remote, trace_id);
        if let Err(reason) = pulled {
            return Attempt::Rejected(reason);
        }
        if !path.is_file() {
            return Attempt::Rejected("pulled file is missing".to_string());
        }
        match confirm_png_file(path) {
            Ok(()) => Attempt::Saved,
            Err(reason) => Attempt::Rejected(reason),
        }
    }

    fn base64_transport(
        &self,
        serial: &str,
        path: &Path,
        trace_id: &str,
    ) -> Result<Attempt, AppError> {
        let output = match self.run(
            &commands::screencap_base64(serial),
            self.options.transfer_timeout,
            trace_id,
        ) {
            Ok(output) => output,
            Err(reason) => return Ok(Attempt::Rejected(reason)),
        };
        let bytes = match decode_base64_png(&String::from_utf8_lossy(&output.stdout)) {
            Ok(bytes) => bytes,
            Err(reason) => return Ok(Attempt::Rejected(reason)),
        };
        write_screenshot(path, &bytes, trace_id)?;
        Ok(Attempt::Saved)
    }

    fn remove_remote(&self, serial: &str, remote: &str, trace_id: &str) {
        if let Err(reason) = self.run(
            &commands::remove_file(serial, remote),
            self.options.stream_timeout,
            trace_id,
        ) {
            warn!(trace_id = %trace_id, remote = %remote, reason = %reason, "failed to remove device temp file");
        }
    }
}

fn write_screenshot(path: &Path, bytes: &[u8], trace_id: &str) -> Result<(), AppError> {
    fs::write(path, bytes).map_err(|err| {
        AppError::resource(
            format!("Failed to write screenshot {}: {err}", path.display()),
            trace_id,
        )
    })
}

/// A device-side temp path unique per attempt, e.g. `/sdcard/screenshot_tmp_1718000000123.png`.
pub fn temp_remote_path(remote_dir: &str) -> String {
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis())
        .unwrap_or_default();
    format!(
        "{}/screenshot_tmp_{millis}.png",
        remote_dir.trim_end_matches('/')
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::adb::testing::ScriptedAdb;
    use crate::app::error::ErrorCode;
    use crate::app::screenshot::validate::sample_png;
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;

    fn engine(adb: &Arc<ScriptedAdb>, dir: &Path) -> ScreenshotEngine {
        let bridge: Arc<dyn AdbBridge> = adb.clone();
        ScreenshotEngine::new(
            bridge,
            ScreenshotOptions {
                output_dir: dir.join("screenshots"),
                remote_dir: "/sdcard".to_string(),
                stream_timeout: Duration::from_secs(3),
                transfer_timeout: Duration::from_secs(5),
            },
        )
    }

    fn saved_files(dir: &Path) -> usize {
        fs::read_dir(dir.join("screenshots"))
            .map(|entries| entries.count())
            .unwrap_or_default()
    }

    #[test]
    fn direct_stream_success_stops_the_chain() {
        let tmp = tempfile::TempDir::new().expect("tmp");
        let adb = Arc::new(ScriptedAdb::new());
        adb.respond(commands::screencap_to_stdout("ABC123"), sample_png());

        let shot = engine(&adb, tmp.path())
            .capture(Some("ABC123"), "t-1")
            .expect("capture");

        assert_eq!(shot.strategy, ScreenshotStrategy::DirectStream);
        assert_eq!(fs::read(&shot.path).expect("read"), sample_png());
        assert!(shot
            .path
            .file_name()
            .and_then(|name| name.to_str())
            .is_some_and(|name| name.starts_with("screenshot_") && name.ends_with(".png")));
        assert_eq!(adb.calls().len(), 1);
    }

    #[test]
    fn non_png_stream_falls_back_to_pull() {
        let tmp = tempfile::TempDir::new().expect("tmp");
        let adb = Arc::new(ScriptedAdb::new());
        adb.respond(commands::screencap_to_stdout("ABC123"), "not an image")
            .on_pull(sample_png());

        let shot = engine(&adb, tmp.path())
            .capture(Some("ABC123"), "t-2")
            .expect("capture");

        assert_eq!(shot.strategy, ScreenshotStrategy::DeviceFilePull);
        assert_eq!(adb.count_calls("screencap -p /sdcard/screenshot_tmp_"), 1);
        assert_eq!(adb.count_calls("rm -f /sdcard/screenshot_tmp_"), 1);
        assert_eq!(adb.count_calls("screencap -p | base64"), 0);
    }

    #[test]
    fn timed_out_stream_is_not_trusted() {
        let tmp = tempfile::TempDir::new().expect("tmp");
        let adb = Arc::new(ScriptedAdb::new());
        adb.time_out(commands::screencap_to_stdout("ABC123"), sample_png())
            .on_pull(sample_png());

        let shot = engine(&adb, tmp.path())
            .capture(Some("ABC123"), "t-3")
            .expect("capture");
        assert_eq!(shot.strategy, ScreenshotStrategy::DeviceFilePull);
    }

    #[test]
    fn base64_is_the_last_resort() {
        let tmp = tempfile::TempDir::new().expect("tmp");
        let adb = Arc::new(ScriptedAdb::new());
        let encoded = STANDARD.encode(sample_png());
        adb.respond(commands::screencap_base64("ABC123"), format!("{encoded}\r\n"));

        let shot = engine(&adb, tmp.path())
            .capture(Some("ABC123"), "t-4")
            .expect("capture");

        assert_eq!(shot.strategy, ScreenshotStrategy::Base64Transport);
        assert_eq!(saved_files(tmp.path()), 1);
        // The pull attempt still cleaned up its device-side temp file.
        assert_eq!(adb.count_calls("rm -f"), 1);
    }

    #[test]
    fn corrupt_pulled_file_is_removed_before_next_strategy() {
        let tmp = tempfile::TempDir::new().expect("tmp");
        let adb = Arc::new(ScriptedAdb::new());
        adb.on_pull(b"\x89PNG\r\n\x1a\nbroken".to_vec());

        let err = engine(&adb, tmp.path())
            .capture(Some("ABC123"), "t-5")
            .expect_err("all strategies fail");

        assert_eq!(err.code, ErrorCode::Dependency);
        assert_eq!(saved_files(tmp.path()), 0);
    }

    #[test]
    fn undecodable_stream_fails_whole_capture_and_leaves_nothing() {
        let tmp = tempfile::TempDir::new().expect("tmp");
        let adb = Arc::new(ScriptedAdb::new());
        adb.respond(
            commands::screencap_to_stdout("ABC123"),
            b"\x89PNG\r\n\x1a\nnot really".to_vec(),
        )
        .on_pull(sample_png());

        let err = engine(&adb, tmp.path())
            .capture(Some("ABC123"), "t-6")
            .expect_err("final check fails");

        assert_eq!(err.code, ErrorCode::Dependency);
        assert_eq!(saved_files(tmp.path()), 0);
        assert_eq!(adb.count_calls("pull"), 0);
    }

    #[test]
    fn no_device_is_rejected_without_bridge_calls() {
        let tmp = tempfile::TempDir::new().expect("tmp");
        let adb = Arc::new(ScriptedAdb::new());
        let err = engine(&adb, tmp.path())
            .capture(None, "t-7")
            .expect_err("no device");
        assert_eq!(err.code, ErrorCode::Validation);
        assert!(adb.calls().is_empty());
    }

    #[test]
    fn temp_remote_path_is_timestamped() {
        let path = temp_remote_path("/sdcard/");
        assert!(path.starts_with("/sdcard/screenshot_tmp_"));
        assert!(path.ends_with(".png"));
    }
}
