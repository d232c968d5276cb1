use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use adb_devpanel_lib::app::adb::locator::resolve_adb_program;
use adb_devpanel_lib::app::adb::runner::{
    run_command_with_timeout, AdbBridge, HostAdb, QUERY_TIMEOUT,
};
use adb_devpanel_lib::app::config::{load_config, AppConfig};
use adb_devpanel_lib::app::events::noop_emitter;
use adb_devpanel_lib::app::models::LinkStatus;
use adb_devpanel_lib::app::screenshot::engine::ScreenshotStrategy;
use adb_devpanel_lib::app::session::SessionController;
use serde::Serialize;
use uuid::Uuid;

#[derive(Debug, Clone)]
struct Args {
    out_dir: Option<PathBuf>,
    capture_ms: u64,
    json: bool,
}

#[derive(Serialize)]
struct SmokeSummary {
    tool: &'static str,
    status: &'static str,
    trace_id: String,
    serial: Option<String>,
    adb_program: Option<String>,
    out_dir: String,
    artifacts: HashMap<String, String>,
    checks: Vec<SmokeCheck>,
}

#[derive(Serialize)]
struct SmokeCheck {
    name: &'static str,
    status: &'static str, // pass|fail|warn|skip
    duration_ms: u128,
    artifacts: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error_code: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl SmokeCheck {
    fn skipped(name: &'static str) -> Self {
        Self {
            name,
            status: "skip",
            duration_ms: 0,
            artifacts: vec![],
            error_code: None,
            error: None,
        }
    }
}

type CheckOutcome = Result<(Vec<String>, Option<String>), (&'static str, String)>;

fn parse_args() -> Result<Args, String> {
    let mut out_dir: Option<PathBuf> = None;
    let mut capture_ms = 1500u64;
    let mut json = false;

    let mut it = std::env::args().skip(1);
    while let Some(arg) = it.next() {
        match arg.as_str() {
            "--out" => {
                let value = it
                    .next()
                    .ok_or_else(|| "--out requires a value".to_string())?;
                out_dir = Some(PathBuf::from(value));
            }
            "--capture-ms" => {
                let value = it
                    .next()
                    .ok_or_else(|| "--capture-ms requires a value".to_string())?;
                capture_ms = value
                    .trim()
                    .parse()
                    .map_err(|_| format!("--capture-ms expects milliseconds, got {value}"))?;
            }
            "--json" => {
                json = true;
            }
            "-h" | "--help" => {
                return Err(
                    "Usage: cargo run --bin smoke -- [--out DIR] [--capture-ms N] [--json]\n"
                        .to_string(),
                );
            }
            other => return Err(format!("Unknown arg: {other}")),
        }
    }

    Ok(Args {
        out_dir,
        capture_ms,
        json,
    })
}

fn ensure_dir(path: &Path) -> Result<(), String> {
    fs::create_dir_all(path)
        .map_err(|err| format!("Failed to create dir {}: {err}", path.display()))
}

/// A pass, a warn when the check returns a warning, a fail on error.
fn run_check<F>(checks: &mut Vec<SmokeCheck>, name: &'static str, f: F) -> Result<(), ()>
where
    F: FnOnce() -> CheckOutcome,
{
    let start = Instant::now();
    match f() {
        Ok((artifacts, warning)) => {
            checks.push(SmokeCheck {
                name,
                status: if warning.is_some() { "warn" } else { "pass" },
                duration_ms: start.elapsed().as_millis(),
                artifacts,
                error_code: warning.as_ref().map(|_| "WARN"),
                error: warning,
            });
            Ok(())
        }
        Err((code, err)) => {
            checks.push(SmokeCheck {
                name,
                status: "fail",
                duration_ms: start.elapsed().as_millis(),
                artifacts: vec![],
                error_code: Some(code),
                error: Some(err),
            });
            Err(())
        }
    }
}

fn session_config(mut config: AppConfig, out_dir: &Path) -> AppConfig {
    config.capture.output_dir = out_dir.join("device_logs").to_string_lossy().to_string();
    config.screenshot.output_dir = out_dir.join("screenshots").to_string_lossy().to_string();
    config
}

fn emit(summary: &SmokeSummary, json: bool) {
    let output = if json {
        serde_json::to_string_pretty(summary).unwrap_or_else(|_| "{}".to_string())
    } else {
        let mut text = format!(
            "status: {}\ntrace_id: {}\nout: {}\n",
            summary.status, summary.trace_id, summary.out_dir
        );
        for check in &summary.checks {
            text.push_str(&format!("  {:<14} {}\n", check.name, check.status));
        }
        text
    };
    println!("{output}");
}

fn main() {
    let args = match parse_args() {
        Ok(v) => v,
        Err(msg) => {
            eprintln!("{msg}");
            std::process::exit(2);
        }
    };

    let trace_id = Uuid::new_v4().to_string();

    let out_dir = args.out_dir.clone().unwrap_or_else(|| {
        let mut p = std::env::temp_dir();
        p.push(format!("adb_devpanel_smoke_{trace_id}"));
        p
    });
    if let Err(err) = ensure_dir(&out_dir) {
        eprintln!("{err}");
        std::process::exit(1);
    }

    let mut artifacts: HashMap<String, String> = HashMap::new();
    let mut checks: Vec<SmokeCheck> = Vec::new();
    let mut status = "pass";

    let config = match load_config() {
        Ok(cfg) => cfg,
        Err(err) => {
            checks.push(SmokeCheck {
                name: "load_config",
                status: "fail",
                duration_ms: 0,
                artifacts: vec![],
                error_code: Some("ERR_CONFIG"),
                error: Some(err.to_string()),
            });
            let summary = SmokeSummary {
                tool: "adb_devpanel_smoke",
                status: "fail",
                trace_id,
                serial: None,
                adb_program: None,
                out_dir: out_dir.to_string_lossy().to_string(),
                artifacts,
                checks,
            };
            emit(&summary, args.json);
            std::process::exit(1);
        }
    };
    let adb_program = resolve_adb_program(&config.adb.command_path);

    // check_adb (real command)
    if run_check(&mut checks, "check_adb", || {
        let output = run_command_with_timeout(
            &adb_program,
            &["version".to_string()],
            QUERY_TIMEOUT,
            &trace_id,
        )
        .map_err(|err| ("ERR_CHECK_ADB", err.to_string()))?;
        let text = output.stdout_text();
        if text.is_empty() {
            return Err((
                "ERR_CHECK_ADB",
                format!("adb version printed nothing: {}", output.stderr.trim()),
            ));
        }
        let path = out_dir.join("check_adb.txt");
        fs::write(&path, &text)
            .map_err(|err| ("ERR_IO", format!("Failed to write check_adb output: {err}")))?;
        artifacts.insert("check_adb".to_string(), path.to_string_lossy().to_string());
        Ok((vec![path.to_string_lossy().to_string()], None))
    })
    .is_err()
    {
        status = "fail";
    }

    let bridge: Arc<dyn AdbBridge> = Arc::new(HostAdb::new(adb_program.clone()));
    let session =
        SessionController::new(bridge, &session_config(config, &out_dir), noop_emitter());

    let mut serial: Option<String> = None;
    if run_check(&mut checks, "device_status", || {
        let snapshot = session.check_status_blocking(Some(trace_id.clone()));
        let path = out_dir.join("device_status.json");
        let body = serde_json::to_string_pretty(&snapshot)
            .map_err(|err| ("ERR_IO", format!("Failed to serialize status: {err}")))?;
        fs::write(&path, body)
            .map_err(|err| ("ERR_IO", format!("Failed to write status: {err}")))?;
        artifacts.insert("device_status".to_string(), path.to_string_lossy().to_string());
        if snapshot.status != LinkStatus::Connected {
            return Err(("ERR_NO_DEVICE", snapshot.status_text));
        }
        serial = Some(snapshot.identity.serial);
        Ok((vec![path.to_string_lossy().to_string()], None))
    })
    .is_err()
    {
        status = "fail";
    }

    if serial.is_some() {
        if run_check(&mut checks, "log_capture", || {
            let path = session
                .start_capture(Some(trace_id.clone()))
                .map_err(|err| ("ERR_CAPTURE", err.to_string()))?;
            thread::sleep(Duration::from_millis(args.capture_ms));
            if !session.stop_capture(Some(trace_id.clone())) {
                return Err(("ERR_CAPTURE", "capture ended before stop".to_string()));
            }
            artifacts.insert("log_capture".to_string(), path.to_string_lossy().to_string());
            let size = fs::metadata(&path).map(|meta| meta.len()).unwrap_or_default();
            let queued = session.drain_log_lines().len();
            let warning = (size == 0 || queued == 0)
                .then(|| format!("capture produced {size} bytes and {queued} lines"));
            Ok((vec![path.to_string_lossy().to_string()], warning))
        })
        .is_err()
        {
            status = "fail";
        }

        if run_check(&mut checks, "screenshot", || {
            let shot = session
                .capture_screenshot_blocking(Some(trace_id.clone()))
                .map_err(|err| ("ERR_SCREENSHOT", err.to_string()))?;
            artifacts.insert("screenshot".to_string(), shot.path.to_string_lossy().to_string());
            let warning = (shot.strategy != ScreenshotStrategy::DirectStream)
                .then(|| format!("direct stream failed; used {:?}", shot.strategy));
            Ok((vec![shot.path.to_string_lossy().to_string()], warning))
        })
        .is_err()
        {
            status = "fail";
        }
    } else {
        checks.push(SmokeCheck::skipped("log_capture"));
        checks.push(SmokeCheck::skipped("screenshot"));
    }
    session.shutdown();

    let summary = SmokeSummary {
        tool: "adb_devpanel_smoke",
        status,
        trace_id: trace_id.clone(),
        serial,
        adb_program: Some(adb_program),
        out_dir: out_dir.to_string_lossy().to_string(),
        artifacts,
        checks,
    };

    emit(&summary, args.json);
    if summary.status != "pass" {
        std::process::exit(1);
    }
}
