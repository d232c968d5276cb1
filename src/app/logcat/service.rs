use std::fs::{self, File};
use std::io::{BufRead, BufReader, Read};
use std::path::PathBuf;
use std::process::{ChildStderr, ChildStdout};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;
use std::time::Duration;

use chrono::Local;
use tracing::{debug, info, warn};

use super::parser::{process_chunk, LineAssembler};
use super::state_machine::{CaptureState, CaptureStateMachine, ExitDisposition};
use crate::app::adb::commands;
use crate::app::adb::runner::{AdbBridge, QUERY_TIMEOUT};
use crate::app::config::CaptureSettings;
use crate::app::error::AppError;
use crate::app::events::{EventEmitter, SessionEvent};
use crate::app::log_queue::LogQueue;
use crate::app::state::{LogSession, Termination};

#[derive(Debug, Clone)]
pub struct CaptureOptions {
    pub output_dir: PathBuf,
    pub stop_wait: Duration,
    pub clear_before_start: bool,
}

impl From<&CaptureSettings> for CaptureOptions {
    fn from(settings: &CaptureSettings) -> Self {
        Self {
            output_dir: PathBuf::from(&settings.output_dir),
            stop_wait: Duration::from_millis(settings.stop_wait_ms),
            clear_before_start: settings.clear_before_start,
        }
    }
}

pub fn session_log_file_name(now: chrono::DateTime<Local>) -> String {
    format!("log_{}.txt", now.format("%Y%m%d_%H%M%S"))
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Drives the streaming `logcat` child: one session at a time, raw bytes to a session file,
/// decoded lines to the shared queue.
pub struct LogCapture {
    bridge: Arc<dyn AdbBridge>,
    queue: Arc<LogQueue>,
    emitter: EventEmitter,
    options: CaptureOptions,
    machine: Arc<Mutex<CaptureStateMachine>>,
    session: Arc<Mutex<Option<Arc<LogSession>>>>,
}

impl LogCapture {
    pub fn new(
        bridge: Arc<dyn AdbBridge>,
        queue: Arc<LogQueue>,
        emitter: EventEmitter,
        options: CaptureOptions,
    ) -> Self {
        Self {
            bridge,
            queue,
            emitter,
            options,
            machine: Arc::new(Mutex::new(CaptureStateMachine::new())),
            session: Arc::new(Mutex::new(None)),
        }
    }

    pub fn state(&self) -> CaptureState {
        lock(&self.machine).state()
    }

    pub fn current_log_path(&self) -> Option<PathBuf> {
        lock(&self.session)
            .as_ref()
            .map(|session| session.path().to_path_buf())
    }

    /// Starts streaming from `serial` (the connected device, if any).
    pub fn start(&self, serial: Option<&str>, trace_id: &str) -> Result<PathBuf, AppError> {
        let id = lock(&self.machine)
            .begin_start(serial.is_some())
            .map_err(|rejection| AppError::validation(rejection.message(), trace_id))?;
        let serial = serial.unwrap_or_default();

        let (session, stdout) = match self.spawn_session(id, serial, trace_id) {
            Ok(spawned) => spawned,
            Err(err) => {
                lock(&self.machine).abort_start(id);
                warn!(trace_id = %trace_id, error = %err.error, "log capture failed to start");
                return Err(err);
            }
        };
        let path = session.path().to_path_buf();
        *lock(&self.session) = Some(Arc::clone(&session));
        info!(trace_id = %trace_id, serial = %serial, path = %path.display(), "log capture started");
        // Announced before the reader starts so `CaptureEnded` always follows it.
        (self.emitter)(SessionEvent::notice(format!(
            "Log capture started, saving to {}",
            path.display()
        )));
        (self.emitter)(SessionEvent::CaptureStarted {
            path: path.clone(),
            trace_id: trace_id.to_string(),
        });

        let reader = ReaderContext {
            session: Arc::clone(&session),
            slot: Arc::clone(&self.session),
            queue: Arc::clone(&self.queue),
            emitter: Arc::clone(&self.emitter),
            machine: Arc::clone(&self.machine),
            reap_wait: self.options.stop_wait,
        };
        let spawned = thread::Builder::new()
            .name(format!("logcat-reader-{id}"))
            .spawn(move || reader.run(stdout));
        if let Err(err) = spawned {
            lock(&self.session).take();
            lock(&self.machine).abort_start(id);
            session.terminate(self.options.stop_wait);
            session.close_file();
            (self.emitter)(SessionEvent::CaptureEnded {
                path,
                exit_code: None,
                requested: false,
            });
            return Err(AppError::system(
                format!("Failed to start log reader: {err}"),
                trace_id,
            ));
        }

        if !lock(&self.machine).mark_streaming(id) {
            // The process already died after spawn; the reader finished it.
            debug!(trace_id = %trace_id, session = id, "capture ended before streaming");
        }
        Ok(path)
    }

    fn spawn_session(
        &self,
        id: u64,
        serial: &str,
        trace_id: &str,
    ) -> Result<(Arc<LogSession>, ChildStdout), AppError> {
        fs::create_dir_all(&self.options.output_dir).map_err(|err| {
            AppError::resource(
                format!(
                    "Failed to create log directory {}: {err}",
                    self.options.output_dir.display()
                ),
                trace_id,
            )
        })?;
        let path = self
            .options
            .output_dir
            .join(session_log_file_name(Local::now()));
        let file = File::create(&path).map_err(|err| {
            AppError::resource(
                format!("Failed to open log file {}: {err}", path.display()),
                trace_id,
            )
        })?;

        if self.options.clear_before_start {
            self.clear_device_buffer(serial, trace_id);
        }

        // `file` is dropped (closed) on every early return below.
        let mut child = self
            .bridge
            .spawn_stream(&commands::stream_log(serial), trace_id)?;
        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let session = Arc::new(LogSession::new(
            id,
            path,
            trace_id.to_string(),
            file,
            child,
        ));

        let Some(stdout) = stdout else {
            session.terminate(self.options.stop_wait);
            session.close_file();
            return Err(AppError::system("Failed to capture logcat stdout", trace_id));
        };
        if let Some(stderr) = stderr {
            spawn_stderr_logger(stderr, trace_id.to_string());
        }
        Ok((session, stdout))
    }

    /// Stops the running capture. Returns `false` when nothing was streaming.
    pub fn stop(&self, trace_id: &str) -> bool {
        let Some(id) = lock(&self.machine).begin_stop() else {
            debug!(trace_id = %trace_id, "stop requested with no capture running");
            return false;
        };
        let session = lock(&self.session).take();
        if let Some(session) = session {
            match session.terminate(self.options.stop_wait) {
                Termination::Exited(code) => {
                    info!(trace_id = %trace_id, exit_code = ?code, "log capture stopped")
                }
                Termination::Abandoned => (self.emitter)(SessionEvent::notice(
                    "Log capture process did not exit in time and was abandoned",
                )),
                Termination::AlreadyGone => {}
            }
            session.close_file();
        }
        lock(&self.machine).finish_stop(id);
        true
    }

    /// Best-effort `logcat -c`; failures are logged and otherwise ignored.
    pub fn clear_device_buffer(&self, serial: &str, trace_id: &str) {
        match self
            .bridge
            .run(&commands::clear_log_buffer(serial), QUERY_TIMEOUT, trace_id)
        {
            Ok(output) if output.timed_out => {
                warn!(trace_id = %trace_id, "clearing device log buffer timed out")
            }
            Ok(_) => debug!(trace_id = %trace_id, "device log buffer cleared"),
            Err(err) => {
                warn!(trace_id = %trace_id, error = %err.error, "failed to clear device log buffer")
            }
        }
    }
}

impl Drop for LogCapture {
    fn drop(&mut self) {
        self.stop("teardown");
        // A session that never reached Streaming (or exited on its own) may still hold a file.
        if let Some(session) = lock(&self.session).take() {
            session.terminate(self.options.stop_wait);
            session.close_file();
        }
    }
}

struct ReaderContext {
    session: Arc<LogSession>,
    slot: Arc<Mutex<Option<Arc<LogSession>>>>,
    queue: Arc<LogQueue>,
    emitter: EventEmitter,
    machine: Arc<Mutex<CaptureStateMachine>>,
    reap_wait: Duration,
}

impl ReaderContext {
    fn run(self, mut stdout: ChildStdout) {
        let trace_id = self.session.trace_id.clone();
        let mut assembler = LineAssembler::new();
        let mut buffer = [0u8; 8192];
        loop {
            let count = match stdout.read(&mut buffer) {
                Ok(0) => break,
                Ok(count) => count,
                Err(err) if err.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(err) => {
                    warn!(trace_id = %trace_id, error = %err, "failed to read logcat stdout");
                    break;
                }
            };
            let chunk = &buffer[..count];
            let queued = self.session.with_file(|file| {
                process_chunk(
                    chunk,
                    self.session.stop_flag(),
                    &mut assembler,
                    file,
                    &self.queue,
                )
            });
            match queued {
                Ok(0) => {}
                Ok(count) => (self.emitter)(SessionEvent::LogLineReceived { count }),
                Err(err) => {
                    warn!(trace_id = %trace_id, error = %err, "failed to append to log file")
                }
            }
        }

        if !self.session.is_stop_requested() {
            if let Some(line) = assembler.finish() {
                self.queue.push(line);
                (self.emitter)(SessionEvent::LogLineReceived { count: 1 });
            }
        }
        self.finish();
    }

    fn finish(self) {
        let requested = self.session.is_stop_requested();
        let exit_code = match self.session.reap(self.reap_wait) {
            Termination::Exited(code) => code,
            Termination::Abandoned | Termination::AlreadyGone => None,
        };
        self.session.close_file();

        let disposition = lock(&self.machine).process_exited(self.session.id);
        if disposition == ExitDisposition::Unsolicited {
            let mut slot = lock(&self.slot);
            if slot.as_ref().is_some_and(|current| current.id == self.session.id) {
                slot.take();
            }
            drop(slot);
            info!(
                trace_id = %self.session.trace_id,
                exit_code = ?exit_code,
                "log capture process exited on its own"
            );
        }
        (self.emitter)(SessionEvent::CaptureEnded {
            path: self.session.path().to_path_buf(),
            exit_code,
            requested,
        });
    }
}

fn spawn_stderr_logger(stderr: ChildStderr, trace_id: String) {
    let _ = thread::Builder::new()
        .name("logcat-stderr".to_string())
        .spawn(move || {
            let reader = BufReader::new(stderr);
            let mut reported = false;
            for line in reader.lines() {
                let Ok(line) = line else { break };
                if reported || line.trim().is_empty() {
                    continue;
                }
                reported = true;
                warn!(trace_id = %trace_id, stderr = %line, "logcat stderr");
            }
        });
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::app::adb::testing::ScriptedAdb;
    use crate::app::events::channel_emitter;
    use crate::app::error::ErrorCode;
    use std::sync::mpsc::Receiver;
    use std::time::Instant;

    type Harness = (
        LogCapture,
        Arc<LogQueue>,
        Arc<ScriptedAdb>,
        Receiver<SessionEvent>,
    );

    fn capture(adb: ScriptedAdb, dir: &std::path::Path) -> Harness {
        let adb = Arc::new(adb);
        let queue = Arc::new(LogQueue::new());
        let (emitter, rx) = channel_emitter();
        let capture = LogCapture::new(
            adb.clone(),
            Arc::clone(&queue),
            emitter,
            CaptureOptions {
                output_dir: dir.join("device_logs"),
                stop_wait: Duration::from_secs(3),
                clear_before_start: true,
            },
        );
        (capture, queue, adb, rx)
    }

    fn wait_for_end(rx: &Receiver<SessionEvent>) -> SessionEvent {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if let Ok(event) = rx.recv_timeout(Duration::from_millis(100)) {
                if matches!(event, SessionEvent::CaptureEnded { .. }) {
                    return event;
                }
            }
        }
        panic!("capture never ended");
    }

    #[test]
    fn rejects_start_without_device() {
        let tmp = tempfile::TempDir::new().expect("tmp");
        let (capture, _queue, adb, _rx) = capture(ScriptedAdb::new(), tmp.path());
        let err = capture.start(None, "t-1").expect_err("no device");
        assert_eq!(err.code, ErrorCode::Validation);
        assert_eq!(capture.state(), CaptureState::Idle);
        assert!(adb.calls().is_empty());
        assert!(!tmp.path().join("device_logs").exists());
    }

    #[test]
    fn streams_lines_to_file_and_queue_then_ends() {
        let tmp = tempfile::TempDir::new().expect("tmp");
        let adb = ScriptedAdb::new();
        adb.stream_with("printf 'E/Boot: one\\n\\nI/Boot: two\\n'");
        let (capture, queue, adb, rx) = capture(adb, tmp.path());

        let path = capture.start(Some("ABC123"), "t-2").expect("start");
        match wait_for_end(&rx) {
            SessionEvent::CaptureEnded { requested, exit_code, .. } => {
                assert!(!requested);
                assert_eq!(exit_code, Some(0));
            }
            other => panic!("unexpected {other:?}"),
        }

        let lines = queue.drain_all();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0].text, "E/Boot: one");
        assert_eq!(lines[1].severity, crate::app::models::Severity::Info);
        assert_eq!(
            fs::read_to_string(&path).expect("read"),
            "E/Boot: one\n\nI/Boot: two\n"
        );
        assert_eq!(capture.state(), CaptureState::Idle);
        assert_eq!(adb.count_calls("logcat -c"), 1);
    }

    #[test]
    fn instant_exit_is_announced_as_started_before_ended() {
        let tmp = tempfile::TempDir::new().expect("tmp");
        let adb = ScriptedAdb::new();
        adb.stream_with("exit 0");
        let (capture, _queue, _adb, rx) = capture(adb, tmp.path());

        let path = capture.start(Some("ABC123"), "t-15").expect("start");
        let mut seen = Vec::new();
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            let Ok(event) = rx.recv_timeout(Duration::from_millis(100)) else {
                continue;
            };
            let ended = matches!(event, SessionEvent::CaptureEnded { .. });
            seen.push(event);
            if ended {
                break;
            }
        }

        let started = seen
            .iter()
            .position(|event| matches!(event, SessionEvent::CaptureStarted { .. }))
            .expect("started event");
        let ended = seen
            .iter()
            .position(|event| matches!(event, SessionEvent::CaptureEnded { .. }))
            .expect("ended event");
        assert!(started < ended);
        assert_eq!(capture.state(), CaptureState::Idle);
        assert_eq!(capture.current_log_path(), None);
        assert!(path.exists());
    }

    #[test]
    fn second_start_is_rejected_without_new_file_or_process() {
        let tmp = tempfile::TempDir::new().expect("tmp");
        let adb = ScriptedAdb::new();
        adb.stream_with("exec sleep 30");
        let (capture, _queue, adb, _rx) = capture(adb, tmp.path());

        capture.start(Some("ABC123"), "t-3").expect("start");
        let err = capture.start(Some("ABC123"), "t-4").expect_err("second start");
        assert_eq!(err.code, ErrorCode::Validation);
        assert!(err.error.contains("already in progress"));
        assert_eq!(adb.count_calls("stream"), 1);
        let files = fs::read_dir(tmp.path().join("device_logs")).expect("dir").count();
        assert_eq!(files, 1);

        assert!(capture.stop("t-5"));
    }

    #[test]
    fn quick_stop_leaves_empty_closed_file() {
        let tmp = tempfile::TempDir::new().expect("tmp");
        let adb = ScriptedAdb::new();
        adb.stream_with("exec sleep 30");
        let (capture, queue, _adb, rx) = capture(adb, tmp.path());

        let path = capture.start(Some("ABC123"), "t-6").expect("start");
        thread::sleep(Duration::from_millis(50));
        assert!(capture.stop("t-7"));

        assert_eq!(capture.state(), CaptureState::Idle);
        assert_eq!(fs::metadata(&path).expect("meta").len(), 0);
        assert!(queue.is_empty());
        match wait_for_end(&rx) {
            SessionEvent::CaptureEnded { requested, .. } => assert!(requested),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn stop_when_idle_is_harmless() {
        let tmp = tempfile::TempDir::new().expect("tmp");
        let (capture, _queue, _adb, _rx) = capture(ScriptedAdb::new(), tmp.path());
        assert!(!capture.stop("t-8"));
        assert!(!capture.stop("t-9"));
    }

    #[test]
    fn unopenable_log_file_aborts_start() {
        let tmp = tempfile::TempDir::new().expect("tmp");
        // A regular file where the directory should be.
        fs::write(tmp.path().join("device_logs"), b"").expect("write");
        let adb = ScriptedAdb::new();
        adb.stream_with("exec sleep 30");
        let (capture, _queue, adb, _rx) = capture(adb, tmp.path());

        let err = capture.start(Some("ABC123"), "t-10").expect_err("resource error");
        assert_eq!(err.code, ErrorCode::Resource);
        assert_eq!(capture.state(), CaptureState::Idle);
        assert_eq!(adb.count_calls("stream"), 0);
    }

    #[test]
    fn failed_spawn_returns_to_idle() {
        let tmp = tempfile::TempDir::new().expect("tmp");
        let (capture, _queue, _adb, _rx) = capture(ScriptedAdb::new(), tmp.path());
        let err = capture.start(Some("ABC123"), "t-11").expect_err("no stream");
        assert_eq!(err.code, ErrorCode::Dependency);
        assert_eq!(capture.state(), CaptureState::Idle);
    }

    #[test]
    fn restart_after_unsolicited_exit() {
        let tmp = tempfile::TempDir::new().expect("tmp");
        let adb = ScriptedAdb::new();
        adb.stream_with("echo once");
        let (capture, _queue, _adb, rx) = capture(adb, tmp.path());

        capture.start(Some("ABC123"), "t-12").expect("start");
        wait_for_end(&rx);
        assert_eq!(capture.state(), CaptureState::Idle);
        assert_eq!(capture.current_log_path(), None);
        // Same-second restarts reuse the file name; the second start truncates it.
        capture.start(Some("ABC123"), "t-13").expect("restart");
        wait_for_end(&rx);
    }

    #[test]
    fn drop_while_streaming_closes_everything() {
        let tmp = tempfile::TempDir::new().expect("tmp");
        let adb = ScriptedAdb::new();
        adb.stream_with("exec sleep 30");
        let (capture, _queue, _adb, rx) = capture(adb, tmp.path());
        capture.start(Some("ABC123"), "t-14").expect("start");
        drop(capture);
        match wait_for_end(&rx) {
            SessionEvent::CaptureEnded { requested, .. } => assert!(requested),
            other => panic!("unexpected {other:?}"),
        }
    }
}
