use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::app::adb::runner::AdbBridge;
use crate::app::config::AppConfig;
use crate::app::device::PresenceMonitor;
use crate::app::error::AppError;
use crate::app::events::{EventEmitter, SessionEvent};
use crate::app::log_queue::LogQueue;
use crate::app::logcat::service::{CaptureOptions, LogCapture};
use crate::app::logcat::state_machine::CaptureState;
use crate::app::models::{DeviceIdentity, LogLine, StatusSnapshot};
use crate::app::scheduler::{PeriodicTask, WorkerPool};
use crate::app::screenshot::engine::{CapturedScreenshot, ScreenshotEngine, ScreenshotOptions};


pub fn resolve_trace_id(input: Option<String>) -> String {
    input
        .filter(|value| !value.trim().is_empty())
        .unwrap_or_else(|| Uuid::new_v4().to_string())
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Clears the poll in-flight flag when the poll task finishes or unwinds.
struct InFlight(Arc<AtomicBool>);

impl Drop for InFlight {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

struct SessionCore {
    monitor: PresenceMonitor,
    capture: LogCapture,
    screenshots: ScreenshotEngine,
    queue: Arc<LogQueue>,
    emitter: EventEmitter,
}

impl SessionCore {
    fn report(&self, err: &AppError) {
        warn!(trace_id = %err.trace_id, code = err.code.as_str(), error = %err.error, "session operation failed");
        (self.emitter)(SessionEvent::from_error(err));
    }

    fn capture_screenshot(&self, trace_id: &str) -> Result<CapturedScreenshot, AppError> {
        let serial = self.monitor.current_serial();
        match self.screenshots.capture(serial.as_deref(), trace_id) {
            Ok(shot) => {
                (self.emitter)(SessionEvent::notice(format!(
                    "Screenshot saved to {}",
                    shot.path.display()
                )));
                (self.emitter)(SessionEvent::ScreenshotCaptured {
                    path: shot.path.clone(),
                    trace_id: trace_id.to_string(),
                });
                Ok(shot)
            }
            Err(err) => {
                self.report(&err);
                Err(err)
            }
        }
    }
}

/// The single owner of device session state: presence polling, log capture and
/// screenshots, all reporting through one event emitter.
///
/// Blocking bridge work runs on a bounded worker pool. Start, stop and check requests are
/// expected to come from one control thread.
pub struct SessionController {
    core: Arc<SessionCore>,
    pool: Arc<WorkerPool>,
    poll_interval: Duration,
    poller: Mutex<Option<PeriodicTask>>,
}

impl SessionController {
    pub fn new(bridge: Arc<dyn AdbBridge>, config: &AppConfig, emitter: EventEmitter) -> Self {
        let queue = Arc::new(LogQueue::new());
        let core = SessionCore {
            monitor: PresenceMonitor::from_settings(
                Arc::clone(&bridge),
                Arc::clone(&emitter),
                &config.device,
            ),
            capture: LogCapture::new(
                Arc::clone(&bridge),
                Arc::clone(&queue),
                Arc::clone(&emitter),
                CaptureOptions::from(&config.capture),
            ),
            screenshots: ScreenshotEngine::new(bridge, ScreenshotOptions::from(&config.screenshot)),
            queue,
            emitter,
        };
        Self {
            core: Arc::new(core),
            pool: Arc::new(WorkerPool::new(config.workers.pool_size)),
            poll_interval: Duration::from_millis(config.device.poll_interval_ms),
            poller: Mutex::new(None),
        }
    }

    pub fn drain_log_lines(&self) -> Vec<LogLine> {
        self.core.queue.drain_all()
    }

    pub fn is_connected(&self) -> bool {
        self.core.monitor.is_connected()
    }

    pub fn identity(&self) -> DeviceIdentity {
        self.core.monitor.identity()
    }

    pub fn capture_state(&self) -> CaptureState {
        self.core.capture.state()
    }

    pub fn current_log_path(&self) -> Option<PathBuf> {
        self.core.capture.current_log_path()
    }

    /// Polls every configured interval, starting now. Each tick is handed to the worker
    /// pool; a tick that finds the previous poll still running is skipped.
    pub fn start_polling(&self) -> Result<(), AppError> {
        let mut poller = lock(&self.poller);
        if poller.is_some() {
            return Ok(());
        }
        let core = Arc::clone(&self.core);
        let pool = Arc::clone(&self.pool);
        let in_flight = Arc::new(AtomicBool::new(false));
        let task = PeriodicTask::start("device-poller", self.poll_interval, move || {
            if in_flight.swap(true, Ordering::SeqCst) {
                debug!("previous device poll still running; skipping tick");
                return;
            }
            let core = Arc::clone(&core);
            let guard = InFlight(Arc::clone(&in_flight));
            let scheduled = pool.spawn("device-poll", move || {
                let _guard = guard;
                let trace_id = resolve_trace_id(None);
                core.monitor.poll(&trace_id);
            });
            if scheduled.is_err() {
                in_flight.store(false, Ordering::SeqCst);
            }
        })
        .map_err(|err| AppError::system(format!("Failed to start device polling: {err}"), ""))?;
        info!(interval_ms = self.poll_interval.as_millis() as u64, "device polling started");
        *poller = Some(task);
        Ok(())
    }

    pub fn stop_polling(&self) {
        if let Some(task) = lock(&self.poller).take() {
            task.stop();
            info!("device polling stopped");
        }
    }

    /// Schedules an immediate poll on the worker pool and returns its trace id.
    pub fn check_status_now(&self, trace_id: Option<String>) -> Result<String, AppError> {
        let trace_id = resolve_trace_id(trace_id);
        let core = Arc::clone(&self.core);
        let task_trace = trace_id.clone();
        self.pool
            .spawn("device-check", move || {
                core.monitor.poll(&task_trace);
            })
            .map_err(|err| {
                let err = AppError::system(format!("Failed to schedule status check: {err}"), &trace_id);
                self.core.report(&err);
                err
            })?;
        Ok(trace_id)
    }

    pub fn check_status_blocking(&self, trace_id: Option<String>) -> StatusSnapshot {
        let trace_id = resolve_trace_id(trace_id);
        self.core.monitor.poll(&trace_id)
    }

    pub fn start_capture(&self, trace_id: Option<String>) -> Result<PathBuf, AppError> {
        let trace_id = resolve_trace_id(trace_id);
        let serial = self.core.monitor.current_serial();
        self.core
            .capture
            .start(serial.as_deref(), &trace_id)
            .inspect_err(|err| self.core.report(err))
    }

    /// Returns `false` when nothing was running.
    pub fn stop_capture(&self, trace_id: Option<String>) -> bool {
        let trace_id = resolve_trace_id(trace_id);
        let stopped = self.core.capture.stop(&trace_id);
        if stopped {
            (self.core.emitter)(SessionEvent::notice("Log capture stopped"));
        }
        stopped
    }

    pub fn clear_device_log_buffer(&self, trace_id: Option<String>) -> Result<(), AppError> {
        let trace_id = resolve_trace_id(trace_id);
        let Some(serial) = self.core.monitor.current_serial() else {
            let err = AppError::validation("No ADB device connected", &trace_id);
            self.core.report(&err);
            return Err(err);
        };
        self.core.capture.clear_device_buffer(&serial, &trace_id);
        (self.core.emitter)(SessionEvent::notice("Device log buffer cleared"));
        Ok(())
    }

    /// Runs the screenshot chain on the worker pool; the outcome arrives as an event.
    pub fn capture_screenshot_now(&self, trace_id: Option<String>) -> Result<String, AppError> {
        let trace_id = resolve_trace_id(trace_id);
        if !self.core.monitor.is_connected() {
            let err = AppError::validation("No ADB device connected", &trace_id);
            self.core.report(&err);
            return Err(err);
        }
        let core = Arc::clone(&self.core);
        let task_trace = trace_id.clone();
        self.pool
            .spawn("screenshot", move || {
                let _ = core.capture_screenshot(&task_trace);
            })
            .map_err(|err| {
                let err = AppError::system(format!("Failed to schedule screenshot: {err}"), &trace_id);
                self.core.report(&err);
                err
            })?;
        Ok(trace_id)
    }

    pub fn capture_screenshot_blocking(
        &self,
        trace_id: Option<String>,
    ) -> Result<CapturedScreenshot, AppError> {
        let trace_id = resolve_trace_id(trace_id);
        self.core.capture_screenshot(&trace_id)
    }

    pub fn shutdown(&self) {
        self.stop_polling();
        self.core.capture.stop("shutdown");
        self.pool.shutdown();
    }
}

impl Drop for SessionController {
    fn drop(&mut self) {
        self.shutdown();
    }
}
