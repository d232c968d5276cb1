use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};
use std::process::{Child, ExitStatus};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

use tracing::{error, info, warn};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Handles owned by one capture session, shared between the controller and the reader thread.
///
/// The output file stays open until `close_file` runs, which both the stop path and the
/// exit path call; whichever comes first closes it and the other is a no-op.
pub struct LogSession {
    pub id: u64,
    pub path: PathBuf,
    pub trace_id: String,
    stop_flag: AtomicBool,
    file: Mutex<Option<File>>,
    child: Mutex<Option<Child>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    Exited(Option<i32>),
    /// Still running after the wait bound; left to exit on its own.
    Abandoned,
    /// Someone else already reaped the process.
    AlreadyGone,
}

impl LogSession {
    pub fn new(id: u64, path: PathBuf, trace_id: String, file: File, child: Child) -> Self {
        Self {
            id,
            path,
            trace_id,
            stop_flag: AtomicBool::new(false),
            file: Mutex::new(Some(file)),
            child: Mutex::new(Some(child)),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn stop_flag(&self) -> &AtomicBool {
        &self.stop_flag
    }

    pub fn is_stop_requested(&self) -> bool {
        self.stop_flag.load(Ordering::SeqCst)
    }

    pub fn is_file_open(&self) -> bool {
        lock(&self.file).is_some()
    }

    /// Runs `f` with the output file, or `None` once it has been closed.
    pub fn with_file<R>(&self, f: impl FnOnce(Option<&mut File>) -> R) -> R {
        let mut guard = lock(&self.file);
        f(guard.as_mut())
    }

    pub fn close_file(&self) -> bool {
        let Some(file) = lock(&self.file).take() else {
            return false;
        };
        if let Err(err) = file.sync_all() {
            warn!(trace_id = %self.trace_id, error = %err, path = %self.path.display(), "failed to sync log file");
        }
        drop(file);
        info!(trace_id = %self.trace_id, path = %self.path.display(), "log file closed");
        true
    }

    fn take_child(&self) -> Option<Child> {
        lock(&self.child).take()
    }

    /// Sets the stop flag, asks the process to terminate and waits up to `wait` for it.
    pub fn terminate(&self, wait: Duration) -> Termination {
        self.stop_flag.store(true, Ordering::SeqCst);
        let Some(mut child) = self.take_child() else {
            return Termination::AlreadyGone;
        };
        if let Err(err) = request_terminate(&mut child) {
            warn!(trace_id = %self.trace_id, error = %err, "failed to signal capture process");
        }
        match wait_with_deadline(&mut child, wait) {
            Ok(Some(status)) => Termination::Exited(status.code()),
            Ok(None) => {
                error!(
                    trace_id = %self.trace_id,
                    pid = child.id(),
                    wait_ms = wait.as_millis() as u64,
                    "capture process did not exit in time; abandoning it"
                );
                Termination::Abandoned
            }
            Err(err) => {
                warn!(trace_id = %self.trace_id, error = %err, "failed to wait for capture process");
                Termination::Abandoned
            }
        }
    }

    /// Reaps the process after its output ended on its own.
    pub fn reap(&self, wait: Duration) -> Termination {
        let Some(mut child) = self.take_child() else {
            return Termination::AlreadyGone;
        };
        match wait_with_deadline(&mut child, wait) {
            Ok(Some(status)) => Termination::Exited(status.code()),
            Ok(None) => {
                warn!(trace_id = %self.trace_id, "capture output closed but process is still running");
                Termination::Abandoned
            }
            Err(err) => {
                warn!(trace_id = %self.trace_id, error = %err, "failed to wait for capture process");
                Termination::Abandoned
            }
        }
    }
}

/// Graceful termination: SIGTERM on unix, the platform kill elsewhere.
#[cfg(unix)]
pub fn request_terminate(child: &mut Child) -> io::Result<()> {
    if child.try_wait()?.is_some() {
        return Ok(());
    }
    let pid = libc::pid_t::try_from(child.id())
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "pid out of range"))?;
    // SAFETY: `pid` belongs to a child we have not reaped yet, so it cannot have been recycled.
    let rc = unsafe { libc::kill(pid, libc::SIGTERM) };
    if rc == 0 {
        Ok(())
    } else {
        Err(io::Error::last_os_error())
    }
}

#[cfg(not(unix))]
pub fn request_terminate(child: &mut Child) -> io::Result<()> {
    child.kill()
}

pub fn wait_with_deadline(child: &mut Child, timeout: Duration) -> io::Result<Option<ExitStatus>> {
    let start = Instant::now();
    loop {
        if let Some(status) = child.try_wait()? {
            return Ok(Some(status));
        }
        if start.elapsed() >= timeout {
            return Ok(None);
        }
        std::thread::sleep(Duration::from_millis(20));
    }
}
