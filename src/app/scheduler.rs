use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tracing::{debug, warn};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

type Job = Box<dyn FnOnce() + Send + 'static>;

struct Task {
    name: String,
    job: Job,
}

/// Runs blocking bridge work off the caller's thread on at most `limit` long-lived workers.
///
/// Workers are started on demand up to the limit; extra tasks wait in the queue.
pub struct WorkerPool {
    limit: usize,
    sender: Mutex<Option<Sender<Task>>>,
    receiver: Arc<Mutex<Receiver<Task>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl WorkerPool {
    pub fn new(limit: usize) -> Self {
        let (sender, receiver) = mpsc::channel();
        Self {
            limit: limit.max(1),
            sender: Mutex::new(Some(sender)),
            receiver: Arc::new(Mutex::new(receiver)),
            workers: Mutex::new(Vec::new()),
        }
    }

    pub fn worker_count(&self) -> usize {
        lock(&self.workers).len()
    }

    pub fn spawn<F>(&self, name: &str, task: F) -> io::Result<()>
    where
        F: FnOnce() + Send + 'static,
    {
        self.ensure_worker()
            .inspect_err(|err| warn!(task = %name, error = %err, "failed to spawn worker"))?;
        let sender = lock(&self.sender);
        let Some(sender) = sender.as_ref() else {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "worker pool is shut down"));
        };
        sender
            .send(Task {
                name: name.to_string(),
                job: Box::new(task),
            })
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "worker pool is shut down"))
    }

    fn ensure_worker(&self) -> io::Result<()> {
        let mut workers = lock(&self.workers);
        if workers.len() >= self.limit {
            return Ok(());
        }
        let receiver = Arc::clone(&self.receiver);
        let handle = thread::Builder::new()
            .name(format!("worker-{}", workers.len()))
            .spawn(move || worker_loop(&receiver))?;
        workers.push(handle);
        Ok(())
    }

    /// Stops accepting tasks; workers exit once the queue is drained.
    pub fn shutdown(&self) {
        lock(&self.sender).take();
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn worker_loop(receiver: &Mutex<Receiver<Task>>) {
    loop {
        let next = lock(receiver).recv();
        let Ok(Task { name, job }) = next else {
            break;
        };
        debug!(task = %name, "worker task started");
        if panic::catch_unwind(AssertUnwindSafe(job)).is_err() {
            warn!(task = %name, "worker task panicked");
        }
    }
}

/// Sleeps in short slices so a stop request is honoured within ~50ms.
pub fn sleep_with_stop(duration: Duration, stop_flag: &AtomicBool) {
    let deadline = Instant::now() + duration;
    while !stop_flag.load(Ordering::Relaxed) {
        let now = Instant::now();
        if now >= deadline {
            break;
        }
        thread::sleep((deadline - now).min(Duration::from_millis(50)));
    }
}

/// A cancellable timer that invokes `tick` every `interval`, starting immediately.
///
/// Ticks run on the timer thread; a tick that dispatches work elsewhere may overlap the
/// next one, so whatever it triggers must tolerate concurrent runs.
pub struct PeriodicTask {
    stop_flag: Arc<AtomicBool>,
    join: JoinHandle<()>,
}

impl PeriodicTask {
    pub fn start<F>(name: &str, interval: Duration, mut tick: F) -> std::io::Result<Self>
    where
        F: FnMut() + Send + 'static,
    {
        let stop_flag = Arc::new(AtomicBool::new(false));
        let stop_thread = Arc::clone(&stop_flag);
        let join = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                while !stop_thread.load(Ordering::Relaxed) {
                    tick();
                    sleep_with_stop(interval, &stop_thread);
                }
            })?;
        Ok(Self { stop_flag, join })
    }

    pub fn stop(self) {
        self.stop_flag.store(true, Ordering::Relaxed);
        let _ = self.join.join();
    }
}
