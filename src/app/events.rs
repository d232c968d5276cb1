use std::path::PathBuf;
use std::sync::mpsc::{self, Receiver};
use std::sync::{Arc, Mutex};

use serde::Serialize;

use crate::app::error::AppError;
use crate::app::models::StatusSnapshot;

/// Notifications the session pushes out to whichever front end is attached.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "event", rename_all = "kebab-case")]
pub enum SessionEvent {
    ConnectivityChanged {
        connected: bool,
    },
    StatusSnapshot {
        snapshot: StatusSnapshot,
        trace_id: String,
    },
    /// New lines are waiting in the log queue.
    LogLineReceived {
        count: usize,
    },
    ScreenshotCaptured {
        path: PathBuf,
        trace_id: String,
    },
    CaptureStarted {
        path: PathBuf,
        trace_id: String,
    },
    CaptureEnded {
        path: PathBuf,
        exit_code: Option<i32>,
        requested: bool,
    },
    Notice {
        message: String,
    },
    Error {
        message: String,
        code: String,
        trace_id: String,
    },
}

impl SessionEvent {
    pub fn from_error(err: &AppError) -> Self {
        SessionEvent::Error {
            message: err.error.clone(),
            code: err.code.as_str().to_string(),
            trace_id: err.trace_id.clone(),
        }
    }

    pub fn notice(message: impl Into<String>) -> Self {
        SessionEvent::Notice {
            message: message.into(),
        }
    }
}

pub type EventEmitter = Arc<dyn Fn(SessionEvent) + Send + Sync>;

/// An emitter that forwards every event into a channel.
pub fn channel_emitter() -> (EventEmitter, Receiver<SessionEvent>) {
    let (tx, rx) = mpsc::channel();
    let tx = Mutex::new(tx);
    let emitter: EventEmitter = Arc::new(move |event: SessionEvent| {
        if let Ok(tx) = tx.lock() {
            let _ = tx.send(event);
        }
    });
    (emitter, rx)
}

pub fn noop_emitter() -> EventEmitter {
    Arc::new(|_event| {})
}
