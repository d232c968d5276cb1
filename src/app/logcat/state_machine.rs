use serde::Serialize;

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CaptureState {
    Idle,
    Starting,
    Streaming,
    Stopping,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureRejection {
    NoDevice,
    AlreadyRunning,
}

impl CaptureRejection {
    pub fn message(&self) -> &'static str {
        match self {
            CaptureRejection::NoDevice => "No ADB device connected",
            CaptureRejection::AlreadyRunning => "Log capture already in progress",
        }
    }
}

/// How a process exit relates to the session the machine is tracking.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitDisposition {
    /// The process died on its own while streaming; the machine is now idle.
    Unsolicited,
    /// A stop is in flight for this session and will finish the transition.
    DuringStop,
    /// The session was already torn down (or never was the active one).
    Stale,
}

/// Lifecycle of the single capture session: `Idle → Starting → Streaming → Stopping → Idle`.
///
/// Every session gets a fresh id so late notifications from a finished session cannot
/// disturb the next one.
#[derive(Debug)]
pub struct CaptureStateMachine {
    state: CaptureState,
    active: Option<u64>,
    next_id: u64,
}

impl Default for CaptureStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl CaptureStateMachine {
    pub fn new() -> Self {
        Self {
            state: CaptureState::Idle,
            active: None,
            next_id: 1,
        }
    }

    pub fn state(&self) -> CaptureState {
        self.state
    }

    pub fn active_session(&self) -> Option<u64> {
        self.active
    }

    pub fn begin_start(&mut self, device_connected: bool) -> Result<u64, CaptureRejection> {
        if !device_connected {
            return Err(CaptureRejection::NoDevice);
        }
        if self.state != CaptureState::Idle {
            return Err(CaptureRejection::AlreadyRunning);
        }
        let id = self.next_id;
        self.next_id += 1;
        self.state = CaptureState::Starting;
        self.active = Some(id);
        Ok(id)
    }

    /// Setup failed before the process was running.
    pub fn abort_start(&mut self, id: u64) {
        if self.active == Some(id) && self.state == CaptureState::Starting {
            self.state = CaptureState::Idle;
            self.active = None;
        }
    }

    pub fn mark_streaming(&mut self, id: u64) -> bool {
        if self.active == Some(id) && self.state == CaptureState::Starting {
            self.state = CaptureState::Streaming;
            return true;
        }
        false
    }

    /// Returns the session to tear down, or `None` when there is nothing streaming.
    pub fn begin_stop(&mut self) -> Option<u64> {
        if self.state != CaptureState::Streaming {
            return None;
        }
        self.state = CaptureState::Stopping;
        self.active
    }

    pub fn finish_stop(&mut self, id: u64) {
        if self.active == Some(id) && self.state == CaptureState::Stopping {
            self.state = CaptureState::Idle;
            self.active = None;
        }
    }

    pub fn process_exited(&mut self, id: u64) -> ExitDisposition {
        if self.active != Some(id) {
            return ExitDisposition::Stale;
        }
        match self.state {
            CaptureState::Streaming | CaptureState::Starting => {
                self.state = CaptureState::Idle;
                self.active = None;
                ExitDisposition::Unsolicited
            }
            CaptureState::Stopping => ExitDisposition::DuringStop,
            CaptureState::Idle => ExitDisposition::Stale,
        }
    }
}
