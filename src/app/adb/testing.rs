//! Scripted bridge double for unit tests.

use std::collections::{HashMap, HashSet};
use std::process::{Child, Command, Stdio};
use std::sync::Mutex;
use std::time::Duration;

use super::runner::{AdbBridge, CommandOutput};
use crate::app::error::AppError;

#[derive(Default)]
pub struct ScriptedAdb {
    responses: Mutex<HashMap<String, Vec<u8>>>,
    failures: Mutex<HashSet<String>>,
    timeouts: Mutex<HashSet<String>>,
    pull_payload: Mutex<Option<Vec<u8>>>,
    stream_script: Mutex<Option<String>>,
    delay: Mutex<Option<Duration>>,
    calls: Mutex<Vec<String>>,
}

fn key(args: &[String]) -> String {
    args.join(" ")
}

impl ScriptedAdb {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn respond(&self, args: Vec<String>, stdout: impl Into<Vec<u8>>) -> &Self {
        self.responses
            .lock()
            .expect("responses")
            .insert(key(&args), stdout.into());
        self
    }

    pub fn fail(&self, args: Vec<String>) -> &Self {
        self.failures.lock().expect("failures").insert(key(&args));
        self
    }

    pub fn time_out(&self, args: Vec<String>, partial: impl Into<Vec<u8>>) -> &Self {
        self.timeouts.lock().expect("timeouts").insert(key(&args));
        self.respond(args, partial)
    }

    /// Every `pull` writes these bytes to the requested local path.
    pub fn on_pull(&self, payload: impl Into<Vec<u8>>) -> &Self {
        *self.pull_payload.lock().expect("pull") = Some(payload.into());
        self
    }

    /// `spawn_stream` runs this `sh -c` script instead of the bridge.
    pub fn stream_with(&self, script: &str) -> &Self {
        *self.stream_script.lock().expect("stream") = Some(script.to_string());
        self
    }

    /// Every `run` sleeps this long first, like a bridge that is slow to answer.
    pub fn respond_after(&self, delay: Duration) -> &Self {
        *self.delay.lock().expect("delay") = Some(delay);
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().expect("calls").clone()
    }

    pub fn count_calls(&self, needle: &str) -> usize {
        self.calls()
            .iter()
            .filter(|call| call.contains(needle))
            .count()
    }

    pub fn connected_as(serial: &str, brand: &str, model: &str, release: &str) -> Self {
        use super::commands;
        let adb = Self::new();
        adb.respond(
            commands::list_devices(),
            format!("List of devices attached\n{serial}\tdevice\n\n"),
        )
        .respond(commands::get_property(serial, commands::PROP_BRAND), brand)
        .respond(commands::get_property(serial, commands::PROP_MODEL), model)
        .respond(commands::get_property(serial, commands::PROP_RELEASE), release);
        adb
    }
}

impl AdbBridge for ScriptedAdb {
    fn run(
        &self,
        args: &[String],
        _timeout: Duration,
        trace_id: &str,
    ) -> Result<CommandOutput, AppError> {
        let call = key(args);
        self.calls.lock().expect("calls").push(call.clone());
        let delay = *self.delay.lock().expect("delay");
        if let Some(delay) = delay {
            std::thread::sleep(delay);
        }

        if self.failures.lock().expect("failures").contains(&call) {
            return Err(AppError::system(format!("scripted failure: {call}"), trace_id));
        }

        if args.get(2).map(String::as_str) == Some("pull") {
            if let (Some(payload), Some(local)) =
                (self.pull_payload.lock().expect("pull").clone(), args.get(4))
            {
                std::fs::write(local, payload).expect("write pulled file");
            }
        }

        let stdout = self
            .responses
            .lock()
            .expect("responses")
            .get(&call)
            .cloned()
            .unwrap_or_default();
        let timed_out = self.timeouts.lock().expect("timeouts").contains(&call);
        Ok(CommandOutput {
            stdout,
            stderr: String::new(),
            exit_code: if timed_out { None } else { Some(0) },
            timed_out,
        })
    }

    fn spawn_stream(&self, args: &[String], trace_id: &str) -> Result<Child, AppError> {
        self.calls.lock().expect("calls").push(format!("stream {}", key(args)));
        let script = self
            .stream_script
            .lock()
            .expect("stream")
            .clone()
            .ok_or_else(|| AppError::dependency("no stream scripted", trace_id))?;
        Command::new("sh")
            .args(["-c", &script])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|err| AppError::dependency(format!("Failed to spawn sh: {err}"), trace_id))
    }
}
