use std::io::Read;
use std::process::{Child, Command, Stdio};
use std::time::{Duration, Instant};

use crate::app::error::AppError;

pub const QUERY_TIMEOUT: Duration = Duration::from_millis(3000);

#[derive(Debug, Clone, Default)]
pub struct CommandOutput {
    pub stdout: Vec<u8>,
    pub stderr: String,
    pub exit_code: Option<i32>,
    /// The child was still running at the deadline; `stdout` holds whatever arrived before it.
    pub timed_out: bool,
}

impl CommandOutput {
    pub fn stdout_text(&self) -> String {
        String::from_utf8_lossy(&self.stdout).trim().to_string()
    }
}

/// Runs `program` and waits up to `timeout` for it to finish.
///
/// A non-zero exit status is not an error: callers judge success by the output they got.
/// On timeout the child is killed and the partial stdout is returned with `timed_out` set.
/// Only a failure to spawn or poll the process is reported as `Err`.
pub fn run_command_with_timeout(
    program: &str,
    args: &[String],
    timeout: Duration,
    trace_id: &str,
) -> Result<CommandOutput, AppError> {
    let mut child = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|err| AppError::system(format!("Failed to spawn {program}: {err}"), trace_id))?;

    // Drain stdout/stderr in parallel; otherwise, a chatty child process can block once the pipe
    // buffer fills, and we will incorrectly hit the timeout.
    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| AppError::system("Failed to capture stdout", trace_id))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| AppError::system("Failed to capture stderr", trace_id))?;

    let stdout_handle = std::thread::spawn(move || read_to_end_lossless(stdout));
    let stderr_handle = std::thread::spawn(move || read_to_end_lossless(stderr));

    let start = Instant::now();
    let mut timed_out = false;
    let exit_code = loop {
        match child.try_wait() {
            Ok(Some(status)) => break status.code(),
            Ok(None) => {
                if start.elapsed() > timeout {
                    let _ = child.kill();
                    let _ = child.wait();
                    timed_out = true;
                    break None;
                }
                std::thread::sleep(Duration::from_millis(20));
            }
            Err(err) => {
                let _ = child.kill();
                let _ = child.wait();
                let _ = stdout_handle.join();
                let _ = stderr_handle.join();
                return Err(AppError::system(
                    format!("Failed to poll command: {err}"),
                    trace_id,
                ));
            }
        }
    };

    let stdout_bytes = stdout_handle.join().unwrap_or_default();
    let stderr_bytes = stderr_handle.join().unwrap_or_default();

    Ok(CommandOutput {
        stdout: stdout_bytes,
        stderr: String::from_utf8_lossy(&stderr_bytes).to_string(),
        exit_code,
        timed_out,
    })
}

fn read_to_end_lossless(mut reader: impl Read) -> Vec<u8> {
    let mut buffer = Vec::<u8>::new();
    let mut temp = [0u8; 4096];
    loop {
        match reader.read(&mut temp) {
            Ok(0) => break,
            Ok(count) => buffer.extend_from_slice(&temp[..count]),
            Err(_) => break,
        }
    }
    buffer
}

/// The seam between the session logic and the external bridge tool.
pub trait AdbBridge: Send + Sync {
    /// One-shot invocation with a bounded wait.
    fn run(&self, args: &[String], timeout: Duration, trace_id: &str)
        -> Result<CommandOutput, AppError>;

    /// Long-running invocation with piped stdout and stderr, owned by the caller.
    fn spawn_stream(&self, args: &[String], trace_id: &str) -> Result<Child, AppError>;
}

#[derive(Debug, Clone)]
pub struct HostAdb {
    program: String,
}

impl HostAdb {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

impl AdbBridge for HostAdb {
    fn run(
        &self,
        args: &[String],
        timeout: Duration,
        trace_id: &str,
    ) -> Result<CommandOutput, AppError> {
        run_command_with_timeout(&self.program, args, timeout, trace_id)
    }

    fn spawn_stream(&self, args: &[String], trace_id: &str) -> Result<Child, AppError> {
        Command::new(&self.program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|err| {
                AppError::dependency(format!("Failed to start {}: {err}", self.program), trace_id)
            })
    }
}
