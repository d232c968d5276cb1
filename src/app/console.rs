use std::io::{BufRead, Write};
use std::path::PathBuf;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::thread;
use std::time::Duration;

use tracing::{debug, warn};

use crate::app::error::AppError;
use crate::app::events::SessionEvent;
use crate::app::filter::{default_export_name, export_lines, LogFilter};
use crate::app::models::LogLine;
use crate::app::session::{resolve_trace_id, SessionController};

pub const HELP: &str =
    "commands: status | start | stop | clear | shot | filter <ALL|V|D|I|W|E> [keyword] | export [path] | quit";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleCommand {
    Status,
    Start,
    Stop,
    Clear,
    Shot,
    Filter { level: String, keyword: String },
    Export(Option<PathBuf>),
    Help,
    Quit,
}

pub fn parse_command(input: &str) -> Result<ConsoleCommand, String> {
    let input = input.trim();
    let (verb, rest) = match input.split_once(char::is_whitespace) {
        Some((verb, rest)) => (verb, rest.trim()),
        None => (input, ""),
    };
    match verb.to_ascii_lowercase().as_str() {
        "status" => Ok(ConsoleCommand::Status),
        "start" => Ok(ConsoleCommand::Start),
        "stop" => Ok(ConsoleCommand::Stop),
        "clear" => Ok(ConsoleCommand::Clear),
        "shot" | "screenshot" => Ok(ConsoleCommand::Shot),
        "filter" => {
            let (level, keyword) = match rest.split_once(char::is_whitespace) {
                Some((level, keyword)) => (level, keyword.trim()),
                None => (rest, ""),
            };
            Ok(ConsoleCommand::Filter {
                level: if level.is_empty() { "ALL" } else { level }.to_string(),
                keyword: keyword.to_string(),
            })
        }
        "export" => Ok(ConsoleCommand::Export(
            (!rest.is_empty()).then(|| PathBuf::from(rest)),
        )),
        "help" | "?" => Ok(ConsoleCommand::Help),
        "quit" | "exit" => Ok(ConsoleCommand::Quit),
        "" => Err("empty command".to_string()),
        other => Err(format!("unknown command: {other}")),
    }
}

/// Everything captured this run plus the subset the active filter lets through.
#[derive(Debug, Default)]
pub struct ConsoleView {
    filter: LogFilter,
    history: Vec<LogLine>,
}

impl ConsoleView {
    pub fn new(filter: LogFilter) -> Self {
        Self {
            filter,
            history: Vec::new(),
        }
    }

    /// Stores `lines` and returns the ones the filter shows.
    pub fn ingest(&mut self, lines: Vec<LogLine>) -> Vec<LogLine> {
        let shown = lines
            .iter()
            .filter(|line| self.filter.matches(line))
            .cloned()
            .collect();
        self.history.extend(lines);
        shown
    }

    pub fn set_filter(&mut self, filter: LogFilter) {
        self.filter = filter;
    }

    pub fn visible(&self) -> Vec<&str> {
        self.filter
            .apply(&self.history)
            .into_iter()
            .map(|line| line.text.as_str())
            .collect()
    }
}

pub struct Console<W: Write> {
    session: SessionController,
    events: Receiver<SessionEvent>,
    view: ConsoleView,
    drain_interval: Duration,
    out: W,
}

impl<W: Write> Console<W> {
    pub fn new(
        session: SessionController,
        events: Receiver<SessionEvent>,
        filter: LogFilter,
        drain_interval: Duration,
        out: W,
    ) -> Self {
        Self {
            session,
            events,
            view: ConsoleView::new(filter),
            drain_interval,
            out,
        }
    }

    /// Reads commands from `input` until `quit` or end of input, draining logs and events
    /// every `drain_interval` in between.
    pub fn run<R: BufRead + Send + 'static>(mut self, input: R) -> Result<(), AppError> {
        let (tx, commands) = mpsc::channel::<String>();
        thread::Builder::new()
            .name("console-input".to_string())
            .spawn(move || {
                for line in input.lines() {
                    let Ok(line) = line else { break };
                    if tx.send(line).is_err() {
                        break;
                    }
                }
            })
            .map_err(|err| AppError::system(format!("Failed to read console input: {err}"), ""))?;

        self.print(HELP)?;
        loop {
            match commands.recv_timeout(self.drain_interval) {
                Ok(line) => {
                    if line.trim().is_empty() {
                        continue;
                    }
                    match parse_command(&line) {
                        Ok(ConsoleCommand::Quit) => break,
                        Ok(command) => self.execute(command)?,
                        Err(message) => self.print(&format!("{message}\n{HELP}"))?,
                    }
                }
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => break,
            }
            self.pump()?;
        }
        // Let in-flight work report before the session goes away.
        thread::sleep(self.drain_interval);
        self.pump()?;
        self.session.shutdown();
        self.pump()
    }

    fn execute(&mut self, command: ConsoleCommand) -> Result<(), AppError> {
        let trace_id = resolve_trace_id(None);
        debug!(trace_id = %trace_id, command = ?command, "console command");
        // Failures already arrive as error events; only outcomes worth a line are printed.
        match command {
            ConsoleCommand::Status => {
                let _ = self.session.check_status_now(Some(trace_id));
            }
            ConsoleCommand::Start => {
                let _ = self.session.start_capture(Some(trace_id));
            }
            ConsoleCommand::Stop => {
                if !self.session.stop_capture(Some(trace_id)) {
                    self.print("no log capture running")?;
                }
            }
            ConsoleCommand::Clear => {
                let _ = self.session.clear_device_log_buffer(Some(trace_id));
            }
            ConsoleCommand::Shot => {
                let _ = self.session.capture_screenshot_now(Some(trace_id));
            }
            ConsoleCommand::Filter { level, keyword } => {
                self.view.set_filter(LogFilter::from_names(&level, &keyword));
                let visible: Vec<String> =
                    self.view.visible().into_iter().map(str::to_string).collect();
                self.print(&format!("filter applied, {} lines shown", visible.len()))?;
                for line in visible {
                    self.print(&line)?;
                }
            }
            ConsoleCommand::Export(path) => {
                let path = path.unwrap_or_else(|| PathBuf::from(default_export_name()));
                let visible = self.view.visible();
                match export_lines(&visible, &path, &trace_id) {
                    Ok(result) => self.print(&format!(
                        "exported {} lines to {}",
                        result.line_count, result.output_path
                    ))?,
                    Err(err) => {
                        warn!(trace_id = %trace_id, error = %err.error, "export failed");
                        self.print(&format!("export failed: {}", err.error))?
                    }
                }
            }
            ConsoleCommand::Help => self.print(HELP)?,
            ConsoleCommand::Quit => {}
        }
        Ok(())
    }

    /// Prints pending events as JSON lines and newly captured lines that pass the filter.
    fn pump(&mut self) -> Result<(), AppError> {
        let events: Vec<SessionEvent> = self.events.try_iter().collect();
        for event in events {
            if matches!(event, SessionEvent::LogLineReceived { .. }) {
                continue;
            }
            let payload = serde_json::to_string(&event)
                .map_err(|err| AppError::system(format!("Failed to encode event: {err}"), ""))?;
            self.print(&payload)?;
        }
        let shown = self.view.ingest(self.session.drain_log_lines());
        for line in shown {
            self.print(&line.text)?;
        }
        Ok(())
    }

    fn print(&mut self, text: &str) -> Result<(), AppError> {
        writeln!(self.out, "{text}")
            .and_then(|_| self.out.flush())
            .map_err(|err| AppError::system(format!("Failed to write output: {err}"), ""))
    }
}
