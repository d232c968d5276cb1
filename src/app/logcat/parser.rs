use std::io::{self, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::OnceLock;

use regex::Regex;

use crate::app::log_queue::LogQueue;
use crate::app::models::{LogLine, Severity};

fn severity_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\b([VDIWE])(?:[/\s]|$)").expect("severity regex"))
}

/// First standalone `V`/`D`/`I`/`W`/`E` token in the line, `I` when there is none.
pub fn severity_of(line: &str) -> Severity {
    severity_regex()
        .captures(line)
        .and_then(|caps| caps.get(1))
        .and_then(|tag| tag.as_str().chars().next())
        .and_then(Severity::from_char)
        .unwrap_or_default()
}

pub fn to_log_line(raw: &str) -> Option<LogLine> {
    let text = raw.trim();
    if text.is_empty() {
        return None;
    }
    Some(LogLine {
        text: text.to_string(),
        severity: severity_of(text),
    })
}

/// Splits streamed output into lines, holding back a trailing fragment until its newline
/// arrives in a later chunk.
///
/// Lines are decoded only once complete, so a multibyte character split across reads
/// survives intact.
#[derive(Debug, Default)]
pub struct LineAssembler {
    pending: Vec<u8>,
}

impl LineAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_chunk(&mut self, chunk: &[u8]) -> Vec<LogLine> {
        self.pending.extend_from_slice(chunk);
        let Some(last_newline) = self.pending.iter().rposition(|&byte| byte == b'\n') else {
            return Vec::new();
        };
        let rest = self.pending.split_off(last_newline + 1);
        let complete = std::mem::replace(&mut self.pending, rest);
        complete
            .split(|&byte| byte == b'\n')
            .filter_map(|raw| to_log_line(&String::from_utf8_lossy(raw)))
            .collect()
    }

    /// Returns the held-back fragment, if it is a non-empty line.
    pub fn finish(&mut self) -> Option<LogLine> {
        let rest = std::mem::take(&mut self.pending);
        to_log_line(&String::from_utf8_lossy(&rest))
    }
}

/// Handles one chunk of capture output: append it verbatim to `sink` with an immediate
/// flush, then queue the complete lines it finishes. Returns the number of lines queued.
///
/// Once `stop_flag` is set the chunk is dropped untouched.
pub fn process_chunk<W: Write>(
    chunk: &[u8],
    stop_flag: &AtomicBool,
    assembler: &mut LineAssembler,
    sink: Option<&mut W>,
    queue: &LogQueue,
) -> io::Result<usize> {
    if stop_flag.load(Ordering::SeqCst) || chunk.is_empty() {
        return Ok(0);
    }
    let write_result = match sink {
        Some(sink) => sink.write_all(chunk).and_then(|_| sink.flush()),
        None => Ok(()),
    };
    let lines = assembler.push_chunk(chunk);
    let count = lines.len();
    queue.extend(lines);
    write_result.map(|_| count)
}
