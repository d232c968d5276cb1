use std::fs;
use std::path::Path;

use chrono::Local;
use tracing::info;

use crate::app::error::AppError;
use crate::app::models::{LogExportResult, LogLine, Severity};

/// View-side filter over captured lines: a minimum level plus a keyword.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LogFilter {
    /// `None` shows every level.
    pub min_level: Option<Severity>,
    keyword: String,
}

impl LogFilter {
    pub fn new(min_level: Option<Severity>, keyword: &str) -> Self {
        Self {
            min_level,
            keyword: keyword.trim().to_lowercase(),
        }
    }

    /// Builds a filter from a level name (`ALL`, `V`, `D`, `I`, `W`, `E`) and a keyword.
    pub fn from_names(level: &str, keyword: &str) -> Self {
        Self::new(parse_level(level), keyword)
    }

    pub fn keyword(&self) -> &str {
        &self.keyword
    }

    pub fn matches(&self, line: &LogLine) -> bool {
        if let Some(min) = self.min_level {
            if line.severity < min {
                return false;
            }
        }
        self.keyword.is_empty() || line.text.to_lowercase().contains(&self.keyword)
    }

    pub fn apply<'a>(&self, lines: &'a [LogLine]) -> Vec<&'a LogLine> {
        lines.iter().filter(|line| self.matches(line)).collect()
    }
}

/// `ALL` (or blank) means no minimum; unknown names fall back to `I`.
pub fn parse_level(name: &str) -> Option<Severity> {
    let name = name.trim();
    if name.is_empty() || name.eq_ignore_ascii_case("ALL") {
        return None;
    }
    let mut chars = name.chars();
    match (chars.next(), chars.next()) {
        (Some(tag), None) => Some(Severity::from_char(tag.to_ascii_uppercase()).unwrap_or_default()),
        _ => Some(Severity::default()),
    }
}

pub fn default_export_name() -> String {
    format!("filtered_log_{}.txt", Local::now().format("%Y%m%d_%H%M%S"))
}

pub fn export_lines<S: AsRef<str>>(
    lines: &[S],
    path: &Path,
    trace_id: &str,
) -> Result<LogExportResult, AppError> {
    if lines.is_empty() {
        return Err(AppError::validation("No log lines to export", trace_id));
    }
    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|err| {
            AppError::resource(
                format!("Failed to create export directory: {err}"),
                trace_id,
            )
        })?;
    }
    let payload = lines
        .iter()
        .map(|line| line.as_ref())
        .collect::<Vec<_>>()
        .join("\n");
    fs::write(path, payload)
        .map_err(|err| AppError::resource(format!("Failed to write export: {err}"), trace_id))?;
    info!(trace_id = %trace_id, path = %path.display(), lines = lines.len(), "filtered log exported");
    Ok(LogExportResult {
        output_path: path.to_string_lossy().to_string(),
        line_count: lines.len(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::error::ErrorCode;

    fn line(text: &str, severity: Severity) -> LogLine {
        LogLine {
            text: text.to_string(),
            severity,
        }
    }

    #[test]
    fn level_names_parse_with_info_fallback() {
        assert_eq!(parse_level("ALL"), None);
        assert_eq!(parse_level("all"), None);
        assert_eq!(parse_level("w"), Some(Severity::Warn));
        assert_eq!(parse_level("E"), Some(Severity::Error));
        assert_eq!(parse_level("X"), Some(Severity::Info));
        assert_eq!(parse_level("Verbose"), Some(Severity::Info));
    }

    #[test]
    fn min_level_and_keyword_both_apply() {
        let lines = vec![
            line("D/Net: connect", Severity::Debug),
            line("W/Net: Retry", Severity::Warn),
            line("E/Disk: full", Severity::Error),
        ];
        let filter = LogFilter::from_names("W", "  NET ");
        let shown: Vec<_> = filter.apply(&lines).iter().map(|l| l.text.as_str()).collect();
        assert_eq!(shown, vec!["W/Net: Retry"]);

        assert_eq!(LogFilter::default().apply(&lines).len(), 3);
    }

    #[test]
    fn export_writes_joined_lines() {
        let tmp = tempfile::TempDir::new().expect("tmp");
        let path = tmp.path().join("nested").join(default_export_name());
        let result = export_lines(&["one", "two"], &path, "t-1").expect("export");
        assert_eq!(result.line_count, 2);
        assert_eq!(fs::read_to_string(&path).expect("read"), "one\ntwo");
    }

    #[test]
    fn export_refuses_empty_selection() {
        let tmp = tempfile::TempDir::new().expect("tmp");
        let path = tmp.path().join("out.txt");
        let err = export_lines::<&str>(&[], &path, "t-2").expect_err("empty");
        assert_eq!(err.code, ErrorCode::Validation);
        assert!(!path.exists());
    }
}
