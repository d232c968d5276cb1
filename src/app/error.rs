use serde::Serialize;
use std::fmt;

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
pub enum ErrorCode {
    #[serde(rename = "ERR_VALIDATION")]
    Validation,
    #[serde(rename = "ERR_DEPENDENCY")]
    Dependency,
    #[serde(rename = "ERR_RESOURCE")]
    Resource,
    #[serde(rename = "ERR_SYSTEM")]
    System,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::Validation => "ERR_VALIDATION",
            ErrorCode::Dependency => "ERR_DEPENDENCY",
            ErrorCode::Resource => "ERR_RESOURCE",
            ErrorCode::System => "ERR_SYSTEM",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct AppError {
    pub error: String,
    pub code: ErrorCode,
    pub trace_id: String,
}

impl AppError {
    pub fn new(code: ErrorCode, message: impl Into<String>, trace_id: impl Into<String>) -> Self {
        Self {
            error: message.into(),
            code,
            trace_id: trace_id.into(),
        }
    }

    /// Precondition failures: no device, capture already running, empty export.
    pub fn validation(message: impl Into<String>, trace_id: impl Into<String>) -> Self {
        Self::new(ErrorCode::Validation, message, trace_id)
    }

    /// The bridge tool or the device did not deliver what was asked for.
    pub fn dependency(message: impl Into<String>, trace_id: impl Into<String>) -> Self {
        Self::new(ErrorCode::Dependency, message, trace_id)
    }

    /// Local files and directories.
    pub fn resource(message: impl Into<String>, trace_id: impl Into<String>) -> Self {
        Self::new(ErrorCode::Resource, message, trace_id)
    }

    pub fn system(message: impl Into<String>, trace_id: impl Into<String>) -> Self {
        Self::new(ErrorCode::System, message, trace_id)
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.error, self.code.as_str())
    }
}

impl std::error::Error for AppError {}
