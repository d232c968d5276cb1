use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DeviceIdentity {
    pub serial: String,
    pub brand: String,
    pub model: String,
    pub android_version: String,
    pub connected: bool,
}

impl DeviceIdentity {
    pub const UNKNOWN: &'static str = "-";

    pub fn disconnected() -> Self {
        Self {
            serial: Self::UNKNOWN.to_string(),
            brand: Self::UNKNOWN.to_string(),
            model: Self::UNKNOWN.to_string(),
            android_version: Self::UNKNOWN.to_string(),
            connected: false,
        }
    }

    /// Key used to look up a device picture, e.g. `Acme_X1`.
    pub fn image_key(&self) -> String {
        format!("{}_{}", self.brand, self.model)
    }
}

impl Default for DeviceIdentity {
    fn default() -> Self {
        Self::disconnected()
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LinkStatus {
    Connected,
    /// The daemon did not answer with a device list (unreachable, or device in fastboot).
    BridgeMode,
    NotDetected,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StatusColor {
    Green,
    Amber,
    Red,
}

impl LinkStatus {
    pub fn color(&self) -> StatusColor {
        match self {
            LinkStatus::Connected => StatusColor::Green,
            LinkStatus::BridgeMode => StatusColor::Amber,
            LinkStatus::NotDetected => StatusColor::Red,
        }
    }

    pub fn describe(&self, serial: &str) -> String {
        match self {
            LinkStatus::Connected => format!("Device connected: {serial}"),
            LinkStatus::BridgeMode => "Bridge unavailable or device in fastboot mode".to_string(),
            LinkStatus::NotDetected => "No device detected".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StatusSnapshot {
    pub status: LinkStatus,
    pub status_text: String,
    pub color: StatusColor,
    pub identity: DeviceIdentity,
    pub image_path: PathBuf,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Severity {
    #[serde(rename = "V")]
    Verbose,
    #[serde(rename = "D")]
    Debug,
    #[serde(rename = "I")]
    Info,
    #[serde(rename = "W")]
    Warn,
    #[serde(rename = "E")]
    Error,
}

impl Severity {
    pub fn from_char(tag: char) -> Option<Self> {
        match tag {
            'V' => Some(Severity::Verbose),
            'D' => Some(Severity::Debug),
            'I' => Some(Severity::Info),
            'W' => Some(Severity::Warn),
            'E' => Some(Severity::Error),
            _ => None,
        }
    }
}

impl Default for Severity {
    fn default() -> Self {
        Severity::Info
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LogLine {
    pub text: String,
    pub severity: Severity,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LogExportResult {
    pub output_path: String,
    pub line_count: usize,
}
