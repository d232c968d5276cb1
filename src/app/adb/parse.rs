use crate::app::models::{DeviceIdentity, LinkStatus};

pub const DEVICES_HEADER: &str = "List of devices attached";
const READY_STATE: &str = "device";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceListing {
    /// Whether the daemon answered with its device-list header at all.
    pub header_present: bool,
    /// Serials in the ready state, in listing order.
    pub ready_serials: Vec<String>,
}

impl DeviceListing {
    pub fn link_status(&self) -> LinkStatus {
        if !self.ready_serials.is_empty() {
            LinkStatus::Connected
        } else if !self.header_present {
            LinkStatus::BridgeMode
        } else {
            LinkStatus::NotDetected
        }
    }

    pub fn first_serial(&self) -> Option<&str> {
        self.ready_serials.first().map(String::as_str)
    }
}

/// Parses `adb devices` output. Only lines after the header count, so output without a
/// header never yields a device no matter what follows.
pub fn parse_device_listing(output: &str) -> DeviceListing {
    let mut listing = DeviceListing::default();
    for line in output.lines() {
        let trimmed = line.trim();
        if !listing.header_present {
            if trimmed.contains(DEVICES_HEADER) {
                listing.header_present = true;
            }
            continue;
        }
        if trimmed.is_empty() || trimmed.starts_with('*') {
            continue;
        }
        let mut tokens = trimmed.split_whitespace();
        let (Some(serial), Some(state)) = (tokens.next(), tokens.next()) else {
            continue;
        };
        if state == READY_STATE {
            listing.ready_serials.push(serial.to_string());
        }
    }
    listing
}

/// A `getprop` answer, or the unknown sentinel when the query produced nothing usable.
pub fn parse_property_value(output: &str) -> String {
    let value = output.lines().next().unwrap_or_default().trim();
    if value.is_empty() {
        DeviceIdentity::UNKNOWN.to_string()
    } else {
        value.to_string()
    }
}
