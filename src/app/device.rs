use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::app::adb::commands;
use crate::app::adb::parse::{parse_device_listing, parse_property_value};
use crate::app::adb::runner::AdbBridge;
use crate::app::config::DeviceSettings;
use crate::app::events::{EventEmitter, SessionEvent};
use crate::app::models::{DeviceIdentity, LinkStatus, StatusSnapshot};

/// Where device pictures live and what to show when none matches.
#[derive(Debug, Clone)]
pub struct ImageAssets {
    pub dir: PathBuf,
    pub placeholder: PathBuf,
}

impl ImageAssets {
    pub fn new(dir: impl Into<PathBuf>, placeholder_name: &str) -> Self {
        let dir = dir.into();
        let placeholder = dir.join(placeholder_name);
        Self { dir, placeholder }
    }

    /// `<dir>/<brand>_<model>.png` when it exists, the placeholder otherwise.
    pub fn lookup(&self, identity: &DeviceIdentity) -> PathBuf {
        if identity.connected {
            let candidate = self.dir.join(format!("{}.png", identity.image_key()));
            if candidate.is_file() {
                return candidate;
            }
        }
        self.placeholder.clone()
    }
}

/// Polls the bridge for device presence and identity.
///
/// Polls may overlap. Each one builds its identity from scratch and swaps it in whole, and
/// the connectivity flag is flipped with a single atomic swap, so a change notification
/// fires once per real transition no matter how polls interleave.
pub struct PresenceMonitor {
    bridge: Arc<dyn AdbBridge>,
    emitter: EventEmitter,
    assets: ImageAssets,
    query_timeout: Duration,
    connected: AtomicBool,
    identity: RwLock<DeviceIdentity>,
}

impl PresenceMonitor {
    pub fn new(
        bridge: Arc<dyn AdbBridge>,
        emitter: EventEmitter,
        assets: ImageAssets,
        query_timeout: Duration,
    ) -> Self {
        Self {
            bridge,
            emitter,
            assets,
            query_timeout,
            connected: AtomicBool::new(false),
            identity: RwLock::new(DeviceIdentity::disconnected()),
        }
    }

    pub fn from_settings(
        bridge: Arc<dyn AdbBridge>,
        emitter: EventEmitter,
        settings: &DeviceSettings,
    ) -> Self {
        Self::new(
            bridge,
            emitter,
            ImageAssets::new(&settings.image_dir, &settings.placeholder_image),
            Duration::from_millis(settings.query_timeout_ms),
        )
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    pub fn identity(&self) -> DeviceIdentity {
        self.identity
            .read()
            .map(|identity| identity.clone())
            .unwrap_or_else(|poisoned| poisoned.into_inner().clone())
    }

    /// Serial of the connected device, `None` while disconnected.
    pub fn current_serial(&self) -> Option<String> {
        let identity = self.identity();
        (self.is_connected() && identity.connected).then_some(identity.serial)
    }

    /// One poll: list devices, fetch identity for the first ready one, publish the result.
    pub fn poll(&self, trace_id: &str) -> StatusSnapshot {
        let listing_output = self.query(&commands::list_devices(), trace_id);
        let listing = parse_device_listing(&listing_output);
        let status = listing.link_status();

        let identity = match listing.first_serial() {
            Some(serial) => DeviceIdentity {
                serial: serial.to_string(),
                brand: self.property(serial, commands::PROP_BRAND, trace_id),
                model: self.property(serial, commands::PROP_MODEL, trace_id),
                android_version: self.property(serial, commands::PROP_RELEASE, trace_id),
                connected: true,
            },
            None => DeviceIdentity::disconnected(),
        };

        let snapshot = StatusSnapshot {
            status,
            status_text: status.describe(&identity.serial),
            color: status.color(),
            image_path: self.assets.lookup(&identity),
            identity: identity.clone(),
        };

        match self.identity.write() {
            Ok(mut current) => *current = identity,
            Err(poisoned) => *poisoned.into_inner() = identity,
        }

        let connected = status == LinkStatus::Connected;
        let previous = self.connected.swap(connected, Ordering::SeqCst);
        if previous != connected {
            info!(trace_id = %trace_id, connected, status_text = %snapshot.status_text, "device connectivity changed");
            (self.emitter)(SessionEvent::ConnectivityChanged { connected });
        } else {
            debug!(trace_id = %trace_id, status = ?status, "device status polled");
        }
        (self.emitter)(SessionEvent::StatusSnapshot {
            snapshot: snapshot.clone(),
            trace_id: trace_id.to_string(),
        });
        snapshot
    }

    /// Runs a query and returns its stdout; transport failures read as empty output.
    fn query(&self, args: &[String], trace_id: &str) -> String {
        match self.bridge.run(args, self.query_timeout, trace_id) {
            Ok(output) => {
                if output.timed_out {
                    warn!(trace_id = %trace_id, args = ?args, "bridge query timed out");
                }
                output.stdout_text()
            }
            Err(err) => {
                warn!(trace_id = %trace_id, error = %err.error, "bridge query failed");
                String::new()
            }
        }
    }

    fn property(&self, serial: &str, property: &str, trace_id: &str) -> String {
        parse_property_value(&self.query(&commands::get_property(serial, property), trace_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::adb::testing::ScriptedAdb;
    use crate::app::events::channel_emitter;
    use crate::app::models::StatusColor;
    use std::path::Path;
    use std::sync::mpsc::Receiver;

    fn monitor(adb: Arc<ScriptedAdb>, images: &Path) -> (PresenceMonitor, Receiver<SessionEvent>) {
        let (emitter, rx) = channel_emitter();
        let monitor = PresenceMonitor::new(
            adb,
            emitter,
            ImageAssets::new(images, "device.png"),
            Duration::from_secs(3),
        );
        (monitor, rx)
    }

    fn connectivity_events(rx: &Receiver<SessionEvent>) -> Vec<bool> {
        rx.try_iter()
            .filter_map(|event| match event {
                SessionEvent::ConnectivityChanged { connected } => Some(connected),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn connected_device_reports_identity_and_image() {
        let tmp = tempfile::TempDir::new().expect("tmp");
        std::fs::write(tmp.path().join("Acme_X1.png"), b"png").expect("write");
        let adb = Arc::new(ScriptedAdb::connected_as("ABC123", "Acme", "X1", "12"));
        let (monitor, _rx) = monitor(adb, tmp.path());

        let snapshot = monitor.poll("t-1");

        assert_eq!(snapshot.status, LinkStatus::Connected);
        assert_eq!(snapshot.color, StatusColor::Green);
        assert!(snapshot.status_text.contains("ABC123"));
        assert_eq!(snapshot.identity.brand, "Acme");
        assert_eq!(snapshot.identity.model, "X1");
        assert_eq!(snapshot.identity.android_version, "12");
        assert_eq!(snapshot.image_path, tmp.path().join("Acme_X1.png"));
        assert_eq!(monitor.current_serial().as_deref(), Some("ABC123"));
    }

    #[test]
    fn missing_picture_falls_back_to_placeholder() {
        let tmp = tempfile::TempDir::new().expect("tmp");
        let adb = Arc::new(ScriptedAdb::connected_as("ABC123", "Acme", "X1", "12"));
        let (monitor, _rx) = monitor(adb, tmp.path());
        assert_eq!(monitor.poll("t-2").image_path, tmp.path().join("device.png"));
    }

    #[test]
    fn header_only_is_not_detected() {
        let tmp = tempfile::TempDir::new().expect("tmp");
        let adb = Arc::new(ScriptedAdb::new());
        adb.respond(commands::list_devices(), "List of devices attached\n\n");
        let (monitor, _rx) = monitor(adb, tmp.path());

        let snapshot = monitor.poll("t-3");
        assert_eq!(snapshot.status, LinkStatus::NotDetected);
        assert_eq!(snapshot.color, StatusColor::Red);
        assert_eq!(snapshot.identity, DeviceIdentity::disconnected());
    }

    #[test]
    fn missing_header_is_bridge_mode() {
        let tmp = tempfile::TempDir::new().expect("tmp");
        let adb = Arc::new(ScriptedAdb::new());
        adb.respond(commands::list_devices(), "FA7AB1A00001\tfastboot\n");
        let (monitor, _rx) = monitor(adb, tmp.path());
        assert_eq!(monitor.poll("t-4").status, LinkStatus::BridgeMode);
    }

    #[test]
    fn bridge_failure_is_bridge_mode_not_an_error() {
        let tmp = tempfile::TempDir::new().expect("tmp");
        let adb = Arc::new(ScriptedAdb::new());
        adb.fail(commands::list_devices());
        let (monitor, rx) = monitor(adb, tmp.path());

        let snapshot = monitor.poll("t-5");
        assert_eq!(snapshot.status, LinkStatus::BridgeMode);
        assert_eq!(snapshot.color, StatusColor::Amber);
        assert!(rx
            .try_iter()
            .any(|event| matches!(event, SessionEvent::StatusSnapshot { .. })));
    }

    #[test]
    fn failed_identity_query_only_blanks_that_field() {
        let tmp = tempfile::TempDir::new().expect("tmp");
        let adb = Arc::new(ScriptedAdb::connected_as("ABC123", "Acme", "X1", "12"));
        adb.fail(commands::get_property("ABC123", commands::PROP_MODEL));
        let (monitor, _rx) = monitor(adb, tmp.path());

        let identity = monitor.poll("t-6").identity;
        assert_eq!(identity.brand, "Acme");
        assert_eq!(identity.model, DeviceIdentity::UNKNOWN);
        assert_eq!(identity.android_version, "12");
        assert!(identity.connected);
    }

    #[test]
    fn connectivity_event_fires_only_on_transition() {
        let tmp = tempfile::TempDir::new().expect("tmp");
        let adb = Arc::new(ScriptedAdb::connected_as("ABC123", "Acme", "X1", "12"));
        let (monitor, rx) = monitor(Arc::clone(&adb), tmp.path());

        monitor.poll("t-7");
        monitor.poll("t-8");
        assert_eq!(connectivity_events(&rx), vec![true]);

        adb.respond(commands::list_devices(), "List of devices attached\n");
        monitor.poll("t-9");
        monitor.poll("t-10");
        assert_eq!(connectivity_events(&rx), vec![false]);
        assert!(!monitor.is_connected());
        assert_eq!(monitor.current_serial(), None);
    }

    #[test]
    fn snapshot_fires_on_every_poll() {
        let tmp = tempfile::TempDir::new().expect("tmp");
        let adb = Arc::new(ScriptedAdb::new());
        adb.respond(commands::list_devices(), "List of devices attached\n");
        let (monitor, rx) = monitor(adb, tmp.path());

        for index in 0..3 {
            monitor.poll(&format!("t-{index}"));
        }
        let snapshots = rx
            .try_iter()
            .filter(|event| matches!(event, SessionEvent::StatusSnapshot { .. }))
            .count();
        assert_eq!(snapshots, 3);
    }

    #[test]
    fn overlapping_polls_fire_one_transition() {
        let tmp = tempfile::TempDir::new().expect("tmp");
        let adb = Arc::new(ScriptedAdb::connected_as("ABC123", "Acme", "X1", "12"));
        let (monitor, rx) = monitor(adb, tmp.path());
        let monitor = Arc::new(monitor);

        let handles: Vec<_> = (0..8)
            .map(|index| {
                let monitor = Arc::clone(&monitor);
                std::thread::spawn(move || {
                    monitor.poll(&format!("t-{index}"));
                })
            })
            .collect();
        for handle in handles {
            handle.join().expect("join");
        }
        assert_eq!(connectivity_events(&rx), vec![true]);
        assert_eq!(monitor.identity().serial, "ABC123");
    }
}
