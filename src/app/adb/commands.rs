//! Argument lists for every bridge subcommand the session uses.

pub const PROP_BRAND: &str = "ro.product.brand";
pub const PROP_MODEL: &str = "ro.product.model";
pub const PROP_RELEASE: &str = "ro.build.version.release";

fn args(items: &[&str]) -> Vec<String> {
    items.iter().map(|item| item.to_string()).collect()
}

pub fn list_devices() -> Vec<String> {
    args(&["devices"])
}

pub fn get_property(serial: &str, property: &str) -> Vec<String> {
    args(&["-s", serial, "shell", "getprop", property])
}

pub fn clear_log_buffer(serial: &str) -> Vec<String> {
    args(&["-s", serial, "logcat", "-c"])
}

pub fn stream_log(serial: &str) -> Vec<String> {
    args(&["-s", serial, "logcat"])
}

pub fn screencap_to_stdout(serial: &str) -> Vec<String> {
    args(&["-s", serial, "exec-out", "screencap", "-p"])
}

pub fn screencap_to_device_file(serial: &str, remote_path: &str) -> Vec<String> {
    args(&["-s", serial, "shell", "screencap", "-p", remote_path])
}

pub fn pull_file(serial: &str, remote_path: &str, local_path: &str) -> Vec<String> {
    args(&["-s", serial, "pull", remote_path, local_path])
}

pub fn remove_file(serial: &str, remote_path: &str) -> Vec<String> {
    args(&["-s", serial, "shell", "rm", "-f", remote_path])
}

/// The pipe runs on the device, so the shell command travels as one argument.
pub fn screencap_base64(serial: &str) -> Vec<String> {
    args(&["-s", serial, "shell", "screencap -p | base64"])
}
