fn main() {
    if let Err(err) = adb_devpanel_lib::run() {
        eprintln!("adb_devpanel: {err}");
        std::process::exit(1);
    }
}
