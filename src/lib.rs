pub mod app;

use std::io;
use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use app::adb::locator::{resolve_adb_program, validate_adb_program};
use app::adb::runner::{AdbBridge, HostAdb};
use app::config::load_config;
use app::console::Console;
use app::error::AppError;
use app::events::channel_emitter;
use app::filter::LogFilter;
use app::logging::init_logging;
use app::session::SessionController;

/// Console front end: polls the device, prints events and captured lines, and takes
/// commands on stdin until `quit`.
pub fn run() -> Result<(), AppError> {
    let config = load_config()?;
    init_logging(&config.logging);

    let program = resolve_adb_program(&config.adb.command_path);
    if let Err(reason) = validate_adb_program(&program) {
        warn!(program = %program, reason = %reason, "adb program looks unusable");
    }
    info!(program = %program, "starting device session");

    let bridge: Arc<dyn AdbBridge> = Arc::new(HostAdb::new(program));
    let (emitter, events) = channel_emitter();
    let session = SessionController::new(bridge, &config, emitter);
    session.start_polling()?;

    let filter = LogFilter::from_names(&config.viewer.min_level, &config.viewer.keyword);
    Console::new(
        session,
        events,
        filter,
        Duration::from_millis(config.viewer.drain_interval_ms),
        io::stdout(),
    )
    .run(io::BufReader::new(io::stdin()))
}
