pub mod adb;
pub mod config;
pub mod console;
pub mod device;
pub mod error;
pub mod events;
pub mod filter;
pub mod log_queue;
pub mod logcat;
pub mod logging;
pub mod models;
pub mod scheduler;
pub mod screenshot;
pub mod session;
pub mod state;
