pub mod parser;
pub mod service;
pub mod state_machine;
