pub mod engine;
pub mod validate;
