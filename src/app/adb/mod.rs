pub mod commands;
pub mod locator;
pub mod parse;
pub mod runner;

#[cfg(test)]
pub mod testing;
