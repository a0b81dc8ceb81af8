//! CLI argument parsing module.

mod args;
mod commands;

pub use args::{Cli, Commands, HistoryAction};
pub use commands::execute;
