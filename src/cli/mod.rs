//! Command-line interface.

mod commands;
mod output;

pub use commands::{Cli, Commands, OutputFormat, StateCommands};
pub use output::{MessageLevel, OutputFormatter};
