//! CLI command definitions.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// fngate - provision a role, a function and an HTTP gateway in dependency order.
#[derive(Parser, Debug)]
#[command(name = "fngate")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Path to the stack file.
    #[arg(short, long, global = true, env = "FNGATE_CONFIG")]
    pub config: Option<PathBuf>,

    /// Enable debug logging.
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Output format (text, json).
    #[arg(long, global = true, default_value = "text")]
    pub output: OutputFormat,

    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    pub log_json: bool,

    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,
}

/// Available CLI commands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Validate the stack file and its dependency graph.
    Validate {
        /// Show warnings too.
        #[arg(short, long)]
        warnings: bool,
    },

    /// Show the order a run would follow.
    Plan {
        /// Plan a destroy run instead of a create run.
        #[arg(long)]
        destroy: bool,
    },

    /// Create every resource of the stack.
    Apply {
        /// Skip the confirmation prompt.
        #[arg(short, long)]
        yes: bool,

        /// Override the maximum number of concurrent provider calls.
        #[arg(long)]
        concurrency: Option<usize>,
    },

    /// Delete every resource recorded by the last run.
    Destroy {
        /// Skip the confirmation prompt.
        #[arg(short, long)]
        yes: bool,
    },

    /// Show what the state says is deployed.
    Status,

    /// Manage the state backend.
    State {
        /// State subcommand.
        #[command(subcommand)]
        command: StateCommands,
    },
}

/// State management subcommands.
#[derive(Subcommand, Debug)]
pub enum StateCommands {
    /// Show the recorded state.
    Show,

    /// Lock the state.
    Lock {
        /// Lock holder identifier.
        #[arg(long)]
        holder: Option<String>,
    },

    /// Unlock the state.
    Unlock {
        /// Lock id to release.
        #[arg(long)]
        lock_id: Option<String>,

        /// Remove the lock whoever holds it.
        #[arg(long)]
        force: bool,
    },
}

/// Output format options.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text output.
    #[default]
    Text,
    /// JSON output for scripting.
    Json,
}
