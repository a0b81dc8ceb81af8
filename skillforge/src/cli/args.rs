//! CLI argument definitions.

use std::path::PathBuf;

use clap::{ArgAction, Parser, Subcommand};

/// Skillforge - generate agent skills from a plain-language description
#[derive(Parser, Debug)]
#[command(name = "skillforge")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Base URL of the generation service (overrides SKILLFORGE_API_BASE)
    #[arg(long, global = true)]
    pub api_base: Option<String>,

    /// History file location (overrides SKILLFORGE_HISTORY_PATH)
    #[arg(long, global = true)]
    pub history: Option<PathBuf>,

    /// Increase log verbosity (-v info, -vv debug)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available subcommands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Generate a skill, streaming it as it is written
    Generate {
        /// Template to start from
        #[arg(short, long)]
        template: Option<String>,

        /// Do not record the result in history
        #[arg(long)]
        no_history: bool,

        /// What the skill should do
        #[arg(trailing_var_arg = true)]
        description: Vec<String>,
    },

    /// Inspect or edit the local history
    History {
        #[command(subcommand)]
        action: HistoryAction,
    },

    /// Run the risk scan on an existing SKILL.md
    Scan {
        /// File to scan
        file: PathBuf,
    },

    /// Check that the generation service is up
    Health,
}

/// History operations
#[derive(Subcommand, Debug)]
pub enum HistoryAction {
    /// List entries, newest first
    List,

    /// Print one entry
    Show {
        /// Entry ID (or a unique prefix)
        id: String,
    },

    /// Delete one entry
    Remove {
        /// Entry ID (or a unique prefix)
        id: String,
    },

    /// Delete every entry
    Clear,
}
