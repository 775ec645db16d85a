//! CLI definitions using clap.

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

pub mod commands;

/// gsave - save entity graphs to SQLite in one transaction
#[derive(Parser, Debug)]
#[command(name = "gsave", author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Settings file (default: ~/.graphsaver/config.json)
    #[arg(long, global = true, env = "GRAPHSAVER_CONFIG")]
    pub config: Option<PathBuf>,

    /// Output as JSON
    #[arg(long, global = true)]
    pub json: bool,

    /// Increase logging verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Quiet mode (no output except errors)
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Disable colored output
    #[arg(long, global = true)]
    pub no_color: bool,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Print the compiled statements of the demo schema
    Explain {
        /// Only this entity type
        #[arg(long = "type")]
        type_name: Option<String>,

        /// Batch size to compile for
        #[arg(long, default_value_t = 1)]
        rows: usize,
    },

    /// Save the demo graph (a reference cycle plus a collection)
    Demo {
        /// Database file (default: in-memory)
        #[arg(long)]
        db: Option<PathBuf>,

        /// Print the statements and roll them back
        #[arg(long)]
        dry_run: bool,
    },

    /// Print version information
    Version,

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

/// Supported shells for completions.
#[derive(ValueEnum, Clone, Debug)]
pub enum Shell {
    Bash,
    Zsh,
    Fish,
    #[value(name = "powershell")]
    PowerShell,
    Elvish,
}
