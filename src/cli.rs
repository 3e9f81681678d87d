//! Command-line interface for hardshell

use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

use hardshell::rules::Mode;

/// hardshell - audit and harden a Linux host against a rule set
#[derive(Parser, Debug, Clone)]
#[command(name = "hardshell")]
#[command(version)]
#[command(about = "Audit and harden a Linux host against a declarative rule set", long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,

    /// Path to the rules document
    #[arg(short = 'c', long, global = true, env = "HARDSHELL_CONFIG")]
    pub config: Option<PathBuf>,

    /// Verbosity level (-v, -vv, -vvv)
    #[arg(short = 'v', long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Output format
    #[arg(long, global = true, default_value = "human")]
    pub format: OutputFormat,

    /// Write logs to this file, or to a timestamped file if it is a directory
    #[arg(long, global = true)]
    pub log_file: Option<PathBuf>,

    /// Disable colored output
    #[arg(long, global = true)]
    pub no_color: bool,

    /// os-release file used to identify the host
    #[arg(long, global = true, default_value = hardshell::os::OS_RELEASE_PATH)]
    pub os_release: PathBuf,
}

/// Output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable report with colors
    #[default]
    Human,
    /// JSON report for scripting
    Json,
}

/// Available subcommands
#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Check the host against the rules without changing anything
    Audit,

    /// Remediate failing rules, then check the host
    Harden(HardenArgs),
}

/// Arguments for `harden`
#[derive(Args, Debug, Clone)]
pub struct HardenArgs {
    /// Do not ask for confirmation
    #[arg(short = 'y', long)]
    pub yes: bool,
}

impl Cli {
    /// Run mode selected by the subcommand.
    pub fn mode(&self) -> Mode {
        match self.command {
            Commands::Audit => Mode::Audit,
            Commands::Harden(_) => Mode::Harden,
        }
    }

    /// Whether harden mode was confirmed on the command line.
    pub fn confirmed(&self) -> bool {
        matches!(&self.command, Commands::Harden(args) if args.yes)
    }
}
