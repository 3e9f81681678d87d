//! hardshell - host compliance auditing and hardening
//!
//! This is the main entry point for the hardshell CLI.

mod cli;

use anyhow::{Context, Result};
use clap::Parser;
use is_terminal::IsTerminal;
use std::io::{BufRead, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::{fmt, prelude::*, EnvFilter, Layer};

use cli::{Cli, OutputFormat};
use hardshell::config::{self, Config, LoggingConfig};
use hardshell::dispatcher::RuleDispatcher;
use hardshell::os::OsDescriptor;
use hardshell::output::Report;
use hardshell::rules::{Mode, RuleTree};
use hardshell::runner::LocalRunner;

/// Exit code when every check passed or was skipped/warned.
const EXIT_OK: i32 = 0;
/// Exit code when at least one check failed or errored.
const EXIT_FINDINGS: i32 = 1;
/// Exit code when the run could not start.
const EXIT_LOAD_FAILURE: i32 = 2;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if cli.no_color {
        colored::control::set_override(false);
    }

    let code = match run(&cli).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            EXIT_LOAD_FAILURE
        }
    };
    std::process::exit(code);
}

async fn run(cli: &Cli) -> Result<i32> {
    let rules_path = config::find_rules_file(cli.config.as_deref())?;
    let document = config::read_document(&rules_path)?;
    let mut config = Config::from_document(&document)
        .with_context(|| format!("Failed to load configuration from {}", rules_path.display()))?;
    if let Some(path) = &cli.log_file {
        config.logging.file = Some(path.clone());
    }

    init_logging(cli.verbose, &config.logging)?;
    if !config.output.color {
        colored::control::set_override(false);
    }

    let tree = RuleTree::from_document(&document)
        .with_context(|| format!("Invalid rules in {}", rules_path.display()))?;
    let os = OsDescriptor::from_os_release(&cli.os_release).context("Failed to identify the host OS")?;
    tracing::info!(rules = %rules_path.display(), os = %os, "Loaded rules");

    let mode = cli.mode();
    if mode == Mode::Harden && !cli.confirmed() && !confirm_harden()? {
        eprintln!("Aborted: harden mode changes system configuration (use --yes to skip this prompt)");
        return Ok(EXIT_LOAD_FAILURE);
    }

    let runner = LocalRunner::new().with_timeout(config.commands.timeout);
    let dispatcher = RuleDispatcher::new(Arc::new(runner), config);
    let status = dispatcher.evaluate(mode, &os, &tree).await;

    let report = Report::new(&os, mode, &status);
    match cli.format {
        OutputFormat::Human => print!("{}", report.to_human()),
        OutputFormat::Json => println!("{}", report.to_json()?),
    }

    Ok(if status.has_failures() {
        EXIT_FINDINGS
    } else {
        EXIT_OK
    })
}

/// Ask on the terminal before changing the system.
fn confirm_harden() -> Result<bool> {
    if !std::io::stdin().is_terminal() {
        return Ok(false);
    }
    eprint!("Harden mode will modify system configuration. Continue? [y/N] ");
    std::io::stderr().flush()?;
    let mut answer = String::new();
    std::io::stdin().lock().read_line(&mut answer)?;
    Ok(matches!(answer.trim().to_lowercase().as_str(), "y" | "yes"))
}

/// Initialize logging based on verbosity level and logging configuration
fn init_logging(verbosity: u8, logging: &LoggingConfig) -> Result<()> {
    let filter = match verbosity {
        0 => logging.level.as_str(),
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    let layer = match &logging.file {
        Some(path) => {
            let path = log_file_path(path);
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)
                .with_context(|| format!("Failed to open log file {}", path.display()))?;
            let writer = std::sync::Mutex::new(file);
            if logging.json {
                fmt::layer().json().with_writer(writer).boxed()
            } else {
                fmt::layer().with_ansi(false).with_writer(writer).boxed()
            }
        }
        None if logging.json => fmt::layer().json().with_writer(std::io::stderr).boxed(),
        None => fmt::layer()
            .with_target(verbosity >= 3)
            .with_writer(std::io::stderr)
            .boxed(),
    };

    tracing_subscriber::registry().with(layer).with(env_filter).init();
    Ok(())
}

/// A directory gets a timestamped log file inside it.
fn log_file_path(path: &Path) -> PathBuf {
    if path.is_dir() {
        let stamp = chrono::Local::now().format("%Y%m%d-%H%M%S");
        path.join(format!("hardshell-{}.log", stamp))
    } else {
        path.to_path_buf()
    }
}
