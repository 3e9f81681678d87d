//! Shared test utilities and fixtures for the hardshell test suite.
//!
//! This module provides:
//! - A scripted [`FakeRunner`] that simulates `lsmod`, `modprobe`, `sysctl`
//!   and records every command it receives
//! - Configuration pointing all hardening writes into a temporary directory
//! - Helpers to build rule trees from TOML and evaluate them
//!
//! # Usage
//!
//! ```rust,ignore
//! mod common;
//! use common::*;
//! ```

#![allow(dead_code)]

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use tempfile::TempDir;

use hardshell::config::{parse_document, Config, PathsConfig};
use hardshell::dispatcher::RuleDispatcher;
use hardshell::os::OsDescriptor;
use hardshell::rules::{Mode, RuleTree};
use hardshell::runner::{CommandError, CommandResult, CommandRunner, RunnerResult};
use hardshell::status::{CheckEntry, StatusTree};

// ============================================================================
// Fake Runner
// ============================================================================

/// A command runner that never touches the host.
///
/// Explicit responses registered with [`FakeRunner::respond`] or
/// [`FakeRunner::fail`] win. Otherwise it simulates:
/// - `lsmod` from the set of loaded modules,
/// - `modprobe -r <m>` by removing `m` from that set ("not found" if unknown),
/// - `modprobe --showconfig` by concatenating the deny directory's files,
/// - `sysctl -n <key>` from an in-memory table,
/// - `sysctl -p <file>` by loading the file's `key=value` lines into the table.
///
/// Any other command fails to spawn.
#[derive(Default)]
pub struct FakeRunner {
    responses: RwLock<HashMap<String, RunnerResult<CommandResult>>>,
    calls: RwLock<Vec<String>>,
    loaded_modules: RwLock<Vec<String>>,
    known_modules: RwLock<Vec<String>>,
    sysctl: RwLock<HashMap<String, String>>,
    deny_dir: RwLock<Option<PathBuf>>,
}

impl FakeRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the result for an exact command line.
    pub fn respond(&self, command: &str, result: CommandResult) {
        self.responses.write().insert(command.to_string(), Ok(result));
    }

    /// Register a runner failure for an exact command line.
    pub fn fail(&self, command: &str, error: CommandError) {
        self.responses.write().insert(command.to_string(), Err(error));
    }

    /// Mark a module as present on the host and loaded.
    pub fn load_module(&self, module: &str) {
        self.known_modules.write().push(module.to_string());
        self.loaded_modules.write().push(module.to_string());
    }

    /// Set a live kernel parameter.
    pub fn set_sysctl(&self, key: &str, value: &str) {
        self.sysctl.write().insert(key.to_string(), value.to_string());
    }

    /// Live value of a kernel parameter.
    pub fn sysctl(&self, key: &str) -> Option<String> {
        self.sysctl.read().get(key).cloned()
    }

    /// Directory read by `modprobe --showconfig`.
    pub fn with_deny_dir(self, dir: &Path) -> Self {
        *self.deny_dir.write() = Some(dir.to_path_buf());
        self
    }

    /// Every command line received, in order.
    pub fn calls(&self) -> Vec<String> {
        self.calls.read().clone()
    }

    /// Whether a command starting with `prefix` was received.
    pub fn was_called(&self, prefix: &str) -> bool {
        self.calls.read().iter().any(|c| c.starts_with(prefix))
    }

    fn simulate(&self, argv: &[String]) -> RunnerResult<CommandResult> {
        let args: Vec<&str> = argv.iter().map(String::as_str).collect();
        match args.as_slice() {
            ["lsmod"] => {
                let mut out = String::from("Module                  Size  Used by\n");
                for module in self.loaded_modules.read().iter() {
                    out.push_str(&format!("{:<24}16384  0\n", module));
                }
                Ok(CommandResult::success(out, ""))
            }
            ["modprobe", "-r", module] => {
                if !self.known_modules.read().iter().any(|m| m.as_str() == *module) {
                    return Ok(CommandResult::failure(
                        1,
                        "",
                        format!("modprobe: FATAL: Module {} not found.\n", module),
                    ));
                }
                self.loaded_modules.write().retain(|m| m.as_str() != *module);
                Ok(CommandResult::success("", ""))
            }
            ["modprobe", "--showconfig"] => {
                let mut out = String::new();
                if let Some(dir) = self.deny_dir.read().as_ref() {
                    let mut entries: Vec<PathBuf> = fs::read_dir(dir)
                        .map(|rd| rd.filter_map(|e| e.ok()).map(|e| e.path()).collect())
                        .unwrap_or_default();
                    entries.sort();
                    for path in entries {
                        if let Ok(content) = fs::read_to_string(&path) {
                            out.push_str(&content);
                        }
                    }
                }
                Ok(CommandResult::success(out, ""))
            }
            ["sysctl", "-n", key] => match self.sysctl.read().get(*key) {
                Some(value) => Ok(CommandResult::success(format!("{}\n", value), "")),
                None => Ok(CommandResult::failure(
                    255,
                    "",
                    format!("sysctl: cannot stat /proc/sys/{}: No such file or directory\n", key.replace('.', "/")),
                )),
            },
            ["sysctl", "-p", file] => {
                let content = fs::read_to_string(file).map_err(|e| CommandError::Wait {
                    program: "sysctl".into(),
                    message: e.to_string(),
                })?;
                let mut applied = String::new();
                for line in content.lines().map(str::trim) {
                    if line.is_empty() || line.starts_with('#') || line.starts_with(';') {
                        continue;
                    }
                    if let Some((key, value)) = line.split_once('=') {
                        self.set_sysctl(key.trim(), value.trim());
                        applied.push_str(&format!("{} = {}\n", key.trim(), value.trim()));
                    }
                }
                Ok(CommandResult::success(applied, ""))
            }
            _ => Err(CommandError::Spawn {
                program: argv.first().cloned().unwrap_or_default(),
                message: "No such file or directory (os error 2)".into(),
            }),
        }
    }
}

#[async_trait]
impl CommandRunner for FakeRunner {
    async fn run(&self, argv: &[String]) -> RunnerResult<CommandResult> {
        let line = argv.join(" ");
        self.calls.write().push(line.clone());
        if let Some(response) = self.responses.read().get(&line) {
            return response.clone();
        }
        self.simulate(argv)
    }
}

// ============================================================================
// Fixtures
// ============================================================================

/// Temporary sysctl and modprobe directories.
pub struct HostDirs {
    pub root: TempDir,
    pub sysctl_dir: PathBuf,
    pub modprobe_dir: PathBuf,
}

impl HostDirs {
    pub fn new() -> Self {
        let root = tempfile::tempdir().expect("tempdir");
        let sysctl_dir = root.path().join("sysctl.d");
        let modprobe_dir = root.path().join("modprobe.d");
        fs::create_dir(&sysctl_dir).expect("sysctl dir");
        fs::create_dir(&modprobe_dir).expect("modprobe dir");
        Self {
            root,
            sysctl_dir,
            modprobe_dir,
        }
    }

    /// Configuration writing into these directories.
    pub fn config(&self) -> Config {
        Config {
            paths: PathsConfig {
                sysctl_dir: self.sysctl_dir.clone(),
                sysctl_prefix: "60-hardshell-".into(),
                modprobe_dir: self.modprobe_dir.clone(),
                ..PathsConfig::default()
            },
            ..Config::default()
        }
    }

    /// Path under the temporary root.
    pub fn path(&self, relative: &str) -> PathBuf {
        self.root.path().join(relative)
    }
}

pub fn ubuntu() -> OsDescriptor {
    OsDescriptor::new("ubuntu", "22.04")
}

/// Parse a TOML rule tree.
pub fn rules(toml: &str) -> RuleTree {
    let document = parse_document(toml, Path::new("rules.toml")).expect("valid TOML");
    RuleTree::from_document(&document).expect("valid rules")
}

/// Evaluate `tree` with a fake runner and the given configuration.
pub async fn evaluate(
    runner: &Arc<FakeRunner>,
    config: Config,
    mode: Mode,
    tree: &RuleTree,
) -> StatusTree {
    let dispatcher = RuleDispatcher::new(runner.clone(), config);
    dispatcher.evaluate(mode, &ubuntu(), tree).await
}

/// Look up a check entry by dotted `category.sub_category.check` path.
pub fn entry<'a>(status: &'a StatusTree, path: &str) -> &'a CheckEntry {
    let parts: Vec<&str> = path.splitn(3, '.').collect();
    assert_eq!(parts.len(), 3, "path must have three parts: {}", path);
    status
        .check(parts[0], parts[1], parts[2])
        .unwrap_or_else(|| panic!("no entry for {}", path))
}
