//! Configuration module for hardshell
//!
//! Configuration lives in the `[global]` table of the rules document, next to
//! the categories it configures. Values are resolved in this order:
//! - Default values
//! - The `global` table of the loaded rules document
//! - Environment variables
//! - Command-line arguments (applied by the binary)

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::error::{Error, Result};
use crate::runner::local::DEFAULT_TIMEOUT_SECS;

/// Key of the configuration table inside a rules document.
pub const GLOBAL_KEY: &str = "global";

/// Main configuration structure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Filesystem locations written during hardening
    pub paths: PathsConfig,

    /// External command settings
    pub commands: CommandsConfig,

    /// Package manager query command per OS id
    pub package_managers: IndexMap<String, Vec<String>>,

    /// Logging settings
    pub logging: LoggingConfig,

    /// Terminal output settings
    pub output: OutputConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            paths: PathsConfig::default(),
            commands: CommandsConfig::default(),
            package_managers: default_package_managers(),
            logging: LoggingConfig::default(),
            output: OutputConfig::default(),
        }
    }
}

/// Filesystem locations
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    /// Directory of kernel parameter files
    #[serde(alias = "sysctl_config")]
    pub sysctl_dir: PathBuf,

    /// Prefix of the parameter file written for a sub-category
    #[serde(alias = "sysctl_config_prefix")]
    pub sysctl_prefix: String,

    /// Extension of the files reconciled in `sysctl_dir`
    pub config_extension: String,

    /// Directory receiving module deny-list files
    #[serde(alias = "modprobe_config")]
    pub modprobe_dir: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            sysctl_dir: PathBuf::from("/etc/sysctl.d"),
            sysctl_prefix: "99-hardshell-".to_string(),
            config_extension: "conf".to_string(),
            modprobe_dir: PathBuf::from("/etc/modprobe.d"),
        }
    }
}

impl PathsConfig {
    /// File name of the parameter file for a sub-category.
    pub fn sysctl_file_name(&self, sub_category: &str) -> String {
        format!("{}{}.{}", self.sysctl_prefix, sub_category, self.config_extension)
    }

    /// Full path of the deny-list file for a module.
    pub fn modprobe_file(&self, sub_category: &str, module: &str) -> PathBuf {
        self.modprobe_dir.join(format!("{}-{}.conf", sub_category, module))
    }
}

/// External command settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CommandsConfig {
    /// Timeout for each command in seconds
    pub timeout: u64,

    /// Command used to query service enablement; the service name is appended
    pub service_enabled: Vec<String>,
}

impl Default for CommandsConfig {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT_SECS,
            service_enabled: vec!["systemctl".to_string(), "is-enabled".to_string()],
        }
    }
}

/// Logging settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level used when no `-v` flag or `RUST_LOG` is given
    pub level: String,

    /// Log file; when set, logs go there instead of stderr
    pub file: Option<PathBuf>,

    /// Emit JSON log records
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "warn".to_string(),
            file: None,
            json: false,
        }
    }
}

/// Terminal output settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// Enable colored output
    pub color: bool,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self { color: true }
    }
}

fn default_package_managers() -> IndexMap<String, Vec<String>> {
    let dpkg = vec!["dpkg".to_string(), "-s".to_string()];
    let rpm = vec!["rpm".to_string(), "-q".to_string()];
    let pacman = vec!["pacman".to_string(), "-Qi".to_string()];

    let mut managers = IndexMap::new();
    for id in ["ubuntu", "debian", "linuxmint", "pop"] {
        managers.insert(id.to_string(), dpkg.clone());
    }
    for id in ["fedora", "rhel", "centos", "rocky", "almalinux", "opensuse-leap", "sles"] {
        managers.insert(id.to_string(), rpm.clone());
    }
    managers.insert("arch".to_string(), pacman);
    managers
}

impl Config {
    /// Build the configuration from a parsed rules document and apply
    /// environment overrides.
    pub fn from_document(document: &Value) -> Result<Self> {
        let mut config = match document.get(GLOBAL_KEY) {
            Some(global) => Self::from_global(global)?,
            None => Config::default(),
        };
        config.apply_env_overrides();
        Ok(config)
    }

    /// Deserialize the `global` table. Package managers listed there are added
    /// to the built-in table rather than replacing it.
    fn from_global(global: &Value) -> Result<Self> {
        let file_config: Config = serde_json::from_value(global.clone())
            .map_err(|e| Error::Config(format!("invalid [{}] table: {}", GLOBAL_KEY, e)))?;

        let mut package_managers = default_package_managers();
        package_managers.extend(file_config.package_managers);

        Ok(Config {
            package_managers,
            ..file_config
        })
    }

    /// Query command for an OS id, if one is known.
    pub fn package_manager(&self, os_id: &str) -> Option<&[String]> {
        self.package_managers
            .get(&os_id.to_lowercase())
            .map(Vec::as_slice)
            .filter(|argv| !argv.is_empty())
    }

    /// Apply environment variable overrides
    fn apply_env_overrides(&mut self) {
        // HARDSHELL_SYSCTL_DIR
        if let Ok(dir) = std::env::var("HARDSHELL_SYSCTL_DIR") {
            self.paths.sysctl_dir = PathBuf::from(dir);
        }

        // HARDSHELL_MODPROBE_DIR
        if let Ok(dir) = std::env::var("HARDSHELL_MODPROBE_DIR") {
            self.paths.modprobe_dir = PathBuf::from(dir);
        }

        // HARDSHELL_COMMAND_TIMEOUT
        if let Ok(timeout) = std::env::var("HARDSHELL_COMMAND_TIMEOUT") {
            if let Ok(n) = timeout.parse() {
                self.commands.timeout = n;
            }
        }

        // HARDSHELL_LOG_FILE
        if let Ok(path) = std::env::var("HARDSHELL_LOG_FILE") {
            self.logging.file = Some(PathBuf::from(path));
        }

        // NO_COLOR
        if std::env::var("NO_COLOR").is_ok() || std::env::var("HARDSHELL_NO_COLOR").is_ok() {
            self.output.color = false;
        }
    }
}

/// Locate the rules document.
///
/// An explicit path must exist. Otherwise the first existing file among
/// [`get_rules_paths`] is used.
pub fn find_rules_file(explicit_path: Option<&Path>) -> Result<PathBuf> {
    if let Some(path) = explicit_path {
        if path.exists() {
            return Ok(path.to_path_buf());
        }
        return Err(Error::RulesNotFound(path.display().to_string()));
    }

    let candidates = get_rules_paths();
    for path in &candidates {
        if path.exists() {
            debug!(path = %path.display(), "Using rules file");
            return Ok(path.clone());
        }
    }

    let searched: Vec<String> = candidates.iter().map(|p| p.display().to_string()).collect();
    Err(Error::RulesNotFound(searched.join(", ")))
}

/// Get the list of rules file paths to check, most specific first
pub fn get_rules_paths() -> Vec<PathBuf> {
    let mut paths = Vec::new();

    // Environment variable
    if let Ok(env_config) = std::env::var("HARDSHELL_CONFIG") {
        paths.push(PathBuf::from(env_config));
    }

    // System-wide rules
    paths.push(PathBuf::from("/etc/hardshell/hardshell.toml"));

    // User rules
    if let Some(home) = dirs::home_dir() {
        paths.push(home.join(".hardshell/hardshell.toml"));
    }

    // Project rules (current directory)
    paths.push(PathBuf::from("hardshell.toml"));

    paths
}

/// Read a rules document into a generic value, picking the format from the
/// file extension.
pub fn read_document(path: &Path) -> Result<Value> {
    let content = std::fs::read_to_string(path).map_err(|e| Error::file_io(path, e))?;
    parse_document(&content, path)
}

/// Parse rules document content. `path` only selects the format and names the
/// document in errors.
pub fn parse_document(content: &str, path: &Path) -> Result<Value> {
    let parse_error = |message: String| Error::RuleParse {
        path: path.to_path_buf(),
        message,
    };

    let extension = path.extension().and_then(|e| e.to_str()).unwrap_or("");
    let value: Value = match extension {
        "yml" | "yaml" => serde_yaml::from_str(content).map_err(|e| parse_error(e.to_string()))?,
        "json" => serde_json::from_str(content).map_err(|e| parse_error(e.to_string()))?,
        "toml" => toml::from_str(content).map_err(|e| parse_error(e.to_string()))?,
        _ => {
            // Try TOML first, then YAML
            toml::from_str(content)
                .or_else(|_| serde_yaml::from_str(content))
                .map_err(|e| parse_error(e.to_string()))?
        }
    };

    if !value.is_object() {
        return Err(parse_error("top level must be a table".to_string()));
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.paths.sysctl_dir, PathBuf::from("/etc/sysctl.d"));
        assert_eq!(config.paths.modprobe_dir, PathBuf::from("/etc/modprobe.d"));
        assert_eq!(config.commands.timeout, 30);
        assert_eq!(
            config.package_manager("ubuntu"),
            Some(&["dpkg".to_string(), "-s".to_string()][..])
        );
        assert_eq!(config.package_manager("plan9"), None);
    }

    #[test]
    fn test_file_names() {
        let paths = PathsConfig {
            sysctl_prefix: "60-hs-".into(),
            modprobe_dir: PathBuf::from("/tmp/modprobe.d"),
            ..PathsConfig::default()
        };
        assert_eq!(paths.sysctl_file_name("network"), "60-hs-network.conf");
        assert_eq!(
            paths.modprobe_file("filesystem", "squashfs"),
            PathBuf::from("/tmp/modprobe.d/filesystem-squashfs.conf")
        );
    }

    #[test]
    #[serial]
    fn test_global_table() {
        let doc = parse_document(
            r#"
[global.commands]
timeout = 5

[global.package_managers]
gentoo = ["qlist", "-I"]

[kernel]
category_name = "Kernel"
"#,
            Path::new("rules.toml"),
        )
        .unwrap();

        let config = Config::from_document(&doc).unwrap();
        assert_eq!(config.commands.timeout, 5);
        assert!(config.package_manager("gentoo").is_some());
        assert!(config.package_manager("debian").is_some());
    }

    #[test]
    #[serial]
    fn test_paths_aliases() {
        let doc = parse_document(
            r#"
[global.paths]
sysctl_config = "/tmp/sysctl.d"
sysctl_config_prefix = "60-"
modprobe_config = "/tmp/modprobe.d"
"#,
            Path::new("rules.toml"),
        )
        .unwrap();

        let config = Config::from_document(&doc).unwrap();
        assert_eq!(config.paths.sysctl_dir, PathBuf::from("/tmp/sysctl.d"));
        assert_eq!(config.paths.sysctl_prefix, "60-");
        assert_eq!(config.paths.modprobe_dir, PathBuf::from("/tmp/modprobe.d"));
    }

    #[test]
    fn test_parse_formats() {
        let yaml = parse_document("kernel:\n  category_name: Kernel\n", Path::new("r.yaml")).unwrap();
        assert_eq!(yaml["kernel"]["category_name"], "Kernel");

        let json = parse_document(r#"{"kernel": {}}"#, Path::new("r.json")).unwrap();
        assert!(json.get("kernel").is_some());

        let err = parse_document("[kernel", Path::new("r.toml")).unwrap_err();
        assert!(matches!(err, Error::RuleParse { .. }));
    }

    #[test]
    fn test_toml_preserves_order() {
        let doc = parse_document("[zeta]\n[alpha]\n[mid]\n", Path::new("r.toml")).unwrap();
        let keys: Vec<&String> = doc.as_object().unwrap().keys().collect();
        assert_eq!(keys, ["zeta", "alpha", "mid"]);
    }

    #[test]
    #[serial]
    fn test_env_override() {
        std::env::set_var("HARDSHELL_SYSCTL_DIR", "/tmp/hs-sysctl");
        std::env::set_var("HARDSHELL_COMMAND_TIMEOUT", "7");
        let config = Config::from_document(&serde_json::json!({})).unwrap();
        assert_eq!(config.paths.sysctl_dir, PathBuf::from("/tmp/hs-sysctl"));
        assert_eq!(config.commands.timeout, 7);
        std::env::remove_var("HARDSHELL_SYSCTL_DIR");
        std::env::remove_var("HARDSHELL_COMMAND_TIMEOUT");
    }

    #[test]
    #[serial]
    fn test_explicit_rules_path_must_exist() {
        let err = find_rules_file(Some(Path::new("/nonexistent/hardshell.toml"))).unwrap_err();
        assert!(matches!(err, Error::RulesNotFound(_)));
    }
}
