//! Rule tree: categories, sub-categories and checks.
//!
//! A rules document is a nested table. Every top-level key except `global` is
//! a category, every table inside a category is a sub-category and every table
//! inside a sub-category is a check:
//!
//! ```toml
//! [kernel]
//! category_name = "Kernel"
//!
//! [kernel.filesystem]
//! sub_category_name = "Filesystem Modules"
//!
//! [kernel.filesystem.squashfs]
//! check_name = "squashfs"
//! check_type = "module"
//! module_name = "squashfs"
//! check_os = { ubuntu = ["22.04", "24.04"] }
//! ```
//!
//! The tree is validated when it is built: a check missing a parameter its
//! type requires, or carrying a key its type does not know, fails the load
//! with the dotted path of the rule. Two things are tolerated and left to
//! evaluation: an unknown `check_type` (extra keys included) and a malformed
//! `setting` string.

use indexmap::IndexMap;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::path::{Path, PathBuf};

use crate::config::{read_document, GLOBAL_KEY};
use crate::error::{Error, Result};
use crate::os::OsDescriptor;

/// Run mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// Read-only verification
    Audit,
    /// Remediation followed by verification
    Harden,
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Mode::Audit => write!(f, "audit"),
            Mode::Harden => write!(f, "harden"),
        }
    }
}

/// Distributions and versions a rule applies to.
///
/// An id mapped to an empty version list matches every version of that
/// distribution.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OsFilter(IndexMap<String, Vec<String>>);

impl OsFilter {
    /// Build a filter from `(id, versions)` pairs.
    pub fn new<I, S, V>(entries: I) -> Self
    where
        I: IntoIterator<Item = (S, V)>,
        S: Into<String>,
        V: IntoIterator,
        V::Item: Into<String>,
    {
        Self(
            entries
                .into_iter()
                .map(|(id, versions)| {
                    (
                        id.into().to_lowercase(),
                        versions.into_iter().map(Into::into).collect(),
                    )
                })
                .collect(),
        )
    }

    /// Returns true if `os` is listed.
    pub fn matches(&self, os: &OsDescriptor) -> bool {
        match self.0.get(&os.id) {
            Some(versions) => versions.is_empty() || versions.iter().any(|v| *v == os.version),
            None => false,
        }
    }
}

/// Gating flags shared by every level of the tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Gate {
    /// Never evaluate this level
    pub skip: bool,
    /// Enabled in audit mode
    pub audit: bool,
    /// Enabled in harden mode
    pub harden: bool,
    /// Applicability filter; `None` applies everywhere
    pub os: Option<OsFilter>,
}

impl Default for Gate {
    fn default() -> Self {
        Self {
            skip: false,
            audit: true,
            harden: true,
            os: None,
        }
    }
}

impl Gate {
    /// Whether this level is enabled for `mode`.
    pub fn enabled(&self, mode: Mode) -> bool {
        match mode {
            Mode::Audit => self.audit,
            Mode::Harden => self.harden,
        }
    }

    /// Whether this level applies to `os`.
    pub fn applies_to(&self, os: &OsDescriptor) -> bool {
        self.os.as_ref().map_or(true, |filter| filter.matches(os))
    }
}

/// Kernel module check parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleCheck {
    pub module_name: String,
}

/// Kernel parameter check parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParameterCheck {
    /// `key=value` strings, unvalidated
    pub settings: Vec<String>,
}

/// What a permission check inspects.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PermissionTarget {
    /// One explicit path
    Path(PathBuf),
    /// Every regular file under `base_path` whose content type matches
    Scan { base_path: PathBuf, file_type: String },
}

/// File permission/owner/group check parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PermissionCheck {
    pub target: PermissionTarget,
    /// Octal permission bits, e.g. `"600"`
    pub permissions: String,
    /// Expected owner, numeric uid or user name
    pub owner: String,
    /// Expected group, numeric gid or group name
    pub group: String,
}

/// Package check parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageCheck {
    pub package_name: String,
    /// `true` when the package must be installed, `false` when it must not
    pub install: bool,
}

/// Files a regex check reads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegexSource {
    /// One explicit file
    File(PathBuf),
    /// `base_path/prefix*`: files taken as is, directories searched for `*suffix`
    Scan {
        base_path: PathBuf,
        prefix: String,
        suffix: String,
    },
}

/// Pattern-in-file check parameters.
#[derive(Debug, Clone)]
pub struct RegexCheck {
    pub source: RegexSource,
    /// Pattern as written in the rule
    pub pattern: String,
    /// Pattern anchored at the start of the (trimmed) line
    pub regex: Regex,
    /// Whether a matching line is expected
    pub expect_match: bool,
}

impl PartialEq for RegexCheck {
    fn eq(&self, other: &Self) -> bool {
        self.source == other.source
            && self.pattern == other.pattern
            && self.expect_match == other.expect_match
    }
}

impl Eq for RegexCheck {}

/// Service enablement check parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceCheck {
    pub service_name: String,
}

/// Type of a check together with its parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckKind {
    Module(ModuleCheck),
    Parameter(ParameterCheck),
    Permission(PermissionCheck),
    Package(PackageCheck),
    Regex(RegexCheck),
    Service(ServiceCheck),
    /// A `check_type` this version does not know; evaluation ignores it
    Unknown(String),
}

impl CheckKind {
    /// The `check_type` tag.
    pub fn type_name(&self) -> &str {
        match self {
            CheckKind::Module(_) => "module",
            CheckKind::Parameter(_) => "parameter",
            CheckKind::Permission(_) => "permission",
            CheckKind::Package(_) => "package",
            CheckKind::Regex(_) => "regex",
            CheckKind::Service(_) => "service",
            CheckKind::Unknown(name) => name,
        }
    }
}

/// Reference data a check carries into the report untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckMetadata {
    /// Benchmark identifier, e.g. `"1.1.1.1"`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub check_id: Option<String>,
    /// CIS control reference
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cis: Option<String>,
    /// Where the rule comes from
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
}

/// A leaf rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Check {
    /// Table key
    pub id: String,
    /// Display name
    pub name: String,
    pub gate: Gate,
    /// Whether harden mode may change the host for this check
    pub set: bool,
    pub kind: CheckKind,
    pub metadata: CheckMetadata,
}

/// A group of checks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubCategory {
    pub id: String,
    pub name: String,
    pub gate: Gate,
    pub checks: Vec<Check>,
}

/// A group of sub-categories.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Category {
    pub id: String,
    pub name: String,
    pub gate: Gate,
    pub sub_categories: Vec<SubCategory>,
}

/// A validated rule tree, in document order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RuleTree {
    pub categories: Vec<Category>,
}

/// Scan locations a sub-category hands down to its checks.
#[derive(Default)]
struct Inherited {
    base_path: Option<String>,
    prefix: Option<String>,
    suffix: Option<String>,
    service_name: Option<String>,
}

const CATEGORY_KEYS: &[&str] = &[
    "category_name",
    "category_skip",
    "category_audit",
    "category_harden",
    "category_os",
    "category_id",
];

const SUB_CATEGORY_KEYS: &[&str] = &[
    "sub_category_name",
    "sub_category_skip",
    "sub_category_audit",
    "sub_category_harden",
    "sub_category_os",
    "base_path",
    "prefix",
    "suffix",
    "service_name",
];

/// Keys every check accepts, whatever its type.
const CHECK_KEYS: &[&str] = &[
    "check_name",
    "check_type",
    "check_skip",
    "check_audit",
    "check_harden",
    "check_set",
    "check_os",
    "check_id",
    "cis",
    "source",
];

/// Parameter keys of each known check type.
fn parameter_keys(check_type: &str) -> Option<&'static [&'static str]> {
    let keys: &[&str] = match check_type {
        "module" => &["module_name"],
        "parameter" => &["setting", "settings"],
        "permission" | "permissions" => {
            &["path", "base_path", "file_type", "permissions", "owner", "group"]
        }
        "package" => &["package_name", "package_install"],
        "regex" => &["path", "base_path", "prefix", "suffix", "pattern", "match"],
        "service" => &["service_name"],
        _ => return None,
    };
    Some(keys)
}

impl RuleTree {
    /// Read and validate a rules document.
    pub fn load(path: &Path) -> Result<Self> {
        let document = read_document(path)?;
        Self::from_document(&document)
    }

    /// Build the tree from a parsed document. The `global` table is skipped.
    pub fn from_document(document: &Value) -> Result<Self> {
        let root = document
            .as_object()
            .ok_or_else(|| Error::rule("<root>", "rules document must be a table"))?;

        let mut categories = Vec::new();
        for (key, value) in root {
            if key == GLOBAL_KEY {
                continue;
            }
            let table = value
                .as_object()
                .ok_or_else(|| Error::rule(key.as_str(), "category must be a table"))?;
            categories.push(parse_category(key, table)?);
        }
        Ok(Self { categories })
    }

    /// Total number of checks in the tree.
    pub fn check_count(&self) -> usize {
        self.categories
            .iter()
            .flat_map(|c| &c.sub_categories)
            .map(|s| s.checks.len())
            .sum()
    }

    /// Returns true if the tree has no categories.
    pub fn is_empty(&self) -> bool {
        self.categories.is_empty()
    }
}

fn parse_category(key: &str, table: &Map<String, Value>) -> Result<Category> {
    let id = opt_string(table, "category_id", key)?.unwrap_or_else(|| key.to_string());
    let gate = parse_gate(table, "category", key)?;

    let mut sub_categories = Vec::new();
    for (sub_key, value) in table {
        if CATEGORY_KEYS.contains(&sub_key.as_str()) {
            continue;
        }
        let path = format!("{}.{}", key, sub_key);
        let sub_table = value
            .as_object()
            .ok_or_else(|| Error::rule(&path, "unknown key; sub-categories must be tables"))?;
        sub_categories.push(parse_sub_category(sub_key, &path, sub_table)?);
    }

    Ok(Category {
        name: opt_string(table, "category_name", key)?.unwrap_or_else(|| id.clone()),
        id,
        gate,
        sub_categories,
    })
}

fn parse_sub_category(key: &str, path: &str, table: &Map<String, Value>) -> Result<SubCategory> {
    let gate = parse_gate(table, "sub_category", path)?;
    let inherited = Inherited {
        base_path: opt_string(table, "base_path", path)?,
        prefix: opt_string(table, "prefix", path)?,
        suffix: opt_string(table, "suffix", path)?,
        service_name: opt_string(table, "service_name", path)?,
    };

    let mut checks = Vec::new();
    for (check_key, value) in table {
        if SUB_CATEGORY_KEYS.contains(&check_key.as_str()) {
            continue;
        }
        let check_path = format!("{}.{}", path, check_key);
        let check_table = value
            .as_object()
            .ok_or_else(|| Error::rule(&check_path, "unknown key; checks must be tables"))?;
        checks.push(parse_check(check_key, &check_path, check_table, &inherited)?);
    }

    Ok(SubCategory {
        id: key.to_string(),
        name: opt_string(table, "sub_category_name", path)?.unwrap_or_else(|| key.to_string()),
        gate,
        checks,
    })
}

fn parse_check(
    key: &str,
    path: &str,
    table: &Map<String, Value>,
    inherited: &Inherited,
) -> Result<Check> {
    let check_type = required_string(table, "check_type", path)?;
    // Unknown types may carry parameters of a newer version.
    if let Some(params) = parameter_keys(&check_type) {
        if let Some(stray) = table
            .keys()
            .find(|k| !CHECK_KEYS.contains(&k.as_str()) && !params.contains(&k.as_str()))
        {
            return Err(Error::rule(
                path,
                format!("unknown key '{}' for check_type '{}'", stray, check_type),
            ));
        }
    }

    let kind = match check_type.as_str() {
        "module" => CheckKind::Module(ModuleCheck {
            module_name: required_string(table, "module_name", path)?,
        }),
        "parameter" => CheckKind::Parameter(parse_parameter(table, path)?),
        "permission" | "permissions" => CheckKind::Permission(parse_permission(table, path, inherited)?),
        "package" => CheckKind::Package(PackageCheck {
            package_name: required_string(table, "package_name", path)?,
            install: opt_bool(table, "package_install", path)?
                .ok_or_else(|| Error::rule(path, "missing 'package_install'"))?,
        }),
        "regex" => CheckKind::Regex(parse_regex(table, path, inherited)?),
        "service" => CheckKind::Service(ServiceCheck {
            service_name: opt_string(table, "service_name", path)?
                .or_else(|| inherited.service_name.clone())
                .ok_or_else(|| Error::rule(path, "missing 'service_name'"))?,
        }),
        other => CheckKind::Unknown(other.to_string()),
    };

    Ok(Check {
        id: key.to_string(),
        name: opt_string(table, "check_name", path)?.unwrap_or_else(|| key.to_string()),
        gate: parse_gate(table, "check", path)?,
        set: opt_bool(table, "check_set", path)?.unwrap_or(true),
        kind,
        metadata: CheckMetadata {
            check_id: opt_string(table, "check_id", path)?,
            cis: opt_string(table, "cis", path)?,
            source: opt_string(table, "source", path)?,
        },
    })
}

fn parse_parameter(table: &Map<String, Value>, path: &str) -> Result<ParameterCheck> {
    let mut settings = Vec::new();
    if let Some(setting) = opt_string(table, "setting", path)? {
        settings.push(setting);
    }
    match table.get("settings") {
        None => {}
        Some(Value::Array(items)) => {
            for item in items {
                let setting = item
                    .as_str()
                    .ok_or_else(|| Error::rule(path, "'settings' must be a list of strings"))?;
                settings.push(setting.to_string());
            }
        }
        Some(_) => return Err(Error::rule(path, "'settings' must be a list of strings")),
    }
    if settings.is_empty() {
        return Err(Error::rule(path, "missing 'setting'"));
    }
    Ok(ParameterCheck { settings })
}

fn parse_permission(
    table: &Map<String, Value>,
    path: &str,
    inherited: &Inherited,
) -> Result<PermissionCheck> {
    let target = match opt_string(table, "path", path)? {
        Some(file) => PermissionTarget::Path(PathBuf::from(file)),
        None => {
            let file_type = opt_string(table, "file_type", path)?
                .ok_or_else(|| Error::rule(path, "missing 'path' (or 'base_path' and 'file_type')"))?;
            let base_path = opt_string(table, "base_path", path)?
                .or_else(|| inherited.base_path.clone())
                .ok_or_else(|| Error::rule(path, "missing 'base_path'"))?;
            PermissionTarget::Scan {
                base_path: PathBuf::from(base_path),
                file_type,
            }
        }
    };

    let permissions = required_string(table, "permissions", path)?;
    if u32::from_str_radix(&permissions, 8).is_err() {
        return Err(Error::rule(
            path,
            format!("'permissions' must be octal, got '{}'", permissions),
        ));
    }

    Ok(PermissionCheck {
        target,
        permissions,
        owner: required_string(table, "owner", path)?,
        group: required_string(table, "group", path)?,
    })
}

fn parse_regex(table: &Map<String, Value>, path: &str, inherited: &Inherited) -> Result<RegexCheck> {
    let pattern = required_string(table, "pattern", path)?;
    let regex = Regex::new(&format!("^(?:{})", pattern))
        .map_err(|e| Error::rule(path, format!("invalid pattern: {}", e)))?;

    let source = match opt_string(table, "path", path)? {
        Some(file) => RegexSource::File(PathBuf::from(file)),
        None => {
            let base_path = opt_string(table, "base_path", path)?
                .or_else(|| inherited.base_path.clone())
                .ok_or_else(|| Error::rule(path, "missing 'path' or 'base_path'"))?;
            RegexSource::Scan {
                base_path: PathBuf::from(base_path),
                prefix: opt_string(table, "prefix", path)?
                    .or_else(|| inherited.prefix.clone())
                    .unwrap_or_default(),
                suffix: opt_string(table, "suffix", path)?
                    .or_else(|| inherited.suffix.clone())
                    .unwrap_or_default(),
            }
        }
    };

    Ok(RegexCheck {
        source,
        pattern,
        regex,
        expect_match: opt_bool(table, "match", path)?.unwrap_or(true),
    })
}

fn parse_gate(table: &Map<String, Value>, level: &str, path: &str) -> Result<Gate> {
    let defaults = Gate::default();
    Ok(Gate {
        skip: opt_bool(table, &format!("{}_skip", level), path)?.unwrap_or(defaults.skip),
        audit: opt_bool(table, &format!("{}_audit", level), path)?.unwrap_or(defaults.audit),
        harden: opt_bool(table, &format!("{}_harden", level), path)?.unwrap_or(defaults.harden),
        os: parse_os_filter(table.get(&format!("{}_os", level)), path)?,
    })
}

fn parse_os_filter(value: Option<&Value>, path: &str) -> Result<Option<OsFilter>> {
    let Some(value) = value else {
        return Ok(None);
    };
    let table = value
        .as_object()
        .ok_or_else(|| Error::rule(path, "OS filter must be a table of id = [versions]"))?;

    let mut entries = Vec::with_capacity(table.len());
    for (id, versions) in table {
        let versions = match versions {
            Value::Array(items) => items
                .iter()
                .map(|v| scalar_to_string(v).ok_or_else(|| Error::rule(path, "OS versions must be strings")))
                .collect::<Result<Vec<_>>>()?,
            other => vec![scalar_to_string(other)
                .ok_or_else(|| Error::rule(path, "OS versions must be strings"))?],
        };
        entries.push((id.clone(), versions));
    }
    Ok(Some(OsFilter::new(entries)))
}

/// Strings, numbers and booleans are accepted where a string is expected, so
/// `owner = 0` and `permissions = 644` read naturally.
fn scalar_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn opt_string(table: &Map<String, Value>, key: &str, path: &str) -> Result<Option<String>> {
    match table.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(value) => scalar_to_string(value)
            .map(Some)
            .ok_or_else(|| Error::rule(path, format!("'{}' must be a string", key))),
    }
}

fn required_string(table: &Map<String, Value>, key: &str, path: &str) -> Result<String> {
    opt_string(table, key, path)?.ok_or_else(|| Error::rule(path, format!("missing '{}'", key)))
}

fn opt_bool(table: &Map<String, Value>, key: &str, path: &str) -> Result<Option<bool>> {
    match table.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Bool(b)) => Ok(Some(*b)),
        Some(_) => Err(Error::rule(path, format!("'{}' must be a boolean", key))),
    }
}
