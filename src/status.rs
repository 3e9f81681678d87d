//! Check outcomes and the status tree they are collected into.
//!
//! The [`StatusTree`] mirrors the rule tree: categories contain
//! sub-categories, which contain checks. A check holds either a single
//! outcome, a set of outcomes keyed by a sub-identifier (one per scanned
//! file, one per setting, `load`/`deny` for modules), or both. Entries keep
//! traversal order and an outcome, once recorded, is never replaced.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::warn;

use crate::rules::CheckMetadata;

/// Verdict of a single check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum CheckStatus {
    /// Host matches the rule
    Pass,
    /// Host does not match the rule
    Fail,
    /// Excluded or not applicable
    Skip,
    /// Rule needs operator attention (disabled, remediation failed, mixed results)
    Warn,
    /// No verdict could be produced
    Error,
}

impl fmt::Display for CheckStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CheckStatus::Pass => write!(f, "PASS"),
            CheckStatus::Fail => write!(f, "FAIL"),
            CheckStatus::Skip => write!(f, "SKIP"),
            CheckStatus::Warn => write!(f, "WARN"),
            CheckStatus::Error => write!(f, "ERROR"),
        }
    }
}

impl CheckStatus {
    /// Returns true for statuses that should make the run exit non-zero.
    pub fn is_failure(&self) -> bool {
        matches!(self, CheckStatus::Fail | CheckStatus::Error)
    }
}

/// Expected and actual value of one compared dimension.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Comparison {
    /// Value required by the rule
    pub expected: String,
    /// Value found on the host
    pub actual: String,
    /// Whether the two agree
    pub matched: bool,
}

impl Comparison {
    /// Build a comparison with an explicit verdict.
    pub fn new(expected: impl Into<String>, actual: impl Into<String>, matched: bool) -> Self {
        Self {
            expected: expected.into(),
            actual: actual.into(),
            matched,
        }
    }
}

/// Per-dimension result of a permission/owner/group check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttributeReport {
    /// Permission bits
    pub permissions: Comparison,
    /// Owning user id
    pub owner: Comparison,
    /// Owning group id
    pub group: Comparison,
}

impl AttributeReport {
    /// True when all three dimensions match.
    pub fn all_matched(&self) -> bool {
        self.permissions.matched && self.owner.matched && self.group.matched
    }

    /// Names of the dimensions that did not match.
    pub fn mismatched(&self) -> Vec<&'static str> {
        let mut out = Vec::new();
        if !self.permissions.matched {
            out.push("permissions");
        }
        if !self.owner.matched {
            out.push("owner");
        }
        if !self.group.matched {
            out.push("group");
        }
        out
    }
}

/// What a handler actually observed, beyond the bare status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Observation {
    /// Kernel module is not loaded
    Unloaded,
    /// Kernel module is loaded
    Loaded,
    /// Kernel module does not exist on this host
    ModuleNotFound,
    /// A blacklist directive for the module is active
    Denied,
    /// No blacklist directive for the module is active
    Allowed,
    /// Setting string is not a single `key=value`
    Malformed,
    /// A remediation step could not be applied
    RemediationFailed,
    /// Kernel parameter comparison
    Value(Comparison),
    /// File permission/owner/group comparison
    Attributes(AttributeReport),
    /// Package is installed
    Installed,
    /// Package is not installed
    NotInstalled,
    /// Service is enabled
    Enabled,
    /// Service is not enabled
    Disabled,
    /// The pattern matched a line
    Matched,
    /// The pattern matched no line
    NotMatched,
    /// Rule was skipped explicitly
    Excluded,
    /// Rule does not apply to this OS
    NotApplicable,
    /// Rule is disabled for the current mode
    NotConfigured,
}

impl fmt::Display for Observation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Observation::Unloaded => write!(f, "UNLOADED"),
            Observation::Loaded => write!(f, "LOADED"),
            Observation::ModuleNotFound => write!(f, "NOT FOUND"),
            Observation::Denied => write!(f, "DENIED"),
            Observation::Allowed => write!(f, "ALLOWED"),
            Observation::Malformed => write!(f, "MALFORMED"),
            Observation::RemediationFailed => write!(f, "REMEDIATION FAILED"),
            Observation::Value(c) => write!(f, "{} (expected {})", c.actual, c.expected),
            Observation::Attributes(report) => write!(
                f,
                "{} {} {}",
                report.permissions.actual, report.owner.actual, report.group.actual
            ),
            Observation::Installed => write!(f, "INSTALLED"),
            Observation::NotInstalled => write!(f, "NOT INSTALLED"),
            Observation::Enabled => write!(f, "ENABLED"),
            Observation::Disabled => write!(f, "DISABLED"),
            Observation::Matched => write!(f, "MATCHED"),
            Observation::NotMatched => write!(f, "NOT MATCHED"),
            Observation::Excluded => write!(f, "EXCLUDED"),
            Observation::NotApplicable => write!(f, "NOT APPLICABLE"),
            Observation::NotConfigured => write!(f, "NOT CONFIGURED"),
        }
    }
}

/// Outcome of one check (or one sub-result of a check).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckOutcome {
    /// Verdict
    pub status: CheckStatus,
    /// Observed host state, when the handler has one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observation: Option<Observation>,
    /// Human-readable detail (error message, reason for skipping)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl CheckOutcome {
    /// Outcome with the given status and nothing else.
    pub fn new(status: CheckStatus) -> Self {
        Self {
            status,
            observation: None,
            detail: None,
        }
    }

    pub fn pass() -> Self {
        Self::new(CheckStatus::Pass)
    }

    pub fn fail() -> Self {
        Self::new(CheckStatus::Fail)
    }

    pub fn skip() -> Self {
        Self::new(CheckStatus::Skip)
    }

    pub fn warn() -> Self {
        Self::new(CheckStatus::Warn)
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::new(CheckStatus::Error).with_detail(message)
    }

    /// PASS when `ok`, FAIL otherwise.
    pub fn from_bool(ok: bool) -> Self {
        if ok {
            Self::pass()
        } else {
            Self::fail()
        }
    }

    pub fn with_observation(mut self, observation: Observation) -> Self {
        self.observation = Some(observation);
        self
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}

/// Location of an outcome in the status tree.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StatusPath {
    pub category: String,
    pub sub_category: Option<String>,
    pub check: Option<String>,
    pub sub_key: Option<String>,
}

impl StatusPath {
    /// Path to a category.
    pub fn category(category: impl Into<String>) -> Self {
        Self {
            category: category.into(),
            sub_category: None,
            check: None,
            sub_key: None,
        }
    }

    /// Path to a sub-category.
    pub fn sub_category(category: impl Into<String>, sub_category: impl Into<String>) -> Self {
        Self {
            sub_category: Some(sub_category.into()),
            ..Self::category(category)
        }
    }

    /// Path to a check.
    pub fn check(
        category: impl Into<String>,
        sub_category: impl Into<String>,
        check: impl Into<String>,
    ) -> Self {
        Self {
            check: Some(check.into()),
            ..Self::sub_category(category, sub_category)
        }
    }

    /// Extend a check path with a sub-key.
    pub fn with_sub_key(mut self, sub_key: impl Into<String>) -> Self {
        self.sub_key = Some(sub_key.into());
        self
    }
}

impl fmt::Display for StatusPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.category)?;
        for part in [&self.sub_category, &self.check, &self.sub_key].into_iter().flatten() {
            write!(f, ".{}", part)?;
        }
        Ok(())
    }
}

/// Status of one check.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckEntry {
    /// Display name
    pub name: String,
    /// Reference data copied from the rule
    #[serde(flatten)]
    pub metadata: CheckMetadata,
    /// Outcome of the check as a whole
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outcome: Option<CheckOutcome>,
    /// Outcomes keyed by sub-identifier
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub results: IndexMap<String, CheckOutcome>,
}

impl CheckEntry {
    /// Overall status of the check.
    ///
    /// The check's own outcome wins when present. Otherwise the keyed results
    /// are folded: any ERROR gives ERROR, all PASS gives PASS, all FAIL gives
    /// FAIL, and a PASS/FAIL mix gives WARN. Remediation warnings recorded next
    /// to a read result do not change it.
    pub fn verdict(&self) -> Option<CheckStatus> {
        if let Some(outcome) = &self.outcome {
            return Some(outcome.status);
        }
        if self.results.is_empty() {
            return None;
        }

        let statuses: Vec<CheckStatus> = self
            .results
            .values()
            .filter(|o| o.observation != Some(Observation::RemediationFailed))
            .map(|o| o.status)
            .collect();

        if statuses.contains(&CheckStatus::Error) {
            return Some(CheckStatus::Error);
        }
        let passed = statuses.iter().any(|s| *s == CheckStatus::Pass);
        let failed = statuses.iter().any(|s| *s == CheckStatus::Fail);
        Some(match (passed, failed) {
            (true, true) => CheckStatus::Warn,
            (false, true) => CheckStatus::Fail,
            (true, false) if statuses.iter().all(|s| *s == CheckStatus::Pass) => CheckStatus::Pass,
            _ => statuses.first().copied().unwrap_or(CheckStatus::Warn),
        })
    }
}

/// Status of one sub-category.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubCategoryStatus {
    /// Display name
    pub name: String,
    /// Gating outcome, when the sub-category was not descended into
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outcome: Option<CheckOutcome>,
    /// Checks in traversal order
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub checks: IndexMap<String, CheckEntry>,
}

/// Status of one category.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryStatus {
    /// Display name
    pub name: String,
    /// Gating outcome, when the category was not descended into
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outcome: Option<CheckOutcome>,
    /// Sub-categories in traversal order
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub sub_categories: IndexMap<String, SubCategoryStatus>,
}

/// Counts per status across a whole tree.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusSummary {
    pub pass: u32,
    pub fail: u32,
    pub skip: u32,
    pub warn: u32,
    pub error: u32,
}

impl StatusSummary {
    fn add(&mut self, status: CheckStatus) {
        match status {
            CheckStatus::Pass => self.pass += 1,
            CheckStatus::Fail => self.fail += 1,
            CheckStatus::Skip => self.skip += 1,
            CheckStatus::Warn => self.warn += 1,
            CheckStatus::Error => self.error += 1,
        }
    }

    /// Total number of recorded outcomes.
    pub fn total(&self) -> u32 {
        self.pass + self.fail + self.skip + self.warn + self.error
    }
}

/// Outcomes of one run, shaped like the rule tree.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StatusTree {
    categories: IndexMap<String, CategoryStatus>,
}

impl StatusTree {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create the category node if missing, recording its display name.
    pub fn open_category(&mut self, id: &str, name: &str) {
        self.categories
            .entry(id.to_string())
            .or_insert_with(|| CategoryStatus {
                name: name.to_string(),
                ..CategoryStatus::default()
            });
    }

    /// Create the sub-category node (and its parents) if missing.
    pub fn open_sub_category(&mut self, category: &str, id: &str, name: &str) {
        self.open_category(category, category);
        if let Some(cat) = self.categories.get_mut(category) {
            cat.sub_categories
                .entry(id.to_string())
                .or_insert_with(|| SubCategoryStatus {
                    name: name.to_string(),
                    ..SubCategoryStatus::default()
                });
        }
    }

    /// Create the check node (and its parents) if missing.
    pub fn open_check(&mut self, category: &str, sub_category: &str, id: &str, name: &str) {
        self.open_sub_category(category, sub_category, sub_category);
        if let Some(sub) = self
            .categories
            .get_mut(category)
            .and_then(|c| c.sub_categories.get_mut(sub_category))
        {
            sub.checks.entry(id.to_string()).or_insert_with(|| CheckEntry {
                name: name.to_string(),
                ..CheckEntry::default()
            });
        }
    }

    /// Attach a rule's reference data to an open check entry.
    pub fn annotate_check(
        &mut self,
        category: &str,
        sub_category: &str,
        id: &str,
        metadata: &CheckMetadata,
    ) {
        if let Some(entry) = self
            .categories
            .get_mut(category)
            .and_then(|c| c.sub_categories.get_mut(sub_category))
            .and_then(|s| s.checks.get_mut(id))
        {
            entry.metadata = metadata.clone();
        }
    }

    /// Record an outcome at `path`, creating intermediate nodes as needed.
    ///
    /// Returns `false` and leaves the tree unchanged if an outcome was already
    /// recorded at exactly that location.
    pub fn record(&mut self, path: &StatusPath, outcome: CheckOutcome) -> bool {
        let slot = match (&path.sub_category, &path.check) {
            (None, _) => {
                self.open_category(&path.category, &path.category);
                self.categories
                    .get_mut(&path.category)
                    .map(|c| &mut c.outcome)
            }
            (Some(sub), None) => {
                self.open_sub_category(&path.category, sub, sub);
                self.categories
                    .get_mut(&path.category)
                    .and_then(|c| c.sub_categories.get_mut(sub))
                    .map(|s| &mut s.outcome)
            }
            (Some(sub), Some(check)) => {
                self.open_check(&path.category, sub, check, check);
                let entry = self
                    .categories
                    .get_mut(&path.category)
                    .and_then(|c| c.sub_categories.get_mut(sub))
                    .and_then(|s| s.checks.get_mut(check));
                match (entry, &path.sub_key) {
                    (Some(entry), Some(key)) => {
                        if entry.results.contains_key(key) {
                            warn!(path = %path, "Outcome already recorded, keeping the first");
                            return false;
                        }
                        entry.results.insert(key.clone(), outcome);
                        return true;
                    }
                    (Some(entry), None) => Some(&mut entry.outcome),
                    (None, _) => None,
                }
            }
        };

        match slot {
            Some(slot) if slot.is_none() => {
                *slot = Some(outcome);
                true
            }
            _ => {
                warn!(path = %path, "Outcome already recorded, keeping the first");
                false
            }
        }
    }

    /// Categories in traversal order.
    pub fn categories(&self) -> impl Iterator<Item = (&String, &CategoryStatus)> {
        self.categories.iter()
    }

    /// Look up a category.
    pub fn category(&self, id: &str) -> Option<&CategoryStatus> {
        self.categories.get(id)
    }

    /// Look up a sub-category.
    pub fn sub_category(&self, category: &str, sub_category: &str) -> Option<&SubCategoryStatus> {
        self.category(category)?.sub_categories.get(sub_category)
    }

    /// Look up a check.
    pub fn check(&self, category: &str, sub_category: &str, check: &str) -> Option<&CheckEntry> {
        self.sub_category(category, sub_category)?.checks.get(check)
    }

    /// Returns true if nothing was recorded.
    pub fn is_empty(&self) -> bool {
        self.categories.is_empty()
    }

    /// Count every recorded outcome, gating outcomes included.
    pub fn summary(&self) -> StatusSummary {
        let mut summary = StatusSummary::default();
        for category in self.categories.values() {
            if let Some(o) = &category.outcome {
                summary.add(o.status);
            }
            for sub in category.sub_categories.values() {
                if let Some(o) = &sub.outcome {
                    summary.add(o.status);
                }
                for check in sub.checks.values() {
                    if let Some(o) = &check.outcome {
                        summary.add(o.status);
                    }
                    for o in check.results.values() {
                        summary.add(o.status);
                    }
                }
            }
        }
        summary
    }

    /// True if any check ended in FAIL or ERROR.
    pub fn has_failures(&self) -> bool {
        let summary = self.summary();
        summary.fail > 0 || summary.error > 0
    }
}
