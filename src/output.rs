//! Output and reporting for hardshell

use chrono::{DateTime, Utc};
use colored::{ColoredString, Colorize};
use serde::Serialize;

use crate::os::OsDescriptor;
use crate::rules::Mode;
use crate::status::{CheckOutcome, CheckStatus, StatusSummary, StatusTree};

/// Column at which statuses are printed.
const STATUS_COLUMN: usize = 64;

/// Everything the reporter needs about one run.
#[derive(Debug, Serialize)]
pub struct Report<'a> {
    pub os: &'a OsDescriptor,
    pub mode: Mode,
    pub timestamp: DateTime<Utc>,
    pub summary: StatusSummary,
    pub results: &'a StatusTree,
}

impl<'a> Report<'a> {
    /// Report for `results`, stamped now.
    pub fn new(os: &'a OsDescriptor, mode: Mode, results: &'a StatusTree) -> Self {
        Self {
            os,
            mode,
            timestamp: Utc::now(),
            summary: results.summary(),
            results,
        }
    }

    /// Pretty-printed JSON.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    /// Human-readable report, one line per outcome.
    pub fn to_human(&self) -> String {
        let mut out = String::new();
        let title = format!("HARDSHELL {} [{}]", self.mode.to_string().to_uppercase(), self.os);
        let stars = "*".repeat(80_usize.saturating_sub(title.len() + 1));
        out.push_str(&format!("{} {}\n", title.bright_white().bold(), stars.bright_black()));

        for (_, category) in self.results.categories() {
            out.push_str(&format!("\n{}\n", category.name.to_uppercase().bright_white().bold()));
            if let Some(outcome) = &category.outcome {
                line(&mut out, 1, "(all)", outcome);
            }
            for (_, sub) in &category.sub_categories {
                out.push_str(&format!("  {}\n", sub.name.bold()));
                if let Some(outcome) = &sub.outcome {
                    line(&mut out, 2, "(all)", outcome);
                }
                for (_, check) in &sub.checks {
                    if let Some(outcome) = &check.outcome {
                        line(&mut out, 2, &check.name, outcome);
                    }
                    if !check.results.is_empty() {
                        if let Some(verdict) = check.verdict() {
                            line(&mut out, 2, &check.name, &CheckOutcome::new(verdict));
                        }
                        for (key, outcome) in &check.results {
                            line(&mut out, 3, key, outcome);
                        }
                    }
                }
            }
        }

        let s = &self.summary;
        out.push_str(&format!("\n{} {}\n", "SUMMARY".bright_white().bold(), "*".repeat(72).bright_black()));
        out.push_str(&format!(
            "{}={:<4} {}={:<4} {}={:<4} {}={:<4} {}={:<4}\n",
            "pass".green(),
            s.pass,
            "fail".red(),
            s.fail,
            "warn".yellow(),
            s.warn,
            "skip".cyan(),
            s.skip,
            "error".red().bold(),
            s.error,
        ));
        out
    }
}

fn line(out: &mut String, depth: usize, label: &str, outcome: &CheckOutcome) {
    let indent = "  ".repeat(depth);
    let text = format!("{}{}", indent, label);
    let dots = ".".repeat(STATUS_COLUMN.saturating_sub(text.chars().count() + 1).max(1));
    out.push_str(&format!("{} {} [{}]", text, dots.bright_black(), colorize(outcome.status)));
    if let Some(observation) = &outcome.observation {
        out.push_str(&format!(" {}", observation));
    }
    if let Some(detail) = &outcome.detail {
        out.push_str(&format!(" ({})", detail.bright_black()));
    }
    out.push('\n');
}

/// Status label in its color.
pub fn colorize(status: CheckStatus) -> ColoredString {
    let label = status.to_string();
    match status {
        CheckStatus::Pass => label.green(),
        CheckStatus::Fail => label.red().bold(),
        CheckStatus::Skip => label.cyan(),
        CheckStatus::Warn => label.yellow(),
        CheckStatus::Error => label.red(),
    }
}
