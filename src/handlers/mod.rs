//! Check handlers.
//!
//! One handler per check type. A handler receives a [`HandlerContext`] and
//! returns the outcomes it produced; it never returns an error; failures it
//! runs into become [`CheckStatus::Error`](crate::status::CheckStatus::Error)
//! outcomes carrying the error text.
//!
//! Handlers that support remediation (module, parameter) perform it first in
//! harden mode, record a failed fix as a WARN outcome next to the read result,
//! and then run the same read as audit mode.

pub mod module;
pub mod package;
pub mod parameter;
pub mod permission;
pub mod regex;
pub mod service;

use tracing::{debug, error, warn};

use crate::config::Config;
use crate::error::{Error, Result};
use crate::os::OsDescriptor;
use crate::rules::{Check, CheckKind, Mode};
use crate::runner::{CommandResult, CommandRunner};
use crate::status::{CheckOutcome, Observation};

/// Sub-key suffix used for remediation outcomes.
pub const REMEDIATION_KEY: &str = "remediation";

/// Everything a handler may look at while evaluating one check.
pub struct HandlerContext<'a> {
    /// Current run mode
    pub mode: Mode,
    /// Host OS
    pub os: &'a OsDescriptor,
    /// Command execution
    pub runner: &'a dyn CommandRunner,
    /// Resolved configuration
    pub config: &'a Config,
    /// Id of the enclosing category
    pub category: &'a str,
    /// Id of the enclosing sub-category
    pub sub_category: &'a str,
    /// The check being evaluated
    pub check: &'a Check,
}

impl HandlerContext<'_> {
    /// True when this evaluation should change the host.
    pub fn should_remediate(&self) -> bool {
        self.mode == Mode::Harden && self.check.set
    }

    /// Run a command, turning a runner failure into a crate error.
    pub async fn run(&self, argv: Vec<String>) -> Result<CommandResult> {
        self.runner.run(&argv).await.map_err(|source| Error::Command {
            command: argv.join(" "),
            source,
        })
    }

    /// Dotted path of the check, for logs.
    pub fn rule_path(&self) -> String {
        format!("{}.{}.{}", self.category, self.sub_category, self.check.id)
    }
}

/// One outcome produced by a handler, optionally keyed by a sub-identifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyedOutcome {
    pub sub_key: Option<String>,
    pub outcome: CheckOutcome,
}

impl KeyedOutcome {
    /// Outcome for the check as a whole.
    pub fn single(outcome: CheckOutcome) -> Self {
        Self {
            sub_key: None,
            outcome,
        }
    }

    /// Outcome for one sub-identifier of the check.
    pub fn keyed(sub_key: impl Into<String>, outcome: CheckOutcome) -> Self {
        Self {
            sub_key: Some(sub_key.into()),
            outcome,
        }
    }
}

/// Evaluate a check with the handler for its type.
///
/// Returns `None` for an unknown check type.
pub async fn evaluate(ctx: &HandlerContext<'_>) -> Option<Vec<KeyedOutcome>> {
    let outcomes = match &ctx.check.kind {
        CheckKind::Module(check) => module::run(ctx, check).await,
        CheckKind::Parameter(check) => parameter::run(ctx, check).await,
        CheckKind::Permission(check) => permission::run(ctx, check).await,
        CheckKind::Package(check) => vec![package::run(ctx, check).await],
        CheckKind::Regex(check) => regex::run(ctx, check).await,
        CheckKind::Service(check) => vec![service::run(ctx, check).await],
        CheckKind::Unknown(check_type) => {
            debug!(rule = %ctx.rule_path(), check_type = %check_type, "Ignoring unknown check type");
            return None;
        }
    };
    Some(outcomes)
}

/// ERROR outcome for `err`, logged against the rule.
pub(crate) fn error_outcome(ctx: &HandlerContext<'_>, err: &Error) -> CheckOutcome {
    error!(rule = %ctx.rule_path(), error = %err, "Check failed");
    CheckOutcome::error(err.to_string())
}

/// WARN outcome for a failed remediation step, logged against the rule.
pub(crate) fn remediation_failed(ctx: &HandlerContext<'_>, err: &Error) -> CheckOutcome {
    if err.is_permission_denied() {
        warn!(rule = %ctx.rule_path(), error = %err, "Remediation needs root privileges");
    } else {
        warn!(rule = %ctx.rule_path(), error = %err, "Remediation failed");
    }
    CheckOutcome::warn()
        .with_observation(Observation::RemediationFailed)
        .with_detail(err.to_string())
}

/// Sub-key for the remediation outcome belonging to `sub_key`.
pub(crate) fn remediation_key(sub_key: &str) -> String {
    format!("{}.{}", sub_key, REMEDIATION_KEY)
}
