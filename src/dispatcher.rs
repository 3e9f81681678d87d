//! Rule tree traversal.
//!
//! [`RuleDispatcher::evaluate`] walks categories, sub-categories and checks in
//! document order. Each level is gated before it is entered:
//!
//! 1. `skip` set: SKIP, not entered
//! 2. disabled for the current mode: WARN, not entered
//! 3. OS filter present and not matching the host: SKIP, not entered
//!
//! A gated level records its outcome at its own position in the status tree.
//! Checks that pass the gates go to the handler for their type, one at a time.

use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::handlers::{self, HandlerContext};
use crate::os::OsDescriptor;
use crate::rules::{Check, Gate, Mode, RuleTree};
use crate::runner::CommandRunner;
use crate::status::{CheckOutcome, CheckStatus, Observation, StatusPath, StatusTree};

/// Evaluates a rule tree against the host.
pub struct RuleDispatcher {
    runner: Arc<dyn CommandRunner>,
    config: Config,
}

impl RuleDispatcher {
    /// Create a dispatcher running commands through `runner`.
    pub fn new(runner: Arc<dyn CommandRunner>, config: Config) -> Self {
        Self { runner, config }
    }

    /// Configuration in use.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Evaluate every rule and return the collected outcomes.
    pub async fn evaluate(&self, mode: Mode, os: &OsDescriptor, tree: &RuleTree) -> StatusTree {
        info!(mode = %mode, os = %os, checks = tree.check_count(), "Evaluating rules");
        let mut status = StatusTree::new();

        for category in &tree.categories {
            status.open_category(&category.id, &category.name);
            if let Some(outcome) = gate_outcome(&category.gate, mode, os) {
                debug!(category = %category.id, status = %outcome.status, "Category gated");
                status.record(&StatusPath::category(&category.id), outcome);
                continue;
            }

            for sub in &category.sub_categories {
                status.open_sub_category(&category.id, &sub.id, &sub.name);
                if let Some(outcome) = gate_outcome(&sub.gate, mode, os) {
                    debug!(category = %category.id, sub_category = %sub.id, status = %outcome.status, "Sub-category gated");
                    status.record(&StatusPath::sub_category(&category.id, &sub.id), outcome);
                    continue;
                }

                for check in &sub.checks {
                    let ctx = HandlerContext {
                        mode,
                        os,
                        runner: self.runner.as_ref(),
                        config: &self.config,
                        category: &category.id,
                        sub_category: &sub.id,
                        check,
                    };
                    self.evaluate_check(&ctx, &mut status).await;
                }
            }
        }

        let summary = status.summary();
        info!(
            pass = summary.pass,
            fail = summary.fail,
            warn = summary.warn,
            skip = summary.skip,
            error = summary.error,
            "Evaluation complete"
        );
        status
    }

    async fn evaluate_check(&self, ctx: &HandlerContext<'_>, status: &mut StatusTree) {
        let check: &Check = ctx.check;
        let path = StatusPath::check(ctx.category, ctx.sub_category, &check.id);

        if let Some(outcome) = gate_outcome(&check.gate, ctx.mode, ctx.os) {
            debug!(rule = %path, status = %outcome.status, "Check gated");
            open_entry(ctx, status);
            status.record(&path, outcome);
            return;
        }

        let Some(outcomes) = handlers::evaluate(ctx).await else {
            return;
        };

        open_entry(ctx, status);
        for keyed in outcomes {
            let target = match keyed.sub_key {
                Some(key) => path.clone().with_sub_key(key),
                None => path.clone(),
            };
            log_outcome(&target, &keyed.outcome);
            status.record(&target, keyed.outcome);
        }
    }
}

/// Create the status entry of the context's check, carrying its metadata.
fn open_entry(ctx: &HandlerContext<'_>, status: &mut StatusTree) {
    let check = ctx.check;
    status.open_check(ctx.category, ctx.sub_category, &check.id, &check.name);
    status.annotate_check(ctx.category, ctx.sub_category, &check.id, &check.metadata);
}

/// Outcome for a level that must not be entered, or `None` to enter it.
pub fn gate_outcome(gate: &Gate, mode: Mode, os: &OsDescriptor) -> Option<CheckOutcome> {
    if gate.skip {
        return Some(CheckOutcome::skip().with_observation(Observation::Excluded));
    }
    if !gate.enabled(mode) {
        return Some(
            CheckOutcome::warn()
                .with_observation(Observation::NotConfigured)
                .with_detail(format!("disabled for {} mode", mode)),
        );
    }
    if !gate.applies_to(os) {
        return Some(CheckOutcome::skip().with_observation(Observation::NotApplicable));
    }
    None
}

fn log_outcome(path: &StatusPath, outcome: &CheckOutcome) {
    let observation = outcome
        .observation
        .as_ref()
        .map(ToString::to_string)
        .unwrap_or_default();
    match outcome.status {
        CheckStatus::Pass | CheckStatus::Fail | CheckStatus::Skip => {
            info!(rule = %path, status = %outcome.status, observation = %observation, "Check complete")
        }
        CheckStatus::Warn => {
            warn!(rule = %path, observation = %observation, detail = ?outcome.detail, "Check needs attention")
        }
        CheckStatus::Error => {
            error!(rule = %path, detail = ?outcome.detail, "Check produced no verdict")
        }
    }
}
