//! Kernel parameter checks.
//!
//! Each `key=value` setting is compared with the live value from
//! `sysctl -n <key>` and recorded under the key. Hardening reconciles every
//! setting into `<sysctl_dir>/<sysctl_prefix><sub-category>.conf` and loads
//! that file with `sysctl -p`.

use std::path::PathBuf;
use tracing::{debug, info};

use super::{error_outcome, remediation_failed, remediation_key, HandlerContext, KeyedOutcome};
use crate::error::{Error, Result};
use crate::reconcile::{split_setting, SettingsReconciler};
use crate::rules::ParameterCheck;
use crate::runner::argv;
use crate::status::{CheckOutcome, Comparison, Observation};

/// Sub-key of the outcome recording a failed `sysctl -p`.
pub const APPLY_KEY: &str = "apply";

pub async fn run(ctx: &HandlerContext<'_>, check: &ParameterCheck) -> Vec<KeyedOutcome> {
    let mut outcomes = Vec::with_capacity(check.settings.len());

    let mut parsed = Vec::with_capacity(check.settings.len());
    for setting in &check.settings {
        match split_setting(setting) {
            Ok((key, value)) => parsed.push((setting.trim(), key, value)),
            Err(e) => {
                debug!(rule = %ctx.rule_path(), error = %e, "Malformed setting");
                outcomes.push(KeyedOutcome::keyed(
                    setting.trim(),
                    CheckOutcome::error(e.to_string()).with_observation(Observation::Malformed),
                ));
            }
        }
    }

    if ctx.should_remediate() && !parsed.is_empty() {
        remediate(ctx, &parsed, &mut outcomes).await;
    }

    for (_, key, expected) in &parsed {
        let outcome = match live_value(ctx, key).await {
            Ok(actual) => {
                let matched = normalize(&actual) == normalize(expected);
                CheckOutcome::from_bool(matched)
                    .with_observation(Observation::Value(Comparison::new(*expected, actual, matched)))
            }
            Err(e) => error_outcome(ctx, &e),
        };
        outcomes.push(KeyedOutcome::keyed(*key, outcome));
    }
    outcomes
}

async fn remediate(
    ctx: &HandlerContext<'_>,
    parsed: &[(&str, &str, &str)],
    outcomes: &mut Vec<KeyedOutcome>,
) {
    let paths = &ctx.config.paths;
    let reconciler =
        SettingsReconciler::new(&paths.sysctl_dir).with_extension(paths.config_extension.as_str());
    let target = paths.sysctl_file_name(ctx.sub_category);

    let mut applied: Option<PathBuf> = None;
    for (setting, key, _) in parsed {
        match reconciler.reconcile(&target, setting) {
            Ok(path) => applied = Some(path),
            Err(e) => outcomes.push(KeyedOutcome::keyed(remediation_key(key), remediation_failed(ctx, &e))),
        }
    }

    if let Some(path) = applied {
        if let Err(e) = load_file(ctx, &path).await {
            outcomes.push(KeyedOutcome::keyed(remediation_key(APPLY_KEY), remediation_failed(ctx, &e)));
        }
    }
}

async fn load_file(ctx: &HandlerContext<'_>, path: &std::path::Path) -> Result<()> {
    let path = path.display().to_string();
    let result = ctx.run(argv(["sysctl", "-p", path.as_str()])).await?;
    if !result.success {
        return Err(Error::command_status(format!("sysctl -p {}", path), &result));
    }
    info!(file = %path, "Kernel parameters loaded");
    Ok(())
}

async fn live_value(ctx: &HandlerContext<'_>, key: &str) -> Result<String> {
    let result = ctx.run(argv(["sysctl", "-n", key])).await?;
    if !result.success {
        return Err(Error::command_status(format!("sysctl -n {}", key), &result));
    }
    Ok(result.stdout.trim().to_string())
}

/// Multi-value parameters (`net.ipv4.ip_local_port_range`) come back
/// tab-separated; compare them word by word.
fn normalize(value: &str) -> String {
    value.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize() {
        assert_eq!(normalize("32768\t60999\n"), "32768 60999");
        assert_eq!(normalize(" 1 "), "1");
        assert_eq!(normalize("32768 60999"), normalize("32768\t 60999"));
    }
}
