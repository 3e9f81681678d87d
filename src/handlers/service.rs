//! Service enablement checks.

use tracing::debug;

use super::{error_outcome, HandlerContext, KeyedOutcome};
use crate::rules::ServiceCheck;
use crate::status::{CheckOutcome, Observation};

pub async fn run(ctx: &HandlerContext<'_>, check: &ServiceCheck) -> KeyedOutcome {
    let mut command = ctx.config.commands.service_enabled.clone();
    command.push(check.service_name.clone());

    let result = match ctx.run(command).await {
        Ok(result) => result,
        Err(e) => return KeyedOutcome::single(error_outcome(ctx, &e)),
    };

    let enabled = result.success && reports_enabled(&result.stdout);
    debug!(service = %check.service_name, enabled, exit_code = result.exit_code, "Service state");

    let outcome = if enabled {
        CheckOutcome::pass().with_observation(Observation::Enabled)
    } else {
        CheckOutcome::fail().with_observation(Observation::Disabled)
    };
    KeyedOutcome::single(outcome)
}

/// `systemctl is-enabled` prints `enabled`, or `enabled-runtime` for units
/// enabled until the next reboot.
fn reports_enabled(stdout: &str) -> bool {
    stdout
        .split_whitespace()
        .any(|word| word == "enabled" || word.starts_with("enabled-"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reports_enabled() {
        assert!(reports_enabled("enabled\n"));
        assert!(reports_enabled("enabled-runtime\n"));
        assert!(!reports_enabled("disabled\n"));
        assert!(!reports_enabled("masked\n"));
        assert!(!reports_enabled(""));
    }
}
