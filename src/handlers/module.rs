//! Kernel module checks.
//!
//! Two results per rule:
//! - `load`: the module is not loaded (`lsmod`),
//! - `deny`: a `blacklist <module>` directive is active (`modprobe --showconfig`).
//!
//! Hardening unloads the module with `modprobe -r` and writes the directive to
//! `<modprobe_dir>/<sub-category>-<module>.conf`.

use tracing::{debug, info};

use super::{error_outcome, remediation_failed, remediation_key, HandlerContext, KeyedOutcome};
use crate::error::{Error, Result};
use crate::reconcile::ensure_line;
use crate::rules::ModuleCheck;
use crate::runner::argv;
use crate::status::{CheckOutcome, Observation};

/// Sub-key of the loaded/unloaded result.
pub const LOAD_KEY: &str = "load";
/// Sub-key of the deny-list result.
pub const DENY_KEY: &str = "deny";

pub async fn run(ctx: &HandlerContext<'_>, check: &ModuleCheck) -> Vec<KeyedOutcome> {
    let mut outcomes = Vec::with_capacity(2);
    load_status(ctx, &check.module_name, &mut outcomes).await;
    deny_status(ctx, &check.module_name, &mut outcomes).await;
    outcomes
}

async fn load_status(ctx: &HandlerContext<'_>, module: &str, outcomes: &mut Vec<KeyedOutcome>) {
    if ctx.should_remediate() {
        match is_loaded(ctx, module).await {
            Ok(true) => match unload(ctx, module).await {
                Ok(Unload::NotFound) => {
                    outcomes.push(KeyedOutcome::keyed(
                        LOAD_KEY,
                        CheckOutcome::pass().with_observation(Observation::ModuleNotFound),
                    ));
                    return;
                }
                Ok(Unload::Done) => {}
                Err(e) => outcomes.push(KeyedOutcome::keyed(
                    remediation_key(LOAD_KEY),
                    remediation_failed(ctx, &e),
                )),
            },
            Ok(false) => debug!(module = %module, "Module not loaded, nothing to unload"),
            // The read below reports the same failure.
            Err(_) => {}
        }
    }

    let outcome = match is_loaded(ctx, module).await {
        Ok(true) => CheckOutcome::fail().with_observation(Observation::Loaded),
        Ok(false) => CheckOutcome::pass().with_observation(Observation::Unloaded),
        Err(e) => error_outcome(ctx, &e),
    };
    outcomes.push(KeyedOutcome::keyed(LOAD_KEY, outcome));
}

async fn deny_status(ctx: &HandlerContext<'_>, module: &str, outcomes: &mut Vec<KeyedOutcome>) {
    if ctx.should_remediate() {
        let path = ctx.config.paths.modprobe_file(ctx.sub_category, module);
        match ensure_line(&path, &deny_line(module)) {
            Ok(true) => info!(module = %module, file = %path.display(), "Module deny-listed"),
            Ok(false) => debug!(module = %module, file = %path.display(), "Module already deny-listed"),
            Err(e) => outcomes.push(KeyedOutcome::keyed(
                remediation_key(DENY_KEY),
                remediation_failed(ctx, &e),
            )),
        }
    }

    let outcome = match is_denied(ctx, module).await {
        Ok(true) => CheckOutcome::pass().with_observation(Observation::Denied),
        Ok(false) => CheckOutcome::fail().with_observation(Observation::Allowed),
        Err(e) => error_outcome(ctx, &e),
    };
    outcomes.push(KeyedOutcome::keyed(DENY_KEY, outcome));
}

enum Unload {
    Done,
    NotFound,
}

async fn unload(ctx: &HandlerContext<'_>, module: &str) -> Result<Unload> {
    let result = ctx.run(argv(["modprobe", "-r", module])).await?;
    if result.stderr.to_lowercase().contains("not found") {
        debug!(module = %module, "Module not present on this host");
        return Ok(Unload::NotFound);
    }
    if !result.success {
        return Err(Error::command_status(format!("modprobe -r {}", module), &result));
    }
    info!(module = %module, "Module unloaded");
    Ok(Unload::Done)
}

async fn is_loaded(ctx: &HandlerContext<'_>, module: &str) -> Result<bool> {
    let result = ctx.run(argv(["lsmod"])).await?;
    if !result.success {
        return Err(Error::command_status("lsmod", &result));
    }
    Ok(lsmod_lists(&result.stdout, module))
}

async fn is_denied(ctx: &HandlerContext<'_>, module: &str) -> Result<bool> {
    let result = ctx.run(argv(["modprobe", "--showconfig"])).await?;
    if !result.success {
        return Err(Error::command_status("modprobe --showconfig", &result));
    }
    Ok(showconfig_denies(&result.stdout, module))
}

fn deny_line(module: &str) -> String {
    format!("blacklist {}", module)
}

/// `lsmod` lists one module per line, name first, after a header line.
/// The kernel reports dashes in module names as underscores.
fn lsmod_lists(output: &str, module: &str) -> bool {
    let wanted = module.replace('-', "_");
    output
        .lines()
        .skip(1)
        .filter_map(|line| line.split_whitespace().next())
        .any(|name| name == wanted)
}

fn showconfig_denies(output: &str, module: &str) -> bool {
    let line = deny_line(module);
    output.lines().any(|l| l.trim() == line)
}

#[cfg(test)]
mod tests {
    use super::*;

    const LSMOD: &str = "Module                  Size  Used by
squashfs               69632  0
nf_tables             311296  0
";

    #[test]
    fn test_lsmod_lists() {
        assert!(lsmod_lists(LSMOD, "squashfs"));
        assert!(lsmod_lists(LSMOD, "nf-tables"));
        assert!(!lsmod_lists(LSMOD, "cramfs"));
        assert!(!lsmod_lists(LSMOD, "Module"));
    }

    #[test]
    fn test_showconfig_denies() {
        let output = "blacklist floppy\nblacklist squashfs\nalias squashfs_x squashfs\n";
        assert!(showconfig_denies(output, "squashfs"));
        assert!(!showconfig_denies(output, "cramfs"));
        assert!(!showconfig_denies("blacklist squashfs_extra\n", "squashfs"));
    }
}
