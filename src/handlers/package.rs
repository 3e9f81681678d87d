//! Package installation checks.
//!
//! The configured query command is run with the package name appended and
//! its output and exit status are read together. `dpkg -s` and `pacman -Qi`
//! say "installed" in their output, but `rpm -q` only prints the package
//! version (`telnet-0.17-1.x86_64`), so a zero exit status with no "not
//! installed" text also counts as installed.

use tracing::debug;

use super::{error_outcome, HandlerContext, KeyedOutcome};
use crate::error::Error;
use crate::rules::PackageCheck;
use crate::status::{CheckOutcome, Observation};

pub async fn run(ctx: &HandlerContext<'_>, check: &PackageCheck) -> KeyedOutcome {
    let Some(query) = ctx.config.package_manager(&ctx.os.id) else {
        let err = Error::Config(format!("no package manager configured for '{}'", ctx.os.id));
        return KeyedOutcome::single(error_outcome(ctx, &err));
    };

    let mut command = query.to_vec();
    command.push(check.package_name.clone());

    let result = match ctx.run(command).await {
        Ok(result) => result,
        Err(e) => return KeyedOutcome::single(error_outcome(ctx, &e)),
    };

    let installed = reports_installed(&result.combined_output(), result.success);
    debug!(package = %check.package_name, installed, wanted = check.install, "Package state");

    let observation = if installed {
        Observation::Installed
    } else {
        Observation::NotInstalled
    };
    KeyedOutcome::single(CheckOutcome::from_bool(installed == check.install).with_observation(observation))
}

/// Interpret a package manager query.
///
/// `dpkg -s` and `pacman -Qi` say "installed" for present packages; `rpm -q`
/// prints the package version and exits 0. All three say "not installed" or
/// fail for absent ones.
fn reports_installed(output: &str, success: bool) -> bool {
    let output = output.to_lowercase();
    if output.contains("not installed") || output.contains("deinstall") {
        return false;
    }
    output.contains("installed") || success
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dpkg_output() {
        assert!(reports_installed("Package: ufw\nStatus: install ok installed\n", true));
        assert!(!reports_installed(
            "dpkg-query: package 'telnet' is not installed and no information is available",
            false
        ));
        assert!(!reports_installed("Package: telnet\nStatus: deinstall ok config-files\n", true));
    }

    #[test]
    fn test_rpm_output() {
        assert!(reports_installed("audit-3.1.2-1.fc39.x86_64\n", true));
        assert!(!reports_installed("package telnet is not installed\n", false));
        // Only the exit status tells an installed rpm package apart.
        assert!(reports_installed("telnet-0.17-1.x86_64\n", true));
        assert!(!reports_installed("", false));
    }

    #[test]
    fn test_pacman_output() {
        assert!(reports_installed("Name : ufw\nInstall Reason : Explicitly installed\n", true));
        assert!(!reports_installed("error: package 'telnet' was not found\n", false));
    }
}
