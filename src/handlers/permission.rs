//! File permission, owner and group checks.

use nix::unistd::{Group, User};
use std::path::Path;
use tracing::debug;
use walkdir::WalkDir;

use super::{error_outcome, HandlerContext, KeyedOutcome};
use crate::error::{Error, Result};
use crate::probe::{self, FileStat};
use crate::rules::{PermissionCheck, PermissionTarget};
use crate::status::{AttributeReport, CheckOutcome, Comparison, Observation};

pub async fn run(ctx: &HandlerContext<'_>, check: &PermissionCheck) -> Vec<KeyedOutcome> {
    let expected = match Expected::resolve(check) {
        Ok(expected) => expected,
        Err(e) => return vec![KeyedOutcome::single(error_outcome(ctx, &e))],
    };

    match &check.target {
        PermissionTarget::Path(path) => {
            let outcome = if !probe::exists(path) {
                error_outcome(ctx, &Error::file_io(path, std::io::ErrorKind::NotFound.into()))
            } else {
                match probe::stat(path) {
                    Ok(stat) => compare(&expected, &stat),
                    Err(e) => error_outcome(ctx, &e),
                }
            };
            vec![KeyedOutcome::single(outcome)]
        }
        PermissionTarget::Scan { base_path, file_type } => match scan(base_path, file_type) {
            Ok(files) if files.is_empty() => {
                let err = Error::Config(format!(
                    "no '{}' files found under {}",
                    file_type,
                    base_path.display()
                ));
                vec![KeyedOutcome::single(error_outcome(ctx, &err))]
            }
            Ok(files) => files
                .into_iter()
                .map(|(path, stat)| KeyedOutcome::keyed(path, compare(&expected, &stat)))
                .collect(),
            Err(e) => vec![KeyedOutcome::single(error_outcome(ctx, &e))],
        },
    }
}

/// Expectations with owner and group resolved to numeric ids.
struct Expected {
    mode: u32,
    mask: u32,
    permissions: String,
    owner: String,
    uid: u32,
    group: String,
    gid: u32,
}

impl Expected {
    fn resolve(check: &PermissionCheck) -> Result<Self> {
        let mode = u32::from_str_radix(&check.permissions, 8)
            .map_err(|_| Error::Config(format!("invalid permissions '{}'", check.permissions)))?;
        // Special bits only take part when the rule names them.
        let mask = if mode > 0o777 { 0o7777 } else { 0o777 };
        Ok(Self {
            mode,
            mask,
            permissions: format!("{:03o}", mode),
            owner: check.owner.clone(),
            uid: resolve_uid(&check.owner)?,
            group: check.group.clone(),
            gid: resolve_gid(&check.group)?,
        })
    }
}

fn compare(expected: &Expected, stat: &FileStat) -> CheckOutcome {
    let actual_mode = stat.mode & expected.mask;
    let report = AttributeReport {
        permissions: Comparison::new(
            expected.permissions.clone(),
            format!("{:03o}", actual_mode),
            actual_mode == expected.mode,
        ),
        owner: Comparison::new(expected.owner.clone(), stat.uid.to_string(), stat.uid == expected.uid),
        group: Comparison::new(expected.group.clone(), stat.gid.to_string(), stat.gid == expected.gid),
    };

    let outcome = CheckOutcome::from_bool(report.all_matched());
    if report.all_matched() {
        outcome.with_observation(Observation::Attributes(report))
    } else {
        let detail = format!("mismatched: {}", report.mismatched().join(", "));
        outcome
            .with_observation(Observation::Attributes(report))
            .with_detail(detail)
    }
}

fn resolve_uid(owner: &str) -> Result<u32> {
    if let Ok(uid) = owner.parse() {
        return Ok(uid);
    }
    match User::from_name(owner) {
        Ok(Some(user)) => Ok(user.uid.as_raw()),
        Ok(None) => Err(Error::Config(format!("unknown user '{}'", owner))),
        Err(e) => Err(Error::Config(format!("looking up user '{}': {}", owner, e))),
    }
}

fn resolve_gid(group: &str) -> Result<u32> {
    if let Ok(gid) = group.parse() {
        return Ok(gid);
    }
    match Group::from_name(group) {
        Ok(Some(group)) => Ok(group.gid.as_raw()),
        Ok(None) => Err(Error::Config(format!("unknown group '{}'", group))),
        Err(e) => Err(Error::Config(format!("looking up group '{}': {}", group, e))),
    }
}

/// Regular files under `base_path` whose content matches `file_type`, keyed by
/// their full path.
fn scan(base_path: &Path, file_type: &str) -> Result<Vec<(String, FileStat)>> {
    if !base_path.is_dir() {
        return Err(Error::DirectoryNotFound(base_path.to_path_buf()));
    }

    let mut files = Vec::new();
    for entry in WalkDir::new(base_path).follow_links(false).sort_by_file_name() {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                debug!(error = %e, "Skipping unreadable entry");
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.path();
        match probe::classify(path) {
            Ok(kind) if kind.matches(file_type) => {
                files.push((path.display().to_string(), probe::stat(path)?));
            }
            Ok(kind) => debug!(file = %path.display(), kind = %kind, "File type does not match"),
            Err(e) => debug!(file = %path.display(), error = %e, "Could not classify file"),
        }
    }
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn expected(permissions: &str, owner: &str, group: &str) -> Expected {
        Expected::resolve(&PermissionCheck {
            target: PermissionTarget::Path("/etc/shadow".into()),
            permissions: permissions.into(),
            owner: owner.into(),
            group: group.into(),
        })
        .unwrap()
    }

    fn stat(mode: u32, uid: u32, gid: u32) -> FileStat {
        FileStat {
            mode,
            uid,
            gid,
            is_file: true,
            is_dir: false,
        }
    }

    #[test]
    fn test_shadow_example() {
        let outcome = compare(&expected("000", "0", "0"), &stat(0o640, 0, 42));
        assert_eq!(outcome.status, crate::status::CheckStatus::Fail);

        let Some(Observation::Attributes(report)) = outcome.observation else {
            panic!("expected attribute report");
        };
        assert!(!report.permissions.matched);
        assert!(report.owner.matched);
        assert!(!report.group.matched);
        assert_eq!(report.permissions.actual, "640");
        assert_eq!(report.group.actual, "42");
        assert_eq!(report.mismatched(), ["permissions", "group"]);
    }

    #[test]
    fn test_special_bits_only_when_named() {
        let outcome = compare(&expected("755", "0", "0"), &stat(0o4755, 0, 0));
        assert_eq!(outcome.status, crate::status::CheckStatus::Pass);

        let outcome = compare(&expected("4755", "0", "0"), &stat(0o755, 0, 0));
        assert_eq!(outcome.status, crate::status::CheckStatus::Fail);
    }

    #[test]
    fn test_resolve_root_by_name() {
        assert_eq!(resolve_uid("root").unwrap(), 0);
        assert_eq!(resolve_gid("0").unwrap(), 0);
        assert!(resolve_uid("hardshell-no-such-user").is_err());
    }
}
