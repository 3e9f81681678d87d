//! Pattern-in-file checks.
//!
//! The pattern is tried against every line of a file, leading and trailing
//! whitespace removed, anchored at the start of the line. A file "matches"
//! when any line does, and the check passes when that agrees with the rule's
//! `match` flag.
//!
//! With a `path` the check reads one file and records one outcome. Otherwise
//! it scans `base_path/prefix*`: plain files are read directly and
//! directories contribute their `*suffix` files (the `sshd_config` plus
//! `sshd_config.d/*.conf` layout). Each file gets its own outcome keyed by its
//! path relative to `base_path`.

use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

use super::{error_outcome, HandlerContext, KeyedOutcome};
use crate::error::{Error, Result};
use crate::probe;
use crate::rules::{RegexCheck, RegexSource};
use crate::status::{CheckOutcome, Observation};

pub async fn run(ctx: &HandlerContext<'_>, check: &RegexCheck) -> Vec<KeyedOutcome> {
    match &check.source {
        RegexSource::File(path) => {
            let outcome = if probe::exists(path) {
                evaluate_file(ctx, check, path)
            } else {
                error_outcome(ctx, &Error::file_io(path, std::io::ErrorKind::NotFound.into()))
            };
            vec![KeyedOutcome::single(outcome)]
        }
        RegexSource::Scan {
            base_path,
            prefix,
            suffix,
        } => {
            let files = match candidates(base_path, prefix, suffix) {
                Ok(files) => files,
                Err(e) => return vec![KeyedOutcome::single(error_outcome(ctx, &e))],
            };
            if files.is_empty() {
                debug!(rule = %ctx.rule_path(), base_path = %base_path.display(), "No files to scan");
                return vec![KeyedOutcome::single(
                    CheckOutcome::warn().with_detail(format!(
                        "no '{}*' files under {}",
                        prefix,
                        base_path.display()
                    )),
                )];
            }
            files
                .iter()
                .map(|path| {
                    let key = path.strip_prefix(base_path).unwrap_or(path).display().to_string();
                    KeyedOutcome::keyed(key, evaluate_file(ctx, check, path))
                })
                .collect()
        }
    }
}

fn evaluate_file(ctx: &HandlerContext<'_>, check: &RegexCheck, path: &Path) -> CheckOutcome {
    let content = match fs::read(path) {
        Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
        Err(e) => return error_outcome(ctx, &Error::file_io(path, e)),
    };

    let matched = content.lines().any(|line| check.regex.is_match(line.trim()));
    debug!(file = %path.display(), pattern = %check.pattern, matched, "Pattern evaluated");

    let observation = if matched {
        Observation::Matched
    } else {
        Observation::NotMatched
    };
    CheckOutcome::from_bool(matched == check.expect_match).with_observation(observation)
}

/// Files taking part in a scan, in name order.
fn candidates(base_path: &Path, prefix: &str, suffix: &str) -> Result<Vec<PathBuf>> {
    if !base_path.is_dir() {
        return Err(Error::DirectoryNotFound(base_path.to_path_buf()));
    }

    let mut files = Vec::new();
    for entry in glob_in(base_path, &format!("{}*", glob::Pattern::escape(prefix)))? {
        if entry.is_dir() {
            let inner = format!("*{}", glob::Pattern::escape(suffix));
            files.extend(glob_in(&entry, &inner)?.into_iter().filter(|p| p.is_file()));
        } else if entry.is_file() {
            files.push(entry);
        }
    }
    files.retain(|path| !is_readme(path));
    Ok(files)
}

const README_PREFIXES: [&str; 3] = ["README", "readme", "Readme"];

fn glob_in(dir: &Path, pattern: &str) -> Result<Vec<PathBuf>> {
    let full = format!("{}/{}", glob::Pattern::escape(&dir.to_string_lossy()), pattern);
    let paths = glob::glob(&full).map_err(|e| Error::Config(format!("invalid scan pattern '{}': {}", full, e)))?;
    Ok(paths.filter_map(|entry| entry.ok()).collect())
}

/// Names starting with a README spelling are documentation, not config.
fn is_readme(path: &Path) -> bool {
    path.file_name()
        .and_then(|name| name.to_str())
        .is_some_and(|name| README_PREFIXES.iter().any(|prefix| name.starts_with(prefix)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_candidates_layout() {
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path();
        fs::write(base.join("sshd_config"), "PermitRootLogin no\n").unwrap();
        fs::create_dir(base.join("sshd_config.d")).unwrap();
        fs::write(base.join("sshd_config.d/50-cloud.conf"), "").unwrap();
        fs::write(base.join("sshd_config.d/README"), "").unwrap();
        fs::write(base.join("sshd_config.d/notes.txt"), "").unwrap();
        fs::write(base.join("ssh_config"), "").unwrap();

        let files = candidates(base, "sshd_config", ".conf").unwrap();
        let names: Vec<String> = files
            .iter()
            .map(|p| p.strip_prefix(base).unwrap().display().to_string())
            .collect();
        assert_eq!(names, ["sshd_config", "sshd_config.d/50-cloud.conf"]);
    }

    #[test]
    fn test_candidates_missing_base() {
        assert!(matches!(
            candidates(Path::new("/nonexistent/hardshell"), "x", ""),
            Err(Error::DirectoryNotFound(_))
        ));
    }

    #[test]
    fn test_readme_names() {
        assert!(is_readme(Path::new("/etc/ssh/sshd_config.d/README")));
        assert!(is_readme(Path::new("/etc/ssh/Readme.md")));
        assert!(!is_readme(Path::new("/etc/ssh/sshd_config")));
        assert!(is_readme(Path::new("/etc/ssh/sshd_config.d/README-hardening.conf")));
        assert!(is_readme(Path::new("/etc/ssh/sshd_config.d/readme_first.conf")));
        assert!(!is_readme(Path::new("/etc/ssh/sshd_config.d/50-readme.conf")));
    }

    #[test]
    fn test_candidates_skip_readme_prefixed_files() {
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path();
        fs::create_dir(base.join("sshd_config.d")).unwrap();
        for name in ["50-cloud.conf", "README-hardening.conf", "readme_first.conf"] {
            fs::write(base.join("sshd_config.d").join(name), "PermitRootLogin yes\n").unwrap();
        }

        let files = candidates(base, "sshd_config", ".conf").unwrap();
        assert_eq!(files, [base.join("sshd_config.d/50-cloud.conf")]);
    }
}
