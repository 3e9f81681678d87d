//! Settings-file reconciliation.
//!
//! Makes a directory of `key=value` configuration files (typically
//! `/etc/sysctl.d`) express exactly one desired setting, in one designated
//! target file:
//!
//! 1. every `.conf` file in the directory is rewritten line by line; lines that
//!    would conflict with the desired setting are commented out with a leading
//!    `#`, keeping the original text after the marker,
//! 2. each rewrite goes to a temporary file in the same directory that is then
//!    renamed over the original,
//! 3. the desired line is appended to the target file (or the target file is
//!    created) unless it is already there.
//!
//! Running it twice with the same inputs leaves the directory untouched the
//! second time.

use std::borrow::Cow;
use std::fs;
use std::io::Write;
use std::os::unix::fs::{MetadataExt, PermissionsExt};
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;
use tracing::{debug, info};

use crate::error::{Error, Result};

/// Extension of the files taking part in reconciliation.
pub const DEFAULT_EXTENSION: &str = "conf";

/// Mode given to target files created from scratch.
const NEW_FILE_MODE: u32 = 0o644;

/// Split a `key=value` setting into trimmed key and value.
///
/// Anything other than exactly one `=` is rejected.
pub fn split_setting(setting: &str) -> Result<(&str, &str)> {
    let setting = setting.trim();
    if setting.matches('=').count() != 1 {
        return Err(Error::MalformedSetting(setting.to_string()));
    }
    let (key, value) = setting
        .split_once('=')
        .ok_or_else(|| Error::MalformedSetting(setting.to_string()))?;
    let key = key.trim();
    if key.is_empty() {
        return Err(Error::MalformedSetting(setting.to_string()));
    }
    Ok((key, value.trim()))
}

/// Reconciles one desired setting across a directory of config files.
#[derive(Debug, Clone)]
pub struct SettingsReconciler {
    directory: PathBuf,
    extension: String,
}

impl SettingsReconciler {
    /// Reconciler over `directory` using the `.conf` extension.
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
            extension: DEFAULT_EXTENSION.to_string(),
        }
    }

    /// Use a different file extension (without the dot).
    pub fn with_extension(mut self, extension: impl Into<String>) -> Self {
        self.extension = extension.into().trim_start_matches('.').to_string();
        self
    }

    /// Directory being reconciled.
    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// Make `target_file` the single home of `desired_line` and return the
    /// target's full path.
    pub fn reconcile(&self, target_file: &str, desired_line: &str) -> Result<PathBuf> {
        let desired = desired_line.trim();
        let (key, _) = split_setting(desired)?;

        if Path::new(target_file).file_name().and_then(|n| n.to_str()) != Some(target_file) {
            return Err(Error::Config(format!(
                "target '{}' must be a plain file name",
                target_file
            )));
        }
        if !self.directory.is_dir() {
            return Err(Error::DirectoryNotFound(self.directory.clone()));
        }

        let rules = LineRules { key, desired };
        for path in self.candidate_files()? {
            let is_target = path.file_name().and_then(|n| n.to_str()) == Some(target_file);
            let original = fs::read_to_string(&path).map_err(|e| Error::file_io(&path, e))?;
            let (rewritten, commented) = rules.rewrite(&original, is_target);
            if commented > 0 {
                info!(file = %path.display(), lines = commented, key = %key, "Commenting out conflicting settings");
                atomic_write(&path, &rewritten)?;
            }
        }

        let target = self.directory.join(target_file);
        ensure_line(&target, desired)?;
        Ok(target)
    }

    /// Regular files in the directory carrying the configured extension,
    /// sorted by name.
    fn candidate_files(&self) -> Result<Vec<PathBuf>> {
        let entries =
            fs::read_dir(&self.directory).map_err(|e| Error::file_io(&self.directory, e))?;

        let mut files = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| Error::file_io(&self.directory, e))?;
            let path = entry.path();
            let has_extension = path.extension().and_then(|e| e.to_str()) == Some(self.extension.as_str());
            if has_extension && path.is_file() {
                files.push(path);
            }
        }
        files.sort();
        Ok(files)
    }
}

/// Per-line decisions for one desired setting.
struct LineRules<'a> {
    key: &'a str,
    desired: &'a str,
}

impl LineRules<'_> {
    /// Rewrite `content`, returning the new content and how many lines were
    /// commented out. Line endings are preserved exactly.
    ///
    /// In the target, the first copy of the desired line is kept and any later
    /// copy is commented out like a conflict.
    fn rewrite(&self, content: &str, is_target: bool) -> (String, usize) {
        let mut out = String::with_capacity(content.len() + 16);
        let mut commented = 0;
        let mut kept_desired = false;
        for line in content.split_inclusive('\n') {
            let mut rewritten = self.rewrite_line(line, is_target);
            if is_target && line.trim() == self.desired {
                if kept_desired {
                    rewritten = Cow::Owned(format!("#{}", line));
                }
                kept_desired = true;
            }
            if let Cow::Owned(_) = rewritten {
                commented += 1;
            }
            out.push_str(&rewritten);
        }
        (out, commented)
    }

    fn rewrite_line<'l>(&self, line: &'l str, is_target: bool) -> Cow<'l, str> {
        let stripped = line.trim();
        if stripped.is_empty() || is_comment(stripped) {
            return Cow::Borrowed(line);
        }

        let same_key = line_key(stripped) == Some(self.key);
        let conflicts = if is_target {
            same_key && stripped != self.desired
        } else {
            same_key || stripped.contains(self.desired)
        };

        if conflicts {
            Cow::Owned(format!("#{}", line))
        } else {
            Cow::Borrowed(line)
        }
    }
}

/// Make sure `path` contains `line` as an uncommented line,
/// appending it or creating the file when needed. Returns whether the file
/// was changed.
pub fn ensure_line(path: &Path, line: &str) -> Result<bool> {
    let line = line.trim();
    if !path.exists() {
        info!(file = %path.display(), line = %line, "Creating file");
        atomic_write(path, &format!("{}\n", line))?;
        return Ok(true);
    }

    let content = fs::read_to_string(path).map_err(|e| Error::file_io(path, e))?;
    if content.lines().any(|existing| existing.trim() == line) {
        debug!(file = %path.display(), line = %line, "Line already present");
        return Ok(false);
    }

    let mut updated = content;
    if !updated.is_empty() && !updated.ends_with('\n') {
        updated.push('\n');
    }
    updated.push_str(line);
    updated.push('\n');
    info!(file = %path.display(), line = %line, "Appending line");
    atomic_write(path, &updated)?;
    Ok(true)
}

fn is_comment(stripped: &str) -> bool {
    stripped.starts_with('#') || stripped.starts_with(';')
}

/// Key of a `key=value` line, trimmed.
fn line_key(stripped: &str) -> Option<&str> {
    stripped.split_once('=').map(|(key, _)| key.trim())
}

/// Replace `path` with `content` through a temporary file in the same
/// directory, keeping the original's mode and ownership.
fn atomic_write(path: &Path, content: &str) -> Result<()> {
    let dir = path
        .parent()
        .ok_or_else(|| Error::Config(format!("'{}' has no parent directory", path.display())))?;

    let mut tmp = NamedTempFile::new_in(dir).map_err(|e| Error::file_io(dir, e))?;
    tmp.write_all(content.as_bytes())
        .map_err(|e| Error::file_io(tmp.path(), e))?;
    tmp.as_file()
        .sync_all()
        .map_err(|e| Error::file_io(tmp.path(), e))?;

    match fs::metadata(path) {
        Ok(metadata) => {
            fs::set_permissions(tmp.path(), metadata.permissions())
                .map_err(|e| Error::file_io(tmp.path(), e))?;
            let owner = nix::unistd::Uid::from_raw(metadata.uid());
            let group = nix::unistd::Gid::from_raw(metadata.gid());
            if let Err(e) = nix::unistd::chown(tmp.path(), Some(owner), Some(group)) {
                debug!(file = %path.display(), error = %e, "Could not preserve ownership");
            }
        }
        Err(_) => {
            fs::set_permissions(tmp.path(), fs::Permissions::from_mode(NEW_FILE_MODE))
                .map_err(|e| Error::file_io(tmp.path(), e))?;
        }
    }

    tmp.persist(path).map_err(|e| Error::file_io(path, e.error))?;
    Ok(())
}
