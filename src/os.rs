//! Operating system identification.
//!
//! Rules declare which distributions they apply to as `(id, version)` pairs,
//! and the package checks pick a package manager from the id. Both values come
//! from `/etc/os-release`.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

use crate::error::{Error, Result};

/// Default location of the os-release file.
pub const OS_RELEASE_PATH: &str = "/etc/os-release";

/// Identity of the audited host's operating system.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OsDescriptor {
    /// Distribution id, lowercase (`ubuntu`, `debian`, `fedora`, ...)
    pub id: String,
    /// Version id as published by the distribution (`22.04`, `12`, `39`)
    pub version: String,
}

impl OsDescriptor {
    /// Create a descriptor; the id is lowercased.
    pub fn new(id: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            id: id.into().to_lowercase(),
            version: version.into(),
        }
    }

    /// Detect the running host's OS from `/etc/os-release`.
    pub fn detect() -> Result<Self> {
        Self::from_os_release(Path::new(OS_RELEASE_PATH))
    }

    /// Read an os-release style file.
    pub fn from_os_release(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| Error::file_io(path, e))?;
        Self::parse(&content)
    }

    /// Parse os-release content. `ID` is required, `VERSION_ID` is optional
    /// (rolling distributions omit it) and defaults to an empty string.
    pub fn parse(content: &str) -> Result<Self> {
        let mut id = None;
        let mut version = None;

        for line in content.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let Some((key, value)) = line.split_once('=') else {
                continue;
            };
            let value = value.trim().trim_matches('"').trim_matches('\'');
            match key.trim() {
                "ID" => id = Some(value.to_string()),
                "VERSION_ID" => version = Some(value.to_string()),
                _ => {}
            }
        }

        let id = id.ok_or_else(|| Error::OsDetection("no ID entry in os-release".into()))?;
        Ok(Self::new(id, version.unwrap_or_default()))
    }
}

impl fmt::Display for OsDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.version.is_empty() {
            write!(f, "{}", self.id)
        } else {
            write!(f, "{} {}", self.id, self.version)
        }
    }
}
