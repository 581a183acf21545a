//! Mapping of distro package names to logical component names.

use std::collections::HashMap;
use std::path::Path;

use serde::Serialize;

use crate::error::{AppError, AppResult};

/// Static `package name -> component` table, loaded once per run.
#[derive(Debug, Clone, Default)]
pub struct PackageMapping {
    names: HashMap<String, String>,
}

impl PackageMapping {
    pub fn new(names: HashMap<String, String>) -> Self {
        PackageMapping { names }
    }

    /// Load the table from a JSON object file.
    pub async fn load(path: &Path) -> AppResult<Self> {
        let content = tokio::fs::read_to_string(path).await.map_err(|e| {
            AppError::FileSystem(format!(
                "Failed to read package mapping {}: {}",
                path.display(),
                e
            ))
        })?;

        Self::from_json(&content)
    }

    pub fn from_json(content: &str) -> AppResult<Self> {
        let names: HashMap<String, String> = serde_json::from_str(content).map_err(|e| {
            AppError::InvalidInput(format!("Package mapping is not a JSON object: {}", e))
        })?;
        Ok(Self::new(names))
    }

    pub fn component(&self, package: &str) -> Option<&str> {
        self.names.get(package).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

/// A mapped component and the version found in an update log.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct PackageName {
    pub package_name: String,
    pub version: String,
}

impl PackageName {
    /// Parse one line of an installed-packages log.
    ///
    /// Debian lines come from `dpkg -l` (`ii  name  version ...`); Fedora
    /// lines are bare `name-version-release.arch`. Packages missing from the
    /// mapping yield `None`.
    pub fn parse(line: &str, mapping: &PackageMapping) -> Option<Self> {
        if line.starts_with("ii ") {
            let mut columns = line.split_whitespace().skip(1);
            if let (Some(raw_name), Some(raw_version)) = (columns.next(), columns.next())
                && let Some(component) = mapping.component(raw_name)
            {
                let version = raw_version
                    .split_once('-')
                    .or_else(|| raw_version.split_once('+'))
                    .map(|(upstream, _)| upstream)
                    .unwrap_or(raw_version);
                return Some(PackageName {
                    package_name: component.to_string(),
                    version: version.to_string(),
                });
            }
        }

        if line.contains(' ') {
            return None;
        }

        let parts: Vec<&str> = line.split('-').collect();
        if parts.len() < 3 {
            return None;
        }
        let raw_name = parts[..parts.len() - 2].join("-");
        let component = mapping.component(&raw_name)?;

        Some(PackageName {
            package_name: component.to_string(),
            version: parts[parts.len() - 2].to_string(),
        })
    }
}

impl std::fmt::Display for PackageName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} v{}", self.package_name, self.version)
    }
}
