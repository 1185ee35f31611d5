//! The dependency manifest written by the package manager.
//!
//! ```toml
//! [[dependency]]
//! name = "portable-openssl@3.5.1"
//! version = "3.5.1"
//! prefix = "/opt/berth/cellar/portable-openssl@3.5.1/3.5.1"
//!
//! [[dependency]]
//! name = "portable-zlib@1.3.1"
//! version = "1.3.1"
//! prefix = "/opt/berth/cellar/portable-zlib@1.3.1/1.3.1"
//! platform = "linux"
//!
//! [[resource]]
//! name = "cacert"
//! url = "https://curl.se/ca/cacert-2025-07-15.pem"
//! path = "/var/cache/berth/cacert-2025-07-15.pem"
//! ```
//!
//! Resources are pinned files the package manager already fetched and
//! verified (the trust bundle, extra gems). The pipeline only copies them.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use url::Url;

use crate::core::dependency::{Dependency, DependencySet};
use crate::core::errors::PlanningError;

/// A pinned, already-fetched resource file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resource {
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,

    /// Where the resource was fetched from
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<Url>,

    /// Local copy
    pub path: PathBuf,
}

impl Resource {
    pub fn new(name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Resource {
            name: name.into(),
            version: None,
            url: None,
            path: path.into(),
        }
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = Some(version.into());
        self
    }

    /// Basename of the upstream file, falling back to the local one.
    pub fn file_name(&self) -> Option<String> {
        self.url
            .as_ref()
            .and_then(|u| u.path_segments())
            .and_then(|mut segments| segments.next_back().map(str::to_string))
            .filter(|s| !s.is_empty())
            .or_else(|| {
                self.path
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
            })
    }

    /// Version, either explicit or taken from a `<name>-<version>.<ext>` file name.
    pub fn resolved_version(&self) -> Option<String> {
        if let Some(ref v) = self.version {
            return Some(v.clone());
        }
        let file = self.file_name()?;
        let stem = file.rsplit_once('.').map(|(s, _)| s).unwrap_or(&file);
        stem.strip_prefix(&format!("{}-", self.name))
            .filter(|v| !v.is_empty())
            .map(str::to_string)
    }
}

/// On-disk manifest layout.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct RawManifest {
    #[serde(default)]
    dependency: Vec<Dependency>,
    #[serde(default)]
    resource: Vec<Resource>,
}

/// Parsed dependency manifest.
#[derive(Debug, Clone, Default)]
pub struct BuildManifest {
    pub dependencies: DependencySet,
    pub resources: Vec<Resource>,
}

impl BuildManifest {
    /// Load a manifest from a TOML file.
    pub fn load(path: &Path) -> Result<Self, PlanningError> {
        let contents = std::fs::read_to_string(path).map_err(|e| PlanningError::InvalidManifest {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        Self::parse(&contents).map_err(|message| PlanningError::InvalidManifest {
            path: path.to_path_buf(),
            message,
        })
    }

    /// Parse a manifest from TOML text.
    pub fn parse(contents: &str) -> Result<Self, String> {
        let raw: RawManifest = toml::from_str(contents).map_err(|e| e.to_string())?;

        for dep in &raw.dependency {
            if !dep.prefix.is_absolute() {
                return Err(format!(
                    "dependency `{}` has a relative prefix: {}",
                    dep.name,
                    dep.prefix.display()
                ));
            }
        }

        Ok(BuildManifest {
            dependencies: DependencySet::new(raw.dependency),
            resources: raw.resource,
        })
    }

    pub fn resource(&self, name: &str) -> Option<&Resource> {
        self.resources.iter().find(|r| r.name == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::dependency::PlatformScope;

    const MANIFEST: &str = r#"
[[dependency]]
name = "portable-openssl@3.5.1"
version = "3.5.1"
prefix = "/cellar/portable-openssl@3.5.1/3.5.1"

[[dependency]]
name = "portable-libffi@3.5.1"
version = "3.5.1"
prefix = "/cellar/portable-libffi@3.5.1/3.5.1"
platform = "linux"

[[resource]]
name = "cacert"
url = "https://curl.se/ca/cacert-2025-07-15.pem"
path = "/cache/downloads/abc--cacert-2025-07-15.pem"

[[resource]]
name = "msgpack"
url = "https://rubygems.org/downloads/msgpack-1.8.0.gem"
path = "/cache/downloads/def--msgpack-1.8.0.gem"
"#;

    #[test]
    fn test_parse_manifest() {
        let manifest = BuildManifest::parse(MANIFEST).unwrap();
        assert_eq!(manifest.dependencies.len(), 2);
        let ffi = manifest.dependencies.find("portable-libffi").unwrap();
        assert_eq!(ffi.platform, PlatformScope::Linux);

        let cacert = manifest.resource("cacert").unwrap();
        assert_eq!(cacert.file_name().as_deref(), Some("cacert-2025-07-15.pem"));

        let msgpack = manifest.resource("msgpack").unwrap();
        assert_eq!(msgpack.resolved_version().as_deref(), Some("1.8.0"));
    }

    #[test]
    fn test_relative_prefix_rejected() {
        let err = BuildManifest::parse(
            "[[dependency]]\nname = \"zlib\"\nversion = \"1\"\nprefix = \"relative/zlib\"\n",
        )
        .unwrap_err();
        assert!(err.contains("relative prefix"));
    }
}
