//! Resolved dependencies handed to the pipeline by the package manager.
//!
//! The package manager downloads, verifies and installs every dependency
//! before the pipeline starts. What arrives here is final: a name, a version
//! and an install prefix per dependency. Membership never changes once the
//! set has been narrowed to a platform.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::core::errors::PlanningError;
use crate::core::platform::OsKind;

/// When a dependency is needed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DependencyKind {
    /// Only needed while building (headers, static archives, tools)
    #[default]
    Build,
    /// Linked into the final artifact
    Link,
}

/// Platforms a dependency applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlatformScope {
    #[default]
    Any,
    Linux,
    Darwin,
}

impl PlatformScope {
    pub fn includes(&self, os: OsKind) -> bool {
        match self {
            PlatformScope::Any => true,
            PlatformScope::Linux => os == OsKind::Linux,
            PlatformScope::Darwin => os == OsKind::Darwin,
        }
    }
}

/// A single resolved dependency.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dependency {
    /// Full name, including any version suffix (e.g. `portable-openssl@3.5.1`)
    pub name: String,

    /// Resolved version
    pub version: String,

    /// Install prefix
    pub prefix: PathBuf,

    #[serde(default)]
    pub kind: DependencyKind,

    #[serde(default)]
    pub platform: PlatformScope,

    /// Header directory, when not `<prefix>/include`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub include: Option<PathBuf>,

    /// Library directory, when not `<prefix>/lib`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lib: Option<PathBuf>,

    /// pkg-config directory, when not `<libdir>/pkgconfig`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pkgconfig: Option<PathBuf>,
}

impl Dependency {
    /// Create a build dependency installed at `prefix`.
    pub fn new(name: impl Into<String>, version: impl Into<String>, prefix: impl Into<PathBuf>) -> Self {
        Dependency {
            name: name.into(),
            version: version.into(),
            prefix: prefix.into(),
            kind: DependencyKind::Build,
            platform: PlatformScope::Any,
            include: None,
            lib: None,
            pkgconfig: None,
        }
    }

    pub fn with_platform(mut self, platform: PlatformScope) -> Self {
        self.platform = platform;
        self
    }

    pub fn with_kind(mut self, kind: DependencyKind) -> Self {
        self.kind = kind;
        self
    }

    /// The name without its `@version` suffix.
    pub fn family(&self) -> &str {
        self.name.split('@').next().unwrap_or(&self.name)
    }

    /// Whether this dependency belongs to `family` (`portable-openssl`
    /// matches `portable-openssl@3.5.1`).
    pub fn is_family(&self, family: &str) -> bool {
        self.family() == family || self.name == family
    }

    pub fn include_dir(&self) -> PathBuf {
        self.include
            .clone()
            .unwrap_or_else(|| self.prefix.join("include"))
    }

    pub fn lib_dir(&self) -> PathBuf {
        self.lib.clone().unwrap_or_else(|| self.prefix.join("lib"))
    }

    pub fn pkgconfig_dir(&self) -> PathBuf {
        self.pkgconfig
            .clone()
            .unwrap_or_else(|| self.lib_dir().join("pkgconfig"))
    }

    pub fn libexec_dir(&self) -> PathBuf {
        self.prefix.join("libexec")
    }

    pub fn prefix(&self) -> &Path {
        &self.prefix
    }
}

/// A dependency a package declares it needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Requirement {
    /// Dependency family (name without version)
    pub family: String,
    pub scope: PlatformScope,
}

impl Requirement {
    pub fn any(family: impl Into<String>) -> Self {
        Requirement {
            family: family.into(),
            scope: PlatformScope::Any,
        }
    }

    pub fn linux(family: impl Into<String>) -> Self {
        Requirement {
            family: family.into(),
            scope: PlatformScope::Linux,
        }
    }
}

/// The full resolved dependency set.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DependencySet {
    #[serde(default, rename = "dependency")]
    deps: Vec<Dependency>,
}

impl DependencySet {
    pub fn new(deps: Vec<Dependency>) -> Self {
        DependencySet { deps }
    }

    /// Narrow the set to the dependencies that apply on `os`.
    pub fn for_platform(&self, os: OsKind) -> DependencySet {
        DependencySet {
            deps: self
                .deps
                .iter()
                .filter(|d| d.platform.includes(os))
                .cloned()
                .collect(),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &Dependency> {
        self.deps.iter()
    }

    pub fn len(&self) -> usize {
        self.deps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.deps.is_empty()
    }

    /// Find a dependency by family.
    pub fn find(&self, family: &str) -> Option<&Dependency> {
        self.deps.iter().find(|d| d.is_family(family))
    }

    /// Find a dependency required by `package`, failing if it is absent.
    pub fn require(&self, package: &str, family: &str, os: OsKind) -> Result<&Dependency, PlanningError> {
        self.find(family).ok_or_else(|| PlanningError::MissingDependency {
            package: package.to_string(),
            family: family.to_string(),
            os: os.to_string(),
        })
    }

    /// Check every requirement that applies on `os`, in declaration order.
    pub fn check(&self, package: &str, requirements: &[Requirement], os: OsKind) -> Result<(), PlanningError> {
        for req in requirements.iter().filter(|r| r.scope.includes(os)) {
            self.require(package, &req.family, os)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> DependencySet {
        DependencySet::new(vec![
            Dependency::new("portable-openssl@3.5.1", "3.5.1", "/deps/openssl"),
            Dependency::new("portable-zlib@1.3.1", "1.3.1", "/deps/zlib")
                .with_platform(PlatformScope::Linux),
            Dependency::new("pkgconf", "2.3.0", "/deps/pkgconf"),
        ])
    }

    #[test]
    fn test_family_lookup() {
        let set = sample();
        let openssl = set.find("portable-openssl").unwrap();
        assert_eq!(openssl.version, "3.5.1");
        assert_eq!(openssl.pkgconfig_dir(), PathBuf::from("/deps/openssl/lib/pkgconfig"));
        assert!(set.find("portable-openssl@3.5.1").is_some());
        assert!(set.find("portable").is_none());
    }

    #[test]
    fn test_platform_partition() {
        let set = sample();
        assert!(set.for_platform(OsKind::Linux).find("portable-zlib").is_some());
        assert!(set.for_platform(OsKind::Darwin).find("portable-zlib").is_none());
        assert_eq!(set.for_platform(OsKind::Darwin).len(), 2);
    }

    #[test]
    fn test_check_fails_fast_on_missing() {
        let set = sample().for_platform(OsKind::Linux);
        let reqs = vec![
            Requirement::any("portable-openssl"),
            Requirement::linux("portable-libffi"),
            Requirement::linux("portable-zlib"),
        ];
        let err = set.check("ruby", &reqs, OsKind::Linux).unwrap_err();
        match err {
            PlanningError::MissingDependency { family, .. } => assert_eq!(family, "portable-libffi"),
            other => panic!("unexpected error: {}", other),
        }

        // Linux-only requirements do not apply on darwin.
        let darwin = sample().for_platform(OsKind::Darwin);
        assert!(darwin.check("ruby", &reqs, OsKind::Darwin).is_ok());
    }
}
