//! The capability interface every portable package implements.
//!
//! A [`PortablePackage`] describes one recipe: what it needs, how it
//! configures its environment, which native steps build it, which rules make
//! its install tree relocatable, which dependencies it re-exports and how it
//! is checked afterwards. The platform work shared by every recipe lives in
//! [`crate::builder::installer::PortableInstaller`], which wraps a package
//! rather than being inherited by it.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use anyhow::Result;
use serde::Serialize;

use crate::builder::env::{EnvOverlay, Environment};
use crate::builder::plan::BuildPlan;
use crate::core::dependency::{Dependency, DependencySet, Requirement};
use crate::core::errors::PlanningError;
use crate::core::features::FeatureFlags;
use crate::core::manifest::Resource;
use crate::core::platform::{OsKind, PlatformProfile};
use crate::ops::verify::checks::FunctionalCheck;
use crate::packages::{openssl::Openssl, ruby::Ruby, zlib::Zlib};
use crate::relocate::rule::RuleTable;
use crate::util::config::ToolchainConfig;

/// Everything a recipe may look at while planning and patching.
#[derive(Debug, Clone, Copy)]
pub struct PackageContext<'a> {
    /// Dependencies already narrowed to the current platform
    pub deps: &'a DependencySet,
    pub profile: &'a PlatformProfile,
    pub features: FeatureFlags,
    /// The caller's environment snapshot
    pub env: &'a Environment,
    pub toolchain: &'a ToolchainConfig,
    pub resources: &'a [Resource],
    /// Scratch source tree
    pub source_dir: &'a Path,
    /// Final install prefix
    pub prefix: &'a Path,
}

impl<'a> PackageContext<'a> {
    /// A dependency the named package cannot build without.
    pub fn require(&self, package: &str, family: &str) -> Result<&'a Dependency, PlanningError> {
        self.deps.require(package, family, self.profile.os)
    }

    /// A pinned resource the named package cannot build without.
    pub fn resource(&self, package: &str, name: &str) -> Result<&'a Resource, PlanningError> {
        self.resources
            .iter()
            .find(|r| r.name == name)
            .ok_or_else(|| PlanningError::MissingResource {
                package: package.to_string(),
                resource: name.to_string(),
            })
    }
}

/// A package the pipeline knows how to make portable.
pub trait PortablePackage {
    /// Package name, e.g. `portable-openssl`.
    fn name(&self) -> &'static str;

    /// Upstream version this recipe targets.
    fn version(&self) -> &'static str;

    /// One-line description.
    fn description(&self) -> &'static str;

    /// Dependencies that must be present before anything runs.
    fn requirements(&self, features: &FeatureFlags) -> Vec<Requirement>;

    /// Whether the build links against the conservative C library baseline.
    fn conservative_baseline(&self, profile: &PlatformProfile, features: &FeatureFlags) -> bool {
        let _ = features;
        profile.is_linux()
    }

    /// Package-specific environment edits, applied after the platform preamble.
    fn configure_env(&self, ctx: &PackageContext<'_>, env: &mut EnvOverlay) -> Result<(), PlanningError>;

    /// Append the native build steps to `plan`.
    fn run_build(&self, ctx: &PackageContext<'_>, plan: &mut BuildPlan) -> Result<(), PlanningError>;

    /// Rules applied to the unpacked sources before the build.
    fn source_rules(&self) -> Option<RuleTable> {
        None
    }

    /// Rules applied to the installed tree.
    fn artifact_rules(&self, ctx: &PackageContext<'_>) -> RuleTable;

    /// Files installed next to the build output once patching is done
    /// (trust bundles). Returns the installed paths.
    fn install_extras(&self, ctx: &PackageContext<'_>) -> Result<Vec<PathBuf>> {
        let _ = ctx;
        Ok(Vec::new())
    }

    /// Dependency families whose headers, archives and descriptors are copied
    /// into the package.
    fn export_deps(&self, os: OsKind) -> Vec<&'static str> {
        let _ = os;
        Vec::new()
    }

    /// Functional checks run against a relocated copy of the install tree.
    fn verify(&self, profile: &PlatformProfile) -> Vec<FunctionalCheck>;
}

/// The packages berth ships recipes for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PackageKind {
    Ruby,
    Openssl,
    Zlib,
}

impl PackageKind {
    pub const ALL: [PackageKind; 3] = [PackageKind::Ruby, PackageKind::Openssl, PackageKind::Zlib];

    pub fn as_str(&self) -> &'static str {
        match self {
            PackageKind::Ruby => "ruby",
            PackageKind::Openssl => "openssl",
            PackageKind::Zlib => "zlib",
        }
    }

    /// The recipe for this package.
    pub fn recipe(&self) -> Box<dyn PortablePackage> {
        match self {
            PackageKind::Ruby => Box::new(Ruby),
            PackageKind::Openssl => Box::new(Openssl),
            PackageKind::Zlib => Box::new(Zlib),
        }
    }
}

impl fmt::Display for PackageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PackageKind {
    type Err = PlanningError;

    /// Accepts `ruby`, `portable-ruby` and versioned names such as
    /// `portable-openssl@3.5.1`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let family = s.split('@').next().unwrap_or(s).to_ascii_lowercase();
        let short = family.strip_prefix("portable-").unwrap_or(&family);
        match short {
            "ruby" => Ok(PackageKind::Ruby),
            "openssl" => Ok(PackageKind::Openssl),
            "zlib" => Ok(PackageKind::Zlib),
            _ => Err(PlanningError::UnknownPackage(s.to_string())),
        }
    }
}

/// Look up a recipe by name.
pub fn lookup(name: &str) -> Result<Box<dyn PortablePackage>, PlanningError> {
    Ok(name.parse::<PackageKind>()?.recipe())
}
