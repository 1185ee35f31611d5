//! The composed installer shared by every portable package.
//!
//! Recipes only describe what is specific to them. The installer adds the
//! platform preamble, wires the conservative C library baseline, and runs the
//! relocation and export passes around the recipe.

use std::path::Path;

use crate::builder::env::EnvOverlay;
use crate::builder::plan::Baseline;
use crate::core::errors::{PatchError, PlanningError, PortableError};
use crate::core::features::FeatureFlags;
use crate::core::package::{PackageContext, PortablePackage};
use crate::core::platform::PlatformProfile;
use crate::ops::export::{DependencyExporter, ExportReport};
use crate::relocate::{PatchReport, RelocationPatcher};

/// Variables a Linux build must not inherit: they point the toolchain at the
/// package manager's own library tree instead of the system's.
pub const LINUX_SCRUBBED_VARS: &[&str] = &[
    "LDFLAGS",
    "LIBRARY_PATH",
    "LD_RUN_PATH",
    "LD_LIBRARY_PATH",
    "TERMINFO_DIRS",
    "HOMEBREW_RPATH_PATHS",
    "HOMEBREW_DYNAMIC_LINKER",
];

/// Dependency families making up the conservative baseline.
pub const BASELINE_GLIBC: &str = "glibc";
pub const BASELINE_LINUX_HEADERS: &str = "linux-headers";

/// A recipe wrapped with the shared platform behaviour.
pub struct PortableInstaller {
    package: Box<dyn PortablePackage>,
}

impl PortableInstaller {
    pub fn new(package: Box<dyn PortablePackage>) -> Self {
        PortableInstaller { package }
    }

    pub fn package(&self) -> &dyn PortablePackage {
        self.package.as_ref()
    }

    /// Platform environment edits applied before the recipe's own, plus any
    /// warnings for the operator.
    pub fn preamble(&self, profile: &PlatformProfile) -> (EnvOverlay, Vec<String>) {
        let mut env = EnvOverlay::new();
        let mut warnings = Vec::new();

        if profile.is_darwin() {
            if let Some(warning) = profile.host_too_new_warning() {
                warnings.push(warning);
            }
            // Prefer the portable static archives over anything on the default search path.
            env.append("LDFLAGS", "-Wl,-search_paths_first");
        } else {
            for var in LINUX_SCRUBBED_VARS {
                env.remove(*var);
            }
            env.append("CFLAGS", "-fPIC");
        }

        (env, warnings)
    }

    /// Resolve the C library baseline and the flags that select it.
    pub fn baseline(
        &self,
        ctx: &PackageContext<'_>,
        features: &FeatureFlags,
        env: &mut EnvOverlay,
    ) -> Result<Baseline, PlanningError> {
        if !self.package.conservative_baseline(ctx.profile, features) {
            return Ok(Baseline::Host);
        }

        let name = self.package.name();
        let glibc = ctx.require(name, BASELINE_GLIBC)?;
        let headers = ctx.require(name, BASELINE_LINUX_HEADERS)?;

        env.append("CPPFLAGS", format!("-I{}", headers.include_dir().display()));
        env.append("LDFLAGS", format!("-L{}", glibc.lib_dir().display()));

        Ok(Baseline::Conservative {
            glibc: glibc.prefix.clone(),
            linux_headers: headers.prefix.clone(),
        })
    }

    /// Apply the recipe's source rules to the scratch tree.
    pub fn patch_sources(&self, source_dir: &Path) -> Result<PatchReport, PatchError> {
        match self.package.source_rules() {
            Some(table) => RelocationPatcher::new().with_table(table).patch(source_dir),
            None => Ok(PatchReport::default()),
        }
    }

    /// Relocate the installed tree and install the recipe's extras.
    pub fn patch(&self, ctx: &PackageContext<'_>, scratch: Option<&Path>) -> Result<PatchReport, PortableError> {
        let mut patcher = RelocationPatcher::new().with_table(self.package.artifact_rules(ctx));
        if let Some(scratch) = scratch {
            patcher = patcher.with_scratch(scratch);
        }
        let report = patcher.patch(ctx.prefix)?;

        let extras = self
            .package
            .install_extras(ctx)
            .map_err(PortableError::Export)?;
        for path in extras {
            tracing::debug!("installed {}", path.display());
        }
        Ok(report)
    }

    /// Copy the recipe's build-time dependencies into the install tree.
    pub fn export(&self, ctx: &PackageContext<'_>) -> Result<ExportReport, PortableError> {
        let families = self.package.export_deps(ctx.profile.os);
        let mut deps = Vec::with_capacity(families.len());
        for family in families {
            deps.push(ctx.require(self.package.name(), family)?);
        }
        DependencyExporter::new(ctx.prefix)
            .export(deps)
            .map_err(PortableError::Export)
    }
}
