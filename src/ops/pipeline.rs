//! The end-to-end portable install routine.
//!
//! plan → patch sources → build → relocate → export → verify, in that order,
//! stopping at the first failure. Each stage is also reachable on its own so
//! the CLI can rerun a single stage against an existing prefix.

use std::path::PathBuf;

use serde::Serialize;

use crate::builder::env::Environment;
use crate::builder::executor::{BuildArtifact, BuildExecutor};
use crate::builder::installer::PortableInstaller;
use crate::builder::plan::BuildPlan;
use crate::builder::planner::ConfigurationPlanner;
use crate::core::dependency::DependencySet;
use crate::core::errors::{PlanningError, PortableError};
use crate::core::features::FeatureFlags;
use crate::core::manifest::BuildManifest;
use crate::core::package::{PackageContext, PackageKind};
use crate::core::platform::PlatformProfile;
use crate::ops::export::ExportReport;
use crate::ops::verify::{VerificationSuite, VerifyOptions, VerifyResult};
use crate::relocate::PatchReport;
use crate::util::config::Config;

/// One package to install.
pub struct InstallRequest<'a> {
    pub kind: PackageKind,
    pub manifest: &'a BuildManifest,
    pub profile: &'a PlatformProfile,
    pub features: FeatureFlags,
    pub config: &'a Config,
    /// Caller's environment snapshot
    pub env: &'a Environment,
    /// Unpacked upstream sources; also the scratch directory
    pub source_dir: PathBuf,
    pub prefix: PathBuf,
}

/// Knobs for [`install`].
#[derive(Debug, Clone, Copy)]
pub struct PipelineOptions {
    pub verify: bool,
    pub verbose: bool,
    pub progress: bool,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        PipelineOptions {
            verify: true,
            verbose: false,
            progress: true,
        }
    }
}

/// What a full run did.
#[derive(Debug, Clone, Serialize)]
pub struct PipelineReport {
    pub package: String,
    pub version: String,
    pub prefix: PathBuf,
    pub source_patch: PatchReport,
    pub artifact: BuildArtifact,
    pub patch: PatchReport,
    pub export: ExportReport,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub verify: Option<VerifyResult>,
}

impl<'a> InstallRequest<'a> {
    pub fn installer(&self) -> PortableInstaller {
        PortableInstaller::new(self.kind.recipe())
    }

    /// Dependencies narrowed to the target platform.
    pub fn deps(&self) -> DependencySet {
        self.manifest.dependencies.for_platform(self.profile.os)
    }

    /// The recipe context for `deps`.
    pub fn context<'c>(&'c self, deps: &'c DependencySet) -> PackageContext<'c> {
        PackageContext {
            deps,
            profile: self.profile,
            features: self.features,
            env: self.env,
            toolchain: &self.config.toolchain,
            resources: &self.manifest.resources,
            source_dir: &self.source_dir,
            prefix: &self.prefix,
        }
    }

    /// Verification options; the dependency prefixes count as leaks.
    pub fn verify_options(&self) -> VerifyOptions {
        let deps = self.deps();
        let mut options = VerifyOptions::from_config(self.config).forbid_dependencies(deps.iter());
        options.scratch = Some(self.source_dir.clone());
        options
    }
}

/// Plan without building.
pub fn plan(req: &InstallRequest<'_>, installer: &PortableInstaller) -> Result<BuildPlan, PlanningError> {
    ConfigurationPlanner::new(
        installer,
        req.env,
        req.config,
        &req.manifest.resources,
        &req.source_dir,
        &req.prefix,
    )
    .plan(&req.manifest.dependencies, req.profile, req.features)
}

/// Relocate an already installed prefix.
pub fn patch(req: &InstallRequest<'_>, installer: &PortableInstaller) -> Result<PatchReport, PortableError> {
    let deps = req.deps();
    let ctx = req.context(&deps);
    let scratch = req.source_dir.is_dir().then_some(req.source_dir.as_path());
    installer.patch(&ctx, scratch)
}

/// Copy build-time dependencies into an installed prefix.
pub fn export(req: &InstallRequest<'_>, installer: &PortableInstaller) -> Result<ExportReport, PortableError> {
    let deps = req.deps();
    installer.export(&req.context(&deps))
}

/// Verify an installed prefix.
pub fn verify(req: &InstallRequest<'_>, installer: &PortableInstaller) -> Result<VerifyResult, PortableError> {
    let outcome = VerificationSuite::new(installer.package(), req.profile, req.verify_options())
        .with_caller_env(req.env)
        .run(&req.prefix)?;
    Ok(outcome.into_result()?)
}

/// Run the whole pipeline.
pub fn install(req: &InstallRequest<'_>, options: PipelineOptions) -> Result<PipelineReport, PortableError> {
    let installer = req.installer();
    let package = installer.package();
    tracing::info!(
        "installing {} {} for {} into {}",
        package.name(),
        package.version(),
        req.profile,
        req.prefix.display()
    );

    // Every requirement is checked before anything touches the tree.
    let build_plan = plan(req, &installer)?;

    let source_patch = installer.patch_sources(&req.source_dir)?;

    let artifact = BuildExecutor::new(req.env)
        .verbose(options.verbose)
        .progress(options.progress)
        .execute(&build_plan)?;

    let patch_report = patch(req, &installer)?;
    let export_report = export(req, &installer)?;

    let verify_result = if options.verify {
        Some(verify(req, &installer)?)
    } else {
        tracing::warn!("skipping verification of {}", req.prefix.display());
        None
    };

    Ok(PipelineReport {
        package: package.name().to_string(),
        version: package.version().to_string(),
        prefix: req.prefix.clone(),
        source_patch,
        artifact,
        patch: patch_report,
        export: export_report,
        verify: verify_result,
    })
}
