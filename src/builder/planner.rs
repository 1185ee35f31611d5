//! Configuration planning.
//!
//! Turns a dependency set, a platform profile and feature flags into a
//! [`BuildPlan`]. Every requirement is checked here, before a single native
//! step runs, so a missing dependency never leaves a half-built prefix.

use std::path::PathBuf;

use crate::builder::env::Environment;
use crate::builder::installer::PortableInstaller;
use crate::builder::plan::BuildPlan;
use crate::core::dependency::DependencySet;
use crate::core::errors::PlanningError;
use crate::core::features::FeatureFlags;
use crate::core::manifest::Resource;
use crate::core::package::PackageContext;
use crate::core::platform::PlatformProfile;
use crate::util::config::Config;

/// Produces build plans for one installer.
pub struct ConfigurationPlanner<'a> {
    installer: &'a PortableInstaller,
    env: &'a Environment,
    config: &'a Config,
    resources: &'a [Resource],
    source_dir: PathBuf,
    prefix: PathBuf,
}

impl<'a> ConfigurationPlanner<'a> {
    pub fn new(
        installer: &'a PortableInstaller,
        env: &'a Environment,
        config: &'a Config,
        resources: &'a [Resource],
        source_dir: impl Into<PathBuf>,
        prefix: impl Into<PathBuf>,
    ) -> Self {
        ConfigurationPlanner {
            installer,
            env,
            config,
            resources,
            source_dir: source_dir.into(),
            prefix: prefix.into(),
        }
    }

    /// Plan the build.
    pub fn plan(
        &self,
        deps: &DependencySet,
        profile: &PlatformProfile,
        features: FeatureFlags,
    ) -> Result<BuildPlan, PlanningError> {
        let package = self.installer.package();
        let deps = deps.for_platform(profile.os);
        deps.check(package.name(), &package.requirements(&features), profile.os)?;

        let ctx = PackageContext {
            deps: &deps,
            profile,
            features,
            env: self.env,
            toolchain: &self.config.toolchain,
            resources: self.resources,
            source_dir: &self.source_dir,
            prefix: &self.prefix,
        };

        let mut plan = BuildPlan::new(package.name(), &self.source_dir, &self.prefix);

        let (preamble, warnings) = self.installer.preamble(profile);
        plan.env = preamble;
        plan.warnings = warnings;

        plan.toolchain.baseline = self.installer.baseline(&ctx, &features, &mut plan.env)?;

        if let Some(jobs) = self.config.build.jobs {
            plan.env.set("MAKEFLAGS", format!("-j{}", jobs));
        }

        package.configure_env(&ctx, &mut plan.env)?;
        package.run_build(&ctx, &mut plan)?;

        for warning in &plan.warnings {
            tracing::warn!("{}", warning);
        }
        tracing::debug!(
            "planned {} step(s) for {} on {}",
            plan.steps.len(),
            plan.package,
            profile
        );
        Ok(plan)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::plan::Baseline;
    use crate::core::dependency::Dependency;
    use crate::core::package::PackageKind;
    use crate::core::platform::HostFacts;

    fn linux() -> PlatformProfile {
        PlatformProfile::resolve(&HostFacts::new("linux", "x86_64")).unwrap()
    }

    #[test]
    fn test_missing_baseline_is_fatal_before_any_step() {
        let installer = PortableInstaller::new(PackageKind::Zlib.recipe());
        let env = Environment::default();
        let config = Config::default();
        let planner = ConfigurationPlanner::new(&installer, &env, &config, &[], "/scratch", "/out");

        let err = planner
            .plan(&DependencySet::default(), &linux(), FeatureFlags::default())
            .unwrap_err();
        assert!(matches!(err, PlanningError::MissingDependency { ref family, .. } if family == "glibc"));
    }

    #[test]
    fn test_zlib_plan_with_baseline_and_jobs() {
        let installer = PortableInstaller::new(PackageKind::Zlib.recipe());
        let env = Environment::from_pairs([("CFLAGS", "-O2")]);
        let mut config = Config::default();
        config.build.jobs = Some(4);
        let deps = DependencySet::new(vec![
            Dependency::new("glibc@2.17", "2.17", "/deps/glibc"),
            Dependency::new("linux-headers@4.4", "4.4", "/deps/linux-headers"),
        ]);
        let planner = ConfigurationPlanner::new(&installer, &env, &config, &[], "/scratch/zlib", "/out/zlib");

        let plan = planner.plan(&deps, &linux(), FeatureFlags::default()).unwrap();
        assert_eq!(plan.configure_args(), &["--static", "--prefix=/out/zlib"]);
        assert!(matches!(plan.toolchain.baseline, Baseline::Conservative { .. }));

        let applied = plan.env.apply(&env);
        assert_eq!(applied.get("CFLAGS"), Some("-O2 -fPIC"));
        assert_eq!(applied.get("MAKEFLAGS"), Some("-j4"));
        assert_eq!(applied.get("LDFLAGS"), Some("-L/deps/glibc/lib"));
        assert_eq!(applied.get("CPPFLAGS"), Some("-I/deps/linux-headers/include"));
    }
}
