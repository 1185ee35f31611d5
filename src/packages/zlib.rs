//! portable-zlib: the compression library as a static archive.

use crate::builder::env::EnvOverlay;
use crate::builder::plan::{BuildPlan, BuildStep, Phase};
use crate::core::dependency::Requirement;
use crate::core::errors::PlanningError;
use crate::core::features::FeatureFlags;
use crate::core::package::{PackageContext, PortablePackage};
use crate::core::platform::PlatformProfile;
use crate::ops::verify::checks::{Expectation, FunctionalCheck};
use crate::relocate::rule::RuleTable;
use crate::relocate::rules;

/// crc32 of `test`.
pub const CRC32_OF_TEST: &str = "3632233996";

const CRC32_PROBE: &str = r#"#include <stdio.h>
#include <zlib.h>

int main(void)
{
    const unsigned char input[] = "test";
    uLong crc = crc32(0L, Z_NULL, 0);
    crc = crc32(crc, input, 4);
    printf("%lu\n", crc);
    return 0;
}
"#;

pub struct Zlib;

impl PortablePackage for Zlib {
    fn name(&self) -> &'static str {
        "portable-zlib"
    }

    fn version(&self) -> &'static str {
        "1.3.1"
    }

    fn description(&self) -> &'static str {
        "General-purpose lossless data-compression library"
    }

    fn requirements(&self, _features: &FeatureFlags) -> Vec<Requirement> {
        Vec::new()
    }

    fn configure_env(&self, _ctx: &PackageContext<'_>, _env: &mut EnvOverlay) -> Result<(), PlanningError> {
        Ok(())
    }

    fn run_build(&self, ctx: &PackageContext<'_>, plan: &mut BuildPlan) -> Result<(), PlanningError> {
        plan.push(BuildStep::run(
            Phase::Configure,
            "./configure",
            ["--static".to_string(), format!("--prefix={}", ctx.prefix.display())],
        ))
        .push(BuildStep::run(Phase::Install, "make", ["install"]));
        Ok(())
    }

    fn artifact_rules(&self, ctx: &PackageContext<'_>) -> RuleTable {
        rules::zlib_artifact(ctx.prefix)
    }

    fn verify(&self, _profile: &PlatformProfile) -> Vec<FunctionalCheck> {
        vec![FunctionalCheck::probe(
            "crc32",
            CRC32_PROBE,
            ["-lz"],
            Expectation::Equals(CRC32_OF_TEST.to_string()),
        )]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ops::verify::checks::CheckProgram;

    #[test]
    fn test_probe_links_zlib() {
        let profile = PlatformProfile::resolve(&crate::core::platform::HostFacts::new("linux", "x86_64")).unwrap();
        let checks = Zlib.verify(&profile);
        assert_eq!(checks.len(), 1);
        match &checks[0].program {
            CheckProgram::CProbe { source, libs, .. } => {
                assert!(source.contains("crc32(crc, input, 4)"));
                assert_eq!(libs, &["-lz"]);
            }
            other => panic!("unexpected program: {:?}", other),
        }
        assert!(!checks[0].network);
    }
}
