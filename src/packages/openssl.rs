//! portable-openssl: the crypto library, static, with runtime trust probing.

use std::path::PathBuf;

use anyhow::Result;

use crate::builder::env::EnvOverlay;
use crate::builder::plan::{BuildHook, BuildPlan, BuildStep, Phase};
use crate::core::dependency::Requirement;
use crate::core::errors::PlanningError;
use crate::core::features::FeatureFlags;
use crate::core::package::{PackageContext, PortablePackage};
use crate::core::platform::PlatformProfile;
use crate::ops::verify::checks::{Expectation, FunctionalCheck};
use crate::relocate::rule::RuleTable;
use crate::relocate::rules;
use crate::relocate::trust::{TrustBundle, OPENSSL_BUNDLE};

/// Pinned CA bundle resource.
pub const CACERT_RESOURCE: &str = "cacert";

/// `--openssldir`, relative to the prefix.
pub const OPENSSL_DIR: &str = "libexec/etc/openssl";

pub const PROBE_INPUT: &str = "This is a test string";
pub const PROBE_SHA256: &str = "717ac506950da0ccb6404cdd5e7591f72018a20cbca27c8a423e9c9e5626ac61";

const SHA256_PROBE: &str = r#"#include <openssl/evp.h>
#include <stdio.h>
#include <string.h>

int main(int argc, char *argv[])
{
    if (argc < 2)
        return -1;

    unsigned char md[EVP_MAX_MD_SIZE];
    unsigned int size;

    if (!EVP_Digest(argv[1], strlen(argv[1]), md, &size, EVP_sha256(), NULL))
        return 1;

    for (unsigned int i = 0; i < size; i++)
        printf("%02x", md[i]);
    return 0;
}
"#;

pub struct Openssl;

impl Openssl {
    /// Arguments for `perl ./Configure`.
    pub fn configure_args(&self, ctx: &PackageContext<'_>) -> Vec<String> {
        let prefix = ctx.prefix;
        let mut args = vec![
            format!("--prefix={}", prefix.display()),
            format!("--openssldir={}", prefix.join(OPENSSL_DIR).display()),
            format!("--libdir={}", prefix.join("lib").display()),
        ];
        if !ctx.features.legacy_crypto {
            args.push("no-legacy".to_string());
        }
        args.extend(
            ["no-module", "no-shared", "no-engine", "no-makedepend"]
                .iter()
                .map(|s| s.to_string()),
        );
        args.extend(ctx.profile.openssl_target());
        args
    }
}

impl PortablePackage for Openssl {
    fn name(&self) -> &'static str {
        "portable-openssl"
    }

    fn version(&self) -> &'static str {
        "3.5.1"
    }

    fn description(&self) -> &'static str {
        "Cryptography and SSL/TLS Toolkit"
    }

    fn requirements(&self, _features: &FeatureFlags) -> Vec<Requirement> {
        Vec::new()
    }

    fn configure_env(&self, _ctx: &PackageContext<'_>, _env: &mut EnvOverlay) -> Result<(), PlanningError> {
        Ok(())
    }

    fn run_build(&self, ctx: &PackageContext<'_>, plan: &mut BuildPlan) -> Result<(), PlanningError> {
        // Fail at planning time rather than after a full compile.
        ctx.resource(self.name(), CACERT_RESOURCE)?;

        plan.push(BuildStep::hook(
            Phase::Prepare,
            BuildHook::CreateDir {
                path: ctx.prefix.join(OPENSSL_DIR),
            },
        ))
        .push(BuildStep::run(
            Phase::Configure,
            "perl",
            std::iter::once("./Configure".to_string()).chain(self.configure_args(ctx)),
        ))
        .push(BuildStep::run(Phase::Compile, "make", Vec::<String>::new()))
        .push(BuildStep::run(Phase::Install, "make", ["install_dev"]));
        Ok(())
    }

    fn source_rules(&self) -> Option<RuleTable> {
        Some(rules::openssl_source())
    }

    fn artifact_rules(&self, ctx: &PackageContext<'_>) -> RuleTable {
        rules::openssl_artifact(ctx.prefix)
    }

    fn install_extras(&self, ctx: &PackageContext<'_>) -> Result<Vec<PathBuf>> {
        let cacert = ctx.resource(self.name(), CACERT_RESOURCE)?;
        let installed = TrustBundle::new(&cacert.path).install(ctx.prefix, OPENSSL_BUNDLE)?;
        Ok(vec![installed])
    }

    fn verify(&self, profile: &PlatformProfile) -> Vec<FunctionalCheck> {
        let mut libs = vec!["-lcrypto".to_string()];
        if profile.is_linux() {
            libs.extend(["-lpthread".to_string(), "-ldl".to_string()]);
        }
        vec![FunctionalCheck::probe(
            "sha256",
            SHA256_PROBE,
            libs,
            Expectation::Equals(PROBE_SHA256.to_string()),
        )
        .with_probe_args([PROBE_INPUT])]
    }
}
