//! Release verification of a relocated install tree.
//!
//! The suite copies the install prefix somewhere else first, so every check
//! also proves the tree works after a move. It then runs:
//!
//! 1. the recipe's functional checks (binaries and C probes),
//! 2. a descriptor check: each `lib/pkgconfig/*.pc` resolves to the copy,
//! 3. a scratch check: nothing mentions the build's scratch directory,
//! 4. a linkage check: no executable or shared object links into the
//!    package manager's library tree.
//!
//! Functional and portability failures are reported separately.
//!
//! ## Output Formats
//!
//! - `human`: Default human-readable output
//! - `json`: Machine-readable JSON output
//! - `github`: GitHub Actions annotations with job summary

pub mod checks;
mod format;
pub mod harness;
pub mod linkage;
mod types;

use std::path::{Path, PathBuf};
use std::time::Instant;

use tempfile::TempDir;

use crate::builder::env::Environment;
use crate::core::errors::VerificationError;
use crate::core::package::PortablePackage;
use crate::core::platform::PlatformProfile;
use crate::relocate::{pkgconfig, scrub};
use crate::util::fs::{copy_dir_all, glob_files};

pub use self::checks::{CheckContext, CheckProgram, Expectation, FunctionalCheck};
pub use self::format::{format_result, format_result_for_output, format_result_json};
pub use self::types::{
    FailureKind, OutputFormat, OutputFormatParseError, VerifyOptions, VerifyResult, VerifyStep,
};

/// Variables the checks inherit from the caller. Everything else is dropped.
const PASSTHROUGH_VARS: &[&str] = &["HOME", "TMPDIR", "LANG", "CC", "SDKROOT", "DEVELOPER_DIR"];

/// A finished verification run.
#[derive(Debug)]
pub struct VerifyOutcome {
    pub result: VerifyResult,
    /// Every failure, in step order
    pub failures: Vec<VerificationError>,
}

impl VerifyOutcome {
    /// The result if every step passed, else the first failure.
    pub fn into_result(self) -> Result<VerifyResult, VerificationError> {
        match self.failures.into_iter().next() {
            Some(err) => Err(err),
            None => Ok(self.result),
        }
    }
}

/// Verifies an installed package.
pub struct VerificationSuite<'a> {
    package: &'a dyn PortablePackage,
    profile: &'a PlatformProfile,
    options: VerifyOptions,
    caller_env: Environment,
}

impl<'a> VerificationSuite<'a> {
    pub fn new(package: &'a dyn PortablePackage, profile: &'a PlatformProfile, options: VerifyOptions) -> Self {
        VerificationSuite {
            package,
            profile,
            options,
            caller_env: Environment::default(),
        }
    }

    /// Let checks see `HOME`, `CC` and friends from `env`.
    pub fn with_caller_env(mut self, env: &Environment) -> Self {
        self.caller_env = env.clone();
        self
    }

    /// The isolated environment checks run with.
    pub fn check_env(&self, root: &Path) -> Environment {
        let mut pairs: Vec<(String, String)> = PASSTHROUGH_VARS
            .iter()
            .filter_map(|k| self.caller_env.get(k).map(|v| (k.to_string(), v.to_string())))
            .collect();
        pairs.push(("PATH".to_string(), "/usr/bin:/bin".to_string()));
        pairs.push((
            "PKG_CONFIG_PATH".to_string(),
            root.join("lib/pkgconfig").display().to_string(),
        ));
        Environment::from_pairs(pairs)
    }

    /// Verify the tree installed at `prefix`.
    ///
    /// Errors only when verification cannot start at all; check failures are
    /// collected in the outcome.
    pub fn run(&self, prefix: &Path) -> Result<VerifyOutcome, VerificationError> {
        let start = Instant::now();
        let mut result = VerifyResult::new(self.package.name(), self.package.version(), prefix);
        result.platform = Some(self.profile.to_string());
        let mut failures = Vec::new();

        if !prefix.is_dir() {
            return Err(VerificationError::Setup(format!(
                "{} is not an install tree",
                prefix.display()
            )));
        }

        // Relocate.
        let step_start = Instant::now();
        let (_guard, root) = self.relocated_copy(prefix)?;
        result.add_step(VerifyStep::pass(
            "relocate",
            format!("copied {} to {}", prefix.display(), root.display()),
            step_start.elapsed(),
        ));

        let env = self.check_env(&root);
        let workdir = root.join(".berth-verify");
        std::fs::create_dir_all(&workdir)
            .map_err(|e| VerificationError::Setup(format!("{}: {}", workdir.display(), e)))?;
        let ctx = CheckContext {
            root: &root,
            env: &env,
            workdir: &workdir,
        };

        for check in self.package.verify(self.profile) {
            if check.network && !self.options.network {
                result.add_step(VerifyStep::skip(&check.name, "network checks disabled"));
                continue;
            }
            let step_start = Instant::now();
            match check.run(&ctx) {
                Ok(observed) => {
                    tracing::debug!("check `{}` passed: {}", check.name, observed);
                    result.add_step(VerifyStep::pass(&check.name, observed, step_start.elapsed()));
                }
                Err(message) => {
                    tracing::warn!("check `{}` failed", check.name);
                    failures.push(VerificationError::Functional {
                        check: check.name.clone(),
                        message: message.clone(),
                    });
                    result.add_step(VerifyStep::fail(
                        &check.name,
                        FailureKind::Functional,
                        message,
                        step_start.elapsed(),
                    ));
                }
            }
        }
        remove_workdir(&workdir);

        let step = self.check_descriptors(&root, &mut failures);
        result.add_step(step);

        let step = self.check_scratch(prefix, &mut failures);
        result.add_step(step);

        let step = self.check_linkage(&root, &mut failures);
        result.add_step(step);

        result.total_duration = start.elapsed();
        tracing::info!(
            "verified {}: {}/{} steps passed",
            result.package,
            result.passed_count(),
            result.steps.len()
        );
        Ok(VerifyOutcome { result, failures })
    }

    fn relocated_copy(&self, prefix: &Path) -> Result<(Option<TempDir>, PathBuf), VerificationError> {
        let setup = |e: anyhow::Error| VerificationError::Setup(format!("{:#}", e));
        let name = prefix
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| self.package.name().into());

        let (guard, parent) = match self.options.copy_dir {
            Some(ref dir) => (None, dir.clone()),
            None => {
                let tmp = TempDir::new()
                    .map_err(|e| VerificationError::Setup(format!("temporary directory: {}", e)))?;
                let path = tmp.path().to_path_buf();
                (Some(tmp), path)
            }
        };
        let root = parent.join(name);
        copy_dir_all(prefix, &root).map_err(setup)?;
        // Resolve symlinks in the temp path so path comparisons are exact.
        let root = std::fs::canonicalize(&root).unwrap_or(root);
        Ok((guard, root))
    }

    fn check_descriptors(&self, root: &Path, failures: &mut Vec<VerificationError>) -> VerifyStep {
        let start = Instant::now();
        let descriptors = match glob_files(root, &[pkgconfig::DESCRIPTOR_GLOB.to_string()]) {
            Ok(d) => d,
            Err(e) => {
                return VerifyStep::fail("pkgconfig", FailureKind::Portability, format!("{:#}", e), start.elapsed())
            }
        };
        if descriptors.is_empty() {
            return VerifyStep::pass("pkgconfig", "no descriptors installed", start.elapsed());
        }

        let expected = pkgconfig::normalize(root);
        let mut problems = Vec::new();
        for descriptor in &descriptors {
            let rel = descriptor.strip_prefix(root).unwrap_or(descriptor).to_path_buf();
            match pkgconfig::resolve_prefix(descriptor) {
                Ok(resolved) if resolved == expected => {}
                Ok(resolved) => {
                    problems.push(format!("{} resolves to {}", rel.display(), resolved.display()));
                    failures.push(VerificationError::PortabilityLeak {
                        path: rel,
                        library: resolved.display().to_string(),
                    });
                }
                Err(e) => {
                    problems.push(format!("{}: {:#}", rel.display(), e));
                    failures.push(VerificationError::PortabilityLeak {
                        path: rel,
                        library: format!("{:#}", e),
                    });
                }
            }
        }

        if problems.is_empty() {
            VerifyStep::pass(
                "pkgconfig",
                format!("{} descriptor(s) resolve to the relocated tree", descriptors.len()),
                start.elapsed(),
            )
        } else {
            VerifyStep::fail("pkgconfig", FailureKind::Portability, problems.join("\n"), start.elapsed())
        }
    }

    fn check_scratch(&self, prefix: &Path, failures: &mut Vec<VerificationError>) -> VerifyStep {
        let Some(ref scratch) = self.options.scratch else {
            return VerifyStep::skip("scratch", "scratch directory unknown");
        };
        let start = Instant::now();
        match scrub::scan_leaks(prefix, scratch) {
            Ok(leaks) if leaks.is_empty() => VerifyStep::pass(
                "scratch",
                format!("no references to {}", scratch.display()),
                start.elapsed(),
            ),
            Ok(leaks) => {
                let lines: Vec<String> = leaks.iter().map(|p| p.display().to_string()).collect();
                for path in leaks {
                    failures.push(VerificationError::ScratchReference { path });
                }
                VerifyStep::fail("scratch", FailureKind::Portability, lines.join("\n"), start.elapsed())
            }
            Err(e) => VerifyStep::fail("scratch", FailureKind::Portability, e.to_string(), start.elapsed()),
        }
    }

    fn check_linkage(&self, root: &Path, failures: &mut Vec<VerificationError>) -> VerifyStep {
        let start = Instant::now();
        match linkage::check_tree(root, self.profile.os, &self.options.forbidden_prefixes) {
            Ok((leaks, inspected)) if leaks.is_empty() => VerifyStep::pass(
                "linkage",
                format!("{} object(s) link only the system and themselves", inspected),
                start.elapsed(),
            ),
            Ok((leaks, _)) => {
                let lines: Vec<String> = leaks
                    .iter()
                    .map(|l| format!("{} -> {}", l.path.display(), l.library))
                    .collect();
                for leak in leaks {
                    failures.push(VerificationError::PortabilityLeak {
                        path: leak.path,
                        library: leak.library,
                    });
                }
                VerifyStep::fail("linkage", FailureKind::Portability, lines.join("\n"), start.elapsed())
            }
            Err(e) => {
                let message = format!("cannot inspect linkage: {:#}", e);
                failures.push(VerificationError::Setup(message.clone()));
                VerifyStep::fail("linkage", FailureKind::Portability, message, start.elapsed())
            }
        }
    }
}

/// Drop the checks' scratch space so later steps never see it.
fn remove_workdir(workdir: &Path) {
    if let Err(e) = std::fs::remove_dir_all(workdir) {
        tracing::warn!("failed to remove {}: {}", workdir.display(), e);
    }
}
