//! Pipeline error taxonomy.
//!
//! Every stage of the portable build has its own error type so the operator
//! can tell at a glance whether a failure happened before anything ran
//! (planning), inside the native build, while relocating outputs, or during
//! release verification.

use std::path::PathBuf;

use thiserror::Error;

use crate::util::diagnostic::{suggestions, Diagnostic};

/// Error raised before any build step runs. Nothing has been written yet.
#[derive(Debug, Error)]
pub enum PlanningError {
    #[error("unsupported platform: {os}/{arch}")]
    UnsupportedPlatform { os: String, arch: String },

    #[error("missing dependency `{family}` for `{package}` on {os}")]
    MissingDependency {
        package: String,
        family: String,
        os: String,
    },

    #[error("required tool `{tool}` not found")]
    MissingTool { tool: String, hint: String },

    #[error("`{package}` needs the pinned resource `{resource}`, which the manifest does not provide")]
    MissingResource { package: String, resource: String },

    #[error("unknown package `{0}`")]
    UnknownPackage(String),

    #[error("invalid dependency manifest {path}: {message}")]
    InvalidManifest { path: PathBuf, message: String },
}

/// A native configure/compile/install step failed.
///
/// Native build failures are deterministic for a given input, so these are
/// never retried.
#[derive(Debug, Error)]
pub enum BuildError {
    #[error("{phase} step failed: `{command}` (exit code {code:?})")]
    StepFailed {
        phase: String,
        command: String,
        code: Option<i32>,
        stdout: String,
        stderr: String,
    },

    #[error("failed to spawn `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("build hook `{hook}` failed: {message}")]
    Hook { hook: String, message: String },

    #[error("scratch directory error at {path}: {source}")]
    Scratch {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// A relocation rule could not be applied.
#[derive(Debug, Error)]
pub enum PatchError {
    #[error("mandatory rule `{rule}` matched no files for `{selector}`")]
    NoTargets { rule: String, selector: String },

    #[error("mandatory rule `{rule}` found no match in {path}")]
    NoMatch { rule: String, path: PathBuf },

    #[error("rule `{rule}` has an invalid pattern: {message}")]
    InvalidPattern { rule: String, message: String },

    #[error("{path} still references the scratch directory")]
    ScratchLeak { path: PathBuf },

    #[error("I/O error while patching {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl PatchError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        PatchError::Io {
            path: path.into(),
            source,
        }
    }
}

/// Release verification failed.
#[derive(Debug, Error)]
pub enum VerificationError {
    #[error("functional check `{check}` failed: {message}")]
    Functional { check: String, message: String },

    #[error("portability leak: {path} links against {library}")]
    PortabilityLeak { path: PathBuf, library: String },

    #[error("portability leak: {path} references the scratch directory")]
    ScratchReference { path: PathBuf },

    #[error("verification could not run: {0}")]
    Setup(String),
}

impl VerificationError {
    /// Whether this failure points at a relocation defect rather than a
    /// broken build.
    pub fn is_portability_leak(&self) -> bool {
        matches!(
            self,
            VerificationError::PortabilityLeak { .. } | VerificationError::ScratchReference { .. }
        )
    }
}

/// Any error surfaced by the portable install routine.
#[derive(Debug, Error)]
pub enum PortableError {
    #[error(transparent)]
    Planning(#[from] PlanningError),

    #[error(transparent)]
    Build(#[from] BuildError),

    #[error(transparent)]
    Patch(#[from] PatchError),

    #[error(transparent)]
    Verification(#[from] VerificationError),

    #[error("export failed: {0:#}")]
    Export(anyhow::Error),
}

impl PortableError {
    /// Convert to a user-friendly diagnostic.
    pub fn to_diagnostic(&self) -> Diagnostic {
        match self {
            PortableError::Planning(PlanningError::UnsupportedPlatform { os, arch }) => {
                Diagnostic::error(format!("cannot build portable packages on {}/{}", os, arch))
                    .with_context("supported: darwin x86_64/aarch64, linux x86_64/x86/aarch64/arm")
                    .with_suggestion(suggestions::UNSUPPORTED_PLATFORM)
            }
            PortableError::Planning(PlanningError::MissingDependency {
                package,
                family,
                os,
            }) => Diagnostic::error(format!("`{}` requires `{}` on {}", package, family, os))
                .with_suggestion(suggestions::MISSING_DEPENDENCY),
            PortableError::Planning(PlanningError::MissingTool { tool, hint }) => {
                Diagnostic::error(format!("`{}` not found", tool)).with_suggestion(hint.clone())
            }
            PortableError::Planning(e) => Diagnostic::error(e.to_string()),
            PortableError::Build(BuildError::StepFailed {
                phase,
                command,
                code,
                stdout,
                stderr,
            }) => {
                let mut diag = Diagnostic::error(format!("{} step failed", phase))
                    .with_context(format!("command: {}", command))
                    .with_context(format!("exit code: {:?}", code));
                if !stdout.trim().is_empty() {
                    diag = diag.with_context(format!("stdout:\n{}", stdout.trim_end()));
                }
                if !stderr.trim().is_empty() {
                    diag = diag.with_context(format!("stderr:\n{}", stderr.trim_end()));
                }
                diag.with_suggestion(suggestions::BUILD_FAILED)
            }
            PortableError::Build(e) => Diagnostic::error(e.to_string()),
            PortableError::Patch(e @ PatchError::NoMatch { path, .. }) => {
                Diagnostic::error(e.to_string())
                    .with_location(path.clone())
                    .with_suggestion(suggestions::RULE_DRIFT)
            }
            PortableError::Patch(e) => Diagnostic::error(e.to_string()),
            PortableError::Verification(e) if e.is_portability_leak() => {
                Diagnostic::error(e.to_string()).with_suggestion(suggestions::PORTABILITY_LEAK)
            }
            PortableError::Verification(e) => Diagnostic::error(e.to_string()),
            PortableError::Export(e) => Diagnostic::error(format!("{:#}", e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_leak_classification() {
        let leak = VerificationError::PortabilityLeak {
            path: PathBuf::from("bin/ruby"),
            library: "/opt/homebrew/lib/libyaml.dylib".into(),
        };
        assert!(leak.is_portability_leak());

        let functional = VerificationError::Functional {
            check: "zlib".into(),
            message: "mismatch".into(),
        };
        assert!(!functional.is_portability_leak());
    }

    #[test]
    fn test_step_failure_diagnostic_keeps_output() {
        let err = PortableError::from(BuildError::StepFailed {
            phase: "configure".into(),
            command: "./configure --prefix=/p".into(),
            code: Some(1),
            stdout: "checking for gcc... no".into(),
            stderr: "configure: error: no acceptable C compiler".into(),
        });
        let text = err.to_diagnostic().format(false);
        assert!(text.contains("checking for gcc... no"));
        assert!(text.contains("no acceptable C compiler"));
    }
}
