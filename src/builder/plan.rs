//! Build plan representation.
//!
//! A BuildPlan is everything the executor needs to turn a scratch source tree
//! into an installed prefix: the ordered native steps, the environment
//! overlay they run under, and the toolchain baseline chosen for them. Plans
//! are plain data; they serialize to JSON for `berth build --plan`.

use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::builder::env::EnvOverlay;

/// Coarse phase a step belongs to, used for logging and error reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Prepare,
    Configure,
    Compile,
    Install,
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Phase::Prepare => "prepare",
            Phase::Configure => "configure",
            Phase::Compile => "compile",
            Phase::Install => "install",
        };
        f.write_str(s)
    }
}

/// In-process work the executor performs between native steps.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "hook", rename_all = "snake_case")]
pub enum BuildHook {
    /// Create a directory (absolute, or relative to the source tree).
    CreateDir { path: PathBuf },

    /// Copy pinned resource files into a source-tree directory.
    StageFiles { dest: PathBuf, files: Vec<PathBuf> },

    /// Rewrite the runtime's bundled gem list, appending extra `name version` lines.
    RewriteBundledGems { extra: Vec<String> },

    /// Generate the load-path helper for bundled gems.
    WriteGemLoadPaths,
}

impl BuildHook {
    pub fn name(&self) -> &'static str {
        match self {
            BuildHook::CreateDir { .. } => "create-dir",
            BuildHook::StageFiles { .. } => "stage-files",
            BuildHook::RewriteBundledGems { .. } => "rewrite-bundled-gems",
            BuildHook::WriteGemLoadPaths => "write-gem-load-paths",
        }
    }
}

/// What a step does.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StepAction {
    /// Run a native tool in the source tree.
    Run { program: String, args: Vec<String> },
    /// Run an in-process hook.
    Hook(BuildHook),
}

/// A single build step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BuildStep {
    pub phase: Phase,
    pub action: StepAction,
}

impl BuildStep {
    /// A native command step.
    pub fn run<I, S>(phase: Phase, program: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        BuildStep {
            phase,
            action: StepAction::Run {
                program: program.into(),
                args: args.into_iter().map(Into::into).collect(),
            },
        }
    }

    /// An in-process hook step.
    pub fn hook(phase: Phase, hook: BuildHook) -> Self {
        BuildStep {
            phase,
            action: StepAction::Hook(hook),
        }
    }

    /// Human-readable command line for logs and errors.
    pub fn display(&self) -> String {
        match &self.action {
            StepAction::Run { program, args } => {
                let mut parts = vec![program.clone()];
                parts.extend(args.iter().map(|a| {
                    if a.contains(' ') {
                        format!("\"{}\"", a)
                    } else {
                        a.clone()
                    }
                }));
                parts.join(" ")
            }
            StepAction::Hook(hook) => format!("<{}>", hook.name()),
        }
    }
}

/// C library baseline the native build links against.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Baseline {
    /// Whatever the build host provides.
    Host,
    /// Old glibc and kernel headers, for the widest Linux reach.
    Conservative {
        glibc: PathBuf,
        linux_headers: PathBuf,
    },
}

/// Rust toolchain used by the runtime's JIT.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JitToolchain {
    /// rustup toolchain name
    pub toolchain: String,
    /// Shared `RUSTUP_HOME`, when the caller provides one
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rustup_home: Option<String>,
    /// Whether the plan installs the toolchain first
    pub install: bool,
}

/// Toolchain choices recorded in a plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ToolchainSelection {
    pub baseline: Baseline,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub jit: Option<JitToolchain>,
}

impl Default for ToolchainSelection {
    fn default() -> Self {
        ToolchainSelection {
            baseline: Baseline::Host,
            jit: None,
        }
    }
}

/// A complete build plan for one package.
#[derive(Debug, Clone, Serialize)]
pub struct BuildPlan {
    /// Package being built
    pub package: String,

    /// Scratch source tree the steps run in
    pub source_dir: PathBuf,

    /// Final install prefix
    pub prefix: PathBuf,

    /// Steps in execution order
    pub steps: Vec<BuildStep>,

    /// Environment edits applied to the caller's snapshot
    pub env: EnvOverlay,

    /// Toolchain choices
    pub toolchain: ToolchainSelection,

    /// Non-fatal planning warnings
    pub warnings: Vec<String>,
}

impl BuildPlan {
    pub fn new(package: impl Into<String>, source_dir: impl Into<PathBuf>, prefix: impl Into<PathBuf>) -> Self {
        BuildPlan {
            package: package.into(),
            source_dir: source_dir.into(),
            prefix: prefix.into(),
            steps: Vec::new(),
            env: EnvOverlay::new(),
            toolchain: ToolchainSelection::default(),
            warnings: Vec::new(),
        }
    }

    pub fn push(&mut self, step: BuildStep) -> &mut Self {
        self.steps.push(step);
        self
    }

    /// Arguments of the first configure command.
    pub fn configure_args(&self) -> &[String] {
        self.steps
            .iter()
            .filter(|s| s.phase == Phase::Configure)
            .find_map(|s| match &s.action {
                StepAction::Run { args, .. } => Some(args.as_slice()),
                StepAction::Hook(_) => None,
            })
            .unwrap_or(&[])
    }

    /// Number of native commands in the plan.
    pub fn command_count(&self) -> usize {
        self.steps
            .iter()
            .filter(|s| matches!(s.action, StepAction::Run { .. }))
            .count()
    }

    /// Resolve a plan-relative path against the source tree.
    pub fn source_path(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.source_dir.join(path)
        }
    }

    /// Serialize the plan for `--plan` output.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}
