//! Functional checks declared by package recipes.

use std::path::{Path, PathBuf};

use serde::Serialize;

use super::harness;
use crate::builder::env::Environment;
use crate::util::process::ProcessBuilder;

/// What a check runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CheckProgram {
    /// A program inside the install tree, e.g. `bin/ruby`.
    Bin { bin: String, args: Vec<String> },
    /// A C program compiled against the install tree's headers and archives.
    CProbe {
        source: String,
        libs: Vec<String>,
        args: Vec<String>,
    },
}

/// What the program's standard output must look like.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Expectation {
    /// Trimmed output equals the value
    Equals(String),
    /// Output contains the value
    Contains(String),
    /// Trimmed output is the canonical path of this file in the tree under test
    RelocatedPath(String),
    /// Exit status zero is enough
    Succeeds,
}

impl Expectation {
    /// Compare observed output against the expectation.
    pub fn evaluate(&self, stdout: &str, root: &Path) -> Result<(), String> {
        let observed = stdout.trim();
        match self {
            Expectation::Equals(want) if observed == want => Ok(()),
            Expectation::Equals(want) => Err(format!("expected `{}`, got `{}`", want, observed)),
            Expectation::Contains(want) if stdout.contains(want.as_str()) => Ok(()),
            Expectation::Contains(want) => {
                Err(format!("expected output containing `{}`, got `{}`", want, observed))
            }
            Expectation::RelocatedPath(rel) => {
                let expected = canonical(&root.join(rel));
                let actual = canonical(Path::new(observed));
                if expected == actual {
                    Ok(())
                } else {
                    Err(format!(
                        "expected {}, got {} (not relocated)",
                        expected.display(),
                        observed
                    ))
                }
            }
            Expectation::Succeeds => Ok(()),
        }
    }
}

fn canonical(path: &Path) -> PathBuf {
    std::fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf())
}

/// One functional check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FunctionalCheck {
    pub name: String,
    pub program: CheckProgram,
    pub expect: Expectation,
    /// Needs outbound network access
    pub network: bool,
}

/// Where checks run.
#[derive(Debug, Clone, Copy)]
pub struct CheckContext<'a> {
    /// Install tree under test
    pub root: &'a Path,
    /// Isolated environment every check runs with
    pub env: &'a Environment,
    /// Scratch directory for probe sources and binaries
    pub workdir: &'a Path,
}

impl FunctionalCheck {
    /// Run a program from the install tree.
    pub fn bin<I, S>(name: impl Into<String>, bin: impl Into<String>, args: I, expect: Expectation) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        FunctionalCheck {
            name: name.into(),
            program: CheckProgram::Bin {
                bin: bin.into(),
                args: args.into_iter().map(Into::into).collect(),
            },
            expect,
            network: false,
        }
    }

    /// Compile and run a C probe.
    pub fn probe<I, S>(name: impl Into<String>, source: impl Into<String>, libs: I, expect: Expectation) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        FunctionalCheck {
            name: name.into(),
            program: CheckProgram::CProbe {
                source: source.into(),
                libs: libs.into_iter().map(Into::into).collect(),
                args: Vec::new(),
            },
            expect,
            network: false,
        }
    }

    /// Arguments passed to a C probe when it runs.
    pub fn with_probe_args<I, S>(mut self, probe_args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        if let CheckProgram::CProbe { ref mut args, .. } = self.program {
            args.extend(probe_args.into_iter().map(Into::into));
        }
        self
    }

    pub fn needs_network(mut self) -> Self {
        self.network = true;
        self
    }

    /// Run the check. `Ok` carries the observed output, `Err` explains the failure.
    pub fn run(&self, ctx: &CheckContext<'_>) -> Result<String, String> {
        let output = match &self.program {
            CheckProgram::Bin { bin, args } => {
                let program = ctx.root.join(bin);
                if !program.exists() {
                    return Err(format!("{} is missing from the install tree", bin));
                }
                ProcessBuilder::new(&program)
                    .args(args)
                    .environment(ctx.env)
                    .cwd(ctx.workdir)
                    .exec()
                    .map_err(|e| format!("{:#}", e))?
            }
            CheckProgram::CProbe { source, libs, args } => {
                let probe_dir = ctx.workdir.join(probe_dir_name(&self.name));
                let probe = harness::compile_probe("probe", source, ctx.root, libs, &probe_dir, ctx.env)
                    .map_err(|e| format!("{:#}", e))?;
                harness::run_probe(&probe, args, ctx.env, &probe_dir).map_err(|e| format!("{:#}", e))?
            }
        };

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        if !output.status.success() {
            return Err(format!(
                "exited with {:?}\n{}{}",
                output.status.code(),
                stdout,
                String::from_utf8_lossy(&output.stderr)
            ));
        }
        self.expect.evaluate(&stdout, ctx.root)?;
        Ok(stdout.trim().to_string())
    }
}

fn probe_dir_name(check: &str) -> String {
    check
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '-' })
        .collect()
}
