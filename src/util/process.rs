//! Subprocess execution.
//!
//! Native build steps and verification checks never inherit the caller's
//! environment implicitly: they are handed an [`Environment`] snapshot, and
//! the child sees exactly that. Commands without one (host introspection,
//! linkage listing) inherit as usual.

use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::process::{Command, Output, Stdio};

use anyhow::{bail, Context, Result};

use crate::builder::env::Environment;

/// Builder for a single subprocess invocation.
#[derive(Debug, Clone)]
pub struct ProcessBuilder {
    program: PathBuf,
    args: Vec<String>,
    /// `Some` replaces the inherited environment entirely
    env: Option<Environment>,
    cwd: Option<PathBuf>,
}

impl ProcessBuilder {
    pub fn new(program: impl AsRef<Path>) -> Self {
        ProcessBuilder {
            program: program.as_ref().to_path_buf(),
            args: Vec::new(),
            env: None,
            cwd: None,
        }
    }

    pub fn arg(mut self, arg: impl AsRef<OsStr>) -> Self {
        self.args.push(arg.as_ref().to_string_lossy().into_owned());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        self.args
            .extend(args.into_iter().map(|s| s.as_ref().to_string_lossy().into_owned()));
        self
    }

    /// Run with exactly this environment instead of inheriting ours.
    pub fn environment(mut self, environment: &Environment) -> Self {
        self.env = Some(environment.clone());
        self
    }

    pub fn cwd(mut self, cwd: impl AsRef<Path>) -> Self {
        self.cwd = Some(cwd.as_ref().to_path_buf());
        self
    }

    fn build_command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args).stdin(Stdio::null());
        if let Some(ref env) = self.env {
            cmd.env_clear();
            cmd.envs(env.iter());
        }
        if let Some(ref cwd) = self.cwd {
            cmd.current_dir(cwd);
        }
        cmd
    }

    /// Run to completion, capturing stdout and stderr.
    pub fn exec(&self) -> Result<Output> {
        self.exec_raw()
            .with_context(|| format!("failed to spawn `{}`", self.display_command()))
    }

    /// Like [`exec`](Self::exec), but hands back the raw I/O error for
    /// callers with their own error types.
    pub fn exec_raw(&self) -> std::io::Result<Output> {
        self.build_command().output()
    }

    /// Trimmed stdout of a successful run.
    pub fn read_stdout(&self) -> Result<String> {
        let output = self.exec()?;
        if !output.status.success() {
            bail!(
                "`{}` failed with exit code {:?}\n{}",
                self.display_command(),
                output.status.code(),
                String::from_utf8_lossy(&output.stderr)
            );
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim_end().to_string())
    }

    /// Shell-like rendering for logs and error messages.
    pub fn display_command(&self) -> String {
        let mut parts = vec![self.program.display().to_string()];
        parts.extend(self.args.iter().map(|arg| {
            if arg.contains(' ') {
                format!("\"{}\"", arg)
            } else {
                arg.clone()
            }
        }));
        parts.join(" ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_command_quotes_spaces() {
        let pb = ProcessBuilder::new("./configure").args(["--prefix=/opt/ruby", "MKDIR_P=/bin/mkdir -p"]);
        assert_eq!(
            pb.display_command(),
            "./configure --prefix=/opt/ruby \"MKDIR_P=/bin/mkdir -p\""
        );
    }

    #[cfg(unix)]
    #[test]
    fn test_exec_inherits_without_environment() {
        let output = ProcessBuilder::new("echo").arg("hello").exec().unwrap();
        assert!(output.status.success());
        assert_eq!(String::from_utf8_lossy(&output.stdout).trim(), "hello");
    }

    #[cfg(unix)]
    #[test]
    fn test_explicit_environment_replaces_inherited() {
        let env = Environment::from_pairs([("BERTH_PROBE", "1"), ("PATH", "/usr/bin:/bin")]);
        let out = ProcessBuilder::new("/bin/sh")
            .args(["-c", "echo ${BERTH_PROBE}-${HOME:-unset}"])
            .environment(&env)
            .read_stdout()
            .unwrap();
        assert_eq!(out, "1-unset");
    }

    #[test]
    fn test_spawn_failure_names_command() {
        let err = ProcessBuilder::new("/nonexistent/berth-tool")
            .arg("--version")
            .exec()
            .unwrap_err();
        assert!(err.to_string().contains("/nonexistent/berth-tool --version"));
    }
}
