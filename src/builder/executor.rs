//! Build executor with progress reporting.
//!
//! Runs a [`BuildPlan`] step by step in its scratch source tree. Native steps
//! run with exactly the plan's environment (the caller's snapshot plus the
//! overlay); hooks run in process. The first failing step stops the build and
//! carries its captured output.

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;

use crate::builder::env::Environment;
use crate::builder::plan::{BuildHook, BuildPlan, BuildStep, StepAction};
use crate::core::errors::BuildError;
use crate::ops::gems;
use crate::util::fs;
use crate::util::process::ProcessBuilder;

/// What a successful build leaves behind.
#[derive(Debug, Clone, Serialize)]
pub struct BuildArtifact {
    pub package: String,
    pub prefix: PathBuf,
    pub steps_run: usize,
    pub duration: Duration,
}

/// Executes build plans.
pub struct BuildExecutor<'a> {
    env: &'a Environment,
    verbose: bool,
    progress: bool,
}

impl<'a> BuildExecutor<'a> {
    /// Create an executor; `env` is the caller's snapshot the plan's overlay
    /// is applied to.
    pub fn new(env: &'a Environment) -> Self {
        BuildExecutor {
            env,
            verbose: false,
            progress: true,
        }
    }

    /// Echo every step and its output.
    pub fn verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    /// Show a progress bar on stderr.
    pub fn progress(mut self, progress: bool) -> Self {
        self.progress = progress;
        self
    }

    /// Execute a build plan.
    pub fn execute(&self, plan: &BuildPlan) -> Result<BuildArtifact, BuildError> {
        let start = Instant::now();

        if !plan.source_dir.is_dir() {
            return Err(BuildError::Scratch {
                path: plan.source_dir.clone(),
                source: std::io::Error::new(std::io::ErrorKind::NotFound, "source tree does not exist"),
            });
        }

        let env = plan.env.apply(self.env);
        let pb = self.progress_bar(plan.steps.len());

        for step in &plan.steps {
            let step_display = step.display();
            if let Some(pb) = &pb {
                pb.set_message(step_display.clone());
            }
            if self.verbose {
                eprintln!("   {:>9} {}", step.phase, step_display);
            }
            tracing::info!("{}: {}", step.phase, step_display);

            let result = match &step.action {
                StepAction::Run { program, args } => self.run_native(plan, step, program, args, &env),
                StepAction::Hook(hook) => run_hook(plan, hook),
            };
            if let Err(e) = result {
                if let Some(pb) = &pb {
                    pb.abandon_with_message(format!("failed: {}", step_display));
                }
                return Err(e);
            }

            if let Some(pb) = &pb {
                pb.inc(1);
            }
        }

        if let Some(pb) = pb {
            pb.finish_and_clear();
        }

        let duration = start.elapsed();
        eprintln!(
            "    Finished {} in {:.2}s ({} step(s))",
            plan.package,
            duration.as_secs_f64(),
            plan.steps.len()
        );

        Ok(BuildArtifact {
            package: plan.package.clone(),
            prefix: plan.prefix.clone(),
            steps_run: plan.steps.len(),
            duration,
        })
    }

    fn progress_bar(&self, total: usize) -> Option<ProgressBar> {
        if !self.progress || self.verbose || total < 2 {
            return None;
        }
        let pb = ProgressBar::new(total as u64);
        pb.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("#>-"),
        );
        pb.enable_steady_tick(Duration::from_millis(120));
        Some(pb)
    }

    fn run_native(
        &self,
        plan: &BuildPlan,
        step: &BuildStep,
        program: &str,
        args: &[String],
        env: &Environment,
    ) -> Result<(), BuildError> {
        let cmd = ProcessBuilder::new(program)
            .args(args)
            .environment(env)
            .cwd(&plan.source_dir);

        let output = cmd.exec_raw().map_err(|source| BuildError::Spawn {
            command: cmd.display_command(),
            source,
        })?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        if self.verbose {
            eprint!("{}{}", stdout, stderr);
        }

        if !output.status.success() {
            return Err(BuildError::StepFailed {
                phase: step.phase.to_string(),
                command: step.display(),
                code: output.status.code(),
                stdout: stdout.into_owned(),
                stderr: stderr.into_owned(),
            });
        }
        Ok(())
    }
}

fn run_hook(plan: &BuildPlan, hook: &BuildHook) -> Result<(), BuildError> {
    let hook_error = |e: anyhow::Error| BuildError::Hook {
        hook: hook.name().to_string(),
        message: format!("{:#}", e),
    };

    match hook {
        BuildHook::CreateDir { path } => {
            fs::ensure_dir(&plan.source_path(path)).map_err(hook_error)?;
        }
        BuildHook::StageFiles { dest, files } => {
            let dest = plan.source_path(dest);
            for file in files {
                fs::copy_into(file, &dest).map_err(hook_error)?;
            }
        }
        BuildHook::RewriteBundledGems { extra } => {
            gems::rewrite_bundled_gems(&plan.source_dir, extra).map_err(hook_error)?;
        }
        BuildHook::WriteGemLoadPaths => {
            gems::write_gem_load_paths(&plan.source_dir).map_err(hook_error)?;
        }
    }
    Ok(())
}

/// Remove a scratch tree unless the caller asked to keep it.
pub fn cleanup_scratch(scratch: &Path, keep: bool) -> Result<(), BuildError> {
    if keep {
        tracing::info!("keeping scratch directory {}", scratch.display());
        return Ok(());
    }
    std::fs::remove_dir_all(scratch).or_else(|e| match e.kind() {
        std::io::ErrorKind::NotFound => Ok(()),
        _ => Err(BuildError::Scratch {
            path: scratch.to_path_buf(),
            source: e,
        }),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::plan::Phase;
    use tempfile::TempDir;

    fn env() -> Environment {
        Environment::from_pairs([("PATH", "/usr/bin:/bin")])
    }

    #[test]
    fn test_missing_source_tree() {
        let plan = BuildPlan::new("portable-zlib", "/nonexistent/berth/scratch", "/out");
        let env = env();
        let err = BuildExecutor::new(&env).progress(false).execute(&plan).unwrap_err();
        assert!(matches!(err, BuildError::Scratch { .. }));
    }

    #[cfg(unix)]
    #[test]
    fn test_steps_see_plan_environment() {
        let tmp = TempDir::new().unwrap();
        let mut plan = BuildPlan::new("portable-zlib", tmp.path(), tmp.path().join("out"));
        plan.env.set("BERTH_PROBE", "from-plan");
        plan.push(BuildStep::hook(
            Phase::Prepare,
            BuildHook::CreateDir { path: PathBuf::from("out") },
        ))
        .push(BuildStep::run(
            Phase::Compile,
            "/bin/sh",
            ["-c", "echo \"$BERTH_PROBE\" > out/probe.txt"],
        ));

        let env = env();
        let artifact = BuildExecutor::new(&env).progress(false).execute(&plan).unwrap();
        assert_eq!(artifact.steps_run, 2);
        let written = std::fs::read_to_string(tmp.path().join("out/probe.txt")).unwrap();
        assert_eq!(written.trim(), "from-plan");
    }

    #[cfg(unix)]
    #[test]
    fn test_failing_step_stops_the_build() {
        let tmp = TempDir::new().unwrap();
        let mut plan = BuildPlan::new("portable-openssl", tmp.path(), tmp.path().join("out"));
        plan.push(BuildStep::run(
            Phase::Configure,
            "/bin/sh",
            ["-c", "echo 'Configure: unknown target' >&2; exit 3"],
        ))
        .push(BuildStep::run(Phase::Install, "/bin/sh", ["-c", "touch never"]));

        let env = env();
        let err = BuildExecutor::new(&env).progress(false).execute(&plan).unwrap_err();
        match err {
            BuildError::StepFailed { phase, code, stderr, .. } => {
                assert_eq!(phase, "configure");
                assert_eq!(code, Some(3));
                assert!(stderr.contains("unknown target"));
            }
            other => panic!("unexpected error: {:?}", other),
        }
        assert!(!tmp.path().join("never").exists());
    }

    #[cfg(unix)]
    #[test]
    fn test_failure_keeps_all_output() {
        let tmp = TempDir::new().unwrap();
        let mut plan = BuildPlan::new("portable-openssl", tmp.path(), tmp.path().join("out"));
        plan.push(BuildStep::run(
            Phase::Configure,
            "/bin/sh",
            [
                "-c",
                "echo 'Can'\\''t locate IPC/Cmd.pm' >&2; \
                 i=0; while [ $i -lt 100 ]; do echo \"checking $i\"; echo \"noise $i\" >&2; i=$((i+1)); done; \
                 exit 2",
            ],
        ));

        let env = env();
        let err = BuildExecutor::new(&env).progress(false).execute(&plan).unwrap_err();
        match err {
            BuildError::StepFailed { code, stdout, stderr, .. } => {
                assert_eq!(code, Some(2));
                assert!(stderr.starts_with("Can't locate IPC/Cmd.pm"));
                assert_eq!(stderr.lines().count(), 101);
                assert!(stdout.contains("checking 0\n"));
                assert_eq!(stdout.lines().count(), 100);
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_spawn_failure() {
        let tmp = TempDir::new().unwrap();
        let mut plan = BuildPlan::new("portable-zlib", tmp.path(), "/out");
        plan.push(BuildStep::run(Phase::Configure, "/nonexistent/configure", Vec::<String>::new()));
        let env = env();
        let err = BuildExecutor::new(&env).progress(false).execute(&plan).unwrap_err();
        assert!(matches!(err, BuildError::Spawn { .. }));
    }

    #[test]
    fn test_stage_files_hook() {
        let tmp = TempDir::new().unwrap();
        let gem = tmp.path().join("msgpack-1.8.0.gem");
        std::fs::write(&gem, b"gem").unwrap();
        let src = tmp.path().join("src");
        std::fs::create_dir_all(&src).unwrap();

        let mut plan = BuildPlan::new("portable-ruby", &src, "/out");
        plan.push(BuildStep::hook(
            Phase::Prepare,
            BuildHook::StageFiles {
                dest: PathBuf::from("gems"),
                files: vec![gem],
            },
        ));
        let env = env();
        BuildExecutor::new(&env).progress(false).execute(&plan).unwrap();
        assert!(src.join("gems/msgpack-1.8.0.gem").is_file());
    }

    #[test]
    fn test_cleanup_scratch() {
        let tmp = TempDir::new().unwrap();
        let scratch = tmp.path().join("scratch");
        std::fs::create_dir_all(&scratch).unwrap();
        cleanup_scratch(&scratch, true).unwrap();
        assert!(scratch.exists());
        cleanup_scratch(&scratch, false).unwrap();
        assert!(!scratch.exists());
        cleanup_scratch(&scratch, false).unwrap();
    }
}
