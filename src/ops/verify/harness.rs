//! C probe compilation and execution.
//!
//! Library packages are verified by compiling a tiny consumer program
//! against the relocated install tree and running it.

use std::path::{Path, PathBuf};
use std::process::Output;

use anyhow::{bail, Context, Result};

use crate::builder::env::Environment;
use crate::util::process::ProcessBuilder;

/// Compiler used for probes: `CC` from the check environment, else `cc`.
pub fn probe_compiler(env: &Environment) -> String {
    env.get_non_empty("CC").unwrap_or("cc").to_string()
}

/// Write `source` into `workdir` and compile it against `root`.
///
/// Headers come from `<root>/include`, archives from `<root>/lib`. Returns
/// the path of the compiled probe.
pub fn compile_probe(
    name: &str,
    source: &str,
    root: &Path,
    libs: &[String],
    workdir: &Path,
    env: &Environment,
) -> Result<PathBuf> {
    std::fs::create_dir_all(workdir)
        .with_context(|| format!("failed to create probe directory: {}", workdir.display()))?;

    let source_path = workdir.join(format!("{}.c", name));
    std::fs::write(&source_path, source)
        .with_context(|| format!("failed to write probe source: {}", source_path.display()))?;
    let output_path = workdir.join(name);

    let compiler = probe_compiler(env);
    let cmd = ProcessBuilder::new(&compiler)
        .arg(&source_path)
        .arg("-o")
        .arg(&output_path)
        .arg(format!("-I{}", root.join("include").display()))
        .arg(format!("-L{}", root.join("lib").display()))
        .args(libs)
        .environment(env)
        .cwd(workdir);

    tracing::debug!("compiling probe: {}", cmd.display_command());
    let output = cmd
        .exec()
        .with_context(|| format!("failed to run C compiler `{}`", compiler))?;
    if !output.status.success() {
        bail!(
            "probe compilation failed:\n{}\n{}",
            String::from_utf8_lossy(&output.stdout),
            String::from_utf8_lossy(&output.stderr)
        );
    }
    Ok(output_path)
}

/// Run a compiled probe with the check environment.
pub fn run_probe(probe: &Path, args: &[String], env: &Environment, workdir: &Path) -> Result<Output> {
    ProcessBuilder::new(probe)
        .args(args)
        .environment(env)
        .cwd(workdir)
        .exec()
        .with_context(|| format!("failed to execute probe {}", probe.display()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_probe_compiler_prefers_cc() {
        assert_eq!(probe_compiler(&Environment::default()), "cc");
        let env = Environment::from_pairs([("CC", "clang")]);
        assert_eq!(probe_compiler(&env), "clang");
    }

    #[cfg(unix)]
    #[test]
    fn test_compile_and_run_probe() {
        if which::which("cc").is_err() {
            return;
        }
        let tmp = tempfile::tempdir().unwrap();
        let env = Environment::from_pairs([("PATH", std::env::var("PATH").unwrap_or_default())]);
        let probe = compile_probe(
            "hello",
            "#include <stdio.h>\nint main(void) { puts(\"probe ok\"); return 0; }\n",
            tmp.path(),
            &[],
            &tmp.path().join("work"),
            &env,
        )
        .unwrap();
        let output = run_probe(&probe, &[], &env, tmp.path()).unwrap();
        assert!(output.status.success());
        assert_eq!(String::from_utf8_lossy(&output.stdout).trim(), "probe ok");
    }
}
