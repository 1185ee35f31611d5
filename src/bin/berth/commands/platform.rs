//! `berth platform`

use std::process::ExitCode;

use anyhow::{Context, Result};

use berth::util::shell::Shell;

use super::resolve_profile;
use crate::cli::PlatformArgs;

pub fn execute(shell: &Shell, args: PlatformArgs) -> Result<ExitCode> {
    let profile = resolve_profile(shell, &args.host)?;

    if args.json {
        let json = serde_json::to_string_pretty(&profile).context("failed to serialize profile")?;
        println!("{}", json);
        return Ok(ExitCode::SUCCESS);
    }

    println!("platform:       {}", profile);
    println!("arch triple:    {}", profile.arch_triple());
    println!("minimum target: {}", profile.minimum_os);
    println!("openssl target: {}", profile.openssl_target().join(" "));
    if let Some(version) = &profile.host_version {
        println!("host kernel:    {}", version);
    }
    Ok(ExitCode::SUCCESS)
}
