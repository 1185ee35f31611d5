//! `berth pack`

use std::process::ExitCode;

use anyhow::Result;

use berth::ops::pack::{archive_name, pack};
use berth::util::shell::{Shell, Status};

use super::{absolute, resolve_profile};
use crate::cli::PackArgs;

pub fn execute(shell: &Shell, args: PackArgs) -> Result<ExitCode> {
    let profile = resolve_profile(shell, &args.host)?;
    let recipe = args.package.recipe();
    let archive = absolute(&args.output).join(archive_name(recipe.name(), recipe.version(), &profile));

    let stage = shell.stage(Status::Packed, archive.display());
    let result = pack(&absolute(&args.prefix), recipe.name(), &archive)?;
    stage.finish(Status::Finished, format!("{} file(s)", result.files));

    println!("{}  {}", result.sha256, result.archive.display());
    Ok(ExitCode::SUCCESS)
}
