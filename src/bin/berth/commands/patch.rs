//! `berth patch`

use std::process::ExitCode;

use anyhow::Result;

use berth::ops::pipeline;
use berth::util::shell::{Shell, Status};

use super::{absolute, Session};
use crate::cli::PatchArgs;

pub fn execute(shell: &Shell, args: PatchArgs) -> Result<ExitCode> {
    let session = Session::load(shell, &args.package, false)?;
    // An empty scratch path is never a directory, so only the relocation
    // rules run.
    let scratch = args.scratch.as_deref().map(absolute).unwrap_or_default();
    let req = session.request(&scratch);
    let installer = req.installer();

    let stage = shell.stage(Status::Patching, req.prefix.display());
    let report = pipeline::patch(&req, &installer)?;

    for id in report.fired() {
        shell.note(format!("rule `{}` applied", id));
    }
    if let Some(scrub) = &report.scrub {
        shell.note(format!("scrubbed {} scratch reference(s)", scrub.changed()));
    }
    if !report.changed_anything() {
        shell.status(Status::Skipped, "already relocated");
    }
    stage.finish(Status::Finished, "relocation");
    Ok(ExitCode::SUCCESS)
}
