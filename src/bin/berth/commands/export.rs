//! `berth export`

use std::process::ExitCode;

use anyhow::Result;

use berth::ops::pipeline;
use berth::util::shell::{Shell, Status};

use super::Session;
use crate::cli::ExportArgs;

pub fn execute(shell: &Shell, args: ExportArgs) -> Result<ExitCode> {
    let session = Session::load(shell, &args.package, true)?;
    let req = session.request(&session.prefix);
    let installer = req.installer();

    let stage = shell.stage(Status::Exporting, req.prefix.display());
    let report = pipeline::export(&req, &installer)?;
    for dep in &report.dependencies {
        shell.note(format!(
            "{}: {} header(s), {} archive(s), {} descriptor(s)",
            dep.name, dep.headers, dep.archives, dep.descriptors
        ));
    }
    stage.finish(
        Status::Finished,
        format!("exported {} dependencies", report.dependencies.len()),
    );
    Ok(ExitCode::SUCCESS)
}
