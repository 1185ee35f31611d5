//! `berth build`

use std::process::ExitCode;

use anyhow::{Context, Result};

use berth::builder::executor::cleanup_scratch;
use berth::core::errors::PortableError;
use berth::ops::pipeline::{self, PipelineOptions};
use berth::util::shell::{format_duration, Shell, Status};

use super::Session;
use crate::cli::BuildArgs;

pub fn execute(shell: &Shell, args: BuildArgs) -> Result<ExitCode> {
    let mut session = Session::load(shell, &args.package, true)?;
    if args.jobs.is_some() {
        session.config.build.jobs = args.jobs;
    }
    let req = session.request(&args.source);
    let installer = req.installer();

    if args.plan {
        let plan = pipeline::plan(&req, &installer).map_err(PortableError::from)?;
        for warning in &plan.warnings {
            shell.warn(warning);
        }
        println!("{}", plan.to_json().context("failed to serialize build plan")?);
        return Ok(ExitCode::SUCCESS);
    }

    let package = installer.package();
    let stage = shell.stage(
        Status::Building,
        format!("{} {} for {}", package.name(), package.version(), session.profile),
    );

    let options = PipelineOptions {
        verify: !args.no_verify,
        verbose: shell.is_verbose(),
        progress: shell.show_progress(),
    };
    let report = pipeline::install(&req, options)?;

    shell.status(
        Status::Patching,
        format!("{} rule(s) fired", report.patch.fired().len()),
    );
    if !report.export.dependencies.is_empty() {
        shell.status(
            Status::Exporting,
            format!(
                "{} header(s), {} archive(s), {} descriptor(s)",
                report.export.headers(),
                report.export.archives(),
                report.export.descriptors()
            ),
        );
    }
    match &report.verify {
        Some(result) => shell.status(
            Status::Verified,
            format!(
                "{} step(s) passed in {}",
                result.passed_count(),
                format_duration(result.total_duration)
            ),
        ),
        None => shell.status(Status::Skipped, "verification"),
    }

    let keep = args.keep_scratch || session.config.keep_scratch();
    cleanup_scratch(&req.source_dir, keep).map_err(PortableError::from)?;

    stage.finish(
        Status::Installed,
        format!("{} into {}", report.package, report.prefix.display()),
    );
    Ok(ExitCode::SUCCESS)
}
