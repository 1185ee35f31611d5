//! `berth verify`

use std::process::ExitCode;

use anyhow::{anyhow, Result};

use berth::core::errors::PortableError;
use berth::ops::verify::{format_result_for_output, OutputFormat, VerificationSuite, VerifyOptions};
use berth::util::diagnostic::emit;
use berth::util::shell::{Shell, Status};

use super::{absolute, Session};
use crate::cli::VerifyArgs;

pub fn execute(shell: &Shell, args: VerifyArgs) -> Result<ExitCode> {
    let format: OutputFormat = args.output_format.parse().map_err(|e| anyhow!("{}", e))?;
    let session = Session::load(shell, &args.package, false)?;
    let installer = session.request(&session.prefix).installer();
    let package = installer.package();

    let deps = session.manifest.dependencies.for_platform(session.profile.os);
    let mut options = VerifyOptions::from_config(&session.config).forbid_dependencies(deps.iter());
    if args.no_network {
        options.network = false;
    }
    options.scratch = args.scratch.as_deref().map(absolute);
    options.copy_dir = args.copy_dir.as_deref().map(absolute);

    let human = format == OutputFormat::Human;
    if human {
        shell.status(
            Status::Verifying,
            format!("{} {} at {}", package.name(), package.version(), session.prefix.display()),
        );
    }

    let outcome = VerificationSuite::new(package, &session.profile, options)
        .with_caller_env(&session.env)
        .run(&session.prefix)
        .map_err(PortableError::from)?;

    let output = format_result_for_output(&outcome.result, format, shell.is_verbose());
    if human {
        eprint!("{}", output);
    } else {
        print!("{}", output);
    }

    if outcome.failures.is_empty() {
        return Ok(ExitCode::SUCCESS);
    }
    for failure in outcome.failures {
        emit(&PortableError::from(failure).to_diagnostic(), shell.use_color());
    }
    Ok(ExitCode::FAILURE)
}
