//! berth - portable, relocatable builds of Ruby, OpenSSL and zlib

use std::process::ExitCode;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use berth::core::errors::PortableError;
use berth::util::diagnostic::{emit, Diagnostic};
use berth::util::shell::{ColorChoice, Shell};

mod cli;
mod commands;

use cli::{Cli, Commands};

fn main() -> ExitCode {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("berth=debug")
    } else if cli.quiet {
        EnvFilter::new("berth=error")
    } else {
        EnvFilter::new("berth=info")
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .without_time()
        .init();

    let color = match cli.color.parse::<ColorChoice>() {
        Ok(color) => color,
        Err(msg) => {
            eprintln!("error: {}", msg);
            return ExitCode::FAILURE;
        }
    };
    let shell = Shell::from_flags(cli.quiet, cli.verbose, color);

    let result = match cli.command {
        Commands::Build(args) => commands::build::execute(&shell, args),
        Commands::Patch(args) => commands::patch::execute(&shell, args),
        Commands::Export(args) => commands::export::execute(&shell, args),
        Commands::Verify(args) => commands::verify::execute(&shell, args),
        Commands::Platform(args) => commands::platform::execute(&shell, args),
        Commands::Trust(args) => commands::trust::execute(&shell, args),
        Commands::Pack(args) => commands::pack::execute(&shell, args),
        Commands::Completions(args) => commands::completions::execute(args),
    };

    match result {
        Ok(code) => code,
        Err(err) => {
            let diag = match err.downcast_ref::<PortableError>() {
                Some(portable) => portable.to_diagnostic(),
                None => Diagnostic::error(format!("{:#}", err)),
            };
            emit(&diag, shell.use_color());
            ExitCode::FAILURE
        }
    }
}
