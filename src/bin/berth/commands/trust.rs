//! `berth trust`

use std::process::ExitCode;

use anyhow::Result;

use berth::builder::env::Environment;
use berth::relocate::trust::{TrustResolver, TrustSource};
use berth::util::shell::Shell;

use super::absolute;
use crate::cli::TrustArgs;

pub fn execute(shell: &Shell, args: TrustArgs) -> Result<ExitCode> {
    let resolver = match &args.prefix {
        Some(prefix) => TrustResolver::for_runtime(&absolute(prefix)),
        None => TrustResolver::new(None),
    };
    let source = resolver.resolve(&Environment::capture());

    match &source {
        TrustSource::Override(path) => println!("override {}", path.display()),
        TrustSource::System(path) => println!("system {}", path.display()),
        TrustSource::Bundled(path) => println!("bundled {}", path.display()),
        TrustSource::LibraryDefault => {
            println!("library-default");
            shell.warn("no CA certificates found; TLS verification will likely fail");
        }
    }
    Ok(ExitCode::SUCCESS)
}
