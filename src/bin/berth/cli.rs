//! CLI definitions using clap.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use berth::core::package::PackageKind;

/// berth - portable, relocatable builds of Ruby, OpenSSL and zlib
#[derive(Parser)]
#[command(name = "berth")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Only print errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Coloring: auto, always, never
    #[arg(long, global = true, default_value = "auto")]
    pub color: String,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Build, relocate, export and verify a portable package
    Build(BuildArgs),

    /// Relocate an installed prefix
    Patch(PatchArgs),

    /// Copy build-time dependencies into an installed prefix
    Export(ExportArgs),

    /// Verify a relocated copy of an installed prefix
    Verify(VerifyArgs),

    /// Show the resolved platform profile
    Platform(PlatformArgs),

    /// Show where a runtime would look for CA certificates
    Trust(TrustArgs),

    /// Write a relocatable tarball of an installed prefix
    Pack(PackArgs),

    /// Generate shell completions
    Completions(CompletionsArgs),
}

/// Target platform, defaulting to the host.
#[derive(Args, Clone, Default)]
pub struct HostArgs {
    /// Target OS (darwin, linux)
    #[arg(long)]
    pub os: Option<String>,

    /// Target CPU (x86_64, arm64, aarch64, arm)
    #[arg(long)]
    pub arch: Option<String>,
}

/// Arguments shared by every command that works on one package.
#[derive(Args, Clone)]
pub struct PackageArgs {
    /// Package to work on (ruby, openssl, zlib)
    pub package: PackageKind,

    /// Install prefix
    #[arg(long)]
    pub prefix: PathBuf,

    /// Dependency manifest written by the package manager
    #[arg(long, default_value = "deps.toml")]
    pub deps: PathBuf,

    /// Build without the runtime's JIT
    #[arg(long)]
    pub no_jit: bool,

    /// Keep the crypto library's legacy provider
    #[arg(long)]
    pub legacy_crypto: bool,

    #[command(flatten)]
    pub host: HostArgs,
}

#[derive(Args)]
pub struct BuildArgs {
    #[command(flatten)]
    pub package: PackageArgs,

    /// Unpacked upstream sources (the scratch directory)
    #[arg(long)]
    pub source: PathBuf,

    /// Emit the build plan as JSON (no build)
    #[arg(long)]
    pub plan: bool,

    /// Number of parallel make jobs
    #[arg(short, long)]
    pub jobs: Option<usize>,

    /// Skip verification after installing
    #[arg(long)]
    pub no_verify: bool,

    /// Keep the scratch directory after a successful build
    #[arg(long)]
    pub keep_scratch: bool,
}

#[derive(Args)]
pub struct PatchArgs {
    #[command(flatten)]
    pub package: PackageArgs,

    /// Scratch directory the prefix was built in; its path is scrubbed
    #[arg(long)]
    pub scratch: Option<PathBuf>,
}

#[derive(Args)]
pub struct ExportArgs {
    #[command(flatten)]
    pub package: PackageArgs,
}

#[derive(Args)]
pub struct VerifyArgs {
    #[command(flatten)]
    pub package: PackageArgs,

    /// Scratch directory the prefix was built in
    #[arg(long)]
    pub scratch: Option<PathBuf>,

    /// Skip checks that need the network
    #[arg(long)]
    pub no_network: bool,

    /// Keep the relocated copy under this directory
    #[arg(long)]
    pub copy_dir: Option<PathBuf>,

    /// Output format: human, json, github
    #[arg(long, default_value = "human")]
    pub output_format: String,
}

#[derive(Args)]
pub struct PlatformArgs {
    #[command(flatten)]
    pub host: HostArgs,

    /// Print the profile as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Args)]
pub struct TrustArgs {
    /// Runtime install prefix holding the bundled certificates
    #[arg(long)]
    pub prefix: Option<PathBuf>,
}

#[derive(Args)]
pub struct PackArgs {
    /// Package the prefix belongs to
    pub package: PackageKind,

    /// Install prefix to archive
    #[arg(long)]
    pub prefix: PathBuf,

    /// Output directory
    #[arg(short, long, default_value = ".")]
    pub output: PathBuf,

    #[command(flatten)]
    pub host: HostArgs,
}

#[derive(Args)]
pub struct CompletionsArgs {
    /// Shell to generate completions for
    pub shell: clap_complete::Shell,
}
