//! Command implementations.

pub mod build;
pub mod completions;
pub mod export;
pub mod pack;
pub mod patch;
pub mod platform;
pub mod trust;
pub mod verify;

use std::path::{Path, PathBuf};

use anyhow::Result;

use berth::builder::env::Environment;
use berth::core::errors::PortableError;
use berth::core::features::FeatureFlags;
use berth::core::manifest::BuildManifest;
use berth::core::package::PackageKind;
use berth::core::platform::{HostFacts, PlatformProfile};
use berth::ops::pipeline::InstallRequest;
use berth::util::config::{load_effective, Config};
use berth::util::shell::Shell;

use crate::cli::{HostArgs, PackageArgs};

/// Host facts with any `--os`/`--arch` overrides applied.
pub fn host_facts(args: &HostArgs) -> HostFacts {
    let mut host = HostFacts::detect();
    if let Some(os) = &args.os {
        if !os.eq_ignore_ascii_case(&host.os) {
            // The kernel release describes the real host, not the override.
            host.os_version = None;
        }
        host.os = os.clone();
    }
    if let Some(arch) = &args.arch {
        host.arch = arch.clone();
    }
    host
}

pub fn resolve_profile(shell: &Shell, args: &HostArgs) -> Result<PlatformProfile> {
    let profile = PlatformProfile::resolve(&host_facts(args)).map_err(PortableError::from)?;
    if let Some(warning) = profile.host_too_new_warning() {
        shell.warn(warning);
    }
    Ok(profile)
}

/// Everything a package command needs, owned.
pub struct Session {
    pub kind: PackageKind,
    pub manifest: BuildManifest,
    pub profile: PlatformProfile,
    pub features: FeatureFlags,
    pub config: Config,
    pub env: Environment,
    pub prefix: PathBuf,
}

impl Session {
    /// Load the session for `args`. The dependency manifest is only required
    /// when `require_manifest` is set; otherwise a missing file means "no
    /// dependencies".
    pub fn load(shell: &Shell, args: &PackageArgs, require_manifest: bool) -> Result<Self> {
        let profile = resolve_profile(shell, &args.host)?;
        let manifest = if require_manifest || args.deps.exists() {
            BuildManifest::load(&args.deps).map_err(PortableError::from)?
        } else {
            tracing::debug!("no dependency manifest at {}", args.deps.display());
            BuildManifest::default()
        };

        let mut features = FeatureFlags::default().with_legacy_crypto(args.legacy_crypto);
        if args.no_jit {
            features = features.without_jit();
        }

        Ok(Session {
            kind: args.package,
            manifest,
            profile,
            features,
            config: load_effective(&project_root()),
            env: Environment::capture(),
            prefix: absolute(&args.prefix),
        })
    }

    pub fn request(&self, source_dir: &Path) -> InstallRequest<'_> {
        InstallRequest {
            kind: self.kind,
            manifest: &self.manifest,
            profile: &self.profile,
            features: self.features,
            config: &self.config,
            env: &self.env,
            source_dir: absolute(source_dir),
            prefix: self.prefix.clone(),
        }
    }
}

fn project_root() -> PathBuf {
    std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."))
}

/// Paths end up in plans and descriptors, so they are made absolute early.
pub fn absolute(path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        project_root().join(path)
    }
}
