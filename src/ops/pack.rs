//! Relocatable tarballs of a verified prefix.

use std::fs::File;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::Serialize;

use crate::core::platform::PlatformProfile;
use crate::util::fs;
use crate::util::hash::sha256_file;

/// A written archive.
#[derive(Debug, Clone, Serialize)]
pub struct PackResult {
    pub archive: PathBuf,
    pub sha256: String,
    pub files: usize,
}

/// `portable-ruby-3.4.5.x86_64-linux.tar.gz`
pub fn archive_name(package: &str, version: &str, profile: &PlatformProfile) -> String {
    format!("{}-{}.{}.tar.gz", package, version, profile.arch_triple())
}

/// Write `prefix` as a gzip tarball whose entries are rooted at `<root>/`.
///
/// Symlinks are stored as links, never followed, so a relocated tree
/// round-trips unchanged.
pub fn pack(prefix: &Path, root: &str, archive: &Path) -> Result<PackResult> {
    if !prefix.is_dir() {
        bail!("{} is not an install tree", prefix.display());
    }
    if root.is_empty() || root.contains('/') {
        bail!("invalid archive root `{}`", root);
    }
    if let Some(parent) = archive.parent() {
        fs::ensure_dir(parent)?;
    }

    let file = File::create(archive)
        .with_context(|| format!("failed to create archive: {}", archive.display()))?;
    let encoder = GzEncoder::new(file, Compression::best());
    let mut builder = tar::Builder::new(encoder);
    builder.follow_symlinks(false);
    builder
        .append_dir_all(root, prefix)
        .with_context(|| format!("failed to archive {}", prefix.display()))?;
    let encoder = builder
        .into_inner()
        .context("failed to finish tar stream")?;
    encoder.finish().context("failed to finish gzip stream")?;

    let sha256 = sha256_file(archive)?;
    let files = fs::walk_files(prefix).len();
    tracing::info!("packed {} file(s) into {} ({})", files, archive.display(), sha256);

    Ok(PackResult {
        archive: archive.to_path_buf(),
        sha256,
        files,
    })
}
