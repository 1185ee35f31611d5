//! Certificate trust: the vendored bundle and the runtime lookup order.
//!
//! A relocated package cannot rely on the trust-store path compiled into the
//! crypto library, because that path pointed into the build prefix. Lookup
//! becomes an ordered search:
//!
//! 1. a non-empty `SSL_CERT_FILE` override,
//! 2. the first well-known system bundle that exists,
//! 3. the bundle vendored inside the package, if present,
//! 4. the library's compiled-in default.
//!
//! An existing system file wins even if it is empty or stale; its content is
//! never inspected.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Serialize;

use crate::builder::env::Environment;
use crate::util::fs::ensure_dir;

/// Override variable honored by the crypto library and the runtime.
pub const CERT_FILE_ENV: &str = "SSL_CERT_FILE";

/// System CA bundles, in search order.
pub const SYSTEM_CERT_FILES: &[&str] = &[
    "/etc/ssl/certs/ca-certificates.crt", // Debian/Ubuntu
    "/etc/pki/tls/certs/ca-bundle.crt",   // RHEL/CentOS/Fedora
    "/etc/ssl/ca-bundle.pem",             // SUSE
    "/etc/ssl/cert.pem",                  // macOS/Alpine
];

/// System CA directories, in search order.
pub const SYSTEM_CERT_DIRS: &[&str] = &["/etc/ssl/certs", "/etc/pki/tls/certs"];

/// Where the crypto library keeps its bundle, relative to its prefix.
pub const OPENSSL_BUNDLE: &str = "libexec/etc/openssl/cert.pem";

/// Where the runtime keeps its fallback bundle, relative to its prefix.
pub const RUNTIME_BUNDLE: &str = "libexec/cert.pem";

/// A vendored certificate file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrustBundle {
    pub source: PathBuf,
}

impl TrustBundle {
    pub fn new(source: impl Into<PathBuf>) -> Self {
        TrustBundle {
            source: source.into(),
        }
    }

    /// Install the bundle at `prefix/relative`. Installation is
    /// unconditional; whether it is used is decided at run time.
    pub fn install(&self, prefix: &Path, relative: &str) -> Result<PathBuf> {
        let dest = prefix.join(relative);
        if let Some(parent) = dest.parent() {
            ensure_dir(parent)?;
        }
        std::fs::copy(&self.source, &dest).with_context(|| {
            format!(
                "failed to install trust bundle {} to {}",
                self.source.display(),
                dest.display()
            )
        })?;
        tracing::info!("installed trust bundle at {}", dest.display());
        Ok(dest)
    }
}

/// Which trust source a lookup settled on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "source", content = "path", rename_all = "snake_case")]
pub enum TrustSource {
    Override(PathBuf),
    System(PathBuf),
    Bundled(PathBuf),
    /// No candidate exists; the library falls back to its compiled default.
    LibraryDefault,
}

impl TrustSource {
    pub fn path(&self) -> Option<&Path> {
        match self {
            TrustSource::Override(p) | TrustSource::System(p) | TrustSource::Bundled(p) => Some(p),
            TrustSource::LibraryDefault => None,
        }
    }
}

/// Model of the runtime trust lookup.
#[derive(Debug, Clone)]
pub struct TrustResolver {
    system_files: Vec<PathBuf>,
    bundled: Option<PathBuf>,
}

impl TrustResolver {
    pub fn new(bundled: Option<PathBuf>) -> Self {
        TrustResolver {
            system_files: SYSTEM_CERT_FILES.iter().map(PathBuf::from).collect(),
            bundled,
        }
    }

    /// Resolver for a runtime installed at `prefix`.
    pub fn for_runtime(prefix: &Path) -> Self {
        TrustResolver::new(Some(prefix.join(RUNTIME_BUNDLE)))
    }

    pub fn with_system_files(mut self, files: Vec<PathBuf>) -> Self {
        self.system_files = files;
        self
    }

    /// Resolve against the real filesystem.
    pub fn resolve(&self, env: &Environment) -> TrustSource {
        self.resolve_with(env, |p| p.exists())
    }

    /// Resolve with an injected existence check.
    pub fn resolve_with<F>(&self, env: &Environment, exists: F) -> TrustSource
    where
        F: Fn(&Path) -> bool,
    {
        if let Some(path) = env.get_non_empty(CERT_FILE_ENV) {
            return TrustSource::Override(PathBuf::from(path));
        }
        if let Some(found) = self.system_files.iter().find(|p| exists(p)) {
            return TrustSource::System(found.clone());
        }
        match self.bundled {
            Some(ref bundled) if exists(bundled) => TrustSource::Bundled(bundled.clone()),
            _ => TrustSource::LibraryDefault,
        }
    }
}

/// First line of the runtime fallback; its presence marks the rule applied.
pub const RUNTIME_FALLBACK_GUARD: &str =
    "# Fall back to bundled CA certificates only when no system certs exist.";

/// Ruby prologue for `openssl.rb` that points `SSL_CERT_FILE` at the bundled
/// file when neither an override nor a system bundle is available.
pub fn runtime_fallback_snippet() -> String {
    fallback_snippet(SYSTEM_CERT_FILES)
}

fn fallback_snippet(system_files: &[&str]) -> String {
    let mut s = String::new();
    s.push_str(RUNTIME_FALLBACK_GUARD);
    s.push('\n');
    s.push_str("if ENV[\"SSL_CERT_FILE\"].to_s.empty?\n");
    s.push_str("  system_certs = %w[\n");
    for file in system_files {
        s.push_str("    ");
        s.push_str(file);
        s.push('\n');
    }
    s.push_str("  ]\n");
    s.push_str("  unless system_certs.any? { |f| File.exist?(f) }\n");
    s.push_str("    bundled = File.expand_path(\"../../libexec/cert.pem\", RbConfig.ruby)\n");
    s.push_str("    ENV[\"SSL_CERT_FILE\"] = bundled if File.exist?(bundled)\n");
    s.push_str("  end\n");
    s.push_str("end\n");
    s
}
