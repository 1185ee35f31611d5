//! Host platform detection and the build parameters derived from it.
//!
//! A [`PlatformProfile`] is computed once from [`HostFacts`] before planning.
//! Resolution never guesses: an OS/CPU pair the pipeline does not know how to
//! make portable is a [`PlanningError::UnsupportedPlatform`].

use std::fmt;

use semver::Version;
use serde::Serialize;

use crate::core::errors::PlanningError;
use crate::util::process::ProcessBuilder;

/// Operating system family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OsKind {
    Darwin,
    Linux,
}

impl OsKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OsKind::Darwin => "darwin",
            OsKind::Linux => "linux",
        }
    }
}

impl fmt::Display for OsKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// CPU architecture family.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CpuArch {
    X86_64,
    Aarch64,
    Arm,
    /// Anything else the host reports, keyed by its normalized name.
    Other(String),
}

impl CpuArch {
    /// Normalize the many spellings hosts use for the same architecture.
    pub fn parse(name: &str) -> Self {
        match name.to_ascii_lowercase().as_str() {
            "x86_64" | "amd64" => CpuArch::X86_64,
            "aarch64" | "arm64" => CpuArch::Aarch64,
            "arm" | "armv6l" | "armv7" | "armv7l" | "armhf" => CpuArch::Arm,
            "x86" | "i386" | "i586" | "i686" => CpuArch::Other("x86".to_string()),
            other => CpuArch::Other(other.to_string()),
        }
    }

    /// Pointer width in bits, when known.
    pub fn word_size(&self) -> Option<u8> {
        match self {
            CpuArch::X86_64 | CpuArch::Aarch64 => Some(64),
            CpuArch::Arm => Some(32),
            CpuArch::Other(name) if name == "x86" => Some(32),
            CpuArch::Other(_) => None,
        }
    }
}

impl fmt::Display for CpuArch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CpuArch::X86_64 => f.write_str("x86_64"),
            CpuArch::Aarch64 => f.write_str("aarch64"),
            CpuArch::Arm => f.write_str("arm"),
            CpuArch::Other(name) => f.write_str(name),
        }
    }
}

/// The oldest OS a portable build must keep running on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum MinimumOsTarget {
    /// macOS release, with the matching Darwin kernel version.
    Macos { codename: String, darwin: Version },
    /// Oldest glibc the Linux build links against.
    Glibc { version: String },
}

impl fmt::Display for MinimumOsTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MinimumOsTarget::Macos { codename, darwin } => {
                write!(f, "macOS {} (darwin {})", humanize(codename), darwin)
            }
            MinimumOsTarget::Glibc { version } => write!(f, "glibc {}", version),
        }
    }
}

fn humanize(codename: &str) -> String {
    codename
        .split('_')
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(c) => c.to_uppercase().chain(chars).collect(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// Raw facts about the machine running the build.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostFacts {
    /// OS name as reported by the host (`macos`, `darwin`, `linux`, ...)
    pub os: String,
    /// CPU name as reported by the host (`x86_64`, `arm64`, ...)
    pub arch: String,
    /// Kernel release (`uname -r`), when available
    pub os_version: Option<String>,
    /// Whether a `rustc` is already on PATH
    pub has_rustc: bool,
}

impl HostFacts {
    /// Introspect the current host.
    pub fn detect() -> Self {
        let os_version = ProcessBuilder::new("uname")
            .arg("-r")
            .exec()
            .ok()
            .filter(|out| out.status.success())
            .map(|out| String::from_utf8_lossy(&out.stdout).trim().to_string())
            .filter(|v| !v.is_empty());

        HostFacts {
            os: std::env::consts::OS.to_string(),
            arch: std::env::consts::ARCH.to_string(),
            os_version,
            has_rustc: which::which("rustc").is_ok(),
        }
    }

    /// Facts for an arbitrary host, mostly useful for planning cross-checks.
    pub fn new(os: impl Into<String>, arch: impl Into<String>) -> Self {
        HostFacts {
            os: os.into(),
            arch: arch.into(),
            os_version: None,
            has_rustc: false,
        }
    }

    pub fn with_os_version(mut self, version: impl Into<String>) -> Self {
        self.os_version = Some(version.into());
        self
    }

    pub fn with_rustc(mut self, has_rustc: bool) -> Self {
        self.has_rustc = has_rustc;
        self
    }
}

/// OS/CPU-specific build parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlatformProfile {
    pub os: OsKind,
    pub arch: CpuArch,
    pub word_size: u8,
    pub minimum_os: MinimumOsTarget,
    /// Kernel release of the build host, carried for the too-new-host warning.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub host_version: Option<String>,
    #[serde(skip)]
    pub has_rustc: bool,
}

impl PlatformProfile {
    /// Resolve the profile for a host.
    pub fn resolve(host: &HostFacts) -> Result<Self, PlanningError> {
        let unsupported = || PlanningError::UnsupportedPlatform {
            os: host.os.clone(),
            arch: host.arch.clone(),
        };

        let os = match host.os.to_ascii_lowercase().as_str() {
            "macos" | "darwin" => OsKind::Darwin,
            "linux" => OsKind::Linux,
            _ => return Err(unsupported()),
        };
        let arch = CpuArch::parse(&host.arch);
        let word_size = arch.word_size().ok_or_else(unsupported)?;

        let minimum_os = match (os, &arch) {
            (OsKind::Darwin, CpuArch::Aarch64) => MinimumOsTarget::Macos {
                codename: "sonoma".to_string(),
                darwin: Version::new(23, 6, 0),
            },
            (OsKind::Darwin, CpuArch::X86_64) => MinimumOsTarget::Macos {
                codename: "ventura".to_string(),
                darwin: Version::new(22, 6, 0),
            },
            (OsKind::Darwin, _) => return Err(unsupported()),
            (OsKind::Linux, _) => MinimumOsTarget::Glibc {
                version: "2.17".to_string(),
            },
        };

        Ok(PlatformProfile {
            os,
            arch,
            word_size,
            minimum_os,
            host_version: host.os_version.clone(),
            has_rustc: host.has_rustc,
        })
    }

    pub fn is_linux(&self) -> bool {
        self.os == OsKind::Linux
    }

    pub fn is_darwin(&self) -> bool {
        self.os == OsKind::Darwin
    }

    /// Short `<arch>-<os>` identifier used for artifact names.
    pub fn arch_triple(&self) -> String {
        let arch = match (&self.os, &self.arch) {
            (OsKind::Darwin, CpuArch::Aarch64) => "arm64".to_string(),
            (_, arch) => arch.to_string(),
        };
        format!("{}-{}", arch, self.os)
    }

    /// OpenSSL `Configure` target plus the instruction-set options it implies.
    pub fn openssl_target(&self) -> Vec<String> {
        match (&self.os, &self.arch) {
            (OsKind::Darwin, CpuArch::Aarch64) => vec![
                "darwin64-arm64-cc".to_string(),
                "enable-ec_nistp_64_gcc_128".to_string(),
            ],
            (OsKind::Darwin, _) => vec![
                "darwin64-x86_64-cc".to_string(),
                "enable-ec_nistp_64_gcc_128".to_string(),
            ],
            (OsKind::Linux, CpuArch::X86_64) => vec!["linux-x86_64".to_string()],
            (OsKind::Linux, CpuArch::Aarch64) => vec!["linux-aarch64".to_string()],
            // The generic ARMv4 target is the only one safe on every 32-bit ARM board.
            (OsKind::Linux, CpuArch::Arm) => vec!["linux-armv4".to_string()],
            (OsKind::Linux, CpuArch::Other(_)) => vec!["linux-elf".to_string()],
        }
    }

    /// Warning text when the host OS is newer than the minimum target.
    ///
    /// Binaries built on a newer macOS may not load on the minimum target.
    pub fn host_too_new_warning(&self) -> Option<String> {
        let MinimumOsTarget::Macos { codename, darwin } = &self.minimum_os else {
            return None;
        };
        let host = self.host_version.as_deref()?;
        let host_major: u64 = host.split('.').next()?.parse().ok()?;
        if host_major <= darwin.major {
            return None;
        }
        Some(format!(
            "building portable packages on darwin {}; the result won't run on older macOS. \
             Build on macOS {} (the oldest supported release) instead",
            host,
            humanize(codename)
        ))
    }
}

impl fmt::Display for PlatformProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} ({}-bit, minimum {})",
            self.os, self.arch, self.word_size, self.minimum_os
        )
    }
}
