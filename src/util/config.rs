//! Configuration file support for berth.
//!
//! Berth reads two configuration file locations:
//! - Global: `~/.berth/config.toml` - User-wide defaults
//! - Project: `.berth/config.toml` - Project-specific overrides
//!
//! Project config takes precedence over global config; command-line flags
//! take precedence over both.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::builder::env::Environment;

/// rustup toolchain the runtime's JIT is built with.
pub const DEFAULT_RUSTUP_TOOLCHAIN: &str = "1.58";

/// Prefixes a portable artifact must never link into.
pub const DEFAULT_FORBIDDEN_PREFIXES: &[&str] = &[
    "/home/linuxbrew/.linuxbrew",
    "/opt/homebrew",
    "/usr/local/Cellar",
    "/usr/local/opt",
];

/// Berth configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Build settings
    pub build: BuildConfig,

    /// Verification settings
    pub verify: VerifyConfig,

    /// Toolchain settings
    pub toolchain: ToolchainConfig,
}

/// Build-related configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BuildConfig {
    /// Parallel make jobs (None = let make decide)
    pub jobs: Option<usize>,

    /// Keep the scratch directory after a successful build
    pub keep_scratch: Option<bool>,
}

/// Verification-related configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct VerifyConfig {
    /// Run checks that need the network (default: true)
    pub network: Option<bool>,

    /// Library prefixes that count as a portability leak
    pub forbidden_prefixes: Option<Vec<String>>,
}

/// Toolchain-related configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolchainConfig {
    /// rustup toolchain for the JIT
    pub rustup_toolchain: Option<String>,

    /// Interpreter used to bootstrap the runtime build
    pub baseruby: Option<PathBuf>,
}

impl ToolchainConfig {
    pub fn rustup_toolchain(&self) -> &str {
        self.rustup_toolchain
            .as_deref()
            .unwrap_or(DEFAULT_RUSTUP_TOOLCHAIN)
    }

    /// Bootstrap interpreter: config, then `BERTH_BASERUBY`, then
    /// `HOMEBREW_BASERUBY`, then whatever `ruby` is on PATH.
    pub fn resolve_baseruby(&self, env: &Environment) -> Option<PathBuf> {
        if let Some(ref path) = self.baseruby {
            return Some(path.clone());
        }
        for key in ["BERTH_BASERUBY", "HOMEBREW_BASERUBY"] {
            if let Some(value) = env.get_non_empty(key) {
                return Some(PathBuf::from(value));
            }
        }
        let path = env.get("PATH").unwrap_or_default();
        let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("/"));
        which::which_in("ruby", Some(path), cwd).ok()
    }
}

impl Config {
    /// Load configuration from a file.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file: {}", path.display()))?;

        toml::from_str(&contents)
            .with_context(|| format!("failed to parse config file: {}", path.display()))
    }

    /// Load configuration with fallback to defaults if file doesn't exist.
    pub fn load_or_default(path: &Path) -> Self {
        if path.exists() {
            Self::load(path).unwrap_or_else(|e| {
                tracing::warn!("Failed to load config from {}: {}", path.display(), e);
                Self::default()
            })
        } else {
            Self::default()
        }
    }

    /// Merge another config into this one (other takes precedence).
    pub fn merge(&mut self, other: Config) {
        if other.build.jobs.is_some() {
            self.build.jobs = other.build.jobs;
        }
        if other.build.keep_scratch.is_some() {
            self.build.keep_scratch = other.build.keep_scratch;
        }

        if other.verify.network.is_some() {
            self.verify.network = other.verify.network;
        }
        if other.verify.forbidden_prefixes.is_some() {
            self.verify.forbidden_prefixes = other.verify.forbidden_prefixes;
        }

        if other.toolchain.rustup_toolchain.is_some() {
            self.toolchain.rustup_toolchain = other.toolchain.rustup_toolchain;
        }
        if other.toolchain.baseruby.is_some() {
            self.toolchain.baseruby = other.toolchain.baseruby;
        }
    }

    pub fn keep_scratch(&self) -> bool {
        self.build.keep_scratch.unwrap_or(false)
    }

    pub fn network_checks(&self) -> bool {
        self.verify.network.unwrap_or(true)
    }

    pub fn forbidden_prefixes(&self) -> Vec<String> {
        match self.verify.forbidden_prefixes {
            Some(ref prefixes) => prefixes.clone(),
            None => DEFAULT_FORBIDDEN_PREFIXES
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}

/// Load merged configuration from global and project locations.
///
/// Order of precedence (highest to lowest):
/// 1. Project config (.berth/config.toml)
/// 2. Global config (~/.berth/config.toml)
/// 3. Defaults
pub fn load_config(global_path: &Path, project_path: &Path) -> Config {
    let mut config = Config::default();

    if global_path.exists() {
        config.merge(Config::load_or_default(global_path));
    }

    if project_path.exists() {
        config.merge(Config::load_or_default(project_path));
    }

    config
}

/// Get the global berth config directory (~/.berth).
pub fn global_config_dir() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|b| b.home_dir().join(".berth"))
}

/// Get the global config path (~/.berth/config.toml).
pub fn global_config_path() -> Option<PathBuf> {
    global_config_dir().map(|dir| dir.join("config.toml"))
}

/// Get the project config path (.berth/config.toml).
pub fn project_config_path(project_root: &Path) -> PathBuf {
    project_root.join(".berth").join("config.toml")
}

/// Load the effective configuration for `project_root`.
pub fn load_effective(project_root: &Path) -> Config {
    let project = project_config_path(project_root);
    match global_config_path() {
        Some(global) => load_config(&global, &project),
        None => load_config(Path::new(""), &project),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_config_default() {
        let config = Config::default();
        assert!(config.build.jobs.is_none());
        assert!(!config.keep_scratch());
        assert!(config.network_checks());
        assert_eq!(config.toolchain.rustup_toolchain(), "1.58");
        assert!(config
            .forbidden_prefixes()
            .contains(&"/home/linuxbrew/.linuxbrew".to_string()));
    }

    #[test]
    fn test_config_load() {
        let tmp = TempDir::new().unwrap();
        let config_path = tmp.path().join("config.toml");

        std::fs::write(
            &config_path,
            r#"
[build]
jobs = 8
keep_scratch = true

[verify]
network = false
forbidden_prefixes = ["/opt/pm"]

[toolchain]
rustup_toolchain = "1.70"
baseruby = "/opt/ruby/bin/ruby"
"#,
        )
        .unwrap();

        let config = Config::load(&config_path).unwrap();
        assert_eq!(config.build.jobs, Some(8));
        assert!(config.keep_scratch());
        assert!(!config.network_checks());
        assert_eq!(config.forbidden_prefixes(), vec!["/opt/pm"]);
        assert_eq!(config.toolchain.rustup_toolchain(), "1.70");
    }

    #[test]
    fn test_load_config_precedence() {
        let tmp = TempDir::new().unwrap();
        let global_path = tmp.path().join("global.toml");
        let project_path = tmp.path().join("project.toml");

        std::fs::write(&global_path, "[build]\njobs = 4\n[verify]\nnetwork = false\n").unwrap();
        std::fs::write(&project_path, "[build]\njobs = 16\n").unwrap();

        let config = load_config(&global_path, &project_path);
        assert_eq!(config.build.jobs, Some(16));
        // Not overridden by the project
        assert!(!config.network_checks());
    }

    #[test]
    fn test_baseruby_precedence() {
        let env = Environment::from_pairs([
            ("BERTH_BASERUBY", "/a/ruby"),
            ("HOMEBREW_BASERUBY", "/b/ruby"),
        ]);
        let mut toolchain = ToolchainConfig::default();
        assert_eq!(toolchain.resolve_baseruby(&env), Some(PathBuf::from("/a/ruby")));

        let env = Environment::from_pairs([("HOMEBREW_BASERUBY", "/b/ruby")]);
        assert_eq!(toolchain.resolve_baseruby(&env), Some(PathBuf::from("/b/ruby")));

        toolchain.baseruby = Some(PathBuf::from("/c/ruby"));
        assert_eq!(toolchain.resolve_baseruby(&env), Some(PathBuf::from("/c/ruby")));
    }
}
