//! Public types and enums for the verify module.

use std::path::PathBuf;
use std::time::Duration;

use serde::Serialize;

use crate::core::dependency::Dependency;

/// Output format for verification results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputFormat {
    /// Human-readable output (default)
    #[default]
    Human,
    /// Machine-readable JSON output
    Json,
    /// GitHub Actions annotations with job summary
    Github,
}

impl std::str::FromStr for OutputFormat {
    type Err = OutputFormatParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "human" => Ok(OutputFormat::Human),
            "json" => Ok(OutputFormat::Json),
            "github" | "github-actions" | "gha" => Ok(OutputFormat::Github),
            _ => Err(OutputFormatParseError(s.to_string())),
        }
    }
}

/// Error parsing output format option.
#[derive(Debug, Clone)]
pub struct OutputFormatParseError(pub String);

impl std::fmt::Display for OutputFormatParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "invalid output format '{}', valid values: human, json, github",
            self.0
        )
    }
}

impl std::error::Error for OutputFormatParseError {}

/// Why a step failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FailureKind {
    /// The artifact misbehaves
    Functional,
    /// The artifact depends on something outside itself
    Portability,
}

/// Result of a verification step.
#[derive(Debug, Clone, Serialize)]
pub struct VerifyStep {
    /// Step name
    pub name: String,

    /// Whether the step passed
    pub passed: bool,

    /// Set when the step failed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<FailureKind>,

    /// Whether the step was not run at all
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub skipped: bool,

    /// Status message
    pub message: String,

    /// How long the step took (in milliseconds for JSON)
    #[serde(serialize_with = "serialize_duration_ms")]
    pub duration: Duration,

    /// Any warnings (passed but with issues)
    pub warnings: Vec<String>,
}

fn serialize_duration_ms<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    serializer.serialize_u64(duration.as_millis() as u64)
}

impl VerifyStep {
    /// Create a passing step.
    pub fn pass(name: impl Into<String>, message: impl Into<String>, duration: Duration) -> Self {
        VerifyStep {
            name: name.into(),
            passed: true,
            failure: None,
            skipped: false,
            message: message.into(),
            duration,
            warnings: Vec::new(),
        }
    }

    /// Create a failing step.
    pub fn fail(
        name: impl Into<String>,
        kind: FailureKind,
        message: impl Into<String>,
        duration: Duration,
    ) -> Self {
        VerifyStep {
            name: name.into(),
            passed: false,
            failure: Some(kind),
            skipped: false,
            message: message.into(),
            duration,
            warnings: Vec::new(),
        }
    }

    /// A step that was not run. Skipped steps count as passed but always
    /// carry a warning, so a skip is never silent.
    pub fn skip(name: impl Into<String>, reason: impl Into<String>) -> Self {
        let reason = reason.into();
        VerifyStep {
            name: name.into(),
            passed: true,
            failure: None,
            skipped: true,
            message: format!("skipped: {}", reason),
            duration: Duration::ZERO,
            warnings: vec![reason],
        }
    }

    /// Add a warning to the step.
    pub fn with_warning(mut self, warning: impl Into<String>) -> Self {
        self.warnings.push(warning.into());
        self
    }
}

/// Complete verification result.
#[derive(Debug, Clone, Serialize)]
pub struct VerifyResult {
    /// Package name
    pub package: String,

    /// Package version
    pub version: String,

    /// Target platform
    #[serde(skip_serializing_if = "Option::is_none")]
    pub platform: Option<String>,

    /// Install tree under test
    pub prefix: PathBuf,

    /// Individual step results
    pub steps: Vec<VerifyStep>,

    /// Total verification time (in milliseconds for JSON)
    #[serde(serialize_with = "serialize_duration_ms")]
    pub total_duration: Duration,

    /// Whether verification passed overall
    pub passed: bool,
}

impl VerifyResult {
    /// Create a new verify result.
    pub fn new(package: impl Into<String>, version: impl Into<String>, prefix: impl Into<PathBuf>) -> Self {
        VerifyResult {
            package: package.into(),
            version: version.into(),
            platform: None,
            prefix: prefix.into(),
            steps: Vec::new(),
            total_duration: Duration::ZERO,
            passed: true,
        }
    }

    /// Add a step result.
    pub fn add_step(&mut self, step: VerifyStep) {
        if !step.passed {
            self.passed = false;
        }
        self.steps.push(step);
    }

    /// Get count of passed steps.
    pub fn passed_count(&self) -> usize {
        self.steps.iter().filter(|s| s.passed && !s.skipped).count()
    }

    /// Get count of failed steps.
    pub fn failed_count(&self) -> usize {
        self.steps.iter().filter(|s| !s.passed).count()
    }

    pub fn skipped_count(&self) -> usize {
        self.steps.iter().filter(|s| s.skipped).count()
    }

    /// First failed step of the given kind.
    pub fn first_failure(&self, kind: FailureKind) -> Option<&VerifyStep> {
        self.steps.iter().find(|s| s.failure == Some(kind))
    }

    /// Get all warnings.
    pub fn warnings(&self) -> Vec<&str> {
        self.steps
            .iter()
            .flat_map(|s| s.warnings.iter().map(|w| w.as_str()))
            .collect()
    }
}

/// Options for a verification run.
#[derive(Debug, Clone)]
pub struct VerifyOptions {
    /// Run checks that need the network
    pub network: bool,

    /// Library prefixes that count as a portability leak
    pub forbidden_prefixes: Vec<String>,

    /// Scratch directory the build ran in, if known
    pub scratch: Option<PathBuf>,

    /// Where to place the relocated copy. A temporary directory, removed
    /// afterwards, when unset.
    pub copy_dir: Option<PathBuf>,
}

impl Default for VerifyOptions {
    fn default() -> Self {
        VerifyOptions {
            network: true,
            forbidden_prefixes: crate::util::config::DEFAULT_FORBIDDEN_PREFIXES
                .iter()
                .map(|s| s.to_string())
                .collect(),
            scratch: None,
            copy_dir: None,
        }
    }
}

impl VerifyOptions {
    /// Options taken from the effective configuration.
    pub fn from_config(config: &crate::util::config::Config) -> Self {
        VerifyOptions {
            network: config.network_checks(),
            forbidden_prefixes: config.forbidden_prefixes(),
            ..Default::default()
        }
    }

    /// Add every dependency's install prefix to the forbidden set; linking
    /// into one means the package only works next to its build-time deps.
    pub fn forbid_dependencies<'d>(mut self, deps: impl IntoIterator<Item = &'d Dependency>) -> Self {
        for dep in deps {
            let prefix = dep.prefix().display().to_string();
            if !self.forbidden_prefixes.contains(&prefix) {
                self.forbidden_prefixes.push(prefix);
            }
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_verify_step_pass() {
        let step = VerifyStep::pass("test", "passed", Duration::from_millis(100));
        assert!(step.passed);
        assert_eq!(step.name, "test");
        assert!(step.failure.is_none());
    }

    #[test]
    fn test_skip_is_never_silent() {
        let step = VerifyStep::skip("network", "network checks disabled");
        assert!(step.passed);
        assert!(step.skipped);
        assert_eq!(step.warnings, vec!["network checks disabled"]);
    }

    #[test]
    fn test_verify_result_counts() {
        let mut result = VerifyResult::new("portable-zlib", "1.3.1", "/out/zlib");
        result.add_step(VerifyStep::pass("crc32", "ok", Duration::ZERO));
        result.add_step(VerifyStep::skip("network", "offline"));
        assert!(result.passed);
        assert_eq!(result.passed_count(), 1);
        assert_eq!(result.skipped_count(), 1);

        result.add_step(VerifyStep::fail(
            "linkage",
            FailureKind::Portability,
            "bin/ruby links /opt/homebrew/lib/libyaml.dylib",
            Duration::ZERO,
        ));
        assert!(!result.passed);
        assert_eq!(result.failed_count(), 1);
        assert!(result.first_failure(FailureKind::Portability).is_some());
        assert!(result.first_failure(FailureKind::Functional).is_none());
    }

    #[test]
    fn test_dependency_prefixes_are_forbidden() {
        let deps = [
            Dependency::new("portable-libyaml@0.2.5", "0.2.5", "/opt/berth/cellar/portable-libyaml/0.2.5"),
            Dependency::new("glibc@2.17", "2.17", "/opt/homebrew/opt/glibc"),
        ];
        let options = VerifyOptions::default().forbid_dependencies(&deps);
        assert!(options
            .forbidden_prefixes
            .contains(&"/opt/berth/cellar/portable-libyaml/0.2.5".to_string()));
        assert!(options.forbidden_prefixes.contains(&"/opt/homebrew".to_string()));

        let again = options.clone().forbid_dependencies(&deps);
        assert_eq!(again.forbidden_prefixes.len(), options.forbidden_prefixes.len());
    }

    #[test]
    fn test_output_format_parse() {
        assert_eq!("JSON".parse::<OutputFormat>().unwrap(), OutputFormat::Json);
        assert_eq!("gha".parse::<OutputFormat>().unwrap(), OutputFormat::Github);
        assert!("xml".parse::<OutputFormat>().is_err());
    }
}
