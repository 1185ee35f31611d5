//! pkg-config descriptor relocation.
//!
//! Descriptors record an absolute `prefix=`. After relocation the prefix is
//! expressed relative to the descriptor itself: pkg-config expands
//! `${pcfiledir}` to the directory holding the `.pc` file, and descriptors
//! live in `<prefix>/lib/pkgconfig`, so two levels up is the prefix wherever
//! the tree ends up.

use std::collections::BTreeMap;
use std::path::{Component, Path, PathBuf};

use anyhow::{bail, Context, Result};

use crate::core::errors::PatchError;
use crate::relocate::rule::{PatchRule, RuleOutcome, Selector};

/// Replacement prefix for descriptors in `<prefix>/lib/pkgconfig`.
pub const RELATIVE_PREFIX: &str = "${pcfiledir}/../..";

/// Where descriptors live inside a prefix.
pub const DESCRIPTOR_GLOB: &str = "lib/pkgconfig/*.pc";

/// Rules that make the descriptors under `selector` relocatable.
///
/// `original_prefix` is the absolute prefix the descriptors were generated
/// with; any other variable that spells it out is rewritten to `${prefix}`.
/// The `prefix=` line is rewritten first so the second rule never sees it.
pub fn relocation_rules(selector: Selector, original_prefix: Option<&Path>) -> Vec<PatchRule> {
    let mut rules = Vec::new();

    rules.push(
        PatchRule::regex(
            "pkgconfig-relative-prefix",
            selector.clone(),
            r"(?m)^prefix=.*$",
            format!("prefix={}", RELATIVE_PREFIX.replace('$', "$$")),
        )
        .conditional(),
    );

    if let Some(prefix) = original_prefix {
        let prefix = prefix.to_string_lossy();
        let prefix = prefix.trim_end_matches('/');
        if !prefix.is_empty() {
            // Only whole path components: `/opt/x` must not eat `/opt/xyz`.
            let pattern = format!(r#"{}(/|\s|"|$)"#, regex::escape(prefix));
            rules.push(
                PatchRule::regex(
                    "pkgconfig-absolute-prefix",
                    selector,
                    format!("(?m){}", pattern),
                    "$${prefix}${1}",
                )
                .conditional(),
            );
        }
    }

    rules
}

/// Relocate one descriptor's text.
pub fn relocate_descriptor(contents: &str, original_prefix: Option<&Path>) -> Result<String, PatchError> {
    let rules = relocation_rules(Selector::glob("*.pc"), original_prefix);

    let mut text = contents.to_string();
    for rule in &rules {
        let (patched, outcome) = rule.apply_to_str(&text)?;
        if matches!(outcome, RuleOutcome::Applied { .. }) {
            text = patched;
        }
    }
    Ok(text)
}

/// Relocate a descriptor file in place. Returns whether it changed.
pub fn relocate_file(path: &Path, original_prefix: Option<&Path>) -> Result<bool, PatchError> {
    let contents = std::fs::read_to_string(path).map_err(|e| PatchError::io(path, e))?;
    let relocated = relocate_descriptor(&contents, original_prefix)?;
    if relocated == contents {
        return Ok(false);
    }
    std::fs::write(path, relocated).map_err(|e| PatchError::io(path, e))?;
    Ok(true)
}

/// A parsed descriptor: variables (`name=value`) and keywords (`Name: value`).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PcFile {
    pub variables: BTreeMap<String, String>,
    pub fields: BTreeMap<String, String>,
}

impl PcFile {
    pub fn parse(contents: &str) -> Self {
        let mut pc = PcFile::default();
        for line in contents.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let eq = line.find('=');
            let colon = line.find(':');
            match (eq, colon) {
                (Some(e), Some(c)) if c < e => {
                    pc.fields
                        .insert(line[..c].trim().to_string(), line[c + 1..].trim().to_string());
                }
                (Some(e), _) => {
                    pc.variables
                        .insert(line[..e].trim().to_string(), line[e + 1..].trim().to_string());
                }
                (None, Some(c)) => {
                    pc.fields
                        .insert(line[..c].trim().to_string(), line[c + 1..].trim().to_string());
                }
                (None, None) => {}
            }
        }
        pc
    }

    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read descriptor: {}", path.display()))?;
        Ok(Self::parse(&contents))
    }

    /// Expand `${var}` references the way pkg-config does, with `pcfiledir`
    /// bound to the descriptor's directory.
    pub fn expand(&self, value: &str, pcfiledir: &Path) -> Result<String> {
        self.expand_depth(value, pcfiledir, 0)
    }

    fn expand_depth(&self, value: &str, pcfiledir: &Path, depth: usize) -> Result<String> {
        if depth > 32 {
            bail!("variable expansion too deep in `{}`", value);
        }
        let mut out = String::with_capacity(value.len());
        let mut rest = value;
        while let Some(start) = rest.find("${") {
            out.push_str(&rest[..start]);
            let after = &rest[start + 2..];
            let Some(end) = after.find('}') else {
                bail!("unterminated variable in `{}`", value);
            };
            let name = &after[..end];
            let resolved = if name == "pcfiledir" {
                pcfiledir.to_string_lossy().into_owned()
            } else {
                let raw = self
                    .variables
                    .get(name)
                    .with_context(|| format!("undefined variable `{}`", name))?;
                self.expand_depth(raw, pcfiledir, depth + 1)?
            };
            out.push_str(&resolved);
            rest = &after[end + 1..];
        }
        out.push_str(rest);
        Ok(out)
    }

    /// Expanded value of a variable.
    pub fn variable(&self, name: &str, pcfiledir: &Path) -> Result<Option<String>> {
        match self.variables.get(name) {
            Some(raw) => Ok(Some(self.expand(raw, pcfiledir)?)),
            None => Ok(None),
        }
    }
}

/// Resolve the effective install prefix of a descriptor at its current location.
pub fn resolve_prefix(descriptor: &Path) -> Result<PathBuf> {
    let pc = PcFile::load(descriptor)?;
    let dir = descriptor
        .parent()
        .with_context(|| format!("descriptor has no parent: {}", descriptor.display()))?;
    let prefix = pc
        .variable("prefix", dir)?
        .with_context(|| format!("descriptor has no prefix: {}", descriptor.display()))?;
    Ok(normalize(Path::new(&prefix)))
}

/// Lexically normalize `.` and `..` components.
pub fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    out.push("..");
                }
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}
