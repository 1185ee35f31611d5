//! Declarative patch rules and the engine that applies them.
//!
//! A [`PatchRule`] names the files it targets, what to find, what to put in
//! its place, and whether finding nothing is fatal. Rules must be idempotent:
//! a rule whose replacement still contains its own pattern carries a
//! [`PatchRule::guard`] so a second pass recognizes the edit and leaves the
//! file alone.

use std::path::{Path, PathBuf};

use regex::Regex;
use serde::Serialize;

use crate::core::errors::PatchError;
use crate::relocate::polyglot;
use crate::util::fs::glob_files;

/// When a rule table runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PatchStage {
    /// Against the unpacked sources, before the native build
    Source,
    /// Against the installed prefix, after the native build
    Artifact,
}

/// Extra filter applied to files matched by a selector's globs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentFilter {
    /// Shell/runtime polyglot launchers only
    Polyglot,
}

/// Which files a rule looks at.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Selector {
    /// Globs relative to the stage root
    pub patterns: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filter: Option<ContentFilter>,
}

impl Selector {
    pub fn glob(pattern: impl Into<String>) -> Self {
        Selector {
            patterns: vec![pattern.into()],
            filter: None,
        }
    }

    pub fn with_filter(mut self, filter: ContentFilter) -> Self {
        self.filter = Some(filter);
        self
    }

    fn accepts(&self, contents: &str) -> bool {
        match self.filter {
            None => true,
            Some(ContentFilter::Polyglot) => polyglot::is_polyglot(contents),
        }
    }

    fn describe(&self) -> String {
        self.patterns.join(", ")
    }
}

/// How a rule finds and rewrites text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Matcher {
    /// Exact substring; every occurrence is replaced.
    Literal { find: String, replace: String },
    /// Regular expression with `$1`-style capture references.
    Regex {
        pattern: String,
        replace: String,
        /// Replace every match instead of only the first
        all: bool,
    },
}

/// A single relocation rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PatchRule {
    /// Stable identifier, used in logs and reports
    pub id: String,
    pub selector: Selector,
    pub matcher: Matcher,
    /// Text whose presence means the rule was already applied
    #[serde(skip_serializing_if = "Option::is_none")]
    pub guard: Option<String>,
    /// A mandatory rule that matches nothing aborts the pipeline
    pub mandatory: bool,
}

impl PatchRule {
    /// A literal rule. Mandatory by default.
    pub fn literal(
        id: impl Into<String>,
        selector: Selector,
        find: impl Into<String>,
        replace: impl Into<String>,
    ) -> Self {
        PatchRule {
            id: id.into(),
            selector,
            matcher: Matcher::Literal {
                find: find.into(),
                replace: replace.into(),
            },
            guard: None,
            mandatory: true,
        }
    }

    /// A regex rule replacing every match. Mandatory by default.
    pub fn regex(
        id: impl Into<String>,
        selector: Selector,
        pattern: impl Into<String>,
        replace: impl Into<String>,
    ) -> Self {
        PatchRule {
            id: id.into(),
            selector,
            matcher: Matcher::Regex {
                pattern: pattern.into(),
                replace: replace.into(),
                all: true,
            },
            guard: None,
            mandatory: true,
        }
    }

    /// Only replace the first regex match.
    pub fn first_only(mut self) -> Self {
        if let Matcher::Regex { ref mut all, .. } = self.matcher {
            *all = false;
        }
        self
    }

    /// Mark the rule as platform-conditional: no match is logged, not fatal.
    pub fn conditional(mut self) -> Self {
        self.mandatory = false;
        self
    }

    pub fn guarded_by(mut self, guard: impl Into<String>) -> Self {
        self.guard = Some(guard.into());
        self
    }

    /// Apply the rule to one file's contents.
    pub fn apply_to_str(&self, contents: &str) -> Result<(String, RuleOutcome), PatchError> {
        if let Some(ref guard) = self.guard {
            if contents.contains(guard.as_str()) {
                return Ok((contents.to_string(), RuleOutcome::AlreadyApplied));
            }
        }

        match &self.matcher {
            Matcher::Literal { find, replace } => {
                let count = contents.matches(find.as_str()).count();
                if count == 0 {
                    return Ok((contents.to_string(), RuleOutcome::NoMatch));
                }
                let patched = contents.replace(find.as_str(), replace);
                Ok(outcome(contents, patched, count))
            }
            Matcher::Regex {
                pattern,
                replace,
                all,
            } => {
                let re = Regex::new(pattern).map_err(|e| PatchError::InvalidPattern {
                    rule: self.id.clone(),
                    message: e.to_string(),
                })?;
                let count = re.find_iter(contents).count();
                if count == 0 {
                    return Ok((contents.to_string(), RuleOutcome::NoMatch));
                }
                let patched = if *all {
                    re.replace_all(contents, replace.as_str()).into_owned()
                } else {
                    re.replace(contents, replace.as_str()).into_owned()
                };
                Ok(outcome(contents, patched, if *all { count } else { 1 }))
            }
        }
    }

    /// Check the rule is well-formed and idempotent by construction.
    pub fn validate(&self) -> Result<(), String> {
        match &self.matcher {
            Matcher::Literal { find, replace } => {
                if find.is_empty() {
                    return Err(format!("rule `{}` has an empty pattern", self.id));
                }
                if replace.contains(find.as_str()) && self.guard.is_none() {
                    return Err(format!(
                        "rule `{}` re-introduces its own pattern and has no guard",
                        self.id
                    ));
                }
            }
            Matcher::Regex { pattern, .. } => {
                Regex::new(pattern).map_err(|e| format!("rule `{}`: {}", self.id, e))?;
            }
        }
        if let Some(ref guard) = self.guard {
            if guard.is_empty() {
                return Err(format!("rule `{}` has an empty guard", self.id));
            }
        }
        Ok(())
    }
}

fn outcome(original: &str, patched: String, count: usize) -> (String, RuleOutcome) {
    // A rewrite to identical text (e.g. an already-relocated `prefix=` line)
    // counts as applied without touching the file.
    if patched == original {
        (patched, RuleOutcome::Unchanged { matches: count })
    } else {
        (patched, RuleOutcome::Applied { matches: count })
    }
}

/// Result of applying one rule to one file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleOutcome {
    Applied { matches: usize },
    /// Pattern matched but the replacement equals the current text
    Unchanged { matches: usize },
    AlreadyApplied,
    NoMatch,
}

impl RuleOutcome {
    fn is_satisfied(&self) -> bool {
        !matches!(self, RuleOutcome::NoMatch)
    }
}

/// A named, versioned list of rules.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RuleTable {
    pub name: String,
    pub version: u32,
    pub stage: PatchStage,
    pub rules: Vec<PatchRule>,
}

impl RuleTable {
    pub fn new(name: impl Into<String>, version: u32, stage: PatchStage) -> Self {
        RuleTable {
            name: name.into(),
            version,
            stage,
            rules: Vec::new(),
        }
    }

    pub fn rule(mut self, rule: PatchRule) -> Self {
        self.rules.push(rule);
        self
    }

    pub fn extend(mut self, rules: impl IntoIterator<Item = PatchRule>) -> Self {
        self.rules.extend(rules);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Validate every rule in the table.
    pub fn validate(&self) -> Result<(), String> {
        for rule in &self.rules {
            rule.validate()?;
        }
        Ok(())
    }

    /// Apply the table to a directory tree.
    pub fn apply(&self, root: &Path) -> Result<Vec<RuleReport>, PatchError> {
        let mut reports = Vec::with_capacity(self.rules.len());
        for rule in &self.rules {
            reports.push(apply_rule(rule, root)?);
        }
        Ok(reports)
    }
}

/// What one rule did across the tree.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RuleReport {
    pub rule: String,
    /// Files rewritten by this pass
    pub changed: Vec<PathBuf>,
    /// Files where a previous pass already applied the rule
    pub already_applied: Vec<PathBuf>,
    /// Total pattern matches
    pub matches: usize,
    pub mandatory: bool,
}

impl RuleReport {
    /// Whether the rule changed anything in this pass.
    pub fn fired(&self) -> bool {
        !self.changed.is_empty()
    }
}

fn apply_rule(rule: &PatchRule, root: &Path) -> Result<RuleReport, PatchError> {
    let mut report = RuleReport {
        rule: rule.id.clone(),
        mandatory: rule.mandatory,
        ..Default::default()
    };

    let candidates = glob_files(root, &rule.selector.patterns).map_err(|e| PatchError::InvalidPattern {
        rule: rule.id.clone(),
        message: format!("{:#}", e),
    })?;

    let mut targets = Vec::new();
    for path in candidates {
        let bytes = std::fs::read(&path).map_err(|e| PatchError::io(&path, e))?;
        // Rules only rewrite text; binaries are handled by the scratch scrubber.
        let Ok(contents) = String::from_utf8(bytes) else {
            tracing::debug!("rule `{}`: skipping non-UTF-8 file {}", rule.id, path.display());
            continue;
        };
        if rule.selector.accepts(&contents) {
            targets.push((path, contents));
        }
    }

    if targets.is_empty() {
        if rule.mandatory {
            return Err(PatchError::NoTargets {
                rule: rule.id.clone(),
                selector: rule.selector.describe(),
            });
        }
        tracing::debug!("rule `{}` skipped: no files match {}", rule.id, rule.selector.describe());
        return Ok(report);
    }

    let mut satisfied = false;
    let mut first_miss = None;
    for (path, contents) in targets {
        let (patched, result) = rule.apply_to_str(&contents)?;
        match result {
            RuleOutcome::Applied { matches } => {
                std::fs::write(&path, patched).map_err(|e| PatchError::io(&path, e))?;
                report.matches += matches;
                report.changed.push(path);
            }
            RuleOutcome::Unchanged { matches } => report.matches += matches,
            RuleOutcome::AlreadyApplied => report.already_applied.push(path),
            RuleOutcome::NoMatch => {
                if first_miss.is_none() {
                    first_miss = Some(path);
                }
            }
        }
        satisfied |= result.is_satisfied();
    }

    if !satisfied {
        if rule.mandatory {
            return Err(PatchError::NoMatch {
                rule: rule.id.clone(),
                path: first_miss.unwrap_or_else(|| root.to_path_buf()),
            });
        }
        tracing::debug!("rule `{}` found no match", rule.id);
    } else if report.fired() {
        tracing::info!(
            "rule `{}` fired: {} match(es) in {} file(s)",
            rule.id,
            report.matches,
            report.changed.len()
        );
    } else {
        tracing::debug!("rule `{}` already applied", rule.id);
    }

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_guarded_literal_is_idempotent() {
        let rule = PatchRule::literal(
            "add-include",
            Selector::glob("x.c"),
            "#include \"a.h\"",
            "#include \"a.h\"\n#include <unistd.h>",
        )
        .guarded_by("#include \"a.h\"\n#include <unistd.h>");

        let (once, first) = rule.apply_to_str("#include \"a.h\"\nint x;\n").unwrap();
        assert_eq!(first, RuleOutcome::Applied { matches: 1 });
        let (twice, second) = rule.apply_to_str(&once).unwrap();
        assert_eq!(second, RuleOutcome::AlreadyApplied);
        assert_eq!(once, twice);
    }

    #[test]
    fn test_unguarded_self_reintroducing_rule_is_invalid() {
        let rule = PatchRule::literal("bad", Selector::glob("*"), "foo", "foofoo");
        assert!(rule.validate().is_err());
        assert!(rule.clone().guarded_by("foofoo").validate().is_ok());
    }

    #[test]
    fn test_regex_first_only() {
        let rule = PatchRule::regex("cxx", Selector::glob("*"), r#"(CXX = )"false""#, r#"$1"c++""#).first_only();
        let (out, _) = rule.apply_to_str("CXX = \"false\"\nCXX = \"false\"\n").unwrap();
        assert_eq!(out, "CXX = \"c++\"\nCXX = \"false\"\n");
    }

    #[test]
    fn test_mandatory_rule_without_match_fails() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(tmp.path().join("a.txt"), "nothing here").unwrap();
        let table = RuleTable::new("t", 1, PatchStage::Artifact).rule(PatchRule::literal(
            "needle",
            Selector::glob("*.txt"),
            "needle",
            "thread",
        ));
        match table.apply(tmp.path()) {
            Err(PatchError::NoMatch { rule, .. }) => assert_eq!(rule, "needle"),
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_mandatory_rule_without_targets_fails() {
        let tmp = TempDir::new().unwrap();
        let table = RuleTable::new("t", 1, PatchStage::Artifact).rule(PatchRule::literal(
            "missing",
            Selector::glob("lib/*.rb"),
            "a",
            "b",
        ));
        assert!(matches!(table.apply(tmp.path()), Err(PatchError::NoTargets { .. })));
    }

    #[test]
    fn test_conditional_rule_without_match_is_reported() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(tmp.path().join("a.txt"), "nothing").unwrap();
        let table = RuleTable::new("t", 1, PatchStage::Artifact).rule(
            PatchRule::literal("optional", Selector::glob("*.txt"), "x-y", "z").conditional(),
        );
        let reports = table.apply(tmp.path()).unwrap();
        assert!(!reports[0].fired());
        assert_eq!(reports[0].matches, 0);
    }

    #[test]
    fn test_second_pass_changes_nothing() {
        let tmp = TempDir::new().unwrap();
        let file = tmp.path().join("libcrypto.pc");
        std::fs::write(&file, "Libs: -lcrypto\nLibs.private: -ldl -pthread\n").unwrap();
        let table = RuleTable::new("t", 1, PatchStage::Artifact).rule(
            PatchRule::literal("join", Selector::glob("*.pc"), "\nLibs.private:", "").conditional(),
        );

        let first = table.apply(tmp.path()).unwrap();
        assert!(first[0].fired());
        let after_first = std::fs::read(&file).unwrap();

        let second = table.apply(tmp.path()).unwrap();
        assert!(!second[0].fired());
        assert_eq!(std::fs::read(&file).unwrap(), after_first);
    }
}
