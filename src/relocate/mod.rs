//! Portability patching of sources and installed trees.
//!
//! The [`RelocationPatcher`] applies versioned [`RuleTable`]s to a directory
//! and, for installed trees, scrubs every reference to the scratch directory
//! the build ran in. Re-running the patcher over its own output changes
//! nothing.

pub mod pkgconfig;
pub mod polyglot;
pub mod rule;
pub mod rules;
pub mod scrub;
pub mod trust;

use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::core::errors::PatchError;
pub use rule::{PatchRule, PatchStage, RuleReport, RuleTable, Selector};
pub use scrub::ScrubReport;

/// What one table did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TableReport {
    pub table: String,
    pub version: u32,
    pub stage: PatchStage,
    pub rules: Vec<RuleReport>,
}

/// Everything a patch pass did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PatchReport {
    pub tables: Vec<TableReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scrub: Option<ScrubReport>,
}

impl PatchReport {
    /// Ids of the rules that rewrote at least one file.
    pub fn fired(&self) -> Vec<&str> {
        self.tables
            .iter()
            .flat_map(|t| t.rules.iter())
            .filter(|r| r.fired())
            .map(|r| r.rule.as_str())
            .collect()
    }

    /// Whether the pass rewrote anything at all.
    pub fn changed_anything(&self) -> bool {
        !self.fired().is_empty() || self.scrub.as_ref().is_some_and(|s| s.changed() > 0)
    }

    pub fn merge(&mut self, other: PatchReport) {
        self.tables.extend(other.tables);
        if other.scrub.is_some() {
            self.scrub = other.scrub;
        }
    }
}

/// Applies rule tables and the scratch scrub to a tree.
#[derive(Debug, Clone, Default)]
pub struct RelocationPatcher {
    tables: Vec<RuleTable>,
    scratch: Option<PathBuf>,
}

impl RelocationPatcher {
    pub fn new() -> Self {
        RelocationPatcher::default()
    }

    pub fn with_table(mut self, table: RuleTable) -> Self {
        self.tables.push(table);
        self
    }

    /// Scrub references to the scratch directory after the tables ran.
    pub fn with_scratch(mut self, scratch: impl Into<PathBuf>) -> Self {
        self.scratch = Some(scratch.into());
        self
    }

    pub fn tables(&self) -> &[RuleTable] {
        &self.tables
    }

    /// Apply every table to `root`, then scrub and check for scratch leaks.
    pub fn patch(&self, root: &Path) -> Result<PatchReport, PatchError> {
        let mut report = PatchReport::default();

        for table in &self.tables {
            tracing::debug!(
                "applying rule table `{}` v{} to {}",
                table.name,
                table.version,
                root.display()
            );
            let rules = table.apply(root)?;
            report.tables.push(TableReport {
                table: table.name.clone(),
                version: table.version,
                stage: table.stage,
                rules,
            });
        }

        if let Some(ref scratch) = self.scratch {
            let scrubbed = scrub::scrub_tree(root, scratch)?;
            if let Some(path) = scrubbed.unscrubbable.first() {
                return Err(PatchError::ScratchLeak { path: path.clone() });
            }
            if let Some(path) = scrub::scan_leaks(root, scratch)?.into_iter().next() {
                return Err(PatchError::ScratchLeak { path });
            }
            report.scrub = Some(scrubbed);
        }

        let fired = report.fired();
        if fired.is_empty() {
            tracing::info!("no relocation rules fired in {}", root.display());
        } else {
            tracing::info!("relocation rules fired: {}", fired.join(", "));
        }
        Ok(report)
    }
}
