//! Dependency export.
//!
//! Native gems compiled against the runtime later need the same headers and
//! static archives the runtime was built with. The exporter copies those out
//! of each build-time dependency into the package, and rewrites the copied
//! pkg-config descriptors so they resolve against wherever the package ends
//! up.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Serialize;

use crate::core::dependency::Dependency;
use crate::relocate::pkgconfig;
use crate::util::fs;

/// What one dependency contributed.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ExportedDependency {
    pub name: String,
    pub headers: usize,
    pub archives: usize,
    pub descriptors: usize,
}

/// Summary of an export pass.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ExportReport {
    pub dependencies: Vec<ExportedDependency>,
    /// Descriptors whose paths were rewritten
    pub relocated: Vec<PathBuf>,
}

impl ExportReport {
    pub fn headers(&self) -> usize {
        self.dependencies.iter().map(|d| d.headers).sum()
    }

    pub fn archives(&self) -> usize {
        self.dependencies.iter().map(|d| d.archives).sum()
    }

    pub fn descriptors(&self) -> usize {
        self.dependencies.iter().map(|d| d.descriptors).sum()
    }
}

/// Copies build-time dependencies into an install prefix.
pub struct DependencyExporter {
    prefix: PathBuf,
}

impl DependencyExporter {
    pub fn new(prefix: impl Into<PathBuf>) -> Self {
        DependencyExporter {
            prefix: prefix.into(),
        }
    }

    /// Export every dependency, in order. Later dependencies overwrite files
    /// of the same name from earlier ones.
    pub fn export<'d>(&self, deps: impl IntoIterator<Item = &'d Dependency>) -> Result<ExportReport> {
        let include = self.prefix.join("include");
        let lib = self.prefix.join("lib");
        let pkgconfig_dir = lib.join("pkgconfig");
        fs::ensure_dir(&include)?;

        let mut report = ExportReport::default();
        for dep in deps {
            let mut exported = ExportedDependency {
                name: dep.name.clone(),
                ..Default::default()
            };

            let dep_include = dep.include_dir();
            if dep_include.is_dir() {
                exported.headers = copy_tree_contents(&dep_include, &include)?;
            }

            let dep_lib = dep.lib_dir();
            if dep_lib.is_dir() {
                for archive in fs::glob_files(&dep_lib, &["*.a".to_string()])? {
                    fs::copy_into(&archive, &lib)?;
                    exported.archives += 1;
                }
            }

            let dep_pc = dep.pkgconfig_dir();
            if dep_pc.is_dir() {
                for descriptor in fs::glob_files(&dep_pc, &["*.pc".to_string()])? {
                    let copied = fs::copy_into(&descriptor, &pkgconfig_dir)?;
                    let changed = pkgconfig::relocate_file(&copied, Some(dep.prefix()))
                        .with_context(|| format!("failed to relocate {}", copied.display()))?;
                    if changed {
                        report.relocated.push(copied);
                    }
                    exported.descriptors += 1;
                }
            }

            tracing::info!(
                "exported {}: {} header(s), {} archive(s), {} descriptor(s)",
                exported.name,
                exported.headers,
                exported.archives,
                exported.descriptors
            );
            report.dependencies.push(exported);
        }
        Ok(report)
    }
}

/// Copy everything under `src` into `dst`, returning the number of files.
fn copy_tree_contents(src: &Path, dst: &Path) -> Result<usize> {
    let mut count = 0;
    for file in fs::walk_files(src) {
        let rel = file
            .strip_prefix(src)
            .with_context(|| format!("{} is outside {}", file.display(), src.display()))?;
        let target = dst.join(rel);
        if let Some(parent) = target.parent() {
            fs::ensure_dir(parent)?;
        }
        std::fs::copy(&file, &target)
            .with_context(|| format!("failed to copy {} to {}", file.display(), target.display()))?;
        count += 1;
    }
    Ok(count)
}
