//! Dynamic linkage inspection.
//!
//! A portable artifact may link against the operating system and against
//! itself, never against the package manager's library tree.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use crate::core::platform::OsKind;
use crate::util::fs::walk_files;
use crate::util::process::ProcessBuilder;

/// A dynamic dependency that points somewhere it must not.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkageLeak {
    /// File that carries the dependency, relative to the tree root
    pub path: PathBuf,
    /// The offending library
    pub library: String,
}

/// Libraries listed by `ldd`.
///
/// Unresolved entries (`=> not found`) are reported by name with a
/// `(not found)` suffix.
pub fn parse_ldd(output: &str) -> Vec<String> {
    let mut libs = Vec::new();
    for line in output.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with("statically linked") || line.ends_with(':') {
            continue;
        }
        if let Some((name, target)) = line.split_once("=>") {
            let target = target.trim();
            if target.starts_with("not found") {
                libs.push(format!("{} (not found)", name.trim()));
                continue;
            }
            let path = strip_load_address(target);
            if !path.is_empty() {
                libs.push(path.to_string());
            }
        } else {
            // The vDSO and the dynamic loader have no `=>`.
            let path = strip_load_address(line);
            if path.starts_with('/') {
                libs.push(path.to_string());
            }
        }
    }
    libs
}

fn strip_load_address(s: &str) -> &str {
    match s.rfind(" (0x") {
        Some(idx) => s[..idx].trim(),
        None => s.trim(),
    }
}

/// Libraries listed by `otool -L`. The first line names the inspected file.
pub fn parse_otool(output: &str) -> Vec<String> {
    output
        .lines()
        .filter(|l| l.starts_with('\t') || l.starts_with(' '))
        .filter_map(|l| {
            let l = l.trim();
            let end = l.find(" (compatibility").unwrap_or(l.len());
            let lib = l[..end].trim();
            (!lib.is_empty()).then(|| lib.to_string())
        })
        .collect()
}

/// The subset of `libs` under a forbidden prefix, or unresolved.
pub fn forbidden<'a>(libs: &'a [String], prefixes: &[String]) -> Vec<&'a str> {
    libs.iter()
        .map(String::as_str)
        .filter(|lib| {
            lib.ends_with("(not found)")
                || prefixes
                    .iter()
                    .any(|p| Path::new(lib).starts_with(Path::new(p)))
        })
        .collect()
}

/// Whether `bytes` start an executable or shared object (not an archive
/// or relocatable object) for `os`.
pub fn is_linked_object(bytes: &[u8], os: OsKind) -> bool {
    match os {
        OsKind::Linux => {
            if bytes.len() < 18 || &bytes[..4] != b"\x7fELF" {
                return false;
            }
            let e_type = match bytes[5] {
                2 => u16::from_be_bytes([bytes[16], bytes[17]]),
                _ => u16::from_le_bytes([bytes[16], bytes[17]]),
            };
            // ET_EXEC, ET_DYN
            e_type == 2 || e_type == 3
        }
        OsKind::Darwin => {
            if bytes.len() < 16 {
                return false;
            }
            let magic = [bytes[0], bytes[1], bytes[2], bytes[3]];
            let filetype = match magic {
                [0xcf, 0xfa, 0xed, 0xfe] | [0xce, 0xfa, 0xed, 0xfe] => {
                    u32::from_le_bytes([bytes[12], bytes[13], bytes[14], bytes[15]])
                }
                [0xfe, 0xed, 0xfa, 0xcf] | [0xfe, 0xed, 0xfa, 0xce] => {
                    u32::from_be_bytes([bytes[12], bytes[13], bytes[14], bytes[15]])
                }
                [0xca, 0xfe, 0xba, 0xbe] => return true,
                _ => return false,
            };
            // MH_EXECUTE, MH_DYLIB, MH_BUNDLE
            matches!(filetype, 2 | 6 | 8)
        }
    }
}

/// The platform's linkage listing tool.
pub fn inspector(os: OsKind) -> &'static str {
    match os {
        OsKind::Linux => "ldd",
        OsKind::Darwin => "otool",
    }
}

fn list_libraries(tool: &Path, os: OsKind, file: &Path) -> Result<Vec<String>> {
    let mut cmd = ProcessBuilder::new(tool);
    if os == OsKind::Darwin {
        cmd = cmd.arg("-L");
    }
    let output = cmd
        .arg(file)
        .exec()
        .with_context(|| format!("failed to inspect {}", file.display()))?;
    let stdout = String::from_utf8_lossy(&output.stdout);
    Ok(match os {
        OsKind::Linux => parse_ldd(&stdout),
        OsKind::Darwin => parse_otool(&stdout),
    })
}

/// Inspect every executable and shared object under `root`.
///
/// Returns the leaks found and the number of files inspected.
pub fn check_tree(root: &Path, os: OsKind, prefixes: &[String]) -> Result<(Vec<LinkageLeak>, usize)> {
    let tool_name = inspector(os);
    let tool = which::which(tool_name)
        .with_context(|| format!("`{}` is required to inspect linkage", tool_name))?;

    let mut leaks = Vec::new();
    let mut inspected = 0;
    for path in walk_files(root) {
        let head = read_head(&path)?;
        if !is_linked_object(&head, os) {
            continue;
        }
        inspected += 1;
        let libs = list_libraries(&tool, os, &path)?;
        for lib in forbidden(&libs, prefixes) {
            let rel = path.strip_prefix(root).unwrap_or(&path).to_path_buf();
            tracing::debug!("{} links {}", rel.display(), lib);
            leaks.push(LinkageLeak {
                path: rel,
                library: lib.to_string(),
            });
        }
    }
    Ok((leaks, inspected))
}

fn read_head(path: &Path) -> Result<Vec<u8>> {
    use std::io::Read;

    let mut file = std::fs::File::open(path)
        .with_context(|| format!("failed to open {}", path.display()))?;
    let mut head = vec![0u8; 64];
    let n = file
        .read(&mut head)
        .with_context(|| format!("failed to read {}", path.display()))?;
    head.truncate(n);
    Ok(head)
}
