//! Scratch-directory scrubbing.
//!
//! Compilers embed the directory they ran in (debug info, `__FILE__`,
//! generated config). After relocation no file under the prefix may mention
//! the scratch directory. Occurrences are rewritten to `.`, the same result
//! `-ffile-prefix-map=<scratch>=.` gives at compile time.

use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::core::errors::PatchError;
use crate::util::fs::{is_binary, walk_files};

const REPLACEMENT: &[u8] = b".";

/// What a scrub pass rewrote.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ScrubReport {
    pub text_files: Vec<PathBuf>,
    pub binary_files: Vec<PathBuf>,
    /// Binary occurrences outside a NUL-terminated string, left alone
    pub unscrubbable: Vec<PathBuf>,
}

impl ScrubReport {
    pub fn changed(&self) -> usize {
        self.text_files.len() + self.binary_files.len()
    }
}

fn find(haystack: &[u8], needle: &[u8], from: usize) -> Option<usize> {
    if needle.is_empty() || from >= haystack.len() {
        return None;
    }
    haystack[from..]
        .windows(needle.len())
        .position(|w| w == needle)
        .map(|p| p + from)
}

/// Whether the byte after a match ends the path component: `/tmp/build`
/// names `/tmp/build/x` and `"/tmp/build"` but not `/tmp/build-out`.
fn ends_component(next: Option<&u8>) -> bool {
    match next {
        None => true,
        Some(&b) => matches!(b, b'/' | b'"' | b'\'' | b':' | b';' | 0) || b.is_ascii_whitespace(),
    }
}

/// Next occurrence of the path `needle` at or after `from`.
fn find_path(haystack: &[u8], needle: &[u8], from: usize) -> Option<usize> {
    let mut pos = from;
    while let Some(at) = find(haystack, needle, pos) {
        if ends_component(haystack.get(at + needle.len())) {
            return Some(at);
        }
        pos = at + 1;
    }
    None
}

fn replace_all(haystack: &[u8], needle: &[u8], with: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(haystack.len());
    let mut pos = 0;
    while let Some(at) = find_path(haystack, needle, pos) {
        out.extend_from_slice(&haystack[pos..at]);
        out.extend_from_slice(with);
        pos = at + needle.len();
    }
    out.extend_from_slice(&haystack[pos..]);
    out
}

/// Rewrite `needle` in a text file's bytes.
pub fn scrub_text(contents: &[u8], needle: &[u8]) -> Option<Vec<u8>> {
    find_path(contents, needle, 0).map(|_| replace_all(contents, needle, REPLACEMENT))
}

/// Rewrite `needle` inside NUL-terminated strings of a binary, padding each
/// shortened string with NULs so every offset in the file stays put.
///
/// Returns the new bytes and whether some occurrence could not be rewritten
/// because it was not followed by a terminator.
pub fn scrub_binary(contents: &[u8], needle: &[u8]) -> (Option<Vec<u8>>, bool) {
    let mut out = contents.to_vec();
    let mut changed = false;
    let mut stranded = false;
    let mut pos = 0;

    while let Some(at) = find_path(&out, needle, pos) {
        let Some(end) = out[at..].iter().position(|b| *b == 0).map(|p| p + at) else {
            stranded = true;
            break;
        };
        let rewritten = replace_all(&out[at..end], needle, REPLACEMENT);
        out[at..at + rewritten.len()].copy_from_slice(&rewritten);
        out[at + rewritten.len()..end].fill(0);
        changed = true;
        pos = end;
    }

    (changed.then_some(out), stranded)
}

/// Scrub every file under `root` of references to `scratch`.
pub fn scrub_tree(root: &Path, scratch: &Path) -> Result<ScrubReport, PatchError> {
    let needle = scratch.to_string_lossy();
    let needle = needle.trim_end_matches('/').as_bytes().to_vec();
    let mut report = ScrubReport::default();
    if needle.is_empty() {
        return Ok(report);
    }

    for path in walk_files(root) {
        let contents = std::fs::read(&path).map_err(|e| PatchError::io(&path, e))?;
        if find_path(&contents, &needle, 0).is_none() {
            continue;
        }

        if is_binary(&contents) {
            let (patched, stranded) = scrub_binary(&contents, &needle);
            if let Some(patched) = patched {
                std::fs::write(&path, patched).map_err(|e| PatchError::io(&path, e))?;
                report.binary_files.push(path.clone());
            }
            if stranded {
                tracing::warn!("scratch path outside a C string in {}", path.display());
                report.unscrubbable.push(path);
            }
        } else if let Some(patched) = scrub_text(&contents, &needle) {
            std::fs::write(&path, patched).map_err(|e| PatchError::io(&path, e))?;
            report.text_files.push(path);
        }
    }

    if report.changed() > 0 {
        tracing::info!(
            "scrubbed scratch path from {} text and {} binary file(s)",
            report.text_files.len(),
            report.binary_files.len()
        );
    }
    Ok(report)
}

/// Files under `root` that still mention `needle`.
pub fn scan_leaks(root: &Path, needle: &Path) -> Result<Vec<PathBuf>, PatchError> {
    let needle = needle.to_string_lossy();
    let needle = needle.trim_end_matches('/').as_bytes();
    let mut leaks = Vec::new();
    for path in walk_files(root) {
        let contents = std::fs::read(&path).map_err(|e| PatchError::io(&path, e))?;
        if find_path(&contents, needle, 0).is_some() {
            leaks.push(path);
        }
    }
    Ok(leaks)
}
