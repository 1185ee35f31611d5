//! Bundled gem handling for the runtime build.
//!
//! Two jobs, both run inside the scratch source tree: trimming
//! `gems/bundled_gems` before configure, and generating
//! `lib/<arch>/portable_ruby_gems.rb` so callers can put every bundled gem on
//! the load path without going through RubyGems.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};

use crate::relocate::pkgconfig::PcFile;
use crate::util::fs;

/// Gem list shipped with the runtime sources.
pub const BUNDLED_GEMS: &str = "gems/bundled_gems";

/// Name of the generated load-path helper.
pub const LOAD_PATH_HELPER: &str = "portable_ruby_gems.rb";

/// Keep only real entries: no blanks, comments or Windows-only gems.
pub fn filter_bundled_gems(contents: &str) -> Vec<String> {
    contents
        .lines()
        .filter(|line| {
            let trimmed = line.trim();
            !trimmed.is_empty() && !line.starts_with('#') && !line.contains("win32")
        })
        .map(str::to_string)
        .collect()
}

/// Rewrite `gems/bundled_gems`, appending `extra` (`name version`) lines.
///
/// Returns the number of entries written.
pub fn rewrite_bundled_gems(source_dir: &Path, extra: &[String]) -> Result<usize> {
    let path = source_dir.join(BUNDLED_GEMS);
    let contents = fs::read_to_string(&path)?;
    let mut lines = filter_bundled_gems(&contents);
    for entry in extra {
        if !lines.iter().any(|l| l == entry) {
            lines.push(entry.clone());
        }
    }

    let mut out = lines.join("\n");
    out.push('\n');
    fs::write_string(&path, &out)?;
    tracing::debug!("{} now lists {} gem(s)", BUNDLED_GEMS, lines.len());
    Ok(lines.len())
}

/// The runtime's arch string, read from the generated `ruby-*.pc`.
pub fn ruby_arch(source_dir: &Path) -> Result<String> {
    let descriptors = fs::glob_files(source_dir, &["ruby-*.pc".to_string()])?;
    let Some(descriptor) = descriptors.first() else {
        bail!("no ruby-*.pc in {}; did `make ruby.pc` run?", source_dir.display());
    };
    let pc = PcFile::load(descriptor)?;
    pc.variable("arch", source_dir)?
        .filter(|a| !a.is_empty())
        .with_context(|| format!("{} has no arch variable", descriptor.display()))
}

/// Require paths of every extracted gem, relative to `.bundle`.
pub fn bundled_require_paths(source_dir: &Path) -> Result<Vec<String>> {
    let bundle = source_dir.join(".bundle");
    let extensions = fs::glob_paths(&bundle, &["extensions/*/*/*".to_string()])?;
    let libs = fs::glob_paths(&bundle, &["gems/*/lib".to_string()])?;
    Ok(extensions
        .iter()
        .chain(libs.iter())
        .map(|p| fs::relative_path(&bundle, p).to_string_lossy().replace('\\', "/"))
        .collect())
}

/// Ruby source putting each require path on `$:`, resolved against the
/// running interpreter's own configuration.
pub fn load_path_script(require_paths: &[String]) -> String {
    require_paths
        .iter()
        .map(|path| {
            format!(
                "$:.unshift \"#{{RbConfig::CONFIG[\"rubylibprefix\"]}}/gems/#{{RbConfig::CONFIG[\"ruby_version\"]}}/{}\"\n",
                path
            )
        })
        .collect()
}

/// Write `lib/<arch>/portable_ruby_gems.rb` into the source tree.
pub fn write_gem_load_paths(source_dir: &Path) -> Result<PathBuf> {
    let arch = ruby_arch(source_dir)?;
    let paths = bundled_require_paths(source_dir)?;
    let helper = source_dir.join("lib").join(&arch).join(LOAD_PATH_HELPER);
    fs::write_string(&helper, &load_path_script(&paths))?;
    tracing::debug!("wrote {} load path(s) to {}", paths.len(), helper.display());
    Ok(helper)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_filter_bundled_gems() {
        let contents = "# gem-name version-to-bundle repository-url [optional-commit-hash-to-test-or-defaults-to-v-version]\nminitest 5.25.4 https://github.com/minitest/minitest\n\nwin32ole 1.9.1 https://github.com/ruby/win32ole\ndebug 1.10.0 https://github.com/ruby/debug\n";
        assert_eq!(
            filter_bundled_gems(contents),
            [
                "minitest 5.25.4 https://github.com/minitest/minitest",
                "debug 1.10.0 https://github.com/ruby/debug",
            ]
        );
    }

    #[test]
    fn test_rewrite_appends_once() {
        let tmp = TempDir::new().unwrap();
        std::fs::create_dir_all(tmp.path().join("gems")).unwrap();
        std::fs::write(
            tmp.path().join(BUNDLED_GEMS),
            "# comment\ndebug 1.10.0 https://github.com/ruby/debug\n",
        )
        .unwrap();

        let extra = vec!["msgpack 1.8.0".to_string(), "bootsnap 1.18.6".to_string()];
        assert_eq!(rewrite_bundled_gems(tmp.path(), &extra).unwrap(), 3);
        assert_eq!(rewrite_bundled_gems(tmp.path(), &extra).unwrap(), 3);

        let written = std::fs::read_to_string(tmp.path().join(BUNDLED_GEMS)).unwrap();
        assert_eq!(
            written,
            "debug 1.10.0 https://github.com/ruby/debug\nmsgpack 1.8.0\nbootsnap 1.18.6\n"
        );
    }

    #[test]
    fn test_write_gem_load_paths() {
        let tmp = TempDir::new().unwrap();
        let src = tmp.path();
        std::fs::write(
            src.join("ruby-3.4.pc"),
            "arch=x86_64-linux\nruby_version=3.4.0\nName: Ruby\n",
        )
        .unwrap();
        std::fs::create_dir_all(src.join(".bundle/gems/debug-1.10.0/lib")).unwrap();
        std::fs::create_dir_all(src.join(".bundle/extensions/x86_64-linux/3.4.0/debug-1.10.0")).unwrap();

        let helper = write_gem_load_paths(src).unwrap();
        assert_eq!(helper, src.join("lib/x86_64-linux/portable_ruby_gems.rb"));

        let script = std::fs::read_to_string(helper).unwrap();
        let lines: Vec<&str> = script.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].ends_with("/extensions/x86_64-linux/3.4.0/debug-1.10.0\""));
        assert!(lines[1].ends_with("/gems/debug-1.10.0/lib\""));
        assert!(lines[1].starts_with("$:.unshift \"#{RbConfig::CONFIG[\"rubylibprefix\"]}/gems/"));
    }

    #[test]
    fn test_missing_descriptor_is_an_error() {
        let tmp = TempDir::new().unwrap();
        let err = ruby_arch(tmp.path()).unwrap_err();
        assert!(err.to_string().contains("make ruby.pc"));
    }
}
