//! Shell/Ruby polyglot launchers.
//!
//! The runtime installs its executables as files that are valid both as a
//! POSIX shell script and as a Ruby program: `/bin/sh` runs the prologue,
//! which re-executes the relocated interpreter with `-x` so Ruby skips ahead
//! to the embedded `#!/usr/bin/env ruby` line. RubyGems only recognizes a
//! launcher it owns when its "generated by RubyGems" marker sits directly
//! below that embedded shebang, so the marker is inserted there.

use crate::relocate::rule::{ContentFilter, PatchRule, Selector};

pub const SHELL_SHEBANG: &str = "#!/bin/sh";
pub const RUBY_SHEBANG: &str = "#!/usr/bin/env ruby";
pub const GENERATED_MARKER: &str = "# This file was generated by RubyGems.";

/// Whether a file is a shell/Ruby polyglot launcher.
pub fn is_polyglot(contents: &str) -> bool {
    contents.starts_with(SHELL_SHEBANG) && contents.contains(RUBY_SHEBANG)
}

/// Text that must follow the embedded shebang once the marker is in place.
pub fn marker_block() -> String {
    format!("{}\n#\n{}\n#\n", RUBY_SHEBANG, GENERATED_MARKER)
}

/// The rule inserting the marker into every polyglot launcher in `bin/`.
pub fn marker_rule() -> PatchRule {
    PatchRule::regex(
        "ruby-polyglot-marker",
        Selector::glob("bin/*").with_filter(ContentFilter::Polyglot),
        r"(#!/usr/bin/env ruby\n)\n(require 'rubygems')",
        format!("${{1}}#\n{}\n#\n${{2}}", GENERATED_MARKER),
    )
    .first_only()
    .guarded_by(format!("{}\n#\n{}", RUBY_SHEBANG, GENERATED_MARKER))
    .conditional()
}

/// Split a launcher into the shell prologue and the Ruby program.
fn split(contents: &str) -> Option<(&str, &str)> {
    let at = contents.find(&format!("\n{}", RUBY_SHEBANG))?;
    Some((&contents[..at + 1], &contents[at + 1..]))
}

/// Structural check that a launcher still works under both interpreters.
pub fn validate_polyglot(contents: &str) -> Result<(), String> {
    if !contents.starts_with(SHELL_SHEBANG) {
        return Err("missing /bin/sh shebang".to_string());
    }
    let (shell, ruby) = split(contents).ok_or("missing embedded ruby shebang")?;
    if !shell.lines().any(|l| l.trim_start().starts_with("exec ")) {
        return Err("shell prologue never hands over to the interpreter".to_string());
    }
    if ruby.matches(RUBY_SHEBANG).count() != 1 {
        return Err("embedded ruby shebang appears more than once".to_string());
    }
    Ok(())
}

/// Whether `after` behaves like `before` for both interpreters: the shell
/// prologue is byte-identical and the Ruby program differs only in comments.
pub fn interpretations_preserved(before: &str, after: &str) -> bool {
    let (Some((shell_a, ruby_a)), Some((shell_b, ruby_b))) = (split(before), split(after)) else {
        return false;
    };
    let code = |s: &str| -> Vec<String> {
        s.lines()
            .skip(1)
            .filter(|l| !l.trim().is_empty() && !l.trim_start().starts_with('#'))
            .map(str::to_string)
            .collect()
    };
    shell_a == shell_b && code(ruby_a) == code(ruby_b)
}

/// Whether the marker sits directly below the embedded shebang.
pub fn has_marker(contents: &str) -> bool {
    contents.contains(&format!("{}\n#\n{}", RUBY_SHEBANG, GENERATED_MARKER))
}

#[cfg(test)]
mod tests {
    use super::*;

    const LAUNCHER: &str = r#"#!/bin/sh
# -*- ruby -*-
# This file was generated by RubyGems.
_=_\
=begin
bindir="${0%/*}"
exec "$bindir/ruby" "-x" "$0" "$@"
=end
#!/usr/bin/env ruby

require 'rubygems'

version = ">= 0.a"
load Gem.activate_bin_path('rake', 'rake', version)
"#;

    #[test]
    fn test_detection() {
        assert!(is_polyglot(LAUNCHER));
        assert!(!is_polyglot("#!/usr/bin/env ruby\nputs 1\n"));
        assert!(!is_polyglot("#!/bin/sh\necho hi\n"));
    }

    #[test]
    fn test_marker_insertion_preserves_both_interpretations() {
        let rule = marker_rule();
        let (patched, _) = rule.apply_to_str(LAUNCHER).unwrap();

        assert!(has_marker(&patched));
        assert!(patched.contains(&marker_block()));
        assert!(validate_polyglot(&patched).is_ok());
        assert!(interpretations_preserved(LAUNCHER, &patched));
        assert!(!has_marker(LAUNCHER));
    }

    #[test]
    fn test_marker_insertion_is_idempotent() {
        let rule = marker_rule();
        let (once, _) = rule.apply_to_str(LAUNCHER).unwrap();
        let (twice, _) = rule.apply_to_str(&once).unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn test_validation_rejects_broken_launchers() {
        assert!(validate_polyglot("#!/usr/bin/env ruby\n").is_err());
        assert!(validate_polyglot("#!/bin/sh\nexec ruby -x \"$0\"\n").is_err());
        assert!(validate_polyglot("#!/bin/sh\necho\n#!/usr/bin/env ruby\nputs 1\n").is_err());

        let tampered = LAUNCHER.replace("exec \"$bindir/ruby\"", "exec \"$bindir/irb\"");
        assert!(!interpretations_preserved(LAUNCHER, &tampered));
    }
}
