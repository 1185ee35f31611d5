//! Output formatting for verification results (human/JSON/GitHub).

use std::fmt::Write as _;

use super::types::{OutputFormat, VerifyResult, VerifyStep};

fn status_label(step: &VerifyStep) -> &'static str {
    if step.skipped {
        "[SKIP]"
    } else if step.passed {
        "[OK]"
    } else {
        "[FAIL]"
    }
}

/// Format verification result for display (human-readable).
pub fn format_result(result: &VerifyResult, verbose: bool) -> String {
    let mut output = String::new();

    let _ = writeln!(output, "Verify: {} v{}", result.package, result.version);
    if let Some(platform) = &result.platform {
        let _ = writeln!(output, "Platform: {}", platform);
    }
    let _ = writeln!(output, "{}", "=".repeat(50));
    let _ = writeln!(output);

    for step in &result.steps {
        let _ = write!(output, "  {} {}", status_label(step), step.name);
        if let Some(kind) = step.failure {
            let _ = write!(output, " [{:?}]", kind);
        }
        let _ = writeln!(output, " ({:.2?})", step.duration);

        if verbose || !step.passed {
            for line in step.message.lines() {
                let _ = writeln!(output, "      {}", line);
            }
        }
        if !step.skipped {
            for warning in &step.warnings {
                let _ = writeln!(output, "      Warning: {}", warning);
            }
        }
    }

    let _ = writeln!(output);

    let status = if result.passed { "PASSED" } else { "FAILED" };
    let _ = write!(
        output,
        "Result: {} ({}/{} steps passed",
        status,
        result.passed_count(),
        result.steps.len()
    );
    if result.skipped_count() > 0 {
        let _ = write!(output, ", {} skipped", result.skipped_count());
    }
    let _ = writeln!(output, ")");
    let _ = writeln!(output, "Total time: {:.2?}", result.total_duration);

    let warnings = result.warnings();
    if !warnings.is_empty() {
        let _ = writeln!(output, "\nWarnings:");
        for warning in warnings {
            let _ = writeln!(output, "  - {}", warning);
        }
    }

    output
}

/// Format verification result as JSON.
pub fn format_result_json(result: &VerifyResult) -> String {
    serde_json::to_string_pretty(result)
        .unwrap_or_else(|e| format!(r#"{{"error": "Failed to serialize result: {}"}}"#, e))
}

fn escape_annotation(text: &str) -> String {
    text.replace('%', "%25").replace('\r', "").replace('\n', "%0A")
}

/// Format verification result for GitHub Actions.
///
/// Outputs `::error::`/`::warning::` annotations followed by a markdown job
/// summary.
pub fn format_result_github_actions(result: &VerifyResult) -> String {
    let mut output = String::new();

    for step in &result.steps {
        if !step.passed {
            let kind = step
                .failure
                .map(|k| format!("{:?}", k).to_lowercase())
                .unwrap_or_default();
            let _ = writeln!(
                output,
                "::error title={} ({})::{}",
                step.name,
                kind,
                escape_annotation(&step.message)
            );
        }
        for warning in &step.warnings {
            let _ = writeln!(
                output,
                "::warning title={}::{}",
                step.name,
                escape_annotation(warning)
            );
        }
    }

    let _ = writeln!(output, "::group::Verification Summary");
    let _ = writeln!(output);
    let _ = writeln!(output, "## {} v{}", result.package, result.version);
    let _ = writeln!(output);
    if let Some(platform) = &result.platform {
        let _ = writeln!(output, "**Platform:** {}", platform);
        let _ = writeln!(output);
    }

    let _ = writeln!(output, "| Step | Status | Duration |");
    let _ = writeln!(output, "|------|--------|----------|");
    for step in &result.steps {
        let status = if step.skipped {
            ":fast_forward:"
        } else if step.passed {
            ":white_check_mark:"
        } else {
            ":x:"
        };
        let _ = writeln!(output, "| {} | {} | {:.2?} |", step.name, status, step.duration);
    }
    let _ = writeln!(output);

    let (emoji, status) = if result.passed {
        (":heavy_check_mark:", "PASSED")
    } else {
        (":x:", "FAILED")
    };
    let _ = writeln!(
        output,
        "**Result:** {} {} ({}/{} steps passed)",
        emoji,
        status,
        result.passed_count(),
        result.steps.len()
    );
    let _ = writeln!(output, "**Total time:** {:.2?}", result.total_duration);

    let failed: Vec<_> = result.steps.iter().filter(|s| !s.passed).collect();
    if !failed.is_empty() {
        let _ = writeln!(output);
        let _ = writeln!(output, "### Failed Steps");
        for step in failed {
            let _ = writeln!(output);
            let _ = writeln!(output, "<details>");
            let _ = writeln!(output, "<summary>{}</summary>", step.name);
            let _ = writeln!(output);
            let _ = writeln!(output, "```");
            let _ = writeln!(output, "{}", step.message);
            let _ = writeln!(output, "```");
            let _ = writeln!(output);
            let _ = writeln!(output, "</details>");
        }
    }

    let _ = writeln!(output, "::endgroup::");

    output
}

/// Format the result according to the specified output format.
pub fn format_result_for_output(result: &VerifyResult, format: OutputFormat, verbose: bool) -> String {
    match format {
        OutputFormat::Human => format_result(result, verbose),
        OutputFormat::Json => format_result_json(result),
        OutputFormat::Github => format_result_github_actions(result),
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::ops::verify::types::FailureKind;

    fn sample() -> VerifyResult {
        let mut result = VerifyResult::new("portable-ruby", "3.4.5", "/tmp/ruby");
        result.add_step(VerifyStep::pass("version", "3.4.5", Duration::ZERO));
        result.add_step(VerifyStep::skip("open-uri", "network checks disabled"));
        result.add_step(VerifyStep::fail(
            "linkage",
            FailureKind::Portability,
            "bin/ruby -> /home/linuxbrew/.linuxbrew/lib/libyaml.so\nsecond line",
            Duration::ZERO,
        ));
        result
    }

    #[test]
    fn test_human_output() {
        let text = format_result(&sample(), false);
        assert!(text.contains("[SKIP] open-uri"));
        assert!(text.contains("[FAIL] linkage [Portability]"));
        assert!(text.contains("Result: FAILED (1/3 steps passed, 1 skipped)"));
    }

    #[test]
    fn test_github_annotations_escape_newlines() {
        let text = format_result_github_actions(&sample());
        assert!(text.contains("::error title=linkage (portability)::bin/ruby"));
        assert!(text.contains("%0Asecond line"));
        assert!(text.contains("::warning title=open-uri::network checks disabled"));
    }

    #[test]
    fn test_json_output() {
        let value: serde_json::Value = serde_json::from_str(&format_result_json(&sample())).unwrap();
        assert_eq!(value["passed"], false);
        assert_eq!(value["steps"][2]["failure"], "portability");
        assert_eq!(value["steps"][1]["skipped"], true);
    }
}
