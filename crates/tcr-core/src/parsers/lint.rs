//! Line-scanning parser for lint tool output.
//!
//! Recognizes the common `<file>:<line>: <severity>: <message>` shape
//! shared by clippy, eslint --format unix, and most `file:line:col:
//! message` style linters once the column is dropped. Lines that don't
//! match are ignored rather than treated as failures.

use crate::types::LintIssue;

/// Parse raw lint output into issues. Severity defaults to `"warning"`
/// when the line doesn't name one explicitly.
pub fn parse_lint_output(output: &str) -> Vec<LintIssue> {
    output.lines().filter_map(parse_issue_line).collect()
}

/// Whether any parsed issue is error-severity. `LintTest` fails the gate
/// on this, regardless of the tool's own exit code.
pub fn has_error_severity(issues: &[LintIssue]) -> bool {
    issues.iter().any(|i| i.severity.eq_ignore_ascii_case("error"))
}

fn parse_issue_line(line: &str) -> Option<LintIssue> {
    let first_colon = line.find(':')?;
    let file = &line[..first_colon];
    if file.is_empty() {
        return None;
    }
    let rest = &line[first_colon + 1..];
    let second_colon = rest.find(':')?;
    let line_no: u32 = rest[..second_colon].trim().parse().ok()?;
    let remainder = rest[second_colon + 1..].trim();

    let (severity, message) = match remainder.split_once(':') {
        Some((candidate, msg)) if is_known_severity(candidate.trim()) => {
            (candidate.trim().to_lowercase(), msg.trim().to_string())
        }
        _ => ("warning".to_string(), remainder.to_string()),
    };

    Some(LintIssue {
        file: file.to_string(),
        line: line_no,
        severity,
        message,
    })
}

fn is_known_severity(s: &str) -> bool {
    matches!(s.to_lowercase().as_str(), "error" | "warning" | "warn" | "info" | "note")
}
