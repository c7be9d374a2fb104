//! Line-scanning parser for test runner output.
//!
//! Recognizes the `go test -v` style of output (`=== RUN`, `--- FAIL:`,
//! `file:line: message`), which is the lowest common denominator most test
//! runners can be coerced into emitting, and is what VerifyRED/VerifyGREEN
//! feed back into GenImpl retry prompts.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestFailure {
    pub test_name: String,
    pub file: String,
    pub line: u32,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestParseResult {
    pub has_failures: bool,
    pub failures: Vec<TestFailure>,
    pub raw_summary: String,
}

/// Parse raw test output into failures plus a feedback-ready summary.
///
/// Empty input always yields `"All tests passed"`. Non-empty input with no
/// recognized `--- FAIL:` lines also yields that summary -- this parser
/// never invents a failure that isn't explicitly marked.
pub fn parse_test_output(output: &str) -> TestParseResult {
    let mut failures = Vec::new();
    let mut current_name: Option<String> = None;

    let lines: Vec<&str> = output.lines().collect();
    let mut i = 0;
    while i < lines.len() {
        let line = lines[i];
        let trimmed = line.trim_start();

        if let Some(rest) = trimmed.strip_prefix("=== RUN") {
            current_name = Some(rest.trim().trim_start_matches(':').trim().to_string());
            i += 1;
            continue;
        }

        if let Some(rest) = trimmed.strip_prefix("--- FAIL:") {
            let name = rest
                .trim()
                .split_whitespace()
                .next()
                .map(str::to_string)
                .or_else(|| current_name.clone())
                .unwrap_or_else(|| "unknown".to_string());

            // Body lines: `<file>:<line>: <message>`, indented under the
            // failure header. Collect all that match before the next
            // recognized marker.
            let mut j = i + 1;
            let mut found_body = false;
            while j < lines.len() {
                let body = lines[j].trim();
                if body.starts_with("=== RUN") || body.starts_with("--- FAIL:") || body == "FAIL" {
                    break;
                }
                if let Some((file, line_no, message)) = parse_file_line_message(body) {
                    failures.push(TestFailure {
                        test_name: name.clone(),
                        file,
                        line: line_no,
                        message,
                    });
                    found_body = true;
                    j += 1;
                    // Only the first body line per failure is captured as
                    // the canonical location; continue scanning past any
                    // additional detail lines until the next marker.
                    break;
                }
                j += 1;
            }
            if !found_body {
                failures.push(TestFailure {
                    test_name: name,
                    file: String::new(),
                    line: 0,
                    message: "test failed (no location reported)".to_string(),
                });
            }
            i = j;
            continue;
        }

        i += 1;
    }

    let has_failures = !failures.is_empty();
    let raw_summary = if !has_failures {
        "All tests passed".to_string()
    } else {
        let mut s = String::from("Test Failures:\n");
        for f in &failures {
            s.push_str(&format!(
                "- {} ({}:{}): {}\n",
                f.test_name, f.file, f.line, f.message
            ));
        }
        s
    };

    TestParseResult {
        has_failures,
        failures,
        raw_summary,
    }
}

/// Match `<file>:<line>: <message>`, tolerating paths with colons in
/// Windows-style drive prefixes by requiring the line-number group to be
/// all-digits and bounded by colons.
fn parse_file_line_message(line: &str) -> Option<(String, u32, String)> {
    let first_colon = line.find(':')?;
    let rest = &line[first_colon + 1..];
    let second_colon = rest.find(':')?;
    let line_no_str = &rest[..second_colon];
    let line_no: u32 = line_no_str.trim().parse().ok()?;
    let file = &line[..first_colon];
    if file.is_empty() {
        return None;
    }
    let message = rest[second_colon + 1..].trim().to_string();
    Some((file.to_string(), line_no, message))
}
