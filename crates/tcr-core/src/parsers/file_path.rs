//! Extracts file paths an agent claims to have touched from free-form text,
//! then validates those claims against the sandbox's actual modified-file
//! list.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileParseResult {
    pub extracted_paths: Vec<String>,
    pub validated_paths: Vec<String>,
    pub missing_paths: Vec<String>,
    pub unexpected_paths: Vec<String>,
    pub warnings: Vec<String>,
    pub valid: bool,
}

/// Extensions recognized for rule 3 (standalone tokens), longest first so
/// e.g. `.tsx` is preferred over `.ts`.
const RECOGNIZED_EXTENSIONS: &[&str] = &[
    ".tsx", ".jsx", ".rs", ".go", ".py", ".rb", ".ts", ".js", ".md", ".toml", ".yaml", ".yml",
    ".json",
];

pub fn extract_and_validate(agent_text: &str, actual_modified: &[String]) -> FileParseResult {
    let extracted = extract_paths(agent_text);
    validate(extracted, actual_modified)
}

fn extract_paths(text: &str) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    let mut seen = std::collections::HashSet::new();

    for line in text.lines() {
        if let Some(path) = extract_file_prefix(line) {
            push_unique(&mut out, &mut seen, path);
            continue;
        }
        if let Some(path) = extract_verb_prefix(line) {
            push_unique(&mut out, &mut seen, path);
            continue;
        }
        for token in line.split_whitespace() {
            let cleaned = token.trim_matches(|c: char| {
                c == ',' || c == '.' || c == ')' || c == '(' || c == '`' || c == '\''
            });
            if let Some(ext) = matching_extension(cleaned) {
                if cleaned.len() > ext.len() {
                    push_unique(&mut out, &mut seen, cleaned.to_string());
                }
            }
        }
    }
    out
}

fn extract_file_prefix(line: &str) -> Option<String> {
    let lower = line.trim_start();
    let lowered = lower.to_lowercase();
    if let Some(rest) = lowered.strip_prefix("file:") {
        let offset = lower.len() - rest.len();
        return Some(lower[offset..].trim().to_string());
    }
    None
}

fn extract_verb_prefix(line: &str) -> Option<String> {
    const VERBS: &[&str] = &["modified:", "created:", "updated:", "changed:"];
    let trimmed = line.trim_start();
    let lowered = trimmed.to_lowercase();
    for verb in VERBS {
        if let Some(rest) = lowered.strip_prefix(verb) {
            let offset = trimmed.len() - rest.len();
            return Some(trimmed[offset..].trim().to_string());
        }
    }
    None
}

/// Returns the matched recognized extension, longest-first, if any.
fn matching_extension(token: &str) -> Option<&'static str> {
    if !(token.contains('/') || token.contains('\\') || token.contains('.')) {
        return None;
    }
    if token.chars().any(char::is_whitespace) {
        return None;
    }
    RECOGNIZED_EXTENSIONS
        .iter()
        .find(|ext| token.to_lowercase().ends_with(*ext))
        .copied()
}

fn push_unique(out: &mut Vec<String>, seen: &mut std::collections::HashSet<String>, path: String) {
    if path.is_empty() {
        return;
    }
    if seen.insert(path.clone()) {
        out.push(path);
    }
}

fn validate(extracted: Vec<String>, actual_modified: &[String]) -> FileParseResult {
    let mut validated = Vec::new();
    let mut missing = Vec::new();
    let mut warnings = Vec::new();
    let mut matched_actual: std::collections::HashSet<usize> = std::collections::HashSet::new();

    for path in &extracted {
        if let Some(idx) = actual_modified.iter().position(|a| a == path) {
            matched_actual.insert(idx);
            validated.push(path.clone());
            continue;
        }
        if let Some(idx) = actual_modified.iter().position(|a| suffix_match(a, path)) {
            matched_actual.insert(idx);
            validated.push(path.clone());
            warnings.push(format!(
                "path {path:?} matched actual file {:?} by suffix only",
                actual_modified[idx]
            ));
            continue;
        }
        missing.push(path.clone());
    }

    let mut unexpected: Vec<String> = actual_modified
        .iter()
        .enumerate()
        .filter(|(i, _)| !matched_actual.contains(i))
        .map(|(_, p)| p.clone())
        .collect();

    if extracted.is_empty() && !actual_modified.is_empty() {
        warnings.push(
            "no file paths extracted from agent output; falling back to sandbox-reported modifications"
                .to_string(),
        );
        validated = actual_modified.to_vec();
        unexpected.clear();
    } else if !unexpected.is_empty() {
        warnings.push(format!(
            "{} actual modified file(s) not mentioned by the agent",
            unexpected.len()
        ));
    }

    let valid = !validated.is_empty() || !unexpected.is_empty();

    FileParseResult {
        extracted_paths: extracted,
        validated_paths: validated,
        missing_paths: missing,
        unexpected_paths: unexpected,
        warnings,
        valid,
    }
}

fn suffix_match(actual: &str, extracted: &str) -> bool {
    actual == extracted || actual.ends_with(&format!("/{extracted}"))
}

/// Glob-match a path, falling back to a basename match if the full-path
/// match misses.
pub fn match_pattern(path: &str, pattern: &str) -> bool {
    if glob_match(pattern, path) {
        return true;
    }
    let basename = path.rsplit('/').next().unwrap_or(path);
    glob_match(pattern, basename)
}

/// Minimal glob matcher supporting `*` (any run of characters, no `/`
/// crossing unless the pattern itself contains `/`) and `**` (any run
/// including `/`), plus literal characters. Sufficient for the doc/config
/// globs used by the bypass classifier.
fn glob_match(pattern: &str, text: &str) -> bool {
    glob_match_inner(pattern.as_bytes(), text.as_bytes())
}

fn glob_match_inner(pattern: &[u8], text: &[u8]) -> bool {
    if pattern.is_empty() {
        return text.is_empty();
    }
    if pattern[0] == b'*' {
        if pattern.len() >= 2 && pattern[1] == b'*' {
            let rest = &pattern[2..];
            for i in 0..=text.len() {
                if glob_match_inner(rest, &text[i..]) {
                    return true;
                }
            }
            return false;
        }
        for i in 0..=text.len() {
            if text[..i].contains(&b'/') {
                break;
            }
            if glob_match_inner(&pattern[1..], &text[i..]) {
                return true;
            }
        }
        false
    } else if !text.is_empty() && pattern[0] == text[0] {
        glob_match_inner(&pattern[1..], &text[1..])
    } else {
        false
    }
}
