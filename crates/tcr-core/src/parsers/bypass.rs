//! Classifies a changed-file set as eligible for gate bypass.
//!
//! Eligible bypasses skip the five code-centric gates (GenTest, LintTest,
//! VerifyRED, GenImpl, VerifyGREEN) because there is no code for them to
//! meaningfully exercise.

use serde::{Deserialize, Serialize};

use super::file_path::match_pattern;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BypassType {
    None,
    Documentation,
    Configuration,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BypassDecision {
    pub bypass_type: BypassType,
    pub eligible: bool,
    pub skipped_gates: Vec<String>,
}

const DOC_GLOBS: &[&str] = &["*.md", "docs/**", "CHANGELOG*", "README*", "LICENSE*"];
const CONFIG_GLOBS: &[&str] = &[
    "*.yaml", "*.yml", "*.json", "*.toml", "*.ini", ".env*", "config/**",
];

const CODE_GATES: &[&str] = &["GenTest", "LintTest", "VerifyRED", "GenImpl", "VerifyGREEN"];

/// Classify a set of changed paths. The empty set is never eligible -- a
/// bypass requires at least one changed file all of which match one glob
/// family.
pub fn classify(changed_paths: &[String]) -> BypassDecision {
    if changed_paths.is_empty() {
        return BypassDecision {
            bypass_type: BypassType::None,
            eligible: false,
            skipped_gates: Vec::new(),
        };
    }

    if changed_paths
        .iter()
        .all(|p| DOC_GLOBS.iter().any(|g| match_pattern(p, g)))
    {
        return eligible_decision(BypassType::Documentation);
    }

    if changed_paths
        .iter()
        .all(|p| CONFIG_GLOBS.iter().any(|g| match_pattern(p, g)))
    {
        return eligible_decision(BypassType::Configuration);
    }

    BypassDecision {
        bypass_type: BypassType::None,
        eligible: false,
        skipped_gates: Vec::new(),
    }
}

fn eligible_decision(bypass_type: BypassType) -> BypassDecision {
    BypassDecision {
        bypass_type,
        eligible: true,
        skipped_gates: CODE_GATES.iter().map(|s| s.to_string()).collect(),
    }
}
