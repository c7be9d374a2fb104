//! Shared data model for the gated TCR pipeline.
//!
//! Every type here is a plain serializable value: no live process handles,
//! sockets, or trait objects. Values cross suspension points in the durable
//! runtime, so they must round-trip through `serde_json` untouched.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Handle to a provisioned execution cell, reconstructible from scalars.
///
/// The live resources (the listening server, the worktree's open file
/// descriptors) are never part of this struct -- only the identifiers
/// needed to find them again: `server_pid` and `worktree_path`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CellBootstrap {
    pub cell_id: String,
    pub port: u16,
    pub worktree_id: String,
    pub worktree_path: String,
    pub base_url: String,
    pub server_pid: u32,
}

/// Caller-supplied request to run the Enhanced TCR workflow on a cell.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TcrInput {
    pub cell_id: String,
    pub branch: String,
    pub task_id: String,
    pub description: String,
    pub acceptance_criteria: String,
    #[serde(default = "default_reviewers_count")]
    pub reviewers_count: u32,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_max_fix_attempts")]
    pub max_fix_attempts: u32,
    /// Optional hint: files already known to have changed, consulted by the
    /// bypass classifier. When absent the classifier is not run and no gate
    /// is bypassed.
    #[serde(default)]
    pub changed_files: Option<Vec<String>>,
}

fn default_reviewers_count() -> u32 {
    3
}
fn default_max_retries() -> u32 {
    3
}
fn default_max_fix_attempts() -> u32 {
    3
}

/// Extra configuration specific to the parallel-fix TCR variant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParallelTcrConfig {
    /// Number of sibling fix attempts to fan out on VerifyGREEN failure.
    pub fan_out: u32,
    /// Whether each fan-out attempt gets its own cloned cell, or whether all
    /// attempts serialize through the same cell. Left open by the
    /// specification; the reference runtime supports both.
    pub clone_cells: bool,
}

impl Default for ParallelTcrConfig {
    fn default() -> Self {
        Self {
            fan_out: 3,
            clone_cells: true,
        }
    }
}

/// The TCR gate sequence's state. Transitions are strictly monotonic: once
/// advanced past a state, the workflow never returns to an earlier one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowState {
    Bootstrap,
    GenTest,
    LintTest,
    VerifyRed,
    GenImpl,
    VerifyGreen,
    MultiReview,
    Commit,
    Complete,
    Failed,
}

impl WorkflowState {
    /// Order index used to assert monotonic advancement. `Failed` has no
    /// fixed position: it is reachable from any non-terminal state.
    fn order(self) -> Option<u8> {
        match self {
            WorkflowState::Bootstrap => Some(0),
            WorkflowState::GenTest => Some(1),
            WorkflowState::LintTest => Some(2),
            WorkflowState::VerifyRed => Some(3),
            WorkflowState::GenImpl => Some(4),
            WorkflowState::VerifyGreen => Some(5),
            WorkflowState::MultiReview => Some(6),
            WorkflowState::Commit => Some(7),
            WorkflowState::Complete => Some(8),
            WorkflowState::Failed => None,
        }
    }

    /// Whether `self -> next` is a legal transition: strictly forward, or
    /// into the terminal `Failed` state from anywhere non-terminal.
    pub fn can_advance_to(self, next: WorkflowState) -> bool {
        if next == WorkflowState::Failed {
            return self != WorkflowState::Complete && self != WorkflowState::Failed;
        }
        match (self.order(), next.order()) {
            (Some(a), Some(b)) => b > a,
            _ => false,
        }
    }
}

impl fmt::Display for WorkflowState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            WorkflowState::Bootstrap => "bootstrap",
            WorkflowState::GenTest => "gen_test",
            WorkflowState::LintTest => "lint_test",
            WorkflowState::VerifyRed => "verify_red",
            WorkflowState::GenImpl => "gen_impl",
            WorkflowState::VerifyGreen => "verify_green",
            WorkflowState::MultiReview => "multi_review",
            WorkflowState::Commit => "commit",
            WorkflowState::Complete => "complete",
            WorkflowState::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// One reviewer's verdict on a completed implementation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReviewVote {
    pub reviewer_name: String,
    pub review_type: ReviewType,
    pub vote: Vote,
    pub feedback: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewType {
    Testing,
    Functional,
    Architecture,
}

impl ReviewType {
    /// Round-robin assignment for `reviewersCount` parallel reviewers.
    pub fn for_index(index: u32) -> Self {
        match index % 3 {
            0 => ReviewType::Testing,
            1 => ReviewType::Functional,
            _ => ReviewType::Architecture,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Vote {
    Approve,
    RequestChange,
    Reject,
}

/// Outcome of a review fan-out: which branch of §4.5 step 6 fired.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReviewAggregate {
    /// Every vote was APPROVE.
    Pass,
    /// At least one REJECT: terminal, no further retry.
    TerminalReject,
    /// No REJECT, but at least one REQUEST_CHANGE: retry with this feedback.
    Retry { feedback: String },
}

/// Aggregate the votes of a MultiReview fan-out per the unanimous-approve /
/// any-reject / else-retry rule. REJECT always wins over REQUEST_CHANGE.
pub fn aggregate_reviews(votes: &[ReviewVote]) -> ReviewAggregate {
    if votes.iter().any(|v| v.vote == Vote::Reject) {
        return ReviewAggregate::TerminalReject;
    }
    if votes.iter().all(|v| v.vote == Vote::Approve) {
        return ReviewAggregate::Pass;
    }
    let feedback = votes
        .iter()
        .filter(|v| v.vote == Vote::RequestChange)
        .map(|v| format!("### {} ({:?})\n{}", v.reviewer_name, v.review_type, v.feedback))
        .collect::<Vec<_>>()
        .join("\n\n");
    ReviewAggregate::Retry { feedback }
}

/// Parsed result of a test run, the shape the test-failure parser produces.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestResult {
    pub passed: bool,
    pub total: u32,
    pub passed_count: u32,
    pub failed_count: u32,
    pub output: String,
    pub failure_test_names: Vec<String>,
}

/// Lint run outcome.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LintResult {
    pub passed: bool,
    pub issues: Vec<LintIssue>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LintIssue {
    pub file: String,
    pub line: u32,
    pub severity: String,
    pub message: String,
}

/// Outcome of one gate execution.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GateResult {
    pub gate_name: String,
    pub passed: bool,
    pub bypassed: bool,
    pub agent_results: Vec<String>,
    pub duration_ms: u64,
    pub error: Option<String>,
    pub retry_attempts: u32,
    pub test_result: Option<TestResult>,
    pub lint_result: Option<LintResult>,
    pub review_votes: Vec<ReviewVote>,
}

impl GateResult {
    pub fn bypassed(gate_name: &str) -> Self {
        Self {
            gate_name: gate_name.to_string(),
            passed: true,
            bypassed: true,
            ..Default::default()
        }
    }
}

/// Final outcome of a TCR run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TcrResult {
    pub success: bool,
    pub final_state: WorkflowState,
    pub gates: std::collections::BTreeMap<String, GateResult>,
    pub error: Option<String>,
}

/// A node in a DAG workflow: a named shell command with dependencies.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub name: String,
    pub command: String,
    #[serde(default)]
    pub deps: Vec<String>,
}

/// Outcome of a single DAG task's execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskOutcome {
    pub name: String,
    pub success: bool,
    pub output: String,
    pub duration_ms: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn workflow_state_forward_transitions_allowed() {
        assert!(WorkflowState::Bootstrap.can_advance_to(WorkflowState::GenTest));
        assert!(WorkflowState::GenImpl.can_advance_to(WorkflowState::VerifyGreen));
        assert!(WorkflowState::MultiReview.can_advance_to(WorkflowState::Commit));
    }

    #[test]
    fn workflow_state_backward_transitions_rejected() {
        assert!(!WorkflowState::VerifyGreen.can_advance_to(WorkflowState::GenTest));
        assert!(!WorkflowState::Commit.can_advance_to(WorkflowState::Bootstrap));
        assert!(!WorkflowState::GenImpl.can_advance_to(WorkflowState::GenImpl));
    }

    #[test]
    fn workflow_state_can_always_fail_except_from_terminal() {
        assert!(WorkflowState::GenTest.can_advance_to(WorkflowState::Failed));
        assert!(WorkflowState::Bootstrap.can_advance_to(WorkflowState::Failed));
        assert!(!WorkflowState::Complete.can_advance_to(WorkflowState::Failed));
        assert!(!WorkflowState::Failed.can_advance_to(WorkflowState::Failed));
    }

    #[test]
    fn aggregate_reviews_unanimous_approve_passes() {
        let votes = vec![vote("a", Vote::Approve), vote("b", Vote::Approve)];
        assert_eq!(aggregate_reviews(&votes), ReviewAggregate::Pass);
    }

    #[test]
    fn aggregate_reviews_any_reject_is_terminal() {
        let votes = vec![
            vote("a", Vote::Approve),
            vote("b", Vote::Reject),
            vote("c", Vote::RequestChange),
        ];
        assert_eq!(aggregate_reviews(&votes), ReviewAggregate::TerminalReject);
    }

    #[test]
    fn aggregate_reviews_request_change_without_reject_retries() {
        let votes = vec![vote("a", Vote::Approve), vote("b", Vote::RequestChange)];
        match aggregate_reviews(&votes) {
            ReviewAggregate::Retry { feedback } => assert!(feedback.contains('b')),
            other => panic!("expected Retry, got {other:?}"),
        }
    }

    fn vote(name: &str, vote: Vote) -> ReviewVote {
        ReviewVote {
            reviewer_name: name.to_string(),
            review_type: ReviewType::Testing,
            vote,
            feedback: format!("feedback from {name}"),
        }
    }
}
