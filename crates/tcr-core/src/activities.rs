//! C4: Enhanced gate activities.
//!
//! Every gate activity here is invoked under [`crate::policy::RetryPolicy::NON_IDEMPOTENT`]
//! by the orchestrator: the activities themselves make no retry decision,
//! they run once and report what happened. The orchestrator interprets the
//! [`crate::types::GateResult`] and decides whether/how to retry.

use std::sync::Arc;
use std::time::Instant;

use anyhow::Result;

use crate::capabilities::{AgentClient, CellProvisioner};
use crate::parsers::file_path;
use crate::parsers::test_failure::parse_test_output;
use crate::types::{CellBootstrap, GateResult, LintResult, TestResult};

pub struct GateActivities {
    agent: Arc<dyn AgentClient>,
    cell_provisioner: Arc<dyn CellProvisioner>,
}

impl GateActivities {
    pub fn new(agent: Arc<dyn AgentClient>, cell_provisioner: Arc<dyn CellProvisioner>) -> Self {
        Self {
            agent,
            cell_provisioner,
        }
    }

    /// GenTest: ask the agent to write failing tests for the acceptance
    /// criteria. Returns the files it claims to have written.
    pub async fn gen_test(
        &self,
        cell: &CellBootstrap,
        description: &str,
        acceptance_criteria: &str,
        previous_feedback: Option<&str>,
    ) -> Result<(GateResult, Vec<String>)> {
        let started = Instant::now();
        let mut prompt = format!(
            "Write failing tests for the following task.\n\nTask: {description}\nAcceptance criteria: {acceptance_criteria}\n"
        );
        if let Some(feedback) = previous_feedback {
            prompt.push_str(&format!("\nPrevious attempt feedback:\n{feedback}\n"));
        }

        let response = self.agent.invoke(cell, &prompt).await;
        let mut result = GateResult {
            gate_name: "GenTest".to_string(),
            duration_ms: started.elapsed().as_millis() as u64,
            ..Default::default()
        };

        match response {
            Ok(resp) => {
                let parsed = file_path::extract_and_validate(&resp.response, &resp.files_modified);
                result.passed = parsed.valid;
                result.agent_results = parsed.validated_paths.clone();
                if !parsed.valid {
                    result.error = Some("no test files were identified in the agent output".to_string());
                }
                Ok((result, parsed.validated_paths))
            }
            Err(e) => {
                result.passed = false;
                result.error = Some(e.to_string());
                Ok((result, Vec::new()))
            }
        }
    }

    /// LintTest: run the configured lint command over the newly written
    /// test files. Fails if the tool itself reports failure, or if any
    /// parsed issue has `severity=error`.
    pub async fn lint_test(&self, cell: &CellBootstrap) -> Result<GateResult> {
        let started = Instant::now();
        let (tool_passed, output) = self.cell_provisioner.run_lint(cell).await?;
        let issues = crate::parsers::lint::parse_lint_output(&output);
        let has_errors = crate::parsers::lint::has_error_severity(&issues);
        let passed = tool_passed && !has_errors;
        let lint = LintResult { passed, issues };
        Ok(GateResult {
            gate_name: "LintTest".to_string(),
            passed,
            duration_ms: started.elapsed().as_millis() as u64,
            error: if passed {
                None
            } else if has_errors {
                Some("lint reported error-severity issues".to_string())
            } else {
                Some(output.clone())
            },
            lint_result: Some(lint),
            ..Default::default()
        })
    }

    /// VerifyRED: the new tests must exist and must currently fail. A fully
    /// green result here is itself a failure -- it means the tests do not
    /// exercise anything.
    pub async fn verify_red(&self, cell: &CellBootstrap) -> Result<GateResult> {
        let started = Instant::now();
        let (all_green, output) = self.cell_provisioner.run_tests(cell).await?;
        let parsed = parse_test_output(&output);
        let test_result = to_test_result(&parsed, !all_green);

        let passed = parsed.has_failures;
        Ok(GateResult {
            gate_name: "VerifyRED".to_string(),
            passed,
            duration_ms: started.elapsed().as_millis() as u64,
            error: if passed {
                None
            } else {
                Some("expected at least one failing test, but the suite was green".to_string())
            },
            test_result: Some(test_result),
            ..Default::default()
        })
    }

    /// GenImpl: ask the agent to implement the feature. When
    /// `test_failure_summary` is non-empty, it is appended under the
    /// literal header `"Test Failures:"` to drive convergence.
    pub async fn gen_impl(
        &self,
        cell: &CellBootstrap,
        description: &str,
        test_failure_summary: Option<&str>,
        previous_impl_feedback: Option<&str>,
    ) -> Result<GateResult> {
        let started = Instant::now();
        let mut prompt = format!("Implement the following task so the tests pass.\n\nTask: {description}\n");
        if let Some(summary) = test_failure_summary {
            if !summary.is_empty() {
                prompt.push_str(&format!("\nTest Failures:\n{summary}\n"));
            }
        }
        if let Some(feedback) = previous_impl_feedback {
            prompt.push_str(&format!("\nReviewer feedback from the previous attempt:\n{feedback}\n"));
        }

        let response = self.agent.invoke(cell, &prompt).await;
        let mut result = GateResult {
            gate_name: "GenImpl".to_string(),
            duration_ms: started.elapsed().as_millis() as u64,
            ..Default::default()
        };
        match response {
            Ok(resp) => {
                result.passed = true;
                result.agent_results = resp.files_modified;
            }
            Err(e) => {
                result.passed = false;
                result.error = Some(e.to_string());
            }
        }
        Ok(result)
    }

    /// VerifyGREEN: the full suite must pass with zero failures.
    pub async fn verify_green(&self, cell: &CellBootstrap) -> Result<GateResult> {
        let started = Instant::now();
        let (passed, output) = self.cell_provisioner.run_tests(cell).await?;
        let parsed = parse_test_output(&output);
        let test_result = to_test_result(&parsed, passed);

        Ok(GateResult {
            gate_name: "VerifyGREEN".to_string(),
            passed: !parsed.has_failures,
            duration_ms: started.elapsed().as_millis() as u64,
            error: if parsed.has_failures {
                Some(parsed.raw_summary.clone())
            } else {
                None
            },
            test_result: Some(test_result),
            ..Default::default()
        })
    }

    /// FixFromFeedback: a narrow agent call targeted at parsed failures,
    /// used by the parallel-fix fan-out.
    pub async fn fix_from_feedback(
        &self,
        cell: &CellBootstrap,
        failure_summary: &str,
    ) -> Result<GateResult> {
        let started = Instant::now();
        let prompt = format!("Fix the following test failures:\n\n{failure_summary}\n");
        let response = self.agent.invoke(cell, &prompt).await;
        let mut result = GateResult {
            gate_name: "FixFromFeedback".to_string(),
            duration_ms: started.elapsed().as_millis() as u64,
            ..Default::default()
        };
        match response {
            Ok(resp) => {
                result.passed = true;
                result.agent_results = resp.files_modified;
            }
            Err(e) => {
                result.passed = false;
                result.error = Some(e.to_string());
            }
        }
        Ok(result)
    }

    /// MultiReview: one reviewer's vote, assigned a review type by index.
    pub async fn multi_review(
        &self,
        cell: &CellBootstrap,
        reviewer_index: u32,
        review_type: crate::types::ReviewType,
        implementation_summary: &str,
    ) -> Result<crate::types::ReviewVote> {
        let prompt = format!(
            "Review the following implementation as a {review_type:?} reviewer.\n\n{implementation_summary}\n\nRespond with APPROVE, REQUEST_CHANGE, or REJECT and your reasoning."
        );
        let response = self.agent.invoke(cell, &prompt).await?;
        let vote = classify_vote(&response.response);
        Ok(crate::types::ReviewVote {
            reviewer_name: format!("reviewer-{reviewer_index}"),
            review_type,
            vote,
            feedback: response.response,
        })
    }
}

fn to_test_result(parsed: &crate::parsers::test_failure::TestParseResult, passed: bool) -> TestResult {
    TestResult {
        passed,
        total: parsed.failures.len() as u32,
        passed_count: 0,
        failed_count: parsed.failures.len() as u32,
        output: parsed.raw_summary.clone(),
        failure_test_names: parsed.failures.iter().map(|f| f.test_name.clone()).collect(),
    }
}

fn classify_vote(text: &str) -> crate::types::Vote {
    let upper = text.to_uppercase();
    if upper.contains("REJECT") {
        crate::types::Vote::Reject
    } else if upper.contains("REQUEST_CHANGE") || upper.contains("REQUEST CHANGE") {
        crate::types::Vote::RequestChange
    } else {
        crate::types::Vote::Approve
    }
}

/// Lock acquisition/release, run under FileConflict/Cleanup policy
/// respectively by the orchestrator.
pub struct LockActivities {
    manager: Arc<dyn crate::capabilities::LockManager>,
}

impl LockActivities {
    pub fn new(manager: Arc<dyn crate::capabilities::LockManager>) -> Self {
        Self { manager }
    }

    pub async fn acquire_file_locks(&self, patterns: &[String]) -> Result<Vec<String>> {
        self.manager.acquire(patterns).await
    }

    pub async fn release_file_locks(&self, paths: &[String]) -> Result<()> {
        if let Err(e) = self.manager.release(paths).await {
            tracing::warn!(error = %e, "failed to release file locks; leaving for the reaper");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    struct FakeAgent {
        response: String,
        files: Vec<String>,
        fail: bool,
    }

    #[async_trait]
    impl AgentClient for FakeAgent {
        async fn invoke(
            &self,
            _cell: &CellBootstrap,
            _prompt: &str,
        ) -> Result<crate::capabilities::AgentResponse> {
            if self.fail {
                anyhow::bail!("agent unavailable");
            }
            Ok(crate::capabilities::AgentResponse {
                response: self.response.clone(),
                files_modified: self.files.clone(),
            })
        }
    }

    struct FakeCellProvisioner {
        test_output: String,
        tests_pass: bool,
        lint_output: String,
        lint_passed: bool,
    }

    impl FakeCellProvisioner {
        fn with_tests(test_output: &str, tests_pass: bool) -> Self {
            Self {
                test_output: test_output.to_string(),
                tests_pass,
                lint_output: String::new(),
                lint_passed: true,
            }
        }

        fn with_lint(lint_output: &str, lint_passed: bool) -> Self {
            Self {
                test_output: String::new(),
                tests_pass: true,
                lint_output: lint_output.to_string(),
                lint_passed,
            }
        }
    }

    #[async_trait]
    impl CellProvisioner for FakeCellProvisioner {
        async fn bootstrap(&self, _cell_id: &str, _branch: &str) -> Result<CellBootstrap> {
            unreachable!()
        }
        async fn execute_task(
            &self,
            _cell: &CellBootstrap,
            _prompt: &str,
        ) -> Result<crate::capabilities::TaskExecutionOutcome> {
            unreachable!()
        }
        async fn run_tests(&self, _cell: &CellBootstrap) -> Result<(bool, String)> {
            Ok((self.tests_pass, self.test_output.clone()))
        }
        async fn run_lint(&self, _cell: &CellBootstrap) -> Result<(bool, String)> {
            Ok((self.lint_passed, self.lint_output.clone()))
        }
        async fn commit(&self, _cell: &CellBootstrap, _message: &str) -> Result<()> {
            unreachable!()
        }
        async fn revert(&self, _cell: &CellBootstrap) -> Result<()> {
            unreachable!()
        }
        async fn teardown(&self, _cell: &CellBootstrap) -> Result<()> {
            unreachable!()
        }
        async fn clone_cell(
            &self,
            _cell: &CellBootstrap,
            _new_cell_id: &str,
        ) -> Result<CellBootstrap> {
            unreachable!()
        }
    }

    fn test_cell() -> CellBootstrap {
        CellBootstrap {
            cell_id: "cell-1".to_string(),
            port: 9000,
            worktree_id: "wt-1".to_string(),
            worktree_path: "/tmp/wt-1".to_string(),
            base_url: "http://localhost".to_string(),
            server_pid: 1234,
        }
    }

    #[tokio::test]
    async fn verify_red_passes_when_tests_fail() {
        let activities = GateActivities::new(
            Arc::new(FakeAgent {
                response: String::new(),
                files: vec![],
                fail: false,
            }),
            Arc::new(FakeCellProvisioner {
                test_output: "--- FAIL: TestFoo (0.00s)\n    foo_test.go:1: boom\n".to_string(),
                tests_pass: false,
            }),
        );
        let result = activities.verify_red(&test_cell()).await.unwrap();
        assert!(result.passed);
    }

    #[tokio::test]
    async fn verify_red_fails_when_suite_is_green() {
        let activities = GateActivities::new(
            Arc::new(FakeAgent {
                response: String::new(),
                files: vec![],
                fail: false,
            }),
            Arc::new(FakeCellProvisioner {
                test_output: "PASS\n".to_string(),
                tests_pass: true,
            }),
        );
        let result = activities.verify_red(&test_cell()).await.unwrap();
        assert!(!result.passed);
    }

    #[tokio::test]
    async fn verify_green_passes_when_no_failures() {
        let activities = GateActivities::new(
            Arc::new(FakeAgent {
                response: String::new(),
                files: vec![],
                fail: false,
            }),
            Arc::new(FakeCellProvisioner {
                test_output: "PASS\n".to_string(),
                tests_pass: true,
            }),
        );
        let result = activities.verify_green(&test_cell()).await.unwrap();
        assert!(result.passed);
        assert!(result.error.is_none());
    }

    #[tokio::test]
    async fn verify_green_fails_and_reports_failures() {
        let activities = GateActivities::new(
            Arc::new(FakeAgent {
                response: String::new(),
                files: vec![],
                fail: false,
            }),
            Arc::new(FakeCellProvisioner {
                test_output: "--- FAIL: TestBar (0.00s)\n    bar_test.go:9: nope\n".to_string(),
                tests_pass: false,
            }),
        );
        let result = activities.verify_green(&test_cell()).await.unwrap();
        assert!(!result.passed);
        assert!(result.error.unwrap().contains("Test Failures:"));
    }

    #[tokio::test]
    async fn gen_impl_reports_agent_failure_without_erroring_the_activity() {
        let activities = GateActivities::new(
            Arc::new(FakeAgent {
                response: String::new(),
                files: vec![],
                fail: true,
            }),
            Arc::new(FakeCellProvisioner {
                test_output: String::new(),
                tests_pass: true,
            }),
        );
        let result = activities
            .gen_impl(&test_cell(), "do the thing", None, None)
            .await
            .unwrap();
        assert!(!result.passed);
        assert!(result.error.is_some());
    }

    #[tokio::test]
    async fn multi_review_classifies_reject() {
        let activities = GateActivities::new(
            Arc::new(FakeAgent {
                response: "REJECT: this is fundamentally broken".to_string(),
                files: vec![],
                fail: false,
            }),
            Arc::new(FakeCellProvisioner {
                test_output: String::new(),
                tests_pass: true,
            }),
        );
        let vote = activities
            .multi_review(&test_cell(), 0, crate::types::ReviewType::Testing, "impl summary")
            .await
            .unwrap();
        assert_eq!(vote.vote, crate::types::Vote::Reject);
    }
}
