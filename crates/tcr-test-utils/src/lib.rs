//! In-memory fakes for the capability traits in `tcr-core`.
//!
//! Unlike the teacher's Postgres-backed test harness, nothing here talks to
//! an external service: a TCR run's collaborators are an LLM agent, a
//! worktree-backed cell, a durable runtime, and a lock table, all of which
//! are cheap to fake in-process. Integration tests compose these instead of
//! standing up real infrastructure.

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use tcr_core::capabilities::{
    ActivityFn, ActivityOptions, AgentClient, AgentResponse, CellProvisioner, DurableRuntime,
    LockManager, TaskExecutionOutcome,
};
use tcr_core::types::CellBootstrap;

/// Scripts a fixed sequence of agent responses, cycling the last one once
/// exhausted.
pub struct ScriptedAgent {
    responses: Vec<AgentResponse>,
    calls: AtomicUsize,
}

impl ScriptedAgent {
    pub fn new(responses: Vec<AgentResponse>) -> Self {
        assert!(!responses.is_empty(), "ScriptedAgent needs at least one response");
        Self {
            responses,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AgentClient for ScriptedAgent {
    async fn invoke(&self, _cell: &CellBootstrap, _prompt: &str) -> anyhow::Result<AgentResponse> {
        let idx = self.calls.fetch_add(1, Ordering::SeqCst);
        let response = self.responses.get(idx).unwrap_or_else(|| self.responses.last().unwrap());
        Ok(response.clone())
    }
}

/// An in-memory cell. By default, `run_lint` always reports a clean run and
/// `run_tests` scripts the canonical sequence a full orchestrator run drives
/// it through: VerifyRED first (expects failing output text), then
/// VerifyGREEN onward (expects clean output text). Call
/// [`Self::script_test_results`] / [`Self::script_lint_results`] to
/// override either.
pub struct InMemoryCellProvisioner {
    test_script: Mutex<Vec<(bool, String)>>,
    lint_script: Mutex<Vec<(bool, String)>>,
    run_tests_calls: AtomicUsize,
    run_lint_calls: AtomicUsize,
    teardown_calls: AtomicUsize,
}

impl InMemoryCellProvisioner {
    pub fn new() -> Self {
        Self {
            test_script: Mutex::new(vec![
                (false, "--- FAIL: TestFeature (0.00s)\n    feature_test.rs:1: not implemented\n".to_string()),
                (true, "PASS\n".to_string()),
            ]),
            lint_script: Mutex::new(vec![(true, "lint clean".to_string())]),
            run_tests_calls: AtomicUsize::new(0),
            run_lint_calls: AtomicUsize::new(0),
            teardown_calls: AtomicUsize::new(0),
        }
    }

    /// Replace the scripted `(passed, output)` sequence returned by
    /// successive `run_tests` calls; the last entry repeats once exhausted.
    pub fn script_test_results(&self, script: Vec<(bool, String)>) {
        assert!(!script.is_empty(), "test script needs at least one entry");
        *self.test_script.lock().unwrap() = script;
        self.run_tests_calls.store(0, Ordering::SeqCst);
    }

    /// Replace the scripted `(tool_passed, raw_output)` sequence returned by
    /// successive `run_lint` calls; the last entry repeats once exhausted.
    pub fn script_lint_results(&self, script: Vec<(bool, String)>) {
        assert!(!script.is_empty(), "lint script needs at least one entry");
        *self.lint_script.lock().unwrap() = script;
        self.run_lint_calls.store(0, Ordering::SeqCst);
    }

    pub fn teardown_calls(&self) -> usize {
        self.teardown_calls.load(Ordering::SeqCst)
    }
}

impl Default for InMemoryCellProvisioner {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CellProvisioner for InMemoryCellProvisioner {
    async fn bootstrap(&self, cell_id: &str, _branch: &str) -> anyhow::Result<CellBootstrap> {
        Ok(CellBootstrap {
            cell_id: cell_id.to_string(),
            port: 0,
            worktree_id: format!("wt-{cell_id}"),
            worktree_path: format!("/tmp/tcr-test/{cell_id}"),
            base_url: "http://localhost:0".to_string(),
            server_pid: 0,
        })
    }

    async fn execute_task(
        &self,
        _cell: &CellBootstrap,
        prompt: &str,
    ) -> anyhow::Result<TaskExecutionOutcome> {
        Ok(TaskExecutionOutcome {
            success: true,
            output: format!("executed: {prompt}"),
            files_modified: vec![],
            error_message: None,
        })
    }

    async fn run_tests(&self, _cell: &CellBootstrap) -> anyhow::Result<(bool, String)> {
        let idx = self.run_tests_calls.fetch_add(1, Ordering::SeqCst);
        let script = self.test_script.lock().unwrap();
        Ok(script.get(idx).cloned().unwrap_or_else(|| script.last().unwrap().clone()))
    }

    async fn run_lint(&self, _cell: &CellBootstrap) -> anyhow::Result<(bool, String)> {
        let idx = self.run_lint_calls.fetch_add(1, Ordering::SeqCst);
        let script = self.lint_script.lock().unwrap();
        Ok(script.get(idx).cloned().unwrap_or_else(|| script.last().unwrap().clone()))
    }

    async fn commit(&self, _cell: &CellBootstrap, _message: &str) -> anyhow::Result<()> {
        Ok(())
    }

    async fn revert(&self, _cell: &CellBootstrap) -> anyhow::Result<()> {
        Ok(())
    }

    async fn teardown(&self, _cell: &CellBootstrap) -> anyhow::Result<()> {
        self.teardown_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn clone_cell(&self, cell: &CellBootstrap, new_cell_id: &str) -> anyhow::Result<CellBootstrap> {
        Ok(CellBootstrap {
            cell_id: new_cell_id.to_string(),
            worktree_id: format!("wt-{new_cell_id}"),
            worktree_path: format!("/tmp/tcr-test/{new_cell_id}"),
            ..cell.clone()
        })
    }
}

/// Grants every lock it's asked for and tracks what's currently held, so
/// tests can assert locks were released.
pub struct InMemoryLockManager {
    held: Mutex<HashSet<String>>,
}

impl InMemoryLockManager {
    pub fn new() -> Self {
        Self {
            held: Mutex::new(HashSet::new()),
        }
    }

    pub fn held_count(&self) -> usize {
        self.held.lock().unwrap().len()
    }
}

impl Default for InMemoryLockManager {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LockManager for InMemoryLockManager {
    async fn acquire(&self, patterns: &[String]) -> anyhow::Result<Vec<String>> {
        let mut held = self.held.lock().unwrap();
        for pattern in patterns {
            held.insert(pattern.clone());
        }
        Ok(patterns.to_vec())
    }

    async fn release(&self, paths: &[String]) -> anyhow::Result<()> {
        let mut held = self.held.lock().unwrap();
        for path in paths {
            held.remove(path);
        }
        Ok(())
    }
}

/// Executes activities directly with no persistence, matching the
/// reference runtime's documented non-replayable semantics.
pub struct InMemoryDurableRuntime;

#[async_trait]
impl DurableRuntime for InMemoryDurableRuntime {
    async fn execute_activity(
        &self,
        _name: &str,
        _options: ActivityOptions,
        work: ActivityFn,
    ) -> anyhow::Result<serde_json::Value> {
        work().await
    }

    fn now(&self) -> chrono::DateTime<chrono::Utc> {
        chrono::Utc::now()
    }

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}
