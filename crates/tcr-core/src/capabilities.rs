//! External collaborator contracts.
//!
//! These three traits are the seams named "out of scope" by the
//! specification: the durable workflow runtime, the cell provisioner, and
//! the LLM agent client. `tcr-core` depends only on these traits; concrete
//! backends live in `tcr-runtime`.
//!
//! Object-safety matters here exactly as it does for the teacher's
//! `Harness` trait: orchestrators hold `Arc<dyn Trait>`, not a generic
//! parameter, so a new backend can be swapped in without recompiling the
//! orchestration logic.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;

use crate::types::CellBootstrap;

/// Outcome of a cell-side task execution.
#[derive(Debug, Clone, Default)]
pub struct TaskExecutionOutcome {
    pub success: bool,
    pub output: String,
    pub files_modified: Vec<String>,
    pub error_message: Option<String>,
}

/// Provisions and tears down isolated execution cells.
///
/// A cell bundles a worktree, a listening server, and an allocated port.
/// Implementations decide the isolation mechanism (git worktree, container,
/// remote sandbox); the orchestrator only ever sees [`CellBootstrap`]'s
/// serializable fields.
#[async_trait]
pub trait CellProvisioner: Send + Sync {
    async fn bootstrap(&self, cell_id: &str, branch: &str) -> Result<CellBootstrap>;
    async fn execute_task(&self, cell: &CellBootstrap, prompt: &str) -> Result<TaskExecutionOutcome>;
    async fn run_tests(&self, cell: &CellBootstrap) -> Result<(bool, String)>;
    /// Run the configured lint command. Returns the tool's own pass/fail
    /// verdict plus its raw output, which `LintTest` parses into
    /// severity-tagged issues. Backends with no lint command configured
    /// should return `(true, String::new())`.
    async fn run_lint(&self, cell: &CellBootstrap) -> Result<(bool, String)>;
    async fn commit(&self, cell: &CellBootstrap, message: &str) -> Result<()>;
    async fn revert(&self, cell: &CellBootstrap) -> Result<()>;
    async fn teardown(&self, cell: &CellBootstrap) -> Result<()>;
    /// Clone a cell's working state into a fresh sibling cell, for the
    /// parallel-fix TCR variant. Backends that cannot clone should return
    /// an error; the orchestrator falls back to serializing attempts
    /// through the original cell in that case.
    async fn clone_cell(&self, cell: &CellBootstrap, new_cell_id: &str) -> Result<CellBootstrap>;
}

/// Invokes the LLM coding agent running inside a cell.
#[async_trait]
pub trait AgentClient: Send + Sync {
    async fn invoke(&self, cell: &CellBootstrap, prompt: &str) -> Result<AgentResponse>;
}

#[derive(Debug, Clone, Default)]
pub struct AgentResponse {
    pub response: String,
    pub files_modified: Vec<String>,
}

/// Advisory file locks, keyed by canonical path.
#[async_trait]
pub trait LockManager: Send + Sync {
    async fn acquire(&self, patterns: &[String]) -> Result<Vec<String>>;
    async fn release(&self, paths: &[String]) -> Result<()>;
}

/// Options under which an activity runs through the durable runtime.
#[derive(Debug, Clone)]
pub struct ActivityOptions {
    pub start_to_close: Duration,
    pub heartbeat: Duration,
    pub retry_policy: crate::policy::RetryPolicy,
}

/// The durable workflow runtime's consumed surface.
///
/// Suspension points (activity execution, child workflows, timers) all
/// flow through here so a real implementation can persist and replay
/// workflow state across them. The reference implementation in
/// `tcr-runtime` executes directly and is documented as non-replayable.
#[async_trait]
pub trait DurableRuntime: Send + Sync {
    /// Execute a unit of work under the given options, returning its
    /// serialized JSON result. Callers deserialize the expected type.
    async fn execute_activity(
        &self,
        name: &str,
        options: ActivityOptions,
        work: ActivityFn,
    ) -> Result<serde_json::Value>;

    /// Deterministic wall-clock time, so workflow code never calls
    /// `SystemTime::now()` directly.
    fn now(&self) -> chrono::DateTime<chrono::Utc>;

    /// Sleep for a duration, suspendable across replay in a real runtime.
    async fn sleep(&self, duration: Duration);
}

/// A unit of activity work: async, returns a JSON value, may fail.
pub type ActivityFn = Box<
    dyn FnOnce() -> Pin<Box<dyn Future<Output = Result<serde_json::Value>> + Send>> + Send,
>;

const _: () = {
    fn _assert_object_safe_cell_provisioner(_: &dyn CellProvisioner) {}
    fn _assert_object_safe_agent_client(_: &dyn AgentClient) {}
    fn _assert_object_safe_lock_manager(_: &dyn LockManager) {}
    fn _assert_object_safe_durable_runtime(_: &dyn DurableRuntime) {}
};
