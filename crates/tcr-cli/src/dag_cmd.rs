//! `tcr dag run`: execute a task graph loaded from a JSON file.

use std::sync::Arc;

use serde::Deserialize;
use tcr_core::dag::{DagOrchestrator, DagWorkflowInput};
use tcr_core::types::Task;
use tcr_runtime::WorktreeCellProvisioner;

use crate::config::TcrConfig;

#[derive(Debug, Deserialize)]
struct TaskFile {
    tasks: Vec<TaskSpec>,
}

#[derive(Debug, Deserialize)]
struct TaskSpec {
    name: String,
    command: String,
    #[serde(default)]
    deps: Vec<String>,
}

pub struct DagArgs {
    pub workflow_id: String,
    pub branch: String,
    pub tasks_file: String,
}

pub async fn run(config: &TcrConfig, args: DagArgs) -> anyhow::Result<()> {
    let contents = std::fs::read_to_string(&args.tasks_file)?;
    let task_file: TaskFile = serde_json::from_str(&contents)?;
    let tasks: Vec<Task> = task_file
        .tasks
        .into_iter()
        .map(|t| Task {
            name: t.name,
            command: t.command,
            deps: t.deps,
        })
        .collect();

    let manager = tcr_runtime::worktree::WorktreeManager::new(config.repo_path.clone(), config.worktree_base.clone())?;
    let provisioner = Arc::new(WorktreeCellProvisioner::new(
        manager,
        config.test_command.clone(),
        config.lint_command.clone(),
        config.server_command.clone(),
    ));

    let orchestrator = DagOrchestrator::new(provisioner, config.max_concurrency);
    let result = orchestrator
        .run(DagWorkflowInput {
            workflow_id: args.workflow_id,
            branch: args.branch,
            tasks,
        })
        .await?;

    println!("levels executed: {}", result.levels_executed);
    for outcome in &result.outcomes {
        println!(
            "  {} [{}ms]: {}",
            outcome.name,
            outcome.duration_ms,
            if outcome.success { "ok" } else { "failed" }
        );
    }
    Ok(())
}
