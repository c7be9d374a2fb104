//! `tcr run`: drive a single Enhanced TCR workflow to completion.

use std::sync::Arc;

use tcr_core::activities::{GateActivities, LockActivities};
use tcr_core::cell::CellActivities;
use tcr_core::orchestrator::TcrOrchestrator;
use tcr_core::types::{ParallelTcrConfig, TcrInput, TcrResult};
use tcr_core::ParallelTcrOrchestrator;
use tcr_runtime::{HttpAgentClient, InMemoryLockManager, WorktreeCellProvisioner};
use tokio_util::sync::CancellationToken;

use crate::config::TcrConfig;

pub struct RunArgs {
    pub cell_id: String,
    pub branch: String,
    pub task_id: String,
    pub description: String,
    pub acceptance_criteria: String,
    pub reviewers_count: u32,
    pub max_retries: u32,
    pub max_fix_attempts: u32,
    pub changed_files: Option<Vec<String>>,
    pub parallel: bool,
    pub fan_out: u32,
    pub clone_cells: bool,
}

pub async fn run(config: &TcrConfig, args: RunArgs) -> anyhow::Result<()> {
    let manager = tcr_runtime::worktree::WorktreeManager::new(config.repo_path.clone(), config.worktree_base.clone())?;
    let provisioner = Arc::new(WorktreeCellProvisioner::new(
        manager,
        config.test_command.clone(),
        config.lint_command.clone(),
        config.server_command.clone(),
    ));
    let agent = Arc::new(HttpAgentClient::default());
    let locks = Arc::new(InMemoryLockManager::new());

    let cell_activities = Arc::new(CellActivities::new(provisioner.clone()));
    let gate_activities = Arc::new(GateActivities::new(agent, provisioner));
    let lock_activities = Arc::new(LockActivities::new(locks));

    let input = TcrInput {
        cell_id: args.cell_id,
        branch: args.branch,
        task_id: args.task_id,
        description: args.description,
        acceptance_criteria: args.acceptance_criteria,
        reviewers_count: args.reviewers_count,
        max_retries: args.max_retries,
        max_fix_attempts: args.max_fix_attempts,
        changed_files: args.changed_files,
    };

    let result: TcrResult = if args.parallel {
        let orchestrator = ParallelTcrOrchestrator::new(
            cell_activities,
            gate_activities,
            lock_activities,
            ParallelTcrConfig {
                fan_out: args.fan_out,
                clone_cells: args.clone_cells,
            },
        );
        orchestrator.run(input, CancellationToken::new()).await
    } else {
        let orchestrator = TcrOrchestrator::new(cell_activities, gate_activities, lock_activities);
        orchestrator.run(input, CancellationToken::new()).await
    };

    println!("final state: {}", result.final_state);
    for (name, gate) in &result.gates {
        println!("  {name}: {}", if gate.passed { "passed" } else { "failed" });
    }

    if !result.success {
        anyhow::bail!(result.error.unwrap_or_else(|| "TCR run failed".to_string()));
    }
    Ok(())
}
