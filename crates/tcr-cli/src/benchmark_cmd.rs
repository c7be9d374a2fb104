//! `tcr benchmark run`: fan out N TCR runs and report the strategy's
//! success rate.

use std::sync::Arc;

use tcr_core::activities::{GateActivities, LockActivities};
use tcr_core::benchmark::{BenchmarkDriver, BenchmarkInput, Strategy};
use tcr_core::cell::CellActivities;
use tcr_runtime::{HttpAgentClient, InMemoryLockManager, WorktreeCellProvisioner};

use crate::config::TcrConfig;

pub struct BenchmarkArgs {
    pub strategy: Strategy,
    pub num_runs: u32,
    pub concurrency: usize,
    pub prompt: String,
    pub description: String,
    pub repo_branch: String,
}

pub async fn run(config: &TcrConfig, args: BenchmarkArgs) -> anyhow::Result<()> {
    let manager = tcr_runtime::worktree::WorktreeManager::new(config.repo_path.clone(), config.worktree_base.clone())?;
    let provisioner = Arc::new(WorktreeCellProvisioner::new(
        manager,
        config.test_command.clone(),
        config.lint_command.clone(),
        config.server_command.clone(),
    ));
    let agent = Arc::new(HttpAgentClient::default());
    let locks = Arc::new(InMemoryLockManager::new());

    let driver = BenchmarkDriver::new(
        Arc::new(CellActivities::new(provisioner.clone())),
        Arc::new(GateActivities::new(agent, provisioner)),
        Arc::new(LockActivities::new(locks)),
    );

    let input = BenchmarkInput {
        strategy: args.strategy,
        num_runs: args.num_runs,
        concurrency: args.concurrency,
        prompt: args.prompt,
        description: args.description,
        repo_branch: args.repo_branch,
    };

    let result = driver.run(input).await;

    println!(
        "{}/{} runs succeeded, avg {}ms, total {}ms",
        result.success_count,
        result.success_count + result.failure_count,
        result.avg_duration_ms,
        result.total_duration_ms,
    );
    for run in &result.run_results {
        println!(
            "  {} [{}ms]: {}",
            run.run_id,
            run.duration_ms,
            if run.success { "ok" } else { "failed" }
        );
    }
    Ok(())
}
