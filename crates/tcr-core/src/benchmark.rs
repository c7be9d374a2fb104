//! C7: fans out N child TCR runs of a selected strategy and aggregates
//! their outcomes. Child runs execute under
//! [`crate::policy::RetryPolicy::NON_IDEMPOTENT`] -- benchmarks never retry
//! a run, since the point is to measure the strategy's raw success rate.

use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

use crate::activities::{GateActivities, LockActivities};
use crate::cell::CellActivities;
use crate::orchestrator::TcrOrchestrator;
use crate::types::TcrInput;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    Basic,
    Enhanced,
}

#[derive(Debug, Clone)]
pub struct BenchmarkInput {
    pub strategy: Strategy,
    pub num_runs: u32,
    pub concurrency: usize,
    pub prompt: String,
    pub description: String,
    pub repo_branch: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunResult {
    pub run_id: String,
    pub success: bool,
    pub duration_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BenchmarkResult {
    pub success_count: u32,
    pub failure_count: u32,
    pub total_duration_ms: u64,
    pub avg_duration_ms: u64,
    pub run_results: Vec<RunResult>,
}

pub struct BenchmarkDriver {
    cell_activities: Arc<CellActivities>,
    gate_activities: Arc<GateActivities>,
    lock_activities: Arc<LockActivities>,
}

impl BenchmarkDriver {
    pub fn new(
        cell_activities: Arc<CellActivities>,
        gate_activities: Arc<GateActivities>,
        lock_activities: Arc<LockActivities>,
    ) -> Self {
        Self {
            cell_activities,
            gate_activities,
            lock_activities,
        }
    }

    pub async fn run(&self, input: BenchmarkInput) -> BenchmarkResult {
        let semaphore = Arc::new(Semaphore::new(input.concurrency.max(1)));
        let mut handles = Vec::new();
        let started = Instant::now();

        for run_index in 0..input.num_runs {
            let run_id = format!("{:?}-{run_index}", input.strategy).to_lowercase();
            let semaphore = Arc::clone(&semaphore);
            let cell_activities = Arc::clone(&self.cell_activities);
            let gate_activities = Arc::clone(&self.gate_activities);
            let lock_activities = Arc::clone(&self.lock_activities);
            let branch = input.repo_branch.clone();
            let description = input.description.clone();
            let acceptance_criteria = input.prompt.clone();

            handles.push(tokio::spawn(async move {
                let _permit = semaphore.acquire_owned().await.expect("semaphore closed");
                let run_started = Instant::now();
                let orchestrator = TcrOrchestrator::new(cell_activities, gate_activities, lock_activities);
                let tcr_input = TcrInput {
                    cell_id: run_id.clone(),
                    branch,
                    task_id: run_id.clone(),
                    description,
                    acceptance_criteria,
                    reviewers_count: 3,
                    max_retries: 3,
                    max_fix_attempts: 3,
                    changed_files: None,
                };
                let result = orchestrator.run(tcr_input, CancellationToken::new()).await;
                RunResult {
                    run_id,
                    success: result.success,
                    duration_ms: run_started.elapsed().as_millis() as u64,
                }
            }));
        }

        let mut run_results = Vec::new();
        for handle in handles {
            if let Ok(result) = handle.await {
                run_results.push(result);
            }
        }

        let success_count = run_results.iter().filter(|r| r.success).count() as u32;
        let failure_count = run_results.len() as u32 - success_count;
        let total_duration_ms = started.elapsed().as_millis() as u64;
        let avg_duration_ms = if input.num_runs > 0 {
            run_results.iter().map(|r| r.duration_ms).sum::<u64>() / input.num_runs as u64
        } else {
            0
        };

        BenchmarkResult {
            success_count,
            failure_count,
            total_duration_ms,
            avg_duration_ms,
            run_results,
        }
    }
}
