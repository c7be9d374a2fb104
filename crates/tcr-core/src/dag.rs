//! C6: the DAG task executor.
//!
//! Validates a task graph (unique names, known dependencies, no self-loops,
//! acyclic via Kahn's algorithm -- the same approach the teacher's plan
//! parser uses for its dependency graph), then executes it level by level:
//! every task whose dependencies are all satisfied runs concurrently with
//! its level-mates, and the next level starts only once the current one
//! completes. A single task failure cancels its siblings and fails the
//! workflow.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Instant;

use thiserror::Error;
use tokio::sync::Semaphore;

use crate::capabilities::CellProvisioner;
use crate::types::{CellBootstrap, Task, TaskOutcome};

#[derive(Debug, Error)]
pub enum DagError {
    #[error("duplicate task name: {0:?}")]
    DuplicateTaskName(String),

    #[error("task {task:?} depends on unknown task {dependency:?}")]
    UnknownDependency { task: String, dependency: String },

    #[error("task {0:?} cannot depend on itself")]
    SelfDependency(String),

    #[error("dependency cycle detected involving tasks: {0}")]
    CycleDetected(String),

    #[error("a DAG workflow must contain at least one task")]
    NoTasks,

    #[error("task {0:?} failed: {1}")]
    TaskFailed(String, String),
}

#[derive(Debug, Clone)]
pub struct DagWorkflowInput {
    pub workflow_id: String,
    pub branch: String,
    pub tasks: Vec<Task>,
}

#[derive(Debug, Clone, Default)]
pub struct DagResult {
    pub outcomes: Vec<TaskOutcome>,
    pub levels_executed: usize,
}

/// Validate the task graph and return it partitioned into topological
/// levels (waves): level 0 has no deps, level N depends only on levels
/// `< N`.
pub fn plan_levels(tasks: &[Task]) -> Result<Vec<Vec<usize>>, DagError> {
    if tasks.is_empty() {
        return Err(DagError::NoTasks);
    }

    let mut seen = HashSet::new();
    for task in tasks {
        if !seen.insert(task.name.as_str()) {
            return Err(DagError::DuplicateTaskName(task.name.clone()));
        }
    }

    for task in tasks {
        for dep in &task.deps {
            if dep == &task.name {
                return Err(DagError::SelfDependency(task.name.clone()));
            }
            if !seen.contains(dep.as_str()) {
                return Err(DagError::UnknownDependency {
                    task: task.name.clone(),
                    dependency: dep.clone(),
                });
            }
        }
    }

    let name_to_idx: HashMap<&str, usize> = tasks
        .iter()
        .enumerate()
        .map(|(i, t)| (t.name.as_str(), i))
        .collect();

    let n = tasks.len();
    let mut in_degree = vec![0usize; n];
    let mut adj: Vec<Vec<usize>> = vec![vec![]; n];
    for task in tasks {
        let idx = name_to_idx[task.name.as_str()];
        for dep in &task.deps {
            let dep_idx = name_to_idx[dep.as_str()];
            adj[dep_idx].push(idx);
            in_degree[idx] += 1;
        }
    }

    let mut levels = Vec::new();
    let mut remaining_in_degree = in_degree.clone();
    let mut done = vec![false; n];
    let mut total_done = 0;

    loop {
        let level: Vec<usize> = (0..n)
            .filter(|&i| !done[i] && remaining_in_degree[i] == 0)
            .collect();
        if level.is_empty() {
            break;
        }
        for &i in &level {
            done[i] = true;
        }
        total_done += level.len();
        for &i in &level {
            for &next in &adj[i] {
                remaining_in_degree[next] -= 1;
            }
        }
        levels.push(level);
    }

    if total_done != n {
        let cycle_tasks: Vec<&str> = (0..n)
            .filter(|&i| !done[i])
            .map(|i| tasks[i].name.as_str())
            .collect();
        return Err(DagError::CycleDetected(cycle_tasks.join(", ")));
    }

    Ok(levels)
}

pub struct DagOrchestrator {
    provisioner: Arc<dyn CellProvisioner>,
    max_concurrency: usize,
}

impl DagOrchestrator {
    pub fn new(provisioner: Arc<dyn CellProvisioner>, max_concurrency: usize) -> Self {
        Self {
            provisioner,
            max_concurrency: max_concurrency.max(1),
        }
    }

    pub async fn run(&self, input: DagWorkflowInput) -> Result<DagResult, DagError> {
        let levels = plan_levels(&input.tasks)?;
        let cell = self
            .provisioner
            .bootstrap(&input.workflow_id, &input.branch)
            .await
            .map_err(|e| DagError::TaskFailed("bootstrap".to_string(), e.to_string()))?;

        let semaphore = Arc::new(Semaphore::new(self.max_concurrency));
        let mut outcomes = Vec::new();

        for level in &levels {
            let mut handles = Vec::new();
            for &idx in level {
                let task = input.tasks[idx].clone();
                let semaphore = Arc::clone(&semaphore);
                let provisioner = Arc::clone(&self.provisioner);
                let cell = cell.clone();
                handles.push(tokio::spawn(async move {
                    let _permit = semaphore.acquire_owned().await.expect("semaphore closed");
                    run_task(&provisioner, &cell, &task).await
                }));
            }

            // Drain the level as tasks finish, not in spawn order: the first
            // failure aborts every sibling still running so one broken task
            // doesn't block the level on the others' full duration.
            let mut level_failed = None;
            let mut remaining = handles;
            while !remaining.is_empty() {
                let (result, _index, rest) = futures::future::select_all(remaining).await;
                remaining = rest;
                match result {
                    Ok(outcome) => {
                        if !outcome.success && level_failed.is_none() {
                            level_failed = Some(DagError::TaskFailed(
                                outcome.name.clone(),
                                outcome.output.clone(),
                            ));
                        }
                        outcomes.push(outcome);
                    }
                    Err(e) => {
                        if !e.is_cancelled() && level_failed.is_none() {
                            level_failed =
                                Some(DagError::TaskFailed("unknown".to_string(), e.to_string()));
                        }
                    }
                }
                if level_failed.is_some() {
                    for handle in &remaining {
                        handle.abort();
                    }
                }
            }

            if let Some(err) = level_failed {
                let _ = self.provisioner.teardown(&cell).await;
                return Err(err);
            }
        }

        let _ = self.provisioner.teardown(&cell).await;

        Ok(DagResult {
            outcomes,
            levels_executed: levels.len(),
        })
    }
}

async fn run_task(
    provisioner: &Arc<dyn CellProvisioner>,
    cell: &CellBootstrap,
    task: &Task,
) -> TaskOutcome {
    let started = Instant::now();
    match provisioner.execute_task(cell, &task.command).await {
        Ok(outcome) => TaskOutcome {
            name: task.name.clone(),
            success: outcome.success,
            output: outcome.error_message.unwrap_or(outcome.output),
            duration_ms: started.elapsed().as_millis() as u64,
        },
        Err(e) => TaskOutcome {
            name: task.name.clone(),
            success: false,
            output: e.to_string(),
            duration_ms: started.elapsed().as_millis() as u64,
        },
    }
}
