//! Parallel-fix variant of the Enhanced TCR workflow.
//!
//! Identical state machine to [`super::TcrOrchestrator`], but on a
//! VerifyGREEN failure it fans out `K` parallel [`FixFromFeedback`]
//! attempts, takes the first whose own VerifyGREEN passes, and cancels the
//! rest. Resolves Open Question (b): the reference runtime supports both
//! sibling-clone and shared-cell fan-out, selected via
//! [`ParallelTcrConfig::clone_cells`].

use std::collections::BTreeMap;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use super::{acquire_locks_with_retry, gen_test_result, retry_gate, run_review_loop};
use crate::activities::{GateActivities, LockActivities};
use crate::cell::CellActivities;
use crate::parsers::bypass;
use crate::types::{
    CellBootstrap, GateResult, ParallelTcrConfig, TcrInput, TcrResult, WorkflowState,
};

pub struct ParallelFixOutcome {
    pub winning_cell: CellBootstrap,
    pub fix_attempts: u32,
}

pub struct ParallelFixer {
    cell_activities: Arc<CellActivities>,
    gate_activities: Arc<GateActivities>,
}

impl ParallelFixer {
    pub fn new(cell_activities: Arc<CellActivities>, gate_activities: Arc<GateActivities>) -> Self {
        Self {
            cell_activities,
            gate_activities,
        }
    }

    /// Fan out `config.fan_out` FixFromFeedback attempts against either
    /// sibling clones of `cell` or `cell` itself, and return the first
    /// attempt whose VerifyGREEN passes.
    pub async fn fix_in_parallel(
        &self,
        input: &TcrInput,
        cell: &CellBootstrap,
        failure_summary: &str,
        config: &ParallelTcrConfig,
    ) -> Result<ParallelFixOutcome, String> {
        let cancel = CancellationToken::new();
        let mut handles = Vec::new();

        for i in 0..config.fan_out.max(1) {
            let target_cell = if config.clone_cells {
                match self
                    .cell_activities
                    .clone_cell(cell, &format!("{}-fix-{i}", input.cell_id))
                    .await
                {
                    Ok(c) => c,
                    Err(_) => cell.clone(),
                }
            } else {
                cell.clone()
            };

            let gate_activities = Arc::clone(&self.gate_activities);
            let summary = failure_summary.to_string();
            let cancel = cancel.clone();
            let cell_activities = Arc::clone(&self.cell_activities);
            let clone_cells = config.clone_cells;

            handles.push(tokio::spawn(async move {
                tokio::select! {
                    _ = cancel.cancelled() => None,
                    result = run_one_fix_attempt(&gate_activities, &target_cell, &summary) => {
                        if !result {
                            if clone_cells {
                                let _ = cell_activities.teardown_cell(&target_cell).await;
                            }
                            return None;
                        }
                        Some(target_cell)
                    }
                }
            }));
        }

        let attempts = handles.len() as u32;
        let mut winner = None;
        for handle in handles {
            if let Ok(Some(cell)) = handle.await {
                if winner.is_none() {
                    winner = Some(cell);
                    cancel.cancel();
                }
            }
        }

        match winner {
            Some(winning_cell) => Ok(ParallelFixOutcome {
                winning_cell,
                fix_attempts: attempts,
            }),
            None => Err("no parallel fix attempt produced a passing VerifyGREEN".to_string()),
        }
    }
}

async fn run_one_fix_attempt(
    gate_activities: &GateActivities,
    cell: &CellBootstrap,
    failure_summary: &str,
) -> bool {
    let fixed = gate_activities
        .fix_from_feedback(cell, failure_summary)
        .await
        .map(|r| r.passed)
        .unwrap_or(false);
    if !fixed {
        return false;
    }
    gate_activities
        .verify_green(cell)
        .await
        .map(|r| r.passed)
        .unwrap_or(false)
}

/// C5: the Parallel TCR workflow.
///
/// Runs the same Bootstrap -> AcquireLocks -> GenTest -> LintTest ->
/// VerifyRED -> GenImpl/VerifyGREEN -> MultiReview -> Commit -> ReleaseLocks
/// -> Teardown sequence as [`super::TcrOrchestrator`], but on a VerifyGREEN
/// failure it hands off to [`ParallelFixer`] instead of retrying GenImpl
/// serially: `config.fan_out` fix attempts race each other and the
/// workflow continues from whichever wins. When [`ParallelTcrConfig::clone_cells`]
/// is set the winning attempt runs against a sibling cell, so the review and
/// commit steps that follow operate on that cell rather than the originally
/// bootstrapped one -- the original is torn down alongside it.
pub struct ParallelTcrOrchestrator {
    cell_activities: Arc<CellActivities>,
    gate_activities: Arc<GateActivities>,
    lock_activities: Arc<LockActivities>,
    config: ParallelTcrConfig,
}

impl ParallelTcrOrchestrator {
    pub fn new(
        cell_activities: Arc<CellActivities>,
        gate_activities: Arc<GateActivities>,
        lock_activities: Arc<LockActivities>,
        config: ParallelTcrConfig,
    ) -> Self {
        Self {
            cell_activities,
            gate_activities,
            lock_activities,
            config,
        }
    }

    pub async fn run(&self, input: TcrInput, cancellation: CancellationToken) -> TcrResult {
        let mut gates: BTreeMap<String, GateResult> = BTreeMap::new();
        let mut state = WorkflowState::Bootstrap;
        let mut saga = crate::policy::SagaGuard::new();

        let cell = match self
            .cell_activities
            .bootstrap_cell(&input.cell_id, &input.branch)
            .await
        {
            Ok(cell) => cell,
            Err(e) => {
                return TcrResult {
                    success: false,
                    final_state: WorkflowState::Failed,
                    gates,
                    error: Some(format!("bootstrap failed: {e}")),
                };
            }
        };

        let result = self
            .run_from_bootstrap(&input, &cell, &mut gates, &mut state, &cancellation)
            .await;

        let acquired_locks: Vec<String> = gates
            .get("AcquireFileLocks")
            .map(|g| g.agent_results.clone())
            .unwrap_or_default();
        if !acquired_locks.is_empty() {
            let _ = self.lock_activities.release_file_locks(&acquired_locks).await;
        }

        if result.is_err() {
            tracing::warn!(cell_id = %cell.cell_id, "reverting changes after terminal failure");
            let _ = self.cell_activities.revert_changes(&cell).await;
        }

        // The winning fix attempt's cell (if any) is what got committed;
        // the originally bootstrapped cell is always torn down too, since a
        // cloned winner leaves it behind unmodified.
        let winning_cell = result.as_ref().ok().and_then(|w| w.clone());
        if let Some(winner) = &winning_cell {
            if let Err(e) = self.cell_activities.teardown_cell(winner).await {
                tracing::error!(cell_id = %winner.cell_id, error = %e, "teardown failed");
            }
        }
        if let Err(e) = self.cell_activities.teardown_cell(&cell).await {
            tracing::error!(cell_id = %cell.cell_id, error = %e, "teardown failed");
        }
        saga.release();

        match result {
            Ok(_) => TcrResult {
                success: true,
                final_state: WorkflowState::Complete,
                gates,
                error: None,
            },
            Err(e) => TcrResult {
                success: false,
                final_state: WorkflowState::Failed,
                gates,
                error: Some(e),
            },
        }
    }

    /// Returns `Ok(Some(winning_cell))` when a parallel fix attempt took
    /// over from the bootstrapped cell, `Ok(None)` when the original cell
    /// carried the run through to Commit unassisted.
    async fn run_from_bootstrap(
        &self,
        input: &TcrInput,
        cell: &CellBootstrap,
        gates: &mut BTreeMap<String, GateResult>,
        state: &mut WorkflowState,
        cancellation: &CancellationToken,
    ) -> Result<Option<CellBootstrap>, String> {
        if cancellation.is_cancelled() {
            return Err("workflow cancelled before gen_test".to_string());
        }

        let mut skip_code_gates = false;
        if let Some(changed) = &input.changed_files {
            let decision = bypass::classify(changed);
            if decision.eligible {
                skip_code_gates = true;
                for gate_name in &decision.skipped_gates {
                    gates.insert(gate_name.clone(), GateResult::bypassed(gate_name));
                }
            }
        }

        let locked_paths = acquire_locks_with_retry(
            &self.lock_activities,
            &[format!("{}/**", cell.worktree_path)],
        )
        .await
        .map_err(|e| format!("failed to acquire file locks: {e}"))?;
        gates.insert(
            "AcquireFileLocks".to_string(),
            GateResult {
                gate_name: "AcquireFileLocks".to_string(),
                passed: true,
                agent_results: locked_paths,
                ..Default::default()
            },
        );

        if !skip_code_gates {
            *state = WorkflowState::GenTest;
            let test_files = retry_gate(input.max_retries, |feedback| async move {
                self.gate_activities
                    .gen_test(
                        cell,
                        &input.description,
                        &input.acceptance_criteria,
                        feedback.as_deref(),
                    )
                    .await
                    .map(|(result, files)| (result, files))
                    .map_err(|e| e.to_string())
            })
            .await
            .map(|(_, files)| files)
            .map_err(|e| {
                *state = WorkflowState::Failed;
                e
            })?;
            gates.insert("GenTest".to_string(), gen_test_result(&test_files));

            *state = WorkflowState::LintTest;
            let lint_result = retry_gate(input.max_retries, |_feedback| async move {
                self.gate_activities
                    .lint_test(cell)
                    .await
                    .map(|r| (r, ()))
                    .map_err(|e| e.to_string())
            })
            .await;
            match lint_result {
                Ok((lint_gate, ())) => {
                    gates.insert("LintTest".to_string(), lint_gate);
                }
                Err(e) => {
                    *state = WorkflowState::Failed;
                    return Err(format!("lint_test failed: {e}"));
                }
            }

            *state = WorkflowState::VerifyRed;
            let red_result = retry_gate(input.max_retries, |_feedback| async move {
                self.gate_activities
                    .verify_red(cell)
                    .await
                    .map(|r| (r, ()))
                    .map_err(|e| e.to_string())
            })
            .await;
            match red_result {
                Ok((red, ())) => {
                    gates.insert("VerifyRED".to_string(), red);
                }
                Err(e) => {
                    *state = WorkflowState::Failed;
                    return Err(format!("VerifyRED failed: {e}"));
                }
            }
        }

        let mut winning_cell: Option<CellBootstrap> = None;
        let mut impl_feedback: Option<String> = None;
        if !skip_code_gates {
            *state = WorkflowState::GenImpl;
            let impl_result = self
                .gate_activities
                .gen_impl(cell, &input.description, None, None)
                .await
                .map_err(|e| e.to_string())?;
            let impl_passed = impl_result.passed;
            gates.insert("GenImpl".to_string(), impl_result);
            if !impl_passed {
                *state = WorkflowState::Failed;
                return Err("GenImpl did not produce a change".to_string());
            }

            *state = WorkflowState::VerifyGreen;
            let green = self.gate_activities.verify_green(cell).await.map_err(|e| e.to_string())?;
            if green.passed {
                gates.insert("VerifyGREEN".to_string(), green);
            } else {
                let failure_summary = green
                    .test_result
                    .as_ref()
                    .map(|t| t.output.clone())
                    .unwrap_or_default();
                gates.insert("VerifyGREEN".to_string(), green);

                tracing::info!(
                    fan_out = self.config.fan_out,
                    clone_cells = self.config.clone_cells,
                    "VerifyGREEN failed, fanning out parallel fix attempts"
                );
                let fixer = ParallelFixer::new(
                    Arc::clone(&self.cell_activities),
                    Arc::clone(&self.gate_activities),
                );
                let outcome = fixer
                    .fix_in_parallel(input, cell, &failure_summary, &self.config)
                    .await
                    .map_err(|e| {
                        *state = WorkflowState::Failed;
                        format!("exhausted parallel fix attempts: {e}")
                    })?;
                gates.insert(
                    "VerifyGREEN".to_string(),
                    GateResult {
                        gate_name: "VerifyGREEN".to_string(),
                        passed: true,
                        ..Default::default()
                    },
                );
                winning_cell = Some(outcome.winning_cell);
            }
        }

        let active_cell = winning_cell.as_ref().unwrap_or(cell);

        *state = WorkflowState::MultiReview;
        run_review_loop(&self.gate_activities, input, active_cell, gates, state, &mut impl_feedback).await?;

        *state = WorkflowState::Commit;
        self.cell_activities
            .commit_changes(active_cell, &format!("{}: {}", input.task_id, input.description))
            .await
            .map_err(|e| e.to_string())?;
        gates.insert(
            "Commit".to_string(),
            GateResult {
                gate_name: "Commit".to_string(),
                passed: true,
                ..Default::default()
            },
        );

        *state = WorkflowState::Complete;
        Ok(winning_cell)
    }
}
