//! Reference [`DurableRuntime`]: executes activities directly and sleeps
//! with `tokio::time::sleep`. No persistence, no replay -- a crash mid-run
//! loses the workflow. A production deployment durable runtime would swap
//! this adapter for one backed by a workflow engine without touching
//! `tcr-core`.

use std::time::Duration;

use async_trait::async_trait;
use tcr_core::capabilities::{ActivityFn, ActivityOptions, DurableRuntime};

/// Retries belong to the orchestrator, not the runtime: `ActivityFn` is
/// `FnOnce`, so each [`DurableRuntime::execute_activity`] call is a single
/// attempt. The options' retry policy is accepted for the heartbeat and
/// timeout it carries; a replaying runtime would additionally use it to
/// decide whether a retried workflow step is the same logical attempt.

pub struct InMemoryDurableRuntime;

impl InMemoryDurableRuntime {
    pub fn new() -> Self {
        Self
    }
}

impl Default for InMemoryDurableRuntime {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DurableRuntime for InMemoryDurableRuntime {
    async fn execute_activity(
        &self,
        name: &str,
        options: ActivityOptions,
        work: ActivityFn,
    ) -> anyhow::Result<serde_json::Value> {
        let deadline = tokio::time::sleep(options.start_to_close);
        tokio::pin!(deadline);
        let fut = work();
        tokio::pin!(fut);

        let mut ticker = tokio::time::interval(options.heartbeat);
        ticker.tick().await; // first tick fires immediately, doesn't count as a heartbeat

        loop {
            tokio::select! {
                result = &mut fut => return result,
                _ = &mut deadline => {
                    tracing::warn!(activity = name, "activity exceeded start_to_close timeout");
                    anyhow::bail!("activity {name} timed out");
                }
                _ = ticker.tick() => {
                    tracing::debug!(activity = name, "activity heartbeat");
                }
            }
        }
    }

    fn now(&self) -> chrono::DateTime<chrono::Utc> {
        chrono::Utc::now()
    }

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}
