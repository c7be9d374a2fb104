//! Retry policies, timeouts, and the saga compensation context.
//!
//! Policies are named pure values, not behavior -- the orchestrator reads a
//! `RetryPolicy` and drives its own retry loop, rather than handing it to
//! the runtime, because the activities it guards are not all idempotent
//! (see [`NonIdempotent`]).

use std::time::Duration;

use tokio_util::sync::CancellationToken;

/// A bounded exponential backoff schedule.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_interval: Duration,
    pub backoff_coefficient: f64,
    pub max_interval: Duration,
}

impl RetryPolicy {
    /// Default policy for ordinary transient activity failures.
    pub const DEFAULT: RetryPolicy = RetryPolicy {
        max_attempts: 3,
        initial_interval: Duration::from_secs(1),
        backoff_coefficient: 2.0,
        max_interval: Duration::from_secs(30),
    };

    /// Policy for file-lock acquisition, which contends with sibling
    /// workflows and needs more attempts at a longer ceiling.
    pub const FILE_CONFLICT: RetryPolicy = RetryPolicy {
        max_attempts: 5,
        initial_interval: Duration::from_secs(2),
        backoff_coefficient: 2.0,
        max_interval: Duration::from_secs(60),
    };

    /// Policy for teardown/compensation activities.
    pub const CLEANUP: RetryPolicy = RetryPolicy {
        max_attempts: 3,
        initial_interval: Duration::from_secs(1),
        backoff_coefficient: 2.0,
        max_interval: Duration::from_secs(30),
    };

    /// Policy for LLM/agent-side-effect activities: exactly one attempt.
    /// The orchestrator, not the runtime, drives any further attempt, with
    /// a regenerated feedback prompt.
    pub const NON_IDEMPOTENT: RetryPolicy = RetryPolicy {
        max_attempts: 1,
        initial_interval: Duration::from_secs(1),
        backoff_coefficient: 1.0,
        max_interval: Duration::from_secs(1),
    };

    /// The delay before attempt number `attempt` (1-indexed), capped at
    /// `max_interval`.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt <= 1 {
            return Duration::ZERO;
        }
        let exp = (attempt - 1) as i32 - 1;
        let factor = self.backoff_coefficient.powi(exp.max(0));
        let millis = (self.initial_interval.as_millis() as f64 * factor) as u64;
        Duration::from_millis(millis).min(self.max_interval)
    }
}

/// Timeout constants used across activities and the whole workflow.
pub mod timeouts {
    use std::time::Duration;

    pub const ACTIVITY_START_TO_CLOSE: Duration = Duration::from_secs(600);
    pub const ACTIVITY_HEARTBEAT: Duration = Duration::from_secs(120);
    pub const CLEANUP: Duration = Duration::from_secs(120);
    pub const AGENT_EXECUTION: Duration = Duration::from_secs(300);
    pub const WORKFLOW: Duration = Duration::from_secs(1800);
}

/// Classify an error message as transient (worth retrying under the active
/// policy) or not.
pub fn is_retryable(message: &str) -> bool {
    const RETRYABLE: &[&str] = &[
        "timeout",
        "timed out",
        "service unavailable",
        "temporarily unavailable",
        "connection refused",
        "connection reset",
    ];
    const NOT_RETRYABLE: &[&str] = &["invalid argument", "file not found", "permission denied"];

    let lower = message.to_lowercase();
    if NOT_RETRYABLE.iter().any(|p| lower.contains(p)) {
        return false;
    }
    RETRYABLE.iter().any(|p| lower.contains(p))
}

/// Classify an error message as a file-lock conflict.
pub fn is_lock_conflict(message: &str) -> bool {
    let lower = message.to_lowercase();
    ["locked", "lock acquisition failed", "lock conflict", "concurrent modification"]
        .iter()
        .any(|p| lower.contains(p))
}

/// A saga-style compensation guard.
///
/// Constructed with an independent [`CancellationToken`] (never a child of
/// the workflow's own token), so that cancelling the parent workflow does
/// not prevent the guarded teardown/release from running. Callers acquire
/// the guard immediately after the resource is obtained and call
/// [`SagaGuard::release`] on every exit path, including the cancelled one.
pub struct SagaGuard {
    token: CancellationToken,
    released: bool,
}

impl SagaGuard {
    pub fn new() -> Self {
        Self {
            token: CancellationToken::new(),
            released: false,
        }
    }

    /// The token compensating activities should run under: independent of
    /// whatever cancelled the parent workflow.
    pub fn compensation_token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Mark compensation as having run. Idempotent: calling twice is safe.
    pub fn release(&mut self) {
        self.released = true;
    }

    pub fn was_released(&self) -> bool {
        self.released
    }
}

impl Default for SagaGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for SagaGuard {
    fn drop(&mut self) {
        if !self.released {
            tracing::warn!("saga guard dropped without release; compensation may not have run");
        }
    }
}
