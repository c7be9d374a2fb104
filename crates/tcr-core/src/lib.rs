//! Core business logic for the durable, gate-driven TCR orchestration engine.
//!
//! This crate holds the state machine, parsers, and policy that define what
//! a TCR run *is*. It depends only on the capability traits in
//! [`capabilities`]; concrete cell/agent/lock/runtime backends live in
//! `tcr-runtime`.

pub mod activities;
pub mod benchmark;
pub mod capabilities;
pub mod cell;
pub mod dag;
pub mod orchestrator;
pub mod parsers;
pub mod policy;
pub mod types;

pub use capabilities::{
    ActivityFn, ActivityOptions, AgentClient, AgentResponse, CellProvisioner, DurableRuntime,
    LockManager, TaskExecutionOutcome,
};
pub use orchestrator::parallel::{ParallelFixOutcome, ParallelFixer, ParallelTcrOrchestrator};
pub use orchestrator::TcrOrchestrator;
pub use policy::RetryPolicy;
pub use types::{
    CellBootstrap, GateResult, ParallelTcrConfig, ReviewAggregate, TcrInput, TcrResult,
    WorkflowState,
};
