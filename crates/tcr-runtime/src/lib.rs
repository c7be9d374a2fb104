//! Concrete adapters for the capability traits defined in `tcr-core`.
//!
//! `tcr-core` never depends on any of this: it only ever sees `Arc<dyn
//! CellProvisioner>` etc. This crate is where a git worktree becomes a
//! cell, an HTTP call becomes an agent invocation, and a `HashSet<String>`
//! becomes a lock table.

pub mod agent;
pub mod lock;
pub mod provisioner;
pub mod runtime;
pub mod worktree;

pub use agent::HttpAgentClient;
pub use lock::InMemoryLockManager;
pub use provisioner::WorktreeCellProvisioner;
pub use runtime::InMemoryDurableRuntime;
