//! [`CellProvisioner`] backed by [`crate::worktree::WorktreeManager`].
//!
//! A cell is a git worktree plus a running agent server process. The
//! server's PID travels in [`CellBootstrap`] (a plain scalar, per the
//! serializable-runtime-boundary requirement); the live `tokio::process::Child`
//! handle itself is kept out-of-band in an in-process registry, since a
//! real durable runtime may resume this provisioner in a different process
//! than the one that bootstrapped the cell.

use std::collections::HashMap;
use std::process::{Command, Stdio};
use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use tcr_core::capabilities::{CellProvisioner, TaskExecutionOutcome};
use tcr_core::types::CellBootstrap;

use crate::worktree::WorktreeManager;

pub struct WorktreeCellProvisioner {
    manager: WorktreeManager,
    test_command: Vec<String>,
    lint_command: Vec<String>,
    server_command: Vec<String>,
    next_port: AtomicU16,
    servers: Mutex<HashMap<String, tokio::process::Child>>,
}

impl WorktreeCellProvisioner {
    pub fn new(
        manager: WorktreeManager,
        test_command: Vec<String>,
        lint_command: Vec<String>,
        server_command: Vec<String>,
    ) -> Self {
        Self {
            manager,
            test_command,
            lint_command,
            server_command,
            next_port: AtomicU16::new(38_000),
            servers: Mutex::new(HashMap::new()),
        }
    }

    fn allocate_port(&self) -> u16 {
        self.next_port.fetch_add(1, Ordering::SeqCst)
    }

    async fn spawn_server(&self, cell_id: &str, worktree_path: &std::path::Path, port: u16) -> anyhow::Result<u32> {
        if self.server_command.is_empty() {
            return Ok(0);
        }
        let mut cmd = tokio::process::Command::new(&self.server_command[0]);
        cmd.args(&self.server_command[1..])
            .current_dir(worktree_path)
            .env("TCR_CELL_PORT", port.to_string())
            .stdout(Stdio::null())
            .stderr(Stdio::null());
        let child = cmd.spawn()?;
        let pid = child.id().unwrap_or(0);
        self.servers.lock().unwrap().insert(cell_id.to_string(), child);
        Ok(pid)
    }
}

#[async_trait]
impl CellProvisioner for WorktreeCellProvisioner {
    async fn bootstrap(&self, cell_id: &str, branch: &str) -> anyhow::Result<CellBootstrap> {
        let branch_name = WorktreeManager::branch_name(cell_id, branch);
        let worktree = self.manager.create_worktree(&branch_name)?;
        let port = self.allocate_port();
        let server_pid = self.spawn_server(cell_id, &worktree.path, port).await?;

        Ok(CellBootstrap {
            cell_id: cell_id.to_string(),
            port,
            worktree_id: branch_name,
            worktree_path: worktree.path.to_string_lossy().into_owned(),
            base_url: "http://127.0.0.1".to_string(),
            server_pid,
        })
    }

    async fn execute_task(&self, cell: &CellBootstrap, prompt: &str) -> anyhow::Result<TaskExecutionOutcome> {
        let output = Command::new("sh")
            .arg("-c")
            .arg(prompt)
            .current_dir(&cell.worktree_path)
            .output()?;
        Ok(TaskExecutionOutcome {
            success: output.status.success(),
            output: String::from_utf8_lossy(&output.stdout).into_owned(),
            files_modified: Vec::new(),
            error_message: (!output.status.success())
                .then(|| String::from_utf8_lossy(&output.stderr).into_owned()),
        })
    }

    async fn run_tests(&self, cell: &CellBootstrap) -> anyhow::Result<(bool, String)> {
        if self.test_command.is_empty() {
            return Ok((true, String::new()));
        }
        let output = Command::new(&self.test_command[0])
            .args(&self.test_command[1..])
            .current_dir(&cell.worktree_path)
            .output()?;
        let combined = format!(
            "{}{}",
            String::from_utf8_lossy(&output.stdout),
            String::from_utf8_lossy(&output.stderr)
        );
        Ok((output.status.success(), combined))
    }

    async fn run_lint(&self, cell: &CellBootstrap) -> anyhow::Result<(bool, String)> {
        if self.lint_command.is_empty() {
            return Ok((true, String::new()));
        }
        let output = Command::new(&self.lint_command[0])
            .args(&self.lint_command[1..])
            .current_dir(&cell.worktree_path)
            .output()?;
        let combined = format!(
            "{}{}",
            String::from_utf8_lossy(&output.stdout),
            String::from_utf8_lossy(&output.stderr)
        );
        Ok((output.status.success(), combined))
    }

    async fn commit(&self, cell: &CellBootstrap, message: &str) -> anyhow::Result<()> {
        let add = Command::new("git")
            .args(["add", "-A"])
            .current_dir(&cell.worktree_path)
            .output()?;
        anyhow::ensure!(add.status.success(), "git add failed: {}", String::from_utf8_lossy(&add.stderr));

        let commit = Command::new("git")
            .args(["commit", "-m", message])
            .current_dir(&cell.worktree_path)
            .output()?;
        anyhow::ensure!(
            commit.status.success(),
            "git commit failed: {}",
            String::from_utf8_lossy(&commit.stderr)
        );
        Ok(())
    }

    async fn revert(&self, cell: &CellBootstrap) -> anyhow::Result<()> {
        let reset = Command::new("git")
            .args(["checkout", "--", "."])
            .current_dir(&cell.worktree_path)
            .output()?;
        anyhow::ensure!(
            reset.status.success(),
            "git checkout -- . failed: {}",
            String::from_utf8_lossy(&reset.stderr)
        );
        let clean = Command::new("git")
            .args(["clean", "-fd"])
            .current_dir(&cell.worktree_path)
            .output()?;
        anyhow::ensure!(clean.status.success(), "git clean -fd failed: {}", String::from_utf8_lossy(&clean.stderr));
        Ok(())
    }

    async fn teardown(&self, cell: &CellBootstrap) -> anyhow::Result<()> {
        if let Some(mut child) = self.servers.lock().unwrap().remove(&cell.cell_id) {
            let _ = child.start_kill();
        } else if cell.server_pid != 0 {
            kill_by_pid(cell.server_pid);
        }
        self.manager
            .remove_worktree(std::path::Path::new(&cell.worktree_path))?;
        self.manager.delete_branch(&cell.worktree_id)?;
        Ok(())
    }

    async fn clone_cell(&self, cell: &CellBootstrap, new_cell_id: &str) -> anyhow::Result<CellBootstrap> {
        let clone_branch = format!("{}-clone-{new_cell_id}", cell.worktree_id);
        let branched = Command::new("git")
            .args(["branch", &clone_branch, &cell.worktree_id])
            .current_dir(self.manager.repo_path())
            .output()?;
        anyhow::ensure!(
            branched.status.success(),
            "failed to branch {clone_branch} from {}: {}",
            cell.worktree_id,
            String::from_utf8_lossy(&branched.stderr)
        );

        let worktree = self.manager.create_worktree(&clone_branch)?;
        let port = self.allocate_port();
        let server_pid = self.spawn_server(new_cell_id, &worktree.path, port).await?;

        Ok(CellBootstrap {
            cell_id: new_cell_id.to_string(),
            port,
            worktree_id: clone_branch,
            worktree_path: worktree.path.to_string_lossy().into_owned(),
            base_url: cell.base_url.clone(),
            server_pid,
        })
    }
}

#[cfg(unix)]
fn kill_by_pid(pid: u32) {
    unsafe {
        libc::kill(pid as libc::pid_t, libc::SIGTERM);
    }
}

#[cfg(not(unix))]
fn kill_by_pid(_pid: u32) {}
