//! Configuration file management for tcr.
//!
//! Provides a TOML-based config file at `~/.config/tcr/config.toml` and a
//! resolution chain: CLI flag > env var > config file > default.

use std::path::PathBuf;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

// -----------------------------------------------------------------------
// Config file types
// -----------------------------------------------------------------------

#[derive(Debug, Serialize, Deserialize, Default)]
pub struct ConfigFile {
    #[serde(default)]
    pub cell: CellSection,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CellSection {
    /// Path to the main repository whose worktrees back each cell.
    pub repo_path: Option<String>,
    /// Base directory for cell worktrees. Defaults to a sibling of
    /// `repo_path` when unset.
    pub worktree_base: Option<String>,
    /// Test command run inside a cell, e.g. `["cargo", "test"]`.
    pub test_command: Option<Vec<String>>,
    /// Lint command run inside a cell for the LintTest gate, e.g.
    /// `["cargo", "clippy", "--message-format=short"]`. Unset means no lint
    /// command is configured, and LintTest always passes.
    pub lint_command: Option<Vec<String>>,
    /// Agent server command spawned inside a cell, e.g. `["tcr-agent"]`.
    /// Empty means no server is spawned (tests and dry runs).
    pub server_command: Option<Vec<String>>,
    /// Default DAG/benchmark concurrency cap.
    pub max_concurrency: Option<usize>,
}

impl Default for CellSection {
    fn default() -> Self {
        Self {
            repo_path: None,
            worktree_base: None,
            test_command: None,
            lint_command: None,
            server_command: None,
            max_concurrency: None,
        }
    }
}

// -----------------------------------------------------------------------
// Paths
// -----------------------------------------------------------------------

/// Return the tcr config directory.
///
/// Always uses XDG layout: `$XDG_CONFIG_HOME/tcr` or `~/.config/tcr`.
pub fn config_dir() -> PathBuf {
    if let Ok(xdg) = std::env::var("XDG_CONFIG_HOME") {
        return PathBuf::from(xdg).join("tcr");
    }
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".config")
        .join("tcr")
}

/// Return the path to the tcr config file.
pub fn config_path() -> PathBuf {
    config_dir().join("config.toml")
}

// -----------------------------------------------------------------------
// Read / write
// -----------------------------------------------------------------------

/// Load and parse the config file. Returns an error if it does not exist.
pub fn load_config() -> Result<ConfigFile> {
    let path = config_path();
    let contents = std::fs::read_to_string(&path)
        .with_context(|| format!("failed to read config file at {}", path.display()))?;
    let config: ConfigFile = toml::from_str(&contents).context("failed to parse config file")?;
    Ok(config)
}

/// Serialize and write the config file, creating parent dirs as needed.
pub fn save_config(config: &ConfigFile) -> Result<()> {
    let path = config_path();
    let dir = config_dir();
    std::fs::create_dir_all(&dir)
        .with_context(|| format!("failed to create config directory {}", dir.display()))?;

    let contents = toml::to_string_pretty(config).context("failed to serialize config")?;
    std::fs::write(&path, &contents)
        .with_context(|| format!("failed to write config file at {}", path.display()))?;

    Ok(())
}

// -----------------------------------------------------------------------
// Resolved config
// -----------------------------------------------------------------------

/// Fully resolved configuration, ready for use.
#[derive(Debug, Clone)]
pub struct TcrConfig {
    pub repo_path: PathBuf,
    pub worktree_base: Option<PathBuf>,
    pub test_command: Vec<String>,
    pub lint_command: Vec<String>,
    pub server_command: Vec<String>,
    pub max_concurrency: usize,
}

impl TcrConfig {
    /// Resolve configuration using the chain: CLI flag > env var > config file > default.
    pub fn resolve(cli_repo_path: Option<&str>) -> Result<Self> {
        let file_config = load_config().ok();
        let cell = file_config.as_ref().map(|c| &c.cell);

        let repo_path = if let Some(path) = cli_repo_path {
            PathBuf::from(path)
        } else if let Ok(path) = std::env::var("TCR_REPO_PATH") {
            PathBuf::from(path)
        } else if let Some(path) = cell.and_then(|c| c.repo_path.clone()) {
            PathBuf::from(path)
        } else {
            std::env::current_dir().context("failed to resolve current directory")?
        };

        let worktree_base = std::env::var("TCR_WORKTREE_BASE")
            .ok()
            .map(PathBuf::from)
            .or_else(|| cell.and_then(|c| c.worktree_base.clone()).map(PathBuf::from));

        let test_command = std::env::var("TCR_TEST_COMMAND")
            .ok()
            .map(|s| split_command(&s))
            .or_else(|| cell.and_then(|c| c.test_command.clone()))
            .unwrap_or_else(|| vec!["cargo".to_string(), "test".to_string()]);

        let lint_command = std::env::var("TCR_LINT_COMMAND")
            .ok()
            .map(|s| split_command(&s))
            .or_else(|| cell.and_then(|c| c.lint_command.clone()))
            .unwrap_or_default();

        let server_command = std::env::var("TCR_SERVER_COMMAND")
            .ok()
            .map(|s| split_command(&s))
            .or_else(|| cell.and_then(|c| c.server_command.clone()))
            .unwrap_or_default();

        let max_concurrency = std::env::var("TCR_MAX_CONCURRENCY")
            .ok()
            .and_then(|s| s.parse().ok())
            .or_else(|| cell.and_then(|c| c.max_concurrency))
            .unwrap_or(4);

        Ok(Self {
            repo_path,
            worktree_base,
            test_command,
            lint_command,
            server_command,
            max_concurrency,
        })
    }
}

fn split_command(s: &str) -> Vec<String> {
    s.split_whitespace().map(|s| s.to_string()).collect()
}

// -----------------------------------------------------------------------
// Tests
// -----------------------------------------------------------------------
